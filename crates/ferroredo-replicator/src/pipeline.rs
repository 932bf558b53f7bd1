//! Thread plumbing between parser, builder, and writer.
//!
//! The parser (on the replicator thread) pushes committed transactions
//! into a bounded queue; the builder thread renders them into the message
//! queue; the writer thread drains that into the sink. Confirmation flows
//! back the same path: writer → message queue watermark → builder chain
//! release → chunk pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ferroredo_builder::Builder;
use ferroredo_error::{FerroError, Result};
use ferroredo_parser::CommitSink;
use ferroredo_txn::CommittedTxn;
use ferroredo_types::Shutdown;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct TxnQueueState {
    queue: VecDeque<CommittedTxn>,
    closed: bool,
}

/// Bounded handoff of committed transactions to the builder thread.
#[derive(Debug)]
pub struct TxnQueue {
    state: Mutex<TxnQueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    depth: usize,
    shutdown: Arc<Shutdown>,
}

impl TxnQueue {
    pub fn new(depth: usize, shutdown: Arc<Shutdown>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TxnQueueState {
                queue: VecDeque::with_capacity(depth),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            depth,
            shutdown,
        })
    }

    pub fn push(&self, txn: CommittedTxn) -> Result<()> {
        let mut s = self.state.lock();
        loop {
            if self.shutdown.hard_requested() {
                return Err(FerroError::Shutdown);
            }
            if s.closed {
                return Err(FerroError::internal("push into closed transaction queue"));
            }
            if s.queue.len() < self.depth {
                s.queue.push_back(txn);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait_for(&mut s, WAIT_SLICE);
        }
    }

    pub fn pop(&self) -> Option<CommittedTxn> {
        let mut s = self.state.lock();
        loop {
            if let Some(txn) = s.queue.pop_front() {
                self.not_full.notify_one();
                return Some(txn);
            }
            // Soft shutdown still drains; the producer closes the queue
            // once the pipeline has flushed. Hard shutdown exits now.
            if s.closed || self.shutdown.hard_requested() {
                return None;
            }
            self.not_empty.wait_for(&mut s, WAIT_SLICE);
        }
    }

    pub fn close(&self) {
        let mut s = self.state.lock();
        s.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adapter: parser's commit sink feeding the transaction queue.
pub struct QueueSink {
    queue: Arc<TxnQueue>,
}

impl QueueSink {
    pub fn new(queue: Arc<TxnQueue>) -> Self {
        Self { queue }
    }
}

impl CommitSink for QueueSink {
    fn consume(&mut self, txn: CommittedTxn) -> Result<()> {
        self.queue.push(txn)
    }
}

/// Builder thread body: render until the transaction queue closes.
pub fn run_builder(txns: &Arc<TxnQueue>, builder: &mut Builder) -> Result<()> {
    while let Some(txn) = txns.pop() {
        builder.process(txn)?;
    }
    builder.release_confirmed();
    debug!(
        skipped = builder.skipped(),
        retained = builder.retained(),
        "builder drained"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferroredo_txn::{ChunkPool, TransactionBuffer};
    use ferroredo_types::{Scn, SubScn, Xid};

    fn committed(scn: u64) -> CommittedTxn {
        let pool = ChunkPool::for_tests(4096, 8);
        let mut buffer = TransactionBuffer::new(pool);
        let xid = Xid::new(1, 0, scn as u32);
        buffer.begin(xid, Scn::new(scn).unwrap());
        buffer.commit(xid, Scn::new(scn).unwrap(), SubScn(0));
        buffer.take_all_committed().remove(0)
    }

    #[test]
    fn queue_round_trip() {
        let q = TxnQueue::new(2, Shutdown::new());
        q.push(committed(1)).unwrap();
        q.push(committed(2)).unwrap();
        q.close();
        assert_eq!(q.pop().unwrap().commit_scn.get(), 1);
        assert_eq!(q.pop().unwrap().commit_scn.get(), 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn bounded_push_blocks_and_resumes() {
        let q = TxnQueue::new(1, Shutdown::new());
        q.push(committed(1)).unwrap();
        let q2 = Arc::clone(&q);
        let pusher = std::thread::spawn(move || q2.push(committed(2)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(q.pop().is_some());
        pusher.join().unwrap().unwrap();
    }

    #[test]
    fn hard_shutdown_aborts_push() {
        let shutdown = Shutdown::new();
        let q = TxnQueue::new(1, Arc::clone(&shutdown));
        q.push(committed(1)).unwrap();
        let q2 = Arc::clone(&q);
        let pusher = std::thread::spawn(move || q2.push(committed(2)));
        std::thread::sleep(Duration::from_millis(20));
        shutdown.stop_hard();
        assert!(pusher.join().unwrap().is_err());
    }
}
