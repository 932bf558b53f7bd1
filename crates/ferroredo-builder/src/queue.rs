//! Bounded message queue between builder and writer.
//!
//! The builder pushes rendered messages and blocks when the queue is full;
//! the writer pops in order and reports the confirmed watermark back after
//! each durable write. Both directions run under one mutex with two
//! condvars, and every wait also watches the shutdown flags.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ferroredo_error::{FerroError, Result};
use ferroredo_types::Shutdown;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::message::{MessagePosition, OutputMessage};

const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<OutputMessage>,
    closed: bool,
    confirmed: Option<MessagePosition>,
}

/// Result of one bounded dequeue attempt.
#[derive(Debug)]
pub enum PopOutcome {
    Message(OutputMessage),
    /// Nothing arrived within the wait slice; the queue is still open.
    Idle,
    /// Closed and fully drained, or hard shutdown.
    Closed,
}

/// Shared builder→writer channel with a confirmation watermark flowing the
/// other way.
#[derive(Debug)]
pub struct MessageQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    depth: usize,
    shutdown: Arc<Shutdown>,
}

impl MessageQueue {
    pub fn new(depth: usize, shutdown: Arc<Shutdown>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(depth),
                closed: false,
                confirmed: None,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            depth,
            shutdown,
        })
    }

    /// Enqueue a message, blocking while the queue is full.
    pub fn push(&self, msg: OutputMessage) -> Result<()> {
        let mut s = self.state.lock();
        loop {
            if self.shutdown.hard_requested() {
                return Err(FerroError::Shutdown);
            }
            if s.closed {
                return Err(FerroError::internal("push into closed message queue"));
            }
            if s.queue.len() < self.depth {
                trace!(position = %msg.position, "message queued");
                s.queue.push_back(msg);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait_for(&mut s, WAIT_SLICE);
        }
    }

    /// Dequeue the next message. `None` once the queue is closed and
    /// drained, or on hard shutdown. A soft shutdown keeps draining: the
    /// producer closes the queue once in-flight work has flushed.
    pub fn pop(&self) -> Option<OutputMessage> {
        loop {
            match self.pop_wait() {
                PopOutcome::Message(msg) => return Some(msg),
                PopOutcome::Idle => {}
                PopOutcome::Closed => return None,
            }
        }
    }

    /// Like [`MessageQueue::pop`], but reports an idle wait slice back to
    /// the caller so the writer can flush its buffer while the pipeline is
    /// quiet.
    pub fn pop_wait(&self) -> PopOutcome {
        let mut s = self.state.lock();
        if let Some(msg) = s.queue.pop_front() {
            self.not_full.notify_one();
            return PopOutcome::Message(msg);
        }
        if s.closed || self.shutdown.hard_requested() {
            return PopOutcome::Closed;
        }
        self.not_empty.wait_for(&mut s, WAIT_SLICE);
        match s.queue.pop_front() {
            Some(msg) => {
                self.not_full.notify_one();
                PopOutcome::Message(msg)
            }
            None => PopOutcome::Idle,
        }
    }

    /// Writer reports everything at or below `position` durable.
    pub fn confirm(&self, position: MessagePosition) {
        let mut s = self.state.lock();
        if s.confirmed.map_or(true, |c| c < position) {
            s.confirmed = Some(position);
        }
        self.not_full.notify_all();
    }

    /// Latest confirmed watermark.
    pub fn confirmed(&self) -> Option<MessagePosition> {
        self.state.lock().confirmed
    }

    /// No more messages will be pushed; the writer drains and stops.
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

#[cfg(test)]
mod tests {
    use super::*;
    use ferroredo_types::{RowOp, Scn, Seq, SubScn};

    fn msg(offset: u64) -> OutputMessage {
        OutputMessage {
            scn: Scn::new(offset).unwrap(),
            subscn: SubScn(0),
            position: MessagePosition::new(Seq(1), offset, 0),
            op: RowOp::Insert,
            table: "T".into(),
            fingerprint: 0,
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn fifo_order() {
        let q = MessageQueue::new(4, Shutdown::new());
        q.push(msg(1)).unwrap();
        q.push(msg(2)).unwrap();
        assert_eq!(q.pop().unwrap().position.offset, 1);
        assert_eq!(q.pop().unwrap().position.offset, 2);
    }

    #[test]
    fn close_drains_then_ends() {
        let q = MessageQueue::new(4, Shutdown::new());
        q.push(msg(1)).unwrap();
        q.close();
        assert!(q.pop().is_some());
        assert!(q.pop().is_none());
        assert!(q.push(msg(2)).is_err());
    }

    #[test]
    fn full_queue_blocks_until_pop() {
        let q = MessageQueue::new(1, Shutdown::new());
        q.push(msg(1)).unwrap();

        let q2 = Arc::clone(&q);
        let pusher = std::thread::spawn(move || q2.push(msg(2)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(q.pop().unwrap().position.offset, 1);
        pusher.join().unwrap().unwrap();
        assert_eq!(q.pop().unwrap().position.offset, 2);
    }

    #[test]
    fn hard_shutdown_unblocks_push() {
        let shutdown = Shutdown::new();
        let q = MessageQueue::new(1, Arc::clone(&shutdown));
        q.push(msg(1)).unwrap();

        let q2 = Arc::clone(&q);
        let pusher = std::thread::spawn(move || q2.push(msg(2)));
        std::thread::sleep(Duration::from_millis(20));
        shutdown.stop_hard();
        assert!(matches!(pusher.join().unwrap(), Err(FerroError::Shutdown)));
    }

    #[test]
    fn watermark_is_monotonic() {
        let q = MessageQueue::new(4, Shutdown::new());
        q.confirm(MessagePosition::new(Seq(1), 100, 0));
        q.confirm(MessagePosition::new(Seq(1), 50, 0));
        assert_eq!(q.confirmed(), Some(MessagePosition::new(Seq(1), 100, 0)));
        q.confirm(MessagePosition::new(Seq(2), 10, 0));
        assert_eq!(q.confirmed(), Some(MessagePosition::new(Seq(2), 10, 0)));
    }
}
