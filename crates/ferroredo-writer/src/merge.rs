//! Merge writer for multi-instance (RAC) sources.
//!
//! Each database instance runs its own pipeline and pushes rendered
//! messages here; the merge writer drains a priority queue ordered by
//! (scn, subscn, instance) so the shared sink sees one SCN-ordered stream.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use ferroredo_builder::OutputMessage;
use ferroredo_error::Result;
use ferroredo_types::{Scn, Shutdown, SubScn};
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::file::FileWriter;

const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Entry {
    scn: Scn,
    subscn: SubScn,
    instance: u16,
    msg: OutputMessage,
}

impl Entry {
    fn key(&self) -> (Scn, SubScn, u16) {
        (self.scn, self.subscn, self.instance)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Default)]
struct MergeState {
    heap: BinaryHeap<Reverse<Entry>>,
    /// Instances that have announced end-of-stream.
    closed_instances: usize,
    instances: usize,
}

/// SCN-ordered merge point in front of one shared [`FileWriter`].
pub struct MergeWriter {
    state: Mutex<MergeState>,
    arrived: Condvar,
    shutdown: Arc<Shutdown>,
}

impl MergeWriter {
    pub fn new(instances: usize, shutdown: Arc<Shutdown>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MergeState {
                heap: BinaryHeap::new(),
                closed_instances: 0,
                instances,
            }),
            arrived: Condvar::new(),
            shutdown,
        })
    }

    /// Push one instance's message into the merge.
    pub fn push(&self, instance: u16, msg: OutputMessage) {
        let mut s = self.state.lock();
        trace!(instance, scn = msg.scn.get(), "message entered merge");
        s.heap.push(Reverse(Entry {
            scn: msg.scn,
            subscn: msg.subscn,
            instance,
            msg,
        }));
        self.arrived.notify_one();
    }

    /// An instance finished its stream.
    pub fn close_instance(&self) {
        let mut s = self.state.lock();
        s.closed_instances += 1;
        self.arrived.notify_all();
    }

    /// Drain everything currently mergeable into the sink, in SCN order.
    /// Returns once all instances have closed and the heap is empty, or on
    /// soft shutdown.
    pub fn run(&self, sink: &mut FileWriter) -> Result<()> {
        loop {
            let entry = {
                let mut s = self.state.lock();
                loop {
                    if let Some(Reverse(e)) = s.heap.pop() {
                        break Some(e);
                    }
                    if s.closed_instances >= s.instances || self.shutdown.soft_requested() {
                        break None;
                    }
                    self.arrived.wait_for(&mut s, WAIT_SLICE);
                }
            };
            match entry {
                Some(e) => sink.write_message(&e.msg)?,
                None => {
                    sink.checkpoint_flush()?;
                    return Ok(());
                }
            }
        }
    }
}
