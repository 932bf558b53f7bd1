//! The in-flight transaction buffer.
//!
//! Holds the open set of transactions keyed by xid and releases them to the
//! builder in commit order. A transaction's chain is SCN-ordered internally
//! because changes append in parse order; on commit the whole transaction
//! carries its commit (scn, subscn), and ties release deterministically by
//! (commit scn, subscn, xid).

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;

use ferroredo_error::Result;
use ferroredo_types::{RowChange, Scn, Shutdown, SubScn, Xid};
use tracing::{debug, trace, warn};

use crate::chain::ChangeChain;
use crate::pool::ChunkPool;

/// One open transaction.
#[derive(Debug)]
struct OpenTxn {
    begin_scn: Scn,
    chain: ChangeChain,
}

/// A committed transaction whose chain ownership has transferred out of the
/// buffer. The builder holds it until every rendered message is confirmed.
#[derive(Debug)]
pub struct CommittedTxn {
    pub xid: Xid,
    pub begin_scn: Scn,
    pub commit_scn: Scn,
    pub commit_subscn: SubScn,
    pub chain: ChangeChain,
}

impl CommittedTxn {
    fn order_key(&self) -> (Scn, SubScn, Xid) {
        (self.commit_scn, self.commit_subscn, self.xid)
    }
}

impl PartialEq for CommittedTxn {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for CommittedTxn {}

impl PartialOrd for CommittedTxn {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommittedTxn {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// Buffer of in-flight transactions for one pipeline instance.
///
/// Owned by the parser thread; not internally synchronized. Backpressure
/// comes from the chunk pool, which blocks `change` when memory runs out.
#[derive(Debug)]
pub struct TransactionBuffer {
    pool: ChunkPool,
    open: HashMap<Xid, OpenTxn>,
    /// Committed but not yet released, min-ordered by (scn, subscn, xid).
    committed: BinaryHeap<Reverse<CommittedTxn>>,
}

impl TransactionBuffer {
    pub fn new(pool: ChunkPool) -> Self {
        Self {
            pool,
            open: HashMap::new(),
            committed: BinaryHeap::new(),
        }
    }

    #[inline]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    #[inline]
    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    /// Open a transaction. Reuses the entry if the xid is already open.
    pub fn begin(&mut self, xid: Xid, scn: Scn) {
        self.open.entry(xid).or_insert_with(|| {
            trace!(%xid, %scn, "transaction opened");
            OpenTxn {
                begin_scn: scn,
                chain: ChangeChain::new(),
            }
        });
    }

    /// Append a change to the xid's chain, opening the transaction if the
    /// begin record fell before the starting position.
    pub fn change(&mut self, xid: Xid, change: &RowChange, shutdown: &Shutdown) -> Result<()> {
        let entry = self.open.entry(xid).or_insert_with(|| {
            trace!(%xid, scn = %change.scn, "transaction opened implicitly by first change");
            OpenTxn {
                begin_scn: change.scn,
                chain: ChangeChain::new(),
            }
        });
        entry.chain.append(change, &self.pool, shutdown)
    }

    /// Discard the transaction; its chunks return to the pool in bounded
    /// time (immediately, via the chain drop).
    pub fn rollback(&mut self, xid: Xid) {
        match self.open.remove(&xid) {
            Some(txn) => {
                debug!(%xid, changes = txn.chain.entry_count(), "transaction rolled back");
            }
            None => warn!(%xid, "rollback for unknown transaction ignored"),
        }
    }

    /// Mark the transaction committed. The chain is not released yet: it is
    /// queued until [`TransactionBuffer::take_ready`] observes that parsing
    /// has advanced past the commit SCN, which guarantees all of the
    /// transaction's changes have been parsed.
    pub fn commit(&mut self, xid: Xid, commit_scn: Scn, commit_subscn: SubScn) {
        let Some(txn) = self.open.remove(&xid) else {
            warn!(%xid, %commit_scn, "commit for unknown transaction ignored");
            return;
        };
        debug!(
            %xid,
            %commit_scn,
            changes = txn.chain.entry_count(),
            "transaction committed"
        );
        self.committed.push(Reverse(CommittedTxn {
            xid,
            begin_scn: txn.begin_scn,
            commit_scn,
            commit_subscn,
            chain: txn.chain,
        }));
    }

    /// Release committed transactions whose commit SCN is at or below
    /// `parsed_scn`, in (scn, subscn, xid) order.
    pub fn take_ready(&mut self, parsed_scn: Scn) -> Vec<CommittedTxn> {
        let mut out = Vec::new();
        while let Some(Reverse(top)) = self.committed.peek() {
            if top.commit_scn > parsed_scn {
                break;
            }
            out.push(self.committed.pop().expect("peeked entry present").0);
        }
        out
    }

    /// Release everything committed, regardless of parse progress. Called
    /// at end of a log file, where every record has been parsed.
    pub fn take_all_committed(&mut self) -> Vec<CommittedTxn> {
        let mut out: Vec<_> = std::mem::take(&mut self.committed)
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(t)| t)
            .collect();
        // into_sorted_vec on Reverse yields descending commit order.
        out.reverse();
        out
    }

    /// Drop every open transaction (shutdown path). Chunks return to the
    /// pool.
    pub fn purge(&mut self) {
        let open = self.open.len();
        let committed = self.committed.len();
        if open + committed > 0 {
            debug!(open, committed, "purging transaction buffer");
        }
        self.open.clear();
        self.committed.clear();
    }
}
