//! Replication position metadata.
//!
//! Owns the resettable position (resetlogs, sequence, file offset, SCN
//! window), the checkpoint store behind it, and the incarnation table that
//! drives resetlogs switching. The position lives behind a single mutex;
//! holders keep it for microseconds.

pub mod checkpoint;
pub mod incarnation;

pub use checkpoint::{Checkpoint, CheckpointStore, WriterMark};
pub use incarnation::{DbIncarnation, IncarnationSet, ResetlogsDecision};

use std::sync::Arc;

use ferroredo_error::Result;
use ferroredo_types::{Resetlogs, Scn, Seq};
use parking_lot::Mutex;
use tracing::info;

/// In-memory view of the replication position, checkpoint-backed.
#[derive(Debug)]
pub struct Metadata {
    store: CheckpointStore,
    state: Mutex<Position>,
    incarnations: Mutex<IncarnationSet>,
}

#[derive(Debug, Clone)]
struct Position {
    resetlogs: Resetlogs,
    sequence: Seq,
    offset: u64,
    confirmed: Option<WriterMark>,
    first_scn: Option<Scn>,
    next_scn: Option<Scn>,
    schema: Option<String>,
    extra: serde_json::Map<String, serde_json::Value>,
    /// Checkpoints are held back until startup decides the position is
    /// trustworthy.
    checkpoints_allowed: bool,
}

impl Metadata {
    /// Open the store and adopt the persisted position, if any.
    pub fn open(store: CheckpointStore) -> Result<Arc<Self>> {
        let persisted = store.load()?;
        let position = match persisted {
            Some(chk) => Position {
                resetlogs: chk.resetlogs,
                sequence: chk.sequence,
                offset: chk.offset,
                confirmed: chk.confirmed,
                first_scn: chk.first_scn,
                next_scn: chk.next_scn,
                schema: chk.schema,
                extra: chk.extra,
                checkpoints_allowed: false,
            },
            None => Position {
                resetlogs: Resetlogs(0),
                sequence: Seq::ZERO,
                offset: 0,
                confirmed: None,
                first_scn: None,
                next_scn: None,
                schema: None,
                extra: serde_json::Map::new(),
                checkpoints_allowed: false,
            },
        };
        Ok(Arc::new(Self {
            store,
            state: Mutex::new(position),
            incarnations: Mutex::new(IncarnationSet::default()),
        }))
    }

    pub fn set_incarnations(&self, set: IncarnationSet) {
        *self.incarnations.lock() = set;
    }

    pub fn resetlogs(&self) -> Resetlogs {
        self.state.lock().resetlogs
    }

    pub fn sequence(&self) -> Seq {
        self.state.lock().sequence
    }

    pub fn offset(&self) -> u64 {
        self.state.lock().offset
    }

    pub fn next_scn(&self) -> Option<Scn> {
        self.state.lock().next_scn
    }

    pub fn schema(&self) -> Option<String> {
        self.state.lock().schema.clone()
    }

    /// Writer watermark recorded with the last persisted checkpoint.
    pub fn confirmed(&self) -> Option<WriterMark> {
        self.state.lock().confirmed
    }

    /// Whether any position has been persisted or adopted yet.
    pub fn is_positioned(&self) -> bool {
        self.state.lock().sequence != Seq::ZERO
    }

    /// Startup trusts the position: checkpoints may persist from now on.
    pub fn allow_checkpoints(&self) {
        self.state.lock().checkpoints_allowed = true;
    }

    /// Fix the starting position (boot, or archive discovery).
    pub fn set_position(&self, sequence: Seq, offset: u64) {
        let mut s = self.state.lock();
        s.sequence = sequence;
        s.offset = offset;
    }

    /// Record the SCN window of the log just consumed; the resetlogs check
    /// matches the next SCN against incarnation fork points.
    pub fn set_scns(&self, first_scn: Option<Scn>, next_scn: Option<Scn>) {
        let mut s = self.state.lock();
        if first_scn.is_some() {
            s.first_scn = first_scn;
        }
        if next_scn.is_some() {
            s.next_scn = next_scn;
        }
    }

    pub fn set_resetlogs(&self, resetlogs: Resetlogs) {
        self.state.lock().resetlogs = resetlogs;
    }

    /// Consult the incarnation table; on a fork, reset to sequence zero on
    /// the new branch.
    pub fn update_resetlogs(&self) -> Result<bool> {
        let decision = {
            let s = self.state.lock();
            // Before the first header is seen the incarnation is unknown;
            // nothing to check yet.
            if s.resetlogs == Resetlogs(0) {
                return Ok(false);
            }
            self.incarnations
                .lock()
                .check_switch(s.resetlogs, s.next_scn)?
        };
        match decision {
            ResetlogsDecision::Stay => Ok(false),
            ResetlogsDecision::Switch(resetlogs) => {
                let mut s = self.state.lock();
                s.resetlogs = resetlogs;
                s.sequence = Seq::ZERO;
                s.offset = 0;
                info!(resetlogs = resetlogs.0, "position moved to new incarnation");
                Ok(true)
            }
        }
    }

    /// Advance and persist the checkpoint. Callers flush the writer first:
    /// the watermark must be durable before the position moves past it.
    pub fn advance(
        &self,
        sequence: Seq,
        offset: u64,
        first_scn: Option<Scn>,
        next_scn: Option<Scn>,
        confirmed: Option<WriterMark>,
    ) -> Result<()> {
        let snapshot = {
            let mut s = self.state.lock();
            s.sequence = sequence;
            s.offset = offset;
            if first_scn.is_some() {
                s.first_scn = first_scn;
            }
            if next_scn.is_some() {
                s.next_scn = next_scn;
            }
            if confirmed.is_some() {
                s.confirmed = confirmed;
            }
            if !s.checkpoints_allowed {
                return Ok(());
            }
            s.clone()
        };
        self.store.save(&Checkpoint {
            resetlogs: snapshot.resetlogs,
            sequence: snapshot.sequence,
            offset: snapshot.offset,
            confirmed: snapshot.confirmed,
            first_scn: snapshot.first_scn,
            next_scn: snapshot.next_scn,
            schema: snapshot.schema,
            extra: snapshot.extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(dir: &std::path::Path) -> Arc<Metadata> {
        Metadata::open(CheckpointStore::new(dir.join("chk.json"))).unwrap()
    }

    #[test]
    fn fresh_start_is_unpositioned() {
        let dir = tempfile::tempdir().unwrap();
        let m = meta(dir.path());
        assert!(!m.is_positioned());
        assert_eq!(m.sequence(), Seq::ZERO);
    }

    #[test]
    fn advance_persists_only_after_allow() {
        let dir = tempfile::tempdir().unwrap();
        let m = meta(dir.path());
        m.advance(Seq(5), 1024, Scn::new(10), Scn::new(20), None).unwrap();
        assert!(!dir.path().join("chk.json").exists());

        m.allow_checkpoints();
        m.advance(Seq(5), 2048, Scn::new(10), Scn::new(20), None).unwrap();
        let reloaded = meta(dir.path());
        assert_eq!(reloaded.sequence(), Seq(5));
        assert_eq!(reloaded.offset(), 2048);
    }

    #[test]
    fn recovery_resumes_from_persisted_position() {
        let dir = tempfile::tempdir().unwrap();
        {
            let m = meta(dir.path());
            m.set_resetlogs(Resetlogs(7));
            m.allow_checkpoints();
            m.advance(Seq(9), 4096, Scn::new(100), None, None).unwrap();
        }
        let m = meta(dir.path());
        assert_eq!(m.resetlogs(), Resetlogs(7));
        assert_eq!(m.sequence(), Seq(9));
        assert_eq!(m.offset(), 4096);
        assert!(m.is_positioned());
    }

    #[test]
    fn resetlogs_switch_resets_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let m = meta(dir.path());
        m.set_resetlogs(Resetlogs(100));
        m.set_position(Seq(40), 9999);
        m.set_incarnations(IncarnationSet::new(vec![
            DbIncarnation {
                incarnation: 1,
                resetlogs: Resetlogs(100),
                resetlogs_scn: Scn::new(1).unwrap(),
                prior_incarnation: 0,
                status: "PARENT".into(),
            },
            DbIncarnation {
                incarnation: 2,
                resetlogs: Resetlogs(200),
                resetlogs_scn: Scn::new(5000).unwrap(),
                prior_incarnation: 1,
                status: "CURRENT".into(),
            },
        ]));

        // Not at the fork yet.
        m.advance(Seq(40), 9999, None, Scn::new(4000), None).unwrap();
        assert!(!m.update_resetlogs().unwrap());

        // At the fork.
        m.advance(Seq(40), 9999, None, Scn::new(5000), None).unwrap();
        assert!(m.update_resetlogs().unwrap());
        assert_eq!(m.resetlogs(), Resetlogs(200));
        assert_eq!(m.sequence(), Seq::ZERO);
        assert_eq!(m.offset(), 0);
    }
}
