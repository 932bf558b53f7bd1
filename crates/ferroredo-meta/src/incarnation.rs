//! Database incarnations and resetlogs switching.
//!
//! A `RESETLOGS` forks the redo history: the new branch gets a fresh
//! resetlogs id and its sequence numbering restarts at zero. The
//! incarnation table records each branch, its resetlogs SCN, and the branch
//! it forked from; the orchestrator consults it at the top of every
//! iteration to follow the fork the database actually took.

use ferroredo_error::{FerroError, Result};
use ferroredo_types::{Resetlogs, Scn};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One branch of the redo history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbIncarnation {
    pub incarnation: u32,
    pub resetlogs: Resetlogs,
    /// SCN at which this branch forked off its parent.
    pub resetlogs_scn: Scn,
    pub prior_incarnation: u32,
    /// `CURRENT`, `PARENT`, or `ORPHAN` as reported by the source.
    pub status: String,
}

/// The set of known incarnations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncarnationSet {
    incarnations: Vec<DbIncarnation>,
}

/// Outcome of a resetlogs check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetlogsDecision {
    /// Stay on the current branch.
    Stay,
    /// Switch to this resetlogs id; sequence and offset reset to zero.
    Switch(Resetlogs),
}

impl IncarnationSet {
    pub fn new(incarnations: Vec<DbIncarnation>) -> Self {
        Self { incarnations }
    }

    pub fn is_empty(&self) -> bool {
        self.incarnations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.incarnations.len()
    }

    /// The incarnation currently carrying `resetlogs`.
    pub fn by_resetlogs(&self, resetlogs: Resetlogs) -> Option<&DbIncarnation> {
        self.incarnations.iter().find(|i| i.resetlogs == resetlogs)
    }

    /// Decide whether the stream has crossed into a new incarnation.
    ///
    /// A switch happens when some incarnation's resetlogs SCN equals the
    /// position's next SCN and that incarnation forked off the branch we
    /// are currently on. An empty incarnation table means single-branch
    /// operation and never switches; a current resetlogs id missing from a
    /// non-empty table is a data error.
    pub fn check_switch(
        &self,
        current_resetlogs: Resetlogs,
        next_scn: Option<Scn>,
    ) -> Result<ResetlogsDecision> {
        if self.incarnations.is_empty() {
            return Ok(ResetlogsDecision::Stay);
        }
        let current = self
            .by_resetlogs(current_resetlogs)
            .ok_or(FerroError::IncarnationNotFound {
                resetlogs: current_resetlogs,
            })?;

        if let Some(next) = next_scn {
            for candidate in &self.incarnations {
                if candidate.resetlogs_scn == next
                    && candidate.prior_incarnation == current.incarnation
                {
                    info!(
                        from = current_resetlogs.0,
                        to = candidate.resetlogs.0,
                        scn = next.get(),
                        "new resetlogs detected"
                    );
                    return Ok(ResetlogsDecision::Switch(candidate.resetlogs));
                }
            }
        }
        Ok(ResetlogsDecision::Stay)
    }
}
