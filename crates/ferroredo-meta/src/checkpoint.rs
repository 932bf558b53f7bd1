//! Checkpoint persistence.
//!
//! The checkpoint is the durable replication position: replaying from it
//! must reproduce byte-identical output, so it only ever advances after
//! the writer's watermark is flushed. The file is JSON, written atomically
//! (write to a temporary sibling, then rename), and forward-compatible:
//! keys this version does not know are carried through on rewrite.

use std::path::{Path, PathBuf};

use ferroredo_error::{FerroError, Result};
use ferroredo_types::{Resetlogs, Scn, Seq};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// The writer's last confirmed message position, persisted with the
/// checkpoint so restart can drop re-rendered messages at or below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterMark {
    pub sequence: Seq,
    pub offset: u64,
    pub row: u32,
}

/// The persisted replication position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub resetlogs: Resetlogs,
    pub sequence: Seq,
    /// Byte offset into the sequence's log file, block aligned.
    pub offset: u64,
    /// Writer watermark at the time this checkpoint was taken.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confirmed: Option<WriterMark>,
    /// First SCN covered by the current log.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_scn: Option<Scn>,
    /// Next SCN expected after the current log.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_scn: Option<Scn>,
    /// Reference to the schema snapshot in effect at this position.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub schema: Option<String>,
    /// Keys written by other versions, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn initial(resetlogs: Resetlogs, sequence: Seq) -> Self {
        Self {
            resetlogs,
            sequence,
            offset: 0,
            confirmed: None,
            first_scn: None,
            next_scn: None,
            schema: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// On-disk store for one instance's checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted checkpoint; `None` on first start.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| FerroError::CheckpointInconsistent {
                detail: format!("{}: {e}", self.path.display()),
            })?;
        info!(
            resetlogs = checkpoint.resetlogs.0,
            sequence = checkpoint.sequence.get(),
            offset = checkpoint.offset,
            "checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    /// Persist atomically: write a temporary sibling, then rename over.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| FerroError::internal(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(
            sequence = checkpoint.sequence.get(),
            offset = checkpoint.offset,
            path = %self.path.display(),
            "checkpoint persisted"
        );
        Ok(())
    }
}
