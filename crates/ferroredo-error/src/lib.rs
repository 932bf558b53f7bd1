//! Error taxonomy for the ferroredo pipeline.
//!
//! A single [`FerroError`] enum covers every failure the pipeline can hit,
//! with structured variants for the cases callers match on. Each variant
//! maps to one of five [`ErrorKind`] classes and a stable numeric operator
//! code; threads log `code` plus the display message at their top frame and
//! then request a hard stop.
//!
//! Code ranges: 1xxxx runtime, 2xxxx configuration, 3xxxx boot, 4xxxx redo
//! log, 5xxxx data dictionary.

use std::path::PathBuf;

use ferroredo_types::{CompatVersion, FileOffset, Resetlogs, Scn, Seq};
use thiserror::Error;

/// Primary error type for ferroredo operations.
#[derive(Error, Debug)]
pub enum FerroError {
    // === Configuration ===
    /// A required config field is absent.
    #[error("missing config field: {field}")]
    MissingConfigField { field: String },

    /// A config field holds a value outside its accepted domain.
    #[error("invalid config value for {field}: {detail}")]
    InvalidConfigValue { field: String, detail: String },

    /// The config document is not valid JSON.
    #[error("config parse error: {detail}")]
    ConfigParse { detail: String },

    /// A config update tried to merge a multi-element source/target array.
    #[error("config update for {field} must contain exactly one element, got {count}")]
    MultiElementMerge { field: &'static str, count: usize },

    /// An instance id was reused or referenced before start.
    #[error("instance {id}: {detail}")]
    Instance { id: String, detail: String },

    // === Boot ===
    /// Replication cannot start because the first sequence is unknown.
    #[error("starting sequence is unknown")]
    UnknownStartSequence,

    /// No schema reference is available for the starting position.
    #[error("schema reference missing for startup")]
    SchemaMissing,

    // === Runtime ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A positional read returned fewer bytes than the block math requires.
    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// A read kept failing after the bounded retry budget.
    #[error("read failed for '{path}' after {attempts} attempts: {detail}")]
    ReadExhausted {
        path: PathBuf,
        attempts: u32,
        detail: String,
    },

    /// The copy side-channel wrote fewer bytes than requested.
    #[error("copy file '{path}': {written} bytes written instead of {expected}")]
    CopyShortWrite {
        path: PathBuf,
        written: usize,
        expected: usize,
    },

    /// The memory pool cannot satisfy an allocation within its ceiling.
    #[error("memory ceiling reached for {owner}: {in_use} of {limit} chunks in use")]
    MemoryCeiling {
        owner: &'static str,
        in_use: usize,
        limit: usize,
    },

    /// Output sink failure.
    #[error("writer error for '{path}': {detail}")]
    Writer { path: PathBuf, detail: String },

    /// The pipeline is shutting down; the operation was abandoned.
    #[error("shutdown in progress")]
    Shutdown,

    // === Data ===
    /// The current resetlogs id is not present in the incarnation table.
    #[error("resetlogs {resetlogs} not found in incarnation list")]
    IncarnationNotFound { resetlogs: Resetlogs },

    /// Persisted checkpoint contradicts the observed redo stream.
    #[error("checkpoint inconsistent: {detail}")]
    CheckpointInconsistent { detail: String },

    /// Object dictionary does not describe a table referenced by the stream.
    #[error("unknown object id {object_id} at scn {scn}")]
    UnknownObject { object_id: u32, scn: Scn },

    // === Redo log ===
    /// File header byte 0 or the size/magic pairing is wrong.
    #[error("file '{path}': invalid block size {size}, header magic {magic:#04x}")]
    BadBlockSize { path: PathBuf, size: u32, magic: u8 },

    /// The endianness sentinel at header bytes 28..32 is unrecognized.
    #[error("file '{path}': invalid endian sentinel {sentinel:02x?}")]
    BadEndianSentinel { path: PathBuf, sentinel: [u8; 4] },

    /// Database compatibility version outside the supported ranges.
    #[error("file '{path}': unsupported database version {version}")]
    UnsupportedVersion { path: PathBuf, version: CompatVersion },

    /// A header field contradicts the value observed earlier in the run.
    #[error("file '{path}': header {what} changed, found {found}, expected {expected}")]
    HeaderMismatch {
        path: PathBuf,
        what: &'static str,
        found: String,
        expected: String,
    },

    /// A record's declared length runs past the validated buffer.
    #[error("record overrun in seq {sequence} at offset {offset}: length {length} exceeds window")]
    RecordOverrun {
        sequence: Seq,
        offset: FileOffset,
        length: u32,
    },

    /// A record field required by its opcode is missing or truncated.
    #[error("malformed {opcode} record in seq {sequence} at offset {offset}: {detail}")]
    MalformedRecord {
        opcode: String,
        sequence: Seq,
        offset: FileOffset,
        detail: String,
    },

    /// Block checksum kept failing past the retry budget.
    #[error("block {block} checksum mismatch: stored {stored:#06x}, calculated {calculated:#06x}")]
    ChecksumMismatch {
        block: u32,
        stored: u16,
        calculated: u16,
    },

    /// A change-vector value failed to decode.
    #[error("value decode failed in seq {sequence} at offset {offset}: {detail}")]
    ValueDecode {
        sequence: Seq,
        offset: FileOffset,
        detail: String,
    },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// The five failure classes of the pipeline, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// User-supplied configuration is wrong. Fatal at startup; reported and
    /// rejected when reached through a live update.
    Configuration,
    /// Startup preconditions unmet. Fatal, or parks the instance in Ready
    /// when boot-failsafe is configured.
    Boot,
    /// Operational failure: I/O, memory, sinks. Transient cases retry.
    Runtime,
    /// Schema or catalog inconsistency. Fatal.
    Data,
    /// Parser/reader-level redo stream failure. Fatal.
    RedoLog,
}

impl FerroError {
    /// Classify this error into its failure class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingConfigField { .. }
            | Self::InvalidConfigValue { .. }
            | Self::ConfigParse { .. }
            | Self::MultiElementMerge { .. }
            | Self::Instance { .. } => ErrorKind::Configuration,
            Self::UnknownStartSequence | Self::SchemaMissing => ErrorKind::Boot,
            Self::Io(_)
            | Self::ShortRead { .. }
            | Self::ReadExhausted { .. }
            | Self::CopyShortWrite { .. }
            | Self::MemoryCeiling { .. }
            | Self::Writer { .. }
            | Self::Shutdown
            | Self::Internal(_) => ErrorKind::Runtime,
            Self::IncarnationNotFound { .. }
            | Self::CheckpointInconsistent { .. }
            | Self::UnknownObject { .. } => ErrorKind::Data,
            Self::BadBlockSize { .. }
            | Self::BadEndianSentinel { .. }
            | Self::UnsupportedVersion { .. }
            | Self::HeaderMismatch { .. }
            | Self::RecordOverrun { .. }
            | Self::MalformedRecord { .. }
            | Self::ChecksumMismatch { .. }
            | Self::ValueDecode { .. } => ErrorKind::RedoLog,
        }
    }

    /// Stable numeric operator code, logged next to the message.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::Io(_) => 10003,
            Self::ShortRead { .. } => 10004,
            Self::ReadExhausted { .. } => 10005,
            Self::CopyShortWrite { .. } => 10007,
            Self::MemoryCeiling { .. } => 10016,
            Self::Writer { .. } => 10030,
            Self::Shutdown => 10090,
            Self::Internal(_) => 10099,
            Self::MissingConfigField { .. } => 20001,
            Self::InvalidConfigValue { .. } => 20002,
            Self::ConfigParse { .. } => 20003,
            Self::MultiElementMerge { .. } => 20004,
            Self::Instance { .. } => 20010,
            Self::UnknownStartSequence => 30028,
            Self::SchemaMissing => 30040,
            Self::BadBlockSize { .. } => 40005,
            Self::BadEndianSentinel { .. } => 40004,
            Self::UnsupportedVersion { .. } => 40006,
            Self::HeaderMismatch { .. } => 40008,
            Self::RecordOverrun { .. } => 40012,
            Self::MalformedRecord { .. } => 40013,
            Self::ChecksumMismatch { .. } => 40014,
            Self::ValueDecode { .. } => 40015,
            Self::IncarnationNotFound { .. } => 50045,
            Self::CheckpointInconsistent { .. } => 50046,
            Self::UnknownObject { .. } => 50047,
        }
    }

    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            Self::ShortRead { .. } => true,
            _ => false,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error for a bad field value.
    pub fn config(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// Create an instance-registry error.
    pub fn instance(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Instance {
            id: id.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias using [`FerroError`].
pub type Result<T> = std::result::Result<T, FerroError>;
