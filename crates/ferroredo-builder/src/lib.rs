//! Builds output messages from committed transactions.
//!
//! Sits between the transaction buffer and the writer: renders each change
//! of a committed transaction to a tagged, fingerprinted message, enforces
//! the recovery dedup watermark, and holds transaction chains until the
//! writer confirms their messages.

pub mod builder;
pub mod dictionary;
pub mod message;
pub mod queue;

pub use builder::{Builder, BuilderConfig, OutputFormat};
pub use dictionary::{Dictionary, TableDef};
pub use message::{MessagePosition, OutputMessage};
pub use queue::{MessageQueue, PopOutcome};
