//! Redo record parsing.
//!
//! Consumes the reader's validated byte window, frames redo records
//! (block-boundary aligned, possibly spanning blocks), dispatches the
//! opcode set to typed handlers, and drives the transaction buffer. Column
//! payloads are decoded here too: row images, Oracle NUMBER values, and
//! character data through the configured character set.

pub mod charset;
pub mod number;
pub mod parser;
pub mod record;
pub mod row;

pub use charset::{decoder_from_env, Al32Utf8, CharacterDecoder, MockDecoder, LOCALES_ENV};
pub use parser::{CommitSink, LogParser, ParseOutcome};
pub use record::{FieldCursor, RecordHeader, RECORD_HEADER_LEN};
pub use row::RowImage;
