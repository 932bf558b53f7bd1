//! Output sinks.
//!
//! The file writer frames messages, rotates output files, and advances the
//! confirmed watermark the checkpoint depends on. The merge writer fronts
//! the shared sink in multi-instance mode, serializing per-instance
//! streams by SCN.

pub mod file;
pub mod merge;

pub use file::{FileWriter, FileWriterConfig, Newline};
pub use merge::MergeWriter;

use std::sync::Arc;

use ferroredo_builder::{MessageQueue, PopOutcome};
use ferroredo_error::Result;

/// Writer thread body: drain the queue into the sink, reporting the
/// confirmed watermark back after every flush. Idle slices flush the
/// write buffer so the watermark keeps up with a quiet pipeline. Returns
/// once the queue closes (or soft shutdown) and everything buffered is
/// durable.
pub fn run_file_writer(queue: &Arc<MessageQueue>, writer: &mut FileWriter) -> Result<()> {
    loop {
        match queue.pop_wait() {
            PopOutcome::Message(msg) => {
                writer.write_message(&msg)?;
            }
            PopOutcome::Idle => {
                writer.checkpoint_flush()?;
            }
            PopOutcome::Closed => {
                writer.checkpoint_flush()?;
                if let Some(pos) = writer.confirmed() {
                    queue.confirm(pos);
                }
                return Ok(());
            }
        }
        if let Some(pos) = writer.confirmed() {
            queue.confirm(pos);
        }
    }
}
