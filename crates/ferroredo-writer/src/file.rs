//! Rotating file sink.
//!
//! The output path carries a `%i` placeholder substituted with an
//! auto-incrementing index; a new file opens when the current one would
//! exceed the size limit or when the message's sequence crosses the
//! rotation policy. Messages are framed with 0, 1, or 2 newline bytes and
//! go through a write buffer flushed at the configured threshold or on
//! checkpoint.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use ferroredo_builder::{MessagePosition, OutputMessage};
use ferroredo_error::{FerroError, Result};
use ferroredo_types::Seq;
use tracing::{debug, info};

/// Message framing: bytes appended after each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Newline {
    None,
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl Newline {
    /// Decode the 0/1/2 config value.
    pub fn from_config(value: u64) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Lf),
            2 => Ok(Self::CrLf),
            other => Err(FerroError::config(
                "writer.new-line",
                format!("{other} is not 0, 1, or 2"),
            )),
        }
    }

    const fn bytes(self) -> &'static [u8] {
        match self {
            Self::None => b"",
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// File sink configuration.
#[derive(Debug, Clone)]
pub struct FileWriterConfig {
    /// Output path; `%i` is replaced by the rotation index.
    pub output: PathBuf,
    /// Rotate before the file would exceed this many bytes. 0 disables.
    pub max_file_size: u64,
    pub newline: Newline,
    /// Also rotate when a message's sequence differs from the file's.
    pub rotate_on_sequence: bool,
    /// Flush the write buffer once it holds this many bytes.
    pub flush_threshold: usize,
}

impl Default for FileWriterConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("output_%i.json"),
            max_file_size: 0,
            newline: Newline::Lf,
            rotate_on_sequence: false,
            flush_threshold: 64 * 1024,
        }
    }
}

/// The rotating file writer.
///
/// Single-threaded: one writer owns its sink. The confirmed watermark is
/// reported back through the message queue by the caller after
/// [`FileWriter::write_message`] returns.
pub struct FileWriter {
    config: FileWriterConfig,
    pattern: Pattern,
    index: u64,
    file: Option<File>,
    file_path: PathBuf,
    file_size: u64,
    file_sequence: Option<Seq>,
    buffer: Vec<u8>,
    /// Last position written (not necessarily flushed).
    written: Option<MessagePosition>,
    /// Last position flushed to the OS.
    confirmed: Option<MessagePosition>,
}

#[derive(Debug)]
enum Pattern {
    /// Path contains `%i`: prefix + index + suffix.
    Indexed { prefix: String, suffix: String },
    /// Fixed single file.
    Fixed,
}

impl FileWriter {
    pub fn new(config: FileWriterConfig) -> Result<Self> {
        let text = config.output.to_string_lossy().into_owned();
        let pattern = match text.find("%i") {
            Some(at) => Pattern::Indexed {
                prefix: text[..at].to_string(),
                suffix: text[at + 2..].to_string(),
            },
            None => {
                if config.max_file_size > 0 || config.rotate_on_sequence {
                    return Err(FerroError::config(
                        "writer.output",
                        "rotation requires a %i placeholder in the output path",
                    ));
                }
                Pattern::Fixed
            }
        };
        let index = match &pattern {
            Pattern::Indexed { prefix, suffix } => next_unused_index(prefix, suffix)?,
            Pattern::Fixed => 0,
        };
        Ok(Self {
            config,
            pattern,
            index,
            file: None,
            file_path: PathBuf::new(),
            file_size: 0,
            file_sequence: None,
            buffer: Vec::new(),
            written: None,
            confirmed: None,
        })
    }

    fn current_path(&self) -> PathBuf {
        match &self.pattern {
            Pattern::Indexed { prefix, suffix } => {
                PathBuf::from(format!("{prefix}{}{suffix}", self.index))
            }
            Pattern::Fixed => self.config.output.clone(),
        }
    }

    fn open_current(&mut self) -> Result<()> {
        let path = self.current_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| FerroError::Writer {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        self.file_size = file
            .metadata()
            .map_err(|e| FerroError::Writer {
                path: path.clone(),
                detail: e.to_string(),
            })?
            .len();
        info!(path = %path.display(), size = self.file_size, "output file opened");
        self.file = Some(file);
        self.file_path = path;
        Ok(())
    }

    /// Rotate if the next message would cross a policy boundary.
    fn check_rotate(&mut self, sequence: Seq, message_len: u64) -> Result<()> {
        if self.file.is_none() {
            self.open_current()?;
            self.file_sequence = Some(sequence);
            return Ok(());
        }
        let mut rotate = false;
        if self.config.max_file_size > 0
            && self.file_size + message_len > self.config.max_file_size
            && self.file_size > 0
        {
            rotate = true;
        }
        if self.config.rotate_on_sequence && self.file_sequence != Some(sequence) {
            rotate = true;
        }
        if rotate {
            if !matches!(self.pattern, Pattern::Indexed { .. }) {
                return Err(FerroError::Writer {
                    path: self.file_path.clone(),
                    detail: "rotation required but output path has no %i".into(),
                });
            }
            self.flush()?;
            debug!(index = self.index, "rotating output file");
            self.index += 1;
            self.open_current()?;
        }
        self.file_sequence = Some(sequence);
        Ok(())
    }

    /// Append one message (plus framing) through the buffer.
    pub fn write_message(&mut self, msg: &OutputMessage) -> Result<()> {
        let framing = self.config.newline.bytes();
        let total = msg.bytes.len() as u64 + framing.len() as u64;
        self.check_rotate(msg.position.sequence, total)?;

        self.buffer.extend_from_slice(&msg.bytes);
        self.buffer.extend_from_slice(framing);
        self.file_size += total;
        self.written = Some(msg.position);

        if self.buffer.len() >= self.config.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Drain the write buffer to the file; advances the confirmed
    /// watermark.
    pub fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let file = self.file.as_mut().ok_or_else(|| {
                FerroError::internal("flush with no output file open")
            })?;
            file.write_all(&self.buffer).map_err(|e| FerroError::Writer {
                path: self.file_path.clone(),
                detail: e.to_string(),
            })?;
            self.buffer.clear();
        }
        self.confirmed = self.written;
        Ok(())
    }

    /// Flush and sync before a checkpoint is persisted.
    pub fn checkpoint_flush(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(file) = self.file.as_mut() {
            file.sync_data().map_err(|e| FerroError::Writer {
                path: self.file_path.clone(),
                detail: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Last position flushed to the sink.
    pub fn confirmed(&self) -> Option<MessagePosition> {
        self.confirmed
    }

    pub fn current_index(&self) -> u64 {
        self.index
    }
}

/// First index `i` such that `prefix i suffix` does not exist yet.
fn next_unused_index(prefix: &str, suffix: &str) -> Result<u64> {
    let dir = Path::new(prefix).parent().map(Path::to_path_buf);
    let dir = match dir {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => PathBuf::from("."),
    };
    let mut max_seen: Option<u64> = None;
    if let Ok(entries) = std::fs::read_dir(&dir) {
        let full_prefix = prefix.to_string();
        for entry in entries.flatten() {
            let path = entry.path();
            let text = path.to_string_lossy().into_owned();
            // Compare against "./"-relative forms too.
            let candidates = [text.clone(), text.trim_start_matches("./").to_string()];
            for cand in candidates {
                if let Some(rest) = cand.strip_prefix(&full_prefix) {
                    if let Some(mid) = rest.strip_suffix(suffix) {
                        if !mid.is_empty() && mid.bytes().all(|b| b.is_ascii_digit()) {
                            if let Ok(n) = mid.parse::<u64>() {
                                max_seen = Some(max_seen.map_or(n, |m: u64| m.max(n)));
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(max_seen.map_or(0, |m| m + 1))
}
