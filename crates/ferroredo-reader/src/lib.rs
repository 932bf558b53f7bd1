//! Redo log reader.
//!
//! Transforms a redo file into a strictly monotonically advancing byte
//! stream in a bounded ring buffer, guaranteeing that every byte handed to
//! the parser has been integrity-checked. The reader and parser form a
//! cyclic pair; the shared state between them is the control block in
//! [`ring`] (watermarks + status behind one mutex and three condvars), and
//! nothing else.

pub mod block;
pub mod checksum;
pub mod header;
pub mod reader;
pub mod ring;

pub use block::{BlockCheck, BlockValidator};
pub use header::{HeaderOutcome, RedoFileHeader, HEADER_PROBE_LEN};
pub use reader::{Reader, ReaderConfig};
pub use ring::{ReaderControl, ReaderStatus, RingBuffer};

use std::fmt;

/// Result codes for redo read operations.
///
/// These are states, not errors: `Empty` and `Overwritten` are normal
/// outcomes for an online log, and `Finished` is the good end of an
/// archived one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoCode {
    Ok,
    /// An online block carries a higher sequence: the log was rotated over.
    Overwritten,
    /// End of file with a valid next-SCN in the header.
    Finished,
    /// End of file without a next-SCN (truncated log).
    Stopped,
    Shutdown,
    /// The block has not been written yet (online log tail).
    Empty,
    ErrorRead,
    /// Copy side-channel write failed.
    ErrorWrite,
    /// Archived block sequence does not match the file's.
    ErrorSequence,
    ErrorCrc,
    /// Block number does not match its file offset.
    ErrorBlock,
    ErrorBadData,
    Error,
}

impl RedoCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Overwritten => "OVERWRITTEN",
            Self::Finished => "FINISHED",
            Self::Stopped => "STOPPED",
            Self::Shutdown => "SHUTDOWN",
            Self::Empty => "EMPTY",
            Self::ErrorRead => "READ ERROR",
            Self::ErrorWrite => "WRITE ERROR",
            Self::ErrorSequence => "SEQUENCE ERROR",
            Self::ErrorCrc => "CRC ERROR",
            Self::ErrorBlock => "BLOCK ERROR",
            Self::ErrorBadData => "BAD DATA ERROR",
            Self::Error => "OTHER ERROR",
        }
    }

    /// Whether this code aborts the current read.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Self::ErrorRead
                | Self::ErrorWrite
                | Self::ErrorSequence
                | Self::ErrorCrc
                | Self::ErrorBlock
                | Self::ErrorBadData
                | Self::Error
        )
    }
}

impl fmt::Display for RedoCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte order of the multi-byte header fields, detected from the endian
/// sentinel in block 0. Checksum words are always little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[inline]
    #[must_use]
    pub fn read_u16(self, buf: &[u8], off: usize) -> u16 {
        let bytes = buf[off..off + 2].try_into().expect("two bytes");
        match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        }
    }

    #[inline]
    #[must_use]
    pub fn read_u32(self, buf: &[u8], off: usize) -> u32 {
        let bytes = buf[off..off + 4].try_into().expect("four bytes");
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }

    #[inline]
    #[must_use]
    pub fn read_u64(self, buf: &[u8], off: usize) -> u64 {
        let bytes = buf[off..off + 8].try_into().expect("eight bytes");
        match self {
            Self::Little => u64::from_le_bytes(bytes),
            Self::Big => u64::from_be_bytes(bytes),
        }
    }
}

/// Log group: 0 is the archive reader, positive values are online groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogGroup(pub i32);

impl LogGroup {
    pub const ARCHIVE: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn is_archive(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LogGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_messages() {
        assert_eq!(RedoCode::Ok.as_str(), "OK");
        assert_eq!(RedoCode::ErrorCrc.as_str(), "CRC ERROR");
        assert_eq!(RedoCode::Overwritten.to_string(), "OVERWRITTEN");
    }

    #[test]
    fn error_classification() {
        assert!(!RedoCode::Ok.is_error());
        assert!(!RedoCode::Empty.is_error());
        assert!(!RedoCode::Overwritten.is_error());
        assert!(!RedoCode::Finished.is_error());
        assert!(!RedoCode::Shutdown.is_error());
        assert!(RedoCode::ErrorCrc.is_error());
        assert!(RedoCode::ErrorBadData.is_error());
    }

    #[test]
    fn endian_reads() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(Endian::Little.read_u16(&buf, 0), 0x0201);
        assert_eq!(Endian::Big.read_u16(&buf, 0), 0x0102);
        assert_eq!(Endian::Little.read_u32(&buf, 0), 0x0403_0201);
        assert_eq!(Endian::Big.read_u32(&buf, 4), 0x0506_0708);
        assert_eq!(Endian::Little.read_u64(&buf, 0), 0x0807_0605_0403_0201);
    }

    #[test]
    fn group_classification() {
        assert!(LogGroup::ARCHIVE.is_archive());
        assert!(!LogGroup(2).is_archive());
    }
}
