//! Per-block header validation.

use ferroredo_types::{BlockSize, Seq};
use tracing::warn;

use crate::checksum;
use crate::{Endian, LogGroup, RedoCode};

/// Parsed 16-byte block header.
///
/// Layout:
/// ```text
/// Offset  Size  Field
///   0       1   zero byte (0 for a written block)
///   1       1   block magic: 0x22 (512/1024) or 0x82 (4096)
///   4       4   block number within the file
///   8       4   sequence
///  14       2   XOR-fold checksum (always little-endian)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: u8,
    pub block_number: u32,
    pub sequence: Seq,
    pub checksum: u16,
}

impl BlockHeader {
    /// Parse without validation. `buf` must hold at least 16 bytes.
    #[must_use]
    pub fn parse(buf: &[u8], endian: Endian) -> Self {
        Self {
            magic: buf[1],
            block_number: endian.read_u32(buf, 4),
            sequence: Seq(endian.read_u32(buf, 8)),
            checksum: checksum::stored_checksum(buf),
        }
    }
}

/// Outcome of validating one block against its expected position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheck {
    Ok,
    /// First two bytes zero, or (online) a smaller header sequence.
    Empty,
    /// Online block with a larger header sequence: rotated over.
    Overwritten,
    BadMagic { found: u8 },
    BadBlockNumber { found: u32 },
    BadSequence { found: Seq },
    BadChecksum { stored: u16, calculated: u16 },
}

impl BlockCheck {
    /// Map to the reader's result code.
    #[must_use]
    pub const fn code(self) -> RedoCode {
        match self {
            Self::Ok => RedoCode::Ok,
            Self::Empty => RedoCode::Empty,
            Self::Overwritten => RedoCode::Overwritten,
            Self::BadMagic { .. } => RedoCode::ErrorBadData,
            Self::BadBlockNumber { .. } => RedoCode::ErrorBlock,
            Self::BadSequence { .. } => RedoCode::ErrorSequence,
            Self::BadChecksum { .. } => RedoCode::ErrorCrc,
        }
    }
}

/// Stateless validation context for the blocks of one redo file.
#[derive(Debug, Clone, Copy)]
pub struct BlockValidator {
    pub block_size: BlockSize,
    pub endian: Endian,
    pub group: LogGroup,
    /// Block checksum verification; disabled via `disable-checks`.
    pub verify_checksums: bool,
}

impl BlockValidator {
    /// Validate one block.
    ///
    /// `expected_seq` is the sequence the file was opened at. For the
    /// archive group any mismatch is an error; for online groups a smaller
    /// header sequence means the block is still empty and a larger one
    /// means the log was rotated over this block.
    #[must_use]
    pub fn check(&self, block: &[u8], expected_block: u32, expected_seq: Seq) -> BlockCheck {
        if block[0] == 0 && block[1] == 0 {
            return BlockCheck::Empty;
        }

        if block[1] != self.block_size.magic() {
            return BlockCheck::BadMagic { found: block[1] };
        }

        let header = BlockHeader::parse(block, self.endian);

        if header.sequence != expected_seq {
            if self.group.is_archive() {
                return BlockCheck::BadSequence {
                    found: header.sequence,
                };
            }
            if expected_seq > header.sequence {
                return BlockCheck::Empty;
            }
            return BlockCheck::Overwritten;
        }

        if header.block_number != expected_block {
            return BlockCheck::BadBlockNumber {
                found: header.block_number,
            };
        }

        if self.verify_checksums && !checksum::block_intact(block) {
            let calculated = checksum::expected_checksum(block);
            return BlockCheck::BadChecksum {
                stored: header.checksum,
                calculated,
            };
        }

        BlockCheck::Ok
    }

    /// Log the validation failure the way the operator sees it.
    pub fn report(&self, file: &str, block_number: u32, check: BlockCheck) {
        match check {
            BlockCheck::BadMagic { found } => warn!(
                code = 40001u32,
                file,
                block = block_number,
                found = format_args!("{found:#04x}"),
                expected = format_args!("{:#04x}", self.block_size.magic()),
                "invalid block magic"
            ),
            BlockCheck::BadBlockNumber { found } => warn!(
                code = 40002u32,
                file, block = block_number, found, "invalid header block number"
            ),
            BlockCheck::BadSequence { found } => warn!(
                code = 60024u32,
                file,
                block = block_number,
                found = found.get(),
                "invalid header sequence"
            ),
            BlockCheck::BadChecksum { stored, calculated } => warn!(
                code = 60025u32,
                file,
                block = block_number,
                stored = format_args!("{stored:#06x}"),
                calculated = format_args!("{calculated:#06x}"),
                "invalid block checksum"
            ),
            BlockCheck::Ok | BlockCheck::Empty | BlockCheck::Overwritten => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::seal;

    fn make_block(block_size: BlockSize, block_number: u32, sequence: u32) -> Vec<u8> {
        let mut block = vec![0u8; block_size.as_usize()];
        block[1] = block_size.magic();
        block[4..8].copy_from_slice(&block_number.to_le_bytes());
        block[8..12].copy_from_slice(&sequence.to_le_bytes());
        seal(&mut block);
        block
    }

    fn validator(group: LogGroup) -> BlockValidator {
        BlockValidator {
            block_size: BlockSize::B512,
            endian: Endian::Little,
            group,
            verify_checksums: true,
        }
    }

    #[test]
    fn good_block_passes() {
        let block = make_block(BlockSize::B512, 7, 42);
        let v = validator(LogGroup::ARCHIVE);
        assert_eq!(v.check(&block, 7, Seq(42)), BlockCheck::Ok);
    }

    #[test]
    fn zeroed_block_is_empty() {
        let block = vec![0u8; 512];
        let v = validator(LogGroup::ARCHIVE);
        assert_eq!(v.check(&block, 0, Seq(42)), BlockCheck::Empty);
    }

    #[test]
    fn wrong_magic_is_bad_data() {
        let mut block = make_block(BlockSize::B512, 7, 42);
        block[1] = 0x82;
        let v = validator(LogGroup::ARCHIVE);
        assert!(matches!(
            v.check(&block, 7, Seq(42)),
            BlockCheck::BadMagic { found: 0x82 }
        ));
    }

    #[test]
    fn archive_sequence_mismatch_is_error() {
        let block = make_block(BlockSize::B512, 7, 41);
        let v = validator(LogGroup::ARCHIVE);
        let check = v.check(&block, 7, Seq(42));
        assert!(matches!(check, BlockCheck::BadSequence { found: Seq(41) }));
        assert_eq!(check.code(), RedoCode::ErrorSequence);
    }

    #[test]
    fn online_smaller_sequence_is_empty() {
        let block = make_block(BlockSize::B512, 7, 41);
        let v = validator(LogGroup(2));
        assert_eq!(v.check(&block, 7, Seq(42)), BlockCheck::Empty);
    }

    #[test]
    fn online_larger_sequence_is_overwritten() {
        let block = make_block(BlockSize::B512, 7, 43);
        let v = validator(LogGroup(2));
        let check = v.check(&block, 7, Seq(42));
        assert_eq!(check, BlockCheck::Overwritten);
        assert_eq!(check.code(), RedoCode::Overwritten);
    }

    #[test]
    fn block_number_mismatch() {
        let block = make_block(BlockSize::B512, 8, 42);
        let v = validator(LogGroup::ARCHIVE);
        assert!(matches!(
            v.check(&block, 7, Seq(42)),
            BlockCheck::BadBlockNumber { found: 8 }
        ));
    }

    #[test]
    fn corrupt_block_fails_crc_only_when_enabled() {
        let mut block = make_block(BlockSize::B512, 7, 42);
        block[200] ^= 0xFF;
        let mut v = validator(LogGroup::ARCHIVE);
        assert!(matches!(
            v.check(&block, 7, Seq(42)),
            BlockCheck::BadChecksum { .. }
        ));

        v.verify_checksums = false;
        assert_eq!(v.check(&block, 7, Seq(42)), BlockCheck::Ok);
    }

    #[test]
    fn parse_reads_header_fields() {
        let block = make_block(BlockSize::B1024, 19, 77);
        let header = BlockHeader::parse(&block, Endian::Little);
        assert_eq!(header.magic, 0x22);
        assert_eq!(header.block_number, 19);
        assert_eq!(header.sequence, Seq(77));
    }
}
