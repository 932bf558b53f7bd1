//! Redo file header: blocks 0 and 1.
//!
//! Block 0 identifies the file (type magic, block size, endianness); block 1
//! carries the redo metadata (version, SCN window, resetlogs, sequence).
//! Layout:
//! ```text
//! Block 0:  [0]=0  [1]=magic  [20..24]=block size  [28..32]=endian sentinel
//! Block 1:  own 16-byte block header, then at fixed offsets:
//!   20  u32  database compatibility version
//!   24  u32  database id
//!   28  8b   database SID (space padded)
//!   52  u32  activation id
//!  156  u32  total block count (0 = still open)
//!  160  u32  resetlogs id
//!  180  u64  first SCN
//!  188  u32  first time
//!  192  u64  next SCN (u64::MAX = still open)
//!  200  u32  next time
//! ```

use std::path::Path;

use ferroredo_error::{FerroError, Result};
use ferroredo_types::{Activation, BlockSize, CompatVersion, Resetlogs, Scn, Seq};
use tracing::debug;

use crate::checksum::seal;
use crate::Endian;

/// Bytes of the initial header probe: two blocks at the largest size, read
/// before the actual block size is known.
pub const HEADER_PROBE_LEN: usize = 4096 * 2;

const ENDIAN_LITTLE: [u8; 4] = [0x7D, 0x7C, 0x7B, 0x7A];
const ENDIAN_BIG: [u8; 4] = [0x7A, 0x7B, 0x7C, 0x7D];

/// Parsed redo file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoFileHeader {
    pub endian: Endian,
    pub block_size: BlockSize,
    pub sequence: Seq,
    pub version: CompatVersion,
    pub database_id: u32,
    pub sid: String,
    pub activation: Activation,
    /// Total blocks in the file; 0 while the log is still being written.
    pub block_count: u32,
    pub resetlogs: Resetlogs,
    pub first_scn: Scn,
    pub first_time: u32,
    /// `None` while the log is still open.
    pub next_scn: Option<Scn>,
    pub next_time: u32,
}

/// What a header probe found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOutcome {
    /// Block 1 not written yet (compat version zero).
    Empty {
        endian: Endian,
        block_size: BlockSize,
    },
    Ready(RedoFileHeader),
}

/// Parse block 0 alone: endianness and block size.
pub fn parse_block_zero(buf: &[u8], path: &Path) -> Result<(Endian, BlockSize)> {
    if buf.len() < 32 {
        return Err(FerroError::ShortRead {
            offset: 0,
            expected: 32,
            actual: buf.len(),
        });
    }
    if buf[0] != 0 {
        return Err(FerroError::BadBlockSize {
            path: path.to_path_buf(),
            size: 0,
            magic: buf[0],
        });
    }

    let sentinel: [u8; 4] = buf[28..32].try_into().expect("sentinel bytes");
    let endian = if sentinel == ENDIAN_LITTLE {
        Endian::Little
    } else if sentinel == ENDIAN_BIG {
        Endian::Big
    } else {
        return Err(FerroError::BadEndianSentinel {
            path: path.to_path_buf(),
            sentinel,
        });
    };

    let raw_size = endian.read_u32(buf, 20);
    let block_size = BlockSize::new(raw_size).ok_or(FerroError::BadBlockSize {
        path: path.to_path_buf(),
        size: raw_size,
        magic: buf[1],
    })?;
    if buf[1] != block_size.magic() {
        return Err(FerroError::BadBlockSize {
            path: path.to_path_buf(),
            size: raw_size,
            magic: buf[1],
        });
    }

    Ok((endian, block_size))
}

/// Parse the two-block header probe.
///
/// `buf` must hold at least two blocks of the file's block size. The block 1
/// checksum is *not* verified here: the caller retries CRC separately
/// because an online log's header block can be mid-write.
pub fn parse_file_header(buf: &[u8], path: &Path) -> Result<HeaderOutcome> {
    let (endian, block_size) = parse_block_zero(buf, path)?;
    let bs = block_size.as_usize();
    if buf.len() < bs * 2 {
        return Err(FerroError::ShortRead {
            offset: 0,
            expected: bs * 2,
            actual: buf.len(),
        });
    }
    let b1 = &buf[bs..bs * 2];

    let version = CompatVersion(endian.read_u32(b1, 20));
    if version.get() == 0 {
        return Ok(HeaderOutcome::Empty { endian, block_size });
    }
    if !version.is_supported() {
        return Err(FerroError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        });
    }

    let sequence = Seq(endian.read_u32(b1, 8));
    let database_id = endian.read_u32(b1, 24);
    let sid = String::from_utf8_lossy(&b1[28..36])
        .trim_end_matches([' ', '\0'])
        .to_string();
    let activation = Activation(endian.read_u32(b1, 52));
    let block_count = endian.read_u32(b1, 156);
    let resetlogs = Resetlogs(endian.read_u32(b1, 160));
    let first_scn = Scn::new(endian.read_u64(b1, 180)).ok_or_else(|| {
        FerroError::HeaderMismatch {
            path: path.to_path_buf(),
            what: "first scn",
            found: "<none>".into(),
            expected: "a concrete scn".into(),
        }
    })?;
    let first_time = endian.read_u32(b1, 188);
    let next_scn = Scn::from_raw(endian.read_u64(b1, 192));
    let next_time = endian.read_u32(b1, 200);

    let header = RedoFileHeader {
        endian,
        block_size,
        sequence,
        version,
        database_id,
        sid,
        activation,
        block_count,
        resetlogs,
        first_scn,
        first_time,
        next_scn,
        next_time,
    };
    debug!(
        path = %path.display(),
        version = %header.version,
        sequence = header.sequence.get(),
        resetlogs = header.resetlogs.0,
        block_size = block_size.get(),
        first_scn = header.first_scn.get(),
        "redo file header"
    );
    Ok(HeaderOutcome::Ready(header))
}

impl RedoFileHeader {
    /// Encode blocks 0 and 1 with sealed checksums (little-endian only;
    /// fixture and copy-path use).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let bs = self.block_size.as_usize();
        let mut buf = vec![0u8; bs * 2];

        // Block 0.
        buf[1] = self.block_size.magic();
        buf[20..24].copy_from_slice(&self.block_size.get().to_le_bytes());
        buf[28..32].copy_from_slice(&ENDIAN_LITTLE);
        seal(&mut buf[..bs]);

        // Block 1: its own block header first.
        let b1 = &mut buf[bs..];
        b1[1] = self.block_size.magic();
        b1[4..8].copy_from_slice(&1u32.to_le_bytes());
        b1[8..12].copy_from_slice(&self.sequence.get().to_le_bytes());
        b1[20..24].copy_from_slice(&self.version.get().to_le_bytes());
        b1[24..28].copy_from_slice(&self.database_id.to_le_bytes());
        let mut sid = [b' '; 8];
        let sid_bytes = self.sid.as_bytes();
        sid[..sid_bytes.len().min(8)].copy_from_slice(&sid_bytes[..sid_bytes.len().min(8)]);
        b1[28..36].copy_from_slice(&sid);
        b1[52..56].copy_from_slice(&self.activation.0.to_le_bytes());
        b1[156..160].copy_from_slice(&self.block_count.to_le_bytes());
        b1[160..164].copy_from_slice(&self.resetlogs.0.to_le_bytes());
        b1[180..188].copy_from_slice(&self.first_scn.get().to_le_bytes());
        b1[188..192].copy_from_slice(&self.first_time.to_le_bytes());
        b1[192..200].copy_from_slice(&Scn::to_raw(self.next_scn).to_le_bytes());
        b1[200..204].copy_from_slice(&self.next_time.to_le_bytes());
        seal(&mut buf[bs..bs * 2]);

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(block_size: BlockSize) -> RedoFileHeader {
        RedoFileHeader {
            endian: Endian::Little,
            block_size,
            sequence: Seq(42),
            version: CompatVersion(0x1312_0000),
            database_id: 0xBEEF,
            sid: "ORCL".into(),
            activation: Activation(77),
            block_count: 100,
            resetlogs: Resetlogs(3),
            first_scn: Scn::new(1000).unwrap(),
            first_time: 500,
            next_scn: Scn::new(2000),
            next_time: 600,
        }
    }

    #[test]
    fn encode_parse_round_trip() {
        for block_size in [BlockSize::B512, BlockSize::B1024, BlockSize::B4096] {
            let header = sample(block_size);
            let buf = header.encode();
            match parse_file_header(&buf, Path::new("/r/a.arc")).unwrap() {
                HeaderOutcome::Ready(parsed) => assert_eq!(parsed, header),
                HeaderOutcome::Empty { .. } => panic!("unexpected empty header"),
            }
        }
    }

    #[test]
    fn open_log_round_trips_none_next_scn() {
        let header = RedoFileHeader {
            next_scn: None,
            block_count: 0,
            ..sample(BlockSize::B512)
        };
        let buf = header.encode();
        let HeaderOutcome::Ready(parsed) = parse_file_header(&buf, Path::new("/r/o")).unwrap()
        else {
            panic!("expected ready header");
        };
        assert_eq!(parsed.next_scn, None);
        assert_eq!(parsed.block_count, 0);
    }

    #[test]
    fn nonzero_byte_zero_is_rejected() {
        let mut buf = sample(BlockSize::B512).encode();
        buf[0] = 1;
        assert!(matches!(
            parse_file_header(&buf, Path::new("/r/a")),
            Err(FerroError::BadBlockSize { .. })
        ));
    }

    #[test]
    fn bad_endian_sentinel_is_rejected() {
        let mut buf = sample(BlockSize::B512).encode();
        buf[28..32].copy_from_slice(&[1, 2, 3, 4]);
        assert!(matches!(
            parse_file_header(&buf, Path::new("/r/a")),
            Err(FerroError::BadEndianSentinel { .. })
        ));
    }

    #[test]
    fn big_endian_sentinel_is_recognized() {
        let mut buf = sample(BlockSize::B512).encode();
        buf[28..32].copy_from_slice(&ENDIAN_BIG);
        // The size field must flip too for a consistent BE header.
        buf[20..24].copy_from_slice(&512u32.to_be_bytes());
        let (endian, block_size) = parse_block_zero(&buf, Path::new("/r/a")).unwrap();
        assert_eq!(endian, Endian::Big);
        assert_eq!(block_size, BlockSize::B512);
    }

    #[test]
    fn size_magic_pair_mismatch_is_rejected() {
        let mut buf = sample(BlockSize::B512).encode();
        buf[1] = 0x82; // 4096 magic on a 512-byte file
        assert!(matches!(
            parse_file_header(&buf, Path::new("/r/a")),
            Err(FerroError::BadBlockSize { size: 512, magic: 0x82, .. })
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let header = RedoFileHeader {
            version: CompatVersion(0x0A00_0000),
            ..sample(BlockSize::B512)
        };
        let buf = header.encode();
        assert!(matches!(
            parse_file_header(&buf, Path::new("/r/a")),
            Err(FerroError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn zero_version_means_empty() {
        let header = RedoFileHeader {
            version: CompatVersion(0),
            ..sample(BlockSize::B1024)
        };
        let buf = header.encode();
        assert!(matches!(
            parse_file_header(&buf, Path::new("/r/a")).unwrap(),
            HeaderOutcome::Empty {
                block_size: BlockSize::B1024,
                ..
            }
        ));
    }
}
