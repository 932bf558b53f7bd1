//! Core identifier types for the ferroredo replication pipeline.
//!
//! Everything that orders the redo stream lives here: SCNs, log sequences,
//! resetlogs generations, block-aligned file offsets, and transaction ids.
//! The types are thin newtypes so that a sequence can never be passed where
//! an SCN is expected; all of them are `Copy` and cheap to compare.

pub mod change;
pub mod op;
pub mod shutdown;

pub use change::{ColValue, Column, RowChange};
pub use op::{RedoOpCode, RowOp};
pub use shutdown::Shutdown;

use std::fmt;

/// System Change Number: the database's monotonic logical clock.
///
/// Every committed change carries an SCN; SCNs are the ordering key for all
/// output. The raw value `u64::MAX` is reserved by the on-disk format for
/// "no SCN yet" (an online log whose next-SCN is still open) and is rejected
/// by [`Scn::new`]; use `Option<Scn>` to represent absence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct Scn(u64);

impl Scn {
    /// Smallest possible SCN.
    pub const ZERO: Self = Self(0);

    /// Raw sentinel the redo file format uses for an absent SCN.
    pub const RAW_NONE: u64 = u64::MAX;

    /// Create an SCN from a raw value, rejecting the on-disk "none" sentinel.
    #[inline]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw == Self::RAW_NONE {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Decode the on-disk representation: the sentinel maps to `None`.
    #[inline]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        Self::new(raw)
    }

    /// Encode an optional SCN back to the on-disk representation.
    #[inline]
    pub const fn to_raw(scn: Option<Self>) -> u64 {
        match scn {
            Some(s) => s.0,
            None => Self::RAW_NONE,
        }
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Scn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sub-SCN: orders changes that share one SCN within a redo record batch.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct SubScn(pub u16);

impl fmt::Display for SubScn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Redo log sequence number: identifies one log file within an incarnation.
///
/// Sequence 0 never names a real log; the constructors accept it because the
/// orchestrator uses `Seq::ZERO` as "position not yet known" exactly like
/// the on-disk format does.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Seq(pub u32);

impl Seq {
    /// The "unpositioned" sequence.
    pub const ZERO: Self = Self(0);

    /// Next sequence in the same incarnation.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resetlogs generation counter, bumped each time the redo history forks.
///
/// `(resetlogs, sequence)` uniquely names a redo file across incarnations.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Resetlogs(pub u32);

impl fmt::Display for Resetlogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Database activation id from the redo file header.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Activation(pub u32);

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Redo block size in bytes: 512, 1024, or 4096.
///
/// Each size pairs with a magic byte at offset 1 of every block header;
/// [`BlockSize::magic`] returns it. Any other size is not a redo file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct BlockSize(u32);

impl BlockSize {
    pub const B512: Self = Self(512);
    pub const B1024: Self = Self(1024);
    pub const B4096: Self = Self(4096);

    /// Bytes of every block taken by the 16-byte block header.
    pub const HEADER_LEN: usize = 16;

    /// Validate a raw block size read from a file header.
    #[inline]
    pub const fn new(size: u32) -> Option<Self> {
        match size {
            512 | 1024 | 4096 => Some(Self(size)),
            _ => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The magic byte expected at offset 1 of every block with this size.
    #[inline]
    #[must_use]
    pub const fn magic(self) -> u8 {
        match self.0 {
            4096 => 0x82,
            _ => 0x22,
        }
    }

    /// Usable payload bytes per block (block size minus the block header).
    #[inline]
    #[must_use]
    pub const fn payload_len(self) -> usize {
        self.0 as usize - Self::HEADER_LEN
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte offset into a redo file. Always block-aligned once a block size is
/// known; the pair `(sequence, offset)` is the durable replication position.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct FileOffset(pub u64);

impl FileOffset {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Block number this offset falls in.
    #[inline]
    #[must_use]
    pub const fn block_number(self, block_size: BlockSize) -> u32 {
        (self.0 / block_size.get() as u64) as u32
    }

    /// Whether the offset sits exactly on a block boundary.
    #[inline]
    #[must_use]
    pub const fn is_block_aligned(self, block_size: BlockSize) -> bool {
        self.0 % block_size.get() as u64 == 0
    }

    /// Offset of the given block number.
    #[inline]
    #[must_use]
    pub const fn of_block(block: u32, block_size: BlockSize) -> Self {
        Self(block as u64 * block_size.get() as u64)
    }

    #[inline]
    #[must_use]
    pub const fn add(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for FileOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction id: the (undo segment, slot, wrap) triple.
///
/// Displayed in the conventional `usn.slot.wrap` hex form. The derived
/// lexicographic order (usn, then slot, then wrap) is the deterministic
/// tie-break used when two transactions commit at the same (scn, subscn).
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Xid {
    pub usn: u16,
    pub slot: u16,
    pub wrap: u32,
}

impl Xid {
    #[inline]
    pub const fn new(usn: u16, slot: u16, wrap: u32) -> Self {
        Self { usn, slot, wrap }
    }

    /// Pack into the 8-byte wire form used inside redo records.
    #[inline]
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        (self.usn as u64) << 48 | (self.slot as u64) << 32 | self.wrap as u64
    }

    /// Unpack from the 8-byte wire form.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            usn: (raw >> 48) as u16,
            slot: (raw >> 32) as u16,
            wrap: raw as u32,
        }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}.{:03x}.{:08x}", self.usn, self.slot, self.wrap)
    }
}

/// A durable position in the redo stream: which file and how far into it.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct RecordPosition {
    pub sequence: Seq,
    pub offset: FileOffset,
}

impl RecordPosition {
    #[inline]
    pub const fn new(sequence: Seq, offset: FileOffset) -> Self {
        Self { sequence, offset }
    }
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sequence, self.offset)
    }
}

/// Database compatibility version from block 1 of the file header.
///
/// Encoded `0xVV_RR_PP_00`-style by the database; [`CompatVersion::is_supported`]
/// enforces the accepted ranges. Version 0 means the header is still empty.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct CompatVersion(pub u32);

impl CompatVersion {
    /// First version that switched to the wide (major.release.patch) layout.
    pub const V18_0: Self = Self(0x1200_0000);

    /// First version that raised the column limit.
    pub const V23_0: Self = Self(0x1700_0000);

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this version falls inside one of the supported ranges.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        let v = self.0;
        (v >= 0x0B20_0000 && v <= 0x0B20_0400)      // 11.2.0.0 - 11.2.0.4
            || (v >= 0x0C10_0000 && v <= 0x0C10_0200) // 12.1.0.0 - 12.1.0.2
            || (v >= 0x0C20_0000 && v <= 0x0C20_0100) // 12.2.0.0 - 12.2.0.1
            || (v >= 0x1200_0000 && v <= 0x120E_0000) // 18.0 - 18.14
            || (v >= 0x1300_0000 && v <= 0x1312_0000) // 19.0 - 19.18
            || (v >= 0x1500_0000 && v <= 0x1508_0000) // 21.0 - 21.8
            || (v >= 0x1700_0000 && v <= 0x1703_0000) // 23.0 - 23.3
    }
}

impl fmt::Display for CompatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if *self < Self::V18_0 {
            write!(
                f,
                "{}.{}.{}.{}",
                v >> 24,
                (v >> 20) & 0xF,
                (v >> 16) & 0xF,
                (v >> 8) & 0xFF
            )
        } else {
            write!(f, "{}.{}.{}", v >> 24, (v >> 16) & 0xFF, (v >> 8) & 0xFF)
        }
    }
}

/// Which subsystem owns a pooled memory chunk. Quotas are enforced per owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOwner {
    /// Reader ring buffers.
    Reader,
    /// Transaction change chains.
    Transactions,
    /// Builder output staging.
    Builder,
}

impl MemoryOwner {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Transactions => "transactions",
            Self::Builder => "builder",
        }
    }
}

impl fmt::Display for MemoryOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scn_rejects_none_sentinel() {
        assert_eq!(Scn::new(u64::MAX), None);
        assert_eq!(Scn::new(0), Some(Scn::ZERO));
        assert_eq!(Scn::to_raw(None), u64::MAX);
        assert_eq!(Scn::to_raw(Scn::new(42)), 42);
    }

    #[test]
    fn scn_orders_numerically() {
        let a = Scn::new(100).unwrap();
        let b = Scn::new(101).unwrap();
        assert!(a < b);
    }

    #[test]
    fn block_size_magic_pairs() {
        assert_eq!(BlockSize::new(512), Some(BlockSize::B512));
        assert_eq!(BlockSize::new(1024), Some(BlockSize::B1024));
        assert_eq!(BlockSize::new(4096), Some(BlockSize::B4096));
        assert_eq!(BlockSize::new(2048), None);
        assert_eq!(BlockSize::new(0), None);

        assert_eq!(BlockSize::B512.magic(), 0x22);
        assert_eq!(BlockSize::B1024.magic(), 0x22);
        assert_eq!(BlockSize::B4096.magic(), 0x82);
    }

    #[test]
    fn block_size_payload_len() {
        assert_eq!(BlockSize::B512.payload_len(), 496);
        assert_eq!(BlockSize::B4096.payload_len(), 4080);
    }

    #[test]
    fn file_offset_block_math() {
        let bs = BlockSize::B512;
        assert_eq!(FileOffset(1024).block_number(bs), 2);
        assert!(FileOffset(1024).is_block_aligned(bs));
        assert!(!FileOffset(1025).is_block_aligned(bs));
        assert_eq!(FileOffset::of_block(3, bs), FileOffset(1536));
    }

    #[test]
    fn xid_raw_round_trip() {
        let xid = Xid::new(7, 42, 0xDEAD_BEEF);
        assert_eq!(Xid::from_raw(xid.to_raw()), xid);
        assert_eq!(xid.to_string(), "0x0007.02a.deadbeef");
    }

    #[test]
    fn xid_tie_break_order() {
        let a = Xid::new(1, 0, 0);
        let b = Xid::new(1, 1, 0);
        let c = Xid::new(2, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn record_position_orders_by_sequence_then_offset() {
        let a = RecordPosition::new(Seq(5), FileOffset(4096));
        let b = RecordPosition::new(Seq(5), FileOffset(8192));
        let c = RecordPosition::new(Seq(6), FileOffset(0));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn compat_version_gate() {
        assert!(CompatVersion(0x0B20_0400).is_supported()); // 11.2.0.4
        assert!(CompatVersion(0x1312_0000).is_supported()); // 19.18
        assert!(CompatVersion(0x1703_0000).is_supported()); // 23.3
        assert!(!CompatVersion(0x1704_0000).is_supported()); // 23.4
        assert!(!CompatVersion(0x0B20_0500).is_supported());
        assert!(!CompatVersion(0).is_supported());
    }

    #[test]
    fn compat_version_display() {
        assert_eq!(CompatVersion(0x0B20_0400).to_string(), "11.2.0.4");
        assert_eq!(CompatVersion(0x1312_0000).to_string(), "19.18.0");
    }

    #[test]
    fn seq_next() {
        assert_eq!(Seq(9).next(), Seq(10));
    }
}
