//! Output messages and their stream positions.

use std::fmt;

use ferroredo_types::{RowOp, Scn, Seq, SubScn};

/// Total order over output messages: where in the redo stream the source
/// record sits, plus the row's index within that record (multi-row
/// operations emit several messages from one offset).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct MessagePosition {
    pub sequence: Seq,
    pub offset: u64,
    pub row: u32,
}

impl MessagePosition {
    pub const fn new(sequence: Seq, offset: u64, row: u32) -> Self {
        Self {
            sequence,
            offset,
            row,
        }
    }
}

impl fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}+{}", self.sequence, self.offset, self.row)
    }
}

/// One rendered message on its way to the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMessage {
    pub scn: Scn,
    pub subscn: SubScn,
    pub position: MessagePosition,
    pub op: RowOp,
    /// Fully qualified table name, empty for DDL markers.
    pub table: String,
    /// xxh3-64 of `bytes`, the message build fingerprint.
    pub fingerprint: u64,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_order_is_sequence_offset_row() {
        let a = MessagePosition::new(Seq(3), 1024, 0);
        let b = MessagePosition::new(Seq(3), 1024, 1);
        let c = MessagePosition::new(Seq(3), 2048, 0);
        let d = MessagePosition::new(Seq(4), 0, 0);
        assert!(a < b && b < c && c < d);
    }
}
