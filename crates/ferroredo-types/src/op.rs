//! Redo record opcodes.
//!
//! An opcode is the `(layer, verb)` pair stored in every redo record header,
//! packed as `layer << 8 | verb`. The closed set below covers the operations
//! the pipeline decodes; everything else is carried as [`RedoOpCode::Other`]
//! so that unknown record kinds are counted rather than silently dropped.

use std::fmt;

/// Decoded redo opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedoOpCode {
    /// 5.2 — transaction begin (undo header update).
    KtbBegin,
    /// 5.4 — transaction terminate: commit, or rollback when the record's
    /// flag field has the rollback bit set.
    KtbCommit,
    /// 11.2 — insert single row.
    KdoInsert,
    /// 11.3 — delete single row.
    KdoDelete,
    /// 11.5 — update single row.
    KdoUpdate,
    /// 11.11 — insert multiple rows.
    KdoInsertMulti,
    /// 11.12 — delete multiple rows.
    KdoDeleteMulti,
    /// 11.16 — supplemental logging marker.
    KdoSupplemental,
    /// 19.1 — piecewise LOB write.
    LobWrite,
    /// 24.1 — DDL boundary marker.
    Ddl,
    /// Any opcode outside the decoded set; the raw `layer << 8 | verb` value.
    Other(u16),
}

impl RedoOpCode {
    /// Decode the packed `(layer, verb)` value from a record header.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        match raw {
            0x0502 => Self::KtbBegin,
            0x0504 => Self::KtbCommit,
            0x0B02 => Self::KdoInsert,
            0x0B03 => Self::KdoDelete,
            0x0B05 => Self::KdoUpdate,
            0x0B0B => Self::KdoInsertMulti,
            0x0B0C => Self::KdoDeleteMulti,
            0x0B10 => Self::KdoSupplemental,
            0x1301 => Self::LobWrite,
            0x1801 => Self::Ddl,
            other => Self::Other(other),
        }
    }

    /// The packed `layer << 8 | verb` value.
    #[must_use]
    pub const fn as_raw(self) -> u16 {
        match self {
            Self::KtbBegin => 0x0502,
            Self::KtbCommit => 0x0504,
            Self::KdoInsert => 0x0B02,
            Self::KdoDelete => 0x0B03,
            Self::KdoUpdate => 0x0B05,
            Self::KdoInsertMulti => 0x0B0B,
            Self::KdoDeleteMulti => 0x0B0C,
            Self::KdoSupplemental => 0x0B10,
            Self::LobWrite => 0x1301,
            Self::Ddl => 0x1801,
            Self::Other(raw) => raw,
        }
    }

    #[inline]
    #[must_use]
    pub const fn layer(self) -> u8 {
        (self.as_raw() >> 8) as u8
    }

    #[inline]
    #[must_use]
    pub const fn verb(self) -> u8 {
        self.as_raw() as u8
    }

    /// Whether this opcode carries a row image.
    #[must_use]
    pub const fn is_row_change(self) -> bool {
        matches!(
            self,
            Self::KdoInsert
                | Self::KdoDelete
                | Self::KdoUpdate
                | Self::KdoInsertMulti
                | Self::KdoDeleteMulti
        )
    }
}

impl fmt::Display for RedoOpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.layer(), self.verb())
    }
}

/// Logical row operation rendered into output messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowOp {
    Insert,
    Update,
    Delete,
    Ddl,
}

impl RowOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Ddl => "DDL",
        }
    }
}

impl fmt::Display for RowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip_for_known_opcodes() {
        let known = [
            RedoOpCode::KtbBegin,
            RedoOpCode::KtbCommit,
            RedoOpCode::KdoInsert,
            RedoOpCode::KdoDelete,
            RedoOpCode::KdoUpdate,
            RedoOpCode::KdoInsertMulti,
            RedoOpCode::KdoDeleteMulti,
            RedoOpCode::KdoSupplemental,
            RedoOpCode::LobWrite,
            RedoOpCode::Ddl,
        ];
        for op in known {
            assert_eq!(RedoOpCode::from_raw(op.as_raw()), op);
        }
    }

    #[test]
    fn unknown_opcode_is_preserved() {
        let op = RedoOpCode::from_raw(0x0A06);
        assert_eq!(op, RedoOpCode::Other(0x0A06));
        assert_eq!(op.as_raw(), 0x0A06);
        assert_eq!(op.layer(), 10);
        assert_eq!(op.verb(), 6);
    }

    #[test]
    fn layer_verb_split() {
        assert_eq!(RedoOpCode::KdoUpdate.layer(), 11);
        assert_eq!(RedoOpCode::KdoUpdate.verb(), 5);
        assert_eq!(RedoOpCode::KdoUpdate.to_string(), "11.5");
    }

    #[test]
    fn row_change_classification() {
        assert!(RedoOpCode::KdoInsert.is_row_change());
        assert!(RedoOpCode::KdoDeleteMulti.is_row_change());
        assert!(!RedoOpCode::KtbCommit.is_row_change());
        assert!(!RedoOpCode::Ddl.is_row_change());
    }

    #[test]
    fn row_op_strings() {
        assert_eq!(RowOp::Insert.as_str(), "INSERT");
        assert_eq!(RowOp::Ddl.to_string(), "DDL");
    }
}
