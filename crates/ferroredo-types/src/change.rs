//! Decoded row changes and their compact chunk encoding.
//!
//! A [`RowChange`] is what the parser hands to the transaction buffer: one
//! logical row operation with its ordering keys and decoded column values.
//! Chains store changes as length-prefixed byte entries inside pooled
//! chunks, so the struct carries its own little-endian codec; entries are
//! offset-addressed and contain no pointers.

use std::fmt;

use crate::{FileOffset, RecordPosition, RowOp, Scn, Seq, SubScn};

/// One decoded column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColValue {
    /// SQL NULL.
    Null,
    /// Character data, already transcoded to the output encoding.
    Text(String),
    /// A decimal number in canonical string form (no loss, any precision).
    Number(String),
    /// Raw bytes: LOB pieces and anything with no character semantics.
    Bytes(Vec<u8>),
}

impl ColValue {
    const TAG_NULL: u8 = 0;
    const TAG_TEXT: u8 = 1;
    const TAG_NUMBER: u8 = 2;
    const TAG_BYTES: u8 = 3;

    const fn tag(&self) -> u8 {
        match self {
            Self::Null => Self::TAG_NULL,
            Self::Text(_) => Self::TAG_TEXT,
            Self::Number(_) => Self::TAG_NUMBER,
            Self::Bytes(_) => Self::TAG_BYTES,
        }
    }
}

impl fmt::Display for ColValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Number(n) => f.write_str(n),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// One column of a row image: declaration-order index plus value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub index: u16,
    pub value: ColValue,
}

/// One logical row operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    /// SCN of the redo record that carried this change.
    pub scn: Scn,
    pub subscn: SubScn,
    /// Where in the redo stream the record started.
    pub position: RecordPosition,
    pub op: RowOp,
    /// Dictionary object id of the table.
    pub object_id: u32,
    /// Present columns in declaration order.
    pub columns: Vec<Column>,
}

/// Decode failure for a chunk entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDecodeError {
    pub detail: String,
}

impl fmt::Display for ChangeDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "change entry decode failed: {}", self.detail)
    }
}

impl std::error::Error for ChangeDecodeError {}

fn err(detail: impl Into<String>) -> ChangeDecodeError {
    ChangeDecodeError {
        detail: detail.into(),
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ChangeDecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(err(format!(
                "need {n} bytes at {}, have {}",
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ChangeDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ChangeDecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, ChangeDecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, ChangeDecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

impl RowChange {
    /// Append the little-endian encoding of this change to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.scn.get().to_le_bytes());
        buf.extend_from_slice(&self.subscn.0.to_le_bytes());
        buf.extend_from_slice(&self.position.sequence.get().to_le_bytes());
        buf.extend_from_slice(&self.position.offset.get().to_le_bytes());
        buf.push(match self.op {
            RowOp::Insert => 0,
            RowOp::Update => 1,
            RowOp::Delete => 2,
            RowOp::Ddl => 3,
        });
        buf.extend_from_slice(&self.object_id.to_le_bytes());
        buf.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());
        for col in &self.columns {
            buf.extend_from_slice(&col.index.to_le_bytes());
            buf.push(col.value.tag());
            let payload: &[u8] = match &col.value {
                ColValue::Null => &[],
                ColValue::Text(s) => s.as_bytes(),
                ColValue::Number(n) => n.as_bytes(),
                ColValue::Bytes(b) => b,
            };
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(payload);
        }
    }

    /// Encoded size in bytes, without encoding.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut len = 8 + 2 + 4 + 8 + 1 + 4 + 2;
        for col in &self.columns {
            len += 2 + 1 + 4;
            len += match &col.value {
                ColValue::Null => 0,
                ColValue::Text(s) => s.len(),
                ColValue::Number(n) => n.len(),
                ColValue::Bytes(b) => b.len(),
            };
        }
        len
    }

    /// Decode one change from an entry produced by [`RowChange::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self, ChangeDecodeError> {
        let mut cur = Cursor { buf, pos: 0 };
        let scn = Scn::new(cur.u64()?).ok_or_else(|| err("scn sentinel in entry"))?;
        let subscn = SubScn(cur.u16()?);
        let sequence = Seq(cur.u32()?);
        let offset = FileOffset(cur.u64()?);
        let op = match cur.u8()? {
            0 => RowOp::Insert,
            1 => RowOp::Update,
            2 => RowOp::Delete,
            3 => RowOp::Ddl,
            other => return Err(err(format!("unknown op tag {other}"))),
        };
        let object_id = cur.u32()?;
        let column_count = cur.u16()? as usize;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let index = cur.u16()?;
            let tag = cur.u8()?;
            let len = cur.u32()? as usize;
            let payload = cur.take(len)?;
            let value = match tag {
                ColValue::TAG_NULL => ColValue::Null,
                ColValue::TAG_TEXT => ColValue::Text(
                    String::from_utf8(payload.to_vec())
                        .map_err(|e| err(format!("text column not UTF-8: {e}")))?,
                ),
                ColValue::TAG_NUMBER => ColValue::Number(
                    String::from_utf8(payload.to_vec())
                        .map_err(|e| err(format!("number column not UTF-8: {e}")))?,
                ),
                ColValue::TAG_BYTES => ColValue::Bytes(payload.to_vec()),
                other => return Err(err(format!("unknown column tag {other}"))),
            };
            columns.push(Column { index, value });
        }
        if cur.pos != buf.len() {
            return Err(err(format!(
                "{} trailing bytes after change entry",
                buf.len() - cur.pos
            )));
        }
        Ok(Self {
            scn,
            subscn,
            position: RecordPosition::new(sequence, offset),
            op,
            object_id,
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowChange {
        RowChange {
            scn: Scn::new(1_000_042).unwrap(),
            subscn: SubScn(3),
            position: RecordPosition::new(Seq(17), FileOffset(8192)),
            op: RowOp::Insert,
            object_id: 54321,
            columns: vec![
                Column {
                    index: 0,
                    value: ColValue::Number("101".into()),
                },
                Column {
                    index: 1,
                    value: ColValue::Text("abc".into()),
                },
                Column {
                    index: 2,
                    value: ColValue::Null,
                },
                Column {
                    index: 3,
                    value: ColValue::Bytes(vec![0xDE, 0xAD]),
                },
            ],
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let change = sample();
        let mut buf = Vec::new();
        change.encode(&mut buf);
        assert_eq!(buf.len(), change.encoded_len());
        assert_eq!(RowChange::decode(&buf).unwrap(), change);
    }

    #[test]
    fn truncated_entry_is_rejected() {
        let change = sample();
        let mut buf = Vec::new();
        change.encode(&mut buf);
        for cut in [0, 1, 8, buf.len() - 1] {
            assert!(RowChange::decode(&buf[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let change = sample();
        let mut buf = Vec::new();
        change.encode(&mut buf);
        buf.push(0);
        assert!(RowChange::decode(&buf).is_err());
    }

    #[test]
    fn bad_tags_are_rejected() {
        let change = sample();
        let mut buf = Vec::new();
        change.encode(&mut buf);
        // Op tag sits right after scn + subscn + seq + offset.
        buf[8 + 2 + 4 + 8] = 77;
        assert!(RowChange::decode(&buf).is_err());
    }

    #[test]
    fn empty_column_list() {
        let change = RowChange {
            columns: vec![],
            ..sample()
        };
        let mut buf = Vec::new();
        change.encode(&mut buf);
        assert_eq!(RowChange::decode(&buf).unwrap(), change);
    }
}
