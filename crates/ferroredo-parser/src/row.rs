//! Row image decoding.
//!
//! A row image is the compact column payload carried by KDO records:
//!
//! ```text
//! u32  object id
//! u16  column count
//! u16  flags
//! ceil(count / 8) bytes of column bitmap (LSB first)
//! per present column:
//!   u8   data type (1 = NUMBER, 2 = character, 3 = raw)
//!   u8   length; 0xFF = NULL, 0xFE = u16 extended length follows
//!   ...  value bytes
//! ```
//!
//! Values longer than 0xFD bytes use the extended length form; LOB columns
//! arrive separately as piecewise writes and never inline here.

use ferroredo_error::Result;
use ferroredo_reader::Endian;
use ferroredo_types::{ColValue, Column, RecordPosition, RedoOpCode};

use crate::charset::CharacterDecoder;
use crate::number;
use crate::record::malformed_op;

/// Column data type tags inside row images.
pub const DTYPE_NUMBER: u8 = 1;
pub const DTYPE_TEXT: u8 = 2;
pub const DTYPE_RAW: u8 = 3;

const LEN_NULL: u8 = 0xFF;
const LEN_EXTENDED: u8 = 0xFE;

/// Decoded row image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowImage {
    pub object_id: u32,
    pub flags: u16,
    /// Present columns in declaration order.
    pub columns: Vec<Column>,
}

/// Decode one row image.
pub fn decode_row_image(
    buf: &[u8],
    endian: Endian,
    decoder: &dyn CharacterDecoder,
    opcode: RedoOpCode,
    position: RecordPosition,
) -> Result<RowImage> {
    let bad = |detail: String| malformed_op(opcode, position, detail);

    if buf.len() < 8 {
        return Err(bad(format!("row image of {} bytes has no header", buf.len())));
    }
    let object_id = endian.read_u32(buf, 0);
    let column_count = endian.read_u16(buf, 4) as usize;
    let flags = endian.read_u16(buf, 6);

    let bitmap_len = column_count.div_ceil(8);
    if buf.len() < 8 + bitmap_len {
        return Err(bad("row image truncated inside column bitmap".into()));
    }
    let bitmap = &buf[8..8 + bitmap_len];
    let mut pos = 8 + bitmap_len;

    let mut columns = Vec::new();
    for index in 0..column_count {
        if bitmap[index / 8] & (1 << (index % 8)) == 0 {
            continue;
        }
        if pos + 2 > buf.len() {
            return Err(bad(format!("column {index} header past row image end")));
        }
        let dtype = buf[pos];
        let len_byte = buf[pos + 1];
        pos += 2;

        if len_byte == LEN_NULL {
            columns.push(Column {
                index: index as u16,
                value: ColValue::Null,
            });
            continue;
        }
        let len = if len_byte == LEN_EXTENDED {
            if pos + 2 > buf.len() {
                return Err(bad(format!("column {index} extended length truncated")));
            }
            let len = endian.read_u16(buf, pos) as usize;
            pos += 2;
            len
        } else {
            len_byte as usize
        };
        if pos + len > buf.len() {
            return Err(bad(format!(
                "column {index} value of {len} bytes past row image end"
            )));
        }
        let bytes = &buf[pos..pos + len];
        pos += len;

        let value = match dtype {
            DTYPE_NUMBER => ColValue::Number(
                number::decode(bytes).map_err(|e| bad(format!("column {index}: {e}")))?,
            ),
            DTYPE_TEXT => ColValue::Text(
                decoder
                    .decode(bytes)
                    .map_err(|e| bad(format!("column {index}: {e}")))?,
            ),
            DTYPE_RAW => ColValue::Bytes(bytes.to_vec()),
            other => return Err(bad(format!("column {index} has unknown type tag {other}"))),
        };
        columns.push(Column {
            index: index as u16,
            value,
        });
    }
    Ok(RowImage {
        object_id,
        flags,
        columns,
    })
}

/// Encode a row image (fixture and copy-tooling use).
#[must_use]
pub fn encode_row_image(object_id: u32, column_count: u16, columns: &[(u16, u8, Option<Vec<u8>>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&object_id.to_le_bytes());
    out.extend_from_slice(&column_count.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    let bitmap_len = (column_count as usize).div_ceil(8);
    let mut bitmap = vec![0u8; bitmap_len];
    for (index, _, _) in columns {
        bitmap[*index as usize / 8] |= 1 << (*index as usize % 8);
    }
    out.extend_from_slice(&bitmap);

    for (_, dtype, value) in columns {
        out.push(*dtype);
        match value {
            None => out.push(LEN_NULL),
            Some(bytes) => {
                if bytes.len() < LEN_EXTENDED as usize {
                    out.push(bytes.len() as u8);
                } else {
                    out.push(LEN_EXTENDED);
                    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                }
                out.extend_from_slice(bytes);
            }
        }
    }
    out
}
