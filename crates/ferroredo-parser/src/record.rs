//! Redo record framing.
//!
//! A record starts on a block boundary, right after the 16-byte block
//! header. Its payload may span blocks: the continuation skips each
//! following block's header, so the logical payload is the concatenation of
//! the blocks' data areas. Layout of the 28-byte record header:
//!
//! ```text
//! Offset  Size  Field
//!   0       4   payload length (header + fields, block headers excluded)
//!   4       8   SCN
//!  12       2   sub-SCN
//!  14       2   field count
//!  16       8   xid (undo segment u16, slot u16, wrap u32)
//!  24       2   opcode (layer << 8 | verb)
//!  26       2   reserved
//! ```
//!
//! Each field is `{field_no u16, field_size u16, payload}` with the payload
//! padded to 4-byte alignment. Handlers walk fields with "next field /
//! next optional field" semantics: older writers omit trailing fields, and
//! that is not an error.

use ferroredo_error::{FerroError, Result};
use ferroredo_reader::Endian;
use ferroredo_types::{BlockSize, FileOffset, RecordPosition, RedoOpCode, Scn, Seq, SubScn, Xid};

/// Bytes of the fixed record header.
pub const RECORD_HEADER_LEN: usize = 28;

/// Parsed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Payload length: header plus fields, excluding interleaved block
    /// headers.
    pub length: u32,
    pub scn: Scn,
    pub subscn: SubScn,
    pub field_count: u16,
    pub xid: Xid,
    pub opcode: RedoOpCode,
}

impl RecordHeader {
    /// Parse the header at the start of a record payload.
    pub fn parse(buf: &[u8], endian: Endian, position: RecordPosition) -> Result<Self> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(malformed(
                "record",
                position,
                format!("{} bytes left for a {RECORD_HEADER_LEN}-byte header", buf.len()),
            ));
        }
        let length = endian.read_u32(buf, 0);
        let scn = Scn::new(endian.read_u64(buf, 4)).ok_or_else(|| {
            malformed("record", position, "scn carries the none sentinel".to_string())
        })?;
        let opcode = RedoOpCode::from_raw(endian.read_u16(buf, 24));
        if (length as usize) < RECORD_HEADER_LEN {
            return Err(malformed(
                "record",
                position,
                format!("declared length {length} shorter than the header"),
            ));
        }
        Ok(Self {
            length,
            scn,
            subscn: SubScn(endian.read_u16(buf, 12)),
            field_count: endian.read_u16(buf, 14),
            xid: Xid::from_raw(endian.read_u64(buf, 16)),
            opcode,
        })
    }

    /// Whole blocks this record occupies.
    #[must_use]
    pub fn span_blocks(&self, block_size: BlockSize) -> u64 {
        span_blocks(self.length, block_size)
    }
}

/// Whole blocks a record of `length` payload bytes occupies.
#[must_use]
pub fn span_blocks(length: u32, block_size: BlockSize) -> u64 {
    let payload_per_block = block_size.payload_len() as u64;
    (u64::from(length)).div_ceil(payload_per_block)
}

/// Concatenate the data areas of a run of raw blocks, yielding `length`
/// payload bytes.
pub fn assemble_payload(
    blocks: &[u8],
    block_size: BlockSize,
    length: usize,
    position: RecordPosition,
) -> Result<Vec<u8>> {
    let bs = block_size.as_usize();
    let per_block = block_size.payload_len();
    let needed_blocks = length.div_ceil(per_block);
    if blocks.len() < needed_blocks * bs {
        return Err(FerroError::RecordOverrun {
            sequence: position.sequence,
            offset: position.offset,
            length: length as u32,
        });
    }
    let mut out = Vec::with_capacity(length);
    for i in 0..needed_blocks {
        let data = &blocks[i * bs + BlockSize::HEADER_LEN..(i + 1) * bs];
        let take = per_block.min(length - out.len());
        out.extend_from_slice(&data[..take]);
    }
    Ok(out)
}

/// Split a record payload into blocks: each block gets its 16-byte header
/// area (zeroed here; the caller stamps numbers and seals checksums).
#[must_use]
pub fn payload_to_blocks(payload: &[u8], block_size: BlockSize) -> Vec<u8> {
    let per_block = block_size.payload_len();
    let blocks = payload.len().div_ceil(per_block).max(1);
    let mut out = vec![0u8; blocks * block_size.as_usize()];
    for (i, piece) in payload.chunks(per_block).enumerate() {
        let start = i * block_size.as_usize() + BlockSize::HEADER_LEN;
        out[start..start + piece.len()].copy_from_slice(piece);
    }
    out
}

/// Encode a record payload: header plus fields, 4-byte aligned.
///
/// Fixture and copy-tooling use; the parser itself only decodes.
#[must_use]
pub fn encode_record(
    scn: Scn,
    subscn: SubScn,
    xid: Xid,
    opcode: RedoOpCode,
    fields: &[(u16, Vec<u8>)],
) -> Vec<u8> {
    let mut out = vec![0u8; RECORD_HEADER_LEN];
    out[4..12].copy_from_slice(&scn.get().to_le_bytes());
    out[12..14].copy_from_slice(&subscn.0.to_le_bytes());
    out[14..16].copy_from_slice(&(fields.len() as u16).to_le_bytes());
    out[16..24].copy_from_slice(&xid.to_raw().to_le_bytes());
    out[24..26].copy_from_slice(&opcode.as_raw().to_le_bytes());
    for (field_no, payload) in fields {
        out.extend_from_slice(&field_no.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    let length = out.len() as u32;
    out[0..4].copy_from_slice(&length.to_le_bytes());
    out
}

/// Walks the fields of one record with tolerant trailing-field semantics.
pub struct FieldCursor<'a> {
    payload: &'a [u8],
    endian: Endian,
    opcode: RedoOpCode,
    position: RecordPosition,
    remaining: u16,
    pos: usize,
}

impl<'a> FieldCursor<'a> {
    /// Start walking after the record header.
    pub fn new(
        payload: &'a [u8],
        header: &RecordHeader,
        endian: Endian,
        position: RecordPosition,
    ) -> Self {
        Self {
            payload,
            endian,
            opcode: header.opcode,
            position,
            remaining: header.field_count,
            pos: RECORD_HEADER_LEN,
        }
    }

    fn advance(&mut self) -> Result<Option<(u16, &'a [u8])>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.pos + 4 > self.payload.len() {
            return Err(self.malformed("field header past record end"));
        }
        let field_no = self.endian.read_u16(self.payload, self.pos);
        let size = self.endian.read_u16(self.payload, self.pos + 2) as usize;
        let start = self.pos + 4;
        if start + size > self.payload.len() {
            return Err(self.malformed(format!(
                "field {field_no} of {size} bytes past record end"
            )));
        }
        self.pos = (start + size).div_ceil(4) * 4;
        self.remaining -= 1;
        Ok(Some((field_no, &self.payload[start..start + size])))
    }

    /// Next field; its absence is a malformed record.
    pub fn next_field(&mut self, what: &'static str) -> Result<&'a [u8]> {
        match self.advance()? {
            Some((_, payload)) => Ok(payload),
            None => Err(self.malformed(format!("missing mandatory field: {what}"))),
        }
    }

    /// Next field if present. Older writers drop trailing fields.
    pub fn next_field_opt(&mut self) -> Result<Option<&'a [u8]>> {
        Ok(self.advance()?.map(|(_, payload)| payload))
    }

    fn malformed(&self, detail: impl Into<String>) -> FerroError {
        malformed_op(self.opcode, self.position, detail.into())
    }
}

fn malformed(opcode: &str, position: RecordPosition, detail: String) -> FerroError {
    FerroError::MalformedRecord {
        opcode: opcode.to_string(),
        sequence: position.sequence,
        offset: position.offset,
        detail,
    }
}

/// Malformed-record error tagged with the opcode and stream position.
pub fn malformed_op(opcode: RedoOpCode, position: RecordPosition, detail: String) -> FerroError {
    FerroError::MalformedRecord {
        opcode: opcode.to_string(),
        sequence: position.sequence,
        offset: position.offset,
        detail,
    }
}

/// Position helper for error tags.
#[must_use]
pub fn position(sequence: Seq, offset: u64) -> RecordPosition {
    RecordPosition::new(sequence, FileOffset(offset))
}
