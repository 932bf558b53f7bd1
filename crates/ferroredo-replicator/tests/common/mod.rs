//! Shared fixtures: synthetic redo log construction and config documents.

use std::path::Path;

use ferroredo_parser::record::{encode_record, payload_to_blocks};
use ferroredo_parser::row::{encode_row_image, DTYPE_NUMBER, DTYPE_TEXT};
use ferroredo_parser::number;
use ferroredo_reader::checksum::seal;
use ferroredo_reader::header::RedoFileHeader;
use ferroredo_reader::Endian;
use ferroredo_types::{
    Activation, BlockSize, CompatVersion, RedoOpCode, Resetlogs, Scn, Seq, SubScn, Xid,
};
use serde_json::{json, Value};

pub const BS: BlockSize = BlockSize::B512;

/// Builds a sealed redo log file block by block.
pub struct LogBuilder {
    sequence: u32,
    resetlogs: u32,
    blocks: Vec<u8>,
    next_block: u32,
}

impl LogBuilder {
    pub fn new(sequence: u32, resetlogs: u32) -> Self {
        Self {
            sequence,
            resetlogs,
            blocks: Vec::new(),
            next_block: 2,
        }
    }

    pub fn record(
        &mut self,
        scn: u64,
        subscn: u16,
        xid: Xid,
        opcode: RedoOpCode,
        fields: &[(u16, Vec<u8>)],
    ) -> &mut Self {
        let payload = encode_record(
            Scn::new(scn).expect("test scn"),
            SubScn(subscn),
            xid,
            opcode,
            fields,
        );
        let mut blocks = payload_to_blocks(&payload, BS);
        for (i, block) in blocks.chunks_mut(BS.as_usize()).enumerate() {
            block[0] = 1;
            block[1] = BS.magic();
            block[4..8].copy_from_slice(&(self.next_block + i as u32).to_le_bytes());
            block[8..12].copy_from_slice(&self.sequence.to_le_bytes());
            seal(block);
        }
        self.next_block += (blocks.len() / BS.as_usize()) as u32;
        self.blocks.append(&mut blocks);
        self
    }

    pub fn begin(&mut self, scn: u64, xid: Xid) -> &mut Self {
        self.record(scn, 0, xid, RedoOpCode::KtbBegin, &[])
    }

    pub fn insert(&mut self, scn: u64, xid: Xid, object_id: u32, row: &[RowCol]) -> &mut Self {
        self.record(
            scn,
            0,
            xid,
            RedoOpCode::KdoInsert,
            &[ktb_field(), (0x02, row_image(object_id, row))],
        )
    }

    pub fn commit(&mut self, scn: u64, subscn: u16, xid: Xid) -> &mut Self {
        self.record(
            scn,
            subscn,
            xid,
            RedoOpCode::KtbCommit,
            &[commit_field(false)],
        )
    }

    pub fn rollback(&mut self, scn: u64, xid: Xid) -> &mut Self {
        self.record(scn, 0, xid, RedoOpCode::KtbCommit, &[commit_field(true)])
    }

    /// Corrupt one byte in the data block at `block_number`.
    pub fn corrupt_block(&mut self, block_number: u32) -> &mut Self {
        let index = (block_number - 2) as usize * BS.as_usize() + 100;
        self.blocks[index] ^= 0xFF;
        self
    }

    /// Restamp a data block as belonging to a later sequence (rotation).
    pub fn overwrite_block(&mut self, block_number: u32, new_sequence: u32) -> &mut Self {
        let start = (block_number - 2) as usize * BS.as_usize();
        let block = &mut self.blocks[start..start + BS.as_usize()];
        block[8..12].copy_from_slice(&new_sequence.to_le_bytes());
        seal(block);
        self
    }

    pub fn header(&self, first_scn: u64, next_scn: Option<u64>, sealed: bool) -> RedoFileHeader {
        RedoFileHeader {
            endian: Endian::Little,
            block_size: BS,
            sequence: Seq(self.sequence),
            version: CompatVersion(0x1312_0000),
            database_id: 42,
            sid: "ORCL".into(),
            activation: Activation(1),
            block_count: if sealed { self.next_block } else { 0 },
            resetlogs: Resetlogs(self.resetlogs),
            first_scn: Scn::new(first_scn).expect("test scn"),
            first_time: 0,
            next_scn: next_scn.map(|s| Scn::new(s).expect("test scn")),
            next_time: 0,
        }
    }

    /// A sealed archived log: header names the block count and next SCN.
    pub fn finish_archived(&self, first_scn: u64, next_scn: u64) -> Vec<u8> {
        let mut out = self.header(first_scn, Some(next_scn), true).encode();
        out.extend_from_slice(&self.blocks);
        out
    }

    /// A still-open online log: no next SCN, no block count.
    pub fn finish_online(&self, first_scn: u64) -> Vec<u8> {
        let mut out = self.header(first_scn, None, false).encode();
        out.extend_from_slice(&self.blocks);
        out
    }
}

/// One column of a test row.
pub enum RowCol {
    Num(&'static str),
    Text(&'static str),
    Null,
}

pub fn row_image(object_id: u32, cols: &[RowCol]) -> Vec<u8> {
    let encoded: Vec<(u16, u8, Option<Vec<u8>>)> = cols
        .iter()
        .enumerate()
        .map(|(i, col)| match col {
            RowCol::Num(n) => (
                i as u16,
                DTYPE_NUMBER,
                Some(number::encode(n).expect("test number")),
            ),
            RowCol::Text(t) => (i as u16, DTYPE_TEXT, Some(t.as_bytes().to_vec())),
            RowCol::Null => (i as u16, DTYPE_NUMBER, None),
        })
        .collect();
    encode_row_image(object_id, cols.len() as u16, &encoded)
}

pub fn ktb_field() -> (u16, Vec<u8>) {
    (0x01, vec![0u8; 4])
}

pub fn commit_field(rollback: bool) -> (u16, Vec<u8>) {
    let flags: u16 = u16::from(rollback);
    (0x01, flags.to_le_bytes().to_vec())
}

/// Instance config document over real files in `dir`.
pub fn config_doc(dir: &Path, reader: Value) -> Value {
    json!({
        "version": "0.3.0",
        "source": [{
            "alias": "S1",
            "name": "DB1",
            "reader": reader,
            "memory": {"min-mb": 0, "max-mb": 16, "read-buffer-max-mb": 4},
            "tables": [{
                "object-id": 777,
                "owner": "USR1",
                "table": "ADAM",
                "columns": ["A", "B", "C"]
            }]
        }],
        "target": [{
            "alias": "T1",
            "source": "S1",
            "writer": {
                "type": "file",
                "output": dir.join("out_%i.json"),
                "flush-buffer-size": 1
            },
            "checkpoint-path": dir.join("checkpoint.json")
        }]
    })
}

/// Concatenated output across rotation indexes, in order.
pub fn read_output(dir: &Path) -> String {
    let mut text = String::new();
    for index in 0.. {
        match std::fs::read_to_string(dir.join(format!("out_{index}.json"))) {
            Ok(part) => text.push_str(&part),
            Err(_) => break,
        }
    }
    text
}

/// Parse output lines as JSON documents.
pub fn output_docs(dir: &Path) -> Vec<Value> {
    read_output(dir)
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).expect("output line is JSON"))
        .collect()
}
