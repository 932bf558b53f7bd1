//! The parser loop: consumes the reader's validated window, frames records,
//! dispatches opcodes, and drives the transaction buffer.
//!
//! Every byte is consumed exactly once; there is no back-tracking. After a
//! record is fully consumed the parser confirms up to the next block
//! boundary, which lets the reader advance `start` and reuse ring chunks.

use std::sync::Arc;

use ferroredo_error::{FerroError, Result};
use ferroredo_reader::{Reader, RedoCode};
use ferroredo_txn::{CommittedTxn, TransactionBuffer};
use ferroredo_types::{
    FileOffset, RecordPosition, RedoOpCode, RowChange, RowOp, Scn, Seq, Shutdown, Column,
    ColValue,
};
use tracing::{debug, trace, warn};

use crate::charset::CharacterDecoder;
use crate::record::{
    assemble_payload, malformed_op, span_blocks, FieldCursor, RecordHeader, RECORD_HEADER_LEN,
};
use crate::row::decode_row_image;

/// Receives transactions as they commit, in commit-SCN order.
pub trait CommitSink {
    fn consume(&mut self, txn: CommittedTxn) -> Result<()>;
}

impl CommitSink for Vec<CommittedTxn> {
    fn consume(&mut self, txn: CommittedTxn) -> Result<()> {
        self.push(txn);
        Ok(())
    }
}

/// How one log file's parse ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Terminal reader code: `Finished`, `Overwritten`, `Stopped`, or
    /// `Shutdown`.
    pub code: RedoCode,
    /// Highest record SCN observed.
    pub last_scn: Option<Scn>,
    /// Byte offset confirmed back to the reader.
    pub confirmed: u64,
    /// Records consumed.
    pub records: u64,
}

/// Parser for one redo log file.
pub struct LogParser<'a, S: CommitSink> {
    reader: &'a Reader,
    buffer: &'a mut TransactionBuffer,
    sink: &'a mut S,
    decoder: &'a dyn CharacterDecoder,
    shutdown: Arc<Shutdown>,
    sequence: Seq,
    /// Called on DDL boundaries so dictionary caches drop stale entries.
    on_ddl: Option<Box<dyn FnMut() + Send + 'a>>,
}

impl<'a, S: CommitSink> LogParser<'a, S> {
    pub fn new(
        reader: &'a Reader,
        buffer: &'a mut TransactionBuffer,
        sink: &'a mut S,
        decoder: &'a dyn CharacterDecoder,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        let sequence = reader.sequence();
        Self {
            reader,
            buffer,
            sink,
            decoder,
            shutdown,
            sequence,
            on_ddl: None,
        }
    }

    /// Register the schema-cache flush hook for DDL boundaries.
    pub fn with_ddl_hook(mut self, hook: impl FnMut() + Send + 'a) -> Self {
        self.on_ddl = Some(Box::new(hook));
        self
    }

    /// Parse from `start_offset` (block aligned; at least past the file
    /// header) until the reader reports a terminal state and the window is
    /// drained.
    pub fn parse(&mut self, start_offset: u64) -> Result<ParseOutcome> {
        let header = self
            .reader
            .header()
            .ok_or_else(|| FerroError::internal("parse before header check"))?;
        let block_size = header.block_size;
        let bs = block_size.as_usize() as u64;
        let endian = header.endian;
        self.sequence = self.reader.sequence();

        let mut confirmed = start_offset.max(bs * 2);
        let mut last_scn: Option<Scn> = None;
        let mut records = 0u64;
        // Offset the next wait should see published before waking: equals
        // `confirmed` normally, or the last block of a partially published
        // spanning record.
        let mut needed = confirmed;

        debug!(
            sequence = self.sequence.get(),
            start = confirmed,
            "parsing redo log"
        );

        loop {
            if self.shutdown.hard_requested() {
                return Ok(self.outcome(RedoCode::Shutdown, last_scn, confirmed, records));
            }
            let snap = self.reader.control().wait_for_data(needed);
            needed = confirmed;

            // Consume whole records available in [confirmed, end).
            while confirmed + bs <= snap.end {
                let position = RecordPosition::new(self.sequence, FileOffset(confirmed));
                let mut first = vec![0u8; bs as usize];
                self.reader.ring().read(confirmed, &mut first)?;

                let length = endian.read_u32(&first, 16);
                if length == 0 {
                    // Padding block at the tail of the used area.
                    confirmed += bs;
                    self.reader.confirm_read_data(confirmed);
                    continue;
                }
                if (length as usize) < RECORD_HEADER_LEN {
                    return Err(malformed_op(
                        RedoOpCode::Other(0),
                        position,
                        format!("declared record length {length} shorter than header"),
                    ));
                }

                let span = span_blocks(length, block_size);
                let record_end = confirmed + span * bs;
                if record_end > snap.end {
                    // Not fully published yet. If the reader already hit a
                    // terminal state there is nothing more coming.
                    if snap.ret != RedoCode::Ok {
                        return Err(FerroError::RecordOverrun {
                            sequence: self.sequence,
                            offset: FileOffset(confirmed),
                            length,
                        });
                    }
                    needed = record_end - bs;
                    break;
                }

                let mut raw = vec![0u8; (span * bs) as usize];
                self.reader.ring().read(confirmed, &mut raw)?;
                let payload =
                    assemble_payload(&raw, block_size, length as usize, position)?;
                let record = RecordHeader::parse(&payload, endian, position)?;
                self.dispatch(&record, &payload, endian, position)?;

                last_scn = Some(last_scn.map_or(record.scn, |s| s.max(record.scn)));
                records += 1;
                confirmed = record_end;
                self.reader.confirm_read_data(confirmed);

                // Release transactions whose commit is strictly below the
                // parse front: commits sharing the front SCN wait until the
                // SCN advances so same-SCN ties release in subscn order.
                if let Some(scn) = last_scn {
                    if scn > Scn::ZERO {
                        let settled = Scn::new(scn.get() - 1).unwrap_or(Scn::ZERO);
                        for txn in self.buffer.take_ready(settled) {
                            self.sink.consume(txn)?;
                        }
                    }
                }
            }

            if self.shutdown.soft_requested() && snap.ret == RedoCode::Ok {
                return Ok(self.outcome(RedoCode::Shutdown, last_scn, confirmed, records));
            }

            // Terminal handling once the window is drained.
            if snap.ret != RedoCode::Ok || !matches!(snap.status, ferroredo_reader::ReaderStatus::Read) {
                if self.reader.check_finished(confirmed) {
                    let code = self.reader.control().snapshot().ret;
                    match code {
                        RedoCode::Finished => {
                            // Every record of the file is parsed: flush all
                            // pending commits regardless of SCN.
                            for txn in self.buffer.take_all_committed() {
                                self.sink.consume(txn)?;
                            }
                            return Ok(self.outcome(code, last_scn, confirmed, records));
                        }
                        RedoCode::Overwritten | RedoCode::Stopped | RedoCode::Shutdown => {
                            return Ok(self.outcome(code, last_scn, confirmed, records));
                        }
                        RedoCode::Ok => {
                            // Reader went back to sleep without a terminal
                            // code: treat as a stop for this file.
                            return Ok(self.outcome(
                                RedoCode::Stopped,
                                last_scn,
                                confirmed,
                                records,
                            ));
                        }
                        error => {
                            return Err(self.reader_error(error, confirmed));
                        }
                    }
                }
            }
        }
    }

    fn outcome(
        &self,
        code: RedoCode,
        last_scn: Option<Scn>,
        confirmed: u64,
        records: u64,
    ) -> ParseOutcome {
        debug!(
            sequence = self.sequence.get(),
            code = %code,
            records,
            confirmed,
            "log parse ended"
        );
        ParseOutcome {
            code,
            last_scn,
            confirmed,
            records,
        }
    }

    fn reader_error(&self, code: RedoCode, confirmed: u64) -> FerroError {
        FerroError::MalformedRecord {
            opcode: "-".into(),
            sequence: self.sequence,
            offset: FileOffset(confirmed),
            detail: format!("reader failed with {code}"),
        }
    }

    fn dispatch(
        &mut self,
        record: &RecordHeader,
        payload: &[u8],
        endian: ferroredo_reader::Endian,
        position: RecordPosition,
    ) -> Result<()> {
        let mut cursor = FieldCursor::new(payload, record, endian, position);
        trace!(
            opcode = %record.opcode,
            scn = record.scn.get(),
            xid = %record.xid,
            "record"
        );

        match record.opcode {
            RedoOpCode::KtbBegin => {
                self.buffer.begin(record.xid, record.scn);
            }
            RedoOpCode::KtbCommit => {
                let control = cursor.next_field("transaction control")?;
                let flags = if control.len() >= 2 {
                    endian.read_u16(control, 0)
                } else {
                    0
                };
                if flags & 0x0001 != 0 {
                    self.buffer.rollback(record.xid);
                } else {
                    self.buffer
                        .commit(record.xid, record.scn, record.subscn);
                }
            }
            RedoOpCode::KdoInsert | RedoOpCode::KdoDelete | RedoOpCode::KdoUpdate => {
                let _ktb = cursor.next_field("transaction control")?;
                let Some(kdo) = cursor.next_field_opt()? else {
                    // A bare undo header update carries no row image.
                    return Ok(());
                };
                let row =
                    decode_row_image(kdo, endian, self.decoder, record.opcode, position)?;
                let op = match record.opcode {
                    RedoOpCode::KdoInsert => RowOp::Insert,
                    RedoOpCode::KdoDelete => RowOp::Delete,
                    _ => RowOp::Update,
                };
                self.push_change(record, position, op, row.object_id, row.columns)?;
            }
            RedoOpCode::KdoInsertMulti | RedoOpCode::KdoDeleteMulti => {
                let _ktb = cursor.next_field("transaction control")?;
                let head = cursor.next_field("multi-row header")?;
                if head.len() < 2 {
                    return Err(malformed_op(
                        record.opcode,
                        position,
                        "multi-row header too short".into(),
                    ));
                }
                let row_count = endian.read_u16(head, 0);
                let op = if record.opcode == RedoOpCode::KdoInsertMulti {
                    RowOp::Insert
                } else {
                    RowOp::Delete
                };
                for _ in 0..row_count {
                    let row_field = cursor.next_field("row image")?;
                    let row = decode_row_image(
                        row_field,
                        endian,
                        self.decoder,
                        record.opcode,
                        position,
                    )?;
                    self.push_change(record, position, op, row.object_id, row.columns)?;
                }
            }
            RedoOpCode::LobWrite => {
                let _ktb = cursor.next_field("transaction control")?;
                let piece = cursor.next_field("lob piece")?;
                if piece.len() < 8 {
                    return Err(malformed_op(
                        record.opcode,
                        position,
                        "lob piece header too short".into(),
                    ));
                }
                let object_id = endian.read_u32(piece, 0);
                let column = endian.read_u16(piece, 4);
                let bytes = piece[8..].to_vec();
                self.push_change(
                    record,
                    position,
                    RowOp::Update,
                    object_id,
                    vec![Column {
                        index: column,
                        value: ColValue::Bytes(bytes),
                    }],
                )?;
            }
            RedoOpCode::Ddl => {
                let text_field = cursor.next_field("ddl text")?;
                let text = self.decoder.decode(text_field).map_err(|e| {
                    malformed_op(record.opcode, position, e.to_string())
                })?;
                if let Some(hook) = self.on_ddl.as_mut() {
                    hook();
                }
                self.push_change(
                    record,
                    position,
                    RowOp::Ddl,
                    0,
                    vec![Column {
                        index: 0,
                        value: ColValue::Text(text),
                    }],
                )?;
            }
            RedoOpCode::KdoSupplemental => {
                // Supplemental logging data attaches to the previous row
                // operation; nothing to emit on its own.
            }
            RedoOpCode::Other(raw) => {
                warn!(
                    opcode = format_args!("{}.{}", raw >> 8, raw & 0xFF),
                    scn = record.scn.get(),
                    "skipping undecoded opcode"
                );
            }
        }
        Ok(())
    }

    fn push_change(
        &mut self,
        record: &RecordHeader,
        position: RecordPosition,
        op: RowOp,
        object_id: u32,
        columns: Vec<Column>,
    ) -> Result<()> {
        let change = RowChange {
            scn: record.scn,
            subscn: record.subscn,
            position,
            op,
            object_id,
            columns,
        };
        self.buffer.change(record.xid, &change, &self.shutdown)
    }
}
