//! The builder: renders committed transactions to output messages.
//!
//! Each change of a committed transaction becomes one message tagged with
//! (scn, sequence, offset, table, operation) and an xxh3-64 build
//! fingerprint. On crash recovery the writer reports its last confirmed
//! position and the builder drops every re-rendered message at or below
//! it, which makes restart output byte-identical from that point on.
//!
//! The transaction's chain stays owned by the builder until the writer
//! confirms the transaction's last message; only then do its chunks return
//! to the pool.

use std::collections::VecDeque;
use std::sync::Arc;

use ferroredo_error::Result;
use ferroredo_txn::CommittedTxn;
use ferroredo_types::{ColValue, RowChange, RowOp, Xid};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::value::RawValue;
use tracing::{debug, trace, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::dictionary::Dictionary;
use crate::message::{MessagePosition, OutputMessage};
use crate::queue::MessageQueue;

/// Output rendering contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON document per message.
    Json,
    /// u32 little-endian length prefix, then the JSON document.
    LengthPrefixed,
}

/// Builder configuration.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub format: OutputFormat,
    /// Messages in flight to the writer before the builder blocks.
    pub queue_depth: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Json,
            queue_depth: 1024,
        }
    }
}

/// Renders committed transactions and feeds the writer queue.
pub struct Builder {
    dictionary: Dictionary,
    config: BuilderConfig,
    queue: Arc<MessageQueue>,
    /// Recovery watermark: drop re-rendered messages at or below this.
    skip_below: Option<MessagePosition>,
    /// Transactions whose chains wait for writer confirmation, with the
    /// position of their last message.
    retained: VecDeque<(MessagePosition, CommittedTxn)>,
    skipped: u64,
}

impl Builder {
    pub fn new(dictionary: Dictionary, config: BuilderConfig, queue: Arc<MessageQueue>) -> Self {
        Self {
            dictionary,
            config,
            queue,
            skip_below: None,
            retained: VecDeque::new(),
            skipped: 0,
        }
    }

    /// Arm recovery dedup from the persisted writer watermark.
    pub fn skip_confirmed_below(&mut self, watermark: MessagePosition) {
        debug!(%watermark, "builder will skip messages at or below the confirmed watermark");
        self.skip_below = Some(watermark);
    }

    pub fn dictionary_mut(&mut self) -> &mut Dictionary {
        &mut self.dictionary
    }

    /// Messages dropped by recovery dedup so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Transactions still held for writer confirmation.
    pub fn retained(&self) -> usize {
        self.retained.len()
    }

    /// Render one committed transaction in chain order.
    pub fn process(&mut self, txn: CommittedTxn) -> Result<()> {
        let mut last_position: Option<MessagePosition> = None;
        // Row index disambiguates the several messages a multi-row record
        // produces from one file offset.
        let mut row_at_offset: Option<(u64, u32)> = None;

        for entry in txn.chain.iter() {
            let change = entry.map_err(|e| {
                ferroredo_error::FerroError::internal(format!(
                    "chain entry of {}: {e}",
                    txn.xid
                ))
            })?;

            let offset = change.position.offset.get();
            let row = match &mut row_at_offset {
                Some((at, row)) if *at == offset => {
                    *row += 1;
                    *row
                }
                _ => {
                    row_at_offset = Some((offset, 0));
                    0
                }
            };
            let position = MessagePosition::new(change.position.sequence, offset, row);

            if self.skip_below.is_some_and(|w| position <= w) {
                self.skipped += 1;
                trace!(%position, "skipping message below confirmed watermark");
                continue;
            }

            let Some(bytes) = self.render(&change, txn.xid)? else {
                continue; // table outside the replicated set
            };
            let fingerprint = xxh3_64(&bytes);
            self.queue.push(OutputMessage {
                scn: change.scn,
                subscn: change.subscn,
                position,
                op: change.op,
                table: self
                    .dictionary
                    .resolve(change.object_id)
                    .map(|t| t.qualified_name())
                    .unwrap_or_default(),
                fingerprint,
                bytes,
            })?;
            last_position = Some(position);
        }

        match last_position {
            Some(position) => self.retained.push_back((position, txn)),
            // Everything skipped or filtered: the chain can go right away.
            None => drop(txn),
        }
        self.release_confirmed();
        Ok(())
    }

    /// Drop retained transactions whose last message the writer confirmed.
    pub fn release_confirmed(&mut self) {
        let Some(confirmed) = self.queue.confirmed() else {
            return;
        };
        while let Some((last, _)) = self.retained.front() {
            if *last > confirmed {
                break;
            }
            let (_, txn) = self.retained.pop_front().expect("front exists");
            trace!(xid = %txn.xid, "transaction chain released after confirmation");
            drop(txn);
        }
    }

    /// Render a change into output bytes; `None` filters it out.
    fn render(&self, change: &RowChange, xid: Xid) -> Result<Option<Vec<u8>>> {
        let (table, ddl, columns) = if change.op == RowOp::Ddl {
            let text = change
                .columns
                .first()
                .and_then(|c| match &c.value {
                    ColValue::Text(t) => Some(t.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            (None, Some(text), None)
        } else {
            let Some(table) = self.dictionary.resolve(change.object_id) else {
                trace!(
                    object_id = change.object_id,
                    "change on unreplicated object filtered"
                );
                return Ok(None);
            };
            let mut columns = Vec::with_capacity(change.columns.len());
            for col in &change.columns {
                let name = self.dictionary.column_name(change.object_id, col.index);
                let value = match &col.value {
                    ColValue::Null => JsonCol::Null,
                    ColValue::Text(t) => JsonCol::Text(t.clone()),
                    // A decimal literal is valid JSON; embedding it raw
                    // keeps arbitrary precision intact.
                    ColValue::Number(n) => JsonCol::Number(
                        RawValue::from_string(n.clone())
                            .map_err(|e| ferroredo_error::FerroError::internal(e.to_string()))?,
                    ),
                    ColValue::Bytes(b) => JsonCol::Text(hex_string(b)),
                };
                columns.push((name, value));
            }
            (Some(table.qualified_name()), None, Some(ColumnMap(columns)))
        };

        let doc = MessageDoc {
            scn: change.scn.get(),
            subscn: change.subscn.0,
            seq: change.position.sequence.get(),
            offset: change.position.offset.get(),
            xid: xid.to_string(),
            op: change.op.as_str(),
            table,
            ddl,
            columns,
        };
        let json = serde_json::to_vec(&doc)
            .map_err(|e| ferroredo_error::FerroError::internal(e.to_string()))?;
        Ok(Some(match self.config.format {
            OutputFormat::Json => json,
            OutputFormat::LengthPrefixed => {
                let mut framed = Vec::with_capacity(4 + json.len());
                framed.extend_from_slice(&(json.len() as u32).to_le_bytes());
                framed.extend_from_slice(&json);
                framed
            }
        }))
    }
}

/// One output document. Field order here is the wire order.
#[derive(serde::Serialize)]
struct MessageDoc<'a> {
    scn: u64,
    subscn: u16,
    seq: u32,
    offset: u64,
    xid: String,
    op: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ddl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    columns: Option<ColumnMap>,
}

/// Columns in declaration order.
struct ColumnMap(Vec<(String, JsonCol)>);

enum JsonCol {
    Null,
    Text(String),
    Number(Box<RawValue>),
}

impl Serialize for ColumnMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for JsonCol {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Text(t) => serializer.serialize_str(t),
            Self::Number(raw) => raw.serialize(serializer),
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::TableDef;
    use ferroredo_txn::{ChunkPool, TransactionBuffer};
    use ferroredo_types::{
        Column, FileOffset, RecordPosition, Scn, Seq, Shutdown, SubScn,
    };
    use std::collections::HashMap;

    fn dict() -> Dictionary {
        let mut tables = HashMap::new();
        tables.insert(
            777,
            TableDef {
                owner: "USR1".into(),
                name: "ADAM".into(),
                columns: vec!["A".into(), "B".into(), "C".into()],
            },
        );
        Dictionary::new(tables)
    }

    fn change(scn: u64, offset: u64, object_id: u32) -> RowChange {
        RowChange {
            scn: Scn::new(scn).unwrap(),
            subscn: SubScn(0),
            position: RecordPosition::new(Seq(5), FileOffset(offset)),
            op: RowOp::Insert,
            object_id,
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
            ],
        }
    }

    fn committed(changes: &[RowChange]) -> CommittedTxn {
        let pool = ChunkPool::for_tests(4096, 16);
        let shutdown = Shutdown::new();
        let mut buffer = TransactionBuffer::new(pool);
        let xid = ferroredo_types::Xid::new(1, 2, 3);
        for c in changes {
            buffer.change(xid, c, &shutdown).unwrap();
        }
        let last = changes.last().map(|c| c.scn).unwrap_or(Scn::ZERO);
        buffer.commit(xid, last, SubScn(0));
        buffer.take_all_committed().remove(0)
    }

    fn builder_with_queue(format: OutputFormat) -> (Builder, Arc<MessageQueue>) {
        let queue = MessageQueue::new(64, Shutdown::new());
        let builder = Builder::new(
            dict(),
            BuilderConfig {
                format,
                queue_depth: 64,
            },
            Arc::clone(&queue),
        );
        (builder, queue)
    }

    #[test]
    fn renders_columns_in_declaration_order_with_null() {
        let (mut builder, queue) = builder_with_queue(OutputFormat::Json);
        builder.process(committed(&[change(1001, 1024, 777)])).unwrap();

        let msg = queue.pop().unwrap();
        let text = String::from_utf8(msg.bytes.clone()).unwrap();
        assert_eq!(msg.table, "USR1.ADAM");
        assert_eq!(msg.op, RowOp::Insert);
        let a = text.find("\"A\"").unwrap();
        let b = text.find("\"B\"").unwrap();
        let c = text.find("\"C\"").unwrap();
        assert!(a < b && b < c, "declaration order in {text}");
        assert!(text.contains("\"C\":null"), "NULL renders as null: {text}");
        assert!(text.contains("\"A\":101"), "NUMBER renders as number: {text}");
        assert!(text.contains("\"op\":\"INSERT\""));
        assert!(text.contains("\"scn\":1001"));
    }

    #[test]
    fn fingerprint_is_stable() {
        let (mut b1, q1) = builder_with_queue(OutputFormat::Json);
        let (mut b2, q2) = builder_with_queue(OutputFormat::Json);
        b1.process(committed(&[change(1, 512, 777)])).unwrap();
        b2.process(committed(&[change(1, 512, 777)])).unwrap();
        assert_eq!(q1.pop().unwrap().fingerprint, q2.pop().unwrap().fingerprint);
    }

    #[test]
    fn length_prefixed_frames() {
        let (mut builder, queue) = builder_with_queue(OutputFormat::LengthPrefixed);
        builder.process(committed(&[change(1, 512, 777)])).unwrap();
        let msg = queue.pop().unwrap();
        let len = u32::from_le_bytes(msg.bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(len, msg.bytes.len() - 4);
        assert!(serde_json::from_slice::<serde_json::Value>(&msg.bytes[4..]).is_ok());
    }

    #[test]
    fn unreplicated_objects_are_filtered() {
        let (mut builder, queue) = builder_with_queue(OutputFormat::Json);
        builder.process(committed(&[change(1, 512, 999)])).unwrap();
        assert!(queue.is_empty());
        assert_eq!(builder.retained(), 0);
    }

    #[test]
    fn recovery_watermark_skips_replayed_messages() {
        let (mut builder, queue) = builder_with_queue(OutputFormat::Json);
        builder.skip_confirmed_below(MessagePosition::new(Seq(5), 1024, 0));

        builder
            .process(committed(&[
                change(1, 512, 777),
                change(2, 1024, 777),
                change(3, 2048, 777),
            ]))
            .unwrap();

        // Only the message past the watermark survives.
        assert_eq!(builder.skipped(), 2);
        let msg = queue.pop().unwrap();
        assert_eq!(msg.position, MessagePosition::new(Seq(5), 2048, 0));
        assert!(queue.is_empty());
    }

    #[test]
    fn multirow_messages_get_distinct_positions() {
        let (mut builder, queue) = builder_with_queue(OutputFormat::Json);
        builder
            .process(committed(&[
                change(1, 512, 777),
                change(1, 512, 777),
                change(2, 1024, 777),
            ]))
            .unwrap();
        let p1 = queue.pop().unwrap().position;
        let p2 = queue.pop().unwrap().position;
        let p3 = queue.pop().unwrap().position;
        assert_eq!(p1, MessagePosition::new(Seq(5), 512, 0));
        assert_eq!(p2, MessagePosition::new(Seq(5), 512, 1));
        assert_eq!(p3, MessagePosition::new(Seq(5), 1024, 0));
    }

    #[test]
    fn chains_release_only_after_confirmation() {
        let pool = ChunkPool::for_tests(4096, 16);
        let shutdown = Shutdown::new();
        let mut buffer = TransactionBuffer::new(pool.clone());
        let xid = ferroredo_types::Xid::new(1, 2, 3);
        for c in [change(1, 512, 777), change(2, 1024, 777)] {
            buffer.change(xid, &c, &shutdown).unwrap();
        }
        buffer.commit(xid, Scn::new(2).unwrap(), SubScn(0));
        let txn = buffer.take_all_committed().remove(0);

        let queue = MessageQueue::new(64, Shutdown::new());
        let mut builder = Builder::new(dict(), BuilderConfig::default(), Arc::clone(&queue));
        builder.process(txn).unwrap();

        assert_eq!(builder.retained(), 1);
        assert!(pool.in_use_total() > 0, "chain still held");

        queue.confirm(MessagePosition::new(Seq(5), 1024, 0));
        builder.release_confirmed();
        assert_eq!(builder.retained(), 0);
        assert_eq!(pool.in_use_total(), 0, "chain returned after confirm");
    }

    #[test]
    fn ddl_marker_renders_statement() {
        let (mut builder, queue) = builder_with_queue(OutputFormat::Json);
        let ddl = RowChange {
            op: RowOp::Ddl,
            object_id: 0,
            columns: vec![Column {
                index: 0,
                value: ColValue::Text("DROP TABLE t".into()),
            }],
            ..change(9, 4096, 0)
        };
        builder.process(committed(&[ddl])).unwrap();
        let msg = queue.pop().unwrap();
        let text = String::from_utf8(msg.bytes).unwrap();
        assert!(text.contains("\"op\":\"DDL\""));
        assert!(text.contains("\"ddl\":\"DROP TABLE t\""));
    }
}
