//! The replication loop for one instance.
//!
//! Per iteration: follow a resetlogs fork if the stream crossed one, drain
//! the archived-log queue in ascending sequence (stale entries dropped,
//! gaps re-discovered after a bounded wait), then serve the online group
//! whose sequence matches the expected one. An `Overwritten` from an
//! online read falls back to the archived copy of the same sequence.
//!
//! Threads per instance: one per reader, one builder, one writer, and this
//! loop (which also runs the parser for the active log).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ferroredo_builder::{Builder, BuilderConfig, Dictionary, MessagePosition, MessageQueue, OutputFormat};
use ferroredo_error::{FerroError, Result};
use ferroredo_meta::{CheckpointStore, IncarnationSet, Metadata, WriterMark};
use ferroredo_parser::{decoder_from_env, LogParser};
use ferroredo_reader::{LogGroup, Reader, ReaderConfig, RedoCode};
use ferroredo_source::{BlockSource, RetryPolicy, SourceHandle};
use ferroredo_txn::{ChunkPool, PoolConfig, TransactionBuffer};
use ferroredo_types::{Seq, Shutdown};
use ferroredo_writer::{run_file_writer, FileWriter, FileWriterConfig, Newline};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::discover::{discover_archive_dir, discover_batch, ArchivedLog, PathMapper};
use crate::pipeline::{run_builder, QueueSink, TxnQueue};

/// Consecutive discovery rounds a sequence gap may persist before the
/// instance gives up.
const GAP_ROUNDS_MAX: u32 = 50;

/// `disable-checks` bit for block checksum verification.
const DISABLE_BLOCK_SUM: u64 = 0x01;

/// One running pipeline instance.
pub struct Replicator<S: BlockSource + Clone + 'static> {
    config: Config,
    source: S,
    shutdown: Arc<Shutdown>,
    /// Set by the DDL hook; external schema tooling reloads and clears it.
    schema_stale: Arc<AtomicBool>,
}

struct Workers {
    builder_thread: JoinHandle<Result<()>>,
    writer_thread: JoinHandle<Result<()>>,
    txn_queue: Arc<TxnQueue>,
    msg_queue: Arc<MessageQueue>,
}

impl<S: BlockSource + Clone + 'static> Replicator<S> {
    pub fn new(config: Config, source: S, shutdown: Arc<Shutdown>) -> Self {
        Self {
            config,
            source,
            shutdown,
            schema_stale: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn schema_stale(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.schema_stale)
    }

    /// Run the pipeline to completion (soft shutdown, stop-log-switches,
    /// or batch end).
    pub fn run(&self) -> Result<()> {
        let source_cfg = self.config.the_source();
        let target_cfg = self.config.the_target();
        info!(
            database = %source_cfg.name,
            mode = %source_cfg.reader.kind,
            "replication starting"
        );

        // Memory pool shared by readers and the transaction buffer.
        let pool = ChunkPool::new(PoolConfig {
            chunk_size: ferroredo_txn::DEFAULT_CHUNK_SIZE,
            min_chunks: source_cfg.memory.min_mb as usize,
            max_chunks: source_cfg.memory.max_mb as usize,
            reader_max: source_cfg.memory.read_buffer_max_mb as usize,
        })?;

        // Position metadata.
        let checkpoint_path = target_cfg.checkpoint_path.clone().unwrap_or_else(|| {
            target_cfg
                .writer
                .output
                .parent()
                .map(|p| p.join(format!("{}-checkpoint.json", source_cfg.name)))
                .unwrap_or_else(|| format!("{}-checkpoint.json", source_cfg.name).into())
        });
        let meta = Metadata::open(CheckpointStore::new(checkpoint_path))?;
        meta.set_incarnations(IncarnationSet::new(self.config.incarnations()));
        let recovery_mark = self.boot(&meta, source_cfg)?;
        if self.shutdown.soft_requested() {
            return Ok(());
        }

        let workers = self.spawn_workers(&pool, recovery_mark)?;
        let result = self.replicate(&pool, &meta, &workers);

        // Orderly drain: no more transactions, then no more messages.
        workers.txn_queue.close();
        let builder_result = workers
            .builder_thread
            .join()
            .map_err(|_| FerroError::internal("builder thread panicked"))?;
        workers.msg_queue.close();
        let writer_result = workers
            .writer_thread
            .join()
            .map_err(|_| FerroError::internal("writer thread panicked"))?;

        result.and(builder_result).and(writer_result)?;
        info!(database = %source_cfg.name, "replication stopped");
        Ok(())
    }

    /// Resolve the starting position. Returns the recovery watermark when
    /// resuming from a checkpoint.
    fn boot(
        &self,
        meta: &Arc<Metadata>,
        source_cfg: &crate::config::SourceConfig,
    ) -> Result<Option<WriterMark>> {
        if meta.is_positioned() {
            info!(
                sequence = meta.sequence().get(),
                offset = meta.offset(),
                "resuming from checkpoint"
            );
            let mark = meta.confirmed();
            meta.allow_checkpoints();
            return Ok(mark);
        }

        if source_cfg.start_seq > 0 {
            meta.set_position(Seq(source_cfg.start_seq), 0);
            meta.allow_checkpoints();
            return Ok(None);
        }

        if source_cfg.start_scn > 0 {
            if let Some(sequence) = self.sequence_holding_scn(source_cfg.start_scn) {
                info!(
                    scn = source_cfg.start_scn,
                    sequence = sequence.get(),
                    "starting at the log covering the requested scn"
                );
                meta.set_position(sequence, 0);
                meta.allow_checkpoints();
                return Ok(None);
            }
            warn!(scn = source_cfg.start_scn, "no archived log covers the requested scn");
        }

        // Discover the lowest available archived sequence.
        let logs = self.discover(Seq::ZERO);
        match logs.first() {
            Some(first) => {
                info!(sequence = first.sequence.get(), "starting at first discovered sequence");
                meta.set_position(first.sequence, 0);
                meta.allow_checkpoints();
                Ok(None)
            }
            None if source_cfg.boot_failsafe => {
                warn!(
                    code = FerroError::UnknownStartSequence.code(),
                    "replication startup failed, waiting for further commands"
                );
                // Parked: ready, awaiting commands.
                while !self.shutdown.soft_requested() {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Ok(None)
            }
            None => Err(FerroError::UnknownStartSequence),
        }
    }

    /// Probe archived headers for the log whose `[first, next)` SCN window
    /// contains `scn`.
    fn sequence_holding_scn(&self, scn: u64) -> Option<Seq> {
        let Some(scn) = ferroredo_types::Scn::new(scn) else {
            return None;
        };
        for log in self.discover(Seq::ZERO) {
            let Ok(mut handle) = self.source.open(&log.path) else {
                continue;
            };
            let mut probe = vec![0u8; ferroredo_reader::HEADER_PROBE_LEN];
            let Ok(n) = handle.read_at(&mut probe, 0) else {
                continue;
            };
            probe.truncate(n);
            let Ok(ferroredo_reader::HeaderOutcome::Ready(header)) =
                ferroredo_reader::header::parse_file_header(&probe, &log.path)
            else {
                continue;
            };
            let past_first = header.first_scn <= scn;
            let before_next = header.next_scn.map_or(true, |next| scn < next);
            if past_first && before_next {
                return Some(log.sequence);
            }
        }
        None
    }

    fn spawn_workers(&self, pool: &ChunkPool, recovery: Option<WriterMark>) -> Result<Workers> {
        let target_cfg = self.config.the_target();

        let msg_queue = MessageQueue::new(1024, Arc::clone(&self.shutdown));
        let txn_queue = TxnQueue::new(64, Arc::clone(&self.shutdown));

        let mut builder = Builder::new(
            Dictionary::new(self.config.dictionary()),
            BuilderConfig {
                format: if target_cfg.writer.format == "binary" {
                    OutputFormat::LengthPrefixed
                } else {
                    OutputFormat::Json
                },
                queue_depth: 1024,
            },
            Arc::clone(&msg_queue),
        );
        if let Some(mark) = recovery {
            builder.skip_confirmed_below(MessagePosition::new(
                mark.sequence,
                mark.offset,
                mark.row,
            ));
        }

        let mut writer = FileWriter::new(FileWriterConfig {
            output: target_cfg.writer.output.clone(),
            max_file_size: target_cfg.writer.max_file_size,
            newline: Newline::from_config(target_cfg.writer.new_line)?,
            rotate_on_sequence: target_cfg.writer.rotate_on_sequence,
            flush_threshold: target_cfg.writer.flush_buffer_size as usize,
        })?;

        let shutdown = Arc::clone(&self.shutdown);
        let builder_queue = Arc::clone(&txn_queue);
        let builder_thread = std::thread::Builder::new()
            .name("builder".into())
            .spawn(move || {
                let result = run_builder(&builder_queue, &mut builder);
                if let Err(err) = &result {
                    error!(code = err.code(), "builder failed: {err}");
                    shutdown.stop_hard();
                }
                result
            })
            .map_err(|e| FerroError::internal(e.to_string()))?;

        let shutdown = Arc::clone(&self.shutdown);
        let writer_queue = Arc::clone(&msg_queue);
        let writer_thread = std::thread::Builder::new()
            .name("writer".into())
            .spawn(move || {
                let result = run_file_writer(&writer_queue, &mut writer);
                if let Err(err) = &result {
                    error!(code = err.code(), "writer failed: {err}");
                    shutdown.stop_hard();
                }
                result
            })
            .map_err(|e| FerroError::internal(e.to_string()))?;

        Ok(Workers {
            builder_thread,
            writer_thread,
            txn_queue,
            msg_queue,
        })
    }

    fn reader_config(&self) -> ReaderConfig {
        let source_cfg = self.config.the_source();
        ReaderConfig {
            database: source_cfg.name.clone(),
            ring_chunks: source_cfg.memory.read_buffer_max_mb.max(2) as usize,
            verify_checksums: source_cfg.reader.disable_checks & DISABLE_BLOCK_SUM == 0,
            db_checksum_configured: source_cfg.reader.db_block_checksum,
            verify_delay: match source_cfg.reader.redo_verify_delay_us {
                0 => None,
                us => Some(Duration::from_micros(us)),
            },
            read_sleep: Duration::from_micros(source_cfg.reader.redo_read_sleep_us.max(1000)),
            copy_path: source_cfg.reader.redo_copy_path.clone(),
            retry: RetryPolicy::default(),
        }
    }

    fn spawn_reader(&self, pool: &ChunkPool, group: LogGroup) -> (Reader, JoinHandle<()>) {
        let reader = Reader::new(
            pool.clone(),
            self.reader_config(),
            group,
            Arc::clone(&self.shutdown),
        );
        let thread_reader = reader.clone();
        let thread_source = self.source.clone();
        let join = std::thread::Builder::new()
            .name(format!("reader-{group}"))
            .spawn(move || thread_reader.run(&thread_source))
            .expect("spawn reader thread");
        (reader, join)
    }

    fn discover(&self, min: Seq) -> Vec<ArchivedLog> {
        let source_cfg = self.config.the_source();
        let mapper = PathMapper::from_flat(&source_cfg.path_mapping);
        let format = &source_cfg.reader.log_archive_format;
        match source_cfg.reader.kind.as_str() {
            "archive" => {
                let dir = source_cfg
                    .reader
                    .archive_dir
                    .as_deref()
                    .expect("validated archive dir");
                discover_archive_dir(dir, format, min, &mapper)
            }
            _ => discover_batch(&source_cfg.reader.redo_log, format, min, &mapper),
        }
    }

    /// The main loop.
    fn replicate(
        &self,
        pool: &ChunkPool,
        meta: &Arc<Metadata>,
        workers: &Workers,
    ) -> Result<()> {
        let source_cfg = self.config.the_source();
        let is_batch = source_cfg.reader.kind == "batch";
        let arch_sleep = Duration::from_micros(source_cfg.reader.arch_read_sleep_us.max(1000));

        let (arch_reader, arch_join) = self.spawn_reader(pool, LogGroup::ARCHIVE);
        let mut reader_threads = vec![arch_join];
        let mut online: Vec<Reader> = Vec::new();
        for entry in &source_cfg.reader.online_log {
            let (reader, join) = self.spawn_reader(pool, LogGroup(entry.group));
            // The first readable member serves the group.
            for path in &entry.path {
                reader.set_file(path.clone());
                if reader.check_redo_log() {
                    break;
                }
            }
            online.push(reader);
            reader_threads.push(join);
        }

        let mut buffer = TransactionBuffer::new(pool.clone());
        let decoder = decoder_from_env();
        let mut switches_left = source_cfg.stop_log_switches;
        let mut gap_rounds = 0u32;
        let result = (|| -> Result<()> {
            loop {
                if self.shutdown.soft_requested() {
                    return Ok(());
                }
                let mut processed = false;
                meta.update_resetlogs()?;

                // Archived logs, ascending.
                let logs = self.discover(meta.sequence());
                for log in &logs {
                    if self.shutdown.soft_requested() {
                        return Ok(());
                    }
                    // After a resetlogs switch (or a cold start) the next
                    // branch starts at whatever sequence exists first.
                    if meta.sequence() == Seq::ZERO {
                        meta.set_position(log.sequence, 0);
                    }
                    let expected = meta.sequence();
                    if log.sequence < expected {
                        debug!(sequence = log.sequence.get(), "dropping stale archived log");
                        continue;
                    }
                    if log.sequence > expected {
                        if is_batch {
                            // Finite list: a future sequence is out of
                            // range for this run, not worth waiting on.
                            warn!(
                                expected = expected.get(),
                                found = log.sequence.get(),
                                "dropping out-of-range archived log"
                            );
                            break;
                        }
                        gap_rounds += 1;
                        if gap_rounds >= GAP_ROUNDS_MAX {
                            return Err(FerroError::CheckpointInconsistent {
                                detail: format!(
                                    "archived log gap: expected seq {expected}, lowest found {}",
                                    log.sequence
                                ),
                            });
                        }
                        warn!(
                            expected = expected.get(),
                            found = log.sequence.get(),
                            "archived log gap, waiting for re-discovery"
                        );
                        self.sleep(arch_sleep);
                        break;
                    }
                    gap_rounds = 0;
                    let code =
                        self.process_log(&arch_reader, &log.path, meta, workers, &mut buffer, decoder.as_ref())?;
                    match code {
                        RedoCode::Finished => {
                            processed = true;
                            self.advance_checkpoint(meta, workers, &mut buffer)?;
                            if self.count_switch(&mut switches_left) {
                                return Ok(());
                            }
                        }
                        RedoCode::Shutdown => return Ok(()),
                        other => {
                            return Err(FerroError::CheckpointInconsistent {
                                detail: format!(
                                    "archived log {} ended with {other}",
                                    log.path.display()
                                ),
                            });
                        }
                    }
                }

                // Online logs: the group holding the expected sequence.
                if !online.is_empty() && !self.shutdown.soft_requested() {
                    match self.process_online(&online, meta, workers, &mut buffer, decoder.as_ref())? {
                        OnlineOutcome::Processed => {
                            processed = true;
                            self.advance_checkpoint(meta, workers, &mut buffer)?;
                            if self.count_switch(&mut switches_left) {
                                return Ok(());
                            }
                        }
                        OnlineOutcome::FellBack => {
                            // Overwritten mid-read: archive pass next round.
                            processed = true;
                        }
                        OnlineOutcome::Idle => {}
                        OnlineOutcome::Shutdown => return Ok(()),
                    }
                }

                if is_batch && online.is_empty() && !processed {
                    // Batch mode: everything listed has been consumed.
                    info!("batch replication complete");
                    return Ok(());
                }
                if !processed {
                    debug!("no redo logs to process, waiting");
                    self.sleep(arch_sleep);
                }
            }
        })();

        // Stop readers before the queues close.
        self.shutdown.stop_soft();
        arch_reader.wake_up();
        for reader in &online {
            reader.wake_up();
        }
        for join in reader_threads {
            let _ = join.join();
        }
        buffer.purge();
        result
    }

    /// Parse one log file through the pipeline. Returns the terminal code.
    #[allow(clippy::too_many_arguments)]
    fn process_log(
        &self,
        reader: &Reader,
        path: &std::path::Path,
        meta: &Arc<Metadata>,
        workers: &Workers,
        buffer: &mut TransactionBuffer,
        decoder: &dyn ferroredo_parser::CharacterDecoder,
    ) -> Result<RedoCode> {
        let sequence = meta.sequence();
        reader.set_file(path);
        if !reader.check_redo_log() {
            return Err(FerroError::CheckpointInconsistent {
                detail: format!("can't read redo log {}", path.display()),
            });
        }
        if !reader.update_redo_log() {
            let code = reader.control().snapshot().ret;
            if code == RedoCode::Overwritten {
                return Ok(RedoCode::Overwritten);
            }
            return Err(FerroError::CheckpointInconsistent {
                detail: format!("header update failed for {} ({code})", path.display()),
            });
        }

        // Guard against a file that is not the sequence we expect.
        let header_seq = reader.sequence();
        if header_seq != sequence && sequence != Seq::ZERO {
            return Err(FerroError::HeaderMismatch {
                path: path.to_path_buf(),
                what: "sequence",
                found: header_seq.to_string(),
                expected: sequence.to_string(),
            });
        }

        // The first observed header fixes the incarnation we start on.
        if meta.resetlogs() == ferroredo_types::Resetlogs(0) {
            if let Some(header) = reader.header() {
                meta.set_resetlogs(header.resetlogs);
            }
        }

        // Resume mid-file when the checkpoint says so.
        let block_size = reader
            .header()
            .map(|h| h.block_size.get() as u64)
            .unwrap_or(512);
        let start = if meta.offset() > block_size * 2 && meta.sequence() == header_seq {
            meta.offset()
        } else {
            block_size * 2
        };
        reader.control().position_window(start);
        reader.set_status_read();

        let outcome = {
            let mut sink = QueueSink::new(Arc::clone(&workers.txn_queue));
            let schema_stale = Arc::clone(&self.schema_stale);
            let mut parser = LogParser::new(
                reader,
                buffer,
                &mut sink,
                decoder,
                Arc::clone(&self.shutdown),
            )
            .with_ddl_hook(move || schema_stale.store(true, Ordering::Release));
            parser.parse(start)?
        };

        debug!(
            sequence = sequence.get(),
            code = %outcome.code,
            records = outcome.records,
            "log processed"
        );
        match outcome.code {
            RedoCode::Finished => {
                meta.set_scns(reader.first_scn(), reader.next_scn());
                meta.set_position(header_seq.next(), 0);
                Ok(RedoCode::Finished)
            }
            RedoCode::Overwritten => {
                // Resume the same sequence from the archive at the offset
                // the parser confirmed.
                meta.set_position(header_seq, outcome.confirmed);
                Ok(RedoCode::Overwritten)
            }
            other => Ok(other),
        }
    }

    fn process_online(
        &self,
        online: &[Reader],
        meta: &Arc<Metadata>,
        workers: &Workers,
        buffer: &mut TransactionBuffer,
        decoder: &dyn ferroredo_parser::CharacterDecoder,
    ) -> Result<OnlineOutcome> {
        let expected = meta.sequence();
        for reader in online {
            if !reader.update_redo_log() {
                continue;
            }
            if reader.sequence() != expected {
                continue;
            }
            let path = reader.path();
            let code = self.process_log(reader, &path, meta, workers, buffer, decoder)?;
            return Ok(match code {
                RedoCode::Finished => OnlineOutcome::Processed,
                RedoCode::Overwritten => OnlineOutcome::FellBack,
                RedoCode::Shutdown => OnlineOutcome::Shutdown,
                other => {
                    return Err(FerroError::CheckpointInconsistent {
                        detail: format!("online log {} ended with {other}", path.display()),
                    })
                }
            });
        }
        Ok(OnlineOutcome::Idle)
    }

    /// Quiesce the downstream and persist the checkpoint, but only at a
    /// safe point: no open transactions may span the position.
    fn advance_checkpoint(
        &self,
        meta: &Arc<Metadata>,
        workers: &Workers,
        buffer: &mut TransactionBuffer,
    ) -> Result<()> {
        if buffer.open_count() > 0 {
            debug!(
                open = buffer.open_count(),
                "checkpoint held back by open transactions"
            );
            return Ok(());
        }
        // Wait for the builder and writer to drain what we emitted.
        let deadline = std::time::Instant::now() + Duration::from_secs(30);
        while !(workers.txn_queue.is_empty() && workers.msg_queue.is_empty()) {
            if self.shutdown.hard_requested() || std::time::Instant::now() > deadline {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        // One idle slice lets the writer flush and confirm.
        std::thread::sleep(Duration::from_millis(120));
        let mark = workers.msg_queue.confirmed().map(|p| WriterMark {
            sequence: p.sequence,
            offset: p.offset,
            row: p.row,
        });
        meta.advance(meta.sequence(), meta.offset(), None, None, mark)
    }

    fn count_switch(&self, switches_left: &mut u64) -> bool {
        if *switches_left == 0 {
            return false;
        }
        *switches_left -= 1;
        if *switches_left == 0 {
            info!("stop-log-switches reached, requesting soft shutdown");
            self.shutdown.stop_soft();
            return true;
        }
        false
    }

    fn sleep(&self, total: Duration) {
        let slice = Duration::from_millis(50);
        let mut remaining = total;
        while !remaining.is_zero() && !self.shutdown.soft_requested() {
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnlineOutcome {
    Processed,
    FellBack,
    Idle,
    Shutdown,
}
