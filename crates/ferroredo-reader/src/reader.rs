//! The reader thread: streams validated blocks into the ring buffer.
//!
//! One reader exists per online log group plus one shared by all archived
//! logs. The thread executes commands posted through the control block:
//! `Check` opens a file and validates its two-block header, `Update`
//! re-reads the header after a sequence switch and resets the window, and
//! `Read` streams blocks until end of file, overwrite, stop, or shutdown.

use std::collections::VecDeque;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferroredo_error::FerroError;
use ferroredo_source::{BlockSource, RetryPolicy, RetryingHandle, SourceHandle};
use ferroredo_txn::ChunkPool;
use ferroredo_types::{Scn, Seq, Shutdown};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::block::{BlockCheck, BlockValidator};
use crate::header::{parse_file_header, HeaderOutcome, RedoFileHeader, HEADER_PROBE_LEN};
use crate::ring::{ReaderControl, ReaderStatus, RingBuffer};
use crate::{LogGroup, RedoCode};

/// Consecutive CRC failures tolerated on header block 1 before giving up.
const BAD_CRC_MAX: u32 = 20;

/// Reader tunables for one pipeline instance.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Database name, used in copy-file names and hints.
    pub database: String,
    /// Ring capacity in pool chunks.
    pub ring_chunks: usize,
    /// Verify per-block checksums (`disable-checks` turns this off).
    pub verify_checksums: bool,
    /// Whether the database itself computes block checksums; drives the
    /// one-time operator hint on mismatch.
    pub db_checksum_configured: bool,
    /// Hold online blocks unpublished for this long after first read.
    pub verify_delay: Option<Duration>,
    /// Poll interval when an online log has no new blocks.
    pub read_sleep: Duration,
    /// Mirror validated blocks to `<copy_path>/<database>_<seq>.arc`.
    pub copy_path: Option<PathBuf>,
    /// Retry budget for transient read failures.
    pub retry: RetryPolicy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            database: "DB".into(),
            ring_chunks: 8,
            verify_checksums: true,
            db_checksum_configured: true,
            verify_delay: None,
            read_sleep: Duration::from_millis(50),
            copy_path: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-file state shared between the reader thread and the orchestrator.
#[derive(Debug, Default)]
struct FileInfo {
    path: PathBuf,
    file_size: u64,
    /// Sequence the file was opened at; `Seq::ZERO` until the header fixes it.
    sequence: Seq,
    header: Option<RedoFileHeader>,
    first_scn: Option<Scn>,
    next_scn: Option<Scn>,
    hint_displayed: bool,
}

struct ReaderInner {
    control: ReaderControl,
    ring: RingBuffer,
    info: Mutex<FileInfo>,
    config: ReaderConfig,
    group: LogGroup,
    shutdown: Arc<Shutdown>,
}

/// Handle to one reader. Clones share the same control block, ring, and
/// file state; the thread side runs [`Reader::run`].
#[derive(Clone)]
pub struct Reader {
    inner: Arc<ReaderInner>,
}

impl Reader {
    pub fn new(
        pool: ChunkPool,
        config: ReaderConfig,
        group: LogGroup,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        let ring = RingBuffer::new(pool, config.ring_chunks);
        let capacity = ring.capacity();
        let chunk_size = ring.chunk_size() as u64;
        Self {
            inner: Arc::new(ReaderInner {
                control: ReaderControl::new(capacity, chunk_size, Arc::clone(&shutdown)),
                ring,
                info: Mutex::new(FileInfo::default()),
                config,
                group,
                shutdown,
            }),
        }
    }

    #[inline]
    pub fn group(&self) -> LogGroup {
        self.inner.group
    }

    #[inline]
    pub fn control(&self) -> &ReaderControl {
        &self.inner.control
    }

    #[inline]
    pub fn ring(&self) -> &RingBuffer {
        &self.inner.ring
    }

    /// Point the reader at a file. Resets all header-derived state; the
    /// expected sequence is fixed by the next `Check`/`Update`.
    pub fn set_file(&self, path: impl Into<PathBuf>) {
        let mut info = self.inner.info.lock();
        info.path = path.into();
        info.sequence = Seq::ZERO;
        info.header = None;
        info.first_scn = None;
        info.next_scn = None;
        info.file_size = 0;
    }

    pub fn path(&self) -> PathBuf {
        self.inner.info.lock().path.clone()
    }

    pub fn sequence(&self) -> Seq {
        self.inner.info.lock().sequence
    }

    pub fn first_scn(&self) -> Option<Scn> {
        self.inner.info.lock().first_scn
    }

    pub fn next_scn(&self) -> Option<Scn> {
        self.inner.info.lock().next_scn
    }

    pub fn header(&self) -> Option<RedoFileHeader> {
        self.inner.info.lock().header.clone()
    }

    pub fn file_size(&self) -> u64 {
        self.inner.info.lock().file_size
    }

    /// Validate the file header; true when the file is readable.
    pub fn check_redo_log(&self) -> bool {
        self.inner.control.request_check() == RedoCode::Ok
    }

    /// Re-read the header (sequence switch); true when it is valid.
    pub fn update_redo_log(&self) -> bool {
        self.inner
            .control
            .request_update(self.inner.config.read_sleep)
            == RedoCode::Ok
    }

    pub fn set_status_read(&self) {
        self.inner.control.set_read();
    }

    /// Parser confirms consumption up to `offset`: advances the window and
    /// frees ring chunks below it.
    pub fn confirm_read_data(&self, offset: u64) {
        self.inner.control.confirm(offset);
        self.inner.ring.release_below(offset);
    }

    /// Confirm and test whether this file is fully drained.
    pub fn check_finished(&self, offset: u64) -> bool {
        self.inner.ring.release_below(offset);
        self.inner.control.check_finished(offset)
    }

    pub fn wake_up(&self) {
        self.inner.control.wake_all();
    }

    /// Thread body. Runs until soft shutdown.
    pub fn run<S: BlockSource>(&self, source: &S) {
        debug!(group = %self.inner.group, "reader thread start");
        let mut handle: Option<RetryingHandle<S::Handle>> = None;
        let mut copy: Option<CopyFile> = None;

        while let Some(cmd) = self.inner.control.take_command() {
            match cmd {
                ReaderStatus::Sleeping => {}
                ReaderStatus::Check => {
                    handle = None;
                    let ret = match self.open_current(source) {
                        Ok(mut h) => {
                            let ret = self.reload_header(&mut h, &mut copy);
                            handle = Some(h);
                            ret
                        }
                        Err(err) => {
                            error!(code = err.code(), group = %self.inner.group, "{err}");
                            RedoCode::ErrorRead
                        }
                    };
                    self.inner.control.finish_command(ret);
                }
                ReaderStatus::Update => {
                    copy = None;
                    if handle.is_none() {
                        handle = self.open_current(source).ok();
                    }
                    let ret = match handle.as_mut() {
                        Some(h) => self.reload_header(h, &mut copy),
                        None => RedoCode::ErrorRead,
                    };
                    if ret == RedoCode::Ok {
                        let header_end = self.block_size() as u64 * 2;
                        self.inner.control.reset_window(header_end);
                        self.inner.ring.clear();
                    }
                    self.inner.control.finish_command(ret);
                }
                ReaderStatus::Read => {
                    match handle.as_mut() {
                        Some(h) => self.read_loop(h, &mut copy),
                        None => self.inner.control.set_ret(RedoCode::ErrorRead),
                    }
                    self.inner.control.finish_read();
                }
            }
        }
        debug!(group = %self.inner.group, "reader thread stop");
    }

    fn block_size(&self) -> u32 {
        self.inner
            .info
            .lock()
            .header
            .as_ref()
            .map_or(0, |h| h.block_size.get())
    }

    fn open_current<S: BlockSource>(
        &self,
        source: &S,
    ) -> ferroredo_error::Result<RetryingHandle<S::Handle>> {
        let path = self.path();
        let handle = source.open(&path)?;
        let retrying = RetryingHandle::new(handle, path.clone(), self.inner.config.retry);
        let size = retrying.size()?;
        self.inner.info.lock().file_size = size;
        trace!(path = %path.display(), size, "redo file opened");
        Ok(retrying)
    }

    /// Read and validate the two-block file header, reconciling it against
    /// previously observed values.
    fn reload_header<H: SourceHandle>(
        &self,
        handle: &mut H,
        copy: &mut Option<CopyFile>,
    ) -> RedoCode {
        if self.inner.shutdown.soft_requested() {
            return RedoCode::Error;
        }
        let path = self.path();
        let known_bs = self.block_size();
        let probe_len = if known_bs > 0 {
            known_bs as usize * 2
        } else {
            HEADER_PROBE_LEN
        };

        // Online files can grow between commands.
        if let Ok(size) = handle.size() {
            self.inner.info.lock().file_size = size;
        }

        let mut buf = vec![0u8; probe_len];
        let actual = match handle.read_at(&mut buf, 0) {
            Ok(n) => n,
            Err(err) => {
                error!(code = err.code(), file = %path.display(), "{err}");
                return RedoCode::ErrorRead;
            }
        };
        if actual < 512 * 2 {
            error!(
                code = 40003u32,
                file = %path.display(),
                actual,
                "header probe too short"
            );
            return RedoCode::ErrorRead;
        }
        buf.truncate(actual);

        let header = match parse_file_header(&buf, &path) {
            Ok(HeaderOutcome::Empty { .. }) => return RedoCode::Empty,
            Ok(HeaderOutcome::Ready(header)) => header,
            Err(err) => {
                error!(code = err.code(), file = %path.display(), "{err}");
                return match err {
                    FerroError::ShortRead { .. } | FerroError::Io(_) => RedoCode::ErrorRead,
                    _ => RedoCode::ErrorBadData,
                };
            }
        };
        let bs = header.block_size.as_usize();
        if buf.len() < bs * 2 {
            return RedoCode::ErrorRead;
        }

        // Reconcile against what this run has already seen.
        {
            let info = self.inner.info.lock();
            if let Some(prev) = &info.header {
                for (what, changed) in [
                    ("version", prev.version != header.version),
                    ("activation", prev.activation != header.activation),
                    ("resetlogs", prev.resetlogs != header.resetlogs),
                    ("block size", prev.block_size != header.block_size),
                    ("database id", prev.database_id != header.database_id),
                ] {
                    if changed {
                        error!(
                            code = 40008u32,
                            file = %path.display(),
                            what,
                            "header field changed between reads"
                        );
                        return RedoCode::ErrorBadData;
                    }
                }
            } else {
                info!(
                    version = %header.version,
                    sid = %header.sid,
                    resetlogs = header.resetlogs.0,
                    activation = header.activation.0,
                    block_size = bs,
                    sequence = header.sequence.get(),
                    endian = if header.endian == crate::Endian::Little { "LITTLE" } else { "BIG" },
                    "found redo log"
                );
            }
        }

        // Block 1 integrity, with a bounded retry: the database may still
        // be mid-write on an online log's header.
        let validator = self.validator(&header);
        let mut crc_failures = 0;
        loop {
            match validator.check(&buf[bs..bs * 2], 1, header.sequence) {
                BlockCheck::Ok => break,
                BlockCheck::BadChecksum { stored, calculated } => {
                    crc_failures += 1;
                    if crc_failures >= BAD_CRC_MAX {
                        error!(
                            code = 40014u32,
                            file = %path.display(),
                            stored = format_args!("{stored:#06x}"),
                            calculated = format_args!("{calculated:#06x}"),
                            "header block checksum kept failing"
                        );
                        return RedoCode::ErrorBadData;
                    }
                    self.sleep_slice(self.inner.config.read_sleep);
                    if self.inner.shutdown.soft_requested() {
                        return RedoCode::Error;
                    }
                    if handle.read_at(&mut buf[bs..bs * 2], bs as u64).is_err() {
                        return RedoCode::ErrorRead;
                    }
                }
                other => return other.code(),
            }
        }

        // Sequence and SCN reconciliation.
        {
            let mut info = self.inner.info.lock();
            if info.sequence == Seq::ZERO {
                info.sequence = header.sequence;
            } else if info.sequence != header.sequence {
                if self.inner.group.is_archive() {
                    warn!(
                        code = 60024u32,
                        file = %path.display(),
                        found = header.sequence.get(),
                        expected = info.sequence.get(),
                        "archived log header sequence mismatch"
                    );
                    return RedoCode::ErrorSequence;
                }
                if info.sequence > header.sequence {
                    return RedoCode::Empty;
                }
                return RedoCode::Overwritten;
            }

            match info.first_scn {
                None => info.first_scn = Some(header.first_scn),
                Some(prev) if prev != header.first_scn => {
                    error!(
                        code = 40008u32,
                        file = %path.display(),
                        found = header.first_scn.get(),
                        expected = prev.get(),
                        "first scn changed between reads"
                    );
                    return RedoCode::ErrorBadData;
                }
                Some(_) => {}
            }
            match (info.next_scn, header.next_scn) {
                (None, Some(next)) => {
                    trace!(next_scn = next.get(), "next scn fixed by header");
                    info.next_scn = Some(next);
                }
                (Some(prev), Some(next)) if prev != next => {
                    error!(
                        code = 40008u32,
                        file = %path.display(),
                        found = next.get(),
                        expected = prev.get(),
                        "next scn changed between reads"
                    );
                    return RedoCode::ErrorBadData;
                }
                _ => {}
            }

            // Archived logs may carry trailing garbage past the block count.
            if header.block_count != 0 && self.inner.group.is_archive() {
                let true_size = header.block_count as u64 * bs as u64;
                if info.file_size > true_size {
                    info!(size = true_size, file = %path.display(), "clamping redo log size to header block count");
                    info.file_size = true_size;
                }
            }
            info.header = Some(header.clone());
        }

        if let Err(err) = self.copy_bytes(copy, header.sequence, 0, &buf[..bs * 2]) {
            error!(code = err.code(), "{err}");
            return RedoCode::ErrorWrite;
        }

        RedoCode::Ok
    }

    fn validator(&self, header: &RedoFileHeader) -> BlockValidator {
        BlockValidator {
            block_size: header.block_size,
            endian: header.endian,
            group: self.inner.group,
            verify_checksums: self.inner.config.verify_checksums,
        }
    }

    /// One-time operator hint when the database has checksums off.
    fn maybe_hint(&self) {
        let mut info = self.inner.info.lock();
        if !info.hint_displayed && !self.inner.config.db_checksum_configured {
            info.hint_displayed = true;
            warn!(
                "block checksum mismatch on a database with checksums disabled; \
                 enable block checksums on the source or disable block-sum \
                 verification for this reader"
            );
        }
    }

    /// The `Read` command: stream blocks until a terminal condition.
    fn read_loop<H: SourceHandle>(&self, handle: &mut H, copy: &mut Option<CopyFile>) {
        let Some(header) = self.header() else {
            self.inner.control.set_ret(RedoCode::Error);
            return;
        };
        let bs = header.block_size.as_usize();
        let validator = self.validator(&header);
        let delay = if self.inner.group.is_archive() {
            None
        } else {
            self.inner.config.verify_delay
        };

        let mut last_read = bs;
        // Blocks read but still inside the verification delay.
        let mut pending: VecDeque<(u64, usize, Instant)> = VecDeque::new();

        while !self.inner.shutdown.soft_requested() && self.inner.control.still_reading() {
            let snap = self.inner.control.snapshot();
            let file_size = self.inner.info.lock().file_size;

            // An archived log ends at its physical size. An online log is
            // preallocated (or still growing); its end is signaled by the
            // sealed header, an overwrite, or the orchestrator.
            if self.inner.group.is_archive() && snap.end == file_size && file_size > 0 {
                self.finish_file(file_size);
                return;
            }

            if self.inner.control.is_window_full() {
                if !self.inner.control.wait_buffer_space() {
                    return;
                }
                continue;
            }

            let mut progressed = false;

            // Promote delayed blocks whose window has elapsed.
            if snap.end < snap.scan {
                match self.promote_pending(handle, &validator, &mut pending, copy, bs) {
                    Ok(did) => progressed |= did,
                    Err(code) => {
                        self.inner.control.set_ret(code);
                        return;
                    }
                }
            }

            // Read forward from scan.
            let snap = self.inner.control.snapshot();
            if snap.scan < file_size {
                match self.read_forward(
                    handle,
                    &validator,
                    snap.scan,
                    file_size,
                    &mut last_read,
                    delay,
                    &mut pending,
                    copy,
                ) {
                    Ok(did) => progressed |= did,
                    Err(code) => {
                        self.inner.control.set_ret(code);
                        return;
                    }
                }
            }

            // An archived log may end at the header block count rather than
            // the physical file size.
            let end_now = self.inner.control.snapshot().end;
            if header.block_count != 0 && end_now == header.block_count as u64 * bs as u64 {
                self.finish_file(end_now);
                return;
            }

            if !progressed {
                // Online tail: poll at the configured cadence. For a live
                // file the size may have grown.
                if let Ok(size) = handle.size() {
                    self.inner.info.lock().file_size = size;
                }
                self.sleep_slice(self.inner.config.read_sleep);
            }
        }
    }

    /// End-of-file: `Finished` when the header names a next SCN, otherwise
    /// the log is truncated and the result is `Stopped`.
    fn finish_file(&self, position: u64) {
        let (next_scn, path) = {
            let info = self.inner.info.lock();
            (
                info.header.as_ref().and_then(|h| h.next_scn),
                info.path.clone(),
            )
        };
        match next_scn {
            Some(next) => {
                self.inner.info.lock().next_scn = Some(next);
                self.inner.control.set_ret(RedoCode::Finished);
            }
            None => {
                warn!(
                    code = 60023u32,
                    file = %path.display(),
                    position,
                    "unexpected end of file"
                );
                self.inner.control.set_ret(RedoCode::Stopped);
            }
        }
    }

    /// Adaptive request sizing: one block to start, doubling per success,
    /// capped at one ring chunk.
    fn read_size(&self, prev: usize, bs: usize) -> usize {
        if prev < bs {
            return bs;
        }
        (prev * 2).min(self.inner.ring.chunk_size())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_forward<H: SourceHandle>(
        &self,
        handle: &mut H,
        validator: &BlockValidator,
        scan: u64,
        file_size: u64,
        last_read: &mut usize,
        delay: Option<Duration>,
        pending: &mut VecDeque<(u64, usize, Instant)>,
        copy: &mut Option<CopyFile>,
    ) -> Result<bool, RedoCode> {
        let bs = validator.block_size.as_usize();
        let chunk = self.inner.ring.chunk_size() as u64;
        let mut to_read = self.read_size(*last_read, bs) as u64;
        to_read = to_read.min(file_size - scan);
        // Never cross a chunk boundary in one request.
        let in_chunk = scan % chunk;
        to_read = to_read.min(chunk - in_chunk);
        if to_read == 0 {
            error!(code = 40010u32, scan, "zero-length read request");
            return Err(RedoCode::Error);
        }

        let mut buf = vec![0u8; to_read as usize];
        let actual = match handle.read_at(&mut buf, scan) {
            Ok(n) => n,
            Err(err) => {
                error!(code = err.code(), "{err}");
                return Err(RedoCode::ErrorRead);
            }
        };
        let whole_blocks = actual / bs;
        let path = self.path();
        let expected_seq = self.inner.info.lock().sequence;

        let mut good = 0usize;
        let mut first_bad = BlockCheck::Ok;
        for i in 0..whole_blocks {
            let block = &buf[i * bs..(i + 1) * bs];
            let number = (scan / bs as u64) as u32 + i as u32;
            let check = validator.check(block, number, expected_seq);
            if check != BlockCheck::Ok {
                first_bad = check;
                let show_hint = delay.is_none();
                if show_hint {
                    validator.report(&path.display().to_string(), number, check);
                    if matches!(check, BlockCheck::BadChecksum { .. }) {
                        self.maybe_hint();
                    }
                }
                break;
            }
            good += 1;
        }

        let mut code = first_bad.code();

        // During the verification delay a CRC failure means "not written
        // yet": the database may not have finalized the block.
        if code == RedoCode::ErrorCrc && delay.is_some() {
            code = RedoCode::Empty;
        }

        if good == 0 {
            if self.inner.group.is_archive()
                && (code == RedoCode::Empty || code == RedoCode::ErrorSequence)
            {
                // Batch-mode partial archived log: end here.
                self.finish_file(scan);
                return Err(self.inner.control.snapshot().ret);
            }
            if code.is_error() || code == RedoCode::Overwritten {
                return Err(code);
            }
            // Empty online tail: re-read the header, which is where a log
            // switch (new sequence, or a sealed next-SCN) first shows up.
            match self.reload_header(handle, copy) {
                RedoCode::Ok | RedoCode::Empty => return Ok(false),
                other => return Err(other),
            }
        }

        let good_bytes = good * bs;
        self.inner
            .ring
            .write(scan, &buf[..good_bytes], &self.inner.shutdown)
            .map_err(|err| {
                error!(code = err.code(), "{err}");
                RedoCode::Error
            })?;

        match delay {
            Some(_) => {
                pending.push_back((scan, good_bytes, Instant::now()));
                self.inner.control.publish_scan(scan + good_bytes as u64);
            }
            None => {
                let seq = self.inner.info.lock().sequence;
                if let Err(err) = self.copy_bytes(copy, seq, scan, &buf[..good_bytes]) {
                    error!(code = err.code(), "{err}");
                    return Err(RedoCode::ErrorWrite);
                }
                self.inner.control.publish_end(scan + good_bytes as u64);
            }
        }
        *last_read = good_bytes;

        // A partial batch followed by an error surfaces on the next pass.
        if code == RedoCode::Overwritten || code.is_error() {
            trace!(code = %code, after_blocks = good, "trailing bad block after good run");
        }
        Ok(true)
    }

    /// Re-read and re-validate delayed blocks whose window has elapsed,
    /// then publish them. The re-read is authoritative: the database may
    /// have rewritten the tail since the first pass.
    fn promote_pending<H: SourceHandle>(
        &self,
        handle: &mut H,
        validator: &BlockValidator,
        pending: &mut VecDeque<(u64, usize, Instant)>,
        copy: &mut Option<CopyFile>,
        bs: usize,
    ) -> Result<bool, RedoCode> {
        let delay = self.inner.config.verify_delay.unwrap_or_default();
        let now = Instant::now();
        let mut progressed = false;

        while let Some(&(offset, len, stamp)) = pending.front() {
            if now.duration_since(stamp) < delay {
                break;
            }
            let mut buf = vec![0u8; len];
            let actual = match handle.read_at(&mut buf, offset) {
                Ok(n) => n,
                Err(err) => {
                    error!(code = err.code(), "{err}");
                    return Err(RedoCode::ErrorRead);
                }
            };
            if actual < len {
                // Still not fully on disk; try again next pass.
                return Ok(progressed);
            }

            let expected_seq = self.inner.info.lock().sequence;
            let path = self.path().display().to_string();
            for i in 0..len / bs {
                let block = &buf[i * bs..(i + 1) * bs];
                let number = (offset / bs as u64) as u32 + i as u32;
                let check = validator.check(block, number, expected_seq);
                match check {
                    BlockCheck::Ok => {}
                    BlockCheck::BadChecksum { .. } | BlockCheck::Empty => {
                        // Not finalized yet; keep the entry pending.
                        validator.report(&path, number, check);
                        return Ok(progressed);
                    }
                    other => {
                        validator.report(&path, number, other);
                        return Err(other.code());
                    }
                }
            }

            self.inner
                .ring
                .write(offset, &buf, &self.inner.shutdown)
                .map_err(|_| RedoCode::Error)?;
            let seq = self.inner.info.lock().sequence;
            if let Err(err) = self.copy_bytes(copy, seq, offset, &buf) {
                error!(code = err.code(), "{err}");
                return Err(RedoCode::ErrorWrite);
            }
            self.inner.control.publish_end(offset + len as u64);
            pending.pop_front();
            progressed = true;
        }
        Ok(progressed)
    }

    /// Mirror validated bytes into the copy side-channel, if configured.
    fn copy_bytes(
        &self,
        copy: &mut Option<CopyFile>,
        sequence: Seq,
        offset: u64,
        data: &[u8],
    ) -> ferroredo_error::Result<()> {
        let Some(dir) = &self.inner.config.copy_path else {
            return Ok(());
        };
        let needs_open = match copy {
            Some(c) => c.sequence != sequence,
            None => true,
        };
        if needs_open {
            let path = dir.join(format!(
                "{}_{}.arc",
                self.inner.config.database,
                sequence.get()
            ));
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&path)?;
            info!(path = %path.display(), "writing redo log copy");
            *copy = Some(CopyFile {
                file,
                path,
                sequence,
            });
        }
        let c = copy.as_mut().expect("copy file opened");
        let written = c.file.write_at(data, offset)?;
        if written != data.len() {
            return Err(FerroError::CopyShortWrite {
                path: c.path.clone(),
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// Sleep in bounded slices so shutdown is observed promptly.
    fn sleep_slice(&self, total: Duration) {
        let slice = Duration::from_millis(20);
        let mut remaining = total;
        while !remaining.is_zero() && !self.inner.shutdown.soft_requested() {
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

struct CopyFile {
    file: std::fs::File,
    path: PathBuf,
    sequence: Seq,
}
