//! The reader/parser control block and the chunked ring buffer.
//!
//! Reader and parser are a cyclic pair: each one signals the other. Instead
//! of either side owning the other, all shared mutable state is the control
//! block here — the `(start, end, scan, status, ret)` tuple behind a single
//! mutex with three condvars:
//!
//! - `buffer_full`: the reader parks here when `scan - start` hits the ring
//!   capacity; the parser signals it on confirm.
//! - `reader_sleeping`: the reader parks here while `Sleeping`; the control
//!   side signals it when issuing a command.
//! - `parser_sleeping`: the parser parks here waiting for bytes; the reader
//!   signals it whenever `end` advances or a command completes.
//!
//! Window invariant: `start <= end <= scan <= start + capacity`. Bytes in
//! `[start, end)` are validated and readable by the parser; `[end, scan)`
//! holds blocks read from disk but still inside the online verification
//! delay.
//!
//! Every wait is bounded so the shutdown flags are observed even without a
//! signal.

use std::sync::Arc;
use std::time::Duration;

use ferroredo_error::{FerroError, Result};
use ferroredo_types::{MemoryOwner, Shutdown};
use ferroredo_txn::{ChunkPool, PooledChunk};
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::RedoCode;

/// Longest any pipeline wait sleeps before re-checking shutdown flags.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Reader thread states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    /// Waiting for a command.
    Sleeping,
    /// Open the file and validate the two-block header.
    Check,
    /// Re-read the header after a sequence switch and reset the window.
    Update,
    /// Stream blocks until end of file, overwrite, stop, or shutdown.
    Read,
}

#[derive(Debug)]
struct ControlState {
    start: u64,
    end: u64,
    scan: u64,
    status: ReaderStatus,
    ret: RedoCode,
}

/// Snapshot of the control block, for invariant checks and decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub start: u64,
    pub end: u64,
    pub scan: u64,
    pub status: ReaderStatus,
    pub ret: RedoCode,
}

/// The shared control block.
#[derive(Debug)]
pub struct ReaderControl {
    state: Mutex<ControlState>,
    buffer_full: Condvar,
    reader_sleeping: Condvar,
    parser_sleeping: Condvar,
    shutdown: Arc<Shutdown>,
    capacity: u64,
    chunk_size: u64,
}

impl ReaderControl {
    pub fn new(capacity: u64, chunk_size: u64, shutdown: Arc<Shutdown>) -> Self {
        Self {
            state: Mutex::new(ControlState {
                start: 0,
                end: 0,
                scan: 0,
                status: ReaderStatus::Sleeping,
                ret: RedoCode::Ok,
            }),
            buffer_full: Condvar::new(),
            reader_sleeping: Condvar::new(),
            parser_sleeping: Condvar::new(),
            shutdown,
            capacity,
            chunk_size,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whether writing past `scan` would need a ring slot whose previous
    /// chunk may still hold unconfirmed bytes. The comparison is
    /// chunk-granular: `start` usually sits mid-chunk (the parser confirms
    /// at block boundaries), so its whole chunk stays occupied.
    fn window_full(&self, start: u64, scan: u64) -> bool {
        scan / self.chunk_size - start / self.chunk_size >= self.capacity / self.chunk_size
    }

    /// Chunk-granular fullness check for the read loop.
    pub fn is_window_full(&self) -> bool {
        let s = self.state.lock();
        self.window_full(s.start, s.scan)
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        let s = self.state.lock();
        ControlSnapshot {
            start: s.start,
            end: s.end,
            scan: s.scan,
            status: s.status,
            ret: s.ret,
        }
    }

    /// Wake every waiter (shutdown and command injection).
    pub fn wake_all(&self) {
        let _guard = self.state.lock();
        self.buffer_full.notify_all();
        self.reader_sleeping.notify_all();
        self.parser_sleeping.notify_all();
    }

    // --- command side (orchestrator / parser thread) ---

    /// Issue `Check` and wait until the reader finishes it.
    pub fn request_check(&self) -> RedoCode {
        let mut s = self.state.lock();
        s.status = ReaderStatus::Check;
        s.ret = RedoCode::Ok;
        self.buffer_full.notify_all();
        self.reader_sleeping.notify_all();
        while s.status == ReaderStatus::Check && !self.shutdown.soft_requested() {
            self.parser_sleeping.wait_for(&mut s, WAIT_SLICE);
        }
        s.ret
    }

    /// Issue `Update` and wait until the reader finishes it. While the file
    /// header is still [`RedoCode::Empty`], keep retrying at the read-sleep
    /// cadence; an online log's header appears only once the database
    /// starts writing the file.
    pub fn request_update(&self, read_sleep: Duration) -> RedoCode {
        loop {
            let mut s = self.state.lock();
            s.status = ReaderStatus::Update;
            s.ret = RedoCode::Ok;
            self.buffer_full.notify_all();
            self.reader_sleeping.notify_all();
            while s.status == ReaderStatus::Update && !self.shutdown.soft_requested() {
                self.parser_sleeping.wait_for(&mut s, WAIT_SLICE);
            }
            if self.shutdown.soft_requested() {
                return RedoCode::Shutdown;
            }
            if s.ret == RedoCode::Empty {
                self.parser_sleeping.wait_for(&mut s, read_sleep.max(WAIT_SLICE));
                continue;
            }
            return s.ret;
        }
    }

    /// Switch the reader into `Read`.
    pub fn set_read(&self) {
        let mut s = self.state.lock();
        s.status = ReaderStatus::Read;
        s.ret = RedoCode::Ok;
        self.buffer_full.notify_all();
        self.reader_sleeping.notify_all();
    }

    /// Parser confirms everything below `offset` has been consumed.
    pub fn confirm(&self, offset: u64) {
        let mut s = self.state.lock();
        if offset > s.start {
            trace!(from = s.start, to = offset, "confirmed read data");
            s.start = offset;
        }
        if s.status == ReaderStatus::Read {
            self.buffer_full.notify_all();
        }
    }

    /// Parser waits until bytes past `offset` are available, the reader
    /// reports a terminal code, or shutdown.
    pub fn wait_for_data(&self, offset: u64) -> ControlSnapshot {
        let mut s = self.state.lock();
        while s.end <= offset
            && s.status == ReaderStatus::Read
            && s.ret == RedoCode::Ok
            && !self.shutdown.soft_requested()
        {
            self.parser_sleeping.wait_for(&mut s, WAIT_SLICE);
        }
        ControlSnapshot {
            start: s.start,
            end: s.end,
            scan: s.scan,
            status: s.status,
            ret: s.ret,
        }
    }

    /// After confirming up to `offset`, decide whether this file is done.
    /// Returns `true` when every published byte is confirmed and the reader
    /// has reached a terminal state for the file.
    pub fn check_finished(&self, offset: u64) -> bool {
        let mut s = self.state.lock();
        if s.start < offset {
            s.start = offset;
        }
        if offset == s.end {
            if matches!(
                s.ret,
                RedoCode::Stopped | RedoCode::Overwritten | RedoCode::Finished
            ) || s.status == ReaderStatus::Sleeping
            {
                return true;
            }
            // All caught up but the reader is still going; park briefly.
            self.parser_sleeping.wait_for(&mut s, WAIT_SLICE);
        }
        false
    }

    // --- reader side ---

    /// Park until a command arrives. Returns the status to execute, or
    /// `None` on shutdown.
    pub fn take_command(&self) -> Option<ReaderStatus> {
        let mut s = self.state.lock();
        self.parser_sleeping.notify_all();
        while s.status == ReaderStatus::Sleeping && !self.shutdown.soft_requested() {
            self.reader_sleeping.wait_for(&mut s, WAIT_SLICE);
        }
        if self.shutdown.soft_requested() {
            return None;
        }
        Some(s.status)
    }

    /// Complete a command: publish its result and go back to sleep.
    pub fn finish_command(&self, ret: RedoCode) {
        let mut s = self.state.lock();
        s.ret = ret;
        s.status = ReaderStatus::Sleeping;
        self.parser_sleeping.notify_all();
    }

    /// Record a terminal result while staying in `Read` (the parser drains
    /// the window before `check_finished` returns true).
    pub fn set_ret(&self, ret: RedoCode) {
        let mut s = self.state.lock();
        s.ret = ret;
        self.parser_sleeping.notify_all();
    }

    /// Whether the control block is still in `Read` (the orchestrator may
    /// have switched it away).
    pub fn still_reading(&self) -> bool {
        self.state.lock().status == ReaderStatus::Read
    }

    /// Reset the window after a header update: everything restarts at
    /// `offset` (normally two blocks, past the file header).
    pub fn reset_window(&self, offset: u64) {
        let mut s = self.state.lock();
        s.start = offset;
        s.end = offset;
        s.scan = offset;
    }

    /// Move the window to a recovery position without touching status.
    pub fn position_window(&self, start: u64) {
        self.reset_window(start);
    }

    /// Publish validated bytes: `end` (and `scan` if it lags) advance.
    pub fn publish_end(&self, new_end: u64) {
        let mut s = self.state.lock();
        debug_assert!(new_end >= s.end, "end must be monotonic");
        s.end = new_end;
        if s.scan < new_end {
            s.scan = new_end;
        }
        debug_assert!(s.scan - s.start <= self.capacity);
        self.parser_sleeping.notify_all();
    }

    /// Publish scanned-but-unverified bytes (delay window).
    pub fn publish_scan(&self, new_scan: u64) {
        let mut s = self.state.lock();
        debug_assert!(new_scan >= s.scan, "scan must be monotonic");
        s.scan = new_scan;
        debug_assert!(s.scan - s.start <= self.capacity);
    }

    /// Reader blocks while the ring is full. Returns `false` on shutdown or
    /// when the status changed away from `Read`.
    pub fn wait_buffer_space(&self) -> bool {
        let mut s = self.state.lock();
        while self.window_full(s.start, s.scan)
            && s.status == ReaderStatus::Read
            && !self.shutdown.soft_requested()
        {
            trace!(start = s.start, scan = s.scan, "ring full, waiting for confirm");
            self.buffer_full.wait_for(&mut s, WAIT_SLICE);
        }
        s.status == ReaderStatus::Read && !self.shutdown.soft_requested()
    }

    /// Leave `Read`: status back to `Sleeping`, the terminal `ret` kept for
    /// the parser to observe while it drains the window.
    pub fn finish_read(&self) {
        let mut s = self.state.lock();
        s.status = ReaderStatus::Sleeping;
        self.parser_sleeping.notify_all();
    }
}

/// Chunked ring storage addressed by absolute file offset.
///
/// Slot `(offset / chunk_size) % slots` holds the chunk whose base is
/// `offset - offset % chunk_size`. The control block's window invariant
/// guarantees a slot is never rewritten while its bytes are still
/// unconfirmed.
#[derive(Debug)]
pub struct RingBuffer {
    pool: ChunkPool,
    chunk_size: usize,
    slots: Mutex<Vec<Option<(u64, PooledChunk)>>>,
}

impl RingBuffer {
    pub fn new(pool: ChunkPool, num_slots: usize) -> Self {
        let chunk_size = pool.chunk_size();
        Self {
            pool,
            chunk_size,
            slots: Mutex::new((0..num_slots).map(|_| None).collect()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        let slots = self.slots.lock().len();
        (slots * self.chunk_size) as u64
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn slot_of(&self, chunk_base: u64, num_slots: usize) -> usize {
        ((chunk_base / self.chunk_size as u64) % num_slots as u64) as usize
    }

    /// Copy `data` into the ring at absolute `offset`, allocating chunks
    /// from the pool as the write crosses chunk boundaries. Blocks on pool
    /// exhaustion (shutdown-aware).
    pub fn write(&self, offset: u64, data: &[u8], shutdown: &Shutdown) -> Result<()> {
        let mut written = 0usize;
        while written < data.len() {
            let pos = offset + written as u64;
            let chunk_base = pos - pos % self.chunk_size as u64;
            let in_chunk = (pos - chunk_base) as usize;
            let n = (self.chunk_size - in_chunk).min(data.len() - written);

            // Allocate outside the slot lock; the pool has its own.
            let mut slots = self.slots.lock();
            let num_slots = slots.len();
            let idx = self.slot_of(chunk_base, num_slots);
            let needs_alloc = match &slots[idx] {
                Some((base, _)) => *base != chunk_base,
                None => true,
            };
            if needs_alloc {
                drop(slots);
                let chunk = self.pool.acquire(MemoryOwner::Reader, shutdown)?;
                slots = self.slots.lock();
                slots[idx] = Some((chunk_base, chunk));
            }
            let (_, chunk) = slots[idx].as_mut().expect("slot allocated");
            chunk.as_mut_slice()[in_chunk..in_chunk + n]
                .copy_from_slice(&data[written..written + n]);
            written += n;
        }
        Ok(())
    }

    /// Copy `out.len()` bytes at absolute `offset` out of the ring.
    ///
    /// The caller must only read inside the control block's `[start, end)`
    /// window; reading elsewhere is an internal error.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let mut copied = 0usize;
        let slots = self.slots.lock();
        let num_slots = slots.len();
        while copied < out.len() {
            let pos = offset + copied as u64;
            let chunk_base = pos - pos % self.chunk_size as u64;
            let in_chunk = (pos - chunk_base) as usize;
            let n = (self.chunk_size - in_chunk).min(out.len() - copied);
            let idx = self.slot_of(chunk_base, num_slots);
            match &slots[idx] {
                Some((base, chunk)) if *base == chunk_base => {
                    out[copied..copied + n]
                        .copy_from_slice(&chunk.as_slice()[in_chunk..in_chunk + n]);
                }
                _ => {
                    return Err(FerroError::internal(format!(
                        "ring read outside window at offset {pos}"
                    )))
                }
            }
            copied += n;
        }
        Ok(())
    }

    /// Release chunks wholly below `offset` back to the pool.
    pub fn release_below(&self, offset: u64) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if let Some((base, _)) = slot {
                if *base + self.chunk_size as u64 <= offset {
                    *slot = None;
                }
            }
        }
    }

    /// Drop every chunk (file switch).
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ring(chunk_size: usize, slots: usize) -> (RingBuffer, Arc<Shutdown>) {
        let pool = ChunkPool::for_tests(chunk_size, slots + 2);
        (RingBuffer::new(pool, slots), Shutdown::new())
    }

    #[test]
    fn write_read_round_trip_across_chunks() {
        let (ring, shutdown) = test_ring(4096, 4);
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        ring.write(0, &data, &shutdown).unwrap();

        let mut out = vec![0u8; 10_000];
        ring.read(0, &mut out).unwrap();
        assert_eq!(out, data);

        // Unaligned interior read.
        let mut out = vec![0u8; 5000];
        ring.read(3000, &mut out).unwrap();
        assert_eq!(out, data[3000..8000]);
    }

    #[test]
    fn release_frees_pool_chunks() {
        let (ring, shutdown) = test_ring(4096, 4);
        let pool = ring.pool.clone();
        ring.write(0, &vec![7u8; 4096 * 3], &shutdown).unwrap();
        assert_eq!(pool.in_use(MemoryOwner::Reader), 3);

        ring.release_below(4096 * 2);
        assert_eq!(pool.in_use(MemoryOwner::Reader), 1);

        ring.clear();
        assert_eq!(pool.in_use(MemoryOwner::Reader), 0);
    }

    #[test]
    fn ring_wraps_reusing_slots() {
        let (ring, shutdown) = test_ring(4096, 2);
        ring.write(0, &vec![1u8; 4096 * 2], &shutdown).unwrap();
        ring.release_below(4096 * 2);
        // Offsets two chunks later land in the same slots.
        ring.write(4096 * 2, &vec![2u8; 4096], &shutdown).unwrap();

        let mut out = vec![0u8; 16];
        ring.read(4096 * 2, &mut out).unwrap();
        assert_eq!(out, vec![2u8; 16]);
        // The released region is gone.
        assert!(ring.read(0, &mut out).is_err());
    }

    #[test]
    fn control_window_progression() {
        let shutdown = Shutdown::new();
        let control = ReaderControl::new(8192, 4096, Arc::clone(&shutdown));
        control.reset_window(1024);
        control.publish_end(2048);
        control.publish_scan(4096);
        let snap = control.snapshot();
        assert_eq!((snap.start, snap.end, snap.scan), (1024, 2048, 4096));
        assert!(snap.start <= snap.end && snap.end <= snap.scan);
        assert!(snap.scan - snap.start <= control.capacity());

        control.confirm(2048);
        assert_eq!(control.snapshot().start, 2048);
    }

    #[test]
    fn wait_for_data_returns_on_publish() {
        let shutdown = Shutdown::new();
        let control = Arc::new(ReaderControl::new(8192, 4096, Arc::clone(&shutdown)));
        control.set_read();

        let c2 = Arc::clone(&control);
        let waiter = std::thread::spawn(move || c2.wait_for_data(0));
        std::thread::sleep(Duration::from_millis(20));
        control.publish_end(512);
        let snap = waiter.join().unwrap();
        assert_eq!(snap.end, 512);
    }

    #[test]
    fn wait_for_data_returns_on_terminal_ret() {
        let shutdown = Shutdown::new();
        let control = Arc::new(ReaderControl::new(8192, 4096, Arc::clone(&shutdown)));
        control.set_read();

        let c2 = Arc::clone(&control);
        let waiter = std::thread::spawn(move || c2.wait_for_data(0));
        std::thread::sleep(Duration::from_millis(20));
        control.set_ret(RedoCode::Finished);
        let snap = waiter.join().unwrap();
        assert_eq!(snap.ret, RedoCode::Finished);
    }

    #[test]
    fn buffer_space_wait_unblocks_on_confirm() {
        let shutdown = Shutdown::new();
        let control = Arc::new(ReaderControl::new(1024, 512, Arc::clone(&shutdown)));
        control.set_read();
        control.publish_end(1024); // window exactly full

        let c2 = Arc::clone(&control);
        let waiter = std::thread::spawn(move || c2.wait_buffer_space());
        std::thread::sleep(Duration::from_millis(20));
        control.confirm(512);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn shutdown_unblocks_every_wait() {
        let shutdown = Shutdown::new();
        let control = Arc::new(ReaderControl::new(1024, 512, Arc::clone(&shutdown)));
        control.set_read();
        control.publish_end(1024);

        let c2 = Arc::clone(&control);
        let space = std::thread::spawn(move || c2.wait_buffer_space());
        let c3 = Arc::clone(&control);
        let data = std::thread::spawn(move || c3.wait_for_data(2048));

        std::thread::sleep(Duration::from_millis(20));
        shutdown.stop_soft();
        control.wake_all();
        assert!(!space.join().unwrap());
        let _ = data.join().unwrap();
    }

    #[test]
    fn check_finished_semantics() {
        let shutdown = Shutdown::new();
        let control = ReaderControl::new(8192, 4096, shutdown);
        control.set_read();
        control.publish_end(1024);

        // Not drained yet.
        assert!(!control.check_finished(512));
        // Drained but still reading: parks and reports false.
        control.set_ret(RedoCode::Finished);
        assert!(control.check_finished(1024));
    }

    #[test]
    fn take_command_and_finish() {
        let shutdown = Shutdown::new();
        let control = Arc::new(ReaderControl::new(8192, 4096, Arc::clone(&shutdown)));

        let c2 = Arc::clone(&control);
        let reader = std::thread::spawn(move || {
            let cmd = c2.take_command();
            assert_eq!(cmd, Some(ReaderStatus::Check));
            c2.finish_command(RedoCode::Ok);
        });

        assert_eq!(control.request_check(), RedoCode::Ok);
        reader.join().unwrap();
    }
}
