//! Process-wide chunk memory pool.
//!
//! Fixed-size slabs shared by the reader ring buffers, the transaction
//! chains, and the builder's staging area. Every chunk is tagged with its
//! owning subsystem so quotas apply per owner on top of the process-wide
//! ceiling. Acquisition blocks when the pool is exhausted; that blocking is
//! the pipeline's backpressure, so every wait also watches the shutdown
//! flags.

use std::sync::Arc;
use std::time::Duration;

use ferroredo_error::{FerroError, Result};
use ferroredo_types::{MemoryOwner, Shutdown};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

/// Default slab size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// How long a blocked acquire sleeps between shutdown-flag checks.
const ACQUIRE_POLL: Duration = Duration::from_millis(50);

/// Pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Bytes per chunk. Must be a power of two.
    pub chunk_size: usize,
    /// Chunks kept allocated even when idle.
    pub min_chunks: usize,
    /// Process-wide ceiling on live chunks.
    pub max_chunks: usize,
    /// Per-owner ceiling for reader ring buffers.
    pub reader_max: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_chunks: 32,
            max_chunks: 1024,
            reader_max: 64,
        }
    }
}

impl PoolConfig {
    /// Validate the sizing relations.
    pub fn validate(&self) -> Result<()> {
        if !self.chunk_size.is_power_of_two() || self.chunk_size < 4096 {
            return Err(FerroError::config(
                "memory.chunk-size",
                format!("{} is not a power of two >= 4096", self.chunk_size),
            ));
        }
        if self.min_chunks > self.max_chunks {
            return Err(FerroError::config(
                "memory.min-mb",
                format!("min {} exceeds max {}", self.min_chunks, self.max_chunks),
            ));
        }
        if self.reader_max == 0 || self.reader_max > self.max_chunks {
            return Err(FerroError::config(
                "memory.read-buffer-max-mb",
                format!("{} outside 1..={}", self.reader_max, self.max_chunks),
            ));
        }
        Ok(())
    }

    fn owner_limit(&self, owner: MemoryOwner) -> usize {
        match owner {
            MemoryOwner::Reader => self.reader_max,
            MemoryOwner::Transactions | MemoryOwner::Builder => self.max_chunks,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    reader: usize,
    transactions: usize,
    builder: usize,
}

impl Counters {
    fn get(&self, owner: MemoryOwner) -> usize {
        match owner {
            MemoryOwner::Reader => self.reader,
            MemoryOwner::Transactions => self.transactions,
            MemoryOwner::Builder => self.builder,
        }
    }

    fn add(&mut self, owner: MemoryOwner, delta: isize) {
        let slot = match owner {
            MemoryOwner::Reader => &mut self.reader,
            MemoryOwner::Transactions => &mut self.transactions,
            MemoryOwner::Builder => &mut self.builder,
        };
        *slot = slot.checked_add_signed(delta).expect("owner count underflow");
    }

    fn total(&self) -> usize {
        self.reader + self.transactions + self.builder
    }
}

#[derive(Debug)]
struct PoolState {
    free: Vec<Box<[u8]>>,
    in_use: Counters,
    /// High-water mark of simultaneously live chunks, for the shutdown log.
    hwm: usize,
}

#[derive(Debug)]
struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Condvar,
}

/// Handle to the shared chunk pool. Clones share the same storage.
#[derive(Debug, Clone)]
pub struct ChunkPool {
    shared: Arc<PoolShared>,
}

impl ChunkPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let free = (0..config.min_chunks)
            .map(|_| vec![0u8; config.chunk_size].into_boxed_slice())
            .collect();
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState {
                    free,
                    in_use: Counters::default(),
                    hwm: 0,
                }),
                released: Condvar::new(),
            }),
        })
    }

    /// Pool sized for unit tests: tiny chunks, explicit ceilings.
    pub fn for_tests(chunk_size: usize, max_chunks: usize) -> Self {
        Self::new(PoolConfig {
            chunk_size,
            min_chunks: 0,
            max_chunks,
            reader_max: max_chunks,
        })
        .expect("test pool config")
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.shared.config.chunk_size
    }

    /// Chunks currently held by `owner`.
    pub fn in_use(&self, owner: MemoryOwner) -> usize {
        self.shared.state.lock().in_use.get(owner)
    }

    /// Chunks currently held across all owners.
    pub fn in_use_total(&self) -> usize {
        self.shared.state.lock().in_use.total()
    }

    /// High-water mark of live chunks over the pool's lifetime.
    pub fn high_water_mark(&self) -> usize {
        self.shared.state.lock().hwm
    }

    /// Take a chunk without blocking. `None` when the owner quota or the
    /// process ceiling is reached.
    pub fn try_acquire(&self, owner: MemoryOwner) -> Option<PooledChunk> {
        let mut state = self.shared.state.lock();
        let config = &self.shared.config;
        if state.in_use.get(owner) >= config.owner_limit(owner)
            || state.in_use.total() >= config.max_chunks
        {
            return None;
        }
        let data = state
            .free
            .pop()
            .unwrap_or_else(|| vec![0u8; config.chunk_size].into_boxed_slice());
        state.in_use.add(owner, 1);
        state.hwm = state.hwm.max(state.in_use.total());
        trace!(owner = %owner, total = state.in_use.total(), "chunk acquired");
        Some(PooledChunk {
            data: Some(data),
            owner,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Take a chunk, blocking until one frees up. Returns
    /// [`FerroError::Shutdown`] if a hard shutdown arrives while waiting.
    pub fn acquire(&self, owner: MemoryOwner, shutdown: &Shutdown) -> Result<PooledChunk> {
        loop {
            if let Some(chunk) = self.try_acquire(owner) {
                return Ok(chunk);
            }
            if shutdown.hard_requested() {
                return Err(FerroError::Shutdown);
            }
            debug!(owner = %owner, "pool exhausted, waiting for a released chunk");
            let mut state = self.shared.state.lock();
            // Bounded wait so the shutdown flags are re-checked even if no
            // release ever arrives.
            self.shared.released.wait_for(&mut state, ACQUIRE_POLL);
        }
    }
}

/// An exclusively owned slab borrowed from the pool. Returning it is
/// automatic on drop; every release wakes one blocked acquirer.
#[derive(Debug)]
pub struct PooledChunk {
    data: Option<Box<[u8]>>,
    owner: MemoryOwner,
    shared: Arc<PoolShared>,
}

impl PooledChunk {
    #[inline]
    pub fn owner(&self) -> MemoryOwner {
        self.owner
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_ref().expect("chunk accessed after release")
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_mut().expect("chunk accessed after release")
    }
}

impl Drop for PooledChunk {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            let mut state = self.shared.state.lock();
            if state.free.len() < self.shared.config.min_chunks {
                state.free.push(data);
            }
            state.in_use.add(self.owner, -1);
            drop(state);
            self.shared.released.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn acquire_and_release_updates_accounting() {
        let pool = ChunkPool::for_tests(4096, 4);
        assert_eq!(pool.in_use_total(), 0);

        let a = pool.try_acquire(MemoryOwner::Reader).unwrap();
        let b = pool.try_acquire(MemoryOwner::Transactions).unwrap();
        assert_eq!(pool.in_use(MemoryOwner::Reader), 1);
        assert_eq!(pool.in_use(MemoryOwner::Transactions), 1);
        assert_eq!(pool.in_use_total(), 2);
        assert_eq!(a.len(), 4096);

        drop(a);
        drop(b);
        assert_eq!(pool.in_use_total(), 0);
        assert_eq!(pool.high_water_mark(), 2);
    }

    #[test]
    fn ceiling_blocks_try_acquire() {
        let pool = ChunkPool::for_tests(4096, 2);
        let _a = pool.try_acquire(MemoryOwner::Transactions).unwrap();
        let _b = pool.try_acquire(MemoryOwner::Transactions).unwrap();
        assert!(pool.try_acquire(MemoryOwner::Transactions).is_none());
        assert!(pool.try_acquire(MemoryOwner::Reader).is_none());
    }

    #[test]
    fn reader_quota_is_separate_from_ceiling() {
        let pool = ChunkPool::new(PoolConfig {
            chunk_size: 4096,
            min_chunks: 0,
            max_chunks: 8,
            reader_max: 1,
        })
        .unwrap();
        let _a = pool.try_acquire(MemoryOwner::Reader).unwrap();
        assert!(pool.try_acquire(MemoryOwner::Reader).is_none());
        assert!(pool.try_acquire(MemoryOwner::Transactions).is_some());
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let pool = ChunkPool::for_tests(4096, 1);
        let shutdown = Shutdown::new();
        let held = pool.acquire(MemoryOwner::Transactions, &shutdown).unwrap();

        let pool2 = pool.clone();
        let shutdown2 = Arc::clone(&shutdown);
        let waiter = std::thread::spawn(move || {
            pool2.acquire(MemoryOwner::Transactions, &shutdown2).is_ok()
        });

        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn hard_shutdown_unblocks_acquire() {
        let pool = ChunkPool::for_tests(4096, 1);
        let shutdown = Shutdown::new();
        let _held = pool.acquire(MemoryOwner::Transactions, &shutdown).unwrap();

        let pool2 = pool.clone();
        let shutdown2 = Arc::clone(&shutdown);
        let waiter = std::thread::spawn(move || {
            pool2.acquire(MemoryOwner::Transactions, &shutdown2)
        });

        std::thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        shutdown.stop_hard();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(FerroError::Shutdown)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn config_validation() {
        assert!(PoolConfig {
            chunk_size: 3000,
            ..PoolConfig::default()
        }
        .validate()
        .is_err());
        assert!(PoolConfig {
            min_chunks: 10,
            max_chunks: 5,
            ..PoolConfig::default()
        }
        .validate()
        .is_err());
        assert!(PoolConfig::default().validate().is_ok());
    }
}
