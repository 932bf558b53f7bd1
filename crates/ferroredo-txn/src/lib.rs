//! Memory pool and transaction buffering for the replication pipeline.
//!
//! Two tightly coupled pieces live here: the process-wide [`ChunkPool`] of
//! fixed-size slabs (shared by the reader ring buffers and the transaction
//! chains, with per-owner quotas), and the [`TransactionBuffer`] that
//! accumulates uncommitted change chains keyed by xid and releases them in
//! commit-SCN order.

pub mod buffer;
pub mod chain;
pub mod pool;

pub use buffer::{CommittedTxn, TransactionBuffer};
pub use chain::{ChainIter, ChangeChain};
pub use pool::{ChunkPool, PoolConfig, PooledChunk, DEFAULT_CHUNK_SIZE};
