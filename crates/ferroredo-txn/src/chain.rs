//! Chunk-arena change chains.
//!
//! A chain is the storage for one transaction's changes: an append-only
//! run of pooled chunks holding length-prefixed [`RowChange`] entries.
//! Entries are addressed by (chunk index, byte offset) — no pointers — so
//! a chunk can move without fixups. Draining happens head-to-tail exactly
//! once, on commit.

use ferroredo_error::Result;
use ferroredo_types::change::ChangeDecodeError;
use ferroredo_types::{MemoryOwner, RowChange, Shutdown};

use crate::pool::{ChunkPool, PooledChunk};

/// Byte prefix of every entry: little-endian u32 length.
const ENTRY_HEADER: usize = 4;

/// Append-only chain of changes for one transaction.
///
/// Pool chunks are reused without zeroing, so each chunk tracks how many
/// bytes of it are real entries; slack past that is garbage.
#[derive(Debug, Default)]
pub struct ChangeChain {
    chunks: Vec<PooledChunk>,
    /// Bytes written per chunk, parallel to `chunks`.
    used: Vec<usize>,
    entry_count: usize,
    total_bytes: usize,
}

impl ChangeChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total encoded bytes held, entry headers included.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.total_bytes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Append one change, growing by a pooled chunk when the tail fills.
    ///
    /// Blocks on the pool when it is exhausted; that is the backpressure
    /// path from the transaction buffer back to the reader.
    pub fn append(
        &mut self,
        change: &RowChange,
        pool: &ChunkPool,
        shutdown: &Shutdown,
    ) -> Result<()> {
        let mut encoded = Vec::with_capacity(ENTRY_HEADER + change.encoded_len());
        encoded.extend_from_slice(&(change.encoded_len() as u32).to_le_bytes());
        change.encode(&mut encoded);

        // An entry never spans chunks.
        let chunk_size = pool.chunk_size();
        if encoded.len() > chunk_size {
            return Err(ferroredo_error::FerroError::internal(format!(
                "change entry of {} bytes exceeds chunk size {chunk_size}",
                encoded.len()
            )));
        }

        let need_new_chunk = match (self.chunks.last(), self.used.last()) {
            (Some(tail), Some(&used)) => used + encoded.len() > tail.len(),
            _ => true,
        };
        if need_new_chunk {
            let chunk = pool.acquire(MemoryOwner::Transactions, shutdown)?;
            self.chunks.push(chunk);
            self.used.push(0);
        }

        let tail = self.chunks.last_mut().expect("tail chunk present");
        let used = self.used.last_mut().expect("tail length present");
        tail.as_mut_slice()[*used..*used + encoded.len()].copy_from_slice(&encoded);
        *used += encoded.len();
        self.entry_count += 1;
        self.total_bytes += encoded.len();
        Ok(())
    }

    /// Iterate entries head-to-tail, decoding each.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            chain: self,
            chunk: 0,
            offset: 0,
            seen: 0,
        }
    }

    /// Release all chunks back to the pool.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.used.clear();
        self.entry_count = 0;
        self.total_bytes = 0;
    }
}

/// Head-to-tail decoding iterator over a chain.
pub struct ChainIter<'a> {
    chain: &'a ChangeChain,
    chunk: usize,
    offset: usize,
    seen: usize,
}

impl Iterator for ChainIter<'_> {
    type Item = std::result::Result<RowChange, ChangeDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.seen >= self.chain.entry_count {
            return None;
        }
        let chunk = self.chain.chunks.get(self.chunk)?;
        let data = chunk.as_slice();
        let limit = *self.chain.used.get(self.chunk)?;

        // Entries never span chunks; past the written bytes the writer
        // moved on to the next chunk.
        if self.offset >= limit {
            self.chunk += 1;
            self.offset = 0;
            return self.next();
        }
        let len = u32::from_le_bytes(
            data[self.offset..self.offset + ENTRY_HEADER]
                .try_into()
                .expect("entry header bytes"),
        ) as usize;
        let start = self.offset + ENTRY_HEADER;
        let entry = &data[start..start + len];
        self.offset = start + len;
        self.seen += 1;
        Some(RowChange::decode(entry))
    }
}
