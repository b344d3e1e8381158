//! The spill queue: a byte FIFO over a run of disk chunks.
//!
//! Invariants:
//! - only the last chunk may be not full,
//! - only the first chunk may be partially consumed,
//! - `buffered` equals the sum of `offw - offr` over all chunks.

use std::collections::VecDeque;

use timeshift_core::id::{ChunkSeq, SessionId};

use crate::chunk::{Chunk, ChunkName};
use crate::error::{Result, SpillError};
use crate::stats::SpillStats;
use crate::storage::Storage;

pub struct SpillQueue<S: Storage> {
    storage: S,
    session: SessionId,
    chunk_size: usize,
    chunks: VecDeque<Chunk<S>>,
    next_seq: ChunkSeq,
    buffered: usize,
    degraded: bool,
    stats: SpillStats,
}

impl<S: Storage> SpillQueue<S> {
    /// Create an empty queue. No chunk exists until the first write.
    pub fn new(storage: S, session: SessionId, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(SpillError::InvalidChunkSize(chunk_size));
        }
        Ok(Self {
            storage,
            session,
            chunk_size,
            chunks: VecDeque::new(),
            next_seq: ChunkSeq::new(0),
            buffered: 0,
            degraded: false,
            stats: SpillStats::default(),
        })
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn stats(&self) -> SpillStats {
        self.stats
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Names of the live chunks, oldest first.
    pub fn chunk_names(&self) -> Vec<ChunkName> {
        self.chunks.iter().map(|c| c.name().clone()).collect()
    }

    /// Append to the newest chunk, allocating one when none exists or the
    /// newest is full. May accept fewer bytes than offered; see
    /// [`write_all`](Self::write_all).
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.chunks.back().map_or(true, |c| c.is_full()) {
            self.alloc_chunk()?;
        }
        let chunk = match self.chunks.back_mut() {
            Some(c) => c,
            None => return Err(SpillError::Empty),
        };
        let w = chunk.write(buf)?;

        self.buffered += w.stored;
        self.stats.bytes_stored += w.stored as u64;
        self.stats.record_buffered(self.buffered);

        if w.discarded > 0 {
            self.stats.bytes_discarded += w.discarded as u64;
            if !self.degraded {
                self.degraded = true;
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    session = %self.session,
                    chunk = %chunk.name(),
                    discarded = w.discarded,
                    "spill device full, discarding input"
                );
            }
        } else if self.degraded {
            self.degraded = false;
            #[cfg(feature = "tracing")]
            tracing::info!(
                session = %self.session,
                discarded_total = self.stats.bytes_discarded,
                "spill device accepting writes again"
            );
        }

        Ok(w.accepted())
    }

    /// Write the whole of `buf`, across as many chunks as it takes.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            done += self.write(&buf[done..])?;
        }
        Ok(())
    }

    /// Reclaim fully consumed chunks, then report whether anything is unread.
    pub fn is_data_available(&mut self) -> Result<bool> {
        self.drop_used()?;
        Ok(self.chunks.front().map_or(false, |c| c.available() > 0))
    }

    /// Exact number of unread bytes across all chunks.
    pub fn available_bytes(&mut self) -> Result<usize> {
        self.drop_used()?;
        debug_assert_eq!(
            self.buffered,
            self.chunks.iter().map(|c| c.available()).sum::<usize>()
        );
        Ok(self.buffered)
    }

    /// Peek up to `buf.len()` bytes from the oldest chunk without consuming
    /// them. Never crosses into the next chunk.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.drop_used()?;
        let chunk = self.chunks.front_mut().ok_or(SpillError::Empty)?;
        if buf.is_empty() {
            return Ok(0);
        }
        if chunk.available() == 0 {
            return Err(SpillError::Empty);
        }
        chunk.peek(buf)
    }

    /// Commit `n` previously peeked bytes as consumed.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        let chunk = self.chunks.front_mut().ok_or(SpillError::Empty)?;
        chunk.advance(n)?;
        self.buffered -= n;
        self.stats.bytes_consumed += n as u64;
        Ok(())
    }

    /// Release every chunk and its backing file, unread data included.
    ///
    /// Keeps going past individual failures so that as many files as possible
    /// are removed; the first failure is returned.
    pub fn drain_all(&mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(chunk) = self.chunks.pop_front() {
            if let Err(e) = self.release(chunk) {
                first_err.get_or_insert(e);
            }
        }
        self.buffered = 0;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn drop_used(&mut self) -> Result<()> {
        while self.chunks.front().map_or(false, |c| c.is_drained()) {
            if let Some(chunk) = self.chunks.pop_front() {
                self.release(chunk)?;
            }
        }
        Ok(())
    }

    fn alloc_chunk(&mut self) -> Result<()> {
        let seq = self.next_seq;
        let name = ChunkName::new(self.session, seq);
        let chunk = Chunk::create(&self.storage, name, self.chunk_size)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(session = %self.session, chunk = %chunk.name(), "allocated chunk");
        self.next_seq = seq.next();
        self.stats.chunks_created += 1;
        self.chunks.push_back(chunk);
        Ok(())
    }

    fn release(&mut self, chunk: Chunk<S>) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            session = %self.session,
            chunk = %chunk.name(),
            unread = chunk.available(),
            "releasing chunk"
        );
        self.stats.chunks_removed += 1;
        chunk.release(&self.storage)
    }
}

impl<S: Storage> Drop for SpillQueue<S> {
    fn drop(&mut self) {
        if self.chunks.is_empty() {
            return;
        }
        if let Err(_e) = self.drain_all() {
            #[cfg(feature = "tracing")]
            tracing::error!(session = %self.session, error = %_e, "failed to release spill chunks");
        }
    }
}
