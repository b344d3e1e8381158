//! One fixed-capacity segment of the spill queue.
//!
//! A chunk owns two handles on the same backing file: a writer positioned at
//! `offw` and a reader positioned at `offr`. `0 <= offr <= offw <= capacity`
//! holds at all times. `peeked` counts the bytes past `offr` that the last
//! peek handed out and no advance has committed yet; advancing never goes
//! beyond them.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};
use timeshift_core::id::{ChunkSeq, SessionId};

use crate::error::{Result, SpillError};
use crate::storage::{is_storage_full, Storage};

/// File name of a chunk, unique per session and sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkName(pub String);

impl ChunkName {
    pub const PREFIX: &'static str = "timeshift-";
    pub const SUFFIX: &'static str = ".chunk";

    pub fn new(session: SessionId, seq: ChunkSeq) -> Self {
        ChunkName(format!(
            "{}{}-{:06}{}",
            Self::PREFIX,
            session.simple(),
            seq.get(),
            Self::SUFFIX
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `file_name` looks like something [`ChunkName::new`] produced.
    pub fn is_chunk_file(file_name: &str) -> bool {
        file_name.starts_with(Self::PREFIX) && file_name.ends_with(Self::SUFFIX)
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a single [`Chunk::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWrite {
    /// Bytes that landed in the file; `offw` advanced by this much.
    pub stored: usize,
    /// Bytes dropped because the device filled up.
    pub discarded: usize,
}

impl ChunkWrite {
    pub fn accepted(&self) -> usize {
        self.stored + self.discarded
    }
}

pub struct Chunk<S: Storage> {
    name: ChunkName,
    capacity: usize,
    writer: S::Writer,
    reader: S::Reader,
    offw: usize,
    offr: usize,
    peeked: usize,
}

impl<S: Storage> Chunk<S> {
    /// Create the backing file and open both cursors at offset 0.
    pub fn create(storage: &S, name: ChunkName, capacity: usize) -> Result<Self> {
        let (writer, reader) = storage
            .create(&name)
            .map_err(|source| SpillError::Create { name: name.clone(), source })?;
        Ok(Self {
            name,
            capacity,
            writer,
            reader,
            offw: 0,
            offr: 0,
            peeked: 0,
        })
    }

    pub fn name(&self) -> &ChunkName {
        &self.name
    }

    /// Unread bytes in this chunk.
    pub fn available(&self) -> usize {
        self.offw - self.offr
    }

    pub fn is_full(&self) -> bool {
        self.offw == self.capacity
    }

    pub fn is_drained(&self) -> bool {
        self.is_full() && self.offr == self.offw
    }

    /// Append as much of `buf` as fits.
    ///
    /// Disk exhaustion ends the call early and reports the rest of `buf` as
    /// discarded, so the caller sees the whole input as accepted.
    pub fn write(&mut self, buf: &[u8]) -> Result<ChunkWrite> {
        let mut stored = 0;
        while self.offw < self.capacity && stored < buf.len() {
            let towr = (self.capacity - self.offw).min(buf.len() - stored);
            match self.writer.write(&buf[stored..stored + towr]) {
                Ok(0) => {
                    return Err(SpillError::Write {
                        name: self.name.clone(),
                        source: io::Error::from(io::ErrorKind::WriteZero),
                    })
                }
                Ok(n) => {
                    stored += n;
                    self.offw += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_storage_full(&e) => {
                    return Ok(ChunkWrite {
                        stored,
                        discarded: buf.len() - stored,
                    })
                }
                Err(source) => {
                    return Err(SpillError::Write {
                        name: self.name.clone(),
                        source,
                    })
                }
            }
        }
        Ok(ChunkWrite { stored, discarded: 0 })
    }

    /// Copy up to `buf.len()` unread bytes into `buf` without consuming them.
    pub fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
        let tord = self.available().min(buf.len());
        if tord == 0 {
            return Ok(0);
        }
        let n = loop {
            match self.reader.read(&mut buf[..tord]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(SpillError::Read {
                        name: self.name.clone(),
                        source,
                    })
                }
            }
        };
        if n == 0 {
            return Err(SpillError::UnexpectedEof {
                name: self.name.clone(),
                offset: self.offr,
                expected: tord,
            });
        }
        self.seek_reader(-(n as i64))?;
        self.peeked = n;
        Ok(n)
    }

    /// Commit `n` bytes as consumed. Only bytes a peek has returned and no
    /// earlier advance has committed can be consumed.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if n > self.available() {
            return Err(SpillError::AdvancePastWrite {
                name: self.name.clone(),
                requested: n,
                available: self.available(),
            });
        }
        if n > self.peeked {
            return Err(SpillError::AdvancePastRead {
                name: self.name.clone(),
                requested: n,
                peeked: self.peeked,
            });
        }
        if n == 0 {
            return Ok(());
        }
        self.seek_reader(n as i64)?;
        self.offr += n;
        self.peeked -= n;
        Ok(())
    }

    fn seek_reader(&mut self, delta: i64) -> Result<()> {
        self.reader
            .seek(SeekFrom::Current(delta))
            .map_err(|source| SpillError::Seek {
                name: self.name.clone(),
                source,
            })?;
        Ok(())
    }

    /// Close both handles and remove the backing file.
    pub fn release(self, storage: &S) -> Result<()> {
        let Chunk {
            name,
            writer,
            reader,
            ..
        } = self;
        drop(writer);
        drop(reader);
        storage
            .remove(&name)
            .map_err(|source| SpillError::Remove { name, source })
    }
}
