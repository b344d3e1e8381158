//! In-memory storage backend for testing.
//!
//! Files are byte vectors in a shared map, so a test can keep a clone of the
//! storage and inspect what the queue materialised. Faults can be armed to
//! simulate a full disk or a failing device.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use timeshift_spill::{ChunkName, Storage};

/// Failure injected into subsequent writes or reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail every write with this error kind until cleared.
    Writes(io::ErrorKind),
    /// Fail every read with this error kind until cleared.
    Reads(io::ErrorKind),
    /// Let writes through but only partially: at most this many bytes per call.
    ShortWrites(usize),
}

#[derive(Default)]
struct Inner {
    files: HashMap<String, Vec<u8>>,
    fault: Option<Fault>,
    created: usize,
}

/// Thread-safe in-memory storage.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().fault = Some(fault);
    }

    pub fn clear_fault(&self) {
        self.lock().fault = None;
    }

    /// Number of live files.
    pub fn len(&self) -> usize {
        self.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of files ever created.
    pub fn created(&self) -> usize {
        self.lock().created
    }

    pub fn contains(&self, name: &ChunkName) -> bool {
        self.lock().files.contains_key(name.as_str())
    }

    /// Copy of a file's contents.
    pub fn contents(&self, name: &ChunkName) -> Option<Vec<u8>> {
        self.lock().files.get(name.as_str()).cloned()
    }
}

impl Storage for MemoryStorage {
    type Writer = MemoryWriter;
    type Reader = MemoryReader;

    fn create(&self, name: &ChunkName) -> io::Result<(MemoryWriter, MemoryReader)> {
        let mut inner = self.lock();
        if inner.files.contains_key(name.as_str()) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{name} already exists"),
            ));
        }
        inner.files.insert(name.0.clone(), Vec::new());
        inner.created += 1;
        drop(inner);

        let writer = MemoryWriter {
            store: self.clone(),
            name: name.0.clone(),
        };
        let reader = MemoryReader {
            store: self.clone(),
            name: name.0.clone(),
            pos: 0,
        };
        Ok((writer, reader))
    }

    fn remove(&self, name: &ChunkName) -> io::Result<()> {
        self.lock().files.remove(name.as_str());
        Ok(())
    }
}

fn gone(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{name} was removed"))
}

pub struct MemoryWriter {
    store: MemoryStorage,
    name: String,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.store.lock();
        let limit = match inner.fault {
            Some(Fault::Writes(kind)) => return Err(io::Error::from(kind)),
            Some(Fault::ShortWrites(max)) => max.max(1),
            _ => usize::MAX,
        };
        let file = inner.files.get_mut(&self.name).ok_or_else(|| gone(&self.name))?;
        let n = buf.len().min(limit);
        file.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct MemoryReader {
    store: MemoryStorage,
    name: String,
    pos: u64,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.store.lock();
        if let Some(Fault::Reads(kind)) = inner.fault {
            return Err(io::Error::from(kind));
        }
        let file = inner.files.get(&self.name).ok_or_else(|| gone(&self.name))?;
        let start = (self.pos as usize).min(file.len());
        let n = buf.len().min(file.len() - start);
        buf[..n].copy_from_slice(&file[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MemoryReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = {
            let inner = self.store.lock();
            inner.files.get(&self.name).ok_or_else(|| gone(&self.name))?.len() as i64
        };
        let next = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => len + d,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}
