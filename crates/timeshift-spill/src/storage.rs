//! Backing-file seam for chunks.

use std::io::{self, Read, Seek, Write};

use crate::chunk::ChunkName;

/// Abstract storage for chunk files.
///
/// Implemented by `timeshift-io::FsStorage` for a local cache directory and by
/// `timeshift-io::MemoryStorage` for tests.
pub trait Storage: Send {
    /// Write-only handle, appended to sequentially. Must not buffer: bytes
    /// reported as written have to be visible to the paired reader at once.
    type Writer: Write + Send;

    /// Read-only handle with its own cursor over the same file.
    type Reader: Read + Seek + Send;

    /// Create a new, empty backing file for `name` and open both handles.
    /// Must fail instead of reusing a file that already exists.
    fn create(&self, name: &ChunkName) -> io::Result<(Self::Writer, Self::Reader)>;

    /// Remove the backing file. Idempotent (no error if it is already gone).
    fn remove(&self, name: &ChunkName) -> io::Result<()>;
}

/// True when a write failed because the device has no space left.
pub fn is_storage_full(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::StorageFull
}
