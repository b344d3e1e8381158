use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use timeshift_core::config::ShiftConfig;
use timeshift_spill::{ChunkName, Storage};

/// Chunk files inside one cache directory.
///
/// Several sessions may share the directory: chunk names embed a random
/// session id and files are opened with `create_new`, so two sessions can
/// never end up writing the same file.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build from a validated config.
    pub fn from_config(cfg: &ShiftConfig) -> timeshift_core::error::Result<Self> {
        Ok(Self::new(cfg.cache_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &ChunkName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Chunk files currently present in the cache directory, from any session.
    pub fn list_chunks(&self) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if ChunkName::is_chunk_file(name) {
                    out.push(entry.path());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

impl Storage for FsStorage {
    type Writer = File;
    type Reader = File;

    fn create(&self, name: &ChunkName) -> io::Result<(File, File)> {
        let path = self.path_of(name);

        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let writer = opts.open(&path)?;

        match File::open(&path) {
            Ok(reader) => Ok((writer, reader)),
            Err(e) => {
                drop(writer);
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    fn remove(&self, name: &ChunkName) -> io::Result<()> {
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
