use std::io;

use thiserror::Error;

use crate::chunk::ChunkName;

/// Result type local to timeshift-spill.
pub type Result<T> = std::result::Result<T, SpillError>;

/// Every variant is fatal for the owning session: once one of these surfaces,
/// the queue's offsets can no longer be trusted to match the backing files.
/// Disk exhaustion is deliberately absent; the queue absorbs it.
#[derive(Debug, Error)]
pub enum SpillError {
    #[error("bad chunk size {0}: must be > 0")]
    InvalidChunkSize(usize),

    #[error("create chunk {name}: {source}")]
    Create {
        name: ChunkName,
        #[source]
        source: io::Error,
    },

    #[error("write chunk {name}: {source}")]
    Write {
        name: ChunkName,
        #[source]
        source: io::Error,
    },

    #[error("read chunk {name}: {source}")]
    Read {
        name: ChunkName,
        #[source]
        source: io::Error,
    },

    #[error("seek chunk {name}: {source}")]
    Seek {
        name: ChunkName,
        #[source]
        source: io::Error,
    },

    #[error("remove chunk {name}: {source}")]
    Remove {
        name: ChunkName,
        #[source]
        source: io::Error,
    },

    #[error("end of file in chunk {name} at offset {offset}, {expected} bytes expected")]
    UnexpectedEof {
        name: ChunkName,
        offset: usize,
        expected: usize,
    },

    #[error("no chunk to read from")]
    Empty,

    #[error("advance by {requested} bytes in chunk {name} with only {available} unread")]
    AdvancePastWrite {
        name: ChunkName,
        requested: usize,
        available: usize,
    },

    #[error("advance by {requested} bytes in chunk {name} after peeking only {peeked}")]
    AdvancePastRead {
        name: ChunkName,
        requested: usize,
        peeked: usize,
    },
}
