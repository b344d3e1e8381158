#![forbid(unsafe_code)]
//! timeshift-spill: the disk-backed chunked FIFO.
//!
//! A [`SpillQueue`] is an ordered run of fixed-capacity chunks, each backed by
//! one file obtained from a [`Storage`]. Writes append to the newest chunk,
//! reads peek at the oldest one, and a chunk is removed the moment it has been
//! both filled and fully consumed.
//!
//! Concrete storages live in `timeshift-io`; this crate only defines the seam.

pub mod chunk;
pub mod error;
pub mod queue;
pub mod stats;
pub mod storage;

pub use chunk::{Chunk, ChunkName};
pub use error::{Result, SpillError};
pub use queue::SpillQueue;
pub use stats::SpillStats;
pub use storage::{is_storage_full, Storage};
