#![forbid(unsafe_code)]
//! timeshift-io: storage adapters and I/O error classification.
//!
//! - `storage::FsStorage`: chunk files in a cache directory (default).
//! - `storage::MemoryStorage`: in-process files with fault injection, for tests.
//! - `peer`: tells "the other side went away" apart from real I/O failures.

pub mod peer;
pub mod storage;

pub use peer::is_peer_gone;
pub use storage::{Fault, FsStorage, MemoryStorage};
