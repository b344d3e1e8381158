//! Storage adapters implementing `timeshift_spill::Storage`.
//!
//! - `fs`: chunk files in the configured cache directory (default).
//! - `memory`: in-process files for tests, with write/read fault injection.

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::{Fault, MemoryStorage};
