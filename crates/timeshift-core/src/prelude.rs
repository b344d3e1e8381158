//! Convenient re-exports for downstream crates.

pub use crate::config::{ConfigFile, RelayConfig, ShiftConfig};
pub use crate::error::{Error, Result};
pub use crate::id::{ChunkSeq, SessionId};
