//! timeshift: a pipe that spills everything in flight to disk.
//!
//! Facade over the workspace crates; see `timeshift-spill` for the queue and
//! `timeshift-relay` for the loop that drives it.

pub use timeshift_core;
pub use timeshift_io;
pub use timeshift_relay;
pub use timeshift_spill;
