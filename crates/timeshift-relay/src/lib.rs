#![forbid(unsafe_code)]
//! timeshift-relay: the event loop that drives a spill queue.
//!
//! A [`Session`] owns one [`SpillQueue`](timeshift_spill::SpillQueue) and
//! pumps bytes from a source into it and from it into a sink, waiting on
//! readiness of whichever side currently has work. Two entry points sit on
//! top of it:
//! - [`filter::run_filter`]: stdin to stdout through the cache directory,
//! - [`supervisor::serve`]: a TCP relay with one session per client.

pub mod error;
pub mod filter;
pub mod report;
pub mod session;
pub mod shutdown;
pub mod supervisor;

pub use error::RelayError;
pub use report::{SessionOutcome, SessionReport, SessionStats};
pub use session::{Session, SessionEnd};
pub use shutdown::shutdown_signal;
