#![forbid(unsafe_code)]
//! timeshift-core: ids, configuration, and errors shared by every timeshift crate.
//!
//! Nothing in here touches the filesystem or the network; configuration values
//! are plain data that the binary layer fills in and the spill/relay crates
//! consume.

pub mod config;
pub mod error;
pub mod id;
pub mod prelude;
