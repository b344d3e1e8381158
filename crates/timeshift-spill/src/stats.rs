//! Counters kept by a spill queue over its lifetime.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillStats {
    pub chunks_created: u64,
    pub chunks_removed: u64,
    /// Bytes that actually reached a chunk file.
    pub bytes_stored: u64,
    /// Bytes reported as accepted but dropped because the device was full.
    pub bytes_discarded: u64,
    /// Bytes committed as consumed through `advance`.
    pub bytes_consumed: u64,
    /// Largest number of unread bytes held at once.
    pub peak_buffered: u64,
}

impl SpillStats {
    pub fn record_buffered(&mut self, buffered: usize) {
        self.peak_buffered = self.peak_buffered.max(buffered as u64);
    }
}
