//! Per-session counters and the summary emitted when a session ends.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use timeshift_core::id::SessionId;
use timeshift_spill::SpillStats;

use crate::session::SessionEnd;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Bytes read from the source and handed to the queue.
    pub bytes_in: u64,
    /// Bytes delivered to the sink.
    pub bytes_out: u64,
    /// Bytes passed straight through on the unbuffered client-to-upstream path.
    pub bytes_forwarded: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SessionOutcome {
    /// Input ended and every queued byte reached the sink.
    Drained,
    /// The sink (or the client) went away.
    PeerGone,
    /// Torn down by a termination request before finishing.
    Cancelled,
    /// Ended by a fatal error.
    Failed(String),
}

impl From<SessionEnd> for SessionOutcome {
    fn from(end: SessionEnd) -> Self {
        match end {
            SessionEnd::Drained => SessionOutcome::Drained,
            SessionEnd::PeerGone => SessionOutcome::PeerGone,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: SessionId,
    pub outcome: SessionOutcome,
    pub stats: SessionStats,
    pub spill: SpillStats,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl SessionReport {
    pub fn duration_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Log the summary at a level matching the outcome.
    pub fn emit(&self) {
        match &self.outcome {
            SessionOutcome::Failed(err) => tracing::error!(
                session = %self.session,
                error = %err,
                bytes_in = self.stats.bytes_in,
                bytes_out = self.stats.bytes_out,
                "session failed"
            ),
            outcome => tracing::info!(
                session = %self.session,
                outcome = ?outcome,
                bytes_in = self.stats.bytes_in,
                bytes_out = self.stats.bytes_out,
                forwarded = self.stats.bytes_forwarded,
                discarded = self.spill.bytes_discarded,
                chunks = self.spill.chunks_created,
                peak_buffered = self.spill.peak_buffered,
                duration_ms = self.duration_ms(),
                "session finished"
            ),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
