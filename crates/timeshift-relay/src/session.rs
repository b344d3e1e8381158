//! One producer/consumer pairing and the loop that drives its spill queue.
//!
//! The loop waits on readiness of exactly the descriptors that have work:
//! the source while it has not reached end of stream, the sink while the
//! queue holds unread bytes, and in the relay shape the client while it keeps
//! sending. Disk writes happen inline, so a slow disk throttles the source.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use timeshift_core::id::SessionId;
use timeshift_io::is_peer_gone;
use timeshift_spill::{SpillQueue, Storage};

use crate::error::RelayError;
use crate::report::{now_millis, SessionOutcome, SessionReport, SessionStats};

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Input reached end of stream and every queued byte was delivered.
    Drained,
    /// The consumer went away (broken pipe, reset, or no longer connected).
    PeerGone,
}

pub struct Session<S: Storage> {
    id: SessionId,
    queue: SpillQueue<S>,
    transfer_unit: usize,
    stats: SessionStats,
    started_ms: u64,
}

impl<S: Storage> Session<S> {
    pub fn new(queue: SpillQueue<S>, transfer_unit: usize) -> Self {
        Self {
            id: queue.session(),
            queue,
            transfer_unit: transfer_unit.max(1),
            stats: SessionStats::default(),
            started_ms: now_millis(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn queue(&self) -> &SpillQueue<S> {
        &self.queue
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Filter shape: time-shift `source` into `sink`.
    ///
    /// The queue is released before this returns, whatever the result.
    pub async fn shift<R, W>(&mut self, source: &mut R, sink: &mut W) -> Result<SessionEnd, RelayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        debug!(session = %self.id, chunk_size = self.queue.chunk_size(), "shifting stream");
        let res = self
            .pump(source, sink, None::<(&mut tokio::io::Empty, &mut tokio::io::Sink)>)
            .await;
        self.teardown(res)
    }

    /// Relay shape: the upstream's response is queued on its way to the
    /// client, while the client's bytes go to the upstream unbuffered.
    pub async fn relay<CR, CW, UR, UW>(
        &mut self,
        client_rx: &mut CR,
        client_tx: &mut CW,
        upstream_rx: &mut UR,
        upstream_tx: &mut UW,
    ) -> Result<SessionEnd, RelayError>
    where
        CR: AsyncRead + Unpin,
        CW: AsyncWrite + Unpin,
        UR: AsyncRead + Unpin,
        UW: AsyncWrite + Unpin,
    {
        debug!(session = %self.id, chunk_size = self.queue.chunk_size(), "relaying connection");
        let res = self
            .pump(upstream_rx, client_tx, Some((client_rx, upstream_tx)))
            .await;
        self.teardown(res)
    }

    /// Run [`shift`](Self::shift) until it finishes or `shutdown` resolves,
    /// then release the queue and summarise.
    pub async fn shift_until<R, W, F>(mut self, source: &mut R, sink: &mut W, shutdown: F) -> SessionReport
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            res = self.shift(source, sink) => outcome_of(res),
            _ = shutdown => SessionOutcome::Cancelled,
        };
        self.close(outcome)
    }

    /// Release every chunk and build the report. Safe to call after the loop
    /// was cancelled mid-flight.
    pub fn close(mut self, outcome: SessionOutcome) -> SessionReport {
        if let Err(e) = self.queue.drain_all() {
            error!(session = %self.id, error = %e, "failed to release spill chunks");
        }
        SessionReport {
            session: self.id,
            outcome,
            stats: self.stats,
            spill: self.queue.stats(),
            started_ms: self.started_ms,
            finished_ms: now_millis(),
        }
    }

    fn teardown(&mut self, res: Result<SessionEnd, RelayError>) -> Result<SessionEnd, RelayError> {
        let released = self.queue.drain_all();
        let end = res?;
        released?;
        Ok(end)
    }

    async fn pump<R, W, FR, FW>(
        &mut self,
        source: &mut R,
        sink: &mut W,
        forward: Option<(&mut FR, &mut FW)>,
    ) -> Result<SessionEnd, RelayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        FR: AsyncRead + Unpin,
        FW: AsyncWrite + Unpin,
    {
        let unit = self.transfer_unit;
        let mut inbuf = vec![0u8; unit];
        // outbuf[..pending] always mirrors the next unread bytes of the queue.
        let mut outbuf = vec![0u8; unit];
        let mut pending = 0usize;

        let (mut fwd_rx, mut fwd_tx) = match forward {
            Some((rx, tx)) => (Some(rx), Some(tx)),
            None => (None, None),
        };
        let mut fwdbuf = vec![0u8; if fwd_rx.is_some() { unit } else { 0 }];
        let mut input_open = true;
        let mut forward_open = fwd_rx.is_some();

        loop {
            if pending == 0 && self.queue.is_data_available()? {
                pending = self.queue.read(&mut outbuf)?;
            }
            if !input_open && pending == 0 {
                return self.finish_sink(sink).await;
            }

            tokio::select! {
                res = source.read(&mut inbuf), if input_open => match res {
                    Ok(0) => {
                        input_open = false;
                        debug!(session = %self.id, bytes_in = self.stats.bytes_in, "input reached end of stream");
                    }
                    Ok(n) => {
                        self.queue.write_all(&inbuf[..n])?;
                        self.stats.bytes_in += n as u64;
                    }
                    Err(e) => {
                        input_open = false;
                        warn!(session = %self.id, error = %e, "source read failed, treating as end of stream");
                    }
                },
                res = sink.write(&outbuf[..pending]), if pending > 0 => match res {
                    Ok(0) => return Err(RelayError::SinkClosed),
                    Ok(n) => {
                        self.queue.advance(n)?;
                        outbuf.copy_within(n..pending, 0);
                        pending -= n;
                        self.stats.bytes_out += n as u64;
                    }
                    Err(e) if is_peer_gone(&e) => {
                        info!(session = %self.id, error = %e, "consumer went away");
                        return Ok(SessionEnd::PeerGone);
                    }
                    Err(e) => return Err(RelayError::Sink(e)),
                },
                res = read_opt(fwd_rx.as_deref_mut(), &mut fwdbuf), if forward_open => match res {
                    Ok(0) => {
                        forward_open = false;
                        debug!(session = %self.id, forwarded = self.stats.bytes_forwarded, "client finished sending");
                        if let Some(tx) = fwd_tx.as_deref_mut() {
                            match tx.shutdown().await {
                                Ok(()) => {}
                                Err(e) if is_peer_gone(&e) => {}
                                Err(e) => return Err(RelayError::Upstream(e)),
                            }
                        }
                    }
                    Ok(n) => {
                        if let Some(tx) = fwd_tx.as_deref_mut() {
                            match tx.write_all(&fwdbuf[..n]).await {
                                Ok(()) => self.stats.bytes_forwarded += n as u64,
                                Err(e) if is_peer_gone(&e) => {
                                    info!(session = %self.id, error = %e, "upstream went away");
                                    return Ok(SessionEnd::PeerGone);
                                }
                                Err(e) => return Err(RelayError::Upstream(e)),
                            }
                        }
                    }
                    Err(e) if is_peer_gone(&e) => {
                        info!(session = %self.id, error = %e, "client went away");
                        return Ok(SessionEnd::PeerGone);
                    }
                    Err(e) => return Err(RelayError::Client(e)),
                },
            }
        }
    }

    async fn finish_sink<W: AsyncWrite + Unpin>(&mut self, sink: &mut W) -> Result<SessionEnd, RelayError> {
        match sink.shutdown().await {
            Ok(()) => {
                debug!(session = %self.id, bytes_out = self.stats.bytes_out, "queue drained");
                Ok(SessionEnd::Drained)
            }
            Err(e) if is_peer_gone(&e) => Ok(SessionEnd::PeerGone),
            Err(e) => Err(RelayError::Sink(e)),
        }
    }
}

pub(crate) fn outcome_of(res: Result<SessionEnd, RelayError>) -> SessionOutcome {
    match res {
        Ok(end) => end.into(),
        Err(e) => SessionOutcome::Failed(e.to_string()),
    }
}

/// Read from `rx` if there is one; otherwise never complete.
async fn read_opt<R: AsyncRead + Unpin>(rx: Option<&mut R>, buf: &mut [u8]) -> std::io::Result<usize> {
    match rx {
        Some(rx) => rx.read(buf).await,
        None => std::future::pending().await,
    }
}
