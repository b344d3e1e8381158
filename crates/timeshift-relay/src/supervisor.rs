//! Connection supervisor for the relay shape.
//!
//! Each accepted client gets its own upstream connection and its own session
//! running as a separate task. Sessions share nothing but the cache directory
//! namespace; a failing session only tears down its own queue.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use timeshift_core::config::RelayConfig;
use timeshift_core::id::SessionId;
use timeshift_io::FsStorage;
use timeshift_spill::SpillQueue;

use crate::error::RelayError;
use crate::report::SessionReport;
use crate::session::{outcome_of, Session};

/// Validate `cfg`, bind the listen address and serve until `shutdown`.
pub async fn serve<F>(cfg: RelayConfig, shutdown: F) -> Result<(), RelayError>
where
    F: Future<Output = ()>,
{
    cfg.validate()?;
    let listener = TcpListener::bind(&cfg.listen)
        .await
        .map_err(|source| RelayError::Bind {
            addr: cfg.listen.clone(),
            source,
        })?;
    serve_on(listener, cfg, shutdown).await
}

/// Serve on an already bound listener.
///
/// On shutdown, stops accepting, aborts live sessions and waits for them to
/// release their chunks.
pub async fn serve_on<F>(listener: TcpListener, cfg: RelayConfig, shutdown: F) -> Result<(), RelayError>
where
    F: Future<Output = ()>,
{
    let cfg = Arc::new(cfg);
    if let Ok(addr) = listener.local_addr() {
        info!(listen = %addr, upstream = %cfg.upstream_addr(), "relay listening");
    }

    let mut sessions = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((client, peer)) => {
                    let cfg = Arc::clone(&cfg);
                    let id = SessionId::random();
                    let span = info_span!("session", id = %id, peer = %peer);
                    sessions.spawn(
                        async move {
                            match handle_client(id, client, peer, &cfg).await {
                                Ok(report) => report.emit(),
                                Err(e) => warn!(error = %e, "session not started"),
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "session task panicked");
                    }
                }
            }
        }
    }

    let live = sessions.len();
    if live > 0 {
        info!(sessions = live, "aborting live sessions");
    }
    sessions.shutdown().await;
    Ok(())
}

/// Connect upstream for one client and run its session to completion.
pub async fn handle_client(
    id: SessionId,
    client: TcpStream,
    peer: SocketAddr,
    cfg: &RelayConfig,
) -> Result<SessionReport, RelayError> {
    let addr = cfg.upstream_addr();
    let upstream = TcpStream::connect(&addr)
        .await
        .map_err(|source| RelayError::Connect { addr, source })?;
    info!(%peer, upstream = ?upstream.peer_addr().ok(), "connected");

    let storage = FsStorage::from_config(&cfg.shift)?;
    let queue = SpillQueue::new(storage, id, cfg.shift.chunk_size)?;
    let mut session = Session::new(queue, cfg.shift.transfer_unit);

    let (mut client_rx, mut client_tx) = client.into_split();
    let (mut upstream_rx, mut upstream_tx) = upstream.into_split();
    let res = session
        .relay(&mut client_rx, &mut client_tx, &mut upstream_rx, &mut upstream_tx)
        .await;
    Ok(session.close(outcome_of(res)))
}
