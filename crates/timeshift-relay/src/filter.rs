//! Filter shape: standard input to standard output through the cache directory.

use std::future::Future;

use timeshift_core::config::ShiftConfig;
use timeshift_core::id::SessionId;
use timeshift_io::FsStorage;
use timeshift_spill::SpillQueue;

use crate::error::RelayError;
use crate::report::SessionReport;
use crate::session::Session;
use crate::shutdown::shutdown_signal;

/// Time-shift stdin to stdout until input ends and drains, or SIGINT/SIGTERM.
pub async fn run_filter(cfg: &ShiftConfig) -> Result<SessionReport, RelayError> {
    run_filter_until(cfg, shutdown_signal()).await
}

/// Like [`run_filter`] with a caller-supplied termination future.
///
/// Configuration problems are returned as errors before any chunk exists;
/// everything after that is reported through the session outcome.
pub async fn run_filter_until<F>(cfg: &ShiftConfig, shutdown: F) -> Result<SessionReport, RelayError>
where
    F: Future<Output = ()>,
{
    cfg.validate()?;
    let storage = FsStorage::from_config(cfg)?;
    let session = SessionId::random();
    tracing::info!(
        session = %session,
        cache_dir = %storage.root().display(),
        chunk_size = cfg.chunk_size,
        "filter started"
    );
    let queue = SpillQueue::new(storage, session, cfg.chunk_size)?;
    let session = Session::new(queue, cfg.transfer_unit);

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let report = session.shift_until(&mut stdin, &mut stdout, shutdown).await;
    report.emit();
    Ok(report)
}
