use std::io;

use thiserror::Error;
use timeshift_spill::SpillError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] timeshift_core::error::Error),

    #[error("spill queue: {0}")]
    Spill(#[from] SpillError),

    #[error("write to sink: {0}")]
    Sink(#[source] io::Error),

    #[error("sink accepted zero bytes")]
    SinkClosed,

    #[error("read from client: {0}")]
    Client(#[source] io::Error),

    #[error("write to upstream: {0}")]
    Upstream(#[source] io::Error),

    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}
