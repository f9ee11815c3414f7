//! Crate-level error types for worker infrastructure failures.
//!
//! Business failures never travel through these types: a step that fails
//! produces a [`crate::core::StepResult`] with an error code. `WorkerError`
//! covers the infrastructure seams only (bus publishing, endpoint sockets,
//! stage channels).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("bus publish failed: {0}")]
    BusPublish(String),

    #[error("failed to bind endpoint on {addr}: {source}")]
    EndpointBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("handler init failed for {block_type}: {message}")]
    HandlerInit { block_type: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
