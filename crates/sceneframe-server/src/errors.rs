//! Error types for the server layer.

use sceneframe_core::CoreError;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised while running a server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Shape, resource or codec failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Socket or listener failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// No port in the configured range could be bound.
    #[error("no listen port available in {first}..={last}")]
    NoPortAvailable {
        /// First port tried.
        first: u16,
        /// Last port tried.
        last: u16,
    },

    /// The asynchronous monitor did not start within its timeout.
    #[error("connection monitor failed to start within {timeout_ms} ms")]
    MonitorStartTimeout {
        /// The timeout that elapsed.
        timeout_ms: u32,
    },
}
