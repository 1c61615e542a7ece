//! Error types for the shape and resource model.

use sceneframe_proto::{ProtocolError, StreamError};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by connections, resources and recording streams.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Wire codec failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Underlying transport or file failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires a live connection.
    #[error("not connected")]
    NotConnected,

    /// The sink does not support this operation.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the refused operation.
        operation: &'static str,
    },

    /// Resource id is not registered on this connection.
    #[error("unknown resource: {id:#018x}")]
    UnknownResource {
        /// Combined resource key (type and id).
        id: u64,
    },

    /// A recording stream lacks the expected preamble packets.
    #[error("stream preamble not found; recording cannot be finalised")]
    PreambleMissing,
}

impl From<StreamError> for CoreError {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::Io(io) => Self::Io(io),
            StreamError::Protocol(protocol) => Self::Protocol(protocol),
        }
    }
}
