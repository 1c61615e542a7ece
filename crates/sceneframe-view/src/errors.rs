//! Error types for the viewer-side handlers.

use sceneframe_core::CoreError;
use sceneframe_proto::ProtocolError;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ViewError>;

/// Errors raised while decoding and applying a scene stream.
#[derive(Error, Debug)]
pub enum ViewError {
    /// Wire codec failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Shape or connection layer failure (serialisation paths).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A handler is already registered for the routing id.
    #[error("handler already registered for routing id {routing_id}")]
    DuplicateHandler {
        /// The contested routing id.
        routing_id: u16,
    },

    /// Mesh component or finalise message for a mesh never created.
    #[error("mesh message for unknown mesh {mesh_id}")]
    UnknownMesh {
        /// The offending mesh id.
        mesh_id: u32,
    },

    /// Data message for a shape id with no pending or committed create.
    #[error("data message for unknown shape {id}")]
    UnknownShape {
        /// The offending shape id.
        id: u32,
    },

    /// A category record would introduce a parent cycle.
    #[error("category {category_id} would create a cycle")]
    CategoryCycle {
        /// The offending category id.
        category_id: u16,
    },

    /// Handler state is poisoned (a holder panicked).
    #[error("handler state poisoned")]
    Poisoned,
}
