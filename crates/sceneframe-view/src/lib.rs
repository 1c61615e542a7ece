//! Viewer-side handlers and frame state machine for sceneframe streams.
//!
//! A data thread feeds framed packets (from a socket or a recording) into
//! a [`MessageRouter`], which expands collations, verifies integrity and
//! routes messages to per-routing-id handlers. Handlers queue effects and
//! commit them at frame boundaries; the main thread calls
//! [`MessageRouter::prepare_frame`] to publish committed state for
//! drawing. The renderer itself is an external collaborator - this crate
//! exposes the deserialised shape records, mesh snapshots, cameras and
//! the category tree it consumes.

pub mod camera;
pub mod category;
pub mod errors;
pub mod handler;
pub mod mesh;
pub mod router;
pub mod shapes;

pub use camera::{CameraHandler, calculate_pitch_yaw, frame_axes};
pub use category::{CategoryHandler, CategoryInfo};
pub use errors::ViewError;
pub use handler::{FrameStamp, MessageHandler};
pub use mesh::{MeshData, MeshHandler, calculate_normals, colour_by_axis};
pub use router::MessageRouter;
pub use shapes::{ShapeHandler, ShapeRecord};
