//! Shape and resource model for the sceneframe visualisation stream.
//!
//! Builds the object layer on top of the [`sceneframe_proto`] wire codec:
//!
//! - the [`shapes::Shape`] catalogue an instrumented host emits, from
//!   one-packet primitives to complex mesh shapes streamed in phases
//! - reference-counted [`resource::Resource`] transfer with byte-budgeted,
//!   resumable progress ([`registry::ResourceRegistry`])
//! - the [`connection::Connection`] sink abstraction shared by live TCP
//!   connections and the collating accumulator
//!   ([`collated::CollatedConnection`])
//! - recording stream layout with back-patched preamble
//!   ([`stream::initialise_stream`], [`stream::finalise_stream`])

pub mod collated;
pub mod colour;
pub mod connection;
pub mod errors;
pub mod mesh_resource;
pub mod registry;
pub mod resource;
pub mod shapes;
pub mod stream;

pub use collated::CollatedConnection;
pub use colour::Colour;
pub use connection::Connection;
pub use errors::CoreError;
pub use mesh_resource::MeshResource;
pub use registry::ResourceRegistry;
pub use resource::{Resource, TransferProgress, estimate_transfer_count};
pub use stream::{finalise_stream, initialise_stream};
