//! The outbound sink abstraction.
//!
//! A [`Connection`] is anywhere shape and resource messages can be sent: a
//! live TCP client, or a collated packet accumulating bytes for later (the
//! recording path). Producer threads share connections, so every method
//! takes `&self` and implementations synchronise internally.
//!
//! While a connection is inactive all send-producing calls return `Ok(0)`
//! and do nothing.

use std::sync::Arc;

use sceneframe_proto::ServerInfo;

use crate::errors::Result;
use crate::resource::Resource;
use crate::shapes::Shape;

/// An outbound message sink for shapes, resources and frame control.
pub trait Connection: Send + Sync {
    /// Close the connection. Further sends return zero.
    fn close(&self);

    /// Activate or deactivate the connection. Messages are ignored while
    /// inactive.
    fn set_active(&self, active: bool);

    /// Whether the connection is currently active.
    fn active(&self) -> bool;

    /// End point address; the form depends on the connection type.
    fn address(&self) -> String;

    /// End point port, or zero where ports do not apply.
    fn port(&self) -> u16;

    /// Whether the underlying transport is live.
    fn is_connected(&self) -> bool;

    /// Send a creation message for `shape`, including any data packets a
    /// complex shape needs. Returns bytes queued.
    fn create(&self, shape: &dyn Shape) -> Result<usize>;

    /// Send an update message for `shape`. Returns bytes queued.
    fn update(&self, shape: &dyn Shape) -> Result<usize>;

    /// Send a destroy message for `shape`. Returns bytes queued.
    fn destroy(&self, shape: &dyn Shape) -> Result<usize>;

    /// End the current frame.
    ///
    /// `dt` is the frame duration in seconds (zero selects the server
    /// default frame time). `flush` false marks the frame persistent:
    /// viewers keep transient shapes alive through the boundary.
    fn update_frame(&self, dt: f32, flush: bool) -> Result<usize>;

    /// Progress pending resource transfers under `byte_limit` (zero =
    /// transfer everything now). Returns bytes queued.
    fn update_transfers(&self, byte_limit: u32) -> Result<usize>;

    /// Add a reference to `resource`, queueing it for transfer on the first
    /// reference. Returns the reference count after the addition.
    fn reference_resource(&self, resource: &Arc<dyn Resource>) -> usize;

    /// Release a reference to `resource`, emitting its destroy message when
    /// the count reaches zero. Returns the count after the release.
    fn release_resource(&self, resource: &Arc<dyn Resource>) -> usize;

    /// Send the server configuration. The first packet on every new byte
    /// stream must be this message.
    fn send_server_info(&self, info: &ServerInfo) -> Result<usize>;

    /// Send a finalised packet's bytes. `allow_collation` false bypasses
    /// any collation and compression so the bytes land on the wire as a
    /// discrete packet.
    fn send(&self, packet_bytes: &[u8], allow_collation: bool) -> Result<usize>;
}
