//! Message routing and stream-level control handling.
//!
//! The router owns the handler table (routing id to handler), expands
//! collated packets, and interprets control messages: the frame message is
//! the commit barrier fanned out to every handler, reset drops all state,
//! and end/frame-count/keyframe maintain the stream bookkeeping. Unknown
//! routing ids are logged and skipped so a stream with newer handlers
//! stays decodable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sceneframe_core::Connection;
use sceneframe_proto::{
    CollatedPacketDecoder, ControlId, ControlMessage, PacketReader, RoutingId, ServerInfo,
    control_flag,
};

use crate::camera::CameraHandler;
use crate::category::CategoryHandler;
use crate::errors::{Result, ViewError};
use crate::handler::{FrameStamp, MessageHandler};
use crate::mesh::MeshHandler;
use crate::shapes::ShapeHandler;

/// Routes decoded packets to handlers and drives the frame state machine.
pub struct MessageRouter {
    handlers: HashMap<u16, Arc<dyn MessageHandler>>,
    server_info: Mutex<ServerInfo>,
    frame_number: AtomicU64,
    total_frames: AtomicU64,
    render_mark: AtomicU64,
    render_requested: AtomicBool,
    ended: AtomicBool,
    decoder: Mutex<CollatedPacketDecoder>,
}

impl MessageRouter {
    /// Create a router with no handlers registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            server_info: Mutex::new(ServerInfo::default()),
            frame_number: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            render_mark: AtomicU64::new(0),
            render_requested: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            decoder: Mutex::new(CollatedPacketDecoder::new()),
        }
    }

    /// Create a router with the built-in handler set: mesh, camera,
    /// category and a shape handler per built-in shape routing id.
    #[must_use]
    pub fn with_default_handlers() -> Self {
        let mut router = Self::new();
        let shape_handlers: [(RoutingId, &'static str); 14] = [
            (RoutingId::Sphere, "sphere"),
            (RoutingId::Box, "box"),
            (RoutingId::Cone, "cone"),
            (RoutingId::Cylinder, "cylinder"),
            (RoutingId::Capsule, "capsule"),
            (RoutingId::Plane, "plane"),
            (RoutingId::Star, "star"),
            (RoutingId::Arrow, "arrow"),
            (RoutingId::MeshShape, "mesh shape"),
            (RoutingId::MeshSet, "mesh set"),
            (RoutingId::PointCloud, "point cloud"),
            (RoutingId::Text3D, "text 3d"),
            (RoutingId::Text2D, "text 2d"),
            (RoutingId::Pose, "pose"),
        ];
        for (routing_id, name) in shape_handlers {
            let handler = Arc::new(ShapeHandler::new(routing_id.to_u16(), name));
            // Fresh router; registration cannot collide.
            let _ = router.register(handler);
        }
        let _ = router.register(Arc::new(MeshHandler::new()));
        let _ = router.register(Arc::new(CameraHandler::new()));
        let _ = router.register(Arc::new(CategoryHandler::new()));
        router
    }

    /// Register `handler` for its routing id.
    ///
    /// # Errors
    ///
    /// `ViewError::DuplicateHandler` when the routing id is taken.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let routing_id = handler.routing_id();
        if self.handlers.contains_key(&routing_id) {
            return Err(ViewError::DuplicateHandler { routing_id });
        }
        handler.initialise();
        self.handlers.insert(routing_id, handler);
        Ok(())
    }

    /// The handler bound to `routing_id`.
    #[must_use]
    pub fn handler(&self, routing_id: u16) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(&routing_id)
    }

    /// The server configuration most recently received.
    #[must_use]
    pub fn server_info(&self) -> ServerInfo {
        self.server_info.lock().map(|info| *info).unwrap_or_default()
    }

    /// The current frame number.
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Acquire)
    }

    /// Total frames declared by a recorded stream, zero when unknown.
    #[must_use]
    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    /// Whether the stream signalled a clean end.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Take the pending force-render request, if any (set by the force
    /// frame flush control message).
    pub fn take_render_request(&self) -> bool {
        self.render_requested.swap(false, Ordering::AcqRel)
    }

    /// Decode one framed packet - expanding collations - verify integrity,
    /// and dispatch to handlers. Data thread.
    pub fn process_packet(&self, packet_bytes: &[u8]) -> Result<()> {
        let reader = PacketReader::new(packet_bytes)?;
        if reader.routing_id() == RoutingId::CollatedPacket.to_u16() {
            // Expand under the lock, collect, then dispatch so handler
            // work never runs inside the decoder lock.
            let inner = {
                let mut decoder = self.decoder.lock().map_err(|_| ViewError::Poisoned)?;
                decoder.set_packet(packet_bytes)?;
                let mut inner = Vec::new();
                while let Some(packet) = decoder.next_packet()? {
                    inner.push(packet);
                }
                inner
            };
            for packet in inner {
                self.dispatch(&packet)?;
            }
            return Ok(());
        }
        reader.check_crc()?;
        self.dispatch(packet_bytes)
    }

    /// Publish the latest committed frame to the renderer. Main thread.
    pub fn prepare_frame(&self) {
        let stamp = FrameStamp {
            frame_number: self.frame_number(),
            render_mark: self.render_mark.fetch_add(1, Ordering::AcqRel) + 1,
        };
        for handler in self.handlers.values() {
            handler.prepare_frame(&stamp);
        }
    }

    /// Drop all handler state and restart the frame clock at
    /// `frame_number`.
    pub fn reset(&self, frame_number: u64) {
        for handler in self.handlers.values() {
            handler.reset();
        }
        self.frame_number.store(frame_number, Ordering::Release);
        self.ended.store(false, Ordering::Release);
    }

    /// Re-emit every handler's committed state to `out`, prefixed by the
    /// current server info: enough for a fresh viewer to reconstruct the
    /// scene.
    pub fn serialise(&self, out: &dyn Connection) -> Result<()> {
        out.send_server_info(&self.server_info())?;
        let mut handlers: Vec<_> = self.handlers.values().collect();
        handlers.sort_by_key(|handler| handler.routing_id());
        for handler in handlers {
            handler.serialise(out)?;
        }
        Ok(())
    }

    fn dispatch(&self, packet_bytes: &[u8]) -> Result<()> {
        let mut reader = PacketReader::new(packet_bytes)?;
        let routing_id = reader.routing_id();

        if routing_id == RoutingId::ServerInfo.to_u16() {
            let info = ServerInfo::read(&mut reader)?;
            if let Ok(mut held) = self.server_info.lock() {
                *held = info;
            }
            for handler in self.handlers.values() {
                handler.update_server_info(&info);
            }
            return Ok(());
        }

        if routing_id == RoutingId::Control.to_u16() {
            return self.handle_control(&mut reader);
        }

        match self.handlers.get(&routing_id) {
            Some(handler) => handler.read_message(&mut reader),
            None => {
                tracing::warn!(routing_id, "no handler for routing id; packet skipped");
                Ok(())
            }
        }
    }

    fn handle_control(&self, reader: &mut PacketReader<'_>) -> Result<()> {
        let message = ControlMessage::read(reader)?;
        match ControlId::from_u16(reader.message_id()) {
            Some(ControlId::Frame) => {
                let frame = self.frame_number.fetch_add(1, Ordering::AcqRel) + 1;
                let flush = message.flags & control_flag::FRAME_PERSIST == 0;
                let stamp = FrameStamp {
                    frame_number: frame,
                    render_mark: self.render_mark.load(Ordering::Acquire),
                };
                for handler in self.handlers.values() {
                    handler.end_frame(&stamp, flush);
                }
            }
            Some(ControlId::CoordinateFrame) => {
                if let Some(frame) =
                    sceneframe_proto::CoordinateFrame::from_u8(message.value32 as u8)
                {
                    let info = {
                        let mut held =
                            self.server_info.lock().map_err(|_| ViewError::Poisoned)?;
                        held.coordinate_frame = frame;
                        *held
                    };
                    for handler in self.handlers.values() {
                        handler.update_server_info(&info);
                    }
                }
            }
            Some(ControlId::FrameCount) => {
                self.total_frames.store(u64::from(message.value32), Ordering::Release);
            }
            Some(ControlId::ForceFrameFlush) => {
                self.render_requested.store(true, Ordering::Release);
            }
            Some(ControlId::Reset) => {
                self.reset(u64::from(message.value32));
            }
            Some(ControlId::Keyframe) => {
                tracing::debug!(frame = message.value32, "keyframe marker");
            }
            Some(ControlId::End) => {
                self.ended.store(true, Ordering::Release);
            }
            _ => {
                tracing::warn!(
                    message_id = reader.message_id(),
                    "unknown control message skipped"
                );
            }
        }
        Ok(())
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("handlers", &self.handlers.len())
            .field("frame", &self.frame_number())
            .field("ended", &self.is_ended())
            .finish()
    }
}
