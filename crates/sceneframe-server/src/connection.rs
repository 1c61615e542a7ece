//! A live TCP client connection.
//!
//! Producer threads share a connection; every operation synchronises
//! internally. Messages route through a per-connection collator when
//! collation is enabled, flushed at frame boundaries (and whenever a
//! collation fills), so each frame lands on the wire as a small number of
//! large packets while preserving emission order.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use sceneframe_core::connection::Connection;
use sceneframe_core::errors::{CoreError, Result};
use sceneframe_core::registry::ResourceRegistry;
use sceneframe_core::resource::Resource;
use sceneframe_core::shapes::Shape;
use sceneframe_proto::{
    CollatedPacket, ControlId, ControlMessage, PacketWriter, RoutingId, ServerInfo, control_flag,
};

use crate::settings::{ServerSettings, server_flag};

/// One connected viewer.
pub struct TcpConnection {
    stream: Mutex<TcpStream>,
    peer: SocketAddr,
    active: AtomicBool,
    connected: AtomicBool,
    flags: u32,
    collator: Mutex<CollatedPacket>,
    registry: Mutex<ResourceRegistry>,
    scratch: Mutex<Vec<u8>>,
    server_info: Mutex<ServerInfo>,
}

impl TcpConnection {
    /// Wrap an accepted socket under the given server settings.
    pub fn new(stream: TcpStream, settings: &ServerSettings) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let compress = settings.flags & server_flag::COMPRESS != 0;
        let mut collator =
            CollatedPacket::with_limit(compress, usize::from(settings.client_buffer_size));
        collator.set_compression_level(settings.compression_level);
        Ok(Self {
            stream: Mutex::new(stream),
            peer,
            active: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            flags: settings.flags,
            collator: Mutex::new(collator),
            registry: Mutex::new(ResourceRegistry::new()),
            scratch: Mutex::new(vec![0u8; usize::from(settings.client_buffer_size)]),
            server_info: Mutex::new(ServerInfo::default()),
        })
    }

    fn collate_enabled(&self) -> bool {
        self.flags & server_flag::COLLATE != 0
    }

    /// Write raw bytes to the socket, marking the connection dead on
    /// failure.
    fn write_wire(&self, bytes: &[u8]) -> Result<usize> {
        let mut stream = self.stream.lock().map_err(|_| CoreError::NotConnected)?;
        if let Err(error) = stream.write_all(bytes) {
            self.connected.store(false, Ordering::Release);
            tracing::debug!(peer = %self.peer, %error, "connection write failed");
            return Err(CoreError::Io(error));
        }
        Ok(bytes.len())
    }

    /// Flush any collated bytes to the wire.
    fn flush_collation(&self) -> Result<usize> {
        let mut collator = self.collator.lock().map_err(|_| CoreError::NotConnected)?;
        if collator.collated_bytes() == 0 {
            return Ok(0);
        }
        collator.finalise()?;
        let bytes = collator.data().to_vec();
        collator.reset();
        drop(collator);
        self.write_wire(&bytes)
    }

    /// Queue finalised packet bytes, collating when allowed.
    fn queue(&self, packet_bytes: &[u8], allow_collation: bool) -> Result<usize> {
        if !(allow_collation && self.collate_enabled()) {
            return self.write_wire(packet_bytes);
        }

        let mut collator = self.collator.lock().map_err(|_| CoreError::NotConnected)?;
        match collator.add(packet_bytes) {
            Ok(queued) => Ok(queued),
            Err(sceneframe_proto::ProtocolError::CollationOverflow { .. }) => {
                // Flush the full collation and start a fresh one.
                collator.finalise()?;
                let flushed = collator.data().to_vec();
                collator.reset();
                let requeued = collator.add(packet_bytes);
                drop(collator);
                self.write_wire(&flushed)?;
                match requeued {
                    Ok(queued) => Ok(queued),
                    Err(sceneframe_proto::ProtocolError::CollationOverflow { .. }) => {
                        // Too large to ever collate; send it discrete.
                        self.write_wire(packet_bytes)
                    }
                    Err(error) => Err(error.into()),
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Encode a shape message into the scratch buffer and queue it.
    fn queue_shape(
        &self,
        shape: &dyn Shape,
        write: impl Fn(&dyn Shape, &mut PacketWriter<'_>) -> std::result::Result<(), sceneframe_proto::ProtocolError>,
    ) -> Result<usize> {
        let mut scratch = self.scratch.lock().map_err(|_| CoreError::NotConnected)?;
        let mut packet = PacketWriter::new(&mut scratch, 0, 0)?;
        write(shape, &mut packet)?;
        packet.finalise()?;
        let bytes = packet.data().to_vec();
        drop(scratch);
        self.queue(&bytes, true)
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.peer)
            .field("active", &self.active())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection for TcpConnection {
    fn close(&self) {
        let _ = self.flush_collation();
        if let Ok(stream) = self.stream.lock() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected.store(false, Ordering::Release);
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn address(&self) -> String {
        self.peer.ip().to_string()
    }

    fn port(&self) -> u16 {
        self.peer.port()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn create(&self, shape: &dyn Shape) -> Result<usize> {
        if !self.active() {
            return Ok(0);
        }
        let mut sent = self.queue_shape(shape, |shape, packet| shape.write_create(packet))?;

        if shape.is_complex() {
            let mut progress = 0u32;
            loop {
                let mut scratch = self.scratch.lock().map_err(|_| CoreError::NotConnected)?;
                let mut packet = PacketWriter::new(&mut scratch, 0, 0)?;
                let more = shape.write_data(&mut packet, &mut progress)?;
                packet.finalise()?;
                let bytes = packet.data().to_vec();
                drop(scratch);
                sent += self.queue(&bytes, true)?;
                if !more {
                    break;
                }
            }
        }

        if !shape.skip_resources() {
            for resource in shape.resources() {
                self.reference_resource(&resource);
            }
        }
        Ok(sent)
    }

    fn update(&self, shape: &dyn Shape) -> Result<usize> {
        if !self.active() {
            return Ok(0);
        }
        self.queue_shape(shape, |shape, packet| shape.write_update(packet))
    }

    fn destroy(&self, shape: &dyn Shape) -> Result<usize> {
        if !self.active() {
            return Ok(0);
        }
        let sent = self.queue_shape(shape, |shape, packet| shape.write_destroy(packet))?;
        if !shape.skip_resources() {
            for resource in shape.resources() {
                self.release_resource(&resource);
            }
        }
        Ok(sent)
    }

    fn update_frame(&self, dt: f32, flush: bool) -> Result<usize> {
        if !self.active() {
            return Ok(0);
        }

        let time_unit = self
            .server_info
            .lock()
            .map(|info| info.time_unit.max(1))
            .unwrap_or(1000);
        let ticks = if dt > 0.0 {
            ((f64::from(dt) * 1.0e6) / time_unit as f64).round() as u32
        } else {
            0
        };
        let message = ControlMessage {
            flags: if flush { 0 } else { control_flag::FRAME_PERSIST },
            value32: ticks,
            value64: 0,
        };

        let bytes = {
            let mut scratch = self.scratch.lock().map_err(|_| CoreError::NotConnected)?;
            let mut packet = PacketWriter::new(
                &mut scratch,
                RoutingId::Control.to_u16(),
                ControlId::Frame.to_u16(),
            )?;
            message.write(&mut packet)?;
            packet.finalise()?;
            packet.data().to_vec()
        };

        let mut sent = 0;
        if self.flags & server_flag::NAKED_FRAME_MESSAGE != 0 {
            // Frame messages double as byte-level sync points: flush the
            // collation, then put the frame packet on the wire discrete.
            sent += self.flush_collation()?;
            sent += self.queue(&bytes, false)?;
        } else {
            sent += self.queue(&bytes, true)?;
            sent += self.flush_collation()?;
        }
        Ok(sent)
    }

    fn update_transfers(&self, byte_limit: u32) -> Result<usize> {
        if !self.active() {
            return Ok(0);
        }
        let mut registry = self.registry.lock().map_err(|_| CoreError::NotConnected)?;
        registry.update_transfers(byte_limit, &mut |bytes| self.queue(bytes, true))
    }

    fn reference_resource(&self, resource: &std::sync::Arc<dyn Resource>) -> usize {
        self.registry.lock().map(|mut registry| registry.reference(resource)).unwrap_or(0)
    }

    fn release_resource(&self, resource: &std::sync::Arc<dyn Resource>) -> usize {
        let Ok(mut registry) = self.registry.lock() else {
            return 0;
        };
        let (count, destroyed) = registry.release(resource);
        drop(registry);
        if let Some(resource) = destroyed {
            let result: Result<usize> = (|| {
                let mut scratch = self.scratch.lock().map_err(|_| CoreError::NotConnected)?;
                let mut packet = PacketWriter::new(&mut scratch, 0, 0)?;
                resource.write_destroy(&mut packet)?;
                packet.finalise()?;
                let bytes = packet.data().to_vec();
                drop(scratch);
                self.queue(&bytes, true)
            })();
            if let Err(error) = result {
                tracing::warn!(peer = %self.peer, %error, "resource destroy send failed");
            }
        }
        count
    }

    fn send_server_info(&self, info: &ServerInfo) -> Result<usize> {
        if !self.active() {
            return Ok(0);
        }
        if let Ok(mut held) = self.server_info.lock() {
            *held = *info;
        }
        let bytes = {
            let mut scratch = self.scratch.lock().map_err(|_| CoreError::NotConnected)?;
            let mut packet =
                PacketWriter::new(&mut scratch, RoutingId::ServerInfo.to_u16(), 0)?;
            info.write(&mut packet)?;
            packet.finalise()?;
            packet.data().to_vec()
        };
        // Server info frames the start of the byte stream; never collate it.
        self.queue(&bytes, false)
    }

    fn send(&self, packet_bytes: &[u8], allow_collation: bool) -> Result<usize> {
        if !self.active() {
            return Ok(0);
        }
        self.queue(packet_bytes, allow_collation)
    }
}
