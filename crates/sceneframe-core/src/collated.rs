//! The collated packet as an outbound sink.
//!
//! Producer threads stage messages into their own [`CollatedConnection`]
//! without contention, then hand the finalised buffer to the real
//! connection as one atomic unit. The same type serves recording paths
//! that want collation or compression before hitting disk.
//!
//! Frame advance and resource transfer make no sense on an accumulator,
//! so those operations report unsupported; resource referencing is a
//! no-op (the owning connection tracks references).

use std::sync::{Arc, Mutex};

use sceneframe_proto::{
    CollatedPacket, CompressionLevel, PacketWriter, ProtocolError, RoutingId, ServerInfo,
};

use crate::connection::Connection;
use crate::errors::{CoreError, Result};
use crate::resource::Resource;
use crate::shapes::Shape;

struct Inner {
    collator: CollatedPacket,
    scratch: Vec<u8>,
    active: bool,
}

/// A [`Connection`] that accumulates packets into a collated buffer
/// instead of sending them.
pub struct CollatedConnection {
    inner: Mutex<Inner>,
}

impl CollatedConnection {
    /// Create a collating sink; `compress` enables gzip on finalise.
    #[must_use]
    pub fn new(compress: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                collator: CollatedPacket::new(compress),
                scratch: vec![0u8; 0xFFFF],
                active: true,
            }),
        }
    }

    /// Set the compression level used at finalise.
    pub fn set_compression_level(&self, level: CompressionLevel) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.collator.set_compression_level(level);
        }
    }

    /// Bytes collated so far.
    #[must_use]
    pub fn collated_bytes(&self) -> usize {
        self.inner.lock().map(|inner| inner.collator.collated_bytes()).unwrap_or(0)
    }

    /// Finalise the collation and return the framed outer packet bytes.
    /// Empty when nothing was collated.
    pub fn finalise(&self) -> Result<Vec<u8>> {
        let mut inner = self.lock()?;
        inner.collator.finalise()?;
        Ok(inner.collator.data().to_vec())
    }

    /// Discard all collated bytes, ready to accumulate again.
    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.collator.reset();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| CoreError::Unsupported { operation: "poisoned collator" })
    }

    fn write_shape_message(
        &self,
        shape: &dyn Shape,
        write: impl Fn(&dyn Shape, &mut PacketWriter<'_>) -> std::result::Result<(), ProtocolError>,
    ) -> Result<usize> {
        let mut inner = self.lock()?;
        if !inner.active {
            return Ok(0);
        }
        let Inner { collator, scratch, .. } = &mut *inner;
        let mut packet = PacketWriter::new(scratch, 0, 0)?;
        write(shape, &mut packet)?;
        packet.finalise()?;
        Ok(collator.add(packet.data())?)
    }
}

impl std::fmt::Debug for CollatedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollatedConnection")
            .field("collated_bytes", &self.collated_bytes())
            .finish()
    }
}

impl Connection for CollatedConnection {
    fn close(&self) {
        // Nothing to close; the accumulator lives until dropped.
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.active = active;
        }
    }

    fn active(&self) -> bool {
        self.inner.lock().map(|inner| inner.active).unwrap_or(false)
    }

    fn address(&self) -> String {
        "CollatedPacket".to_string()
    }

    fn port(&self) -> u16 {
        0
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn create(&self, shape: &dyn Shape) -> Result<usize> {
        let mut inner = self.lock()?;
        if !inner.active {
            return Ok(0);
        }
        let Inner { collator, scratch, .. } = &mut *inner;

        let mut queued = 0usize;
        let mut packet = PacketWriter::new(scratch, 0, 0)?;
        shape.write_create(&mut packet)?;
        packet.finalise()?;
        queued += collator.add(packet.data())?;

        if shape.is_complex() {
            let mut progress = 0u32;
            loop {
                let mut packet = PacketWriter::new(scratch, 0, 0)?;
                let more = shape.write_data(&mut packet, &mut progress)?;
                packet.finalise()?;
                queued += collator.add(packet.data())?;
                if !more {
                    break;
                }
            }
        }
        Ok(queued)
    }

    fn update(&self, shape: &dyn Shape) -> Result<usize> {
        self.write_shape_message(shape, |shape, packet| shape.write_update(packet))
    }

    fn destroy(&self, shape: &dyn Shape) -> Result<usize> {
        self.write_shape_message(shape, |shape, packet| shape.write_destroy(packet))
    }

    fn update_frame(&self, _dt: f32, _flush: bool) -> Result<usize> {
        Err(CoreError::Unsupported { operation: "update_frame on a collated packet" })
    }

    fn update_transfers(&self, _byte_limit: u32) -> Result<usize> {
        Err(CoreError::Unsupported { operation: "update_transfers on a collated packet" })
    }

    fn reference_resource(&self, _resource: &Arc<dyn Resource>) -> usize {
        0
    }

    fn release_resource(&self, _resource: &Arc<dyn Resource>) -> usize {
        0
    }

    fn send_server_info(&self, info: &ServerInfo) -> Result<usize> {
        let mut inner = self.lock()?;
        if !inner.active {
            return Ok(0);
        }
        let Inner { collator, scratch, .. } = &mut *inner;
        let mut packet = PacketWriter::new(scratch, RoutingId::ServerInfo.to_u16(), 0)?;
        info.write(&mut packet)?;
        packet.finalise()?;
        Ok(collator.add(packet.data())?)
    }

    fn send(&self, packet_bytes: &[u8], _allow_collation: bool) -> Result<usize> {
        let mut inner = self.lock()?;
        if !inner.active {
            return Ok(0);
        }
        Ok(inner.collator.add(packet_bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::Sphere;
    use sceneframe_proto::{CollatedPacketDecoder, ObjectId, PacketReader};

    #[test]
    fn staged_shape_messages_survive_collation() {
        let sink = CollatedConnection::new(false);
        let sphere = Sphere::new(8);

        sink.send_server_info(&ServerInfo::default()).unwrap();
        sink.create(&sphere).unwrap();
        sink.destroy(&sphere).unwrap();

        let outer = sink.finalise().unwrap();
        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(&outer).unwrap();

        let info = decoder.next_packet().unwrap().unwrap();
        assert_eq!(
            PacketReader::new(&info).unwrap().routing_id(),
            RoutingId::ServerInfo.to_u16()
        );
        let create = decoder.next_packet().unwrap().unwrap();
        assert_eq!(
            PacketReader::new(&create).unwrap().message_id(),
            ObjectId::Create.to_u16()
        );
        let destroy = decoder.next_packet().unwrap().unwrap();
        assert_eq!(
            PacketReader::new(&destroy).unwrap().message_id(),
            ObjectId::Destroy.to_u16()
        );
        assert!(decoder.next_packet().unwrap().is_none());
    }

    #[test]
    fn inactive_sink_queues_nothing() {
        let sink = CollatedConnection::new(false);
        sink.set_active(false);
        assert_eq!(sink.create(&Sphere::new(1)).unwrap(), 0);
        assert_eq!(sink.collated_bytes(), 0);
    }
}
