//! A shape instancing one or more mesh resources.
//!
//! The geometry travels out of band as mesh resources; the create payload
//! only lists part ids and per-part transforms. Referencing the resources
//! on each connection is handled by the connection's resource registry,
//! driven by [`super::Shape::resources`].

use std::sync::Arc;

use sceneframe_proto::{
    ObjectAttributes, ObjectId, PacketReader, PacketWriter, ProtocolError, RoutingId,
};

use crate::resource::Resource;

use super::{Shape, ShapeCore};

/// One mesh instance within a [`MeshSet`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPart {
    /// Resource id of the instanced mesh.
    pub mesh_id: u32,
    /// Transform and tint of this instance, relative to the set transform.
    pub attributes: ObjectAttributes,
}

/// A shape drawing a collection of mesh resource instances.
#[derive(Debug, Clone)]
pub struct MeshSet {
    core: ShapeCore,
    parts: Vec<MeshPart>,
    resources: Vec<Arc<dyn Resource>>,
}

impl MeshSet {
    /// Create an empty set with the given id.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self { core: ShapeCore::new(id), parts: Vec::new(), resources: Vec::new() }
    }

    /// Add an instance of `resource` at `attributes`.
    #[must_use]
    pub fn with_part(mut self, resource: Arc<dyn Resource>, attributes: ObjectAttributes) -> Self {
        self.parts.push(MeshPart { mesh_id: resource.id(), attributes });
        self.resources.push(resource);
        self
    }

    /// The instanced parts.
    #[must_use]
    pub fn parts(&self) -> &[MeshPart] {
        &self.parts
    }
}

impl Shape for MeshSet {
    fn routing_id(&self) -> u16 {
        RoutingId::MeshSet.to_u16()
    }

    fn core(&self) -> &ShapeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ShapeCore {
        &mut self.core
    }

    fn resources(&self) -> Vec<Arc<dyn Resource>> {
        self.resources.clone()
    }

    fn write_create(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        packet.reset(self.routing_id(), ObjectId::Create.to_u16());
        self.core.write_create(packet)?;
        let count = u16::try_from(self.parts.len()).map_err(|_| ProtocolError::BufferFull {
            requested: self.parts.len(),
            remaining: usize::from(u16::MAX),
        })?;
        packet.write(count)?;
        let double_precision = self.core.double_precision();
        for part in &self.parts {
            packet.write(part.mesh_id)?;
            part.attributes.write(packet, double_precision)?;
        }
        Ok(())
    }

    fn read_create(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        self.core.read_create(packet)?;
        let count = packet.read::<u16>()?;
        let double_precision = self.core.double_precision();
        self.parts.clear();
        self.resources.clear();
        for _ in 0..count {
            let mesh_id = packet.read::<u32>()?;
            let attributes = ObjectAttributes::read(packet, double_precision)?;
            self.parts.push(MeshPart { mesh_id, attributes });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_resource::MeshResource;
    use sceneframe_proto::{DataBuffer, DrawType};

    #[test]
    fn mesh_set_round_trip() {
        let mesh: Arc<dyn Resource> = Arc::new(MeshResource::new(
            31,
            DrawType::Triangles,
            DataBuffer::new(vec![0.0f32, 0.0, 0.0], 3),
        ));
        let mut attributes = ObjectAttributes::identity();
        attributes.position = [0.0, 0.0, 4.0];

        let set = MeshSet::new(6)
            .with_part(Arc::clone(&mesh), ObjectAttributes::identity())
            .with_part(Arc::clone(&mesh), attributes);
        assert_eq!(set.resources().len(), 2);

        let mut buffer = vec![0u8; 1024];
        let mut writer = PacketWriter::new(&mut buffer, set.routing_id(), 0).unwrap();
        set.write_create(&mut writer).unwrap();
        writer.finalise().unwrap();
        let bytes = writer.data().to_vec();

        let mut reader = PacketReader::new(&bytes).unwrap();
        let mut decoded = MeshSet::new(0);
        decoded.read_create(&mut reader).unwrap();
        assert_eq!(decoded.parts(), set.parts());
        // Decoded sets carry ids only; resources bind on the sending side.
        assert!(decoded.resources().is_empty());
    }
}
