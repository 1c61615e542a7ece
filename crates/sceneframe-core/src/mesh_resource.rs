//! Concrete mesh resource with the multi-phase transfer pump.
//!
//! Transfer order is vertices, indices, vertex colours, normals, UVs -
//! skipping empty streams - then a finalise message. Each
//! [`Resource::transfer`] call emits one packet and advances the caller's
//! [`TransferProgress`], so a connection can amortise large meshes across
//! frames under a byte budget.

use sceneframe_proto::mesh::{self, MeshComponent, mesh_create_flag, mesh_finalise_flag};
use sceneframe_proto::{
    DataBuffer, DrawType, MeshCreateMessage, MeshDestroyMessage, MeshFinaliseMessage,
    MeshMessageId, ObjectAttributes, PacketWriter, ProtocolError, RoutingId,
};

use crate::resource::{Resource, TransferProgress};

/// Fixed quantisation unit for packed normals (unit-length vectors).
const NORMALS_QUANTISATION_UNIT: f64 = 1.0 / 65535.0;

/// A mesh held as a reference-counted resource and streamed in phases.
#[derive(Debug, Clone)]
pub struct MeshResource {
    id: u32,
    draw_type: DrawType,
    attributes: ObjectAttributes,
    double_precision: bool,
    quantisation_unit: f64,
    colour_by_axis: bool,
    vertices: DataBuffer,
    indices: DataBuffer,
    colours: DataBuffer,
    normals: DataBuffer,
    uvs: DataBuffer,
}

impl MeshResource {
    /// Create a mesh resource with the given id, topology and vertices.
    #[must_use]
    pub fn new(id: u32, draw_type: DrawType, vertices: DataBuffer) -> Self {
        Self {
            id,
            draw_type,
            attributes: ObjectAttributes::identity(),
            double_precision: false,
            quantisation_unit: 0.0,
            colour_by_axis: false,
            vertices,
            indices: DataBuffer::new(Vec::<u32>::new(), 1),
            colours: DataBuffer::new(Vec::<u32>::new(), 1),
            normals: DataBuffer::new(Vec::<f32>::new(), 3),
            uvs: DataBuffer::new(Vec::<f32>::new(), 2),
        }
    }

    /// A points-mode resource, the usual carrier for point clouds.
    #[must_use]
    pub fn points(id: u32, vertices: DataBuffer) -> Self {
        Self::new(id, DrawType::Points, vertices)
    }

    /// Attach indices.
    #[must_use]
    pub fn with_indices(mut self, indices: DataBuffer) -> Self {
        self.indices = indices;
        self
    }

    /// Attach per-vertex colours.
    #[must_use]
    pub fn with_colours(mut self, colours: DataBuffer) -> Self {
        self.colours = colours;
        self
    }

    /// Attach per-vertex normals.
    #[must_use]
    pub fn with_normals(mut self, normals: DataBuffer) -> Self {
        self.normals = normals;
        self
    }

    /// Attach UV coordinates.
    #[must_use]
    pub fn with_uvs(mut self, uvs: DataBuffer) -> Self {
        self.uvs = uvs;
        self
    }

    /// Set the mesh transform and tint.
    #[must_use]
    pub fn with_attributes(mut self, attributes: ObjectAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Enable packed vertex transmission at the given unit.
    #[must_use]
    pub fn with_quantisation(mut self, unit: f64) -> Self {
        self.quantisation_unit = unit;
        self
    }

    /// Request viewer-side colouring by up-axis position at finalise.
    #[must_use]
    pub fn with_colour_by_axis(mut self) -> Self {
        self.colour_by_axis = true;
        self
    }

    /// Encode transform attributes in double precision.
    #[must_use]
    pub fn with_double_precision(mut self) -> Self {
        self.double_precision = true;
        self
    }

    /// Vertex positions.
    #[must_use]
    pub fn vertices(&self) -> &DataBuffer {
        &self.vertices
    }

    /// Vertex indices.
    #[must_use]
    pub fn indices(&self) -> &DataBuffer {
        &self.indices
    }

    /// Mesh topology.
    #[must_use]
    pub fn draw_type(&self) -> DrawType {
        self.draw_type
    }

    fn stream(&self, component: MeshComponent) -> &DataBuffer {
        match component {
            MeshComponent::Vertex => &self.vertices,
            MeshComponent::Index => &self.indices,
            MeshComponent::VertexColour => &self.colours,
            MeshComponent::Normal => &self.normals,
            MeshComponent::Uv => &self.uvs,
        }
    }

    /// The first non-empty component phase after `current`, or `Finalise`
    /// when every remaining stream is empty.
    fn next_phase(&self, current: u16) -> u16 {
        let mut seen_current = current == 0;
        for component in MeshComponent::TRANSFER_ORDER {
            let id = component.message_id().to_u16();
            if !seen_current {
                seen_current = id == current;
                continue;
            }
            if !self.stream(component).is_empty() {
                return id;
            }
        }
        MeshMessageId::Finalise.to_u16()
    }

    fn quantisation_for(&self, component: MeshComponent) -> f64 {
        if self.quantisation_unit <= 0.0 {
            return 0.0;
        }
        match component {
            MeshComponent::Vertex => self.quantisation_unit,
            MeshComponent::Normal => NORMALS_QUANTISATION_UNIT,
            _ => 0.0,
        }
    }
}

impl Resource for MeshResource {
    fn id(&self) -> u32 {
        self.id
    }

    fn type_id(&self) -> u16 {
        RoutingId::Mesh.to_u16()
    }

    fn write_create(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        packet.reset(self.type_id(), MeshMessageId::Create.to_u16());
        let mut flags = 0u16;
        if self.double_precision {
            flags |= mesh_create_flag::DOUBLE_PRECISION;
        }
        MeshCreateMessage {
            mesh_id: self.id,
            vertex_count: self.vertices.count(),
            index_count: self.indices.count(),
            flags,
            draw_type: self.draw_type.to_u8(),
        }
        .write(packet, &self.attributes)
    }

    fn write_destroy(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        packet.reset(self.type_id(), MeshMessageId::Destroy.to_u16());
        MeshDestroyMessage { mesh_id: self.id }.write(packet)
    }

    fn transfer(
        &self,
        packet: &mut PacketWriter<'_>,
        byte_limit: u32,
        progress: &mut TransferProgress,
    ) -> Result<(), ProtocolError> {
        if progress.phase == 0 {
            progress.phase = self.next_phase(0);
            progress.progress = 0;
        }

        if progress.phase == MeshMessageId::Finalise.to_u16() {
            packet.reset(self.type_id(), MeshMessageId::Finalise.to_u16());
            let mut flags = 0u16;
            if self.normals.is_empty() && self.draw_type == DrawType::Triangles {
                flags |= mesh_finalise_flag::CALCULATE_NORMALS;
            }
            if self.colour_by_axis {
                flags |= mesh_finalise_flag::COLOUR_BY_AXIS;
            }
            MeshFinaliseMessage { mesh_id: self.id, flags }.write(packet)?;
            progress.complete = true;
            return Ok(());
        }

        let component = MeshMessageId::from_u16(progress.phase)
            .and_then(MeshComponent::from_message_id)
            .ok_or(ProtocolError::UnknownElementType { value: progress.phase })?;
        let buffer = self.stream(component);

        packet.reset(self.type_id(), progress.phase);
        let written = mesh::write_component(
            packet,
            self.id,
            component,
            buffer,
            progress.progress,
            byte_limit,
            self.quantisation_for(component),
        )?;

        if written == 0 && buffer.count() > progress.progress {
            progress.failed = true;
            return Err(ProtocolError::WriteFailed);
        }

        progress.progress += written;
        if progress.progress >= buffer.count() {
            progress.phase = self.next_phase(progress.phase);
            progress.progress = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sceneframe_proto::PacketReader;

    fn grid_mesh(vertex_count: usize, index_count: usize) -> MeshResource {
        let vertices: Vec<f32> = (0..vertex_count * 3).map(|i| i as f32 * 0.25).collect();
        let indices: Vec<u32> = (0..index_count).map(|i| (i % vertex_count) as u32).collect();
        MeshResource::new(7, DrawType::Triangles, DataBuffer::new(vertices, 3))
            .with_indices(DataBuffer::new(indices, 1))
    }

    fn pump(mesh: &MeshResource, byte_limit: u32) -> (usize, TransferProgress) {
        let mut buffer = vec![0u8; 0xFFFF];
        let mut progress = TransferProgress::default();
        let mut calls = 0;
        while !progress.complete && !progress.failed {
            let mut packet = PacketWriter::new(&mut buffer, 0, 0).unwrap();
            mesh.transfer(&mut packet, byte_limit, &mut progress).unwrap();
            packet.finalise().unwrap();
            assert!(PacketReader::new(packet.data()).is_ok());
            calls += 1;
            assert!(calls < 10_000, "transfer did not terminate");
        }
        (calls, progress)
    }

    #[test]
    fn unbounded_transfer_completes_in_three_calls() {
        // One vertex packet, one index packet, one finalise.
        let mesh = grid_mesh(100, 300);
        let (calls, progress) = pump(&mesh, 0);
        assert_eq!(calls, 3);
        assert!(progress.complete);
    }

    #[test]
    fn byte_budget_forces_resumption() {
        let mesh = grid_mesh(10_000, 30_000);
        let (calls, progress) = pump(&mesh, 1024);
        assert!(progress.complete);

        // Vertices: 10k elements at 12 bytes in 63-element packets;
        // indices: 30k at 4 bytes in 252-element packets; plus finalise.
        let vertex_calls = 10_000usize.div_ceil((1024 - 16) / 12);
        let index_calls = 30_000usize.div_ceil((1024 - 16) / 4);
        assert_eq!(calls, vertex_calls + index_calls + 1);
    }

    #[test]
    fn empty_streams_are_skipped() {
        let mesh = MeshResource::points(3, DataBuffer::new(vec![0.0f32, 0.0, 0.0], 3));
        let mut buffer = vec![0u8; 0xFFFF];
        let mut progress = TransferProgress::default();

        let mut packet = PacketWriter::new(&mut buffer, 0, 0).unwrap();
        mesh.transfer(&mut packet, 0, &mut progress).unwrap();
        assert_eq!(progress.phase, MeshMessageId::Finalise.to_u16());

        let mut packet = PacketWriter::new(&mut buffer, 0, 0).unwrap();
        mesh.transfer(&mut packet, 0, &mut progress).unwrap();
        assert!(progress.complete);
    }

    #[test]
    fn finalise_requests_normals_for_bare_triangles() {
        let mesh = grid_mesh(3, 3);
        let mut buffer = vec![0u8; 0xFFFF];
        let mut progress = TransferProgress::default();
        let mut finalise_flags = None;
        while !progress.complete {
            let mut packet = PacketWriter::new(&mut buffer, 0, 0).unwrap();
            mesh.transfer(&mut packet, 0, &mut progress).unwrap();
            packet.finalise().unwrap();
            if packet.message_id() == MeshMessageId::Finalise.to_u16() {
                let bytes = packet.data().to_vec();
                let mut reader = PacketReader::new(&bytes).unwrap();
                finalise_flags =
                    Some(sceneframe_proto::MeshFinaliseMessage::read(&mut reader).unwrap().flags);
            }
        }
        assert_eq!(
            finalise_flags,
            Some(mesh_finalise_flag::CALCULATE_NORMALS)
        );
    }
}
