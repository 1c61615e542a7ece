//! A mesh embedded directly in the shape stream.
//!
//! Unlike a mesh resource, a mesh shape's geometry travels inline: the
//! create message carries the counts and draw mode, then a sequence of data
//! packets streams vertices, indices, normals and colours in phases, ending
//! with an explicit end marker. The writer exposes a single progress cursor
//! (elements sent across all phases) so the sender just loops until the
//! shape reports complete.

use sceneframe_proto::{
    DataBuffer, DataMessage, DrawType, ObjectId, PacketReader, PacketWriter, ProtocolError,
    RoutingId,
};

use super::{Shape, ShapeCore};

/// Phase markers in mesh shape data packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ShapeDataPhase {
    /// Vertex positions.
    Vertices = 0,
    /// Vertex indices.
    Indices = 1,
    /// Vertex normals.
    Normals = 2,
    /// Vertex colours.
    Colours = 3,
    /// End of data marker.
    End = 4,
}

impl ShapeDataPhase {
    /// The raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Map a wire value back to a phase.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Vertices),
            1 => Some(Self::Indices),
            2 => Some(Self::Normals),
            3 => Some(Self::Colours),
            4 => Some(Self::End),
            _ => None,
        }
    }
}

/// Quantisation unit applied to normals when packed encoding is active.
/// Normals are unit length, so a fixed 1/0xFFFF unit keeps full precision.
const NORMALS_QUANTISATION_UNIT: f64 = 1.0 / 65535.0;

/// A complex shape carrying its mesh data inline.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshShape {
    core: ShapeCore,
    draw_type: DrawType,
    draw_scale: f32,
    quantisation_unit: f64,
    vertices: DataBuffer,
    indices: DataBuffer,
    normals: DataBuffer,
    colours: DataBuffer,
    expected_vertices: u32,
    expected_indices: u32,
}

impl MeshShape {
    /// Create with the given id, topology and vertex positions.
    #[must_use]
    pub fn new(id: u32, draw_type: DrawType, vertices: DataBuffer) -> Self {
        Self {
            core: ShapeCore::new(id),
            draw_type,
            draw_scale: 0.0,
            quantisation_unit: 0.0,
            vertices,
            indices: DataBuffer::new(Vec::<u32>::new(), 1),
            normals: DataBuffer::new(Vec::<f32>::new(), 3),
            colours: DataBuffer::new(Vec::<u32>::new(), 1),
            expected_vertices: 0,
            expected_indices: 0,
        }
    }

    /// Attach vertex indices.
    #[must_use]
    pub fn with_indices(mut self, indices: DataBuffer) -> Self {
        self.indices = indices;
        self
    }

    /// Attach per-vertex normals.
    #[must_use]
    pub fn with_normals(mut self, normals: DataBuffer) -> Self {
        self.normals = normals;
        self
    }

    /// Attach per-vertex colours.
    #[must_use]
    pub fn with_colours(mut self, colours: DataBuffer) -> Self {
        self.colours = colours;
        self
    }

    /// Set the draw scale: point size for points, line width for lines.
    /// Zero selects the viewer default.
    #[must_use]
    pub fn with_draw_scale(mut self, draw_scale: f32) -> Self {
        self.draw_scale = draw_scale;
        self
    }

    /// Enable packed transmission of vertices at the given unit. Normals
    /// pack at a fixed unit when enabled.
    #[must_use]
    pub fn with_quantisation(mut self, unit: f64) -> Self {
        self.quantisation_unit = unit;
        self
    }

    /// Mesh topology.
    #[must_use]
    pub fn draw_type(&self) -> DrawType {
        self.draw_type
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

    /// Vertex normals.
    #[must_use]
    pub fn normals(&self) -> &DataBuffer {
        &self.normals
    }

    /// Vertex colours.
    #[must_use]
    pub fn colours(&self) -> &DataBuffer {
        &self.colours
    }

    /// Vertex count declared by a decoded create message. On the write
    /// side the buffers are authoritative instead.
    #[must_use]
    pub fn declared_vertex_count(&self) -> u32 {
        self.expected_vertices
    }

    /// Index count declared by a decoded create message.
    #[must_use]
    pub fn declared_index_count(&self) -> u32 {
        self.expected_indices
    }

    /// Expand indexed vertices into a flat, unindexed position array
    /// (three vertices per triangle, two per line and so on).
    ///
    /// Returns the vertices unchanged when there are no indices.
    #[must_use]
    pub fn unpack_vertices(&self) -> DataBuffer {
        if self.indices.is_empty() {
            return self.vertices.clone();
        }
        let components = usize::from(self.vertices.component_count());
        let mut unpacked = Vec::with_capacity(self.indices.count() as usize * components);
        for i in 0..self.indices.count() as usize {
            let index = self.indices.u32_at(i, 0).unwrap_or(0) as usize;
            for component in 0..components {
                // Destination offset is explicit: i * components + component.
                let value = self.vertices.f64_at(index, component).unwrap_or(0.0);
                let at = i * components + component;
                debug_assert_eq!(at, unpacked.len());
                unpacked.push(value);
            }
        }
        DataBuffer::new(unpacked, self.vertices.component_count())
    }

    fn phases(&self) -> [(ShapeDataPhase, &DataBuffer); 4] {
        [
            (ShapeDataPhase::Vertices, &self.vertices),
            (ShapeDataPhase::Indices, &self.indices),
            (ShapeDataPhase::Normals, &self.normals),
            (ShapeDataPhase::Colours, &self.colours),
        ]
    }
}

impl Shape for MeshShape {
    fn routing_id(&self) -> u16 {
        RoutingId::MeshShape.to_u16()
    }

    fn core(&self) -> &ShapeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ShapeCore {
        &mut self.core
    }

    fn is_complex(&self) -> bool {
        true
    }

    fn write_create(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        packet.reset(self.routing_id(), ObjectId::Create.to_u16());
        self.core.write_create(packet)?;
        packet.write(self.vertices.count())?;
        packet.write(self.indices.count())?;
        packet.write(self.draw_scale)?;
        packet.write(self.draw_type.to_u8())?;
        Ok(())
    }

    fn read_create(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        self.core.read_create(packet)?;
        self.expected_vertices = packet.read()?;
        self.expected_indices = packet.read()?;
        self.draw_scale = packet.read()?;
        let draw_type = packet.read::<u8>()?;
        self.draw_type = DrawType::from_u8(draw_type)
            .ok_or(ProtocolError::UnknownElementType { value: u16::from(draw_type) })?;
        Ok(())
    }

    fn write_data(
        &self,
        packet: &mut PacketWriter<'_>,
        progress: &mut u32,
    ) -> Result<bool, ProtocolError> {
        packet.reset(self.routing_id(), ObjectId::Data.to_u16());
        DataMessage { id: self.core.id }.write(packet)?;

        // Resolve the current phase from the cumulative progress cursor.
        let phases = self.phases();
        let mut phase_index = 0;
        let mut prior = 0u32;
        while phase_index < phases.len()
            && *progress >= prior + phases[phase_index].1.count()
        {
            prior += phases[phase_index].1.count();
            phase_index += 1;
        }

        if phase_index >= phases.len() {
            // All streams sent; emit the end marker with an empty block.
            packet.write(ShapeDataPhase::End.to_u16())?;
            packet.write(0u32)?;
            packet.write(0u16)?;
            return Ok(false);
        }

        let (phase, buffer) = phases[phase_index];
        let offset = *progress - prior;
        packet.write(phase.to_u16())?;
        let written = match phase {
            ShapeDataPhase::Vertices if self.quantisation_unit > 0.0 => {
                buffer.write_packed(packet, offset, self.quantisation_unit, 0)?
            }
            ShapeDataPhase::Normals if self.quantisation_unit > 0.0 => {
                buffer.write_packed(packet, offset, NORMALS_QUANTISATION_UNIT, 0)?
            }
            _ => buffer.write(packet, offset, 0)?,
        };

        if written == 0 {
            // The phase has remaining elements; an empty block means the
            // packet cannot hold even one.
            return Err(ProtocolError::WriteFailed);
        }
        *progress += written;
        Ok(true)
    }

    fn read_data(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        let message = DataMessage::read(packet)?;
        if message.id != self.core.id {
            return Err(ProtocolError::BadComponentType { component: "mesh shape data" });
        }
        let phase_raw = packet.read::<u16>()?;
        let phase = ShapeDataPhase::from_u16(phase_raw)
            .ok_or(ProtocolError::UnknownElementType { value: phase_raw })?;

        if phase == ShapeDataPhase::End {
            let offset = packet.read::<u32>()?;
            let count = packet.read::<u16>()?;
            if offset != 0 || count != 0 {
                return Err(ProtocolError::SizeMismatch {
                    declared: 0,
                    actual: offset.max(u32::from(count)),
                });
            }
            return Ok(());
        }

        let (offset, block) = DataBuffer::read(packet)?;
        let target = match phase {
            ShapeDataPhase::Vertices => &mut self.vertices,
            ShapeDataPhase::Indices => &mut self.indices,
            ShapeDataPhase::Normals => &mut self.normals,
            ShapeDataPhase::Colours => &mut self.colours,
            ShapeDataPhase::End => return Ok(()),
        };
        if target.is_empty() && target.element_type() != block.element_type() {
            *target = DataBuffer::empty(block.element_type(), block.component_count());
        }
        target.splice(offset, &block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshShape {
        let vertices =
            DataBuffer::new(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 3);
        MeshShape::new(5, DrawType::Triangles, vertices)
            .with_indices(DataBuffer::new(vec![0u32, 1, 2], 1))
    }

    fn stream_shape(shape: &MeshShape) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let mut buffer = vec![0u8; 0xFFFF];

        let mut writer =
            PacketWriter::new(&mut buffer, shape.routing_id(), 0).unwrap();
        shape.write_create(&mut writer).unwrap();
        writer.finalise().unwrap();
        packets.push(writer.data().to_vec());

        let mut progress = 0u32;
        loop {
            let mut writer =
                PacketWriter::new(&mut buffer, shape.routing_id(), 0).unwrap();
            let more = shape.write_data(&mut writer, &mut progress).unwrap();
            writer.finalise().unwrap();
            packets.push(writer.data().to_vec());
            if !more {
                break;
            }
        }
        packets
    }

    fn replay(packets: &[Vec<u8>]) -> MeshShape {
        let mut decoded = MeshShape::new(0, DrawType::Points, DataBuffer::empty(
            sceneframe_proto::ElementType::Float32,
            3,
        ));
        let mut reader = PacketReader::new(&packets[0]).unwrap();
        decoded.read_create(&mut reader).unwrap();
        for packet in &packets[1..] {
            let mut reader = PacketReader::new(packet).unwrap();
            assert_eq!(reader.message_id(), ObjectId::Data.to_u16());
            decoded.read_data(&mut reader).unwrap();
        }
        decoded
    }

    #[test]
    fn streams_and_reassembles() {
        let shape = triangle();
        let packets = stream_shape(&shape);
        // Create, vertices, indices, end marker.
        assert_eq!(packets.len(), 4);

        let decoded = replay(&packets);
        assert_eq!(decoded.vertices(), shape.vertices());
        assert_eq!(decoded.indices(), shape.indices());
        assert_eq!(decoded.draw_type(), DrawType::Triangles);
    }

    #[test]
    fn quantised_vertices_stay_within_half_unit() {
        let vertices = DataBuffer::new(vec![0.123f32, 4.567, -8.901, 0.0, 0.0, 0.0], 3);
        let shape =
            MeshShape::new(3, DrawType::Points, vertices.clone()).with_quantisation(0.001);
        let packets = stream_shape(&shape);
        let decoded = replay(&packets);

        for element in 0..2 {
            for component in 0..3 {
                let expected = vertices.f64_at(element, component).unwrap();
                let got = decoded.vertices().f64_at(element, component).unwrap();
                assert!((got - expected).abs() <= 0.0005 + 1e-9);
            }
        }
    }

    #[test]
    fn unpack_vertices_expands_indices() {
        let shape = triangle().with_indices(DataBuffer::new(vec![2u32, 1, 0], 1));
        let unpacked = shape.unpack_vertices();
        assert_eq!(unpacked.count(), 3);
        // First unpacked vertex is vertex 2: (0, 1, 0).
        assert_eq!(unpacked.f64_at(0, 1), Some(1.0));
    }

    #[test]
    fn rejects_data_for_wrong_id() {
        let shape = triangle();
        let packets = stream_shape(&shape);
        let mut wrong = MeshShape::new(
            99,
            DrawType::Points,
            DataBuffer::empty(sceneframe_proto::ElementType::Float32, 3),
        );
        let mut reader = PacketReader::new(&packets[1]).unwrap();
        assert!(wrong.read_data(&mut reader).is_err());
    }
}
