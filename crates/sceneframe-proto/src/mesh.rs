//! Mesh resource messages.
//!
//! A mesh resource is built over a sequence of messages under
//! [`crate::RoutingId::Mesh`]: `Create`, one or more component blocks
//! (vertices, indices, colours, normals, UVs - each block carries an offset
//! so streams transmit in chunks), an optional `Redefine` reopening the
//! definition, and a `Finalise` after which the resource is drawable.

use crate::dbuffer::{DataBuffer, ElementType};
use crate::errors::{ProtocolError, Result};
use crate::messages::ObjectAttributes;
use crate::reader::PacketReader;
use crate::writer::PacketWriter;

/// Message ids under [`crate::RoutingId::Mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MeshMessageId {
    /// Invalid/unassigned.
    Invalid = 0,
    /// Destroy a mesh resource.
    Destroy = 1,
    /// Create an empty mesh resource.
    Create = 2,
    /// Vertex position block.
    Vertex = 3,
    /// Index block.
    Index = 4,
    /// Vertex colour block.
    VertexColour = 5,
    /// Normal block.
    Normal = 6,
    /// UV coordinate block.
    Uv = 7,
    /// Material binding. Reserved, not yet implemented.
    SetMaterial = 8,
    /// Reissue creation fields, invalidating the resource for
    /// re-finalisation.
    Redefine = 9,
    /// Complete the resource, making it drawable.
    Finalise = 10,
}

impl MeshMessageId {
    /// The raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Map a wire value back to a mesh message id.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::Destroy),
            2 => Some(Self::Create),
            3 => Some(Self::Vertex),
            4 => Some(Self::Index),
            5 => Some(Self::VertexColour),
            6 => Some(Self::Normal),
            7 => Some(Self::Uv),
            8 => Some(Self::SetMaterial),
            9 => Some(Self::Redefine),
            10 => Some(Self::Finalise),
            _ => None,
        }
    }
}

/// Mesh topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DrawType {
    /// Point primitives.
    #[default]
    Points = 0,
    /// Line list.
    Lines = 1,
    /// Triangle list.
    Triangles = 2,
    /// Voxel centres; normals carry the half extents.
    Voxels = 3,
}

impl DrawType {
    /// The raw wire value.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Map a wire value back to a draw type.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Points),
            1 => Some(Self::Lines),
            2 => Some(Self::Triangles),
            3 => Some(Self::Voxels),
            _ => None,
        }
    }
}

/// Flags for [`MeshCreateMessage`].
pub mod mesh_create_flag {
    /// Transform attributes are written in double precision.
    pub const DOUBLE_PRECISION: u16 = 1 << 0;
}

/// Flags for [`MeshFinaliseMessage`].
pub mod mesh_finalise_flag {
    /// Calculate normals on receive, overwriting any present.
    pub const CALCULATE_NORMALS: u16 = 1 << 0;
    /// Colour vertices by their position along the up axis.
    pub const COLOUR_BY_AXIS: u16 = 1 << 1;
}

/// Mesh creation record, followed on the wire by [`ObjectAttributes`] for
/// the mesh transform and tint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshCreateMessage {
    /// Resource id of the mesh.
    pub mesh_id: u32,
    /// Total vertices the stream will carry.
    pub vertex_count: u32,
    /// Total indices the stream will carry.
    pub index_count: u32,
    /// [`mesh_create_flag`] values.
    pub flags: u16,
    /// Topology; see [`DrawType`].
    pub draw_type: u8,
}

impl MeshCreateMessage {
    /// Write the record and transform attributes (precision per the flags).
    pub fn write(&self, packet: &mut PacketWriter<'_>, attributes: &ObjectAttributes) -> Result<()> {
        packet.write(self.mesh_id)?;
        packet.write(self.vertex_count)?;
        packet.write(self.index_count)?;
        packet.write(self.flags)?;
        packet.write(self.draw_type)?;
        attributes.write(packet, self.flags & mesh_create_flag::DOUBLE_PRECISION != 0)
    }

    /// Read the record and transform attributes (precision per the flags).
    pub fn read(packet: &mut PacketReader<'_>) -> Result<(Self, ObjectAttributes)> {
        let message = Self {
            mesh_id: packet.read()?,
            vertex_count: packet.read()?,
            index_count: packet.read()?,
            flags: packet.read()?,
            draw_type: packet.read()?,
        };
        let attributes = ObjectAttributes::read(
            packet,
            message.flags & mesh_create_flag::DOUBLE_PRECISION != 0,
        )?;
        Ok((message, attributes))
    }
}

/// Mesh destruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshDestroyMessage {
    /// Resource id of the mesh.
    pub mesh_id: u32,
}

impl MeshDestroyMessage {
    /// Write this record to `packet`.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.mesh_id)
    }

    /// Read this record from `packet`.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self { mesh_id: packet.read()? })
    }
}

/// Mesh finalisation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshFinaliseMessage {
    /// Resource id of the mesh.
    pub mesh_id: u32,
    /// [`mesh_finalise_flag`] values.
    pub flags: u16,
}

impl MeshFinaliseMessage {
    /// Write this record to `packet`.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.mesh_id)?;
        packet.write(self.flags)
    }

    /// Read this record from `packet`.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self { mesh_id: packet.read()?, flags: packet.read()? })
    }
}

/// The component kinds a mesh streams, in transfer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshComponent {
    /// Vertex positions (`Real[3]`).
    Vertex,
    /// Vertex indices (single integers).
    Index,
    /// Vertex colours (`u32`, or four `u8` channels).
    VertexColour,
    /// Vertex normals (`Real[3]`).
    Normal,
    /// UV coordinates (`Real[2]`).
    Uv,
}

impl MeshComponent {
    /// Transfer order of the component phases.
    pub const TRANSFER_ORDER: [Self; 5] =
        [Self::Vertex, Self::Index, Self::VertexColour, Self::Normal, Self::Uv];

    /// Message id carrying this component.
    #[must_use]
    pub fn message_id(self) -> MeshMessageId {
        match self {
            Self::Vertex => MeshMessageId::Vertex,
            Self::Index => MeshMessageId::Index,
            Self::VertexColour => MeshMessageId::VertexColour,
            Self::Normal => MeshMessageId::Normal,
            Self::Uv => MeshMessageId::Uv,
        }
    }

    /// Map a message id to the component it carries.
    #[must_use]
    pub fn from_message_id(id: MeshMessageId) -> Option<Self> {
        match id {
            MeshMessageId::Vertex => Some(Self::Vertex),
            MeshMessageId::Index => Some(Self::Index),
            MeshMessageId::VertexColour => Some(Self::VertexColour),
            MeshMessageId::Normal => Some(Self::Normal),
            MeshMessageId::Uv => Some(Self::Uv),
            _ => None,
        }
    }

    /// Display name used in diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Index => "index",
            Self::VertexColour => "vertex colour",
            Self::Normal => "normal",
            Self::Uv => "uv",
        }
    }

    /// Components per element for this kind, given the element type. The
    /// count is implied rather than transmitted.
    ///
    /// # Errors
    ///
    /// `ProtocolError::BadComponentType` when the element type is not valid
    /// for this component.
    pub fn component_count(self, element_type: ElementType) -> Result<u8> {
        match self {
            Self::Vertex | Self::Normal => match element_type {
                ElementType::Float32
                | ElementType::Float64
                | ElementType::PackedFloat16
                | ElementType::PackedFloat32 => Ok(3),
                _ => Err(ProtocolError::BadComponentType { component: self.name() }),
            },
            Self::Uv => match element_type {
                ElementType::Float32
                | ElementType::Float64
                | ElementType::PackedFloat16
                | ElementType::PackedFloat32 => Ok(2),
                _ => Err(ProtocolError::BadComponentType { component: self.name() }),
            },
            Self::Index => match element_type {
                ElementType::Int8
                | ElementType::UInt8
                | ElementType::Int16
                | ElementType::UInt16
                | ElementType::Int32
                | ElementType::UInt32
                | ElementType::Int64
                | ElementType::UInt64 => Ok(1),
                _ => Err(ProtocolError::BadComponentType { component: self.name() }),
            },
            Self::VertexColour => match element_type {
                ElementType::UInt32 => Ok(1),
                ElementType::UInt8 => Ok(4),
                _ => Err(ProtocolError::BadComponentType { component: self.name() }),
            },
        }
    }
}

/// Decoded header of a mesh component block:
/// `mesh_id: u32, offset: u32, reserved: u32, count: u16, element_type: u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshComponentMessage {
    /// Resource id of the mesh.
    pub mesh_id: u32,
    /// Element offset of this block within the component stream.
    pub offset: u32,
    /// Reserved; must be zero.
    pub reserved: u32,
    /// Elements in this block.
    pub count: u16,
    /// Element type of the block payload.
    pub element_type: u16,
}

/// Fixed bytes of a component block before any quantisation unit.
pub const COMPONENT_OVERHEAD: usize = 16;

/// Write one block of `component` elements from `buffer`, starting at
/// element `offset`, bounded by `byte_limit` (zero = unbounded) and packet
/// capacity. A positive `quantisation_unit` selects the packed encoding for
/// float buffers. Returns the number of elements written.
///
/// # Errors
///
/// - `ProtocolError::BadComponentType` when the buffer does not suit the
///   component
/// - packed encoding errors as for [`DataBuffer::write_packed`]
pub fn write_component(
    packet: &mut PacketWriter<'_>,
    mesh_id: u32,
    component: MeshComponent,
    buffer: &DataBuffer,
    offset: u32,
    byte_limit: u32,
    quantisation_unit: f64,
) -> Result<u32> {
    // Validate the source buffer against the component contract.
    let expected = component.component_count(buffer.element_type())?;
    if expected != buffer.component_count() {
        return Err(ProtocolError::BadComponentType { component: component.name() });
    }

    let packed = quantisation_unit > 0.0
        && matches!(buffer.element_type(), ElementType::Float32 | ElementType::Float64);

    let (wire_type, unit_bytes) = if packed {
        match buffer.element_type() {
            ElementType::Float32 => (ElementType::PackedFloat16, 4),
            _ => (ElementType::PackedFloat32, 8),
        }
    } else {
        (buffer.element_type(), 0)
    };

    let element_bytes = usize::from(buffer.component_count()) * wire_type.byte_size();
    let overhead = COMPONENT_OVERHEAD + unit_bytes;

    let total = buffer.count();
    if offset > total {
        return Err(ProtocolError::OffsetOutOfRange { offset, count: total });
    }
    let capacity =
        (usize::from(packet.bytes_remaining()).saturating_sub(overhead) / element_bytes) as u32;
    let budget = if byte_limit == 0 {
        u32::MAX
    } else {
        (byte_limit as usize).saturating_sub(overhead) as u32 / element_bytes as u32
    };
    let count = (total - offset).min(capacity).min(budget).min(u32::from(u16::MAX));

    packet.write(mesh_id)?;
    packet.write(offset)?;
    packet.write(0u32)?;
    packet.write(count as u16)?;
    packet.write(u16::from(wire_type.to_u8()))?;

    if packed {
        // Re-validate and emit through the packed writer path. The packed
        // window was computed above with identical bounds, so the counts
        // agree; write the unit and integers directly.
        emit_packed(packet, buffer, offset, count, quantisation_unit, wire_type)?;
    } else {
        buffer.emit_elements(packet, offset, count)?;
    }
    Ok(count)
}

fn emit_packed(
    packet: &mut PacketWriter<'_>,
    buffer: &DataBuffer,
    offset: u32,
    count: u32,
    unit: f64,
    wire_type: ElementType,
) -> Result<()> {
    if unit.is_nan() || unit <= 0.0 {
        return Err(ProtocolError::InvalidQuantisationUnit { unit });
    }
    let (min, max) = match wire_type {
        ElementType::PackedFloat16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
        _ => (f64::from(i32::MIN), f64::from(i32::MAX)),
    };
    let components = usize::from(buffer.component_count());
    for element in offset..offset + count {
        for component in 0..components {
            let value = buffer.f64_at(element as usize, component).unwrap_or(0.0);
            let quantised = (value / unit).round();
            if quantised < min || quantised > max {
                return Err(ProtocolError::QuantisationOverflow { value, unit });
            }
        }
    }

    match wire_type {
        ElementType::PackedFloat16 => {
            packet.write(unit as f32)?;
            for element in offset..offset + count {
                for component in 0..components {
                    let value = buffer.f64_at(element as usize, component).unwrap_or(0.0);
                    packet.write((value / unit).round() as i16)?;
                }
            }
        }
        _ => {
            packet.write(unit)?;
            for element in offset..offset + count {
                for component in 0..components {
                    let value = buffer.f64_at(element as usize, component).unwrap_or(0.0);
                    packet.write((value / unit).round() as i32)?;
                }
            }
        }
    }
    Ok(())
}

/// Read one component block: the header fields and the element payload.
/// Packed payloads decode back to their float forms.
///
/// # Errors
///
/// - `ProtocolError::UnknownElementType` for an unrecognised type id
/// - `ProtocolError::BadComponentType` when the type does not suit the
///   component
pub fn read_component(
    packet: &mut PacketReader<'_>,
    component: MeshComponent,
) -> Result<(MeshComponentMessage, DataBuffer)> {
    let mesh_id = packet.read::<u32>()?;
    let offset = packet.read::<u32>()?;
    let reserved = packet.read::<u32>()?;
    let count = packet.read::<u16>()?;
    let type_raw = packet.read::<u16>()?;

    let element_type = u8::try_from(type_raw)
        .ok()
        .and_then(ElementType::from_u8)
        .ok_or(ProtocolError::UnknownElementType { value: type_raw })?;
    let component_count = component.component_count(element_type)?;

    let buffer = DataBuffer::read_elements(packet, element_type, component_count, count)?;
    let message =
        MeshComponentMessage { mesh_id, offset, reserved, count, element_type: type_raw };
    Ok((message, buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RoutingId;

    fn component_packet(
        component: MeshComponent,
        buffer: &DataBuffer,
        offset: u32,
        byte_limit: u32,
        unit: f64,
    ) -> (u32, Vec<u8>) {
        let mut raw = vec![0u8; 0xFFFF];
        let mut writer = PacketWriter::new(
            &mut raw,
            RoutingId::Mesh.to_u16(),
            component.message_id().to_u16(),
        )
        .unwrap();
        let written =
            write_component(&mut writer, 42, component, buffer, offset, byte_limit, unit)
                .unwrap();
        writer.finalise().unwrap();
        (written, writer.data().to_vec())
    }

    #[test]
    fn create_message_round_trip() {
        let message = MeshCreateMessage {
            mesh_id: 42,
            vertex_count: 100,
            index_count: 300,
            flags: 0,
            draw_type: DrawType::Triangles.to_u8(),
        };
        let attributes = ObjectAttributes::identity();

        let mut raw = vec![0u8; 256];
        let mut writer = PacketWriter::new(
            &mut raw,
            RoutingId::Mesh.to_u16(),
            MeshMessageId::Create.to_u16(),
        )
        .unwrap();
        message.write(&mut writer, &attributes).unwrap();
        writer.finalise().unwrap();
        let bytes = writer.data().to_vec();

        let mut reader = PacketReader::new(&bytes).unwrap();
        let (decoded, decoded_attributes) = MeshCreateMessage::read(&mut reader).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded_attributes, attributes);
    }

    #[test]
    fn vertex_component_round_trip() {
        let vertices = DataBuffer::new(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 3);
        let (written, bytes) = component_packet(MeshComponent::Vertex, &vertices, 0, 0, 0.0);
        assert_eq!(written, 3);

        let mut reader = PacketReader::new(&bytes).unwrap();
        assert_eq!(reader.message_id(), MeshMessageId::Vertex.to_u16());
        let (message, decoded) = read_component(&mut reader, MeshComponent::Vertex).unwrap();
        assert_eq!(message.mesh_id, 42);
        assert_eq!(message.offset, 0);
        assert_eq!(message.count, 3);
        assert_eq!(decoded, vertices);
    }

    #[test]
    fn index_component_respects_offset() {
        let indices = DataBuffer::new((0u32..100).collect::<Vec<_>>(), 1);
        let (written, bytes) = component_packet(MeshComponent::Index, &indices, 40, 0, 0.0);
        assert_eq!(written, 60);

        let mut reader = PacketReader::new(&bytes).unwrap();
        let (message, decoded) = read_component(&mut reader, MeshComponent::Index).unwrap();
        assert_eq!(message.offset, 40);
        assert_eq!(decoded.u32_at(0, 0), Some(40));
    }

    #[test]
    fn packed_vertex_component() {
        let vertices = DataBuffer::new(vec![0.05f64, -0.1, 1.25, 2.0, 0.0, -3.333], 3);
        let (written, bytes) =
            component_packet(MeshComponent::Vertex, &vertices, 0, 0, 0.001);
        assert_eq!(written, 2);

        let mut reader = PacketReader::new(&bytes).unwrap();
        let (message, decoded) = read_component(&mut reader, MeshComponent::Vertex).unwrap();
        assert_eq!(
            message.element_type,
            u16::from(ElementType::PackedFloat32.to_u8())
        );
        for element in 0..2 {
            for component in 0..3 {
                let expected = vertices.f64_at(element, component).unwrap();
                let got = decoded.f64_at(element, component).unwrap();
                assert!((got - expected).abs() <= 0.0005 + 1e-12);
            }
        }
    }

    #[test]
    fn colour_component_accepts_u32_and_u8() {
        let packed = DataBuffer::new(vec![0xFF00_00FFu32, 0x00FF_00FF], 1);
        let (_, bytes) = component_packet(MeshComponent::VertexColour, &packed, 0, 0, 0.0);
        let mut reader = PacketReader::new(&bytes).unwrap();
        let (_, decoded) = read_component(&mut reader, MeshComponent::VertexColour).unwrap();
        assert_eq!(decoded.u32_at(1, 0), Some(0x00FF_00FF));

        let channels = DataBuffer::new(vec![255u8, 0, 0, 255, 0, 255, 0, 255], 4);
        let (_, bytes) = component_packet(MeshComponent::VertexColour, &channels, 0, 0, 0.0);
        let mut reader = PacketReader::new(&bytes).unwrap();
        let (_, decoded) = read_component(&mut reader, MeshComponent::VertexColour).unwrap();
        assert_eq!(decoded.component_count(), 4);
    }

    #[test]
    fn rejects_wrong_component_shape() {
        // Two-component buffer offered as vertices.
        let buffer = DataBuffer::new(vec![0.0f32, 0.0, 1.0, 1.0], 2);
        let mut raw = vec![0u8; 256];
        let mut writer = PacketWriter::new(&mut raw, RoutingId::Mesh.to_u16(), 0).unwrap();
        let result =
            write_component(&mut writer, 1, MeshComponent::Vertex, &buffer, 0, 0, 0.0);
        assert!(matches!(result, Err(ProtocolError::BadComponentType { .. })));
    }
}
