//! Message taxonomy: routing ids, control ids, flags and the fixed message
//! records shared by every handler.
//!
//! Routing ids occupy a single flat `u16` space in three bands: reserved
//! control and infrastructure ids, shape handlers from 64, and a user range
//! from 2048. Within a routing id the `message_id` is handler defined, with
//! shape handlers sharing the create/update/destroy/data lifecycle ids.

use crate::errors::{ProtocolError, Result};
use crate::reader::PacketReader;
use crate::writer::PacketWriter;

/// First routing id assigned to shape handlers.
pub const SHAPE_ID_START: u16 = 64;

/// First routing id available to user handlers.
pub const USER_ID_START: u16 = 2048;

/// Routing ids of the built-in message handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RoutingId {
    /// Invalid/unassigned.
    Null = 0,
    /// Server configuration, sent first on every stream.
    ServerInfo = 1,
    /// Frame and stream control messages.
    Control = 2,
    /// A packet wrapping collated (optionally compressed) inner packets.
    CollatedPacket = 3,
    /// Mesh resource transfer.
    Mesh = 4,
    /// Camera placement.
    Camera = 5,
    /// Category definitions.
    Category = 6,
    /// Material resources. Reserved, not yet implemented.
    Material = 7,

    /// Sphere shapes.
    Sphere = 64,
    /// Box shapes.
    Box = 65,
    /// Cone shapes.
    Cone = 66,
    /// Cylinder shapes.
    Cylinder = 67,
    /// Capsule shapes.
    Capsule = 68,
    /// Plane/quad shapes.
    Plane = 69,
    /// Star shapes.
    Star = 70,
    /// Arrow shapes.
    Arrow = 71,
    /// Meshes embedded directly in the shape stream.
    MeshShape = 72,
    /// Shapes instancing mesh resources.
    MeshSet = 73,
    /// Point cloud shapes referencing point resources.
    PointCloud = 74,
    /// Text rendered in 3D space.
    Text3D = 75,
    /// Text rendered in screen space.
    Text2D = 76,
    /// Orientation poses (coloured axes).
    Pose = 77,
}

impl RoutingId {
    /// The raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Map a wire value back to a known routing id.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Null),
            1 => Some(Self::ServerInfo),
            2 => Some(Self::Control),
            3 => Some(Self::CollatedPacket),
            4 => Some(Self::Mesh),
            5 => Some(Self::Camera),
            6 => Some(Self::Category),
            7 => Some(Self::Material),
            64 => Some(Self::Sphere),
            65 => Some(Self::Box),
            66 => Some(Self::Cone),
            67 => Some(Self::Cylinder),
            68 => Some(Self::Capsule),
            69 => Some(Self::Plane),
            70 => Some(Self::Star),
            71 => Some(Self::Arrow),
            72 => Some(Self::MeshShape),
            73 => Some(Self::MeshSet),
            74 => Some(Self::PointCloud),
            75 => Some(Self::Text3D),
            76 => Some(Self::Text2D),
            77 => Some(Self::Pose),
            _ => None,
        }
    }
}

/// Message ids under [`RoutingId::Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ControlId {
    /// Invalid/unassigned.
    Null = 0,
    /// End the current frame. `value32` is the frame tick delta, zero
    /// selecting the server default.
    Frame = 1,
    /// Change the coordinate frame; `value32` carries the new frame.
    CoordinateFrame = 2,
    /// Total frame count for a recorded stream; `value32` carries the count.
    FrameCount = 3,
    /// Render current state without advancing the frame clock.
    ForceFrameFlush = 4,
    /// Drop all state; `value32` is the frame number being reset to.
    Reset = 5,
    /// Internal snapshot marker; `value32` is the frame number.
    Keyframe = 6,
    /// Marks the clean end of the stream.
    End = 7,
}

impl ControlId {
    /// The raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Map a wire value back to a known control id.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Null),
            1 => Some(Self::Frame),
            2 => Some(Self::CoordinateFrame),
            3 => Some(Self::FrameCount),
            4 => Some(Self::ForceFrameFlush),
            5 => Some(Self::Reset),
            6 => Some(Self::Keyframe),
            7 => Some(Self::End),
            _ => None,
        }
    }
}

/// Object lifecycle message ids shared by shape handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ObjectId {
    /// Invalid/unassigned.
    Null = 0,
    /// Create a shape.
    Create = 1,
    /// Update attributes of an existing shape.
    Update = 2,
    /// Destroy a shape.
    Destroy = 3,
    /// Additional creation data for complex shapes.
    Data = 4,
}

impl ObjectId {
    /// The raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Map a wire value back to a known object message id.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Null),
            1 => Some(Self::Create),
            2 => Some(Self::Update),
            3 => Some(Self::Destroy),
            4 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Message ids under [`RoutingId::Category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CategoryId {
    /// Category name definition.
    Name = 0,
}

/// Flags controlling shape creation and appearance.
pub mod object_flag {
    /// Object attributes are written in double precision.
    pub const DOUBLE_PRECISION: u16 = 1 << 0;
    /// Render as a wireframe mesh.
    pub const WIRE: u16 = 1 << 1;
    /// Honour the colour alpha channel.
    pub const TRANSPARENT: u16 = 1 << 2;
    /// Use two-sided rendering.
    pub const TWO_SIDED: u16 = 1 << 3;
    /// Creation replaces any existing shape with the same id.
    pub const REPLACE: u16 = 1 << 4;
    /// Multiple shapes packed into one creation message.
    pub const MULTI_SHAPE: u16 = 1 << 5;
    /// Do not reference count or automatically transfer resources.
    pub const SKIP_RESOURCES: u16 = 1 << 6;
    /// First flag bit available to individual shape types.
    pub const USER: u16 = 1 << 8;
}

/// Flags selecting which attributes an update applies.
pub mod update_flag {
    use super::object_flag;

    /// Apply only the attribute fields flagged below.
    pub const UPDATE_MODE: u16 = object_flag::USER << 1;
    /// Position is authoritative.
    pub const POSITION: u16 = object_flag::USER << 2;
    /// Rotation is authoritative.
    pub const ROTATION: u16 = object_flag::USER << 3;
    /// Scale is authoritative.
    pub const SCALE: u16 = object_flag::USER << 4;
    /// Colour is authoritative.
    pub const COLOUR: u16 = object_flag::USER << 5;
}

/// Flags for control messages.
pub mod control_flag {
    /// On a frame message: keep transient shapes alive through the boundary.
    pub const FRAME_PERSIST: u32 = 1 << 0;
}

/// Flags for the collated packet message.
pub mod collated_flag {
    /// The inner packet stream is gzip deflated.
    pub const COMPRESS: u16 = 1 << 0;
}

/// Axis conventions for the streamed scene, given as right/forward/up with a
/// `Neg` suffix marking a negated (downward) up axis. Right-handed frames
/// come first; [`CoordinateFrame::is_left_handed`] splits the bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CoordinateFrame {
    /// X right, Y forward, Z up (right handed). The default.
    #[default]
    Xyz = 0,
    /// X right, Z forward, Y down (right handed).
    XzyNeg = 1,
    /// Y right, X forward, Z down (right handed).
    YxzNeg = 2,
    /// Y right, Z forward, X up (right handed).
    Yzx = 3,
    /// Z right, X forward, Y up (right handed).
    Zxy = 4,
    /// Z right, Y forward, X down (right handed).
    ZyxNeg = 5,
    /// X right, Y forward, Z down (left handed).
    XyzNeg = 6,
    /// X right, Z forward, Y up (left handed).
    Xzy = 7,
    /// Y right, X forward, Z up (left handed).
    Yxz = 8,
    /// Y right, Z forward, X down (left handed).
    YzxNeg = 9,
    /// Z right, X forward, Y down (left handed).
    ZxyNeg = 10,
    /// Z right, Y forward, X up (left handed).
    Zyx = 11,
}

impl CoordinateFrame {
    /// The raw wire value.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Map a wire value back to a coordinate frame.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Xyz),
            1 => Some(Self::XzyNeg),
            2 => Some(Self::YxzNeg),
            3 => Some(Self::Yzx),
            4 => Some(Self::Zxy),
            5 => Some(Self::ZyxNeg),
            6 => Some(Self::XyzNeg),
            7 => Some(Self::Xzy),
            8 => Some(Self::Yxz),
            9 => Some(Self::YzxNeg),
            10 => Some(Self::ZxyNeg),
            11 => Some(Self::Zyx),
            _ => None,
        }
    }

    /// Whether this frame is left handed.
    #[must_use]
    pub fn is_left_handed(self) -> bool {
        self.to_u8() >= Self::XyzNeg.to_u8()
    }
}

/// Server configuration, sent first on every connection and recorded at the
/// head of every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    /// Microseconds per frame-time tick.
    pub time_unit: u64,
    /// Frame-time ticks to assume when a frame message carries zero.
    pub default_frame_time: u32,
    /// Axis convention of the streamed scene.
    pub coordinate_frame: CoordinateFrame,
}

/// Reserved tail bytes in the server info record.
const SERVER_INFO_RESERVED: usize = 35;

impl Default for ServerInfo {
    fn default() -> Self {
        Self { time_unit: 1000, default_frame_time: 33, coordinate_frame: CoordinateFrame::Xyz }
    }
}

impl ServerInfo {
    /// Write this record to `packet`.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.time_unit)?;
        packet.write(self.default_frame_time)?;
        packet.write(self.coordinate_frame.to_u8())?;
        let reserved = [0u8; SERVER_INFO_RESERVED];
        if packet.write_raw(&reserved) != SERVER_INFO_RESERVED {
            return Err(ProtocolError::BufferFull {
                requested: SERVER_INFO_RESERVED,
                remaining: usize::from(packet.bytes_remaining()),
            });
        }
        Ok(())
    }

    /// Read this record from `packet`. Reserved bytes are skipped; an
    /// unknown coordinate frame value falls back to the default so newer
    /// minor versions stay decodable.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        let time_unit = packet.read::<u64>()?;
        let default_frame_time = packet.read::<u32>()?;
        let frame_raw = packet.read::<u8>()?;
        let mut reserved = [0u8; SERVER_INFO_RESERVED];
        let skipped = packet.read_raw(&mut reserved);
        if skipped != SERVER_INFO_RESERVED {
            return Err(ProtocolError::Truncated {
                expected: SERVER_INFO_RESERVED,
                actual: skipped,
            });
        }
        let coordinate_frame = CoordinateFrame::from_u8(frame_raw).unwrap_or_else(|| {
            tracing::warn!(value = frame_raw, "unknown coordinate frame; assuming XYZ");
            CoordinateFrame::Xyz
        });
        Ok(Self { time_unit, default_frame_time, coordinate_frame })
    }
}

/// A control message: `{ flags, value32, value64 }` with meanings given by
/// the [`ControlId`] carried in the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlMessage {
    /// [`control_flag`] values for this control id.
    pub flags: u32,
    /// 32-bit value; meaning depends on the control id.
    pub value32: u32,
    /// 64-bit value; meaning depends on the control id.
    pub value64: u64,
}

impl ControlMessage {
    /// Write this record to `packet`.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.flags)?;
        packet.write(self.value32)?;
        packet.write(self.value64)?;
        Ok(())
    }

    /// Read this record from `packet`.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self {
            flags: packet.read()?,
            value32: packet.read()?,
            value64: packet.read()?,
        })
    }
}

/// Header of the collated packet payload, preceding the inner byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollatedPacketMessage {
    /// [`collated_flag`] values.
    pub flags: u16,
    /// Reserved; must be zero.
    pub reserved: u16,
    /// Inner packet stream length prior to compression.
    pub uncompressed_bytes: u32,
}

impl CollatedPacketMessage {
    /// Serialised size of this record.
    pub const SIZE: usize = 8;

    /// Write this record to `packet`.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.flags)?;
        packet.write(self.reserved)?;
        packet.write(self.uncompressed_bytes)?;
        Ok(())
    }

    /// Read this record from `packet`.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self {
            flags: packet.read()?,
            reserved: packet.read()?,
            uncompressed_bytes: packet.read()?,
        })
    }
}

/// Category definition record. Additive only: there is no category destroy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CategoryNameMessage {
    /// Category being defined.
    pub category_id: u16,
    /// Parent category; zero for a root category.
    pub parent_id: u16,
    /// Whether the category starts active.
    pub default_active: bool,
    /// Display name.
    pub name: String,
}

impl CategoryNameMessage {
    /// Write this record to `packet`. The name must fit a `u16` length.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.category_id)?;
        packet.write(self.parent_id)?;
        packet.write(u8::from(self.default_active))?;
        let name_length = u16::try_from(self.name.len()).map_err(|_| {
            ProtocolError::BufferFull { requested: self.name.len(), remaining: usize::from(u16::MAX) }
        })?;
        packet.write(name_length)?;
        if packet.write_raw(self.name.as_bytes()) != self.name.len() {
            return Err(ProtocolError::BufferFull {
                requested: self.name.len(),
                remaining: usize::from(packet.bytes_remaining()),
            });
        }
        Ok(())
    }

    /// Read this record from `packet`.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        let category_id = packet.read::<u16>()?;
        let parent_id = packet.read::<u16>()?;
        let default_active = packet.read::<u8>()? != 0;
        let name_length = usize::from(packet.read::<u16>()?);
        let mut raw = vec![0u8; name_length];
        if packet.read_raw(&mut raw) != name_length {
            return Err(ProtocolError::Truncated { expected: name_length, actual: 0 });
        }
        let name = String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Self { category_id, parent_id, default_active, name })
    }
}

/// Model transform and colour carried by shape create/update messages.
///
/// Stored in double precision; the wire precision is chosen by the
/// `DOUBLE_PRECISION` flag of the enclosing message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectAttributes {
    /// Packed RGBA colour.
    pub colour: u32,
    /// Position.
    pub position: [f64; 3],
    /// Rotation quaternion in xyzw order.
    pub rotation: [f64; 4],
    /// Per-axis scale.
    pub scale: [f64; 3],
}

impl Default for ObjectAttributes {
    fn default() -> Self {
        Self::identity()
    }
}

impl ObjectAttributes {
    /// An identity transform coloured white.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            colour: 0xFFFF_FFFF,
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }

    /// Write the attributes, in double or single precision.
    pub fn write(&self, packet: &mut PacketWriter<'_>, double_precision: bool) -> Result<()> {
        packet.write(self.colour)?;
        let fields = self.position.iter().chain(&self.rotation).chain(&self.scale);
        if double_precision {
            for &value in fields {
                packet.write(value)?;
            }
        } else {
            for &value in fields {
                packet.write(value as f32)?;
            }
        }
        Ok(())
    }

    /// Read attributes written at the given precision.
    pub fn read(packet: &mut PacketReader<'_>, double_precision: bool) -> Result<Self> {
        let colour = packet.read::<u32>()?;
        let mut fields = [0.0f64; 10];
        for slot in &mut fields {
            *slot = if double_precision {
                packet.read::<f64>()?
            } else {
                f64::from(packet.read::<f32>()?)
            };
        }
        Ok(Self {
            colour,
            position: [fields[0], fields[1], fields[2]],
            rotation: [fields[3], fields[4], fields[5], fields[6]],
            scale: [fields[7], fields[8], fields[9]],
        })
    }
}

/// Shape creation record, followed on the wire by [`ObjectAttributes`] and
/// any shape-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateMessage {
    /// Shape id; zero denotes a transient shape living one frame.
    pub id: u32,
    /// Category controlling visibility.
    pub category: u16,
    /// [`object_flag`] values.
    pub flags: u16,
    /// Reserved; must be zero.
    pub reserved: u16,
}

impl CreateMessage {
    /// Write the record and attributes (precision from the flags).
    pub fn write(&self, packet: &mut PacketWriter<'_>, attributes: &ObjectAttributes) -> Result<()> {
        packet.write(self.id)?;
        packet.write(self.category)?;
        packet.write(self.flags)?;
        packet.write(self.reserved)?;
        attributes.write(packet, self.flags & object_flag::DOUBLE_PRECISION != 0)
    }

    /// Read the record and attributes (precision from the flags).
    pub fn read(packet: &mut PacketReader<'_>) -> Result<(Self, ObjectAttributes)> {
        let message = Self {
            id: packet.read()?,
            category: packet.read()?,
            flags: packet.read()?,
            reserved: packet.read()?,
        };
        let attributes =
            ObjectAttributes::read(packet, message.flags & object_flag::DOUBLE_PRECISION != 0)?;
        Ok((message, attributes))
    }
}

/// Shape update record. The flags combine [`object_flag`] values with
/// [`update_flag`] selectors marking which attribute fields apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateMessage {
    /// Shape id to update.
    pub id: u32,
    /// Combined [`object_flag`] and [`update_flag`] values.
    pub flags: u16,
}

impl UpdateMessage {
    /// Write the record and attributes (precision from the flags).
    pub fn write(&self, packet: &mut PacketWriter<'_>, attributes: &ObjectAttributes) -> Result<()> {
        packet.write(self.id)?;
        packet.write(self.flags)?;
        attributes.write(packet, self.flags & object_flag::DOUBLE_PRECISION != 0)
    }

    /// Read the record and attributes (precision from the flags).
    pub fn read(packet: &mut PacketReader<'_>) -> Result<(Self, ObjectAttributes)> {
        let message = Self { id: packet.read()?, flags: packet.read()? };
        let attributes =
            ObjectAttributes::read(packet, message.flags & object_flag::DOUBLE_PRECISION != 0)?;
        Ok((message, attributes))
    }
}

/// Shape destruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DestroyMessage {
    /// Shape id to destroy.
    pub id: u32,
}

impl DestroyMessage {
    /// Write this record to `packet`.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.id)
    }

    /// Read this record from `packet`.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self { id: packet.read()? })
    }
}

/// Header of a data message carrying additional creation payload for a
/// complex shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataMessage {
    /// Shape id the payload belongs to.
    pub id: u32,
}

impl DataMessage {
    /// Write this record to `packet`.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.id)
    }

    /// Read this record from `packet`.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self { id: packet.read()? })
    }
}

/// Camera placement message under [`RoutingId::Camera`], message id zero.
///
/// All values are single precision. Clip planes and field of view at or
/// below zero mean "unchanged".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraMessage {
    /// Camera id; [`CameraMessage::RECORDED_CAMERA_ID`] is reserved for the
    /// view used while recording.
    pub camera_id: u8,
    /// Reserved; must be zero (attributes here are always single precision).
    pub flags: u8,
    /// Reserved; must be zero.
    pub reserved: u32,
    /// Position.
    pub position: [f32; 3],
    /// Forward vector.
    pub direction: [f32; 3],
    /// Up vector.
    pub up: [f32; 3],
    /// Near clip plane; zero or less leaves it unchanged.
    pub near_clip: f32,
    /// Far clip plane; zero or less leaves it unchanged.
    pub far_clip: f32,
    /// Horizontal field of view in degrees; zero or less leaves it unchanged.
    pub fov: f32,
}

impl CameraMessage {
    /// Camera id recording the viewer's own camera during playback capture.
    pub const RECORDED_CAMERA_ID: u8 = 255;

    /// Write this record to `packet`.
    pub fn write(&self, packet: &mut PacketWriter<'_>) -> Result<()> {
        packet.write(self.camera_id)?;
        packet.write(self.flags)?;
        packet.write(self.reserved)?;
        for &value in
            self.position.iter().chain(&self.direction).chain(&self.up)
        {
            packet.write(value)?;
        }
        packet.write(self.near_clip)?;
        packet.write(self.far_clip)?;
        packet.write(self.fov)?;
        Ok(())
    }

    /// Read this record from `packet`.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<Self> {
        let camera_id = packet.read::<u8>()?;
        let flags = packet.read::<u8>()?;
        let reserved = packet.read::<u32>()?;
        let mut fields = [0.0f32; 9];
        for slot in &mut fields {
            *slot = packet.read()?;
        }
        Ok(Self {
            camera_id,
            flags,
            reserved,
            position: [fields[0], fields[1], fields[2]],
            direction: [fields[3], fields[4], fields[5]],
            up: [fields[6], fields[7], fields[8]],
            near_clip: packet.read()?,
            far_clip: packet.read()?,
            fov: packet.read()?,
        })
    }
}
