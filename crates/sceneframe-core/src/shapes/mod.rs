//! Shape model: the objects an instrumented host streams to viewers.
//!
//! Every shape owns a [`ShapeCore`] (id, category, flags and transform
//! attributes) plus a shape-specific payload. Simple shapes fit one create
//! packet; complex shapes ([`MeshShape`]) follow their create with a
//! sequence of data packets driven by a progress cursor.
//!
//! A shape with id zero is transient: it lives exactly one frame and is
//! dropped by viewers at the next frame commit.

mod mesh_set;
mod mesh_shape;
mod point_cloud;
mod simple;
mod text;

use std::sync::Arc;

pub use mesh_set::{MeshPart, MeshSet};
pub use mesh_shape::{MeshShape, ShapeDataPhase};
pub use point_cloud::PointCloudShape;
pub use simple::{Arrow, Capsule, Cone, Cuboid, Cylinder, Plane, Pose, Sphere, Star};
pub use text::{Text2D, Text3D, text2d_flag, text3d_flag};

use sceneframe_proto::{
    CreateMessage, DestroyMessage, ObjectAttributes, ObjectId, PacketReader, PacketWriter,
    ProtocolError, UpdateMessage, object_flag, update_flag,
};

use crate::resource::Resource;

/// Identity, categorisation and transform shared by all shape types.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapeCore {
    /// Shape id; zero for transient shapes.
    pub id: u32,
    /// Category controlling viewer-side visibility.
    pub category: u16,
    /// [`object_flag`] values, possibly combined with [`update_flag`]
    /// selectors for updates.
    pub flags: u16,
    /// Reserved word; must be zero.
    pub reserved: u16,
    /// Transform and colour.
    pub attributes: ObjectAttributes,
}

impl ShapeCore {
    /// A core with the given id and identity attributes.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self { id, attributes: ObjectAttributes::identity(), ..Self::default() }
    }

    /// Whether this shape is transient (id zero).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.id == 0
    }

    /// Whether attributes encode in double precision.
    #[must_use]
    pub fn double_precision(&self) -> bool {
        self.flags & object_flag::DOUBLE_PRECISION != 0
    }

    /// Write the create record and attributes.
    pub fn write_create(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        CreateMessage {
            id: self.id,
            category: self.category,
            flags: self.flags,
            reserved: self.reserved,
        }
        .write(packet, &self.attributes)
    }

    /// Read the create record and attributes into this core.
    pub fn read_create(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        let (message, attributes) = CreateMessage::read(packet)?;
        self.id = message.id;
        self.category = message.category;
        self.flags = message.flags;
        self.reserved = message.reserved;
        self.attributes = attributes;
        Ok(())
    }

    /// Write the update record and attributes.
    pub fn write_update(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        UpdateMessage { id: self.id, flags: self.flags }.write(packet, &self.attributes)
    }

    /// Read an update record, applying it to this core with the update-mode
    /// selection semantics.
    pub fn read_update(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        let (message, attributes) = UpdateMessage::read(packet)?;
        self.id = message.id;
        apply_update(&mut self.attributes, message.flags, &attributes);
        Ok(())
    }
}

/// Apply `incoming` attributes onto `attributes` under update `flags`.
///
/// In update mode only the flagged sub-fields are authoritative; the rest
/// are preserved. Without update mode the incoming attributes replace the
/// current ones wholesale.
pub fn apply_update(attributes: &mut ObjectAttributes, flags: u16, incoming: &ObjectAttributes) {
    if flags & update_flag::UPDATE_MODE == 0 {
        *attributes = *incoming;
        return;
    }
    if flags & update_flag::POSITION != 0 {
        attributes.position = incoming.position;
    }
    if flags & update_flag::ROTATION != 0 {
        attributes.rotation = incoming.rotation;
    }
    if flags & update_flag::SCALE != 0 {
        attributes.scale = incoming.scale;
    }
    if flags & update_flag::COLOUR != 0 {
        attributes.colour = incoming.colour;
    }
}

/// Common operations over the concrete shape types.
///
/// Writers reset the packet themselves, so one scratch buffer serves a
/// whole message sequence. Complex shapes advance `progress` across
/// repeated [`Shape::write_data`] calls until it reports no more data.
pub trait Shape: Send + Sync {
    /// Routing id of this shape's handler. Constant per concrete type.
    fn routing_id(&self) -> u16;

    /// Shared identity and transform state.
    fn core(&self) -> &ShapeCore;

    /// Mutable access to the shared state.
    fn core_mut(&mut self) -> &mut ShapeCore;

    /// Whether creation requires data packets beyond the create message.
    fn is_complex(&self) -> bool {
        false
    }

    /// Whether this shape opts out of automatic resource reference
    /// counting.
    fn skip_resources(&self) -> bool {
        self.core().flags & object_flag::SKIP_RESOURCES != 0
    }

    /// Resources this shape references, for connection-side reference
    /// counting.
    fn resources(&self) -> Vec<Arc<dyn Resource>> {
        Vec::new()
    }

    /// Write the create message, including any inline payload.
    fn write_create(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        packet.reset(self.routing_id(), ObjectId::Create.to_u16());
        self.core().write_create(packet)
    }

    /// Read the create message, including any inline payload.
    fn read_create(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        self.core_mut().read_create(packet)
    }

    /// Write an update message.
    fn write_update(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        packet.reset(self.routing_id(), ObjectId::Update.to_u16());
        self.core().write_update(packet)
    }

    /// Read and apply an update message.
    fn read_update(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        self.core_mut().read_update(packet)
    }

    /// Write the destroy message.
    fn write_destroy(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        packet.reset(self.routing_id(), ObjectId::Destroy.to_u16());
        DestroyMessage { id: self.core().id }.write(packet)
    }

    /// Write the next data packet for a complex shape, advancing
    /// `progress`. Returns `Ok(true)` while more data remains.
    fn write_data(
        &self,
        packet: &mut PacketWriter<'_>,
        progress: &mut u32,
    ) -> Result<bool, ProtocolError> {
        let _ = (packet, progress);
        Ok(false)
    }

    /// Read one data packet for a complex shape.
    fn read_data(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        let _ = packet;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use sceneframe_proto::RoutingId;

    fn arbitrary_attributes() -> impl Strategy<Value = ObjectAttributes> {
        let real = -1.0e6f64..1.0e6;
        (
            any::<u32>(),
            prop::array::uniform3(real.clone()),
            prop::array::uniform4(real.clone()),
            prop::array::uniform3(real),
        )
            .prop_map(|(colour, position, rotation, scale)| ObjectAttributes {
                colour,
                position,
                rotation,
                scale,
            })
    }

    proptest! {
        #[test]
        fn core_round_trips_both_precisions(
            id in any::<u32>(),
            category in any::<u16>(),
            double in any::<bool>(),
            attributes in arbitrary_attributes(),
        ) {
            let mut core = ShapeCore::new(id);
            core.category = category;
            core.attributes = attributes;
            if double {
                core.flags |= object_flag::DOUBLE_PRECISION;
            }

            let mut buffer = vec![0u8; 256];
            let mut writer = PacketWriter::new(&mut buffer, 64, 1).unwrap();
            core.write_create(&mut writer).unwrap();
            writer.finalise().unwrap();
            let bytes = writer.data().to_vec();

            let mut reader = PacketReader::new(&bytes).unwrap();
            let mut decoded = ShapeCore::default();
            decoded.read_create(&mut reader).unwrap();

            prop_assert_eq!(decoded.id, core.id);
            prop_assert_eq!(decoded.category, core.category);
            prop_assert_eq!(decoded.attributes.colour, core.attributes.colour);
            // Single precision round trips through f32; compare at f32
            // resolution in that case.
            for i in 0..3 {
                let expected = if double {
                    core.attributes.position[i]
                } else {
                    f64::from(core.attributes.position[i] as f32)
                };
                prop_assert_eq!(decoded.attributes.position[i], expected);
            }
        }
    }

    #[test]
    fn update_mode_preserves_unselected_fields() {
        let mut attributes = ObjectAttributes {
            colour: 0x0102_0304,
            position: [1.0, 2.0, 3.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0, 1.0, 1.0],
        };
        let incoming = ObjectAttributes {
            colour: 0xFFFF_FFFF,
            position: [9.0, 9.0, 9.0],
            rotation: [1.0, 0.0, 0.0, 0.0],
            scale: [5.0, 5.0, 5.0],
        };

        apply_update(
            &mut attributes,
            update_flag::UPDATE_MODE | update_flag::COLOUR,
            &incoming,
        );
        assert_eq!(attributes.colour, 0xFFFF_FFFF);
        assert_eq!(attributes.position, [1.0, 2.0, 3.0]);
        assert_eq!(attributes.scale, [1.0, 1.0, 1.0]);

        // Without update mode the attributes replace wholesale.
        apply_update(&mut attributes, 0, &incoming);
        assert_eq!(attributes.position, [9.0, 9.0, 9.0]);
    }

    #[test]
    fn shape_create_round_trip() {
        let mut sphere = Sphere::new(12);
        sphere.core_mut().attributes.position = [1.0, 2.0, 3.0];
        sphere.core_mut().attributes.scale = [2.0, 2.0, 2.0];
        sphere.core_mut().category = 5;

        let mut buffer = vec![0u8; 256];
        let mut writer =
            PacketWriter::new(&mut buffer, RoutingId::Sphere.to_u16(), 0).unwrap();
        sphere.write_create(&mut writer).unwrap();
        writer.finalise().unwrap();
        let bytes = writer.data().to_vec();

        let mut reader = PacketReader::new(&bytes).unwrap();
        assert_eq!(reader.routing_id(), RoutingId::Sphere.to_u16());
        assert_eq!(reader.message_id(), ObjectId::Create.to_u16());

        let mut decoded = Sphere::new(0);
        decoded.read_create(&mut reader).unwrap();
        assert_eq!(decoded.core(), sphere.core());
    }
}
