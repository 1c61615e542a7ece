//! Text shapes: screen-space 2D labels and in-scene 3D text.
//!
//! The create payload is the UTF-8 text prefixed with a `u16` byte length.

use sceneframe_proto::{
    ObjectId, PacketReader, PacketWriter, ProtocolError, RoutingId, object_flag,
};

use super::{Shape, ShapeCore};

/// Flags extending [`object_flag`] for [`Text2D`].
pub mod text2d_flag {
    use super::object_flag;

    /// Position is in world space, projected to the screen. Otherwise the
    /// position is in screen space: (0, 0) top left to (1, 1) bottom right.
    pub const WORLD_SPACE: u16 = object_flag::USER;
}

/// Flags extending [`object_flag`] for [`Text3D`].
pub mod text3d_flag {
    use super::object_flag;

    /// Orient the text to face the screen.
    pub const SCREEN_FACING: u16 = object_flag::USER;
}

macro_rules! text_shape {
    ($(#[$meta:meta])* $name:ident => $routing:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            core: ShapeCore,
            text: String,
        }

        impl $name {
            /// Create with the given id and text.
            #[must_use]
            pub fn new(id: u32, text: impl Into<String>) -> Self {
                Self { core: ShapeCore::new(id), text: text.into() }
            }

            /// The text content.
            #[must_use]
            pub fn text(&self) -> &str {
                &self.text
            }

            /// Replace the text content.
            pub fn set_text(&mut self, text: impl Into<String>) {
                self.text = text.into();
            }
        }

        impl Shape for $name {
            fn routing_id(&self) -> u16 {
                RoutingId::$routing.to_u16()
            }

            fn core(&self) -> &ShapeCore {
                &self.core
            }

            fn core_mut(&mut self) -> &mut ShapeCore {
                &mut self.core
            }

            fn write_create(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
                packet.reset(self.routing_id(), ObjectId::Create.to_u16());
                self.core.write_create(packet)?;
                let length = u16::try_from(self.text.len()).map_err(|_| {
                    ProtocolError::BufferFull {
                        requested: self.text.len(),
                        remaining: usize::from(u16::MAX),
                    }
                })?;
                packet.write(length)?;
                if packet.write_raw(self.text.as_bytes()) != self.text.len() {
                    return Err(ProtocolError::BufferFull {
                        requested: self.text.len(),
                        remaining: usize::from(packet.bytes_remaining()),
                    });
                }
                Ok(())
            }

            fn read_create(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
                self.core.read_create(packet)?;
                let length = usize::from(packet.read::<u16>()?);
                let mut raw = vec![0u8; length];
                if packet.read_raw(&mut raw) != length {
                    return Err(ProtocolError::Truncated { expected: length, actual: 0 });
                }
                self.text = String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(())
            }
        }
    };
}

text_shape!(
    /// Screen-space text. See [`text2d_flag`] for placement options.
    Text2D => Text2D
);
text_shape!(
    /// Text placed in the 3D scene. See [`text3d_flag`].
    Text3D => Text3D
);
