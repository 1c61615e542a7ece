//! Wire codec for the sceneframe debug-visualisation stream.
//!
//! An instrumented host streams shape, mesh, camera and category events to
//! remote viewers over live TCP connections or on-disk recordings. This
//! crate owns the byte-exact protocol layer:
//!
//! - framed packets: a 16-byte big-endian header, payload, and optional
//!   trailing CRC-16 ([`PacketHeader`], [`PacketWriter`], [`PacketReader`])
//! - stream reassembly with marker re-synchronisation ([`PacketBuffer`],
//!   [`PacketStreamReader`])
//! - packet collation with optional gzip compression ([`CollatedPacket`],
//!   [`CollatedPacketDecoder`])
//! - typed, strided, optionally quantised array transfer ([`DataBuffer`])
//! - the message taxonomy shared by every handler ([`RoutingId`] and the
//!   fixed message records)
//!
//! Nothing here suspends or blocks: codecs return progress and the caller
//! loops, so the same primitives serve the socket threads and the file
//! replay path.

pub mod buffer;
pub mod collate;
pub mod crc;
pub mod dbuffer;
pub mod errors;
pub mod header;
pub mod mesh;
pub mod messages;
pub mod reader;
pub mod wire;
pub mod writer;

pub use buffer::{PacketBuffer, PacketStreamReader};
pub use collate::{CollatedPacket, CollatedPacketDecoder, CompressionLevel, MAX_PACKET_SIZE};
pub use crc::crc16;
pub use dbuffer::{DataBuffer, ElementType, Storage, Store};
pub use errors::{ProtocolError, StreamError};
pub use header::{PACKET_MARKER, PacketHeader, VERSION_MAJOR, VERSION_MINOR, packet_flag};
pub use mesh::{
    DrawType, MeshComponent, MeshComponentMessage, MeshCreateMessage, MeshDestroyMessage,
    MeshFinaliseMessage, MeshMessageId, mesh_create_flag, mesh_finalise_flag,
};
pub use messages::{
    CameraMessage, CategoryId, CategoryNameMessage, CollatedPacketMessage, ControlId,
    ControlMessage, CoordinateFrame, CreateMessage, DataMessage, DestroyMessage, ObjectAttributes,
    ObjectId, RoutingId, SHAPE_ID_START, ServerInfo, UpdateMessage, USER_ID_START, collated_flag,
    control_flag, object_flag, update_flag,
};
pub use reader::PacketReader;
pub use writer::PacketWriter;
