//! Fixed packet header, parsed in place.
//!
//! Every framed packet starts with a 16-byte header in network byte order.
//! Fields are stored as raw byte arrays so the struct can be cast directly
//! from an untrusted byte buffer without alignment or validity concerns; the
//! accessors perform the endian conversion.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Marker value identifying the start of every framed packet.
pub const PACKET_MARKER: u32 = 0x03E5_5E30;

/// Packet major version written by this implementation.
pub const VERSION_MAJOR: u16 = 0;

/// Packet minor version written by this implementation.
pub const VERSION_MINOR: u16 = 4;

/// Oldest minor version (at major 0) this implementation decodes.
pub const VERSION_MINOR_MIN: u16 = 3;

/// Header flag values.
pub mod packet_flag {
    /// The packet omits its trailing 16-bit CRC.
    pub const NO_CRC: u8 = 1 << 0;
}

/// Fixed packet header (16 bytes, big endian).
///
/// Layout on the wire:
///
/// | Offset | Size | Field            |
/// |--------|------|------------------|
/// | 0      | 4    | marker           |
/// | 4      | 2    | version major    |
/// | 6      | 2    | version minor    |
/// | 8      | 2    | routing id       |
/// | 10     | 2    | message id       |
/// | 12     | 2    | payload size     |
/// | 14     | 1    | payload offset   |
/// | 15     | 1    | flags            |
///
/// A two-byte CRC over header and payload follows the payload unless
/// [`packet_flag::NO_CRC`] is set.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    marker: [u8; 4],
    version_major: [u8; 2],
    version_minor: [u8; 2],
    pub(crate) routing_id: [u8; 2],
    pub(crate) message_id: [u8; 2],
    pub(crate) payload_size: [u8; 2],
    payload_offset: u8,
    flags: u8,
}

impl PacketHeader {
    /// Serialised header size in bytes.
    pub const SIZE: usize = 16;

    /// Size of the trailing CRC in bytes.
    pub const CRC_SIZE: usize = 2;

    /// Borrow a header from the front of `bytes` without validation.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Truncated` when fewer than [`Self::SIZE`] bytes are
    /// available.
    pub fn ref_from(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes).map(|(header, _)| header).map_err(|_| {
            ProtocolError::Truncated { expected: Self::SIZE, actual: bytes.len() }
        })
    }

    /// Borrow a header from the front of `bytes` and validate the framing
    /// fields: marker, version window and payload offset.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` on a short buffer
    /// - `ProtocolError::InvalidMarker` when the marker bytes are wrong
    /// - `ProtocolError::UnsupportedVersion` outside major 0, minor >= 3
    /// - `ProtocolError::NonZeroPayloadOffset` for any non-zero offset
    pub fn validated_from(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from(bytes)?;

        if header.marker() != PACKET_MARKER {
            return Err(ProtocolError::InvalidMarker { found: header.marker() });
        }

        if header.version_major() != 0 || header.version_minor() < VERSION_MINOR_MIN {
            return Err(ProtocolError::UnsupportedVersion {
                major: header.version_major(),
                minor: header.version_minor(),
            });
        }

        if header.payload_offset != 0 {
            return Err(ProtocolError::NonZeroPayloadOffset { offset: header.payload_offset });
        }

        Ok(header)
    }

    /// Framing marker bytes.
    #[must_use]
    pub fn marker(&self) -> u32 {
        u32::from_be_bytes(self.marker)
    }

    /// Major protocol version.
    #[must_use]
    pub fn version_major(&self) -> u16 {
        u16::from_be_bytes(self.version_major)
    }

    /// Minor protocol version.
    #[must_use]
    pub fn version_minor(&self) -> u16 {
        u16::from_be_bytes(self.version_minor)
    }

    /// Handler selector for this packet.
    #[must_use]
    pub fn routing_id(&self) -> u16 {
        u16::from_be_bytes(self.routing_id)
    }

    /// Message sub-type within the handler.
    #[must_use]
    pub fn message_id(&self) -> u16 {
        u16::from_be_bytes(self.message_id)
    }

    /// Payload bytes following the header, excluding any CRC.
    #[must_use]
    pub fn payload_size(&self) -> u16 {
        u16::from_be_bytes(self.payload_size)
    }

    /// Offset from the end of the header to the payload. Always zero in the
    /// current protocol.
    #[must_use]
    pub fn payload_offset(&self) -> u8 {
        self.payload_offset
    }

    /// [`packet_flag`] values.
    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Whether the packet carries a trailing CRC.
    #[must_use]
    pub fn has_crc(&self) -> bool {
        self.flags & packet_flag::NO_CRC == 0
    }

    /// Full framed size: header, payload and optional CRC.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        Self::SIZE
            + self.payload_size() as usize
            + if self.has_crc() { Self::CRC_SIZE } else { 0 }
    }
}

impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("marker", &format_args!("{:#010x}", self.marker()))
            .field("version", &format_args!("{}.{}", self.version_major(), self.version_minor()))
            .field("routing_id", &self.routing_id())
            .field("message_id", &self.message_id())
            .field("payload_size", &self.payload_size())
            .field("payload_offset", &self.payload_offset())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(payload_size: u16, flags: u8) -> [u8; PacketHeader::SIZE] {
        let mut raw = [0u8; PacketHeader::SIZE];
        raw[0..4].copy_from_slice(&PACKET_MARKER.to_be_bytes());
        raw[4..6].copy_from_slice(&VERSION_MAJOR.to_be_bytes());
        raw[6..8].copy_from_slice(&VERSION_MINOR.to_be_bytes());
        raw[12..14].copy_from_slice(&payload_size.to_be_bytes());
        raw[15] = flags;
        raw
    }

    #[test]
    fn header_size_is_sixteen_bytes() {
        assert_eq!(size_of::<PacketHeader>(), PacketHeader::SIZE);
    }

    #[test]
    fn packet_size_accounts_for_crc() {
        let with_crc = header_bytes(100, 0);
        let header = PacketHeader::validated_from(&with_crc).unwrap();
        assert_eq!(header.packet_size(), 16 + 100 + 2);

        let without_crc = header_bytes(100, packet_flag::NO_CRC);
        let header = PacketHeader::validated_from(&without_crc).unwrap();
        assert_eq!(header.packet_size(), 16 + 100);
    }

    #[test]
    fn rejects_bad_marker() {
        let mut raw = header_bytes(0, 0);
        raw[0] = 0xFF;
        assert!(matches!(
            PacketHeader::validated_from(&raw),
            Err(ProtocolError::InvalidMarker { .. })
        ));
    }

    #[test]
    fn rejects_old_minor_version() {
        let mut raw = header_bytes(0, 0);
        raw[6..8].copy_from_slice(&2u16.to_be_bytes());
        assert!(matches!(
            PacketHeader::validated_from(&raw),
            Err(ProtocolError::UnsupportedVersion { major: 0, minor: 2 })
        ));
    }

    #[test]
    fn accepts_minor_three() {
        let mut raw = header_bytes(0, 0);
        raw[6..8].copy_from_slice(&3u16.to_be_bytes());
        assert!(PacketHeader::validated_from(&raw).is_ok());
    }

    #[test]
    fn rejects_payload_offset() {
        let mut raw = header_bytes(0, 0);
        raw[14] = 4;
        assert!(matches!(
            PacketHeader::validated_from(&raw),
            Err(ProtocolError::NonZeroPayloadOffset { offset: 4 })
        ));
    }
}
