//! Packet decode cursor over a framed byte buffer.

use std::io::SeekFrom;

use crate::errors::{ProtocolError, Result};
use crate::header::PacketHeader;
use crate::wire::WireValue;

/// Reads one framed packet from a borrowed byte buffer.
///
/// Construction validates the framing fields (marker, version window, zero
/// payload offset) and that the buffer holds the full framed size. CRC
/// verification is separate via [`PacketReader::check_crc`] so routing can
/// inspect headers cheaply before paying for the checksum.
#[derive(Debug)]
pub struct PacketReader<'a> {
    header: &'a PacketHeader,
    buffer: &'a [u8],
    cursor: u16,
}

impl<'a> PacketReader<'a> {
    /// Wrap the framed packet at the front of `bytes`.
    ///
    /// # Errors
    ///
    /// Framing validation errors from [`PacketHeader::validated_from`], or
    /// `ProtocolError::Truncated` when `bytes` is shorter than the framed
    /// size the header declares.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let header = PacketHeader::validated_from(bytes)?;
        let packet_size = header.packet_size();
        if bytes.len() < packet_size {
            return Err(ProtocolError::Truncated { expected: packet_size, actual: bytes.len() });
        }
        Ok(Self { header, buffer: &bytes[..packet_size], cursor: 0 })
    }

    /// The validated packet header.
    #[must_use]
    pub fn header(&self) -> &PacketHeader {
        self.header
    }

    /// Handler selector from the header.
    #[must_use]
    pub fn routing_id(&self) -> u16 {
        self.header.routing_id()
    }

    /// Message sub-type from the header.
    #[must_use]
    pub fn message_id(&self) -> u16 {
        self.header.message_id()
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u16 {
        self.header.payload_size()
    }

    /// Full framed size including header and any CRC.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.header.packet_size()
    }

    /// The payload bytes.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[PacketHeader::SIZE..PacketHeader::SIZE + usize::from(self.payload_size())]
    }

    /// Verify the trailing CRC against the header and payload bytes.
    ///
    /// Packets flagged `NO_CRC` pass trivially.
    ///
    /// # Errors
    ///
    /// `ProtocolError::CrcMismatch` with both values on disagreement.
    pub fn check_crc(&self) -> Result<()> {
        if !self.header.has_crc() {
            return Ok(());
        }
        let end = PacketHeader::SIZE + usize::from(self.payload_size());
        let found = u16::from_be_bytes([self.buffer[end], self.buffer[end + 1]]);
        let calculated = crate::crc::crc16(&self.buffer[..end]);
        if found != calculated {
            return Err(ProtocolError::CrcMismatch { found, calculated });
        }
        Ok(())
    }

    /// Payload cursor position.
    #[must_use]
    pub fn tell(&self) -> u16 {
        self.cursor
    }

    /// Payload bytes left to read.
    #[must_use]
    pub fn bytes_remaining(&self) -> u16 {
        self.payload_size() - self.cursor
    }

    /// Move the payload cursor. Bounded by `[0, payload_size]`; an
    /// out-of-range target fails without moving the cursor.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u16> {
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
            SeekFrom::Current(offset) => i64::from(self.cursor) + offset,
            SeekFrom::End(offset) => i64::from(self.payload_size()) + offset,
        };
        if target < 0 || target > i64::from(self.payload_size()) {
            return Err(ProtocolError::InvalidSeek {
                offset: target,
                payload_size: self.payload_size(),
            });
        }
        self.cursor = target as u16;
        Ok(self.cursor)
    }

    /// Read one scalar from the payload in network byte order.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Truncated` when the payload has fewer bytes left than
    /// the scalar needs; the cursor does not move.
    pub fn read<T: WireValue>(&mut self) -> Result<T> {
        let remaining = usize::from(self.bytes_remaining());
        if T::WIRE_SIZE > remaining {
            return Err(ProtocolError::Truncated { expected: T::WIRE_SIZE, actual: remaining });
        }
        let at = PacketHeader::SIZE + usize::from(self.cursor);
        let value = T::read_be(&self.buffer[at..]);
        self.cursor += T::WIRE_SIZE as u16;
        Ok(value)
    }

    /// Fill `out` with scalars, swapping each element. Returns how many were
    /// read (short when the payload runs out).
    pub fn read_array<T: WireValue>(&mut self, out: &mut [T]) -> usize {
        let available = usize::from(self.bytes_remaining()) / T::WIRE_SIZE;
        let count = available.min(out.len());
        for slot in &mut out[..count] {
            let at = PacketHeader::SIZE + usize::from(self.cursor);
            *slot = T::read_be(&self.buffer[at..]);
            self.cursor += T::WIRE_SIZE as u16;
        }
        count
    }

    /// Read exactly `count` scalars into a new vector.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Truncated` when the payload holds fewer elements.
    pub fn read_vec<T: WireValue>(&mut self, count: usize) -> Result<Vec<T>> {
        let needed = count * T::WIRE_SIZE;
        let remaining = usize::from(self.bytes_remaining());
        if needed > remaining {
            return Err(ProtocolError::Truncated { expected: needed, actual: remaining });
        }
        let mut out = vec![T::default(); count];
        let filled = self.read_array(&mut out);
        debug_assert_eq!(filled, count);
        Ok(out)
    }

    /// Copy raw bytes from the payload with no endian handling. Returns how
    /// many bytes were read.
    pub fn read_raw(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(usize::from(self.bytes_remaining()));
        let at = PacketHeader::SIZE + usize::from(self.cursor);
        out[..count].copy_from_slice(&self.buffer[at..at + count]);
        self.cursor += count as u16;
        count
    }

    /// Copy bytes from the cursor without advancing it. Returns how many
    /// bytes were copied.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let count = out.len().min(usize::from(self.bytes_remaining()));
        let at = PacketHeader::SIZE + usize::from(self.cursor);
        out[..count].copy_from_slice(&self.buffer[at..at + count]);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PacketWriter;

    fn framed(routing: u16, message: u16, fill: impl FnOnce(&mut PacketWriter<'_>)) -> Vec<u8> {
        let mut buffer = vec![0u8; 1024];
        let mut writer = PacketWriter::new(&mut buffer, routing, message).unwrap();
        fill(&mut writer);
        writer.finalise().unwrap();
        writer.data().to_vec()
    }

    #[test]
    fn scalar_round_trip() {
        let bytes = framed(64, 1, |w| {
            w.write(0x1234_5678u32).unwrap();
            w.write(-2i16).unwrap();
            w.write(1.5f64).unwrap();
        });

        let mut reader = PacketReader::new(&bytes).unwrap();
        reader.check_crc().unwrap();
        assert_eq!(reader.routing_id(), 64);
        assert_eq!(reader.message_id(), 1);
        assert_eq!(reader.read::<u32>().unwrap(), 0x1234_5678);
        assert_eq!(reader.read::<i16>().unwrap(), -2);
        assert!((reader.read::<f64>().unwrap() - 1.5).abs() < f64::EPSILON);
        assert_eq!(reader.bytes_remaining(), 0);
    }

    #[test]
    fn read_past_payload_fails() {
        let bytes = framed(1, 0, |w| {
            w.write(7u16).unwrap();
        });
        let mut reader = PacketReader::new(&bytes).unwrap();
        assert_eq!(reader.read::<u16>().unwrap(), 7);
        assert!(matches!(reader.read::<u8>(), Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn detects_corruption() {
        let mut bytes = framed(1, 0, |w| {
            w.write(0xAAAAu16).unwrap();
        });
        let payload_at = PacketHeader::SIZE;
        bytes[payload_at] ^= 0xFF;
        let reader = PacketReader::new(&bytes).unwrap();
        assert!(matches!(reader.check_crc(), Err(ProtocolError::CrcMismatch { .. })));
    }

    #[test]
    fn minimal_no_crc_frame_is_sixteen_bytes() {
        let mut buffer = vec![0u8; 32];
        let mut writer = PacketWriter::new(&mut buffer, 2, 1).unwrap();
        writer.set_no_crc();
        writer.finalise().unwrap();
        let bytes = writer.data().to_vec();
        assert_eq!(bytes.len(), PacketHeader::SIZE);

        let reader = PacketReader::new(&bytes).unwrap();
        reader.check_crc().unwrap();
        assert_eq!(reader.payload_size(), 0);
    }

    #[test]
    fn peek_does_not_advance() {
        let bytes = framed(1, 0, |w| {
            w.write(0x0102u16).unwrap();
        });
        let mut reader = PacketReader::new(&bytes).unwrap();
        let mut peeked = [0u8; 2];
        assert_eq!(reader.peek(&mut peeked), 2);
        assert_eq!(peeked, [0x01, 0x02]);
        assert_eq!(reader.tell(), 0);
        assert_eq!(reader.read::<u16>().unwrap(), 0x0102);
    }
}
