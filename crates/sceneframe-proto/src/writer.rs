//! Packet composition over a caller-provided buffer.

use std::io::SeekFrom;

use crate::errors::{ProtocolError, Result};
use crate::header::{PACKET_MARKER, PacketHeader, VERSION_MAJOR, VERSION_MINOR, packet_flag};
use crate::wire::WireValue;

const OFFSET_ROUTING_ID: usize = 8;
const OFFSET_MESSAGE_ID: usize = 10;
const OFFSET_PAYLOAD_SIZE: usize = 12;
const OFFSET_PAYLOAD_OFFSET: usize = 14;
const OFFSET_FLAGS: usize = 15;

const STATUS_FAIL: u8 = 1 << 0;
const STATUS_CRC_VALID: u8 = 1 << 1;

/// Writes one framed packet into a borrowed byte buffer.
///
/// The header is laid down at construction; scalar and array writes append to
/// the payload in network byte order, growing `payload_size` as they go.
/// [`PacketWriter::finalise`] computes and appends the trailing CRC (unless
/// the packet was marked [`packet_flag::NO_CRC`]) after which the framed
/// bytes are available from [`PacketWriter::data`].
///
/// A write that would overrun the payload capacity writes nothing and latches
/// a failure bit; `finalise` then refuses, so a partially written packet can
/// never be emitted by accident. Array and raw writes instead write as many
/// whole elements as fit and report the short count.
#[derive(Debug)]
pub struct PacketWriter<'a> {
    buffer: &'a mut [u8],
    cursor: u16,
    status: u8,
}

impl<'a> PacketWriter<'a> {
    /// Begin a packet in `buffer` addressed to `routing_id` / `message_id`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Truncated` when the buffer cannot hold even an empty
    /// packet with its CRC.
    pub fn new(buffer: &'a mut [u8], routing_id: u16, message_id: u16) -> Result<Self> {
        if buffer.len() < PacketHeader::SIZE + PacketHeader::CRC_SIZE {
            return Err(ProtocolError::Truncated {
                expected: PacketHeader::SIZE + PacketHeader::CRC_SIZE,
                actual: buffer.len(),
            });
        }

        let mut writer = Self { buffer, cursor: 0, status: 0 };
        writer.buffer[0..4].copy_from_slice(&PACKET_MARKER.to_be_bytes());
        writer.buffer[4..6].copy_from_slice(&VERSION_MAJOR.to_be_bytes());
        writer.buffer[6..8].copy_from_slice(&VERSION_MINOR.to_be_bytes());
        writer.reset(routing_id, message_id);
        Ok(writer)
    }

    /// Restart the packet with a new routing and message id, clearing the
    /// payload and any latched failure.
    pub fn reset(&mut self, routing_id: u16, message_id: u16) {
        self.set_header_u16(OFFSET_ROUTING_ID, routing_id);
        self.set_header_u16(OFFSET_MESSAGE_ID, message_id);
        self.set_header_u16(OFFSET_PAYLOAD_SIZE, 0);
        self.buffer[OFFSET_PAYLOAD_OFFSET] = 0;
        self.buffer[OFFSET_FLAGS] = 0;
        self.cursor = 0;
        self.status = 0;
    }

    /// Mark the packet as carrying no trailing CRC.
    pub fn set_no_crc(&mut self) {
        self.buffer[OFFSET_FLAGS] |= packet_flag::NO_CRC;
        self.status &= !STATUS_CRC_VALID;
    }

    /// Routing id the packet is addressed to.
    #[must_use]
    pub fn routing_id(&self) -> u16 {
        self.header_u16(OFFSET_ROUTING_ID)
    }

    /// Message id within the routing id.
    #[must_use]
    pub fn message_id(&self) -> u16 {
        self.header_u16(OFFSET_MESSAGE_ID)
    }

    /// Current payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u16 {
        self.header_u16(OFFSET_PAYLOAD_SIZE)
    }

    /// Largest payload this buffer can hold (CRC capacity reserved).
    #[must_use]
    pub fn max_payload_size(&self) -> u16 {
        let capacity = self.buffer.len() - PacketHeader::SIZE - PacketHeader::CRC_SIZE;
        capacity.min(usize::from(u16::MAX)) as u16
    }

    /// Payload bytes still writable at the cursor.
    #[must_use]
    pub fn bytes_remaining(&self) -> u16 {
        self.max_payload_size() - self.cursor
    }

    /// Whether a write has failed; a failed packet cannot be finalised.
    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.status & STATUS_FAIL != 0
    }

    /// Whether the packet has been finalised.
    #[must_use]
    pub fn is_finalised(&self) -> bool {
        self.status & STATUS_CRC_VALID != 0
    }

    /// Payload cursor position.
    #[must_use]
    pub fn tell(&self) -> u16 {
        self.cursor
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

    /// Append one scalar in network byte order.
    ///
    /// # Errors
    ///
    /// `ProtocolError::BufferFull` when the scalar does not fit; nothing is
    /// written and the failure bit latches.
    pub fn write<T: WireValue>(&mut self, value: T) -> Result<()> {
        let remaining = usize::from(self.bytes_remaining());
        if T::WIRE_SIZE > remaining {
            self.status |= STATUS_FAIL;
            return Err(ProtocolError::BufferFull { requested: T::WIRE_SIZE, remaining });
        }

        let at = PacketHeader::SIZE + usize::from(self.cursor);
        value.write_be(&mut self.buffer[at..at + T::WIRE_SIZE]);
        self.advance(T::WIRE_SIZE as u16);
        Ok(())
    }

    /// Append scalars from `values`, swapping each element, until the buffer
    /// is full. Returns how many elements were written.
    pub fn write_array<T: WireValue>(&mut self, values: &[T]) -> usize {
        let fit = usize::from(self.bytes_remaining()) / T::WIRE_SIZE;
        let count = fit.min(values.len());
        for value in &values[..count] {
            let at = PacketHeader::SIZE + usize::from(self.cursor);
            value.write_be(&mut self.buffer[at..at + T::WIRE_SIZE]);
            self.advance(T::WIRE_SIZE as u16);
        }
        count
    }

    /// Append raw bytes with no endian handling. Returns how many bytes were
    /// written (short when the buffer fills).
    pub fn write_raw(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(usize::from(self.bytes_remaining()));
        let at = PacketHeader::SIZE + usize::from(self.cursor);
        self.buffer[at..at + count].copy_from_slice(&bytes[..count]);
        self.advance(count as u16);
        count
    }

    /// Compute and append the CRC, completing the packet.
    ///
    /// A no-op when already finalised. For [`packet_flag::NO_CRC`] packets
    /// this only marks completion.
    ///
    /// # Errors
    ///
    /// `ProtocolError::WriteFailed` when an earlier write overran the buffer.
    pub fn finalise(&mut self) -> Result<()> {
        if self.is_fail() {
            return Err(ProtocolError::WriteFailed);
        }
        if self.is_finalised() {
            return Ok(());
        }

        let end = PacketHeader::SIZE + usize::from(self.payload_size());
        if self.buffer[OFFSET_FLAGS] & packet_flag::NO_CRC == 0 {
            let crc = crate::crc::crc16(&self.buffer[..end]);
            self.buffer[end..end + PacketHeader::CRC_SIZE].copy_from_slice(&crc.to_be_bytes());
        }
        self.status |= STATUS_CRC_VALID;
        Ok(())
    }

    /// Full framed size: header, payload and CRC when present.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        PacketHeader::SIZE
            + usize::from(self.payload_size())
            + if self.buffer[OFFSET_FLAGS] & packet_flag::NO_CRC == 0 {
                PacketHeader::CRC_SIZE
            } else {
                0
            }
    }

    /// The framed packet bytes. Only complete once [`Self::finalise`] has
    /// succeeded.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.packet_size()]
    }

    fn advance(&mut self, by: u16) {
        self.cursor += by;
        if self.cursor > self.payload_size() {
            let size = self.cursor;
            self.set_header_u16(OFFSET_PAYLOAD_SIZE, size);
        }
        self.status &= !STATUS_CRC_VALID;
    }

    fn header_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.buffer[offset], self.buffer[offset + 1]])
    }

    fn set_header_u16(&mut self, offset: usize, value: u16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tiny_buffer() {
        let mut buffer = [0u8; 17];
        assert!(matches!(
            PacketWriter::new(&mut buffer, 1, 2),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn empty_packet_with_crc() {
        let mut buffer = [0u8; 32];
        let mut writer = PacketWriter::new(&mut buffer, 2, 1).unwrap();
        writer.finalise().unwrap();
        assert_eq!(writer.packet_size(), 18);

        let data = writer.data().to_vec();
        let crc = crate::crc::crc16(&data[..16]);
        assert_eq!(&data[16..18], crc.to_be_bytes());
    }

    #[test]
    fn overflow_latches_failure() {
        let mut buffer = [0u8; 20];
        let mut writer = PacketWriter::new(&mut buffer, 1, 1).unwrap();
        // Capacity is 2 payload bytes.
        writer.write(1u16).unwrap();
        assert!(matches!(writer.write(1u8), Err(ProtocolError::BufferFull { .. })));
        assert!(writer.is_fail());
        assert!(matches!(writer.finalise(), Err(ProtocolError::WriteFailed)));
    }

    #[test]
    fn array_write_is_short_not_failed() {
        let mut buffer = [0u8; 26];
        let mut writer = PacketWriter::new(&mut buffer, 1, 1).unwrap();
        // Capacity is 8 payload bytes: two u32 values of the four offered.
        let written = writer.write_array(&[1u32, 2, 3, 4]);
        assert_eq!(written, 2);
        assert!(!writer.is_fail());
        writer.finalise().unwrap();
    }

    #[test]
    fn seek_is_bounded() {
        let mut buffer = [0u8; 64];
        let mut writer = PacketWriter::new(&mut buffer, 1, 1).unwrap();
        writer.write(0u32).unwrap();
        assert!(writer.seek(SeekFrom::Start(5)).is_err());
        assert_eq!(writer.tell(), 4);
        writer.seek(SeekFrom::Start(0)).unwrap();
        // Overwriting does not shrink the payload.
        writer.write(9u16).unwrap();
        assert_eq!(writer.payload_size(), 4);
    }

    #[test]
    fn repeated_finalise_is_stable() {
        let mut buffer = [0u8; 64];
        let mut writer = PacketWriter::new(&mut buffer, 1, 1).unwrap();
        writer.write(0xABCDu16).unwrap();
        writer.finalise().unwrap();
        let first = writer.data().to_vec();
        writer.finalise().unwrap();
        assert_eq!(writer.data(), first);
    }
}
