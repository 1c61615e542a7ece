//! Packet reassembly from a byte-oriented ordered source.
//!
//! [`PacketBuffer`] accumulates raw bytes and yields whole framed packets,
//! re-synchronising on the packet marker after junk or corruption.
//! [`PacketStreamReader`] drives a `Read` source (file or socket) through a
//! `PacketBuffer`, with seek support for recorded streams.

use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::errors::{ProtocolError, StreamError};
use crate::header::{PACKET_MARKER, PacketHeader};

/// How much to read from the underlying source per refill.
const READ_CHUNK: usize = 2048;

/// Growable reassembly buffer that locates framed packets in a byte stream.
///
/// Feed arbitrary chunks with [`PacketBuffer::add_bytes`] and drain complete
/// frames with [`PacketBuffer::extract_packet`]. Bytes preceding a marker
/// are discarded; a frame whose header fails validation is skipped one byte
/// at a time until the next marker, so a corrupted stream re-synchronises
/// instead of stalling.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buffer: Vec<u8>,
}

impl PacketBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered bytes (e.g. after a source seek).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append raw bytes from the source.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extract the next complete framed packet, or `None` when more bytes
    /// are needed.
    pub fn extract_packet(&mut self) -> Option<Bytes> {
        loop {
            self.discard_to_marker();
            if self.buffer.len() < PacketHeader::SIZE {
                return None;
            }

            let header = match PacketHeader::validated_from(&self.buffer) {
                Ok(header) => header,
                Err(ProtocolError::Truncated { .. }) => return None,
                Err(error) => {
                    // Bad header behind a genuine marker; resynchronise one
                    // byte on.
                    tracing::warn!(%error, "skipping invalid packet header");
                    self.buffer.drain(..1);
                    continue;
                }
            };

            let packet_size = header.packet_size();
            if self.buffer.len() < packet_size {
                return None;
            }

            let packet = Bytes::copy_from_slice(&self.buffer[..packet_size]);
            self.buffer.drain(..packet_size);
            return Some(packet);
        }
    }

    /// Discard bytes preceding the next marker, scanning byte-aligned. Up to
    /// three trailing bytes are retained in case a marker straddles the next
    /// chunk boundary.
    fn discard_to_marker(&mut self) {
        let marker = PACKET_MARKER.to_be_bytes();
        let mut at = 0;
        while at + 4 <= self.buffer.len() {
            if self.buffer[at..at + 4] == marker {
                break;
            }
            at += 1;
        }
        if at + 4 > self.buffer.len() {
            at = self.buffer.len().saturating_sub(3).max(at);
        }
        if at > 0 {
            self.buffer.drain(..at);
        }
    }
}

/// Pulls framed packets out of a `Read` source.
#[derive(Debug)]
pub struct PacketStreamReader<R> {
    source: R,
    buffer: PacketBuffer,
    eof: bool,
}

impl<R: Read> PacketStreamReader<R> {
    /// Wrap `source` for packet extraction.
    pub fn new(source: R) -> Self {
        Self { source, buffer: PacketBuffer::new(), eof: false }
    }

    /// Whether the source is exhausted and the buffer drained.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof && self.buffer.is_empty()
    }

    /// Consume the reader, returning the source.
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Read the next complete packet, refilling from the source as needed.
    /// Returns `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// `StreamError::Io` when the source fails.
    pub fn next_packet(&mut self) -> Result<Option<Bytes>, StreamError> {
        loop {
            if let Some(packet) = self.buffer.extract_packet() {
                return Ok(Some(packet));
            }
            if self.eof {
                return Ok(None);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let read = self.source.read(&mut chunk)?;
            if read == 0 {
                self.eof = true;
            } else {
                self.buffer.add_bytes(&chunk[..read]);
            }
        }
    }
}

impl<R: Read + Seek> PacketStreamReader<R> {
    /// Reposition the source to an absolute byte offset, dropping buffered
    /// bytes. The next extraction scans for a marker from there.
    pub fn seek_to(&mut self, position: u64) -> Result<u64, StreamError> {
        let at = self.source.seek(SeekFrom::Start(position))?;
        self.buffer.clear();
        self.eof = false;
        Ok(at)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::messages::{ControlId, ControlMessage, RoutingId};
    use crate::writer::PacketWriter;

    fn frame_packet(value32: u32) -> Vec<u8> {
        let mut raw = vec![0u8; 256];
        let mut writer = PacketWriter::new(
            &mut raw,
            RoutingId::Control.to_u16(),
            ControlId::Frame.to_u16(),
        )
        .unwrap();
        ControlMessage { flags: 0, value32, value64: 0 }.write(&mut writer).unwrap();
        writer.finalise().unwrap();
        writer.data().to_vec()
    }

    #[test]
    fn extracts_packets_in_order() {
        let mut buffer = PacketBuffer::new();
        for i in 0..4 {
            buffer.add_bytes(&frame_packet(i));
        }
        for i in 0..4 {
            let packet = buffer.extract_packet().unwrap();
            let mut reader = crate::PacketReader::new(&packet).unwrap();
            let message = ControlMessage::read(&mut reader).unwrap();
            assert_eq!(message.value32, i);
        }
        assert!(buffer.extract_packet().is_none());
    }

    #[test]
    fn skips_leading_junk() {
        let mut buffer = PacketBuffer::new();
        buffer.add_bytes(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00]);
        buffer.add_bytes(&frame_packet(7));
        let packet = buffer.extract_packet().unwrap();
        let mut reader = crate::PacketReader::new(&packet).unwrap();
        assert_eq!(ControlMessage::read(&mut reader).unwrap().value32, 7);
    }

    #[test]
    fn marker_split_across_chunks() {
        let packet = frame_packet(3);
        let mut buffer = PacketBuffer::new();
        buffer.add_bytes(&[0x99]);
        buffer.add_bytes(&packet[..2]);
        assert!(buffer.extract_packet().is_none());
        buffer.add_bytes(&packet[2..]);
        assert!(buffer.extract_packet().is_some());
    }

    #[test]
    fn resynchronises_after_bad_header() {
        let mut corrupted = frame_packet(1);
        // Invalidate the version so header validation fails while the
        // marker still matches.
        corrupted[6] = 0xFF;
        corrupted[7] = 0xFF;

        let mut buffer = PacketBuffer::new();
        buffer.add_bytes(&corrupted);
        buffer.add_bytes(&frame_packet(2));
        let packet = buffer.extract_packet().unwrap();
        let mut reader = crate::PacketReader::new(&packet).unwrap();
        assert_eq!(ControlMessage::read(&mut reader).unwrap().value32, 2);
    }

    #[test]
    fn stream_reader_walks_a_recording() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0x01, 0x02]); // leading junk
        for i in 0..3 {
            stream.extend_from_slice(&frame_packet(i));
        }

        let mut reader = PacketStreamReader::new(Cursor::new(stream));
        for _ in 0..3 {
            assert!(reader.next_packet().unwrap().is_some());
        }
        assert!(reader.next_packet().unwrap().is_none());
        assert!(reader.is_eof());
    }

    #[test]
    fn stream_reader_seeks() {
        let packet = frame_packet(5);
        let mut stream = Vec::new();
        stream.extend_from_slice(&packet);
        stream.extend_from_slice(&frame_packet(6));

        let mut reader = PacketStreamReader::new(Cursor::new(stream));
        let _ = reader.next_packet().unwrap().unwrap();
        reader.seek_to(0).unwrap();
        let replayed = reader.next_packet().unwrap().unwrap();
        assert_eq!(replayed.as_ref(), packet.as_slice());
    }
}
