//! Packet collation: wrap many framed packets in one outer packet,
//! optionally gzip deflated.
//!
//! Collation serves two roles. On the wire it amortises per-send overhead
//! and enables compression. Between producer threads it is the lock-free
//! staging buffer: each thread accumulates into its own collated packet and
//! hands the finalised buffer to the connection's send queue as one atomic
//! unit, which preserves message order within the frame.
//!
//! Compression is only used when it strictly shrinks the payload; otherwise
//! the raw concatenation is emitted. Inner packets keep their own headers
//! and CRCs, so the decoder re-verifies each one as it is extracted.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::errors::{ProtocolError, Result};
use crate::header::PacketHeader;
use crate::messages::{CollatedPacketMessage, RoutingId, collated_flag};
use crate::reader::PacketReader;
use crate::writer::PacketWriter;

/// Largest framed packet this implementation emits, collated or not.
pub const MAX_PACKET_SIZE: usize = 0xFFFF;

/// gzip compression presets, mapped onto deflate levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum CompressionLevel {
    /// Store only.
    None = 0,
    /// Fastest compression.
    Low = 1,
    /// Balanced speed and ratio. The default.
    #[default]
    Medium = 2,
    /// Favour ratio over speed.
    High = 3,
    /// Best ratio.
    VeryHigh = 4,
}

impl CompressionLevel {
    fn to_gzip(self) -> Compression {
        match self {
            Self::None => Compression::none(),
            Self::Low => Compression::new(1),
            Self::Medium => Compression::new(6),
            Self::High => Compression::new(7),
            Self::VeryHigh => Compression::new(9),
        }
    }
}

/// Accumulates finalised packets into a single collated packet.
///
/// `add` appends the raw bytes of already-finalised packets;
/// [`CollatedPacket::finalise`] wraps them in the outer header, compressing
/// when enabled and profitable. The finalised bytes are available from
/// [`CollatedPacket::data`] until [`CollatedPacket::reset`].
#[derive(Debug)]
pub struct CollatedPacket {
    buffer: Vec<u8>,
    final_packet: Vec<u8>,
    max_packet_size: usize,
    compress: bool,
    compression_level: CompressionLevel,
    finalised: bool,
}

impl CollatedPacket {
    /// Collation overhead: outer header, collation message and CRC.
    pub const OVERHEAD: usize =
        PacketHeader::SIZE + CollatedPacketMessage::SIZE + PacketHeader::CRC_SIZE;

    /// Create a collator. `compress` enables gzip at the default level.
    #[must_use]
    pub fn new(compress: bool) -> Self {
        Self::with_limit(compress, MAX_PACKET_SIZE)
    }

    /// Create a collator bounded by `max_packet_size` total framed bytes.
    #[must_use]
    pub fn with_limit(compress: bool, max_packet_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            final_packet: Vec::new(),
            max_packet_size: max_packet_size.min(MAX_PACKET_SIZE),
            compress,
            compression_level: CompressionLevel::default(),
            finalised: false,
        }
    }

    /// Set the gzip level used when compression is enabled.
    pub fn set_compression_level(&mut self, level: CompressionLevel) {
        self.compression_level = level;
    }

    /// The gzip level in use.
    #[must_use]
    pub fn compression_level(&self) -> CompressionLevel {
        self.compression_level
    }

    /// Whether compression is enabled.
    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.compress
    }

    /// Bytes collated so far (uncompressed).
    #[must_use]
    pub fn collated_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// The outer packet size ceiling.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Append the raw bytes of a finalised packet.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::AlreadyFinalised` after `finalise`
    /// - `ProtocolError::CollationOverflow` when the bytes cannot fit the
    ///   outer packet ceiling; the caller should flush and reset.
    pub fn add(&mut self, packet_bytes: &[u8]) -> Result<usize> {
        if self.finalised {
            return Err(ProtocolError::AlreadyFinalised);
        }
        if packet_bytes.is_empty() {
            return Ok(0);
        }
        let projected = self.buffer.len() + packet_bytes.len() + Self::OVERHEAD;
        if projected > self.max_packet_size {
            return Err(ProtocolError::CollationOverflow {
                size: projected,
                max: self.max_packet_size,
            });
        }
        self.buffer.extend_from_slice(packet_bytes);
        Ok(packet_bytes.len())
    }

    /// Append a finalised packet from its writer.
    ///
    /// # Errors
    ///
    /// As for [`CollatedPacket::add`], plus `ProtocolError::WriteFailed`
    /// when the writer was never successfully finalised.
    pub fn add_packet(&mut self, packet: &PacketWriter<'_>) -> Result<usize> {
        if !packet.is_finalised() {
            return Err(ProtocolError::WriteFailed);
        }
        self.add(packet.data())
    }

    /// Wrap the collated bytes in the outer packet. With compression
    /// enabled the deflated form is used only if strictly smaller than the
    /// raw payload. An empty collation finalises to an empty byte range.
    pub fn finalise(&mut self) -> Result<()> {
        if self.finalised {
            return Err(ProtocolError::AlreadyFinalised);
        }
        self.finalised = true;

        if self.buffer.is_empty() {
            self.final_packet.clear();
            return Ok(());
        }

        let mut body: &[u8] = &self.buffer;
        let mut flags = 0u16;
        let deflated;
        if self.compress && self.compression_level != CompressionLevel::None {
            let mut encoder =
                GzEncoder::new(Vec::new(), self.compression_level.to_gzip());
            encoder
                .write_all(&self.buffer)
                .map_err(|e| ProtocolError::DeflateFailure(e.to_string()))?;
            deflated =
                encoder.finish().map_err(|e| ProtocolError::DeflateFailure(e.to_string()))?;
            if deflated.len() < self.buffer.len() {
                body = &deflated;
                flags |= collated_flag::COMPRESS;
            } else {
                tracing::debug!(
                    raw = self.buffer.len(),
                    deflated = deflated.len(),
                    "compression not profitable; sending raw"
                );
            }
        }

        let message = CollatedPacketMessage {
            flags,
            reserved: 0,
            uncompressed_bytes: self.buffer.len() as u32,
        };

        let mut framed =
            vec![0u8; PacketHeader::SIZE + CollatedPacketMessage::SIZE + body.len() + PacketHeader::CRC_SIZE];
        let mut writer =
            PacketWriter::new(&mut framed, RoutingId::CollatedPacket.to_u16(), 0)?;
        message.write(&mut writer)?;
        if writer.write_raw(body) != body.len() {
            return Err(ProtocolError::BufferFull { requested: body.len(), remaining: 0 });
        }
        writer.finalise()?;
        let size = writer.packet_size();
        framed.truncate(size);
        self.final_packet = framed;
        Ok(())
    }

    /// The finalised outer packet bytes. Empty until [`Self::finalise`], and
    /// empty for a collation that held no packets.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        if self.finalised { &self.final_packet } else { &[] }
    }

    /// Discard all collated and finalised bytes, ready to collate again.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.final_packet.clear();
        self.finalised = false;
    }
}

/// Expands a collated packet back into its inner packets.
///
/// A non-collated packet passes through as a single item, so callers can
/// feed every incoming packet to the decoder unconditionally.
#[derive(Debug, Default)]
pub struct CollatedPacketDecoder {
    inner: Vec<u8>,
    cursor: usize,
}

impl CollatedPacketDecoder {
    /// Create an idle decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether packets remain to be drained.
    #[must_use]
    pub fn decoding(&self) -> bool {
        self.cursor < self.inner.len()
    }

    /// Load a packet for expansion, replacing any previous state.
    ///
    /// For a collated packet the payload is inflated (or copied) up front
    /// and verified against the `uncompressed_bytes` declaration. Any other
    /// packet is queued to pass through unchanged.
    ///
    /// # Errors
    ///
    /// - framing errors from [`PacketReader::new`]
    /// - `ProtocolError::InflateFailure` when the gzip stream is invalid
    /// - `ProtocolError::SizeMismatch` when the decoded byte count differs
    ///   from the collation header
    pub fn set_packet(&mut self, packet_bytes: &[u8]) -> Result<()> {
        let mut reader = PacketReader::new(packet_bytes)?;
        self.cursor = 0;

        if reader.routing_id() != RoutingId::CollatedPacket.to_u16() {
            self.inner = packet_bytes[..reader.packet_size()].to_vec();
            return Ok(());
        }

        reader.check_crc()?;
        let message = CollatedPacketMessage::read(&mut reader)?;
        let body = &reader.payload()[usize::from(reader.tell())..];

        if message.flags & collated_flag::COMPRESS != 0 {
            let mut decoder = GzDecoder::new(body);
            let mut inflated = Vec::with_capacity(message.uncompressed_bytes as usize);
            decoder
                .read_to_end(&mut inflated)
                .map_err(|e| ProtocolError::InflateFailure(e.to_string()))?;
            if inflated.len() != message.uncompressed_bytes as usize {
                return Err(ProtocolError::SizeMismatch {
                    declared: message.uncompressed_bytes,
                    actual: inflated.len() as u32,
                });
            }
            self.inner = inflated;
        } else {
            if body.len() != message.uncompressed_bytes as usize {
                return Err(ProtocolError::SizeMismatch {
                    declared: message.uncompressed_bytes,
                    actual: body.len() as u32,
                });
            }
            self.inner = body.to_vec();
        }
        Ok(())
    }

    /// Extract the next inner packet, verifying its framing and CRC.
    ///
    /// Returns `None` once the collation is drained.
    pub fn next_packet(&mut self) -> Result<Option<Bytes>> {
        if self.cursor >= self.inner.len() {
            return Ok(None);
        }
        let remainder = &self.inner[self.cursor..];
        let reader = PacketReader::new(remainder)?;
        reader.check_crc()?;
        let size = reader.packet_size();
        let packet = Bytes::copy_from_slice(&remainder[..size]);
        self.cursor += size;
        Ok(Some(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ControlId, ControlMessage};

    fn control_packet(value32: u32, payload_pad: usize) -> Vec<u8> {
        let mut raw = vec![0u8; 1024];
        let mut writer = PacketWriter::new(
            &mut raw,
            RoutingId::Control.to_u16(),
            ControlId::Frame.to_u16(),
        )
        .unwrap();
        ControlMessage { flags: 0, value32, value64: 0 }.write(&mut writer).unwrap();
        let pad = vec![0xA5u8; payload_pad];
        assert_eq!(writer.write_raw(&pad), payload_pad);
        writer.finalise().unwrap();
        writer.data().to_vec()
    }

    fn drain(decoder: &mut CollatedPacketDecoder) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(packet) = decoder.next_packet().unwrap() {
            out.push(packet);
        }
        out
    }

    #[test]
    fn uncompressed_round_trip_preserves_order() {
        let packets: Vec<Vec<u8>> =
            (0..3).map(|i| control_packet(i, 10 * i as usize)).collect();

        let mut collator = CollatedPacket::new(false);
        for packet in &packets {
            collator.add(packet).unwrap();
        }
        let total: usize = packets.iter().map(Vec::len).sum();
        assert_eq!(collator.collated_bytes(), total);
        collator.finalise().unwrap();

        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(collator.data()).unwrap();
        let inner = drain(&mut decoder);
        assert_eq!(inner.len(), 3);
        for (got, expected) in inner.iter().zip(&packets) {
            assert_eq!(got.as_ref(), expected.as_slice());
        }
    }

    #[test]
    fn compressed_round_trip() {
        // Highly repetitive payloads so deflate always wins.
        let packets: Vec<Vec<u8>> = (0..3).map(|i| control_packet(i, 200)).collect();

        let mut collator = CollatedPacket::new(true);
        for packet in &packets {
            collator.add(packet).unwrap();
        }
        collator.finalise().unwrap();

        // The outer packet should carry the compress flag.
        let outer = collator.data().to_vec();
        let mut reader = PacketReader::new(&outer).unwrap();
        let message = CollatedPacketMessage::read(&mut reader).unwrap();
        assert_ne!(message.flags & collated_flag::COMPRESS, 0);

        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(&outer).unwrap();
        let inner = drain(&mut decoder);
        assert_eq!(inner.len(), 3);
        for (got, expected) in inner.iter().zip(&packets) {
            assert_eq!(got.as_ref(), expected.as_slice());
        }
    }

    #[test]
    fn incompressible_data_falls_back_to_raw() {
        // A single tiny packet deflates larger than it started.
        let packet = control_packet(1, 0);
        let mut collator = CollatedPacket::new(true);
        collator.add(&packet).unwrap();
        collator.finalise().unwrap();

        let outer = collator.data().to_vec();
        let mut reader = PacketReader::new(&outer).unwrap();
        let message = CollatedPacketMessage::read(&mut reader).unwrap();
        assert_eq!(message.flags & collated_flag::COMPRESS, 0);

        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(&outer).unwrap();
        assert_eq!(drain(&mut decoder).len(), 1);
    }

    #[test]
    fn overflow_rejected_at_add() {
        let mut collator = CollatedPacket::with_limit(false, 128);
        let packet = control_packet(0, 60);
        collator.add(&packet).unwrap();
        assert!(matches!(
            collator.add(&packet),
            Err(ProtocolError::CollationOverflow { .. })
        ));
        // The first packet still finalises cleanly.
        collator.finalise().unwrap();
        assert!(!collator.data().is_empty());
    }

    #[test]
    fn empty_collation_finalises_to_nothing() {
        let mut collator = CollatedPacket::new(false);
        collator.finalise().unwrap();
        assert!(collator.data().is_empty());
    }

    #[test]
    fn passthrough_for_plain_packets() {
        let packet = control_packet(9, 4);
        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(&packet).unwrap();
        let inner = drain(&mut decoder);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].as_ref(), packet.as_slice());
    }

    #[test]
    fn corrupt_inner_crc_stops_decode() {
        let good = control_packet(1, 0);
        let mut bad = control_packet(2, 0);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let mut collator = CollatedPacket::new(false);
        collator.add(&good).unwrap();
        collator.add(&bad).unwrap();
        collator.finalise().unwrap();

        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(collator.data()).unwrap();
        assert!(decoder.next_packet().unwrap().is_some());
        assert!(matches!(
            decoder.next_packet(),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }
}
