//! Recording stream layout.
//!
//! A recording is a plain concatenation of framed packets. It begins with a
//! ServerInfo packet and a FrameCount control placeholder, both CRC-enabled
//! and therefore of fixed size; the finaliser relies on that to overwrite
//! them in place once the true frame count is known. This lets recordings
//! begin before their length is known.

use std::io::{Read, Seek, SeekFrom, Write};

use sceneframe_proto::{
    ControlId, ControlMessage, PACKET_MARKER, PacketHeader, PacketWriter, RoutingId, ServerInfo,
};

use crate::errors::{CoreError, Result};

/// Bytes of stream head scanned for the preamble packets.
const PREAMBLE_SCAN_BYTES: usize = 4096;

/// Packets inspected before giving up the preamble search.
const PREAMBLE_SCAN_PACKETS: usize = 5;

/// Write the recording preamble: the server info (when given) followed by a
/// zero frame-count placeholder. Both packets carry CRCs so the finaliser
/// can rewrite them at fixed size.
pub fn initialise_stream<W: Write>(out: &mut W, server_info: Option<&ServerInfo>) -> Result<()> {
    let mut scratch = [0u8; 256];

    if let Some(info) = server_info {
        let mut packet = PacketWriter::new(&mut scratch, RoutingId::ServerInfo.to_u16(), 0)?;
        info.write(&mut packet)?;
        packet.finalise()?;
        out.write_all(packet.data())?;
    }

    let mut packet = PacketWriter::new(
        &mut scratch,
        RoutingId::Control.to_u16(),
        ControlId::FrameCount.to_u16(),
    )?;
    ControlMessage::default().write(&mut packet)?;
    packet.finalise()?;
    out.write_all(packet.data())?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct PreamblePacket {
    position: u64,
    has_crc: bool,
}

/// Back-patch the recording preamble on close.
///
/// Scans the head of the stream (at most five packets) for the ServerInfo
/// and FrameCount packets, overwrites the frame count with `frame_count`
/// and the info with `server_info` when supplied, then restores the write
/// cursor.
///
/// # Errors
///
/// `CoreError::PreambleMissing` when no frame-count placeholder can be
/// located; the cursor is restored and the recording stays playable with a
/// frame count of zero.
pub fn finalise_stream<S: Read + Write + Seek>(
    stream: &mut S,
    frame_count: u32,
    server_info: Option<&ServerInfo>,
) -> Result<()> {
    let restore_to = stream.stream_position()?;

    let result = patch_preamble(stream, frame_count, server_info);
    stream.seek(SeekFrom::Start(restore_to))?;
    result
}

fn patch_preamble<S: Read + Write + Seek>(
    stream: &mut S,
    frame_count: u32,
    server_info: Option<&ServerInfo>,
) -> Result<()> {
    let (info_packet, count_packet) = scan_preamble(stream)?;

    let Some(count_packet) = count_packet else {
        return Err(CoreError::PreambleMissing);
    };

    let mut scratch = [0u8; 256];

    if let (Some(info), Some(at)) = (server_info, info_packet) {
        stream.seek(SeekFrom::Start(at.position))?;
        let mut packet = PacketWriter::new(&mut scratch, RoutingId::ServerInfo.to_u16(), 0)?;
        if !at.has_crc {
            packet.set_no_crc();
        }
        info.write(&mut packet)?;
        packet.finalise()?;
        stream.write_all(packet.data())?;
    }

    stream.seek(SeekFrom::Start(count_packet.position))?;
    let mut packet = PacketWriter::new(
        &mut scratch,
        RoutingId::Control.to_u16(),
        ControlId::FrameCount.to_u16(),
    )?;
    if !count_packet.has_crc {
        packet.set_no_crc();
    }
    ControlMessage { flags: 0, value32: frame_count, value64: 0 }.write(&mut packet)?;
    packet.finalise()?;
    stream.write_all(packet.data())?;
    stream.flush()?;
    Ok(())
}

/// Locate the first ServerInfo packet and the first FrameCount control in
/// the stream head. Returns byte positions relative to stream start.
fn scan_preamble<S: Read + Seek>(
    stream: &mut S,
) -> Result<(Option<PreamblePacket>, Option<PreamblePacket>)> {
    stream.seek(SeekFrom::Start(0))?;
    let mut head = vec![0u8; PREAMBLE_SCAN_BYTES];
    let mut filled = 0;
    loop {
        let read = stream.read(&mut head[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
        if filled == head.len() {
            break;
        }
    }
    head.truncate(filled);

    let marker = PACKET_MARKER.to_be_bytes();
    let mut info_packet = None;
    let mut count_packet = None;
    let mut at = 0usize;
    let mut packets_checked = 0usize;

    while packets_checked < PREAMBLE_SCAN_PACKETS
        && at + PacketHeader::SIZE <= head.len()
        && (info_packet.is_none() || count_packet.is_none())
    {
        if head[at..at + 4] != marker {
            at += 1;
            continue;
        }
        let Ok(header) = PacketHeader::validated_from(&head[at..]) else {
            at += 1;
            continue;
        };
        packets_checked += 1;

        let found = PreamblePacket { position: at as u64, has_crc: header.has_crc() };
        if header.routing_id() == RoutingId::ServerInfo.to_u16() && info_packet.is_none() {
            info_packet = Some(found);
        } else if header.routing_id() == RoutingId::Control.to_u16()
            && header.message_id() == ControlId::FrameCount.to_u16()
            && count_packet.is_none()
        {
            count_packet = Some(found);
        }
        at += header.packet_size();
    }

    Ok((info_packet, count_packet))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use sceneframe_proto::{CoordinateFrame, PacketStreamReader};

    fn frame_control_packet() -> Vec<u8> {
        let mut scratch = [0u8; 64];
        let mut packet = PacketWriter::new(
            &mut scratch,
            RoutingId::Control.to_u16(),
            ControlId::Frame.to_u16(),
        )
        .unwrap();
        ControlMessage::default().write(&mut packet).unwrap();
        packet.finalise().unwrap();
        packet.data().to_vec()
    }

    #[test]
    fn finalise_back_patches_frame_count() {
        let info = ServerInfo {
            time_unit: 1000,
            default_frame_time: 33,
            coordinate_frame: CoordinateFrame::Xyz,
        };
        let mut stream = Cursor::new(Vec::new());
        initialise_stream(&mut stream, Some(&info)).unwrap();
        for _ in 0..42 {
            let packet = frame_control_packet();
            stream.write_all(&packet).unwrap();
        }

        finalise_stream(&mut stream, 42, None).unwrap();

        // Replay: server info first, then the patched frame count.
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut reader = PacketStreamReader::new(&mut stream);

        let first = reader.next_packet().unwrap().unwrap();
        let mut packet = sceneframe_proto::PacketReader::new(&first).unwrap();
        packet.check_crc().unwrap();
        assert_eq!(packet.routing_id(), RoutingId::ServerInfo.to_u16());
        assert_eq!(ServerInfo::read(&mut packet).unwrap(), info);

        let second = reader.next_packet().unwrap().unwrap();
        let mut packet = sceneframe_proto::PacketReader::new(&second).unwrap();
        packet.check_crc().unwrap();
        assert_eq!(packet.message_id(), ControlId::FrameCount.to_u16());
        assert_eq!(ControlMessage::read(&mut packet).unwrap().value32, 42);

        // All 42 frame messages still follow.
        let mut frames = 0;
        while let Some(bytes) = reader.next_packet().unwrap() {
            let packet = sceneframe_proto::PacketReader::new(&bytes).unwrap();
            assert_eq!(packet.message_id(), ControlId::Frame.to_u16());
            frames += 1;
        }
        assert_eq!(frames, 42);
    }

    #[test]
    fn finalise_rewrites_server_info_when_supplied() {
        let mut stream = Cursor::new(Vec::new());
        initialise_stream(&mut stream, Some(&ServerInfo::default())).unwrap();

        let corrected = ServerInfo {
            time_unit: 500,
            default_frame_time: 16,
            coordinate_frame: CoordinateFrame::Xzy,
        };
        finalise_stream(&mut stream, 7, Some(&corrected)).unwrap();

        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut reader = PacketStreamReader::new(&mut stream);
        let first = reader.next_packet().unwrap().unwrap();
        let mut packet = sceneframe_proto::PacketReader::new(&first).unwrap();
        assert_eq!(ServerInfo::read(&mut packet).unwrap(), corrected);
    }

    #[test]
    fn finalise_without_preamble_reports_failure() {
        let mut stream = Cursor::new(Vec::new());
        stream.write_all(&frame_control_packet()).unwrap();
        let end = stream.stream_position().unwrap();

        let result = finalise_stream(&mut stream, 3, None);
        assert!(matches!(result, Err(CoreError::PreambleMissing)));
        // Cursor restored; the recording remains appendable.
        assert_eq!(stream.stream_position().unwrap(), end);
    }
}
