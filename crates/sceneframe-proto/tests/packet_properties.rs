//! Property-based tests for the packet codec.
//!
//! These verify the wire-level invariants for all inputs, not just
//! examples: encode/decode identity for framed packets, stream reassembly
//! with junk interleave, and collation order preservation.

use proptest::prelude::*;
use sceneframe_proto::{
    CollatedPacket, CollatedPacketDecoder, ControlId, ControlMessage, PacketBuffer, PacketReader,
    PacketWriter, RoutingId, crc16,
};

/// Build a finalised packet with an arbitrary raw payload.
fn build_packet(routing_id: u16, message_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; payload.len() + 64];
    let mut writer = PacketWriter::new(&mut buffer, routing_id, message_id).unwrap();
    assert_eq!(writer.write_raw(payload), payload.len());
    writer.finalise().unwrap();
    writer.data().to_vec()
}

proptest! {
    #[test]
    fn packet_round_trip(
        routing_id in 0u16..4096,
        message_id in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let bytes = build_packet(routing_id, message_id, &payload);
        prop_assert_eq!(bytes.len(), 16 + payload.len() + 2);

        let reader = PacketReader::new(&bytes).unwrap();
        reader.check_crc().unwrap();
        prop_assert_eq!(reader.routing_id(), routing_id);
        prop_assert_eq!(reader.message_id(), message_id);
        prop_assert_eq!(reader.payload(), payload.as_slice());

        // Re-encoding the decoded fields reproduces the bytes exactly.
        let rebuilt = build_packet(reader.routing_id(), reader.message_id(), reader.payload());
        prop_assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn stream_reader_recovers_packets_between_junk(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
        junk in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        // Junk must not contain the marker sequence for this property.
        prop_assume!(!junk.windows(4).any(|w| w == [0x03, 0xE5, 0x5E, 0x30]));

        let packets: Vec<Vec<u8>> = payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| build_packet(64 + i as u16, 1, payload))
            .collect();

        let mut buffer = PacketBuffer::new();
        buffer.add_bytes(&junk);
        for packet in &packets {
            buffer.add_bytes(packet);
            buffer.add_bytes(&junk);
        }

        for expected in &packets {
            let got = buffer.extract_packet().expect("packet lost in stream");
            prop_assert_eq!(got.as_ref(), expected.as_slice());
        }
    }

    #[test]
    fn collation_preserves_packets(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..12),
        compress in any::<bool>(),
    ) {
        let packets: Vec<Vec<u8>> =
            payloads.iter().map(|payload| build_packet(64, 1, payload)).collect();
        let total: usize = packets.iter().map(Vec::len).sum();
        prop_assume!(total + 26 <= 0xFFFF);

        let mut collator = CollatedPacket::new(compress);
        for packet in &packets {
            collator.add(packet).unwrap();
        }
        collator.finalise().unwrap();

        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(collator.data()).unwrap();
        for expected in &packets {
            let got = decoder.next_packet().unwrap().expect("inner packet lost");
            prop_assert_eq!(got.as_ref(), expected.as_slice());
        }
        prop_assert!(decoder.next_packet().unwrap().is_none());
    }
}

/// Spec scenario: a CONTROL/FRAME message with zero values, CRC enabled,
/// has a fixed 34-byte wire form.
#[test]
fn minimal_control_frame_layout() {
    let mut buffer = vec![0u8; 64];
    let mut writer = PacketWriter::new(
        &mut buffer,
        RoutingId::Control.to_u16(),
        ControlId::Frame.to_u16(),
    )
    .unwrap();
    ControlMessage::default().write(&mut writer).unwrap();
    writer.finalise().unwrap();
    let bytes = writer.data().to_vec();

    let mut expected = Vec::new();
    expected.extend_from_slice(&[0x03, 0xE5, 0x5E, 0x30]); // marker
    expected.extend_from_slice(&[0x00, 0x00]); // version major
    expected.extend_from_slice(&[0x00, 0x04]); // version minor
    expected.extend_from_slice(&[0x00, 0x02]); // routing: control
    expected.extend_from_slice(&[0x00, 0x01]); // message: frame
    expected.extend_from_slice(&[0x00, 0x10]); // payload size: 16
    expected.push(0x00); // payload offset
    expected.push(0x00); // flags
    expected.extend_from_slice(&[0x00; 16]); // flags + value32 + value64
    let crc = crc16(&expected);
    expected.extend_from_slice(&crc.to_be_bytes());

    assert_eq!(hex::encode(&bytes), hex::encode(&expected));

    // Decode reproduces the input.
    let mut reader = PacketReader::new(&bytes).unwrap();
    reader.check_crc().unwrap();
    let message = ControlMessage::read(&mut reader).unwrap();
    assert_eq!(message, ControlMessage::default());
}
