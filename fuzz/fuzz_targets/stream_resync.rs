//! Fuzz target for stream reassembly.
//!
//! # Strategy
//!
//! Arbitrary bytes split into arbitrary chunk sizes fed through a
//! `PacketBuffer`, draining extracted packets as they appear.
//!
//! # Invariants
//!
//! - NEVER panic regardless of chunking or content
//! - every extracted packet re-validates through `PacketReader`
//! - extraction terminates (no infinite resync loops)

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sceneframe_proto::{PacketBuffer, PacketReader};

#[derive(Debug, Arbitrary)]
struct Input {
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let mut buffer = PacketBuffer::new();
    for chunk in &input.chunks {
        buffer.add_bytes(chunk);
        while let Some(packet) = buffer.extract_packet() {
            let reader = PacketReader::new(&packet).expect("extracted packet must re-validate");
            assert_eq!(reader.packet_size(), packet.len());
        }
    }
});
