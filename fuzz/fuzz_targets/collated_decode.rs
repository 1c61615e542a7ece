//! Fuzz target for collated packet expansion.
//!
//! # Strategy
//!
//! Arbitrary bytes as the outer packet: malformed framing, corrupt gzip
//! streams, lying `uncompressed_bytes` declarations, truncated inners.
//!
//! # Invariants
//!
//! - NEVER panic on malformed collations
//! - inner packets that decode re-validate individually
//! - decode terminates (bounded by the declared byte count)

#![no_main]

use libfuzzer_sys::fuzz_target;
use sceneframe_proto::{CollatedPacketDecoder, PacketReader};

fuzz_target!(|data: &[u8]| {
    let mut decoder = CollatedPacketDecoder::new();
    if decoder.set_packet(data).is_err() {
        return;
    }
    loop {
        match decoder.next_packet() {
            Ok(Some(packet)) => {
                let reader = PacketReader::new(&packet).expect("inner packet must re-validate");
                assert!(reader.check_crc().is_ok());
            }
            Ok(None) | Err(_) => break,
        }
    }
});
