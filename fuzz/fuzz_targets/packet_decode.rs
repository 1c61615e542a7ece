//! Fuzz target for raw packet decode.
//!
//! # Strategy
//!
//! Arbitrary bytes through `PacketReader::new` and, when framing passes,
//! CRC verification and full payload reads.
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - a reader that constructs stays within its declared packet size
//! - payload reads past the end return errors, not garbage

#![no_main]

use libfuzzer_sys::fuzz_target;
use sceneframe_proto::PacketReader;

fuzz_target!(|data: &[u8]| {
    let Ok(mut reader) = PacketReader::new(data) else {
        return;
    };
    let _ = reader.check_crc();
    assert!(reader.packet_size() <= data.len());

    let mut sink = vec![0u8; reader.payload_size() as usize];
    let read = reader.read_raw(&mut sink);
    assert_eq!(read, sink.len());
    assert!(reader.read::<u8>().is_err());
});
