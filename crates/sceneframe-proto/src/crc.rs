//! Packet checksum.
//!
//! Every framed packet may carry a trailing 16-bit CRC calculated over the
//! header and payload bytes. The algorithm is CRC-16/IBM-3740 (poly 0x1021,
//! init 0xFFFF) - the CCITT variant shared with the other end of the wire.

use crc::{CRC_16_IBM_3740, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Calculate the packet CRC over `bytes` (header plus payload).
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}
