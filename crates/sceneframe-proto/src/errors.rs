//! Error types for the wire codec.
//!
//! Codec failures never panic and never cross a message boundary: each decode
//! returns a `Result` and the caller isolates the offending packet (framing
//! failures drop the reader back to marker search; integrity failures on a
//! collated packet discard the whole outer packet).

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised by packet framing, collation and data-stream codecs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Packet bytes did not start with the framing marker.
    #[error("invalid packet marker: {found:#010x}")]
    InvalidMarker {
        /// The four bytes found where the marker was expected.
        found: u32,
    },

    /// Protocol version outside the accepted window (0.3 to 0.x).
    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version from the header.
        major: u16,
        /// Minor version from the header.
        minor: u16,
    },

    /// The current protocol always writes a zero payload offset.
    #[error("non-zero payload offset: {offset}")]
    NonZeroPayloadOffset {
        /// Offset value found in the header.
        offset: u8,
    },

    /// Fewer bytes available than the operation requires.
    #[error("truncated packet data: expected {expected} bytes, have {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Trailing CRC did not match the header and payload bytes.
    #[error("crc mismatch: packet carries {found:#06x}, calculated {calculated:#06x}")]
    CrcMismatch {
        /// CRC carried by the packet.
        found: u16,
        /// CRC calculated over header and payload.
        calculated: u16,
    },

    /// A scalar write would overrun the payload capacity.
    #[error("packet buffer full: {requested} bytes requested, {remaining} remaining")]
    BufferFull {
        /// Bytes the write required.
        requested: usize,
        /// Bytes left in the payload buffer.
        remaining: usize,
    },

    /// Seek target outside `[0, payload_size]`.
    #[error("seek out of range: offset {offset} with payload size {payload_size}")]
    InvalidSeek {
        /// Requested absolute offset.
        offset: i64,
        /// Current payload size bounding the seek.
        payload_size: u16,
    },

    /// Adding the bytes would exceed the collated packet size ceiling.
    #[error("collation overflow: {size} bytes exceeds limit of {max}")]
    CollationOverflow {
        /// Total bytes the collation would reach.
        size: usize,
        /// Maximum outer packet size.
        max: usize,
    },

    /// Operation on a packet that has already been finalised.
    #[error("packet already finalised")]
    AlreadyFinalised,

    /// An earlier write overran the buffer; the packet is incomplete.
    #[error("packet write failed; packet is incomplete")]
    WriteFailed,

    /// Gzip inflate of a collated payload failed.
    #[error("inflate failure: {0}")]
    InflateFailure(String),

    /// Gzip deflate of a collated payload failed.
    #[error("deflate failure: {0}")]
    DeflateFailure(String),

    /// Decoded byte count disagrees with the collation header.
    #[error("collated size mismatch: header declares {declared} bytes, decoded {actual}")]
    SizeMismatch {
        /// Byte count from the collation header.
        declared: u32,
        /// Byte count actually decoded.
        actual: u32,
    },

    /// Element type id not in the data stream type enumeration.
    #[error("unknown element type: {value}")]
    UnknownElementType {
        /// The raw type id.
        value: u16,
    },

    /// Element type or component count unsuitable for the component.
    #[error("bad {component} component data")]
    BadComponentType {
        /// Name of the offending mesh component.
        component: &'static str,
    },

    /// Packed encoding requested on a non-float buffer.
    #[error("packed encoding requires a float buffer")]
    PackedTypeUnsupported,

    /// Quantisation unit must be a positive, finite value.
    #[error("invalid quantisation unit: {unit}")]
    InvalidQuantisationUnit {
        /// The rejected unit.
        unit: f64,
    },

    /// A value cannot be represented in the packed integer range.
    #[error("quantisation overflow: {value} with unit {unit}")]
    QuantisationOverflow {
        /// The unrepresentable value.
        value: f64,
        /// Quantisation unit in use.
        unit: f64,
    },

    /// Read or write offset beyond the buffer element count.
    #[error("offset {offset} out of range for {count} elements")]
    OffsetOutOfRange {
        /// Requested element offset.
        offset: u32,
        /// Elements in the buffer.
        count: u32,
    },

    /// A string field did not contain valid UTF-8.
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
}

/// Errors raised when pulling packets out of a byte-oriented source.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Underlying source failed.
    #[error("stream i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or integrity failure in the extracted bytes.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
