//! Server flags and construction settings.

use sceneframe_proto::CompressionLevel;

/// Server option flags.
pub mod server_flag {
    /// Emit frame control messages uncollated and uncompressed, so a
    /// consumer can use them as byte-level frame boundaries.
    pub const NAKED_FRAME_MESSAGE: u32 = 1 << 0;
    /// Collate outgoing messages into larger packets.
    pub const COLLATE: u32 = 1 << 1;
    /// Gzip-compress collated packets. No effect without [`COLLATE`].
    pub const COMPRESS: u32 = 1 << 2;

    /// Collation plus compression.
    pub const COLLATE_AND_COMPRESS: u32 = COLLATE | COMPRESS;
    /// Recommended defaults: collation with naked frame messages.
    pub const DEFAULT: u32 = NAKED_FRAME_MESSAGE | COLLATE;
}

/// Settings used to create a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// First port to try listening on.
    pub listen_port: u16,
    /// Additional ports to try when the first is taken.
    pub port_range: u16,
    /// [`server_flag`] values.
    pub flags: u32,
    /// Per-client packet buffer size.
    pub client_buffer_size: u16,
    /// Compression level for collated packets when enabled.
    pub compression_level: CompressionLevel,
    /// Milliseconds to wait for the asynchronous monitor to start.
    pub async_timeout_ms: u32,
}

impl ServerSettings {
    /// Default server port.
    pub const DEFAULT_PORT: u16 = 33500;

    /// Default per-client buffer size.
    pub const DEFAULT_BUFFER_SIZE: u16 = 0xFFE0;
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_port: Self::DEFAULT_PORT,
            port_range: 0,
            flags: server_flag::DEFAULT,
            client_buffer_size: Self::DEFAULT_BUFFER_SIZE,
            compression_level: CompressionLevel::default(),
            async_timeout_ms: 5000,
        }
    }
}
