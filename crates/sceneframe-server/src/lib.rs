//! TCP server core for the sceneframe visualisation stream.
//!
//! Instrumented hosts create a [`TcpServer`], start its
//! [`ConnectionMonitor`] (synchronously pumped or on a background thread)
//! and then treat the server as a single
//! [`sceneframe_core::Connection`]: every create/update/destroy/frame
//! call broadcasts to all committed viewers, with per-connection collation
//! and optional compression handled underneath.

pub mod connection;
pub mod errors;
pub mod monitor;
pub mod server;
pub mod settings;

pub use connection::TcpConnection;
pub use errors::ServerError;
pub use monitor::{ConnectionMode, ConnectionMonitor};
pub use server::TcpServer;
pub use settings::{ServerSettings, server_flag};
