//! The server: owns the viewer connections and broadcasts the shape
//! stream to all of them.
//!
//! The server itself implements [`Connection`], fanning every operation
//! out across its live connections, so instrumentation code targets one
//! sink whether zero, one or many viewers are attached.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use sceneframe_core::connection::Connection;
use sceneframe_core::errors::Result as CoreResult;
use sceneframe_core::resource::Resource;
use sceneframe_core::shapes::Shape;
use sceneframe_proto::ServerInfo;

use crate::connection::TcpConnection;
use crate::errors::Result;
use crate::monitor::ConnectionMonitor;
use crate::settings::ServerSettings;

/// A sceneframe server streaming to zero or more viewers.
pub struct TcpServer {
    settings: ServerSettings,
    info: Arc<Mutex<ServerInfo>>,
    connections: Mutex<Vec<Arc<TcpConnection>>>,
    monitor: Arc<ConnectionMonitor>,
    active: std::sync::atomic::AtomicBool,
    frame_number: AtomicU32,
}

impl TcpServer {
    /// Create a server and bind its connection monitor.
    ///
    /// `server_info` describes the server to connecting clients; `None`
    /// uses the defaults.
    pub fn new(settings: ServerSettings, server_info: Option<ServerInfo>) -> Result<Arc<Self>> {
        let info = Arc::new(Mutex::new(server_info.unwrap_or_default()));
        let monitor = Arc::new(ConnectionMonitor::bind(settings, Arc::clone(&info))?);
        Ok(Arc::new(Self {
            settings,
            info,
            connections: Mutex::new(Vec::new()),
            monitor,
            active: std::sync::atomic::AtomicBool::new(true),
            frame_number: AtomicU32::new(0),
        }))
    }

    /// The flags the server was created with.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.settings.flags
    }

    /// The connection monitor for this server.
    #[must_use]
    pub fn connection_monitor(&self) -> Arc<ConnectionMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Number of committed connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().map(|connections| connections.len()).unwrap_or(0)
    }

    /// The connection at `index`, when still present.
    #[must_use]
    pub fn connection(&self, index: usize) -> Option<Arc<TcpConnection>> {
        self.connections.lock().ok()?.get(index).cloned()
    }

    /// Frames completed since the server started.
    #[must_use]
    pub fn frame_number(&self) -> u32 {
        self.frame_number.load(Ordering::Acquire)
    }

    pub(crate) fn adopt_connection(&self, connection: Arc<TcpConnection>) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.push(connection);
        }
    }

    pub(crate) fn expire_connections(&self) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.retain(|connection| {
                let keep = connection.is_connected();
                if !keep {
                    tracing::info!(
                        peer = connection.address(),
                        port = connection.port(),
                        "viewer disconnected"
                    );
                }
                keep
            });
        }
    }

    fn snapshot(&self) -> Vec<Arc<TcpConnection>> {
        self.connections.lock().map(|connections| connections.clone()).unwrap_or_default()
    }

    /// Fan an operation across all connections, accumulating bytes sent.
    /// Individual connection failures are logged and skipped; the stream
    /// continues for the survivors.
    fn broadcast(
        &self,
        operation: impl Fn(&TcpConnection) -> CoreResult<usize>,
    ) -> CoreResult<usize> {
        let mut sent = 0usize;
        for connection in self.snapshot() {
            match operation(&connection) {
                Ok(bytes) => sent += bytes,
                Err(error) => {
                    tracing::warn!(
                        peer = connection.address(),
                        %error,
                        "connection dropped from broadcast"
                    );
                }
            }
        }
        Ok(sent)
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("port", &self.monitor.port())
            .field("connections", &self.connection_count())
            .field("frame", &self.frame_number())
            .finish()
    }
}

impl Connection for TcpServer {
    fn close(&self) {
        self.monitor.stop();
        self.monitor.join();
        for connection in self.snapshot() {
            connection.close();
        }
        if let Ok(mut connections) = self.connections.lock() {
            connections.clear();
        }
        self.active.store(false, Ordering::Release);
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn address(&self) -> String {
        "0.0.0.0".to_string()
    }

    fn port(&self) -> u16 {
        self.monitor.port()
    }

    fn is_connected(&self) -> bool {
        self.connection_count() > 0
    }

    fn create(&self, shape: &dyn Shape) -> CoreResult<usize> {
        if !self.active() {
            return Ok(0);
        }
        self.broadcast(|connection| connection.create(shape))
    }

    fn update(&self, shape: &dyn Shape) -> CoreResult<usize> {
        if !self.active() {
            return Ok(0);
        }
        self.broadcast(|connection| connection.update(shape))
    }

    fn destroy(&self, shape: &dyn Shape) -> CoreResult<usize> {
        if !self.active() {
            return Ok(0);
        }
        self.broadcast(|connection| connection.destroy(shape))
    }

    fn update_frame(&self, dt: f32, flush: bool) -> CoreResult<usize> {
        if !self.active() {
            return Ok(0);
        }
        let sent = self.broadcast(|connection| connection.update_frame(dt, flush))?;
        self.frame_number.fetch_add(1, Ordering::AcqRel);
        Ok(sent)
    }

    fn update_transfers(&self, byte_limit: u32) -> CoreResult<usize> {
        if !self.active() {
            return Ok(0);
        }
        self.broadcast(|connection| connection.update_transfers(byte_limit))
    }

    fn reference_resource(&self, resource: &Arc<dyn Resource>) -> usize {
        let mut max_references = 0;
        for connection in self.snapshot() {
            max_references = max_references.max(connection.reference_resource(resource));
        }
        max_references
    }

    fn release_resource(&self, resource: &Arc<dyn Resource>) -> usize {
        let mut max_references = 0;
        for connection in self.snapshot() {
            max_references = max_references.max(connection.release_resource(resource));
        }
        max_references
    }

    fn send_server_info(&self, info: &ServerInfo) -> CoreResult<usize> {
        if let Ok(mut held) = self.info.lock() {
            *held = *info;
        }
        self.broadcast(|connection| connection.send_server_info(info))
    }

    fn send(&self, packet_bytes: &[u8], allow_collation: bool) -> CoreResult<usize> {
        if !self.active() {
            return Ok(0);
        }
        self.broadcast(|connection| connection.send(packet_bytes, allow_collation))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpStream;
    use std::time::Duration;

    use super::*;
    use crate::monitor::ConnectionMode;
    use crate::settings::server_flag;
    use sceneframe_core::shapes::Sphere;
    use sceneframe_proto::{PacketBuffer, PacketReader, RoutingId};

    fn test_server(flags: u32) -> Arc<TcpServer> {
        let settings = ServerSettings {
            listen_port: 0,
            flags,
            ..ServerSettings::default()
        };
        TcpServer::new(settings, None).unwrap()
    }

    fn read_packets(stream: &mut TcpStream, minimum: usize) -> Vec<Vec<u8>> {
        stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut buffer = PacketBuffer::new();
        let mut packets = Vec::new();
        let mut chunk = [0u8; 2048];
        while packets.len() < minimum {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => buffer.add_bytes(&chunk[..read]),
                Err(_) => break,
            }
            while let Some(packet) = buffer.extract_packet() {
                packets.push(packet.to_vec());
            }
        }
        packets
    }

    #[test]
    fn client_receives_server_info_first() {
        let server = test_server(server_flag::DEFAULT);
        let monitor = server.connection_monitor();
        assert!(monitor.start(ConnectionMode::Synchronous));

        let mut client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();

        // Pump the monitor until the connection stages, then commit.
        let mut committed = 0;
        for _ in 0..100 {
            monitor.monitor_connections();
            monitor.commit_connections(&server, |_| committed += 1);
            if committed > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(committed, 1);
        assert_eq!(server.connection_count(), 1);

        let packets = read_packets(&mut client, 1);
        let reader = PacketReader::new(&packets[0]).unwrap();
        reader.check_crc().unwrap();
        assert_eq!(reader.routing_id(), RoutingId::ServerInfo.to_u16());

        server.close();
    }

    #[test]
    fn frame_update_flushes_shape_messages() {
        let server = test_server(server_flag::DEFAULT);
        let monitor = server.connection_monitor();
        monitor.start(ConnectionMode::Synchronous);

        let mut client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        for _ in 0..100 {
            monitor.monitor_connections();
            monitor.commit_connections(&server, |_| {});
            if server.connection_count() > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let sphere = Sphere::new(3);
        server.create(&sphere).unwrap();
        server.update_frame(0.0, true).unwrap();
        assert_eq!(server.frame_number(), 1);

        // Server info, collated shape packet, naked frame message.
        let packets = read_packets(&mut client, 3);
        assert!(packets.len() >= 3);
        let last = PacketReader::new(&packets[packets.len() - 1]).unwrap();
        assert_eq!(last.routing_id(), RoutingId::Control.to_u16());

        server.close();
    }
}
