//! Connection monitoring: listening, accepting and committing new viewers.
//!
//! The monitor runs either synchronously (the caller pumps
//! [`ConnectionMonitor::monitor_connections`] each frame) or asynchronously
//! on a background thread. Either way, activation is two-phase: accepted
//! connections receive the server info immediately but only join the
//! server's broadcast set at [`ConnectionMonitor::commit_connections`],
//! called from the owning thread, which also reports them through the
//! connection-established callback.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use sceneframe_core::connection::Connection as _;
use sceneframe_proto::ServerInfo;

use crate::connection::TcpConnection;
use crate::errors::{Result, ServerError};
use crate::server::TcpServer;
use crate::settings::ServerSettings;

/// How the monitor is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Not running.
    #[default]
    None,
    /// The caller pumps [`ConnectionMonitor::monitor_connections`].
    Synchronous,
    /// A background thread accepts connections.
    Asynchronous,
}

/// Accept-loop poll interval for the asynchronous mode.
const ASYNC_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// State shared with the asynchronous accept thread.
struct MonitorInner {
    listener: TcpListener,
    port: u16,
    settings: ServerSettings,
    info: Arc<Mutex<ServerInfo>>,
    pending: Mutex<Vec<Arc<TcpConnection>>>,
    pending_signal: Condvar,
    mode: Mutex<ConnectionMode>,
    running: AtomicBool,
}

impl MonitorInner {
    fn monitor_connections(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "viewer connected");
                    self.stage(stream);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    break;
                }
            }
        }
    }

    fn stage(&self, stream: TcpStream) {
        let connection = match TcpConnection::new(stream, &self.settings) {
            Ok(connection) => Arc::new(connection),
            Err(error) => {
                tracing::warn!(%error, "rejecting connection");
                return;
            }
        };

        // First bytes on every new stream: the server configuration.
        let info = self.info.lock().map(|info| *info).unwrap_or_default();
        if let Err(error) = connection.send_server_info(&info) {
            tracing::warn!(%error, "server info send failed; dropping connection");
            return;
        }

        if let Ok(mut pending) = self.pending.lock() {
            pending.push(connection);
            self.pending_signal.notify_all();
        }
    }
}

/// Listens for and stages viewer connections for a [`TcpServer`].
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Bind a listener per `settings`, trying each port in the configured
    /// range.
    pub(crate) fn bind(settings: ServerSettings, info: Arc<Mutex<ServerInfo>>) -> Result<Self> {
        let first = settings.listen_port;
        let last = settings.listen_port.saturating_add(settings.port_range);
        let mut bound = None;
        for port in first..=last {
            match TcpListener::bind(("0.0.0.0", port)) {
                Ok(listener) => {
                    bound = Some((listener, port));
                    break;
                }
                Err(error) => {
                    tracing::debug!(port, %error, "listen failed; trying next port");
                }
            }
        }
        let Some((listener, requested)) = bound else {
            return Err(ServerError::NoPortAvailable { first, last });
        };
        // Resolve the real port when an ephemeral one was requested.
        let port = listener.local_addr().map(|addr| addr.port()).unwrap_or(requested);
        listener.set_nonblocking(true)?;
        tracing::info!(port, "listening for viewer connections");

        Ok(Self {
            inner: Arc::new(MonitorInner {
                listener,
                port,
                settings,
                info,
                pending: Mutex::new(Vec::new()),
                pending_signal: Condvar::new(),
                mode: Mutex::new(ConnectionMode::None),
                running: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        })
    }

    /// The port connections are monitored on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// The current monitoring mode.
    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        self.inner.mode.lock().map(|mode| *mode).unwrap_or(ConnectionMode::None)
    }

    /// Whether the monitor is running (in either mode).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Start monitoring in `mode`. Asynchronous mode spawns the accept
    /// thread. Returns true when running in the requested mode, including
    /// when it already was.
    pub fn start(&self, mode: ConnectionMode) -> bool {
        if mode == ConnectionMode::None {
            return false;
        }
        let Ok(mut current) = self.inner.mode.lock() else {
            return false;
        };
        if *current == mode {
            return true;
        }
        if *current != ConnectionMode::None {
            return false;
        }

        *current = mode;
        self.inner.running.store(true, Ordering::Release);
        if mode == ConnectionMode::Asynchronous {
            let inner = Arc::clone(&self.inner);
            let handle = std::thread::spawn(move || {
                while inner.running.load(Ordering::Acquire) {
                    inner.monitor_connections();
                    std::thread::sleep(ASYNC_POLL_INTERVAL);
                }
            });
            if let Ok(mut thread) = self.thread.lock() {
                *thread = Some(handle);
            }
        }
        true
    }

    /// Stop monitoring. Safe to call in any mode.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        if let Ok(mut mode) = self.inner.mode.lock() {
            *mode = ConnectionMode::None;
        }
        self.inner.pending_signal.notify_all();
    }

    /// Join the accept thread after [`ConnectionMonitor::stop`].
    pub fn join(&self) {
        let handle = self.thread.lock().ok().and_then(|mut thread| thread.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Accept any waiting connections, sending each the current server
    /// info. Call every frame in synchronous mode.
    pub fn monitor_connections(&self) {
        self.inner.monitor_connections();
    }

    /// Move staged connections into the server's broadcast set, expire dead
    /// connections, and report each newcomer through `on_connect`.
    pub fn commit_connections(
        &self,
        server: &TcpServer,
        mut on_connect: impl FnMut(&Arc<TcpConnection>),
    ) {
        let staged: Vec<_> = self
            .inner
            .pending
            .lock()
            .map(|mut pending| pending.drain(..).collect())
            .unwrap_or_default();
        server.expire_connections();
        for connection in staged {
            server.adopt_connection(Arc::clone(&connection));
            on_connect(&connection);
        }
    }

    /// Block until at least one connection is staged, the monitor stops, or
    /// `timeout_ms` elapses. Returns the number of staged connections.
    pub fn wait_for_connection(&self, timeout_ms: u32) -> usize {
        let deadline = std::time::Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let Ok(mut pending) = self.inner.pending.lock() else {
            return 0;
        };
        while pending.is_empty() && self.is_running() {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            let Ok((guard, _)) =
                self.inner.pending_signal.wait_timeout(pending, deadline - now)
            else {
                return 0;
            };
            pending = guard;
        }
        pending.len()
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("port", &self.port())
            .field("mode", &self.mode())
            .field("running", &self.is_running())
            .finish()
    }
}
