//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Default HTTP/WebSocket port
pub const DEFAULT_PORT: u16 = 8888;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent viewer connections (0 = unlimited)
    pub max_connections: usize,

    /// Chunks queued per viewer before chunks are dropped for it
    pub viewer_buffer_chunks: usize,

    /// Stream served on `/` and `/ws` without a stream name
    pub default_stream: Option<String>,

    /// Time allowed for sessions to shut down after the server stops
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            viewer_buffer_chunks: 64,
            default_stream: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-viewer queue length (at least 1)
    pub fn viewer_buffer_chunks(mut self, chunks: usize) -> Self {
        self.viewer_buffer_chunks = chunks.max(1);
        self
    }

    /// Set the stream served without a stream name
    pub fn default_stream(mut self, stream: impl Into<String>) -> Self {
        self.default_stream = Some(stream.into());
        self
    }

    /// Set the shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
