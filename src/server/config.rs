//! Fan-out server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Default WebSocket port
pub const DEFAULT_PORT: u16 = 31611;

/// Default viewer cap
pub const DEFAULT_MAX_VIEWERS: usize = 100;

/// Fan-out server configuration options
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent viewers across all streams
    pub max_viewers: usize,

    /// Frames buffered per stream before slow viewers start skipping
    pub viewer_buffer: usize,

    /// WebSocket upgrade must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_viewers: DEFAULT_MAX_VIEWERS,
            viewer_buffer: 16,
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Frames are latency sensitive
        }
    }
}

impl FanoutConfig {
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

    /// Set the viewer cap
    pub fn max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = max;
        self
    }

    /// Set the per-stream frame buffer (at least 1)
    pub fn viewer_buffer(mut self, frames: usize) -> Self {
        self.viewer_buffer = frames.max(1);
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Enable or disable TCP_NODELAY on accepted sockets
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}
