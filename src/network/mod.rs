//! Network module - Handles TCP communication with game clients
//!
//! Provides:
//! - Server for accepting and admitting connections
//! - Per-connection sessions driving the handshake, status and login states
//! - A session registry shared by all sessions
//! - Client helpers for querying a running server

mod client;
mod connection;
mod registry;
mod server;
mod session;

pub use client::*;
pub use registry::*;
pub use server::*;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_STRING_LENGTH, DEFAULT_PORT};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Interface to bind to
    pub bind_address: String,
    /// Port to listen on or connect to
    pub port: u16,
    /// Largest frame accepted or sent
    pub max_frame_size: usize,
    /// Largest string field accepted
    pub max_string_length: usize,
    /// How long to wait for each incoming frame
    pub read_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Address string handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addr_string = if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
