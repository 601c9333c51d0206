//! Network module - TCP reactor for game clients
//!
//! Provides:
//! - Server accepting client connections and feeding their packets to the
//!   worker pool
//! - Connection and ConnectionHandle for per-client I/O
//! - SessionHandler with the login / keep-alive / chat logic

mod connection;
mod handler;
mod server;

pub use connection::*;
pub use handler::*;
pub use server::*;

use std::net::SocketAddr;

use crate::buffer::DEFAULT_HIGH_WATERMARK;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Reads resume once buffered input drops to this many bytes
    pub low_watermark: usize,
    /// Reads pause once this many bytes of input are buffered; 0 disables
    pub high_watermark: usize,
    /// Packets that may wait for a connection's writer
    pub outbound_queue: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: crate::protocol::DEFAULT_PORT,
            low_watermark: 0,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            outbound_queue: 256,
        }
    }
}

/// Resolve a bind address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
