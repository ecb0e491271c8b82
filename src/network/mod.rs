//! Network module - Handles TCP communication between server and clients
//!
//! Provides:
//! - Listener for binding and accepting connections
//! - Connection wrapping one socket with framed send/receive
//! - Server running the accept loop and one flow per connection
//! - Client-side connect helper

mod listener;
mod server;
mod client;
mod connection;

pub use listener::*;
pub use server::*;
pub use client::*;
pub use connection::*;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::{WireFormat, DEFAULT_PORT, DEFAULT_READ_CHUNK_SIZE};

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address to bind to (default: all interfaces)
    pub bind_address: IpAddr,
    /// Port to listen on or connect to
    pub port: u16,
    /// Pending connection queue length
    pub backlog: u32,
    /// Byte order and size limit shared with peers
    pub wire: WireFormat,
    /// Bytes requested per socket read
    pub read_chunk_size: usize,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Disconnect clients that send nothing for this long
    pub idle_timeout: Option<Duration>,
    /// Close connections that send a kind with no registered handler
    pub close_on_unknown_kind: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            wire: WireFormat::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            connect_timeout: Duration::from_millis(5000),
            idle_timeout: None,
            close_on_unknown_kind: false,
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

    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn with_wire_format(mut self, wire: WireFormat) -> Self {
        self.wire = wire;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Socket address the listener binds to
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Resolve a hostname to a socket address
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

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    /// Two connected ends of a loopback TCP socket: (server side, client side)
    pub async fn connection_pair(config: &NetworkConfig) -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = client.unwrap();
        let (server, peer) = accepted.unwrap();

        (
            Connection::new(server, peer, config),
            Connection::new(client, addr, config),
        )
    }
}
