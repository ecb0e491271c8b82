//! Soulwire Client
//!
//! Connects to a Soulwire server and hands back a framed [`Connection`].

use std::net::SocketAddr;

use tokio::net::TcpStream;

use super::{Connection, NetworkConfig};
use crate::error::{NetError, NetResult};
use crate::protocol::{kinds, Message};

/// Open a connection to `addr`, giving up after `config.connect_timeout`
pub async fn connect(addr: SocketAddr, config: &NetworkConfig) -> NetResult<Connection> {
    tracing::debug!("Connecting to {}", addr);

    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(NetError::ConnectFailed { addr, source }),
        Err(_) => return Err(NetError::Timeout),
    };

    tracing::info!("Connected to {}", addr);
    Ok(Connection::new(stream, addr, config))
}

/// Connect and send the `INIT_CONNECTION` greeting
pub async fn connect_and_greet(
    addr: SocketAddr,
    config: &NetworkConfig,
    greeting: &str,
) -> NetResult<Connection> {
    let conn = connect(addr, config).await?;
    conn.send(&Message::text(kinds::INIT_CONNECTION, greeting)).await?;
    Ok(conn)
}
