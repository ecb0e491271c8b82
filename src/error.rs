//! Error types shared by the transport layers.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors produced by the wire format, framing, connection, listener and
/// dispatch layers.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Bind to {addr} failed: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// No pending connection right now. Expected, not a failure.
    #[error("No pending connection")]
    WouldBlock,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("No handler registered for message kind {0}")]
    UnknownMessageKind(u32),

    #[error("Handler already registered for message kind {0}")]
    DuplicateHandler(u32),

    #[error("Connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation timed out")]
    Timeout,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl NetError {
    /// Whether this error ends the flow of the connection it occurred on.
    ///
    /// `Timeout`, `UnknownMessageKind` and handler registration errors leave
    /// the connection usable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NetError::ConnectionClosed | NetError::Io(_) | NetError::MessageTooLarge { .. }
        )
    }
}

pub type NetResult<T> = Result<T, NetError>;
