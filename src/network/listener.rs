//! Listening socket
//!
//! Walks the socket through `Unbound -> Bound -> Listening -> Closed`.
//! Binding and listening are separate steps so that a failure can be
//! attributed to either, and so that listening cannot happen before binding.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};

use super::{Connection, NetworkConfig};
use crate::error::{NetError, NetResult};

/// Lifecycle state of a [`Listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Bound,
    Listening,
    Closed,
}

enum Socket {
    None,
    Bound(TcpSocket),
    Listening(TcpListener),
}

/// Accepts incoming TCP connections and wraps them in [`Connection`]s
pub struct Listener {
    config: NetworkConfig,
    socket: Socket,
    state: ListenerState,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            socket: Socket::None,
            state: ListenerState::Unbound,
            local_addr: None,
        }
    }

    /// Bind and listen on the configured address in one step
    pub fn bind_and_listen(config: NetworkConfig) -> NetResult<Self> {
        let mut listener = Self::new(config);
        let addr = listener.config.bind_addr();
        listener.bind(addr)?;
        listener.listen()?;
        Ok(listener)
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind to `addr`. Fails with `BindFailed` if the port is taken or
    /// privileges are insufficient.
    pub fn bind(&mut self, addr: SocketAddr) -> NetResult<()> {
        self.expect_state(ListenerState::Unbound)?;

        let bind_failed = |source| NetError::BindFailed { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_failed)?;
        socket.set_reuseaddr(true).map_err(bind_failed)?;
        socket.bind(addr).map_err(bind_failed)?;

        self.local_addr = Some(socket.local_addr().map_err(bind_failed)?);
        self.socket = Socket::Bound(socket);
        self.state = ListenerState::Bound;

        tracing::debug!(addr = %addr, "Socket bound");
        Ok(())
    }

    /// Start listening with the configured backlog
    pub fn listen(&mut self) -> NetResult<()> {
        self.expect_state(ListenerState::Bound)?;

        let addr = self.local_addr.unwrap_or_else(|| self.config.bind_addr());
        let socket = match std::mem::replace(&mut self.socket, Socket::None) {
            Socket::Bound(socket) => socket,
            _ => return Err(NetError::InvalidState("listener has no bound socket".into())),
        };

        let listener = socket.listen(self.config.backlog).map_err(|source| {
            self.state = ListenerState::Closed;
            NetError::BindFailed { addr, source }
        })?;

        self.socket = Socket::Listening(listener);
        self.state = ListenerState::Listening;

        tracing::info!("Listening on {}", addr);
        Ok(())
    }

    /// Wait for the next incoming connection
    pub async fn accept_next(&self) -> NetResult<Connection> {
        let listener = self.listening()?;
        let (stream, addr) = listener.accept().await.map_err(NetError::AcceptFailed)?;

        tracing::info!("New connection from {}", addr);
        Ok(Connection::new(stream, addr, &self.config))
    }

    /// Accept a connection only if one is already pending.
    ///
    /// Returns `WouldBlock` immediately when there is none.
    pub async fn try_accept_next(&self) -> NetResult<Connection> {
        let listener = self.listening()?;

        let accepted = tokio::select! {
            biased;
            result = listener.accept() => result,
            _ = std::future::ready(()) => return Err(NetError::WouldBlock),
        };
        let (stream, addr) = accepted.map_err(NetError::AcceptFailed)?;

        tracing::info!("New connection from {}", addr);
        Ok(Connection::new(stream, addr, &self.config))
    }

    /// Stop listening and release the socket
    pub fn close(&mut self) {
        if self.state != ListenerState::Closed {
            tracing::debug!(addr = ?self.local_addr, "Listener closed");
        }
        self.socket = Socket::None;
        self.state = ListenerState::Closed;
    }

    fn listening(&self) -> NetResult<&TcpListener> {
        match &self.socket {
            Socket::Listening(listener) => Ok(listener),
            _ => Err(NetError::InvalidState(format!(
                "cannot accept in state {:?}",
                self.state
            ))),
        }
    }

    fn expect_state(&self, expected: ListenerState) -> NetResult<()> {
        if self.state != expected {
            return Err(NetError::InvalidState(format!(
                "expected listener state {:?}, found {:?}",
                expected, self.state
            )));
        }
        Ok(())
    }
}
