//! Soulwire Server
//!
//! The server runs one accept task and one task per connection. Each
//! connection task receives messages and hands them to the shared
//! [`Dispatcher`]. Failures on one connection end only that connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::{Connection, Listener, NetworkConfig};
use crate::dispatch::Dispatcher;
use crate::error::{NetError, NetResult};
use crate::protocol::Message;

/// Capacity of the event channel; events beyond it are dropped
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started
    Started { bind_addr: SocketAddr },
    /// A new client has connected
    ClientConnected { addr: SocketAddr },
    /// A client has disconnected
    ClientDisconnected { addr: SocketAddr, reason: String },
    /// Error occurred
    Error { message: String },
    /// Server stopped
    Stopped,
}

type ClientMap = Arc<RwLock<HashMap<SocketAddr, Arc<Connection>>>>;

/// Soulwire Server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Handler table, frozen once the server starts
    dispatcher: Arc<Dispatcher>,
    /// Connected clients
    clients: ClientMap,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Accept loop task
    accept_task: Option<JoinHandle<()>>,
    /// Address the listener is bound to
    local_addr: Option<SocketAddr>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig, dispatcher: Dispatcher) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            accept_task: None,
            local_addr: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Bind, listen, and spawn the accept loop.
    ///
    /// `BindFailed` means the server cannot run at all.
    pub async fn start(&mut self) -> NetResult<()> {
        if *self.running.read().await {
            return Err(NetError::InvalidState("server already running".into()));
        }

        let mut listener = Listener::bind_and_listen(self.config.clone())?;
        let local_addr = listener
            .local_addr()
            .unwrap_or_else(|| self.config.bind_addr());
        self.local_addr = Some(local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        *self.running.write().await = true;

        emit(&self.event_tx, ServerEvent::Started { bind_addr: local_addr });

        let config = self.config.clone();
        let dispatcher = self.dispatcher.clone();
        let clients = self.clients.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();

        // Spawn the accept loop
        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept_next() => {
                        match result {
                            Ok(conn) => {
                                let conn = Arc::new(conn);
                                let addr = conn.peer_addr();
                                clients.write().await.insert(addr, conn.clone());
                                emit(&event_tx, ServerEvent::ClientConnected { addr });

                                tokio::spawn(serve_connection(
                                    conn,
                                    dispatcher.clone(),
                                    clients.clone(),
                                    event_tx.clone(),
                                    config.clone(),
                                ));
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                emit(&event_tx, ServerEvent::Error { message: e.to_string() });
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            listener.close();
            *running.write().await = false;
            emit(&event_tx, ServerEvent::Stopped);
        }));

        Ok(())
    }

    /// Stop accepting and close every live connection
    pub async fn stop(&mut self) -> NetResult<()> {
        if !*self.running.read().await {
            return Err(NetError::InvalidState("server not running".into()));
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::error!("Accept loop panicked: {}", e);
            }
        }

        // Snapshot first: connection tasks remove themselves from the map.
        let clients: Vec<Arc<Connection>> = self.clients.read().await.values().cloned().collect();
        for conn in clients {
            conn.close().await;
        }

        Ok(())
    }

    /// Address the server is listening on, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Addresses of connected clients
    pub async fn clients(&self) -> Vec<SocketAddr> {
        self.clients.read().await.keys().copied().collect()
    }

    /// Send a message to a specific client
    pub async fn send_to(&self, addr: &SocketAddr, message: &Message) -> NetResult<()> {
        let conn = self.clients.read().await.get(addr).cloned();
        match conn {
            Some(conn) => conn.send(message).await,
            None => Err(NetError::ConnectionClosed),
        }
    }

    /// Send a message to all connected clients
    pub async fn broadcast(&self, message: &Message) {
        let clients: Vec<Arc<Connection>> = self.clients.read().await.values().cloned().collect();
        for conn in clients {
            if let Err(e) = conn.send(message).await {
                tracing::debug!(peer = %conn.peer_addr(), "Broadcast skipped: {}", e);
            }
        }
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Publish an event without ever waiting on the consumer
fn emit(event_tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = event_tx.try_send(event) {
        tracing::debug!("Event channel full, dropping {:?}", event);
    }
}

/// Receive and dispatch messages until the connection ends
async fn serve_connection(
    conn: Arc<Connection>,
    dispatcher: Arc<Dispatcher>,
    clients: ClientMap,
    event_tx: mpsc::Sender<ServerEvent>,
    config: NetworkConfig,
) {
    let addr = conn.peer_addr();

    let disconnect_reason = loop {
        let received = match config.idle_timeout {
            Some(timeout) => conn.receive_timeout(timeout).await,
            None => conn.receive().await,
        };

        let message = match received {
            Ok(message) => message,
            Err(NetError::Timeout) => break "Idle timeout".to_string(),
            Err(NetError::ConnectionClosed) => break "Connection closed".to_string(),
            Err(e) => {
                tracing::warn!(peer = %addr, "Receive failed: {}", e);
                break format!("Error: {}", e);
            }
        };

        match dispatcher.dispatch(&conn, message).await {
            Ok(()) => {}
            Err(NetError::UnknownMessageKind(kind)) => {
                if config.close_on_unknown_kind {
                    break format!("Unknown message kind {}", kind);
                }
            }
            Err(e) if e.is_terminal() && conn.is_closed() => {
                break format!("Handler error: {}", e);
            }
            Err(e) => {
                tracing::warn!(peer = %addr, "Handler error: {}", e);
                emit(
                    &event_tx,
                    ServerEvent::Error {
                        message: format!("Handler error for {}: {}", addr, e),
                    },
                );
            }
        }
    };

    conn.close().await;
    clients.write().await.remove(&addr);

    tracing::info!("Client disconnected: {} - {}", addr, disconnect_reason);
    emit(
        &event_tx,
        ServerEvent::ClientDisconnected {
            addr,
            reason: disconnect_reason,
        },
    );
}
