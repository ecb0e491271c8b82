//! Connection handling for Soulwire
//!
//! A [`Connection`] owns one TCP socket exclusively. The socket is split into
//! a read side (with its frame reader) and a write side so that one reader
//! flow and one writer flow can make progress independently. Both sides
//! watch a shared "closed" flag, so [`Connection::close`] wakes any flow
//! suspended in `receive` or `send`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use super::NetworkConfig;
use crate::error::{NetError, NetResult};
use crate::protocol::{write_frame, FrameReader, Message, WireFormat};

/// Connection statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received (complete messages only)
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

#[derive(Debug)]
struct ReadSide {
    stream: OwnedReadHalf,
    frames: FrameReader,
}

/// A framed connection to one remote peer
#[derive(Debug)]
pub struct Connection {
    /// Remote peer address
    peer_addr: SocketAddr,
    /// Encoding parameters for outbound messages
    format: WireFormat,
    /// Read half plus framing state; `None` once released
    reader: Mutex<Option<ReadSide>>,
    /// Write half; `None` once released
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Set to `true` exactly once, on close or terminal error
    closed: watch::Sender<bool>,
    stats: StatsCounters,
}

impl Connection {
    /// Wrap an established TCP stream
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, config: &NetworkConfig) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer_addr, "Could not set TCP_NODELAY: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Self {
            peer_addr,
            format: config.wire,
            reader: Mutex::new(Some(ReadSide {
                stream: read_half,
                frames: FrameReader::with_chunk_size(config.wire, config.read_chunk_size),
            })),
            writer: Mutex::new(Some(write_half)),
            closed,
            stats: StatsCounters::default(),
        }
    }

    /// Get the remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether the connection has been closed locally or by a terminal error
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Get connection statistics
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Send a message, writing every byte of it.
    ///
    /// Suspends while the socket's send buffer is full. Returns
    /// `ConnectionClosed` if the connection is or becomes closed. A message
    /// over the size limit fails with `MessageTooLarge` before anything is
    /// written and the connection stays open.
    pub async fn send(&self, message: &Message) -> NetResult<()> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(NetError::ConnectionClosed);
        }

        let mut frame = BytesMut::new();
        self.format.encode_message(message, &mut frame)?;

        let mut guard = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => return Err(NetError::ConnectionClosed),
            guard = self.writer.lock() => guard,
        };
        let stream = guard.as_mut().ok_or(NetError::ConnectionClosed)?;

        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(NetError::ConnectionClosed),
            result = write_frame(stream, &frame) => result,
        };

        match result {
            Ok(()) => {
                let written = frame.len();
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(written as u64, Ordering::Relaxed);
                tracing::trace!(peer = %self.peer_addr, kind = message.kind(), len = written, "Sent message");
                Ok(())
            }
            Err(e) => {
                if e.is_terminal() {
                    // A partial write leaves the stream misaligned for the peer.
                    *guard = None;
                    self.mark_closed(&e);
                }
                Err(e)
            }
        }
    }

    /// Receive the next complete message.
    ///
    /// Suspends until a message has fully arrived or a terminal condition
    /// occurs. Any terminal error closes the connection; afterwards every
    /// call fails with `ConnectionClosed`.
    pub async fn receive(&self) -> NetResult<Message> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(NetError::ConnectionClosed);
        }

        let mut guard = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => return Err(NetError::ConnectionClosed),
            guard = self.reader.lock() => guard,
        };
        let side = guard.as_mut().ok_or(NetError::ConnectionClosed)?;

        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(NetError::ConnectionClosed),
            result = side.frames.read_message(&mut side.stream) => result,
        };

        match result {
            Ok(message) => {
                self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_received
                    .fetch_add(message.encoded_len() as u64, Ordering::Relaxed);
                tracing::trace!(
                    peer = %self.peer_addr,
                    kind = message.kind(),
                    len = message.payload().len(),
                    "Received message"
                );
                Ok(message)
            }
            Err(e) => {
                if e.is_terminal() {
                    *guard = None;
                    self.mark_closed(&e);
                }
                Err(e)
            }
        }
    }

    /// Receive with a deadline.
    ///
    /// Expiry returns `Timeout` and leaves the connection open; bytes of a
    /// partially received message stay buffered for the next call.
    pub async fn receive_timeout(&self, timeout: Duration) -> NetResult<Message> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(result) => result,
            Err(_) => Err(NetError::Timeout),
        }
    }

    /// Close the connection and release the socket.
    ///
    /// Idempotent and safe after an error. Flows suspended in `receive` or
    /// `send` are woken with `ConnectionClosed`.
    pub async fn close(&self) {
        let was_closed = self.closed.send_replace(true);

        // Woken flows drop their guards promptly, so these locks are short.
        if let Some(mut stream) = self.writer.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.reader.lock().await.take();

        if !was_closed {
            tracing::debug!(peer = %self.peer_addr, "Connection closed");
        }
    }

    fn mark_closed(&self, cause: &NetError) {
        if !self.closed.send_replace(true) {
            tracing::debug!(peer = %self.peer_addr, "Connection terminated: {}", cause);
        }
    }
}

/// Resolves once the closed flag is set.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // The sender lives as long as the connection, so an error cannot occur
    // while a flow is borrowing it.
    let _ = closed.wait_for(|closed| *closed).await;
}
