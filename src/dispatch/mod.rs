//! Dispatch module - Routes received messages to handlers by kind
//!
//! The table is filled once at startup and then shared read-only between
//! connection flows, so lookups need no locking.
//!
//! # Example
//!
//! ```ignore
//! use soulwire::dispatch::Dispatcher;
//! use soulwire::protocol::{kinds, Message};
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register_fn(kinds::INIT_CONNECTION, |conn, message| async move {
//!     conn.send(&Message::text(kinds::INIT_CONNECTION, "Yo!")).await
//! })?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{NetError, NetResult};
use crate::network::Connection;
use crate::protocol::Message;

/// Application logic for one message kind
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle `message`, which arrived on `conn`.
    ///
    /// An error that left `conn` closed ends the connection's flow; other
    /// errors are reported as server events and the flow continues.
    async fn handle(&self, conn: Arc<Connection>, message: Message) -> NetResult<()>;
}

/// Adapter turning an async closure into a [`Handler`]
pub struct FnHandler<F> {
    handler: F,
}

impl<F> FnHandler<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Arc<Connection>, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NetResult<()>> + Send + 'static,
{
    async fn handle(&self, conn: Arc<Connection>, message: Message) -> NetResult<()> {
        (self.handler)(conn, message).await
    }
}

/// Table mapping message kinds to handlers
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<u32, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`.
    ///
    /// A second registration for the same kind fails with
    /// `DuplicateHandler` and leaves the first one in place.
    pub fn register_handler<H: Handler>(&mut self, kind: u32, handler: H) -> NetResult<()> {
        if self.handlers.contains_key(&kind) {
            return Err(NetError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, Arc::new(handler));
        tracing::debug!(kind, "Registered handler");
        Ok(())
    }

    /// Register an async closure for `kind`
    pub fn register_fn<F, Fut>(&mut self, kind: u32, handler: F) -> NetResult<()>
    where
        F: Fn(Arc<Connection>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NetResult<()>> + Send + 'static,
    {
        self.register_handler(kind, FnHandler::new(handler))
    }

    pub fn has_handler(&self, kind: u32) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds, ascending
    pub fn kinds(&self) -> Vec<u32> {
        let mut kinds: Vec<u32> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Route `message` to the handler registered for its kind.
    ///
    /// Messages of an unregistered kind are dropped and reported as
    /// `UnknownMessageKind`; the connection is left untouched.
    pub async fn dispatch(&self, conn: &Arc<Connection>, message: Message) -> NetResult<()> {
        let kind = message.kind();
        let handler = match self.handlers.get(&kind) {
            Some(handler) => handler.clone(),
            None => {
                tracing::warn!(
                    peer = %conn.peer_addr(),
                    kind,
                    len = message.payload().len(),
                    "Dropping message with no registered handler"
                );
                return Err(NetError::UnknownMessageKind(kind));
            }
        };

        handler.handle(conn.clone(), message).await
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::test_support::connection_pair;
    use crate::network::NetworkConfig;
    use crate::protocol::kinds;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for Counting {
        async fn handle(&self, _conn: Arc<Connection>, _message: Message) -> NetResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register_fn(0, |_conn, _message| async { NetResult::Ok(()) })
            .unwrap();

        let result = dispatcher.register_fn(0, |_conn, _message| async { NetResult::Ok(()) });
        assert!(matches!(result, Err(NetError::DuplicateHandler(0))));
        assert_eq!(dispatcher.kinds(), vec![0]);
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_kind() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register_handler(5, Counting { calls: calls.clone() })
            .unwrap();

        let (server, _client) = connection_pair(&NetworkConfig::default()).await;
        let server = Arc::new(server);

        dispatcher.dispatch(&server, Message::text(5, "a")).await.unwrap();
        dispatcher.dispatch(&server, Message::text(5, "b")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_kind_leaves_connection_open() {
        let dispatcher = Dispatcher::new();
        let (server, client) = connection_pair(&NetworkConfig::default()).await;
        let server = Arc::new(server);

        let result = dispatcher.dispatch(&server, Message::text(99, "?")).await;
        assert!(matches!(result, Err(NetError::UnknownMessageKind(99))));
        assert!(!server.is_closed());

        client.send(&Message::text(1, "still here")).await.unwrap();
        assert_eq!(server.receive().await.unwrap().payload_text(), "still here");
    }

    #[tokio::test]
    async fn test_handler_can_reply() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register_fn(kinds::INIT_CONNECTION, |conn, message| async move {
                let reply = format!("{} back", message.payload_text());
                conn.send(&Message::text(kinds::INIT_CONNECTION, &reply)).await
            })
            .unwrap();

        let (server, client) = connection_pair(&NetworkConfig::default()).await;
        let server = Arc::new(server);

        dispatcher
            .dispatch(&server, Message::text(kinds::INIT_CONNECTION, "Hello"))
            .await
            .unwrap();
        assert_eq!(client.receive().await.unwrap().payload_text(), "Hello back");
    }
}
