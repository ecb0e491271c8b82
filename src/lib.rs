//! Soulwire - Length-prefixed message transport over TCP
//!
//! A server accepts client connections and exchanges discrete,
//! self-delimiting messages with them. Each message carries a numeric kind
//! and an opaque payload; the [`dispatch::Dispatcher`] routes received
//! messages to the handler registered for their kind.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod protocol;

pub use error::{NetError, NetResult};
