//! Protocol module - Defines the wire protocol for Soulwire communication
//!
//! Every message is a fixed 8 byte header followed by an opaque payload:
//! - 4 bytes message kind
//! - 4 bytes payload length
//! - `payload length` bytes of payload
//!
//! There are no separators and no padding. Both integers use the byte order
//! configured in [`WireFormat`], which must match on both peers.

mod message;
mod codec;
mod frame_reader;

pub use message::*;
pub use codec::*;
pub use frame_reader::*;

/// Default port the server listens on
pub const DEFAULT_PORT: u16 = 8080;

/// Size of the fixed message header in bytes
pub const HEADER_SIZE: usize = 8;

/// Default upper bound for a single payload (4 MiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

/// Default number of bytes requested per socket read
pub const DEFAULT_READ_CHUNK_SIZE: usize = 512;
