//! Protocol message definitions
//!
//! A [`Message`] is an immutable envelope: a header naming its kind and the
//! owned payload bytes. The payload is opaque to the transport.

use bytes::Bytes;
use std::borrow::Cow;

/// Well-known message kinds
///
/// Everything not listed here is defined by the application handlers.
pub mod kinds {
    /// First message a client sends after connecting
    pub const INIT_CONNECTION: u32 = 0;
}

/// Fixed-size message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    /// Application-defined message kind
    pub kind: u32,
    /// Exact number of payload bytes following the header
    pub payload_length: u32,
}

impl MessageHeader {
    pub fn new(kind: u32, payload_length: u32) -> Self {
        Self {
            kind,
            payload_length,
        }
    }
}

/// A complete message: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Bytes,
}

impl Message {
    /// Build a message of `kind` carrying `payload`.
    ///
    /// Payloads longer than `u32::MAX` saturate the header length; the
    /// encoder rejects them before anything reaches the wire.
    pub fn new(kind: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let payload_length = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        Self {
            header: MessageHeader::new(kind, payload_length),
            payload,
        }
    }

    /// Build a message whose payload is UTF-8 text
    pub fn text(kind: u32, text: &str) -> Self {
        Self::new(kind, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Assemble a message from a decoded header and its payload.
    pub(crate) fn from_parts(header: MessageHeader, payload: Bytes) -> Self {
        debug_assert_eq!(header.payload_length as usize, payload.len());
        Self { header, payload }
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn kind(&self) -> u32 {
        self.header.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Take ownership of the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload as text, with invalid UTF-8 replaced
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Total number of bytes this message occupies on the wire
    pub fn encoded_len(&self) -> usize {
        super::HEADER_SIZE + self.payload.len()
    }
}
