//! Protocol codec for encoding messages and decoding headers
//!
//! Handles the byte layout of the header and writing whole messages to a
//! byte sink.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{Message, MessageHeader, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::{NetError, NetResult};

/// Byte order of the header integers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Network byte order
    #[default]
    Big,
    Little,
}

/// Parameters both peers must agree on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    pub byte_order: ByteOrder,
    /// Largest payload accepted or produced
    pub max_payload_size: u32,
}

impl Default for WireFormat {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl WireFormat {
    pub fn new(byte_order: ByteOrder, max_payload_size: u32) -> Self {
        Self {
            byte_order,
            max_payload_size,
        }
    }

    /// Encode `kind` and `payload` as header-then-payload
    pub fn encode(&self, kind: u32, payload: &[u8]) -> NetResult<Bytes> {
        let length = self.checked_length(payload.len())?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        self.put_header(&MessageHeader::new(kind, length), &mut buf);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Append the encoded form of `message` to `buf`
    pub fn encode_message(&self, message: &Message, buf: &mut BytesMut) -> NetResult<()> {
        let length = self.checked_length(message.payload().len())?;

        buf.reserve(HEADER_SIZE + length as usize);
        self.put_header(&MessageHeader::new(message.kind(), length), buf);
        buf.put_slice(message.payload());
        Ok(())
    }

    /// Decode a header. Fixed width, so this cannot fail; the length still
    /// has to go through [`WireFormat::check_payload_length`].
    pub fn decode_header(&self, bytes: &[u8; HEADER_SIZE]) -> MessageHeader {
        let kind = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let length = [bytes[4], bytes[5], bytes[6], bytes[7]];

        match self.byte_order {
            ByteOrder::Big => MessageHeader::new(u32::from_be_bytes(kind), u32::from_be_bytes(length)),
            ByteOrder::Little => {
                MessageHeader::new(u32::from_le_bytes(kind), u32::from_le_bytes(length))
            }
        }
    }

    /// Reject headers announcing more than `max_payload_size` bytes
    pub fn check_payload_length(&self, header: &MessageHeader) -> NetResult<()> {
        if header.payload_length > self.max_payload_size {
            return Err(NetError::MessageTooLarge {
                size: header.payload_length as usize,
                max: self.max_payload_size as usize,
            });
        }
        Ok(())
    }

    /// Encode `message` and write every byte of it to `dst`.
    ///
    /// Short writes are retried until the whole message is out.
    pub async fn write_message<W>(&self, dst: &mut W, message: &Message) -> NetResult<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::new();
        self.encode_message(message, &mut buf)?;

        write_frame(dst, &buf).await?;
        Ok(buf.len())
    }

    fn checked_length(&self, len: usize) -> NetResult<u32> {
        match u32::try_from(len) {
            Ok(length) if length <= self.max_payload_size => Ok(length),
            _ => Err(NetError::MessageTooLarge {
                size: len,
                max: self.max_payload_size as usize,
            }),
        }
    }

    fn put_header(&self, header: &MessageHeader, buf: &mut BytesMut) {
        match self.byte_order {
            ByteOrder::Big => {
                buf.put_u32(header.kind);
                buf.put_u32(header.payload_length);
            }
            ByteOrder::Little => {
                buf.put_u32_le(header.kind);
                buf.put_u32_le(header.payload_length);
            }
        }
    }
}

/// Write an already encoded message, retrying short writes, then flush
pub async fn write_frame<W>(dst: &mut W, frame: &[u8]) -> NetResult<()>
where
    W: AsyncWrite + Unpin,
{
    dst.write_all(frame).await?;
    dst.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kinds;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn little() -> WireFormat {
        WireFormat::new(ByteOrder::Little, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    #[test]
    fn test_encode_little_endian_layout() {
        let bytes = little().encode(kinds::INIT_CONNECTION, b"Yo!").unwrap();
        assert_eq!(
            &bytes[..],
            &[0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x59, 0x6F, 0x21]
        );
    }

    #[test]
    fn test_encode_network_order_layout() {
        let bytes = WireFormat::default().encode(0x0102_0304, b"ab").unwrap();
        assert_eq!(
            &bytes[..],
            &[0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x00, 0x02, b'a', b'b']
        );
    }

    #[test]
    fn test_decode_header_respects_byte_order() {
        let raw = [0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00];
        assert_eq!(little().decode_header(&raw), MessageHeader::new(1, 16));
        assert_eq!(
            WireFormat::default().decode_header(&raw),
            MessageHeader::new(0x0100_0000, 0x1000_0000)
        );
    }

    #[test]
    fn test_encode_message_matches_encode() {
        let format = WireFormat::default();
        let message = Message::text(42, "hello");
        let mut buf = BytesMut::new();
        format.encode_message(&message, &mut buf).unwrap();
        assert_eq!(buf.freeze(), format.encode(42, b"hello").unwrap());
    }

    #[test]
    fn test_payload_length_limit() {
        let format = WireFormat::new(ByteOrder::Big, 4);
        assert!(format.check_payload_length(&MessageHeader::new(0, 4)).is_ok());
        assert!(matches!(
            format.check_payload_length(&MessageHeader::new(0, 5)),
            Err(NetError::MessageTooLarge { size: 5, max: 4 })
        ));
        assert!(matches!(
            format.encode(0, b"too long"),
            Err(NetError::MessageTooLarge { size: 8, max: 4 })
        ));
    }

    /// Sink that accepts at most two bytes per write call.
    struct TrickleWriter {
        written: Vec<u8>,
        calls: usize,
    }

    impl AsyncWrite for TrickleWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let n = buf.len().min(2);
            self.written.extend_from_slice(&buf[..n]);
            self.calls += 1;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_message_survives_short_writes() {
        let format = little();
        let message = Message::text(5, "Yo!");
        let mut sink = TrickleWriter {
            written: Vec::new(),
            calls: 0,
        };

        let written = format.write_message(&mut sink, &message).await.unwrap();

        assert_eq!(written, 11);
        assert_eq!(sink.calls, 6);
        assert_eq!(sink.written, format.encode(5, b"Yo!").unwrap().to_vec());
    }

    #[tokio::test]
    async fn test_write_message_against_scripted_peer() {
        let format = WireFormat::default();
        let mut sink = tokio_test::io::Builder::new()
            .write(&[0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x02])
            .write(b"hi")
            .build();

        format
            .write_message(&mut sink, &Message::text(9, "hi"))
            .await
            .unwrap();
    }
}
