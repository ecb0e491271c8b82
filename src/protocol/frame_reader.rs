//! Frame reader for reassembling messages from a byte stream
//!
//! The stream may hand over bytes in arbitrary pieces. The reader keeps a
//! single accumulation buffer and a two-state cursor:
//! - `AwaitingHeader`: need [`HEADER_SIZE`] bytes
//! - `AwaitingPayload`: header decoded, need `payload_length` more bytes
//!
//! Only the bytes a transition needs are consumed; anything left over
//! belongs to the next message and stays buffered.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Message, MessageHeader, WireFormat, DEFAULT_READ_CHUNK_SIZE, HEADER_SIZE};
use crate::error::{NetError, NetResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    AwaitingHeader,
    AwaitingPayload { header: MessageHeader },
    /// The source closed or failed, or the peer broke the protocol.
    Terminated,
}

/// Incremental message decoder
#[derive(Debug)]
pub struct FrameReader {
    format: WireFormat,
    buffer: BytesMut,
    state: ReadState,
    chunk_size: usize,
}

impl FrameReader {
    pub fn new(format: WireFormat) -> Self {
        Self::with_chunk_size(format, DEFAULT_READ_CHUNK_SIZE)
    }

    /// Reader requesting at most `chunk_size` bytes per read
    pub fn with_chunk_size(format: WireFormat, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            format,
            buffer: BytesMut::with_capacity(chunk_size.max(HEADER_SIZE)),
            state: ReadState::AwaitingHeader,
            chunk_size,
        }
    }

    pub fn format(&self) -> &WireFormat {
        &self.format
    }

    /// Number of bytes received but not yet part of an emitted message
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the reader has hit a terminal condition
    pub fn is_terminated(&self) -> bool {
        self.state == ReadState::Terminated
    }

    /// Feed a chunk and collect every message it completes.
    pub fn push(&mut self, data: &[u8]) -> NetResult<Vec<Message>> {
        if self.is_terminated() {
            return Err(NetError::ConnectionClosed);
        }

        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_next()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Read from `src` until one complete message is assembled.
    ///
    /// A read of zero bytes means the peer closed the stream and yields
    /// `ConnectionClosed`; a failed read yields `Io`. Either way the partial
    /// message is discarded and the reader never reads again.
    ///
    /// Cancel safe: all progress lives in `self`.
    pub async fn read_message<R>(&mut self, src: &mut R) -> NetResult<Message>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(message) = self.try_next()? {
                return Ok(message);
            }

            let mut limited = (&mut self.buffer).limit(self.chunk_size);
            match src.read_buf(&mut limited).await {
                Ok(0) => {
                    if !self.buffer.is_empty() {
                        tracing::debug!(
                            discarded = self.buffer.len(),
                            "Stream closed in the middle of a message"
                        );
                    }
                    self.terminate();
                    return Err(NetError::ConnectionClosed);
                }
                Ok(n) => {
                    tracing::trace!(len = n, buffered = self.buffer.len(), "Read chunk");
                }
                Err(e) => {
                    self.terminate();
                    return Err(NetError::Io(e));
                }
            }
        }
    }

    /// Advance the state machine as far as the buffered bytes allow.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    fn try_next(&mut self) -> NetResult<Option<Message>> {
        loop {
            match self.state {
                ReadState::AwaitingHeader => {
                    if self.buffer.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let mut raw = [0u8; HEADER_SIZE];
                    raw.copy_from_slice(&self.buffer[..HEADER_SIZE]);
                    let header = self.format.decode_header(&raw);

                    if let Err(e) = self.format.check_payload_length(&header) {
                        tracing::warn!(
                            kind = header.kind,
                            len = header.payload_length,
                            max = self.format.max_payload_size,
                            "Rejecting oversized message"
                        );
                        self.terminate();
                        return Err(e);
                    }

                    self.buffer.advance(HEADER_SIZE);
                    self.state = ReadState::AwaitingPayload { header };
                }
                ReadState::AwaitingPayload { header } => {
                    let length = header.payload_length as usize;
                    if self.buffer.len() < length {
                        // Grow once for the rest of the payload, bounded by the
                        // already validated length.
                        self.buffer.reserve(length - self.buffer.len());
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(length).freeze();
                    self.state = ReadState::AwaitingHeader;
                    return Ok(Some(Message::from_parts(header, payload)));
                }
                ReadState::Terminated => return Err(NetError::ConnectionClosed),
            }
        }
    }

    fn terminate(&mut self) {
        self.state = ReadState::Terminated;
        self.buffer = BytesMut::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{kinds, ByteOrder, DEFAULT_MAX_PAYLOAD_SIZE};
    use bytes::Bytes;
    use tokio_test::io::Builder;

    fn little() -> WireFormat {
        WireFormat::new(ByteOrder::Little, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    #[test]
    fn test_fragmented_greeting() {
        let mut reader = FrameReader::new(little());

        assert!(reader.push(&[0x00, 0x00]).unwrap().is_empty());
        assert!(reader.push(&[0x00, 0x00, 0x03, 0x00]).unwrap().is_empty());
        assert!(reader.push(&[0x00, 0x00, 0x59]).unwrap().is_empty());
        let messages = reader.push(&[0x6F, 0x21]).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), kinds::INIT_CONNECTION);
        assert_eq!(messages[0].payload_text(), "Yo!");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_every_split_point_yields_one_message() {
        let format = WireFormat::default();
        let original = Message::text(7, "split me anywhere");
        let bytes = format.encode(7, original.payload()).unwrap();

        for first in 1..bytes.len() {
            for second in first..bytes.len() {
                let mut reader = FrameReader::new(format);
                let mut out = Vec::new();
                out.extend(reader.push(&bytes[..first]).unwrap());
                if second > first {
                    out.extend(reader.push(&bytes[first..second]).unwrap());
                }
                out.extend(reader.push(&bytes[second..]).unwrap());

                assert_eq!(out, vec![original.clone()], "split at {first}/{second}");
            }
        }
    }

    #[test]
    fn test_consecutive_messages_keep_order() {
        let format = WireFormat::default();
        let originals: Vec<Message> = (0..20u32)
            .map(|i| Message::new(i, vec![i as u8; (i * 7 % 13) as usize]))
            .collect();

        let mut stream = Vec::new();
        for message in &originals {
            stream.extend_from_slice(&format.encode(message.kind(), message.payload()).unwrap());
        }

        // Re-chunk with a repeating pattern of odd sizes.
        let sizes = [1usize, 5, 3, 11, 2, 17];
        let mut reader = FrameReader::new(format);
        let mut received = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < stream.len() {
            let end = (offset + sizes[i % sizes.len()]).min(stream.len());
            received.extend(reader.push(&stream[offset..end]).unwrap());
            offset = end;
            i += 1;
        }

        assert_eq!(received, originals);
    }

    #[test]
    fn test_header_and_next_message_in_one_chunk() {
        let format = WireFormat::default();
        let mut stream = format.encode(1, b"one").unwrap().to_vec();
        stream.extend_from_slice(&format.encode(2, b"").unwrap());
        stream.extend_from_slice(&format.encode(3, b"three").unwrap()[..6]);

        let mut reader = FrameReader::new(format);
        let messages = reader.push(&stream).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].kind(), 2);
        assert!(messages[1].payload().is_empty());
        assert_eq!(reader.buffered(), 6);
    }

    #[test]
    fn test_payload_at_exact_limit_is_accepted() {
        let format = WireFormat::new(ByteOrder::Big, 16);
        let payload = [0xAB; 16];
        let encoded = format.encode(7, &payload).unwrap();

        let mut reader = FrameReader::new(format);
        let messages = reader.push(&encoded[..10]).unwrap();
        assert!(messages.is_empty());
        let messages = reader.push(&encoded[10..]).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind(), 7);
        assert_eq!(messages[0].payload().as_ref(), &payload[..]);
        assert!(!reader.is_terminated());
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_oversized_header_is_rejected_without_allocation() {
        let format = WireFormat::new(ByteOrder::Big, 16);
        let mut reader = FrameReader::new(format);

        let header = [0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFF];
        let err = reader.push(&header).unwrap_err();

        assert!(matches!(err, NetError::MessageTooLarge { size, max: 16 } if size == u32::MAX as usize));
        assert!(reader.is_terminated());
        assert!(reader.buffer.capacity() < 1024);
        assert!(matches!(reader.push(&[0]), Err(NetError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_message_across_partial_reads() {
        let mut src = Builder::new()
            .read(&[0x00, 0x00])
            .read(&[0x00, 0x00, 0x03, 0x00])
            .read(&[0x00, 0x00, 0x59])
            .read(&[0x6F, 0x21])
            .build();

        let mut reader = FrameReader::new(little());
        let message = reader.read_message(&mut src).await.unwrap();

        assert_eq!(message, Message::new(0, Bytes::from_static(b"Yo!")));
    }

    #[tokio::test]
    async fn test_small_chunk_size_reads_everything() {
        let format = WireFormat::default();
        let first = format.encode(4, &[0xAB; 40]).unwrap();
        let second = format.encode(5, b"tail").unwrap();
        let mut joined = first.to_vec();
        joined.extend_from_slice(&second);

        let mut src = Builder::new().read(&joined).build();
        let mut reader = FrameReader::with_chunk_size(format, 3);

        let a = reader.read_message(&mut src).await.unwrap();
        let b = reader.read_message(&mut src).await.unwrap();
        assert_eq!(a.payload().len(), 40);
        assert_eq!(b.payload_text(), "tail");
    }

    #[tokio::test]
    async fn test_eof_mid_message_is_connection_closed() {
        let mut src = Builder::new().read(&[0x00, 0x00, 0x00, 0x01, 0x00]).build();
        let mut reader = FrameReader::new(WireFormat::default());

        let err = reader.read_message(&mut src).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed));
        assert!(reader.is_terminated());
        assert_eq!(reader.buffered(), 0);

        // No further reads once terminated.
        let mut untouched = Builder::new().build();
        let err = reader.read_message(&mut untouched).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_read_error_is_io_error() {
        let mut src = Builder::new()
            .read(&[0x00, 0x00, 0x00])
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = FrameReader::new(WireFormat::default());

        let err = reader.read_message(&mut src).await.unwrap_err();
        assert!(matches!(err, NetError::Io(ref e) if e.kind() == std::io::ErrorKind::ConnectionReset));
        assert!(reader.is_terminated());
    }
}
