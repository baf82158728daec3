//! Byte-stream transport
//!
//! Carries framed envelopes over any `AsyncRead`/`AsyncWrite` pair. The
//! daemon uses it over stdin/stdout; tests use `tokio::io::duplex`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::{FrameDecoder, FrameEncoder};
use super::{Transport, TransportError};
use crate::messages::RawEnvelope;

/// Read buffer size
const READ_CHUNK: usize = 8192;

/// Framed transport over a reader/writer pair
#[derive(Debug)]
pub struct StreamTransport<R, W> {
    reader: R,
    writer: W,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a reader and writer
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            encoder: FrameEncoder::new(),
            decoder: FrameDecoder::new(),
        }
    }
}

impl StreamTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Transport over the process's stdin and stdout
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, envelope: RawEnvelope) -> Result<(), TransportError> {
        let frame = self.encoder.encode(&envelope)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<RawEnvelope, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(envelope) = self.decoder.decode()? {
                return Ok(envelope);
            }
            // A single read is cancel-safe: bytes are only consumed once it
            // completes, and they go straight into the decoder.
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed);
            }
            self.decoder.push(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Envelope, MessageType, RequestId};
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    type Half = StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn connected() -> (Half, Half) {
        let (a, b) = duplex(64);
        let (a_read, a_write) = split(a);
        let (b_read, b_write) = split(b);
        (
            StreamTransport::new(a_read, a_write),
            StreamTransport::new(b_read, b_write),
        )
    }

    #[tokio::test]
    async fn test_round_trip_over_small_pipe() {
        let (mut host, mut surface) = connected();
        let envelope: RawEnvelope = Envelope::new(MessageType::StreamChunk)
            .with_request_id(RequestId::from("req_9"))
            .into();
        let mut sent = envelope.clone();
        sent.payload = serde_json::json!({ "text": "x".repeat(500) });

        let expected = sent.clone();
        let writer = tokio::spawn(async move {
            host.send(sent).await.unwrap();
            host
        });

        let received = surface.recv().await.unwrap();
        assert_eq!(received, expected);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_type_tag_passes_through() {
        let (mut host, mut surface) = connected();
        let raw = RawEnvelope {
            kind: "fromTheFuture".to_string(),
            payload: serde_json::Value::Null,
            request_id: None,
        };

        host.send(raw.clone()).await.unwrap();
        assert_eq!(surface.recv().await.unwrap(), raw);
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (host, mut surface) = connected();
        drop(host);

        assert!(matches!(
            surface.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
