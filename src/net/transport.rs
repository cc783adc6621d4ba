//! Transport module
//!
//! Wraps a byte stream and turns it into inbound frames according to the
//! configured wire mode:
//! - Legacy: every successful read is one candidate frame
//! - Framed: reads feed a [`FrameDecoder`] until a whole frame is available
//!
//! The transport is generic over the stream so the session loop can run over a
//! `TcpStream` in production and over scripted mocks in tests.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::WireMode;
use crate::error::{LinewireError, NetworkError, ProtocolError, Result};
use crate::net::buffer::{encode_frame, FrameDecoder, FrameTag};

/// A unit of input handed to the frame handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Legacy mode: raw bytes of one read, mode unknown
    Raw(Vec<u8>),
    /// Framed mode: a complete tagged frame
    Tagged { tag: FrameTag, payload: Bytes },
    /// Framed mode: a frame that could not be decoded
    Invalid(ProtocolError),
}

/// Stream transport for one connection
pub struct Transport<S> {
    stream: S,
    wire_mode: WireMode,
    read_buf: Vec<u8>,
    decoder: FrameDecoder,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        wire_mode: WireMode,
        read_buffer_size: usize,
        max_frame_size: usize,
    ) -> Self {
        Self {
            stream,
            wire_mode,
            read_buf: vec![0u8; read_buffer_size.max(1)],
            decoder: FrameDecoder::new(max_frame_size),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on clean end of stream.
    pub async fn read_frame(&mut self) -> Result<Option<InboundFrame>> {
        match self.wire_mode {
            WireMode::Legacy => {
                let n = self.read_some().await?;
                if n == 0 {
                    return Ok(None);
                }
                trace!(bytes = n, "Read legacy frame");
                Ok(Some(InboundFrame::Raw(self.read_buf[..n].to_vec())))
            }
            WireMode::Framed => loop {
                if let Some(decoded) = self.decoder.next_frame() {
                    return Ok(Some(match decoded {
                        Ok(frame) => InboundFrame::Tagged {
                            tag: frame.tag,
                            payload: frame.payload,
                        },
                        Err(e) => InboundFrame::Invalid(e),
                    }));
                }

                let n = self.read_some().await?;
                if n == 0 {
                    if self.decoder.has_partial() {
                        debug!(
                            buffered = self.decoder.buffered(),
                            "Stream ended inside a frame"
                        );
                    }
                    return Ok(None);
                }
                trace!(bytes = n, "Read framed bytes");
                self.decoder.extend(&self.read_buf[..n]);
            },
        }
    }

    /// Write one outbound frame and flush it
    pub async fn write_frame(&mut self, tag: FrameTag, payload: &[u8]) -> Result<()> {
        match self.wire_mode {
            WireMode::Legacy => self.write_all(payload).await?,
            WireMode::Framed => {
                let encoded = encode_frame(tag, payload);
                self.write_all(&encoded).await?
            }
        }
        self.stream
            .flush()
            .await
            .map_err(|e| LinewireError::Network(NetworkError::WriteError(e.to_string())))
    }

    /// Shutdown the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| LinewireError::Network(NetworkError::WriteError(e.to_string())))
    }

    async fn read_some(&mut self) -> Result<usize> {
        self.stream
            .read(&mut self.read_buf)
            .await
            .map_err(|e| LinewireError::Network(NetworkError::ReadError(e.to_string())))
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream
            .write_all(buf)
            .await
            .map_err(|e| LinewireError::Network(NetworkError::WriteError(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_legacy_read_is_one_frame() {
        let mock = Builder::new().read(b"PING").read(b"ECHO|a").build();
        let mut transport = Transport::new(mock, WireMode::Legacy, 4096, 65536);

        assert_eq!(
            transport.read_frame().await.unwrap(),
            Some(InboundFrame::Raw(b"PING".to_vec()))
        );
        assert_eq!(
            transport.read_frame().await.unwrap(),
            Some(InboundFrame::Raw(b"ECHO|a".to_vec()))
        );
        assert_eq!(transport.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_legacy_read_truncates_to_buffer() {
        let mock = Builder::new().read(b"ABCDEFGH").build();
        let mut transport = Transport::new(mock, WireMode::Legacy, 4, 65536);

        assert_eq!(
            transport.read_frame().await.unwrap(),
            Some(InboundFrame::Raw(b"ABCD".to_vec()))
        );
        assert_eq!(
            transport.read_frame().await.unwrap(),
            Some(InboundFrame::Raw(b"EFGH".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_framed_read_across_reads() {
        let wire = encode_frame(FrameTag::Plaintext, b"PING");
        let mock = Builder::new().read(&wire[..3]).read(&wire[3..]).build();
        let mut transport = Transport::new(mock, WireMode::Framed, 4096, 65536);

        assert_eq!(
            transport.read_frame().await.unwrap(),
            Some(InboundFrame::Tagged {
                tag: FrameTag::Plaintext,
                payload: Bytes::from_static(b"PING"),
            })
        );
        assert_eq!(transport.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_framed_invalid_frame() {
        let mock = Builder::new().read(&[0, 0, 0, 0]).build();
        let mut transport = Transport::new(mock, WireMode::Framed, 4096, 65536);

        assert_eq!(
            transport.read_frame().await.unwrap(),
            Some(InboundFrame::Invalid(ProtocolError::EmptyFrame))
        );
    }

    #[tokio::test]
    async fn test_write_frame_modes() {
        let mock = Builder::new().write(b"PONG\n").build();
        let mut transport = Transport::new(mock, WireMode::Legacy, 4096, 65536);
        transport.write_frame(FrameTag::Plaintext, b"PONG\n").await.unwrap();

        let expected = encode_frame(FrameTag::Plaintext, b"PONG\n");
        let mock = Builder::new().write(&expected).build();
        let mut transport = Transport::new(mock, WireMode::Framed, 4096, 65536);
        transport.write_frame(FrameTag::Plaintext, b"PONG\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_error_maps_to_network_error() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut transport = Transport::new(mock, WireMode::Legacy, 4096, 65536);

        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            LinewireError::Network(NetworkError::ReadError(_))
        ));
    }
}
