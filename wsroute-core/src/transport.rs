//! Frame-level transport seam.
//!
//! The dispatcher never touches sockets directly. It reads frames through a
//! [`FrameReader`] and writes them through a [`FrameWriter`], which keeps
//! framing, ping/pong and the close handshake inside the websocket library.
//!
//! Two implementations ship with the crate:
//!
//! - the read and write halves of a `tokio-tungstenite` [`WebSocketStream`]
//! - [`memory`], a channel-backed pair for driving connections in tests

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

pub use tokio_tungstenite::tungstenite::Message as Frame;
pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Largest close reason that fits in a control frame alongside the code.
pub const MAX_CLOSE_REASON: usize = 123;

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` once the peer has gone away, whether or not it
    /// completed the close handshake.
    async fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Writes one frame and flushes it.
    async fn write_frame(&mut self, frame: Frame) -> Result<()>;

    /// Sends a close frame with `code` and `reason`.
    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()>;
}

/// Cuts `reason` down to [`MAX_CLOSE_REASON`] bytes on a character boundary.
pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[async_trait]
impl<S> FrameReader for SplitStream<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match self.next().await {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(
                WsError::ConnectionClosed
                | WsError::AlreadyClosed
                | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake),
            )) => Ok(None),
            Some(Err(e)) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<S> FrameWriter for SplitSink<WebSocketStream<S>, Frame>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.send(frame).await?;
        Ok(())
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code,
            reason: truncate_reason(reason).to_owned().into(),
        };
        self.send(Frame::Close(Some(frame))).await?;
        Ok(())
    }
}

/// Splits an accepted websocket into boxed transport halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (Box::new(stream), Box::new(sink))
}

/// In-memory transport.
///
/// [`pair`](memory::pair) returns the server-side halves plus a [`Peer`](memory::Peer)
/// playing the client. Dropping the peer makes further server writes fail,
/// which is how tests simulate a vanished client.
///
/// # Examples
///
/// ```
/// use wsroute_core::transport::{Frame, FrameReader, FrameWriter, memory};
///
/// # async fn example() -> wsroute_core::Result<()> {
/// let (mut reader, mut writer, mut peer) = memory::pair();
///
/// peer.send_text("ping");
/// assert_eq!(reader.read_frame().await?, Some(Frame::Text("ping".into())));
///
/// writer.write_frame(Frame::Text("pong".into())).await?;
/// assert_eq!(peer.recv_text().await.as_deref(), Some("pong"));
/// # Ok(())
/// # }
/// ```
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    /// Server-side read half.
    pub struct MemoryReader {
        inbound: mpsc::UnboundedReceiver<Frame>,
    }

    /// Server-side write half.
    pub struct MemoryWriter {
        outbound: mpsc::UnboundedSender<Frame>,
        closed: bool,
    }

    /// The client end of a [`pair`].
    pub struct Peer {
        outbound: Option<mpsc::UnboundedSender<Frame>>,
        inbound: mpsc::UnboundedReceiver<Frame>,
    }

    /// Creates a connected server/client pair.
    pub fn pair() -> (MemoryReader, MemoryWriter, Peer) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        (
            MemoryReader { inbound: server_rx },
            MemoryWriter {
                outbound: server_tx,
                closed: false,
            },
            Peer {
                outbound: Some(client_tx),
                inbound: client_rx,
            },
        )
    }

    #[async_trait]
    impl FrameReader for MemoryReader {
        async fn read_frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.inbound.recv().await)
        }
    }

    #[async_trait]
    impl FrameWriter for MemoryWriter {
        async fn write_frame(&mut self, frame: Frame) -> Result<()> {
            if self.closed {
                return Err(Error::ConnectionClosed("close frame already sent".into()));
            }
            self.outbound
                .send(frame)
                .map_err(|_| Error::ConnectionClosed("peer went away".into()))
        }

        async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
            let frame = CloseFrame {
                code,
                reason: truncate_reason(reason).to_owned().into(),
            };
            self.write_frame(Frame::Close(Some(frame))).await?;
            self.closed = true;
            Ok(())
        }
    }

    impl Peer {
        /// Sends a frame to the server. Ignored after [`hang_up`](Self::hang_up).
        pub fn send(&self, frame: Frame) {
            if let Some(tx) = &self.outbound {
                let _ = tx.send(frame);
            }
        }

        /// Sends a text frame to the server.
        pub fn send_text(&self, text: &str) {
            self.send(Frame::Text(text.to_string()));
        }

        /// Starts the close handshake from the client side.
        pub fn close(&self) {
            self.send(Frame::Close(None));
        }

        /// Drops the client's sending half, as if the socket vanished.
        pub fn hang_up(&mut self) {
            self.outbound = None;
        }

        /// Receives the next frame written by the server.
        pub async fn recv(&mut self) -> Option<Frame> {
            self.inbound.recv().await
        }

        /// Receives the next text frame, skipping any other frame kinds.
        ///
        /// Returns `None` if the server closes first.
        pub async fn recv_text(&mut self) -> Option<String> {
            loop {
                match self.inbound.recv().await? {
                    Frame::Text(text) => return Some(text),
                    Frame::Close(_) => return None,
                    _ => continue,
                }
            }
        }

        /// Waits for the server's close frame and returns its code and reason.
        pub async fn closed(&mut self) -> Option<(CloseCode, String)> {
            loop {
                match self.inbound.recv().await? {
                    Frame::Close(Some(frame)) => return Some((frame.code, frame.reason.into_owned())),
                    Frame::Close(None) => return Some((CloseCode::Status, String::new())),
                    _ => continue,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_reason_is_untouched() {
        assert_eq!(truncate_reason("bye"), "bye");
    }

    #[test]
    fn test_long_reason_is_cut_to_limit() {
        let reason = "x".repeat(500);
        assert_eq!(truncate_reason(&reason).len(), MAX_CLOSE_REASON);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let reason = "é".repeat(100);
        let cut = truncate_reason(&reason);
        assert!(cut.len() <= MAX_CLOSE_REASON);
        assert_eq!(cut.len() % 2, 0);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_memory_close_carries_code_and_reason() {
        let (_reader, mut writer, mut peer) = memory::pair();
        writer.close(CloseCode::Policy, "go away").await.unwrap();

        let (code, reason) = peer.closed().await.unwrap();
        assert_eq!(u16::from(code), 1008);
        assert_eq!(reason, "go away");

        let err = writer.write_frame(Frame::Text("late".into())).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_memory_write_fails_after_peer_drops() {
        let (_reader, mut writer, peer) = memory::pair();
        drop(peer);
        assert!(writer.write_frame(Frame::Text("x".into())).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_reader_ends_on_hang_up() {
        let (mut reader, _writer, mut peer) = memory::pair();
        peer.send_text("last");
        peer.hang_up();

        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::Text("last".into())));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }
}
