//! Per-connection context handed to handlers.

use crate::connection::{Connection, ConnectionId};
use crate::error::Result;
use crate::matcher::Params;
use crate::message::Message;
use crate::middleware::{Direction, Pipeline};
use crate::request::Query;
use crate::transport::{Frame, FrameReader};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::debug;

/// Everything a handler gets for one connection.
///
/// Created by the dispatcher once the path has resolved, and dropped when
/// the handler returns. It owns the read half of the transport, so only the
/// handler can receive; sending goes through the shareable
/// [`Connection`] handle.
///
/// # Examples
///
/// ```
/// use wsroute_core::{ConnectionContext, Result};
///
/// async fn greet(mut ctx: ConnectionContext) -> Result<()> {
///     let room = ctx.param("room").unwrap_or("lobby").to_string();
///     ctx.send(format!("welcome to {room}")).await?;
///
///     while let Some(msg) = ctx.recv().await? {
///         ctx.send(msg).await?;
///     }
///     Ok(())
/// }
/// ```
pub struct ConnectionContext {
    connection: Connection,
    params: Params,
    query: Query,
    reader: Mutex<Box<dyn FrameReader>>,
    pipeline: Arc<Pipeline>,
    runtime: Handle,
}

impl ConnectionContext {
    pub(crate) fn new(
        connection: Connection,
        params: Params,
        query: Query,
        reader: Box<dyn FrameReader>,
        pipeline: Arc<Pipeline>,
        runtime: Handle,
    ) -> Self {
        Self {
            connection,
            params,
            query,
            reader: Mutex::new(reader),
            pipeline,
            runtime,
        }
    }

    /// The connection handle. Clone it to send from other tasks.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The connection id.
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// A value captured from the request path.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All values captured from the request path.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Decoded query parameters.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// A single query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Handle to the runtime driving this connection.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Receives the next message, after the recv side of the pipeline.
    ///
    /// Control frames are skipped. Returns `Ok(None)` once the peer has
    /// closed, which is the normal way for a receive loop to end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pipeline`](crate::Error::Pipeline) if a recv stage
    /// rejects the message, or a transport error.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            let frame = match self.reader.get_mut().read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(conn_id = %self.id(), "Peer went away");
                    self.connection.mark_closed();
                    return Ok(None);
                }
                Err(e) => {
                    self.connection.mark_closed();
                    return Err(e);
                }
            };

            if let Frame::Close(frame) = &frame {
                debug!(conn_id = %self.id(), ?frame, "Peer sent close");
                self.connection.mark_closed();
                return Ok(None);
            }

            if let Some(message) = Message::from_frame(frame) {
                let message = self.pipeline.run(message, Direction::Recv).await?;
                return Ok(Some(message));
            }
        }
    }

    /// Sends a message. See [`Connection::send`].
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.connection.send(message).await
    }

    /// Serializes and sends `data`. See [`Connection::send_json`].
    pub async fn send_json<T: Serialize>(&self, data: &T) -> Result<()> {
        self.connection.send_json(data).await
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("connection", &self.connection)
            .field("params", &self.params)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::connection::{ConnectionInfo, next_connection_id};
    use crate::middleware::{JsonCodec, MiddlewareChain};
    use crate::transport::memory::{self, Peer};
    use serde_json::json;

    fn context(pipeline: Pipeline, params: Params, query: Query) -> (ConnectionContext, Peer) {
        let (reader, writer, peer) = memory::pair();
        let pipeline = Arc::new(pipeline);
        let info = ConnectionInfo::new(next_connection_id(), None, "/test");
        let conn = Connection::new(info, Box::new(writer), pipeline.clone());
        let ctx = ConnectionContext::new(conn, params, query, Box::new(reader), pipeline, Handle::current());
        (ctx, peer)
    }

    #[tokio::test]
    async fn test_recv_skips_control_frames() {
        let (mut ctx, peer) = context(Pipeline::empty(), Params::new(), Query::new());
        peer.send(Frame::Ping(vec![1]));
        peer.send_text("hello");

        assert_eq!(ctx.recv().await.unwrap(), Some(Message::text("hello")));
    }

    #[tokio::test]
    async fn test_close_frame_ends_loop() {
        let (mut ctx, peer) = context(Pipeline::empty(), Params::new(), Query::new());
        peer.close();

        assert_eq!(ctx.recv().await.unwrap(), None);
        assert!(!ctx.connection().is_open());
    }

    #[tokio::test]
    async fn test_hang_up_ends_loop() {
        let (mut ctx, mut peer) = context(Pipeline::empty(), Params::new(), Query::new());
        peer.hang_up();
        assert_eq!(ctx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recv_and_send_run_pipeline() {
        let pipeline = MiddlewareChain::new().layer(JsonCodec::new()).build().unwrap();
        let (mut ctx, mut peer) = context(pipeline, Params::new(), Query::new());

        peer.send_text(r#"{"n":1}"#);
        let msg = ctx.recv().await.unwrap().unwrap();
        assert_eq!(msg, Message::json(json!({"n": 1})));

        ctx.send(json!({"n": 2})).await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some(r#"{"n":2}"#));
    }

    #[tokio::test]
    async fn test_recv_surfaces_pipeline_error() {
        let pipeline = MiddlewareChain::new().layer(JsonCodec::new()).build().unwrap();
        let (mut ctx, peer) = context(pipeline, Params::new(), Query::new());

        peer.send_text("not json");
        let err = ctx.recv().await.unwrap_err();
        assert!(matches!(err, Error::Pipeline { ref stage, .. } if stage == "json"));
    }

    #[tokio::test]
    async fn test_params_and_query_accessors() {
        let params = Params::from([("room".to_string(), "lobby".to_string())]);
        let query = Query::from([("nick".to_string(), "fred".to_string())]);
        let (ctx, _peer) = context(Pipeline::empty(), params, query);

        assert_eq!(ctx.param("room"), Some("lobby"));
        assert_eq!(ctx.param("missing"), None);
        assert_eq!(ctx.query_param("nick"), Some("fred"));
        assert!(ctx.id().starts_with("conn_"));
    }
}
