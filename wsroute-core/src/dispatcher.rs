//! Connection dispatch and the server loop.
//!
//! The [`Dispatcher`] takes each accepted websocket through a fixed
//! lifecycle:
//!
//! ```text
//! Resolving ──ok──> Active ──handler returns──> Closing ──> Closed
//!     │                                                       ^
//!     └──────── no route: close 1008 with reason ─────────────┘
//! ```
//!
//! - **Resolving**: the request path is matched against the [`Router`]. The
//!   query string is split off first and never takes part in matching.
//! - **Active**: the connection is added to the handler's registry, if it
//!   has one, and the handler runs.
//! - **Closing**: the connection is removed from the registry and the
//!   transport is closed.
//!
//! # Close Codes
//!
//! | Outcome | Code | Reason |
//! |---------|------|--------|
//! | No route matched | 1008 | `could not resolve the path <path>, tried [...]` |
//! | Handler returned `Ok` | 1000 | empty |
//! | Handler error, pipeline error, or panic | 1011 | the error text |
//!
//! Reasons are cut to the 123 bytes a close frame can carry.
//!
//! # Isolation
//!
//! Every connection runs on its own task. Resolution failures, handler errors
//! and handler panics end that connection only; the accept loop keeps going.
//!
//! # Examples
//!
//! ```no_run
//! use wsroute_core::{Dispatcher, Pipeline, Router, handler};
//!
//! #[tokio::main]
//! async fn main() -> wsroute_core::Result<()> {
//!     let router = Router::new().route(
//!         "/echo",
//!         handler(|mut ctx| async move {
//!             while let Some(msg) = ctx.recv().await? {
//!                 ctx.send(msg).await?;
//!             }
//!             Ok(())
//!         }),
//!     )?;
//!
//!     Dispatcher::new(router, Pipeline::empty())
//!         .listen("127.0.0.1:8765")
//!         .await
//! }
//! ```

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId, ConnectionInfo, ConnectionState, next_connection_id};
use crate::context::ConnectionContext;
use crate::error::Result;
use crate::middleware::{MiddlewareRegistry, Pipeline};
use crate::request::RequestTarget;
use crate::router::Router;
use crate::transport::{self, CloseCode, FrameReader, FrameWriter, truncate_reason};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

/// How a dispatched connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No route matched; closed with 1008 and `reason`.
    Unresolved {
        /// The request path.
        path: String,
        /// The close reason sent to the client, before truncation.
        reason: String,
    },
    /// The handler returned normally; closed with 1000.
    Completed {
        /// Connection id.
        id: ConnectionId,
    },
    /// The handler failed or panicked; closed with 1011.
    Failed {
        /// Connection id.
        id: ConnectionId,
        /// Error text, also used as the close reason.
        error: String,
    },
}

/// Routes accepted connections to handlers.
///
/// Owns the router and pipeline. Both are frozen once the dispatcher exists,
/// so no locking is needed while serving.
#[derive(Debug)]
pub struct Dispatcher {
    router: Arc<Router>,
    pipeline: Arc<Pipeline>,
}

impl Dispatcher {
    /// Creates a dispatcher from a finished router and pipeline.
    pub fn new(router: Router, pipeline: Pipeline) -> Self {
        Self {
            router: Arc::new(router),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Creates a dispatcher whose pipeline is built from `config.middleware`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMiddleware`](crate::Error::UnknownMiddleware) or
    /// [`Error::InvalidMiddleware`](crate::Error::InvalidMiddleware) if the
    /// configured stages cannot be built.
    pub fn from_config(router: Router, config: &ServerConfig) -> Result<Self> {
        let registry = MiddlewareRegistry::from_config(config);
        let pipeline = Pipeline::from_names(&config.middleware, &registry)?;
        info!(stages = ?pipeline.names(), "Built middleware pipeline");
        Ok(Self::new(router, pipeline))
    }

    /// The router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs one connection from resolution to close.
    ///
    /// `target` is the request target from the upgrade request, query string
    /// included. Never returns an error: every failure is reported through
    /// the outcome and the close frame.
    pub async fn dispatch(
        &self,
        reader: Box<dyn FrameReader>,
        writer: Box<dyn FrameWriter>,
        target: &str,
        peer: Option<SocketAddr>,
    ) -> DispatchOutcome {
        let RequestTarget { path, query } = RequestTarget::parse(target);
        let id = next_connection_id();
        let conn = Connection::new(
            ConnectionInfo::new(id.clone(), peer, path.as_str()),
            writer,
            self.pipeline.clone(),
        );
        debug!(conn_id = %id, %path, "Resolving connection");

        let resolution = match self.router.resolve(&path) {
            Ok(resolution) => resolution,
            Err(e) => {
                let reason = e.to_string();
                warn!(conn_id = %id, %path, "Could not resolve path");
                if let Err(close_err) = conn.close(CloseCode::Policy, &reason) {
                    debug!(conn_id = %id, error = %close_err, "Close after failed resolution did not complete");
                }
                conn.set_state(ConnectionState::Closed);
                return DispatchOutcome::Unresolved { path, reason };
            }
        };

        info!(conn_id = %id, %path, route = %resolution.pattern, "Connection opened");
        conn.set_state(ConnectionState::Active);

        let handler = resolution.handler;
        let registry = handler.registry().cloned();
        if let Some(registry) = &registry {
            registry.add(conn.clone());
        }

        let ctx = ConnectionContext::new(
            conn.clone(),
            resolution.params,
            query,
            reader,
            self.pipeline.clone(),
            Handle::current(),
        );
        let result = AssertUnwindSafe(handler.handle(ctx)).catch_unwind().await;

        conn.set_state(ConnectionState::Closing);
        if let Some(registry) = &registry {
            registry.remove(&id);
        }

        let (code, outcome) = match result {
            Ok(Ok(())) => (CloseCode::Normal, DispatchOutcome::Completed { id: id.clone() }),
            Ok(Err(e)) => {
                error!(conn_id = %id, error = %e, "Handler failed");
                let outcome = DispatchOutcome::Failed {
                    id: id.clone(),
                    error: e.to_string(),
                };
                (CloseCode::Error, outcome)
            }
            Err(panic) => {
                let error = format!("handler panicked: {}", panic_message(panic.as_ref()));
                error!(conn_id = %id, %error, "Handler panicked");
                (CloseCode::Error, DispatchOutcome::Failed { id: id.clone(), error })
            }
        };

        let reason = match &outcome {
            DispatchOutcome::Failed { error, .. } => truncate_reason(error),
            _ => "",
        };
        if let Err(e) = conn.close(code, reason) {
            debug!(conn_id = %id, error = %e, "Close did not complete");
        }
        conn.set_state(ConnectionState::Closed);
        info!(conn_id = %id, code = u16::from(code), "Connection closed");

        outcome
    }

    /// Binds `addr` and serves until the process exits.
    pub async fn listen(self, addr: impl AsRef<str>) -> Result<()> {
        let listener = TcpListener::bind(addr.as_ref()).await?;
        self.serve(listener).await
    }

    /// Serves connections from `listener` until the process exits.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serves connections from `listener` until `shutdown` completes.
    ///
    /// Connections already running are left to finish on their own tasks.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!(%local_addr, routes = ?self.router.patterns().collect::<Vec<_>>(), "WebSocket server listening");

        let dispatcher = Arc::new(self);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let dispatcher = Arc::clone(&dispatcher);
                            tokio::spawn(async move {
                                dispatcher.handle_stream(stream, peer_addr).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle_stream(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let mut target = None;
        let capture_target =
            |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                target = Some(req.uri().to_string());
                Ok(resp)
            };

        let ws = match accept_hdr_async(stream, capture_target).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(%peer_addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let target = target.unwrap_or_else(|| "/".to_string());
        let (reader, writer) = transport::split(ws);
        let outcome = self.dispatch(reader, writer, &target, Some(peer_addr)).await;
        debug!(%peer_addr, ?outcome, "Connection finished");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::handler::{BroadcastHandler, handler};
    use crate::middleware::{JsonCodec, MiddlewareChain};
    use crate::transport::memory::{self, Peer};
    use crate::transport::{Frame, MAX_CLOSE_REASON};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn echo() -> Arc<dyn crate::Handler> {
        handler(|mut ctx: ConnectionContext| async move {
            while let Some(msg) = ctx.recv().await? {
                ctx.send(msg).await?;
            }
            Ok(())
        })
    }

    fn connect(dispatcher: &Arc<Dispatcher>, target: &str) -> (JoinHandle<DispatchOutcome>, Peer) {
        let (reader, writer, peer) = memory::pair();
        let dispatcher = dispatcher.clone();
        let target = target.to_string();
        let task = tokio::spawn(async move {
            dispatcher
                .dispatch(Box::new(reader), Box::new(writer), &target, None)
                .await
        });
        (task, peer)
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_unresolved_path_closes_with_policy_code() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = invoked.clone();
        let router = Router::new()
            .route(
                "/chat/{room}",
                handler(move |_ctx: ConnectionContext| {
                    let flag = flag.clone();
                    async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (task, mut peer) = connect(&dispatcher, "/echo?x=1");
        let outcome = task.await.unwrap();

        let expected = r#"could not resolve the path /echo, tried ["/chat/{room}"]"#;
        assert_eq!(
            outcome,
            DispatchOutcome::Unresolved {
                path: "/echo".into(),
                reason: expected.into()
            }
        );

        let (code, reason) = peer.closed().await.unwrap();
        assert_eq!(u16::from(code), 1008);
        assert_eq!(reason, expected);
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unresolved_reason_is_truncated() {
        let mut router = Router::new();
        for i in 0..40 {
            router.register(&format!("/route{i}"), echo()).unwrap();
        }
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (task, mut peer) = connect(&dispatcher, "/missing");
        assert!(matches!(task.await.unwrap(), DispatchOutcome::Unresolved { .. }));

        let (code, reason) = peer.closed().await.unwrap();
        assert_eq!(code, CloseCode::Policy);
        assert_eq!(reason.len(), MAX_CLOSE_REASON);
        assert!(reason.starts_with("could not resolve the path /missing"));
    }

    #[tokio::test]
    async fn test_echo_round_trip_and_normal_close() {
        let router = Router::new().route("/echo", echo()).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (task, mut peer) = connect(&dispatcher, "/echo");
        peer.send_text("hello");
        assert_eq!(peer.recv_text().await.as_deref(), Some("hello"));

        peer.close();
        assert!(matches!(task.await.unwrap(), DispatchOutcome::Completed { .. }));
        let (code, _) = peer.closed().await.unwrap();
        assert_eq!(code, CloseCode::Normal);
    }

    #[tokio::test]
    async fn test_hang_up_completes_connection() {
        let router = Router::new().route("/echo", echo()).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (task, mut peer) = connect(&dispatcher, "/echo");
        peer.hang_up();
        assert!(matches!(task.await.unwrap(), DispatchOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_params_and_query_reach_handler() {
        let router = Router::new()
            .route(
                "/chat/{room}",
                handler(|ctx: ConnectionContext| async move {
                    let room = ctx.param("room").unwrap_or_default();
                    let nick = ctx.query_param("nick").unwrap_or_default();
                    ctx.send(format!("{nick}@{room}")).await
                }),
            )
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (task, mut peer) = connect(&dispatcher, "/chat/lobby/?nick=fred");
        assert_eq!(peer.recv_text().await.as_deref(), Some("fred@lobby"));
        assert!(matches!(task.await.unwrap(), DispatchOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_handler_sees_active_state() {
        let router = Router::new()
            .route(
                "/state",
                handler(|ctx: ConnectionContext| async move {
                    let state = ctx.connection().state();
                    ctx.send(format!("{state:?}")).await
                }),
            )
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (task, mut peer) = connect(&dispatcher, "/state");
        assert_eq!(peer.recv_text().await.as_deref(), Some("Active"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_closes_only_that_connection() {
        let router = Router::new()
            .route(
                "/fail",
                handler(|_ctx: ConnectionContext| async { Err(Error::handler("boom")) }),
            )
            .unwrap()
            .route("/echo", echo())
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (survivor, mut survivor_peer) = connect(&dispatcher, "/echo");
        let (failing, mut failing_peer) = connect(&dispatcher, "/fail");

        match failing.await.unwrap() {
            DispatchOutcome::Failed { error, .. } => assert_eq!(error, "Handler error: boom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let (code, reason) = failing_peer.closed().await.unwrap();
        assert_eq!(code, CloseCode::Error);
        assert_eq!(reason, "Handler error: boom");

        survivor_peer.send_text("still here");
        assert_eq!(survivor_peer.recv_text().await.as_deref(), Some("still here"));
        survivor_peer.close();
        assert!(matches!(survivor.await.unwrap(), DispatchOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_pipeline_error_fails_connection() {
        let router = Router::new().route("/echo", echo()).unwrap();
        let pipeline = MiddlewareChain::new().layer(JsonCodec::new()).build().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, pipeline));

        let (task, mut peer) = connect(&dispatcher, "/echo");
        peer.send_text(r#"{"ok":true}"#);
        assert_eq!(peer.recv_text().await.as_deref(), Some(r#"{"ok":true}"#));

        peer.send_text("{broken");
        match task.await.unwrap() {
            DispatchOutcome::Failed { error, .. } => assert!(error.starts_with("middleware `json` failed on recv")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let (code, _) = peer.closed().await.unwrap();
        assert_eq!(code, CloseCode::Error);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_and_deregistered() {
        let room = BroadcastHandler::new();
        let members = room.clone();
        let router = Router::new()
            .route(
                "/panic",
                handler(|_ctx: ConnectionContext| async {
                    panic!("kaboom");
                }),
            )
            .unwrap()
            .route("/room", room)
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (task, mut peer) = connect(&dispatcher, "/panic");
        match task.await.unwrap() {
            DispatchOutcome::Failed { error, .. } => assert_eq!(error, "handler panicked: kaboom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let (code, _) = peer.closed().await.unwrap();
        assert_eq!(code, CloseCode::Error);

        let (task, peer) = connect(&dispatcher, "/room");
        wait_until(|| members.members().count() == 1).await;
        peer.close();
        task.await.unwrap();
        assert_eq!(members.members().count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_room_fans_out_and_deregisters() {
        let room = BroadcastHandler::new();
        let members = room.clone();
        let router = Router::new().route("/chatroom", room).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(router, Pipeline::empty()));

        let (task_a, mut peer_a) = connect(&dispatcher, "/chatroom");
        let (task_b, mut peer_b) = connect(&dispatcher, "/chatroom");
        wait_until(|| members.members().count() == 2).await;

        peer_a.send_text("hi all");
        assert_eq!(peer_a.recv_text().await.as_deref(), Some("hi all"));
        assert_eq!(peer_b.recv_text().await.as_deref(), Some("hi all"));

        peer_a.close();
        task_a.await.unwrap();
        assert_eq!(members.members().count(), 1);

        peer_b.close();
        task_b.await.unwrap();
        assert!(members.members().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_builds_pipeline() {
        let config = ServerConfig::from_toml(r#"middleware = ["logger", "json"]"#).unwrap();
        let router = Router::new().route("/echo", echo()).unwrap();
        let dispatcher = Dispatcher::from_config(router, &config).unwrap();
        assert_eq!(dispatcher.pipeline().names(), ["logger", "json"]);

        let bad = ServerConfig::from_toml(r#"middleware = ["auth"]"#).unwrap();
        let err = Dispatcher::from_config(Router::new(), &bad).unwrap_err();
        assert!(matches!(err, Error::UnknownMiddleware(ref name) if name == "auth"));
    }

    #[tokio::test]
    async fn test_server_end_to_end() {
        let router = Router::new()
            .route("/echo", echo())
            .unwrap()
            .route(
                "/hello/{name}",
                handler(|ctx: ConnectionContext| async move {
                    let name = ctx.param("name").unwrap_or_default().to_string();
                    ctx.send(json!({"hello": name})).await
                }),
            )
            .unwrap();
        let pipeline = MiddlewareChain::new().layer(JsonCodec::new()).build().unwrap();
        let dispatcher = Dispatcher::new(router, pipeline);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(dispatcher.serve_with_shutdown(listener, async {
            let _ = stop_rx.await;
        }));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/echo"))
            .await
            .unwrap();
        ws.send(Frame::Text(r#"{"n":1}"#.into())).await.unwrap();
        assert_eq!(ws.next().await.unwrap().unwrap(), Frame::Text(r#"{"n":1}"#.into()));
        ws.close(None).await.unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/hello/fred?x=1"))
            .await
            .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(value, json!({"hello": "fred"}));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/nowhere"))
            .await
            .unwrap();
        match ws.next().await.unwrap().unwrap() {
            Frame::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Policy);
                assert!(frame.reason.contains("/nowhere"));
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[test]
    fn test_panic_message_variants() {
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(borrowed.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
