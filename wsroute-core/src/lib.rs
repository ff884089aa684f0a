//! # wsroute-core
//!
//! Core dispatch layer for the wsroute WebSocket framework.
//!
//! wsroute routes each incoming websocket connection, once, by its request
//! path, then hands it to a long-lived handler. Every message in either
//! direction flows through an ordered, bidirectional middleware pipeline.
//!
//! ## Building Blocks
//!
//! - [`PathMatcher`] - compiles route patterns such as `/chat/{room}`
//! - [`Router`] - ordered, first-match-wins table of patterns and handlers
//! - [`Pipeline`] - recv runs stages in order, send runs them in reverse
//! - [`Dispatcher`] - drives each connection from resolution to close
//! - [`ConnectionRegistry`] - concurrent membership for broadcast handlers
//!
//! ## Quick Start
//!
//! ```no_run
//! use wsroute_core::prelude::*;
//!
//! async fn echo(mut ctx: ConnectionContext) -> Result<()> {
//!     while let Some(msg) = ctx.recv().await? {
//!         ctx.send(msg).await?;
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let router = Router::new()
//!         .route("/echo", handler(echo))?
//!         .route("/chatroom", BroadcastHandler::new())?;
//!
//!     let pipeline = MiddlewareChain::new()
//!         .layer(LoggerMiddleware::new())
//!         .layer(JsonCodec::new())
//!         .build()?;
//!
//!     Dispatcher::new(router, pipeline).listen("127.0.0.1:8765").await
//! }
//! ```
//!
//! ## Route Patterns
//!
//! | Pattern | Matches | Captures |
//! |---------|---------|----------|
//! | `/` | `/` only | none |
//! | `/echo` | `/echo`, `/echo/` | none |
//! | `/chat/{room}` | `/chat/lobby` | `room = "lobby"` |
//! | `/api/{obj}/{pk:\d+}/` | `/api/items/42/` | `obj`, `pk` |
//!
//! The first segment must be a literal. See [`matcher`] for the full grammar.
//!
//! ## Configuration
//!
//! [`ServerConfig`] reads the bind address and the ordered middleware list
//! from TOML; [`Dispatcher::from_config`] turns it into a running pipeline.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod matcher;
pub mod message;
pub mod middleware;
pub mod request;
pub mod router;
pub mod transport;

pub use config::{AuthConfig, ServerConfig};
pub use connection::{
    BroadcastReport, Connection, ConnectionId, ConnectionInfo, ConnectionRegistry, ConnectionState,
    next_connection_id,
};
pub use context::ConnectionContext;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{Error, Result};
pub use handler::{BroadcastHandler, Handler, HandlerService, handler};
pub use matcher::{Params, PathMatcher};
pub use message::{Message, MessageType};
pub use middleware::{
    AuthMiddleware, Direction, Directions, FnMiddleware, JsonCodec, JwtVerifier, LogLevel,
    LoggerMiddleware, Middleware, MiddlewareChain, MiddlewareRegistry, Pipeline, TokenVerifier,
};
pub use request::{Query, RequestTarget};
pub use router::{Resolution, Route, Router};

/// Commonly used types.
///
/// ```
/// use wsroute_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::connection::{Connection, ConnectionId, ConnectionRegistry, ConnectionState};
    pub use crate::context::ConnectionContext;
    pub use crate::dispatcher::{DispatchOutcome, Dispatcher};
    pub use crate::error::{Error, Result};
    pub use crate::handler::{BroadcastHandler, Handler, handler};
    pub use crate::message::{Message, MessageType};
    pub use crate::middleware::{
        AuthMiddleware, Direction, Directions, FnMiddleware, JsonCodec, JwtVerifier, LogLevel,
        LoggerMiddleware, Middleware, MiddlewareChain, MiddlewareRegistry, Pipeline,
    };
    pub use crate::router::Router;
}
