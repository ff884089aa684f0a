//! # wsroute
//!
//! Path-routed WebSocket servers with a bidirectional middleware pipeline.
//!
//! This crate re-exports [`wsroute_core`] and, with the `schema` feature
//! (on by default), the message schemas from `wsroute-schema` as
//! [`schema`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use wsroute::prelude::*;
//!
//! async fn greet(mut ctx: ConnectionContext) -> Result<()> {
//!     let name = ctx.param("name").unwrap_or("stranger").to_string();
//!     ctx.send(format!("hello {name}")).await?;
//!     while let Some(msg) = ctx.recv().await? {
//!         ctx.send(msg).await?;
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let router = Router::new()
//!         .route("/hello/{name}", handler(greet))?
//!         .route("/chatroom", BroadcastHandler::new())?;
//!
//!     let pipeline = MiddlewareChain::new().layer(JsonCodec::new()).build()?;
//!
//!     Dispatcher::new(router, pipeline).listen("127.0.0.1:8765").await
//! }
//! ```
//!
//! ## Features
//!
//! - `schema` (default): message schemas and field validation
//! - `full`: everything

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use wsroute_core::*;

#[cfg(feature = "schema")]
#[cfg_attr(docsrs, doc(cfg(feature = "schema")))]
pub use wsroute_schema as schema;

/// Commonly used types.
pub mod prelude {
    pub use wsroute_core::prelude::*;

    #[cfg(feature = "schema")]
    pub use wsroute_schema::{Field, MessageSchema, SchemaError};
}
