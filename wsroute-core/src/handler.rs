//! Connection handlers.
//!
//! A handler owns a connection from the moment its route resolves until the
//! connection closes. It is invoked once per connection with a
//! [`ConnectionContext`], and usually runs a receive loop:
//!
//! ```
//! use wsroute_core::{ConnectionContext, Result, handler};
//!
//! async fn echo(mut ctx: ConnectionContext) -> Result<()> {
//!     while let Some(msg) = ctx.recv().await? {
//!         ctx.send(msg).await?;
//!     }
//!     Ok(())
//! }
//!
//! let echo = handler(echo);
//! ```
//!
//! # Returning
//!
//! - `Ok(())` ends the connection normally (close code 1000)
//! - `Err(_)` or a panic ends only this connection (close code 1011); other
//!   connections, and the accept loop, keep running
//!
//! # Shared Handlers
//!
//! One handler value serves every connection on its route, so a handler that
//! tracks clients keeps them in a [`ConnectionRegistry`] and exposes it
//! through [`Handler::registry`]. The dispatcher adds each connection before
//! the handler runs and removes it afterwards, whatever the outcome.
//! [`BroadcastHandler`] is the ready-made chatroom version.

use crate::connection::ConnectionRegistry;
use crate::context::ConnectionContext;
use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Application logic for the connections on one route.
///
/// Implement this directly for handlers with state; wrap plain async
/// functions with [`handler()`].
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use wsroute_core::{ConnectionContext, ConnectionRegistry, Handler, Result};
///
/// #[derive(Default)]
/// struct Presence {
///     online: ConnectionRegistry,
/// }
///
/// #[async_trait]
/// impl Handler for Presence {
///     async fn handle(&self, mut ctx: ConnectionContext) -> Result<()> {
///         ctx.send(format!("{} online", self.online.count())).await?;
///         while ctx.recv().await?.is_some() {}
///         Ok(())
///     }
///
///     fn registry(&self) -> Option<&ConnectionRegistry> {
///         Some(&self.online)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Drives one connection until it should close.
    async fn handle(&self, ctx: ConnectionContext) -> Result<()>;

    /// The registry the dispatcher keeps this handler's connections in.
    ///
    /// Single-client handlers keep the default `None`.
    fn registry(&self) -> Option<&ConnectionRegistry> {
        None
    }
}

/// Adapts an async function into a [`Handler`].
///
/// You typically don't construct this directly; use [`handler()`] instead.
pub struct HandlerService<F> {
    handler: F,
}

impl<F> HandlerService<F> {
    /// Wraps `handler`.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerService<F>
where
    F: Fn(ConnectionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: ConnectionContext) -> Result<()> {
        (self.handler)(ctx).await
    }
}

/// Turns an async function into a shared handler reference.
///
/// The result is what [`Router::register`](crate::Router::register) takes.
pub fn handler<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(ConnectionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(HandlerService::new(f))
}

/// Fans every inbound message out to all connections on the route,
/// including the sender.
///
/// Each recipient's copy goes through the send side of the pipeline on its
/// own connection. Recipients that turn out to be closed are pruned.
///
/// # Examples
///
/// ```
/// use wsroute_core::{BroadcastHandler, Router};
///
/// let room = BroadcastHandler::new();
/// let router = Router::new().route("/chatroom", room.clone()).unwrap();
/// assert_eq!(room.members().count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct BroadcastHandler {
    members: ConnectionRegistry,
}

impl BroadcastHandler {
    /// Creates a handler with an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The connections currently in the room.
    pub fn members(&self) -> &ConnectionRegistry {
        &self.members
    }
}

#[async_trait]
impl Handler for BroadcastHandler {
    async fn handle(&self, mut ctx: ConnectionContext) -> Result<()> {
        debug!(conn_id = %ctx.id(), members = self.members.count(), "Joined broadcast");

        while let Some(message) = ctx.recv().await? {
            let report = self.members.broadcast(message).await;
            debug!(
                conn_id = %ctx.id(),
                delivered = report.delivered,
                pruned = report.pruned,
                "Distributed message"
            );
        }
        Ok(())
    }

    fn registry(&self) -> Option<&ConnectionRegistry> {
        Some(&self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_fn_handler_has_no_registry() {
        let h = handler(|_ctx: ConnectionContext| async { Ok(()) });
        assert!(h.registry().is_none());
    }

    #[test]
    fn test_fn_handler_may_fail() {
        let h = handler(|_ctx: ConnectionContext| async { Err(Error::handler("nope")) });
        assert!(h.registry().is_none());
    }

    #[test]
    fn test_broadcast_handler_exposes_registry() {
        let room = BroadcastHandler::new();
        let as_handler: Arc<dyn Handler> = room.clone();
        let registry = as_handler.registry().unwrap();
        assert_eq!(registry.count(), room.members().count());
    }
}
