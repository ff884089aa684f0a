//! Path routing for incoming connections.
//!
//! The [`Router`] maps the request path of a new connection to the handler
//! that will own it. It is consulted exactly once per connection, before the
//! handler runs.
//!
//! # Resolution Order
//!
//! Routes are kept in registration order and resolution is first-match-wins.
//! There is no specificity ranking: if `/chat/{room}` is registered before
//! `/chat/admin`, a connection to `/chat/admin` lands on the room handler.
//!
//! # Re-registration
//!
//! Routes are keyed by their pattern string exactly as registered. Registering
//! the same pattern again replaces the handler in place and keeps the route's
//! original position.
//!
//! ```text
//! register("/a", h1)   -> ["/a" => h1]
//! register("/b", h2)   -> ["/a" => h1, "/b" => h2]
//! register("/a", h3)   -> ["/a" => h3, "/b" => h2]
//! ```
//!
//! # Examples
//!
//! ```
//! use wsroute_core::{Router, handler};
//!
//! let router = Router::new()
//!     .route("/chat/{room}", handler(|_ctx| async { Ok(()) }))
//!     .unwrap()
//!     .route("/echo", handler(|_ctx| async { Ok(()) }))
//!     .unwrap();
//!
//! let resolved = router.resolve("/chat/lobby/").unwrap();
//! assert_eq!(resolved.pattern, "/chat/{room}");
//! assert_eq!(resolved.params["room"], "lobby");
//!
//! assert!(router.resolve("/nowhere").is_err());
//! ```

use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::matcher::{Params, PathMatcher};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A registered route: its pattern key, compiled matcher, and handler.
pub struct Route {
    /// The pattern string exactly as registered.
    pub pattern: String,
    /// The compiled form of `pattern`.
    pub matcher: PathMatcher,
    /// The handler that owns connections on this route.
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// The outcome of a successful [`Router::resolve`].
#[derive(Clone)]
pub struct Resolution {
    /// The pattern key of the matching route.
    pub pattern: String,
    /// Values captured from named segments.
    pub params: Params,
    /// The route's handler.
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Ordered collection of routes.
///
/// Build it during application setup, then hand it to a
/// [`Dispatcher`](crate::Dispatcher). The dispatcher takes ownership, which
/// closes registration before serving begins.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `handler` under `pattern`.
    ///
    /// If `pattern` is already registered, its handler is replaced and the
    /// route keeps its position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] if the pattern does not compile. The router
    /// is left unchanged.
    pub fn register(&mut self, pattern: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let matcher = PathMatcher::compile(pattern)?;

        if let Some(existing) = self.routes.iter_mut().find(|r| r.pattern == pattern) {
            debug!(pattern, "Replacing handler for existing route");
            existing.matcher = matcher;
            existing.handler = handler;
            return Ok(());
        }

        debug!(pattern, position = self.routes.len(), "Registered route");
        self.routes.push(Route {
            pattern: pattern.to_string(),
            matcher,
            handler,
        });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn route(mut self, pattern: &str, handler: Arc<dyn Handler>) -> Result<Self> {
        self.register(pattern, handler)?;
        Ok(self)
    }

    /// Resolves `path` against the routes in registration order.
    ///
    /// `path` must not include the query string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] carrying `path` and every registered
    /// pattern key when nothing matches.
    pub fn resolve(&self, path: &str) -> Result<Resolution> {
        for route in &self.routes {
            if let Some(params) = route.matcher.matches(path) {
                return Ok(Resolution {
                    pattern: route.pattern.clone(),
                    params,
                    handler: route.handler.clone(),
                });
            }
        }

        Err(Error::Resolution {
            path: path.to_string(),
            patterns: self.patterns().map(str::to_string).collect(),
        })
    }

    /// Registered pattern keys, in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.pattern.as_str())
    }

    /// Registered routes, in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.patterns()).finish()
    }
}
