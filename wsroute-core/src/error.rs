//! Error types and result handling for wsroute.
//!
//! A single [`Error`] enum covers every failure the dispatch layer can raise,
//! from a malformed route pattern at startup to a middleware stage rejecting a
//! message halfway through a connection.
//!
//! # Error Scopes
//!
//! Errors fall into two scopes, and the scope decides who is allowed to stop:
//!
//! - **Startup errors** abort application setup: [`Error::Syntax`] from route
//!   registration, [`Error::InvalidMiddleware`] and [`Error::UnknownMiddleware`]
//!   from pipeline construction, and [`Error::Config`].
//! - **Connection errors** stay with the connection that produced them:
//!   [`Error::Resolution`], [`Error::Pipeline`], [`Error::ConnectionClosed`],
//!   [`Error::Handler`] and the transport variants. The dispatcher closes the
//!   affected connection and keeps serving everyone else.
//!
//! # Examples
//!
//! ```
//! use wsroute_core::{Error, Router};
//!
//! let mut router = Router::new();
//! let err = router
//!     .register("/{room}", wsroute_core::handler(|_ctx| async { Ok(()) }))
//!     .unwrap_err();
//!
//! assert!(matches!(err, Error::Syntax { .. }));
//! ```

use crate::middleware::Direction;
use std::fmt;
use thiserror::Error;

/// The main error type for wsroute operations.
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket protocol error reported by the transport.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error, usually from binding or accepting on a listener.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A route pattern does not follow the pattern grammar.
    ///
    /// Raised by [`Router::register`](crate::Router::register) and never
    /// deferred to request time.
    #[error("invalid route pattern {pattern:?}: {reason}")]
    Syntax {
        /// The pattern as it was passed to registration.
        pattern: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No registered route matches a request path.
    ///
    /// Carries the attempted path and every registered pattern key in
    /// registration order, so the close reason sent to the client can name
    /// both.
    #[error("could not resolve the path {path}, tried {patterns:?}")]
    Resolution {
        /// The path that failed to resolve.
        path: String,
        /// Registered pattern keys, in registration order.
        patterns: Vec<String>,
    },

    /// A middleware stage handles neither direction.
    #[error("middleware `{0}` must handle recv, send, or both")]
    InvalidMiddleware(String),

    /// A configured middleware identifier has no registered factory.
    #[error("unknown middleware `{0}`")]
    UnknownMiddleware(String),

    /// A middleware stage failed or swallowed a message.
    #[error("middleware `{stage}` failed on {direction}: {reason}")]
    Pipeline {
        /// Name of the failing stage.
        stage: String,
        /// Direction the pipeline was running in.
        direction: Direction,
        /// Failure description.
        reason: String,
    },

    /// A write was attempted on a connection that is already closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Handler execution error.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Custom application-defined error.
    #[error("Custom error: {0}")]
    Custom(String),
}

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a custom error with the given message.
    ///
    /// # Examples
    ///
    /// ```
    /// use wsroute_core::Error;
    ///
    /// let err = Error::custom("room is full");
    /// assert_eq!(err.to_string(), "Custom error: room is full");
    /// ```
    pub fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Creates a handler error with the given message.
    pub fn handler<T: fmt::Display>(msg: T) -> Self {
        Error::Handler(msg.to_string())
    }

    pub(crate) fn syntax(pattern: &str, reason: impl Into<String>) -> Self {
        Error::Syntax {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn pipeline(stage: &str, direction: Direction, reason: impl fmt::Display) -> Self {
        Error::Pipeline {
            stage: stage.to_string(),
            direction,
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for errors that are only allowed at startup.
    ///
    /// Everything else is connection-scoped and must not take the server down.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::Syntax { .. }
                | Error::InvalidMiddleware(_)
                | Error::UnknownMiddleware(_)
                | Error::Config(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_error() {
        let err = Error::custom("test error");
        assert!(matches!(err, Error::Custom(_)));
        assert_eq!(err.to_string(), "Custom error: test error");
    }

    #[test]
    fn test_handler_error() {
        let err = Error::handler("handler failed");
        assert!(matches!(err, Error::Handler(_)));
        assert_eq!(err.to_string(), "Handler error: handler failed");
    }

    #[test]
    fn test_resolution_error_lists_patterns() {
        let err = Error::Resolution {
            path: "/echo".to_string(),
            patterns: vec!["/".to_string(), "/chat/{room}".to_string()],
        };
        assert_eq!(
            err.to_string(),
            r#"could not resolve the path /echo, tried ["/", "/chat/{room}"]"#
        );
    }

    #[test]
    fn test_resolution_error_with_no_routes() {
        let err = Error::Resolution {
            path: "/anything".to_string(),
            patterns: Vec::new(),
        };
        assert_eq!(err.to_string(), "could not resolve the path /anything, tried []");
    }

    #[test]
    fn test_pipeline_error_names_stage_and_direction() {
        let err = Error::pipeline("json", Direction::Recv, "returned no message");
        assert_eq!(
            err.to_string(),
            "middleware `json` failed on recv: returned no message"
        );
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("port = ").unwrap_err();
        let err = Error::from(toml_err);
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_startup_scope() {
        assert!(Error::syntax("/{x}", "named segment first").is_startup());
        assert!(Error::InvalidMiddleware("noop".into()).is_startup());
        assert!(Error::UnknownMiddleware("gzip".into()).is_startup());
        assert!(!Error::ConnectionClosed("conn_1".into()).is_startup());
        assert!(
            !Error::Resolution {
                path: "/".into(),
                patterns: vec![]
            }
            .is_startup()
        );
    }
}
