//! Logger middleware for message tracing.
//!
//! [`LoggerMiddleware`] is a pass-through stage that records every message
//! crossing the pipeline in both directions. It never changes a message.
//!
//! Where it sits in the chain decides what it sees: placed before a JSON codec
//! it logs raw text frames on recv, placed after it logs structured values.
//!
//! # Log Levels
//!
//! - [`LogLevel::Debug`] - most verbose, for development
//! - [`LogLevel::Info`] - standard logging
//! - [`LogLevel::Warn`] - surfaces traffic even under a quiet filter
//!
//! # Examples
//!
//! ```
//! use wsroute_core::{LogLevel, LoggerMiddleware, MiddlewareChain};
//!
//! let pipeline = MiddlewareChain::new()
//!     .layer(LoggerMiddleware::with_level(LogLevel::Debug))
//!     .build()
//!     .unwrap();
//! assert_eq!(pipeline.names(), ["logger"]);
//! ```
//!
//! # Log Output
//!
//! ```text
//! 2025-10-16T10:30:45.123Z  INFO wsroute_core::middleware::logger: message direction=recv msg_type=Text bytes=17
//! 2025-10-16T10:30:45.125Z  INFO wsroute_core::middleware::logger: message direction=send msg_type=Json bytes=0
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    Message, Result,
    middleware::{Direction, Directions, Middleware},
};

/// Log level for the logger middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Debug level logging - most verbose.
    Debug,
    /// Info level logging - standard verbosity.
    #[default]
    Info,
    /// Warn level logging.
    Warn,
}

/// Pass-through stage that logs each message it sees.
///
/// Registered as `logger` in
/// [`MiddlewareRegistry::with_builtins`](crate::MiddlewareRegistry::with_builtins).
pub struct LoggerMiddleware {
    log_level: LogLevel,
}

impl LoggerMiddleware {
    /// Creates a logger at [`LogLevel::Info`].
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a logger with a custom log level.
    pub fn with_level(level: LogLevel) -> Arc<Self> {
        Arc::new(Self { log_level: level })
    }

    /// The configured level.
    pub fn level(&self) -> LogLevel {
        self.log_level
    }

    fn log(&self, message: &Message, direction: Direction) {
        let msg_type = message.message_type();
        let bytes = match message {
            Message::Text(text) => text.len(),
            Message::Binary(data) => data.len(),
            Message::Json(_) => 0,
        };

        match self.log_level {
            LogLevel::Debug => debug!(%direction, ?msg_type, bytes, "message"),
            LogLevel::Info => info!(%direction, ?msg_type, bytes, "message"),
            LogLevel::Warn => warn!(%direction, ?msg_type, bytes, "message"),
        }
    }
}

impl Default for LoggerMiddleware {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
        }
    }
}

#[async_trait]
impl Middleware for LoggerMiddleware {
    fn name(&self) -> &str {
        "logger"
    }

    fn directions(&self) -> Directions {
        Directions::BOTH
    }

    async fn on_recv(&self, message: Message) -> Result<Option<Message>> {
        self.log(&message, Direction::Recv);
        Ok(Some(message))
    }

    async fn on_send(&self, message: Message) -> Result<Option<Message>> {
        self.log(&message, Direction::Send);
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_logger_passes_messages_through() {
        let logger = LoggerMiddleware::with_level(LogLevel::Debug);
        let msg = Message::json(json!({"a": 1}));

        assert_eq!(logger.on_recv(msg.clone()).await.unwrap(), Some(msg.clone()));
        assert_eq!(logger.on_send(msg.clone()).await.unwrap(), Some(msg));
    }

    #[test]
    fn test_logger_defaults_to_info() {
        assert_eq!(LoggerMiddleware::new().level(), LogLevel::Info);
        assert_eq!(LoggerMiddleware::new().directions(), Directions::BOTH);
    }
}
