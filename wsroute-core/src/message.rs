//! Message values flowing through the middleware pipeline.
//!
//! The transport speaks in websocket frames; handlers and middleware speak in
//! [`Message`]s. A message starts life as raw text or bytes read off the wire
//! and may be turned into structured JSON by a codec stage before a handler
//! sees it. On the way out the reverse happens, and anything still structured
//! when it reaches the transport is serialized to a text frame.
//!
//! # Examples
//!
//! ```
//! use wsroute_core::Message;
//! use serde_json::json;
//!
//! let text = Message::text(r#"{"room":"lobby"}"#);
//! assert!(text.is_text());
//!
//! let value: serde_json::Value = text.parse_json().unwrap();
//! assert_eq!(Message::json(value), Message::json(json!({"room": "lobby"})));
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as Frame;

/// Kind of payload carried by a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// UTF-8 text, as read from or written to a text frame.
    Text,
    /// Raw bytes, as read from or written to a binary frame.
    Binary,
    /// A structured value produced by a codec stage.
    Json,
}

/// A single inbound or outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Text payload.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Structured JSON payload.
    Json(Value),
}

impl Message {
    /// Creates a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text(text.into())
    }

    /// Creates a binary message.
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Creates a structured message.
    pub fn json(value: Value) -> Self {
        Message::Json(value)
    }

    /// Returns the kind of payload this message carries.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Text(_) => MessageType::Text,
            Message::Binary(_) => MessageType::Binary,
            Message::Json(_) => MessageType::Json,
        }
    }

    /// Returns `true` if this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Returns `true` if this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Returns `true` if this is a structured message.
    pub fn is_json(&self) -> bool {
        matches!(self, Message::Json(_))
    }

    /// Returns the text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the structured payload, if any.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Message::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Consumes the message and returns the structured payload, if any.
    pub fn into_json(self) -> Option<Value> {
        match self {
            Message::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Deserializes the message into `T`.
    ///
    /// Structured messages are converted directly; text and binary payloads
    /// are parsed as JSON first.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Message::Json(value) => Ok(serde_json::from_value(value.clone())?),
            Message::Text(text) => Ok(serde_json::from_str(text)?),
            Message::Binary(data) => Ok(serde_json::from_slice(data)?),
        }
    }

    /// Builds a message from an inbound transport frame.
    ///
    /// Only data frames carry messages. Control frames (ping, pong, close)
    /// and raw frames return `None`.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Text(text) => Some(Message::Text(text)),
            Frame::Binary(data) => Some(Message::Binary(data)),
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_) | Frame::Frame(_) => None,
        }
    }

    /// Converts the message into an outbound transport frame.
    ///
    /// A structured message that reaches the transport is serialized to text.
    pub fn into_frame(self) -> Result<Frame> {
        match self {
            Message::Text(text) => Ok(Frame::Text(text)),
            Message::Binary(data) => Ok(Frame::Binary(data)),
            Message::Json(value) => Ok(Frame::Text(serde_json::to_string(&value)?)),
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Json(value)
    }
}

impl TryFrom<Message> for Value {
    type Error = Error;

    fn try_from(message: Message) -> Result<Self> {
        match message {
            Message::Json(value) => Ok(value),
            other => other.parse_json(),
        }
    }
}
