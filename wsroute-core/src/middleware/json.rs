//! JSON codec stage.
//!
//! On recv, text and binary payloads are parsed into [`Message::Json`]. On send,
//! structured messages are serialized back to text. Anything already in the
//! target shape passes through, so a handler may still send a raw string
//! through a pipeline that carries the codec.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    Message, Result,
    middleware::{Directions, Middleware},
};

/// Parses inbound payloads and serializes outbound ones.
///
/// Registered as `json` in
/// [`MiddlewareRegistry::with_builtins`](crate::MiddlewareRegistry::with_builtins).
///
/// # Examples
///
/// ```
/// use wsroute_core::{Direction, JsonCodec, Message, MiddlewareChain};
/// use serde_json::json;
///
/// # async fn example() -> wsroute_core::Result<()> {
/// let pipeline = MiddlewareChain::new().layer(JsonCodec::new()).build()?;
///
/// let inbound = pipeline.run(Message::text("[1,2]"), Direction::Recv).await?;
/// assert_eq!(inbound, Message::json(json!([1, 2])));
///
/// // Malformed input fails the pipeline instead of reaching the handler.
/// assert!(pipeline.run(Message::text("{"), Direction::Recv).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Creates the codec.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Middleware for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn directions(&self) -> Directions {
        Directions::BOTH
    }

    async fn on_recv(&self, message: Message) -> Result<Option<Message>> {
        let value = match message {
            Message::Text(text) => serde_json::from_str(&text)?,
            Message::Binary(data) => serde_json::from_slice(&data)?,
            json @ Message::Json(_) => return Ok(Some(json)),
        };
        Ok(Some(Message::Json(value)))
    }

    async fn on_send(&self, message: Message) -> Result<Option<Message>> {
        match message {
            Message::Json(value) => Ok(Some(Message::Text(serde_json::to_string(&value)?))),
            other => Ok(Some(other)),
        }
    }
}
