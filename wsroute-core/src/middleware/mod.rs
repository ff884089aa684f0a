//! Bidirectional message middleware.
//!
//! Every message a handler receives has passed through the pipeline's recv
//! side, and every message a handler sends passes through its send side before
//! touching the transport.
//!
//! # Overview
//!
//! - [`Middleware`] - a single stage, handling recv, send, or both
//! - [`MiddlewareChain`] - builder collecting stages in order
//! - [`Pipeline`] - the validated, immutable chain run on every message
//! - [`MiddlewareRegistry`] - resolves configured stage names into stages
//!
//! # Ordering
//!
//! Stages run strictly one after another. On recv they run in registration
//! order; on send they run in reverse, so the stage closest to the wire on the
//! way in is also closest to the wire on the way out:
//!
//! ```text
//!            recv                              send
//! wire → [json] → [auth] → handler → [auth] → [json] → wire
//! ```
//!
//! Order is observable: the auth stage only sees structured data because the
//! JSON stage ran before it.
//!
//! # Swallowed Messages
//!
//! A stage must hand back a message. Returning `Ok(None)` is not a way to drop
//! traffic; the pipeline turns it into [`Error::Pipeline`] naming the stage.
//!
//! # Examples
//!
//! ```
//! use wsroute_core::{Direction, FnMiddleware, JsonCodec, Message, MiddlewareChain};
//! use serde_json::json;
//!
//! # async fn example() -> wsroute_core::Result<()> {
//! let pipeline = MiddlewareChain::new()
//!     .layer(JsonCodec::new())
//!     .layer(FnMiddleware::new("tag").on_recv(|msg| {
//!         let mut value = msg.into_json().unwrap_or_default();
//!         value["seen"] = json!(true);
//!         Ok(Some(value.into()))
//!     }).build())
//!     .build()?;
//!
//! let inbound = pipeline.run(Message::text(r#"{"a":1}"#), Direction::Recv).await?;
//! assert_eq!(inbound, Message::json(json!({"a": 1, "seen": true})));
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod json;
pub mod logger;

pub use auth::{AuthMiddleware, JwtVerifier, TokenVerifier};
pub use json::JsonCodec;
pub use logger::{LogLevel, LoggerMiddleware};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Which way a message is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the client towards the handler.
    Recv,
    /// From the handler towards the client.
    Send,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Recv => f.write_str("recv"),
            Direction::Send => f.write_str("send"),
        }
    }
}

/// The set of directions a stage takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Directions {
    /// Stage transforms inbound messages.
    pub recv: bool,
    /// Stage transforms outbound messages.
    pub send: bool,
}

impl Directions {
    /// Handles neither direction; never valid in a pipeline.
    pub const NONE: Self = Self {
        recv: false,
        send: false,
    };
    /// Inbound only.
    pub const RECV: Self = Self {
        recv: true,
        send: false,
    };
    /// Outbound only.
    pub const SEND: Self = Self {
        recv: false,
        send: true,
    };
    /// Both directions.
    pub const BOTH: Self = Self {
        recv: true,
        send: true,
    };

    /// Returns `true` if `direction` is in the set.
    pub fn handles(self, direction: Direction) -> bool {
        match direction {
            Direction::Recv => self.recv,
            Direction::Send => self.send,
        }
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(self) -> bool {
        !self.recv && !self.send
    }
}

/// A single pipeline stage.
///
/// Implement [`on_recv`](Self::on_recv), [`on_send`](Self::on_send), or both,
/// and report which through [`directions`](Self::directions). The pipeline
/// only calls the hooks a stage declares.
///
/// Stages are shared by every connection and must not keep per-message state.
///
/// # Examples
///
/// ```
/// use wsroute_core::{Directions, Message, Middleware, Result};
/// use async_trait::async_trait;
///
/// struct Shout;
///
/// #[async_trait]
/// impl Middleware for Shout {
///     fn name(&self) -> &str {
///         "shout"
///     }
///
///     fn directions(&self) -> Directions {
///         Directions::SEND
///     }
///
///     async fn on_send(&self, message: Message) -> Result<Option<Message>> {
///         Ok(Some(match message {
///             Message::Text(text) => Message::Text(text.to_uppercase()),
///             other => other,
///         }))
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Directions this stage takes part in.
    fn directions(&self) -> Directions;

    /// Transforms an inbound message.
    async fn on_recv(&self, message: Message) -> Result<Option<Message>> {
        Ok(Some(message))
    }

    /// Transforms an outbound message.
    async fn on_send(&self, message: Message) -> Result<Option<Message>> {
        Ok(Some(message))
    }
}

/// Builder collecting stages in registration order.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    /// Stages in registration order.
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Appends a stage.
    pub fn layer(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Validates the chain and freezes it into a [`Pipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMiddleware`] for the first stage that handles
    /// neither direction.
    pub fn build(self) -> Result<Pipeline> {
        Pipeline::new(self.middlewares)
    }
}

/// An immutable, validated sequence of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    /// A pipeline with no stages; messages pass through untouched.
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// Builds a pipeline from stages in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMiddleware`] for the first stage that handles
    /// neither direction.
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Result<Self> {
        if let Some(bad) = stages.iter().find(|s| s.directions().is_empty()) {
            return Err(Error::InvalidMiddleware(bad.name().to_string()));
        }
        Ok(Self { stages })
    }

    /// Instantiates the configured stage identifiers, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMiddleware`] for an identifier the registry
    /// does not know, or any error raised while building or validating a
    /// stage.
    pub fn from_names<S: AsRef<str>>(names: &[S], registry: &MiddlewareRegistry) -> Result<Self> {
        let stages = names
            .iter()
            .map(|name| registry.create(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(stages)
    }

    /// Runs `message` through every stage that handles `direction`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pipeline`] if a stage fails or returns no message.
    /// Nothing after the failing stage runs.
    pub async fn run(&self, message: Message, direction: Direction) -> Result<Message> {
        let mut message = message;
        match direction {
            Direction::Recv => {
                for stage in &self.stages {
                    message = Self::apply(stage.as_ref(), message, direction).await?;
                }
            }
            Direction::Send => {
                for stage in self.stages.iter().rev() {
                    message = Self::apply(stage.as_ref(), message, direction).await?;
                }
            }
        }
        Ok(message)
    }

    async fn apply(stage: &dyn Middleware, message: Message, direction: Direction) -> Result<Message> {
        if !stage.directions().handles(direction) {
            return Ok(message);
        }

        trace!(stage = stage.name(), %direction, "Running middleware");
        let outcome = match direction {
            Direction::Recv => stage.on_recv(message).await,
            Direction::Send => stage.on_send(message).await,
        };

        match outcome {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(Error::pipeline(stage.name(), direction, "returned no message")),
            Err(e @ Error::Pipeline { .. }) => Err(e),
            Err(e) => {
                debug!(stage = stage.name(), %direction, error = %e, "Middleware failed");
                Err(Error::pipeline(stage.name(), direction, e))
            }
        }
    }

    /// Stage names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

type StageFn = Box<dyn Fn(Message) -> Result<Option<Message>> + Send + Sync>;

/// Closure-backed stage.
///
/// Handy for small transforms that do not deserve a type of their own. A
/// `FnMiddleware` with neither closure set handles no direction and is
/// rejected when the pipeline is built.
pub struct FnMiddleware {
    name: String,
    recv: Option<StageFn>,
    send: Option<StageFn>,
}

impl FnMiddleware {
    /// Starts a stage with no hooks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recv: None,
            send: None,
        }
    }

    /// Sets the recv hook.
    pub fn on_recv<F>(mut self, f: F) -> Self
    where
        F: Fn(Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        self.recv = Some(Box::new(f));
        self
    }

    /// Sets the send hook.
    pub fn on_send<F>(mut self, f: F) -> Self
    where
        F: Fn(Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        self.send = Some(Box::new(f));
        self
    }

    /// Finishes the stage.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Middleware for FnMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn directions(&self) -> Directions {
        Directions {
            recv: self.recv.is_some(),
            send: self.send.is_some(),
        }
    }

    async fn on_recv(&self, message: Message) -> Result<Option<Message>> {
        match &self.recv {
            Some(f) => f(message),
            None => Ok(Some(message)),
        }
    }

    async fn on_send(&self, message: Message) -> Result<Option<Message>> {
        match &self.send {
            Some(f) => f(message),
            None => Ok(Some(message)),
        }
    }
}

/// Builds a fresh stage instance.
pub type MiddlewareFactory = Arc<dyn Fn() -> Result<Arc<dyn Middleware>> + Send + Sync>;

/// Maps configured stage identifiers to factories.
///
/// # Examples
///
/// ```
/// use wsroute_core::{MiddlewareRegistry, Pipeline};
///
/// let registry = MiddlewareRegistry::with_builtins();
/// let pipeline = Pipeline::from_names(&["logger", "json"], &registry).unwrap();
/// assert_eq!(pipeline.names(), ["logger", "json"]);
///
/// assert!(Pipeline::from_names(&["gzip"], &registry).is_err());
/// ```
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    factories: HashMap<String, MiddlewareFactory>,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry preloaded with `json` and `logger`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("json", || Ok(JsonCodec::new() as Arc<dyn Middleware>));
        registry.register("logger", || Ok(LoggerMiddleware::new() as Arc<dyn Middleware>));
        registry
    }

    /// The built-ins plus `auth` when `config` carries an `[auth]` section.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut registry = Self::with_builtins();
        if let Some(auth) = config.auth.clone() {
            registry.register("auth", move || {
                let verifier = JwtVerifier::hs256(auth.secret.as_bytes());
                Ok(AuthMiddleware::with_fields(
                    verifier,
                    auth.token_field.clone(),
                    auth.claims_field.clone(),
                ) as Arc<dyn Middleware>)
            });
        }
        registry
    }

    /// Registers or replaces the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Middleware>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Instantiates the stage registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMiddleware`] if nothing is registered under
    /// `name`.
    pub fn create(&self, name: &str) -> Result<Arc<dyn Middleware>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownMiddleware(name.to_string()))?;
        factory()
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
