//! Token authentication stage.
//!
//! Clients embed a token in each JSON message. On recv the stage takes the
//! token out, verifies it, and puts the verified claims in its place:
//!
//! ```text
//! {"authentication": "<jwt>", "body": "hi"}  ->  {"auth_user": {...claims}, "body": "hi"}
//! {"body": "hi"}                             ->  {"auth_user": null, "body": "hi"}
//! ```
//!
//! A missing, expired, or otherwise invalid token yields `null` rather than an
//! error; rejecting anonymous traffic is the handler's decision. On send the
//! claims field is stripped so verified identity never echoes back to a client.
//!
//! The stage needs structured messages and belongs after a
//! [`JsonCodec`](crate::JsonCodec) in the chain. Messages that are not JSON
//! objects pass through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    Message, Result,
    middleware::{Directions, Middleware},
};

/// Default field carrying the client's token.
pub const DEFAULT_TOKEN_FIELD: &str = "authentication";

/// Default field receiving the verified claims.
pub const DEFAULT_CLAIMS_FIELD: &str = "auth_user";

/// Turns a token into verified claims.
///
/// Returns `None` for any token that should not be trusted. Implementations
/// may perform I/O.
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verifies `token` and returns its claims.
    async fn verify(&self, token: &str) -> Option<Value>;
}

/// HS256 JSON Web Token verifier.
///
/// The decoding key and validation rules are built once and reused for every
/// message. Tokens must carry an `exp` claim.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Creates a verifier for tokens signed with the shared `secret`.
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Option<Value> {
        match jsonwebtoken::decode::<Value>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                debug!("Rejected expired token");
                None
            }
            Err(e) => {
                warn!(error = %e, "Rejected invalid token");
                None
            }
        }
    }
}

/// Lifts an embedded token into verified claims.
///
/// Registered as `auth` by
/// [`MiddlewareRegistry::from_config`](crate::MiddlewareRegistry::from_config)
/// when the configuration carries an `[auth]` section.
///
/// # Examples
///
/// ```
/// use wsroute_core::{AuthMiddleware, JsonCodec, JwtVerifier, MiddlewareChain};
///
/// let pipeline = MiddlewareChain::new()
///     .layer(JsonCodec::new())
///     .layer(AuthMiddleware::new(JwtVerifier::hs256(b"secret")))
///     .build()
///     .unwrap();
/// assert_eq!(pipeline.names(), ["json", "auth"]);
/// ```
pub struct AuthMiddleware {
    verifier: Arc<dyn TokenVerifier>,
    token_field: String,
    claims_field: String,
}

impl AuthMiddleware {
    /// Creates the stage with the default field names.
    pub fn new(verifier: impl TokenVerifier) -> Arc<Self> {
        Self::with_fields(verifier, DEFAULT_TOKEN_FIELD, DEFAULT_CLAIMS_FIELD)
    }

    /// Creates the stage reading the token from `token_field` and writing
    /// claims to `claims_field`.
    pub fn with_fields(
        verifier: impl TokenVerifier,
        token_field: impl Into<String>,
        claims_field: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            verifier: Arc::new(verifier),
            token_field: token_field.into(),
            claims_field: claims_field.into(),
        })
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    fn directions(&self) -> Directions {
        Directions::BOTH
    }

    async fn on_recv(&self, message: Message) -> Result<Option<Message>> {
        let mut fields = match message {
            Message::Json(Value::Object(fields)) => fields,
            other => return Ok(Some(other)),
        };

        let claims = match fields.remove(&self.token_field) {
            Some(Value::String(token)) => self.verifier.verify(&token).await,
            _ => None,
        };
        fields.insert(self.claims_field.clone(), claims.unwrap_or(Value::Null));

        Ok(Some(Message::Json(Value::Object(fields))))
    }

    async fn on_send(&self, message: Message) -> Result<Option<Message>> {
        match message {
            Message::Json(Value::Object(mut fields)) => {
                fields.remove(&self.claims_field);
                Ok(Some(Message::Json(Value::Object(fields))))
            }
            other => Ok(Some(other)),
        }
    }
}
