//! Server configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 8765
//! middleware = ["json", "auth"]
//! debug = true
//!
//! [auth]
//! secret = "change-me"
//! token_field = "authentication"
//! claims_field = "auth_user"
//! ```
//!
//! The `middleware` list is opaque here; it is resolved into stages by
//! [`MiddlewareRegistry`](crate::MiddlewareRegistry).

use crate::error::{Error, Result};
use crate::middleware::auth::{DEFAULT_CLAIMS_FIELD, DEFAULT_TOKEN_FIELD};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Middleware stage identifiers, in pipeline order.
    #[serde(default)]
    pub middleware: Vec<String>,
    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,
    /// Token authentication; enables the `auth` stage.
    pub auth: Option<AuthConfig>,
}

/// `[auth]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared HS256 secret.
    pub secret: String,
    /// Field clients put their token in.
    #[serde(default = "default_token_field")]
    pub token_field: String,
    /// Field the verified claims are written to.
    #[serde(default = "default_claims_field")]
    pub claims_field: String,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_token_field() -> String {
    DEFAULT_TOKEN_FIELD.to_string()
}

fn default_claims_field() -> String {
    DEFAULT_CLAIMS_FIELD.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            middleware: Vec::new(),
            debug: false,
            auth: None,
        }
    }
}

impl ServerConfig {
    /// Reads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed input.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `bind:port`, ready for [`Dispatcher::listen`](crate::Dispatcher::listen).
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.socket_addr(), "127.0.0.1:8765");
        assert!(config.middleware.is_empty());
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = ServerConfig::from_toml(
            r#"
            bind = "0.0.0.0"
            port = 9000
            middleware = ["logger", "json", "auth"]
            debug = true

            [auth]
            secret = "s3cret"
            token_field = "token"
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_addr(), "0.0.0.0:9000");
        assert_eq!(config.middleware, ["logger", "json", "auth"]);
        assert!(config.debug);

        let auth = config.auth.unwrap();
        assert_eq!(auth.secret, "s3cret");
        assert_eq!(auth.token_field, "token");
        assert_eq!(auth.claims_field, "auth_user");
    }

    #[test]
    fn test_auth_requires_secret() {
        let err = ServerConfig::from_toml("[auth]\ntoken_field = \"t\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_config_is_rejected() {
        let err = ServerConfig::from_toml("port = \"not a number\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ServerConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("here.toml")));
    }
}
