//! Chatroom server
//!
//! Every client on `/chatroom` hears every message, its own included.
//! `/chat` does the same but only relays messages that match the
//! `ChatMessage` schema, and `/schema` describes that schema.

use async_trait::async_trait;
use clap::Parser;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wsroute::prelude::*;
use wsroute::schema::{MaxLength, MinLength};

/// Chatroom server
#[derive(Parser, Debug)]
#[command(name = "chatroom")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

fn chat_schema() -> MessageSchema {
    MessageSchema::new("ChatMessage")
        .field(Field::string("name").help("display name of the sender"))
        .field(
            Field::string("message")
                .validator(MinLength(1))
                .validator(MaxLength(500)),
        )
}

/// Adds the verified username, and nothing else from the claims, to a
/// relayed message. The rest of the claims stay on the server.
fn stamp_sender(mut clean: Map<String, Value>, claims: Option<&Value>) -> Value {
    if let Some(username) = claims.and_then(|c| c.get("username")).and_then(Value::as_str) {
        clean.insert("verified_user".into(), Value::from(username));
    }
    Value::Object(clean)
}

/// Relays schema-valid messages to everyone on the route.
struct ModeratedRoom {
    members: ConnectionRegistry,
    schema: MessageSchema,
}

#[async_trait]
impl Handler for ModeratedRoom {
    async fn handle(&self, mut ctx: ConnectionContext) -> Result<()> {
        while let Some(msg) = ctx.recv().await? {
            let Some(mut value) = msg.into_json() else {
                ctx.send(json!({ "error": "expected a JSON message" })).await?;
                continue;
            };

            // Claims written by the auth stage are not part of the message.
            let claims = value.as_object_mut().and_then(|m| m.remove("auth_user"));

            match self.schema.validate(&value) {
                Ok(clean) => {
                    let outgoing = stamp_sender(clean, claims.as_ref());
                    self.members.broadcast(Message::json(outgoing)).await;
                }
                Err(e) => {
                    warn!(conn_id = %ctx.id(), error = %e, "Rejected chat message");
                    ctx.send(json!({ "error": e.to_string() })).await?;
                }
            }
        }
        Ok(())
    }

    fn registry(&self) -> Option<&ConnectionRegistry> {
        Some(&self.members)
    }
}

async fn describe_schema(ctx: ConnectionContext) -> Result<()> {
    ctx.send(chat_schema().dump_schema()).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig {
            middleware: vec!["logger".into(), "json".into()],
            ..ServerConfig::default()
        },
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let room = ModeratedRoom {
        members: ConnectionRegistry::new(),
        schema: chat_schema(),
    };

    let router = Router::new()
        .route("/chatroom", BroadcastHandler::new())?
        .route("/chat", Arc::new(room))?
        .route("/schema", handler(describe_schema))?;

    let dispatcher = Dispatcher::from_config(router, &config)?;
    let listener = TcpListener::bind(config.socket_addr()).await?;

    info!("Chatroom v{}", env!("CARGO_PKG_VERSION"));
    dispatcher.serve_with_shutdown(listener, shutdown_signal()).await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
}
