use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wsroute::prelude::*;

async fn echo(mut ctx: ConnectionContext) -> Result<()> {
    while let Some(msg) = ctx.recv().await? {
        info!(conn_id = %ctx.id(), msg_type = ?msg.message_type(), "Echoing");
        ctx.send(msg).await?;
    }
    Ok(())
}

async fn greet(mut ctx: ConnectionContext) -> Result<()> {
    let name = ctx.param("name").unwrap_or("stranger").to_string();
    ctx.send(json!({ "greeting": format!("hello {name}") })).await?;

    while let Some(msg) = ctx.recv().await? {
        ctx.send(json!({ "from": name, "echo": msg.into_json() })).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let router = Router::new()
        .route("/echo", handler(echo))?
        .route("/hello/{name}", handler(greet))?;

    let pipeline = MiddlewareChain::new()
        .layer(LoggerMiddleware::new())
        .layer(JsonCodec::new())
        .build()?;

    info!("Echo server running on ws://127.0.0.1:8765");
    Dispatcher::new(router, pipeline).listen("127.0.0.1:8765").await
}
