use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use xtrc::api;
use xtrc::config::Config;
use xtrc::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        "Embedding backend: {} ({}d)",
        config.embedding.provider,
        config.embedding.dimension
    );
    if config.llm.enabled {
        tracing::info!(
            "LLM rerank enabled provider={} model={} threshold={:.2}",
            config.llm.provider,
            config.llm.model,
            config.llm.threshold
        );
    }

    let bind_addr = config.bind_addr();
    let state = AppState::new(config)?;

    let app = Router::new()
        .route("/index", post(api::index::index))
        .route("/query", post(api::query::query))
        .route("/status", get(api::status::status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Daemon listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
