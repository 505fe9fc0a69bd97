use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use veta::core::logging;
use veta::server::router::router;
use veta::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize()?;
    logging::init(&state.paths);

    // Build or load the index before accepting traffic; a missing corpus
    // or malformed persisted index aborts startup here.
    let engine = state
        .index
        .engine()
        .await
        .context("Failed to prepare the document index")?;
    tracing::info!("Index ready ({} chunks)", engine.chunk_count().await?);

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(state.settings.server.port);
    let bind_addr = format!("127.0.0.1:{}", port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    tracing::info!("Listening on http://{}", addr);

    let app: Router = router(state.clone());

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
