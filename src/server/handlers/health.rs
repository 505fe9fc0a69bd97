use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Index and configuration summary for the page footer.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.index.engine().await?;
    let chunks = engine.chunk_count().await?;

    Ok(Json(json!({
        "status": "ok",
        "index": {
            "chunks": chunks,
            "top_k": state.settings.retrieval.top_k,
        },
        "model": state.settings.openai.model,
        "answer_mode": format!("{:?}", state.pipeline.mode()),
    })))
}
