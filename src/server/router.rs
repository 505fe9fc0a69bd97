use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::health;
use crate::server::ws::handler::ws_handler;
use crate::state::AppState;

/// Creates the application router: the embedded page, health/status
/// endpoints, and the WebSocket, behind CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);

    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health::health))
        .route("/api/status", get(health::get_status))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

async fn index_page() -> Html<&'static str> {
    Html(include_str!("../../assets/index.html"))
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let configured = &state.settings.server.cors_allowed_origins;
    let origins: Vec<HeaderValue> = if configured.is_empty() {
        default_local_origins()
            .into_iter()
            .filter_map(|origin| HeaderValue::from_str(&origin).ok())
            .collect()
    } else {
        configured
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect()
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:8080".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:8080".to_string(),
    ]
}
