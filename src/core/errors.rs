use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the whole service.
///
/// `Config` aborts startup; `Retrieval` and `Generation` are caught at the
/// interaction boundary and rendered inline. An empty retrieval result is
/// not an error and never appears here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("retrieval error: {0}")]
    Retrieval(String),
    #[error("generation error: {0}")]
    Generation(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn retrieval<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Retrieval(err.to_string())
    }

    pub fn generation<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Generation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::Config(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Retrieval(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            ApiError::Generation(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
