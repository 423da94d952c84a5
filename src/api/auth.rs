use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use tracing::warn;

use crate::payments::hash::constant_time_eq;

pub const API_KEY_HEADER: &str = "x-bridge-api-key";

/// Reject platform-facing requests that do not carry the shared API key.
/// With no key configured every request passes.
pub async fn require_api_key(
    State(expected): State<Option<Arc<str>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = expected else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        warn!(path = %request.uri().path(), "Rejected request without a valid API key");
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": "missing or invalid API key",
            }
        });
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }

    next.run(request).await
}
