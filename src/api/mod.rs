//! HTTP surface. The PayTR callback, the payment page initializer, OAuth
//! redirect and health check are public. Tenant administration and payment
//! queries (refunds included) require the shared API key in
//! `x-bridge-api-key` whenever one is configured.

pub mod auth;
pub mod callback;
pub mod health;
pub mod payments;
pub mod query;
pub mod tenants;

use crate::error::{AppError, AppErrorKind};
use crate::payments::orchestrator::PaymentOrchestrator;
use crate::tenants::TenantService;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub tenants: Arc<TenantService>,
    /// Absent when running on in-memory stores
    pub db: Option<PgPool>,
    pub environment: String,
    /// Shared key for platform-facing routes; `None` disables the check
    pub api_key: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    let platform_routes = Router::new()
        .route("/payments/query", post(query::payment_query))
        .route("/webhooks/platform", post(tenants::platform_webhook))
        .route(
            "/tenants/:location_id/credentials",
            post(tenants::configure_credentials),
        )
        .layer(from_fn_with_state(
            state.api_key.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/callbacks/paytr", post(callback::paytr_callback))
        .route("/payments/initialize", post(payments::initialize_payment))
        .route("/oauth/callback", get(tenants::oauth_callback))
        .merge(platform_routes)
        .with_state(state)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self.kind {
            AppErrorKind::Infrastructure(_) => {
                error!(error = %self, "Request failed");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

/// `{ "success": true, ... }` body with extra fields merged in
pub(crate) fn success(fields: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    let mut body = serde_json::json!({ "success": true });
    if let (Some(target), serde_json::Value::Object(extra)) = (body.as_object_mut(), fields) {
        target.extend(extra);
    }
    (StatusCode::OK, Json(body))
}
