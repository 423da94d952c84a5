use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{success, AppState};
use crate::error::AppResult;
use crate::tenants::CredentialForm;

/// App lifecycle event from the platform marketplace
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE", rename_all_fields = "camelCase")]
pub enum PlatformEvent {
    Install {
        location_id: String,
        #[serde(default)]
        company_id: Option<String>,
    },
    Uninstall {
        location_id: String,
    },
}

pub async fn platform_webhook(
    State(state): State<AppState>,
    Json(event): Json<PlatformEvent>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    match event {
        PlatformEvent::Install {
            location_id,
            company_id,
        } => {
            let tenant = state
                .tenants
                .install(&location_id, company_id.as_deref())
                .await?;
            Ok(success(json!({
                "locationId": tenant.location_id,
                "configured": tenant.has_credentials(),
            })))
        }
        PlatformEvent::Uninstall { location_id } => {
            let deactivated = state.tenants.uninstall(&location_id).await?;
            Ok(success(json!({ "deactivated": deactivated })))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCallback {
    pub code: String,
    #[serde(default)]
    pub location_id: Option<String>,
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallback>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let tenant = state
        .tenants
        .authorize(&params.code, params.location_id.as_deref())
        .await?;
    info!(location_id = %tenant.location_id, "OAuth installation completed");
    Ok(success(json!({ "locationId": tenant.location_id })))
}

pub async fn configure_credentials(
    State(state): State<AppState>,
    Path(location_id): Path<String>,
    Json(form): Json<CredentialForm>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let tenant = state
        .tenants
        .configure_credentials(&location_id, form)
        .await?;
    Ok(success(json!({
        "locationId": tenant.location_id,
        "merchantId": tenant.merchant_id,
        "testMode": tenant.test_mode,
    })))
}
