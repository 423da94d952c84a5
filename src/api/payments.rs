use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use super::{success, AppState};
use crate::error::{AppError, AppResult};
use crate::payments::orchestrator::{AttemptOutcome, CreatePaymentRequest};

/// Sent by the payment page embedded in the platform checkout
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub location_id: String,
    pub transaction_id: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub installments: i32,
    #[serde(default)]
    pub store_card: bool,
    /// Falls back to the forwarding proxy headers
    #[serde(default)]
    pub payer_ip: Option<String>,
}

pub async fn initialize_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InitializeRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let payer_ip = body
        .payer_ip
        .clone()
        .or_else(|| client_ip(&headers))
        .ok_or_else(|| AppError::validation("payerIp", "could not determine the payer IP"))?;

    let tenant = state.tenants.find_active(&body.location_id).await?;
    let request = CreatePaymentRequest {
        transaction_id: body.transaction_id,
        contact_id: body.contact_id,
        amount: body.amount,
        currency: body.currency,
        payer_email: body.email,
        payer_ip,
        payer_name: body.name,
        description: body.description,
        installment_count: body.installments,
        store_card: body.store_card,
    };

    let response = match state.orchestrator.create_payment(&tenant, request).await? {
        AttemptOutcome::Started {
            payment,
            initialized,
        } => success(json!({
            "chargeId": payment.merchant_oid,
            "iframeUrl": initialized.iframe_url,
            "token": initialized.token,
        })),
        AttemptOutcome::Declined { payment, failure } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "success": false,
                "chargeId": payment.merchant_oid,
                "message": failure.reason,
                "retryable": failure.is_retryable,
            })),
        ),
    };
    Ok(response)
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.4"));
        assert!(client_ip(&HeaderMap::new()).is_none());
    }
}
