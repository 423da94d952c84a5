//! Capture notifications back to the CRM platform

use crate::database::repository::TenantStore;
use crate::error::{AppError, AppResult};
use crate::payments::hash::to_minor_units;
use crate::payments::models::Payment;
use crate::platform::{PlatformClient, PlatformToken};
use crate::tenants::Tenant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const WEBHOOK_PATH: &str = "/payments/custom-provider/webhook";

/// A payment that just moved to `success`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureEvent {
    pub location_id: String,
    pub charge_id: String,
    pub transaction_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub charged_at: DateTime<Utc>,
}

impl CaptureEvent {
    pub fn from_payment(payment: &Payment, location_id: &str) -> AppResult<Self> {
        Ok(Self {
            location_id: location_id.to_string(),
            charge_id: payment.merchant_oid.clone(),
            transaction_id: payment.transaction_id.clone(),
            amount_minor: to_minor_units(payment.amount)?,
            currency: payment.currency.clone(),
            charged_at: payment.paid_at.unwrap_or(payment.updated_at),
        })
    }

    /// Body of the platform's custom-provider webhook
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "event": "payment.captured",
            "chargeId": self.charge_id,
            "ghlTransactionId": self.transaction_id,
            "locationId": self.location_id,
            "amount": self.amount_minor,
            "currency": self.currency,
            "chargeSnapshot": {
                "status": "succeeded",
                "amount": self.amount_minor,
                "chargeId": self.charge_id,
                "chargedAt": self.charged_at.timestamp(),
            },
        })
    }
}

/// Outbound capture notification. Failures are reported, never retried here.
#[async_trait]
pub trait PlatformNotifier: Send + Sync {
    async fn notify_capture(&self, tenant: &Tenant, event: &CaptureEvent) -> AppResult<()>;
}

pub struct HttpPlatformNotifier {
    client: Client,
    base_url: String,
    oauth: Option<Arc<PlatformClient>>,
    tenants: Arc<dyn TenantStore>,
}

impl HttpPlatformNotifier {
    pub fn new(
        base_url: impl Into<String>,
        timeout_secs: u64,
        oauth: Option<Arc<PlatformClient>>,
        tenants: Arc<dyn TenantStore>,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("notifier HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            oauth,
            tenants,
        })
    }

    /// Current access token, refreshed first when close to expiry
    async fn access_token(&self, tenant: &Tenant) -> AppResult<String> {
        let token = tenant
            .platform_token
            .as_ref()
            .ok_or_else(|| AppError::platform(format!("tenant {} has no platform token", tenant.location_id)))?;

        match (&self.oauth, token.needs_refresh(Utc::now())) {
            (Some(oauth), true) => {
                let refreshed: PlatformToken = oauth.refresh(token).await?;
                self.tenants.save_platform_token(tenant.id, &refreshed).await?;
                info!(location_id = %tenant.location_id, "Refreshed platform token before notification");
                Ok(refreshed.access_token().to_string())
            }
            _ => Ok(token.access_token().to_string()),
        }
    }
}

#[async_trait]
impl PlatformNotifier for HttpPlatformNotifier {
    async fn notify_capture(&self, tenant: &Tenant, event: &CaptureEvent) -> AppResult<()> {
        let access_token = self.access_token(tenant).await?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), WEBHOOK_PATH);

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .header("Version", "2021-07-28")
            .json(&event.payload())
            .send()
            .await
            .map_err(|e| AppError::platform(format!("capture notification failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(charge_id = %event.charge_id, status = %status, "Platform rejected capture notification");
            return Err(AppError::platform(format!("HTTP {}: {}", status, body)));
        }

        info!(charge_id = %event.charge_id, location_id = %event.location_id, "Capture notification delivered");
        Ok(())
    }
}
