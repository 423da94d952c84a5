//! PayTR payment provider implementation
//!
//! Card payments in Turkey through PayTR's iframe API, direct charges of
//! stored cards, status queries and refunds. All requests are form-encoded
//! POSTs signed with [`HashProtocol`].

use crate::database::repository::PaymentMethodStore;
use crate::error::{AppError, AppResult};
use crate::payments::hash::{self, HashProtocol, InitTokenFields};
use crate::payments::models::{Payment, PaymentMethod};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    CallbackFields, Initialized, PaymentIntent, ProviderFailure, ProviderResult,
    RefundConfirmation, SavedCard,
};
use crate::tenants::TenantCredentials;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const PROVIDER_NAME: &str = "paytr";

const INIT_ENDPOINT: &str = "/odeme/api/get-token";
const DIRECT_ENDPOINT: &str = "/odeme";
const STATUS_ENDPOINT: &str = "/odeme/durum-sorgu";
const REFUND_ENDPOINT: &str = "/odeme/iade";

const PAYMENT_TYPE: &str = "card";
const SECRET_FIELDS: [&str; 3] = ["paytr_token", "utoken", "ctoken"];

/// PayTR endpoint and page configuration shared by all tenants
#[derive(Debug, Clone)]
pub struct PaytrConfig {
    /// PayTR API base URL (defaults to https://www.paytr.com)
    pub base_url: String,
    /// Hosted payment page; the iframe URL is `{iframe_base_url}/{token}`
    pub iframe_base_url: String,
    pub merchant_ok_url: String,
    pub merchant_fail_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Minutes the hosted form stays valid
    pub timeout_limit_minutes: u32,
    pub max_installment: i32,
    pub lang: String,
    pub debug_on: bool,
}

impl Default for PaytrConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.paytr.com".to_string(),
            iframe_base_url: "https://www.paytr.com/odeme/guvenli".to_string(),
            merchant_ok_url: String::new(),
            merchant_fail_url: String::new(),
            timeout_secs: 10,
            timeout_limit_minutes: 30,
            max_installment: 0,
            lang: "tr".to_string(),
            debug_on: false,
        }
    }
}

/// HTTP client for gateway calls, built once and shared across tenants
pub fn build_client(timeout_secs: u64) -> AppResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AppError::configuration(format!("failed to create HTTP client: {}", e)))
}

/// PayTR adapter bound to one tenant's credentials
pub struct PaytrProvider {
    config: Arc<PaytrConfig>,
    client: Client,
    credentials: TenantCredentials,
    tenant_id: Uuid,
    methods: Arc<dyn PaymentMethodStore>,
}

type Form = Vec<(&'static str, String)>;

impl PaytrProvider {
    pub fn new(
        config: Arc<PaytrConfig>,
        client: Client,
        credentials: TenantCredentials,
        tenant_id: Uuid,
        methods: Arc<dyn PaymentMethodStore>,
    ) -> Self {
        Self {
            config,
            client,
            credentials,
            tenant_id,
            methods,
        }
    }

    fn protocol(&self) -> HashProtocol<'_> {
        HashProtocol::new(
            &self.credentials.merchant_key,
            &self.credentials.merchant_salt,
        )
    }

    /// Form for the hosted-iframe token request
    fn init_form(&self, intent: &PaymentIntent) -> ProviderResult<Form> {
        let amount_minor = minor_units(intent.amount)?;
        let currency = gateway_currency(&intent.currency);
        let token = self.protocol().init_token(&InitTokenFields {
            merchant_id: &self.credentials.merchant_id,
            user_ip: &intent.payer_ip,
            merchant_oid: &intent.merchant_oid,
            email: &intent.payer_email,
            amount_minor,
            payment_type: PAYMENT_TYPE,
            installment_count: intent.installment_count,
            currency,
            test_mode: self.credentials.test_mode,
            non_3d: false,
        });

        let mut form = self.common_fields(intent, amount_minor, currency);
        form.extend([
            ("paytr_token", token),
            ("no_installment", flag(intent.installment_count <= 1).to_string()),
            ("max_installment", self.config.max_installment.to_string()),
            ("timeout_limit", self.config.timeout_limit_minutes.to_string()),
            ("lang", self.config.lang.clone()),
            ("store_card", flag(intent.store_card).to_string()),
        ]);
        Ok(form)
    }

    /// Form for a direct non-3D charge of a stored card
    fn direct_form(&self, intent: &PaymentIntent, card: &SavedCard) -> ProviderResult<Form> {
        let amount_minor = minor_units(intent.amount)?;
        let currency = gateway_currency(&intent.currency);
        let token = self.protocol().init_token(&InitTokenFields {
            merchant_id: &self.credentials.merchant_id,
            user_ip: &intent.payer_ip,
            merchant_oid: &intent.merchant_oid,
            email: &intent.payer_email,
            amount_minor,
            payment_type: PAYMENT_TYPE,
            installment_count: intent.installment_count,
            currency,
            test_mode: self.credentials.test_mode,
            non_3d: true,
        });

        let mut form = self.common_fields(intent, amount_minor, currency);
        form.extend([
            ("paytr_token", token),
            ("payment_type", PAYMENT_TYPE.to_string()),
            ("installment_count", intent.installment_count.to_string()),
            ("non_3d", "1".to_string()),
            ("recurring_payment", "1".to_string()),
            ("sync_mode", "1".to_string()),
            ("client_lang", self.config.lang.clone()),
            ("utoken", card.user_token.clone()),
            ("ctoken", card.card_token.clone()),
        ]);
        Ok(form)
    }

    fn common_fields(&self, intent: &PaymentIntent, amount_minor: i64, currency: &str) -> Form {
        let name = intent
            .payer_name
            .clone()
            .unwrap_or_else(|| intent.payer_email.clone());
        vec![
            ("merchant_id", self.credentials.merchant_id.clone()),
            ("user_ip", intent.payer_ip.clone()),
            ("merchant_oid", intent.merchant_oid.clone()),
            ("email", intent.payer_email.clone()),
            ("payment_amount", amount_minor.to_string()),
            ("currency", currency.to_string()),
            ("user_basket", user_basket(intent)),
            ("user_name", name),
            ("user_address", "-".to_string()),
            ("user_phone", "-".to_string()),
            ("merchant_ok_url", self.config.merchant_ok_url.clone()),
            ("merchant_fail_url", self.config.merchant_fail_url.clone()),
            ("test_mode", flag(self.credentials.test_mode).to_string()),
            ("debug_on", flag(self.config.debug_on).to_string()),
        ]
    }

    fn status_form(&self, merchant_oid: &str) -> Form {
        vec![
            ("merchant_id", self.credentials.merchant_id.clone()),
            ("merchant_oid", merchant_oid.to_string()),
            ("paytr_token", self.protocol().status_query_token(merchant_oid)),
        ]
    }

    fn refund_form(&self, merchant_oid: &str, amount_minor: i64, reference: &str) -> Form {
        vec![
            ("merchant_id", self.credentials.merchant_id.clone()),
            ("merchant_oid", merchant_oid.to_string()),
            ("return_amount", amount_minor.to_string()),
            ("reference_no", reference.to_string()),
            ("paytr_token", self.protocol().refund_token(merchant_oid, amount_minor)),
        ]
    }

    /// POST a form and decode PayTR's JSON reply.
    ///
    /// Network errors, non-2xx responses and `status != "success"` all come
    /// back as [`ProviderFailure`] with the request redacted.
    async fn post_form(&self, endpoint: &str, form: &Form) -> ProviderResult<serde_json::Value> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let raw_request = redacted(form);

        let response = match self.client.post(&url).form(form).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "PayTR request failed");
                return Err(ProviderFailure::new(format!("request to PayTR failed: {}", e))
                    .retryable()
                    .with_request(raw_request));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(endpoint = %endpoint, status = %status, "PayTR API error");
            let mut failure = ProviderFailure::new(format!("HTTP {} from PayTR", status))
                .with_code(status.as_str())
                .with_request(raw_request)
                .with_response(serde_json::json!({ "body": body }));
            failure.is_retryable = status.is_server_error();
            return Err(failure);
        }

        let json: serde_json::Value = match serde_json::from_str(&body) {
            Ok(json) => json,
            Err(e) => {
                error!(endpoint = %endpoint, "Failed to parse PayTR response: {}", e);
                return Err(ProviderFailure::new(format!("invalid response format: {}", e))
                    .with_request(raw_request)
                    .with_response(serde_json::json!({ "body": body })));
            }
        };

        interpret(json).map_err(|failure| failure.with_request(raw_request))
    }
}

#[async_trait]
impl PaymentProvider for PaytrProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initialize(&self, intent: &PaymentIntent) -> ProviderResult<Initialized> {
        if let Some(card) = &intent.saved_card {
            info!(
                "Charging stored PayTR card: {} {} {}",
                intent.amount, intent.currency, intent.merchant_oid
            );
            let form = self.direct_form(intent, card)?;
            let response = self.post_form(DIRECT_ENDPOINT, &form).await?;
            info!(merchant_oid = %intent.merchant_oid, "PayTR stored card charge accepted");
            return Ok(Initialized {
                merchant_oid: intent.merchant_oid.clone(),
                token: None,
                iframe_url: None,
                raw_response: response,
            });
        }

        info!(
            "Initiating PayTR payment: {} {} {}",
            intent.amount, intent.currency, intent.merchant_oid
        );
        let form = self.init_form(intent)?;
        let response = self.post_form(INIT_ENDPOINT, &form).await?;

        let token = response
            .get("token")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderFailure::new("PayTR returned success without a token")
                    .with_response(response.clone())
            })?;

        info!(merchant_oid = %intent.merchant_oid, "PayTR iframe token issued");
        Ok(Initialized {
            merchant_oid: intent.merchant_oid.clone(),
            iframe_url: Some(format!(
                "{}/{}",
                self.config.iframe_base_url.trim_end_matches('/'),
                token
            )),
            token: Some(token),
            raw_response: response,
        })
    }

    async fn query_status(&self, merchant_oid: &str) -> ProviderResult<serde_json::Value> {
        info!("Querying PayTR payment status: merchant_oid={}", merchant_oid);
        self.post_form(STATUS_ENDPOINT, &self.status_form(merchant_oid))
            .await
    }

    async fn refund(&self, payment: &Payment, amount: Decimal) -> ProviderResult<RefundConfirmation> {
        if amount <= Decimal::ZERO {
            return Err(ProviderFailure::new("refund amount must be positive"));
        }
        let remaining = payment
            .refundable_amount()
            .map_err(|e| ProviderFailure::new(e.to_string()))?;
        if amount > remaining {
            return Err(ProviderFailure::new(format!(
                "refund of {} exceeds remaining refundable balance {}",
                amount, remaining
            )));
        }

        info!(
            "Processing PayTR refund: {} {} {}",
            amount, payment.currency, payment.merchant_oid
        );
        let amount_minor = minor_units(amount)?;
        let reference = format!("RF{}", Uuid::new_v4().simple());
        let form = self.refund_form(&payment.merchant_oid, amount_minor, &reference);
        let response = self.post_form(REFUND_ENDPOINT, &form).await?;

        let reference = response
            .get("reference_no")
            .and_then(|r| r.as_str())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or(reference);

        info!(
            merchant_oid = %payment.merchant_oid,
            reference = %reference,
            "PayTR refund confirmed"
        );
        Ok(RefundConfirmation {
            reference,
            amount,
            raw_response: response,
        })
    }

    fn validate_callback(&self, fields: &HashMap<String, String>) -> bool {
        let callback = match CallbackFields::parse(fields) {
            Ok(callback) => callback,
            Err(_) => return false,
        };
        self.protocol().verify_callback(
            &callback.merchant_oid,
            &callback.status,
            &callback.total_amount,
            &callback.hash,
        )
    }

    async fn list_payment_methods(&self, contact_id: &str) -> AppResult<Vec<PaymentMethod>> {
        let methods = self
            .methods
            .list_for_contact(self.tenant_id, contact_id)
            .await?;
        Ok(methods
            .into_iter()
            .filter(|m| m.provider == PROVIDER_NAME)
            .collect())
    }

    async fn charge_saved_method(
        &self,
        contact_id: &str,
        method_id: Uuid,
        mut intent: PaymentIntent,
    ) -> AppResult<ProviderResult<Initialized>> {
        let method = self
            .methods
            .find(self.tenant_id, method_id)
            .await?
            .filter(|m| m.contact_id == contact_id && m.provider == PROVIDER_NAME)
            .ok_or_else(|| AppError::not_found("PaymentMethod", method_id.to_string()))?;

        intent.saved_card = Some(SavedCard {
            user_token: method.user_token,
            card_token: method.card_token,
        });
        intent.store_card = false;
        Ok(self.initialize(&intent).await)
    }

    async fn delete_payment_method(&self, contact_id: &str, method_id: Uuid) -> AppResult<bool> {
        let deleted = self
            .methods
            .soft_delete(self.tenant_id, contact_id, method_id)
            .await?;
        if !deleted {
            warn!(method_id = %method_id, "Stored card not found for deletion");
        }
        Ok(deleted)
    }
}

/// Map a decoded PayTR body onto success or a failure carrying its reason
fn interpret(body: serde_json::Value) -> ProviderResult<serde_json::Value> {
    if body.get("status").and_then(|s| s.as_str()) == Some("success") {
        return Ok(body);
    }

    let reason = ["reason", "err_msg", "failed_reason_msg"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .unwrap_or("PayTR declined the request")
        .to_string();
    let code = body
        .get("err_no")
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .or_else(|| body.get("status").and_then(|s| s.as_str()).map(str::to_string));

    warn!("PayTR declined request: {}", reason);
    let mut failure = ProviderFailure::new(reason).declined().with_response(body);
    failure.code = code;
    Err(failure)
}

fn minor_units(amount: Decimal) -> ProviderResult<i64> {
    hash::to_minor_units(amount).map_err(|e| ProviderFailure::new(e.to_string()))
}

/// PayTR spells the Turkish lira `TL`
fn gateway_currency(currency: &str) -> &str {
    match currency {
        "TRY" | "TL" => "TL",
        other => other,
    }
}

/// base64 JSON basket with a single line item for the full amount
fn user_basket(intent: &PaymentIntent) -> String {
    let description = intent.description.as_deref().unwrap_or("Payment");
    let basket = serde_json::json!([[description, intent.amount.round_dp(2).to_string(), 1]]);
    STANDARD.encode(basket.to_string())
}

fn redacted(form: &Form) -> serde_json::Value {
    let map = form
        .iter()
        .map(|(key, value)| {
            let value = if SECRET_FIELDS.contains(key) {
                "[redacted]".to_string()
            } else {
                value.clone()
            };
            (key.to_string(), serde_json::Value::String(value))
        })
        .collect();
    serde_json::Value::Object(map)
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
