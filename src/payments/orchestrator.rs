//! Payment use cases
//!
//! Coordinates the provider registry, the payment store and the platform
//! notifier. Gateway and platform calls are made outside of the per-payment
//! lock; only [`PaymentStore::apply_transition`] runs under it.

use crate::database::repository::{PaymentStore, TenantStore, TransitionRequest};
use crate::error::{AppError, AppResult};
use crate::payments::ledger::{LedgerEvent, PaymentStatus};
use crate::payments::models::{NewPayment, NewPaymentFailure, NewPaymentMethod, Payment, PaymentMethod};
use crate::payments::notifier::{CaptureEvent, PlatformNotifier};
use crate::payments::registry::ProviderRegistry;
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    CallbackFields, Initialized, PaymentIntent, PaymentProjection, ProviderFailure,
    ProviderResult,
};
use crate::tenants::Tenant;
use chrono::Utc;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_INSTALLMENTS: i32 = 12;

/// Callback fields never copied into failure records
const CALLBACK_SECRETS: [&str; 3] = ["hash", "utoken", "ctoken"];

fn currency_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]{3}$").expect("valid currency regex"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"))
}

/// Fresh gateway order id: `PT` + 32 hex chars, alphanumeric as PayTR requires
pub fn new_merchant_oid() -> String {
    format!("PT{}", Uuid::new_v4().simple())
}

/// A payment the platform asked us to start
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub transaction_id: String,
    pub contact_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub payer_email: String,
    pub payer_ip: String,
    pub payer_name: Option<String>,
    pub description: Option<String>,
    pub installment_count: i32,
    pub store_card: bool,
}

impl CreatePaymentRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.transaction_id.trim().is_empty() {
            return Err(AppError::validation("transaction_id", "is required"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(AppError::validation("amount", "must be positive"));
        }
        if self.amount.round_dp(2) != self.amount {
            return Err(AppError::validation("amount", "must have at most two decimals"));
        }
        if !currency_pattern().is_match(&self.currency) {
            return Err(AppError::validation("currency", "must be an ISO 4217 code"));
        }
        if !email_pattern().is_match(&self.payer_email) {
            return Err(AppError::validation("payer_email", "is not a valid email address"));
        }
        if self.payer_ip.parse::<IpAddr>().is_err() {
            return Err(AppError::validation("payer_ip", "is not a valid IP address"));
        }
        if !(0..=MAX_INSTALLMENTS).contains(&self.installment_count) {
            return Err(AppError::validation(
                "installment_count",
                format!("must be between 0 and {}", MAX_INSTALLMENTS),
            ));
        }
        Ok(())
    }

    fn intent(&self, merchant_oid: &str) -> PaymentIntent {
        PaymentIntent {
            merchant_oid: merchant_oid.to_string(),
            amount: self.amount,
            currency: self.currency.clone(),
            payer_email: self.payer_email.clone(),
            payer_ip: self.payer_ip.clone(),
            payer_name: self.payer_name.clone(),
            description: self.description.clone(),
            installment_count: self.installment_count,
            saved_card: None,
            store_card: self.store_card && self.contact_id.is_some(),
        }
    }
}

/// Result of starting a payment with the gateway
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// Gateway accepted; settlement arrives by callback
    Started {
        payment: Payment,
        initialized: Initialized,
    },
    /// Gateway refused; the payment is already `failed`
    Declined {
        payment: Payment,
        failure: ProviderFailure,
    },
}

impl AttemptOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            AttemptOutcome::Started { payment, .. } | AttemptOutcome::Declined { payment, .. } => {
                payment
            }
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, AttemptOutcome::Started { .. })
    }
}

/// What an accepted callback did
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    pub merchant_oid: String,
    pub status: PaymentStatus,
    /// False for duplicate deliveries
    pub applied: bool,
    pub notified: bool,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub payment: Payment,
    pub amount: Decimal,
    pub reference: String,
    pub refunded_total: Decimal,
}

pub struct PaymentOrchestrator {
    tenants: Arc<dyn TenantStore>,
    payments: Arc<dyn PaymentStore>,
    registry: Arc<ProviderRegistry>,
    notifier: Arc<dyn PlatformNotifier>,
}

impl PaymentOrchestrator {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        payments: Arc<dyn PaymentStore>,
        registry: Arc<ProviderRegistry>,
        notifier: Arc<dyn PlatformNotifier>,
    ) -> Self {
        Self {
            tenants,
            payments,
            registry,
            notifier,
        }
    }

    /// Persist a `pending` payment and initialise it with the gateway.
    ///
    /// A refused initialisation moves the payment straight to `failed` with a
    /// failure record, since no callback will follow.
    pub async fn create_payment(
        &self,
        tenant: &Tenant,
        request: CreatePaymentRequest,
    ) -> AppResult<AttemptOutcome> {
        request.validate()?;
        let provider = self.registry.resolve(tenant, None)?;
        let payment = self.insert_pending(tenant, &request, provider.name(), None).await?;

        let intent = request.intent(&payment.merchant_oid);
        let result = provider.initialize(&intent).await;
        self.finish_attempt(payment, result).await
    }

    /// Charge a stored card for `contact_id`
    pub async fn charge_payment(
        &self,
        tenant: &Tenant,
        contact_id: &str,
        method_id: Uuid,
        mut request: CreatePaymentRequest,
    ) -> AppResult<AttemptOutcome> {
        request.contact_id = Some(contact_id.to_string());
        request.store_card = false;
        request.validate()?;
        let provider = self.registry.resolve(tenant, None)?;

        let metadata = serde_json::json!({ "payment_method_id": method_id.to_string() });
        let payment = self
            .insert_pending(tenant, &request, provider.name(), Some(metadata))
            .await?;

        let intent = request.intent(&payment.merchant_oid);
        let result = match provider
            .charge_saved_method(contact_id, method_id, intent)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                // Unknown card: nothing reached the gateway
                self.fail_payment(
                    &payment,
                    &ProviderFailure::new(e.to_string()).with_code("payment_method"),
                )
                .await?;
                return Err(e);
            }
        };
        self.finish_attempt(payment, result).await
    }

    async fn insert_pending(
        &self,
        tenant: &Tenant,
        request: &CreatePaymentRequest,
        provider: &str,
        metadata: Option<serde_json::Value>,
    ) -> AppResult<Payment> {
        let payment = self
            .payments
            .insert(NewPayment {
                tenant_id: tenant.id,
                merchant_oid: new_merchant_oid(),
                transaction_id: request.transaction_id.clone(),
                contact_id: request.contact_id.clone(),
                amount: request.amount,
                currency: request.currency.clone(),
                provider: provider.to_string(),
                installment_count: request.installment_count,
                payer_email: request.payer_email.clone(),
                payer_ip: request.payer_ip.clone(),
                metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
            })
            .await?;

        info!(
            merchant_oid = %payment.merchant_oid,
            transaction_id = %payment.transaction_id,
            amount = %payment.amount,
            currency = %payment.currency,
            "Payment created"
        );
        Ok(payment)
    }

    async fn finish_attempt(
        &self,
        payment: Payment,
        result: ProviderResult<Initialized>,
    ) -> AppResult<AttemptOutcome> {
        match result {
            Ok(initialized) => {
                let mut patch = serde_json::Map::new();
                if let Some(token) = &initialized.token {
                    patch.insert("token".to_string(), token.clone().into());
                }
                if let Some(url) = &initialized.iframe_url {
                    patch.insert("iframe_url".to_string(), url.clone().into());
                }
                let payment = if patch.is_empty() {
                    payment
                } else {
                    self.payments
                        .merge_metadata(&payment.merchant_oid, serde_json::Value::Object(patch))
                        .await?
                };
                Ok(AttemptOutcome::Started {
                    payment,
                    initialized,
                })
            }
            Err(failure) => {
                warn!(
                    merchant_oid = %payment.merchant_oid,
                    reason = %failure.reason,
                    "Payment initialisation declined"
                );
                let payment = self.fail_payment(&payment, &failure).await?;
                Ok(AttemptOutcome::Declined { payment, failure })
            }
        }
    }

    async fn fail_payment(&self, payment: &Payment, failure: &ProviderFailure) -> AppResult<Payment> {
        let request = TransitionRequest::new(LedgerEvent::Failed {
            reason_code: failure.code.clone(),
            reason_message: Some(failure.reason.clone()),
        })
        .with_failure(failure.to_record());
        let result = self
            .payments
            .apply_transition(&payment.merchant_oid, request)
            .await?;
        Ok(result.payment)
    }

    /// Verify and apply a gateway callback.
    ///
    /// Unknown orders and bad hashes are verification errors with nothing
    /// written. Duplicate deliveries are accepted without side effects. The
    /// platform is notified only on a genuine move into `success`.
    pub async fn process_callback(
        &self,
        raw: &HashMap<String, String>,
    ) -> AppResult<CallbackOutcome> {
        let fields = CallbackFields::parse(raw)?;

        let payment = self
            .payments
            .find_by_merchant_oid(&fields.merchant_oid)
            .await?
            .ok_or_else(|| {
                warn!(merchant_oid = %fields.merchant_oid, "Callback for unknown merchant_oid");
                AppError::verification("unknown merchant_oid")
            })?;

        let tenant = self
            .tenants
            .find_by_id(payment.tenant_id)
            .await?
            .ok_or_else(|| AppError::not_found("Tenant", payment.tenant_id.to_string()))?;
        let provider = self.registry.resolve(&tenant, Some(&payment.provider))?;

        if !provider.validate_callback(raw) {
            warn!(merchant_oid = %fields.merchant_oid, "Rejected callback with invalid hash");
            return Err(AppError::verification("hash mismatch"));
        }

        let request = self.callback_transition(&payment, &fields, raw, provider.as_ref());
        let is_success = fields.is_success();

        let result = match self
            .payments
            .apply_transition(&fields.merchant_oid, request)
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_conflict() && is_success => {
                error!(
                    merchant_oid = %fields.merchant_oid,
                    total_amount = %fields.total_amount,
                    "Success callback for a payment that cannot settle; manual reconciliation required"
                );
                return Err(e);
            }
            Err(e) => {
                warn!(merchant_oid = %fields.merchant_oid, error = %e, "Callback transition rejected");
                return Err(e);
            }
        };

        if !result.outcome.is_applied() {
            info!(
                merchant_oid = %fields.merchant_oid,
                status = %result.outcome.status(),
                "Duplicate callback acknowledged"
            );
        }

        let notified = if result.outcome.is_capture() {
            self.notify_capture(&tenant, &result.payment).await
        } else {
            false
        };

        Ok(CallbackOutcome {
            merchant_oid: fields.merchant_oid,
            status: result.outcome.status(),
            applied: result.outcome.is_applied(),
            notified,
        })
    }

    fn callback_transition(
        &self,
        payment: &Payment,
        fields: &CallbackFields,
        raw: &HashMap<String, String>,
        provider: &dyn PaymentProvider,
    ) -> TransitionRequest {
        if fields.is_success() {
            let card = match (&fields.card, &payment.contact_id) {
                (Some(card), Some(contact_id)) => Some(NewPaymentMethod {
                    tenant_id: payment.tenant_id,
                    contact_id: contact_id.clone(),
                    provider: provider.name().to_string(),
                    user_token: card.user_token.clone(),
                    card_token: card.card_token.clone(),
                    card_brand: card.card_brand.clone(),
                    card_type: card.card_type.clone(),
                    last_four: card.last_four.clone(),
                    exp_month: card.exp_month.clone(),
                    exp_year: card.exp_year.clone(),
                }),
                _ => None,
            };
            return TransitionRequest::new(LedgerEvent::Settled {
                provider_payment_id: fields.payment_id.clone(),
                settled_at: Utc::now(),
            })
            .with_payment_method(card);
        }

        let reason = fields
            .failed_reason_msg
            .clone()
            .unwrap_or_else(|| format!("gateway reported status '{}'", fields.status));
        TransitionRequest::new(LedgerEvent::Failed {
            reason_code: fields.failed_reason_code.clone(),
            reason_message: Some(reason.clone()),
        })
        .with_failure(NewPaymentFailure {
            error_code: fields.failed_reason_code.clone(),
            error_message: reason,
            raw_request: None,
            raw_response: Some(sanitized_callback(raw)),
        })
    }

    /// Best effort; a failed notification never undoes the settlement
    async fn notify_capture(&self, tenant: &Tenant, payment: &Payment) -> bool {
        let event = match CaptureEvent::from_payment(payment, &tenant.location_id) {
            Ok(event) => event,
            Err(e) => {
                warn!(merchant_oid = %payment.merchant_oid, error = %e, "Could not build capture event");
                return false;
            }
        };

        match self.notifier.notify_capture(tenant, &event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    merchant_oid = %payment.merchant_oid,
                    error = %e,
                    "Capture notification failed"
                );
                false
            }
        }
    }

    /// Status projection from stored state; never calls the gateway
    pub async fn verify_payment(
        &self,
        tenant: &Tenant,
        transaction_id: &str,
    ) -> AppResult<PaymentProjection> {
        let payment = self.find_for_transaction(tenant, transaction_id).await?;
        projection(&payment)
    }

    /// Ask the gateway about a `pending` payment and settle it if the gateway
    /// reports success. Other states are returned as stored.
    pub async fn reconcile_payment(
        &self,
        tenant: &Tenant,
        transaction_id: &str,
    ) -> AppResult<PaymentProjection> {
        let payment = self.find_for_transaction(tenant, transaction_id).await?;
        if payment.status != PaymentStatus::Pending {
            return projection(&payment);
        }

        let provider = self.registry.resolve(tenant, Some(&payment.provider))?;
        let status = match provider.query_status(&payment.merchant_oid).await {
            Ok(status) => status,
            Err(failure) if failure.is_decline => {
                info!(
                    merchant_oid = %payment.merchant_oid,
                    reason = %failure.reason,
                    "Gateway does not report the payment as settled"
                );
                return projection(&payment);
            }
            Err(failure) => {
                warn!(
                    merchant_oid = %payment.merchant_oid,
                    reason = %failure.reason,
                    "Status query failed"
                );
                return Err(failure.into_app_error(provider.name()));
            }
        };

        let provider_payment_id = status
            .get("payment_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let result = self
            .payments
            .apply_transition(
                &payment.merchant_oid,
                TransitionRequest::new(LedgerEvent::Settled {
                    provider_payment_id,
                    settled_at: Utc::now(),
                }),
            )
            .await?;

        if result.outcome.is_capture() {
            info!(merchant_oid = %payment.merchant_oid, "Payment settled by status query");
            self.notify_capture(tenant, &result.payment).await;
        }
        projection(&result.payment)
    }

    /// Refund `amount`, or the whole remaining balance when `None`
    pub async fn process_refund(
        &self,
        tenant: &Tenant,
        transaction_id: &str,
        amount: Option<Decimal>,
    ) -> AppResult<RefundOutcome> {
        let payment = self.find_for_transaction(tenant, transaction_id).await?;
        if !payment.status.is_refundable() {
            return Err(AppError::conflict(format!(
                "payment {} cannot be refunded in status {}",
                payment.merchant_oid, payment.status
            )));
        }

        let remaining = payment.refundable_amount()?;
        let amount = amount.unwrap_or(remaining);
        if amount <= Decimal::ZERO {
            return Err(AppError::validation("amount", "refund amount must be positive"));
        }
        if amount.round_dp(2) != amount {
            return Err(AppError::validation("amount", "must have at most two decimals"));
        }
        if amount > remaining {
            return Err(AppError::conflict(format!(
                "refund of {} exceeds remaining refundable balance {}",
                amount, remaining
            )));
        }

        let provider = self.registry.resolve(tenant, Some(&payment.provider))?;
        let confirmation = match provider.refund(&payment, amount).await {
            Ok(confirmation) => confirmation,
            Err(failure) => {
                warn!(
                    merchant_oid = %payment.merchant_oid,
                    reason = %failure.reason,
                    "Refund declined by gateway"
                );
                self.payments
                    .record_failure(tenant.id, Some(&payment), failure.to_record())
                    .await?;
                return Err(failure.into_app_error(provider.name()));
            }
        };

        let result = self
            .payments
            .apply_transition(
                &payment.merchant_oid,
                TransitionRequest::new(LedgerEvent::Refunded {
                    amount: confirmation.amount,
                    reference: confirmation.reference.clone(),
                    refunded_at: Utc::now(),
                }),
            )
            .await
            .map_err(|e| {
                error!(
                    merchant_oid = %payment.merchant_oid,
                    reference = %confirmation.reference,
                    error = %e,
                    "Gateway refunded but the ledger rejected the refund"
                );
                e
            })?;

        let refunded_total = result.payment.refunded_amount()?;
        info!(
            merchant_oid = %payment.merchant_oid,
            amount = %amount,
            status = %result.payment.status,
            "Refund applied"
        );
        Ok(RefundOutcome {
            payment: result.payment,
            amount,
            reference: confirmation.reference,
            refunded_total,
        })
    }

    pub async fn list_payment_methods(
        &self,
        tenant: &Tenant,
        contact_id: &str,
    ) -> AppResult<Vec<PaymentMethod>> {
        self.registry
            .resolve(tenant, None)?
            .list_payment_methods(contact_id)
            .await
    }

    pub async fn delete_payment_method(
        &self,
        tenant: &Tenant,
        contact_id: &str,
        method_id: Uuid,
    ) -> AppResult<bool> {
        self.registry
            .resolve(tenant, None)?
            .delete_payment_method(contact_id, method_id)
            .await
    }

    /// Recurring billing is a provider capability; PayTR does not offer it
    pub async fn create_subscription(&self, tenant: &Tenant) -> AppResult<ProviderResult<()>> {
        let provider = self.registry.resolve(tenant, None)?;
        if provider.supports_subscriptions() {
            return Err(AppError::configuration(format!(
                "subscriptions for {} are not wired",
                provider.name()
            )));
        }
        Ok(Err(ProviderFailure::new(format!(
            "subscriptions are not supported by {}",
            provider.name()
        ))
        .with_code("unsupported")))
    }

    async fn find_for_transaction(&self, tenant: &Tenant, transaction_id: &str) -> AppResult<Payment> {
        if transaction_id.trim().is_empty() {
            return Err(AppError::validation("transaction_id", "is required"));
        }
        self.payments
            .find_by_transaction_id(tenant.id, transaction_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment", transaction_id))
    }
}

pub fn projection(payment: &Payment) -> AppResult<PaymentProjection> {
    Ok(PaymentProjection {
        transaction_id: payment.transaction_id.clone(),
        charge_id: payment.merchant_oid.clone(),
        status: payment.status.to_string(),
        success: payment.status.is_settled(),
        failed: payment.status == PaymentStatus::Failed,
        amount: payment.amount,
        refunded_amount: payment.refunded_amount()?,
        currency: payment.currency.clone(),
        charged_at: payment.paid_at,
        error_message: payment.error_message.clone(),
    })
}

fn sanitized_callback(raw: &HashMap<String, String>) -> serde_json::Value {
    let map = raw
        .iter()
        .filter(|(key, _)| !CALLBACK_SECRETS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
        .collect();
    serde_json::Value::Object(map)
}
