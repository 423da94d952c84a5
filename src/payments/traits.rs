//! Payment provider trait definitions
//!
//! Defines the capability set every gateway adapter implements so a new
//! gateway can be registered without touching the orchestrator or ledger.

use crate::error::AppResult;
use crate::payments::models::{Payment, PaymentMethod};
use crate::payments::types::{Initialized, PaymentIntent, ProviderResult, RefundConfirmation};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// Trait for payment provider implementations
///
/// An instance is bound to exactly one tenant's credentials. Gateway calls
/// return a [`ProviderResult`]; only local storage problems surface as
/// `AppError`.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Registry name, e.g. `paytr`
    fn name(&self) -> &'static str;

    /// Start a payment with the gateway
    ///
    /// # Arguments
    /// * `intent` - amount, currency, payer details and optional saved card
    ///
    /// # Returns
    /// * `Initialized` - hosted form token and URL for iframe payments
    async fn initialize(&self, intent: &PaymentIntent) -> ProviderResult<Initialized>;

    /// Ask the gateway for the current status of a payment.
    ///
    /// Used for reconciliation only; settlement is driven by callbacks.
    async fn query_status(&self, merchant_oid: &str) -> ProviderResult<serde_json::Value>;

    /// Refund `amount` (major units) of a settled payment
    async fn refund(&self, payment: &Payment, amount: Decimal) -> ProviderResult<RefundConfirmation>;

    /// Authenticate a raw callback. Missing required fields fail before any
    /// hash is computed.
    fn validate_callback(&self, fields: &HashMap<String, String>) -> bool;

    /// Stored cards for a contact. Backed by local storage.
    async fn list_payment_methods(&self, contact_id: &str) -> AppResult<Vec<PaymentMethod>>;

    /// Charge a stored card. Local lookup errors are `Err`, gateway outcomes
    /// are the inner result.
    async fn charge_saved_method(
        &self,
        contact_id: &str,
        method_id: Uuid,
        intent: PaymentIntent,
    ) -> AppResult<ProviderResult<Initialized>>;

    /// Soft-delete a stored card
    async fn delete_payment_method(&self, contact_id: &str, method_id: Uuid) -> AppResult<bool>;

    fn supports_subscriptions(&self) -> bool {
        false
    }
}
