//! Payment aggregate and its satellite records

use crate::error::{AppError, AppResult};
use crate::payments::ledger::PaymentStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

const REFUNDS_KEY: &str = "refunds";

/// One payment attempt sent to the gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Internally generated, unique, sent to the gateway as `merchant_oid`
    pub merchant_oid: String,
    /// Platform-side correlation key
    pub transaction_id: String,
    pub contact_id: Option<String>,
    /// Major units, two decimals. Never changes after creation.
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub status: PaymentStatus,
    pub installment_count: i32,
    pub payer_email: String,
    pub payer_ip: String,
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A confirmed refund, appended to `metadata.refunds`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub amount: Decimal,
    pub reference: String,
    pub refunded_at: DateTime<Utc>,
}

impl Payment {
    pub fn refunds(&self) -> AppResult<Vec<RefundRecord>> {
        match self.metadata.get(REFUNDS_KEY) {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                AppError::from(crate::database::error::DatabaseError::corrupt(
                    "payment refund history",
                    e.to_string(),
                ))
            }),
        }
    }

    pub(crate) fn set_refunds(&mut self, refunds: &[RefundRecord]) -> AppResult<()> {
        let value = serde_json::to_value(refunds)
            .map_err(|e| AppError::validation("metadata", e.to_string()))?;
        let mut patch = serde_json::Map::new();
        patch.insert(REFUNDS_KEY.to_string(), value);
        self.merge_metadata(serde_json::Value::Object(patch));
        Ok(())
    }

    pub fn refunded_amount(&self) -> AppResult<Decimal> {
        Ok(self.refunds()?.iter().map(|r| r.amount).sum())
    }

    pub fn refundable_amount(&self) -> AppResult<Decimal> {
        Ok(self.amount - self.refunded_amount()?)
    }

    /// Shallow-merge `patch` into the metadata map. Non-object patches are ignored.
    pub fn merge_metadata(&mut self, patch: serde_json::Value) {
        let serde_json::Value::Object(entries) = patch else {
            return;
        };
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.metadata.as_object_mut() {
            for (key, value) in entries {
                map.insert(key, value);
            }
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Fields required to persist a new `pending` payment
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub tenant_id: Uuid,
    pub merchant_oid: String,
    pub transaction_id: String,
    pub contact_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
    pub installment_count: i32,
    pub payer_email: String,
    pub payer_ip: String,
    pub metadata: serde_json::Value,
}

impl NewPayment {
    pub fn into_payment(self, now: DateTime<Utc>) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            merchant_oid: self.merchant_oid,
            transaction_id: self.transaction_id,
            contact_id: self.contact_id,
            amount: self.amount,
            currency: self.currency,
            provider: self.provider,
            provider_payment_id: None,
            status: PaymentStatus::Pending,
            installment_count: self.installment_count,
            payer_email: self.payer_email,
            payer_ip: self.payer_ip,
            metadata: if self.metadata.is_object() {
                self.metadata
            } else {
                serde_json::json!({})
            },
            error_message: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Append-only record of a failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PaymentFailure {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Absent when the failure happened before the payment was stored
    pub payment_id: Option<Uuid>,
    pub merchant_oid: Option<String>,
    pub error_code: Option<String>,
    pub error_message: String,
    pub raw_request: Option<serde_json::Value>,
    pub raw_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewPaymentFailure {
    pub error_code: Option<String>,
    pub error_message: String,
    pub raw_request: Option<serde_json::Value>,
    pub raw_response: Option<serde_json::Value>,
}

impl NewPaymentFailure {
    pub fn into_failure(
        self,
        tenant_id: Uuid,
        payment: Option<&Payment>,
        now: DateTime<Utc>,
    ) -> PaymentFailure {
        PaymentFailure {
            id: Uuid::new_v4(),
            tenant_id,
            payment_id: payment.map(|p| p.id),
            merchant_oid: payment.map(|p| p.merchant_oid.clone()),
            error_code: self.error_code,
            error_message: self.error_message,
            raw_request: self.raw_request,
            raw_response: self.raw_response,
            created_at: now,
        }
    }
}

/// Stored card token pair issued by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: String,
    pub provider: String,
    #[serde(skip_serializing)]
    pub user_token: String,
    #[serde(skip_serializing)]
    pub card_token: String,
    pub card_brand: Option<String>,
    pub card_type: Option<String>,
    pub last_four: Option<String>,
    pub exp_month: Option<String>,
    pub exp_year: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Card details reported by a callback. Upserted on (tenant, contact, user_token).
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentMethod {
    pub tenant_id: Uuid,
    pub contact_id: String,
    pub provider: String,
    pub user_token: String,
    pub card_token: String,
    pub card_brand: Option<String>,
    pub card_type: Option<String>,
    pub last_four: Option<String>,
    pub exp_month: Option<String>,
    pub exp_year: Option<String>,
}

impl NewPaymentMethod {
    pub fn into_method(self, now: DateTime<Utc>) -> PaymentMethod {
        PaymentMethod {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            contact_id: self.contact_id,
            provider: self.provider,
            user_token: self.user_token,
            card_token: self.card_token,
            card_brand: self.card_brand,
            card_type: self.card_type,
            last_four: self.last_four,
            exp_month: self.exp_month,
            exp_year: self.exp_year,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh masked metadata of an already stored method
    pub fn apply_to(self, method: &mut PaymentMethod, now: DateTime<Utc>) {
        method.card_token = self.card_token;
        method.card_brand = self.card_brand;
        method.card_type = self.card_type;
        method.last_four = self.last_four;
        method.exp_month = self.exp_month;
        method.exp_year = self.exp_year;
        method.is_deleted = false;
        method.updated_at = now;
    }
}

#[cfg(test)]
pub(crate) fn test_payment(amount: Decimal) -> Payment {
    NewPayment {
        tenant_id: Uuid::new_v4(),
        merchant_oid: "PTTEST0001".to_string(),
        transaction_id: "txn_1".to_string(),
        contact_id: Some("contact_1".to_string()),
        amount,
        currency: "TRY".to_string(),
        provider: "paytr".to_string(),
        installment_count: 0,
        payer_email: "payer@example.com".to_string(),
        payer_ip: "203.0.113.7".to_string(),
        metadata: serde_json::json!({}),
    }
    .into_payment(Utc::now())
}
