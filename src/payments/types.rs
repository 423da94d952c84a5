//! Gateway-agnostic request, callback and outcome types

use crate::error::{AppError, AppResult};
use crate::payments::models::NewPaymentFailure;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Saved card token pair used to charge without the hosted form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCard {
    pub user_token: String,
    pub card_token: String,
}

/// Everything a provider needs to start a payment.
///
/// Payer IP and email are carried explicitly; providers never look them up
/// from an ambient request context.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub merchant_oid: String,
    pub amount: Decimal,
    pub currency: String,
    pub payer_email: String,
    pub payer_ip: String,
    pub payer_name: Option<String>,
    pub description: Option<String>,
    pub installment_count: i32,
    pub saved_card: Option<SavedCard>,
    /// Ask the gateway to tokenise the card for later charges
    pub store_card: bool,
}

/// Successful initialisation
#[derive(Debug, Clone, PartialEq)]
pub struct Initialized {
    pub merchant_oid: String,
    pub token: Option<String>,
    pub iframe_url: Option<String>,
    pub raw_response: serde_json::Value,
}

/// Successful refund as confirmed by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct RefundConfirmation {
    pub reference: String,
    pub amount: Decimal,
    pub raw_response: serde_json::Value,
}

/// Uniform failure for network errors, non-2xx responses and declines
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub reason: String,
    pub code: Option<String>,
    pub is_retryable: bool,
    /// The gateway answered and said no, as opposed to a transport or decode failure
    pub is_decline: bool,
    pub raw_request: Option<serde_json::Value>,
    pub raw_response: Option<serde_json::Value>,
}

impl ProviderFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            code: None,
            is_retryable: false,
            is_decline: false,
            raw_request: None,
            raw_response: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.is_retryable = true;
        self
    }

    pub fn declined(mut self) -> Self {
        self.is_decline = true;
        self
    }

    pub fn with_request(mut self, request: serde_json::Value) -> Self {
        self.raw_request = Some(request);
        self
    }

    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.raw_response = Some(response);
        self
    }

    pub fn to_record(&self) -> NewPaymentFailure {
        NewPaymentFailure {
            error_code: self.code.clone(),
            error_message: self.reason.clone(),
            raw_request: self.raw_request.clone(),
            raw_response: self.raw_response.clone(),
        }
    }

    pub fn into_app_error(self, provider: &str) -> AppError {
        AppError::gateway(provider, self.reason, self.is_retryable)
    }
}

/// Provider calls report outcomes, never errors
pub type ProviderResult<T> = Result<T, ProviderFailure>;

/// Card details attached to a callback when the gateway stored the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackCard {
    pub user_token: String,
    pub card_token: String,
    pub card_type: Option<String>,
    pub card_brand: Option<String>,
    pub last_four: Option<String>,
    pub exp_month: Option<String>,
    pub exp_year: Option<String>,
}

/// Inbound gateway callback after required-field checks
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackFields {
    pub merchant_oid: String,
    pub status: String,
    /// Integer minor units as sent
    pub total_amount: String,
    pub hash: String,
    pub payment_id: Option<String>,
    pub failed_reason_code: Option<String>,
    pub failed_reason_msg: Option<String>,
    pub card: Option<CallbackCard>,
}

pub const REQUIRED_CALLBACK_FIELDS: [&str; 4] = ["merchant_oid", "status", "total_amount", "hash"];

impl CallbackFields {
    /// Extract callback fields, rejecting the request if any required one is
    /// missing or blank. This runs before hash verification.
    pub fn parse(raw: &HashMap<String, String>) -> AppResult<Self> {
        if let Some(missing) = missing_required_field(raw) {
            return Err(AppError::verification(format!(
                "missing required callback field '{}'",
                missing
            )));
        }

        // Signed fields keep the exact bytes the gateway sent
        let signed = |name: &str| raw.get(name).cloned().unwrap_or_default();

        let total_amount = signed("total_amount");
        if total_amount.parse::<i64>().is_err() {
            return Err(AppError::verification("total_amount is not an integer"));
        }

        Ok(Self {
            merchant_oid: signed("merchant_oid"),
            status: signed("status"),
            total_amount,
            hash: signed("hash"),
            payment_id: field(raw, "payment_id"),
            failed_reason_code: field(raw, "failed_reason_code"),
            failed_reason_msg: field(raw, "failed_reason_msg"),
            card: parse_card(raw),
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn total_amount_minor(&self) -> i64 {
        self.total_amount.parse().unwrap_or_default()
    }
}

/// First required callback field that is absent or blank
pub fn missing_required_field(raw: &HashMap<String, String>) -> Option<&'static str> {
    REQUIRED_CALLBACK_FIELDS
        .into_iter()
        .find(|name| field(raw, name).is_none())
}

fn field(raw: &HashMap<String, String>, name: &str) -> Option<String> {
    raw.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_card(raw: &HashMap<String, String>) -> Option<CallbackCard> {
    let user_token = field(raw, "utoken")?;
    let card_token = field(raw, "ctoken")?;

    let last_four = field(raw, "card_last_four").or_else(|| {
        field(raw, "card_pan").map(|pan| {
            let digits: Vec<char> = pan.chars().filter(|c| c.is_ascii_digit()).collect();
            digits[digits.len().saturating_sub(4)..].iter().collect()
        })
    });

    Some(CallbackCard {
        user_token,
        card_token,
        card_type: field(raw, "card_type"),
        card_brand: field(raw, "card_brand"),
        last_four,
        exp_month: field(raw, "card_exp_month"),
        exp_year: field(raw, "card_exp_year"),
    })
}

/// Read-only view of a payment returned to the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProjection {
    pub transaction_id: String,
    pub charge_id: String,
    pub status: String,
    pub success: bool,
    pub failed: bool,
    pub amount: Decimal,
    pub refunded_amount: Decimal,
    pub currency: String,
    pub charged_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_minimal_callback() {
        let fields = CallbackFields::parse(&raw(&[
            ("merchant_oid", "PT1"),
            ("status", "success"),
            ("total_amount", "10000"),
            ("hash", "abc="),
        ]))
        .unwrap();

        assert!(fields.is_success());
        assert_eq!(fields.total_amount_minor(), 10000);
        assert!(fields.card.is_none());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        for name in REQUIRED_CALLBACK_FIELDS {
            let mut fields = raw(&[
                ("merchant_oid", "PT1"),
                ("status", "success"),
                ("total_amount", "10000"),
                ("hash", "abc="),
            ]);
            fields.remove(name);
            let err = CallbackFields::parse(&fields).unwrap_err();
            assert!(err.is_verification(), "{} should be required", name);
        }
    }

    #[test]
    fn test_blank_required_field_is_rejected() {
        let err = CallbackFields::parse(&raw(&[
            ("merchant_oid", "PT1"),
            ("status", "success"),
            ("total_amount", "10000"),
            ("hash", "  "),
        ]))
        .unwrap_err();
        assert!(err.is_verification());
    }

    #[test]
    fn test_signed_fields_are_not_trimmed() {
        let fields = CallbackFields::parse(&raw(&[
            ("merchant_oid", "PT1 "),
            ("status", " success"),
            ("total_amount", "10000"),
            ("hash", "abc= "),
        ]))
        .unwrap();

        assert_eq!(fields.merchant_oid, "PT1 ");
        assert_eq!(fields.status, " success");
        assert_eq!(fields.hash, "abc= ");
        assert!(!fields.is_success());
    }

    #[test]
    fn test_card_last_four_from_pan() {
        let fields = CallbackFields::parse(&raw(&[
            ("merchant_oid", "PT1"),
            ("status", "success"),
            ("total_amount", "10000"),
            ("hash", "abc="),
            ("utoken", "u1"),
            ("ctoken", "c1"),
            ("card_pan", "4355 08** **** 4358"),
            ("card_brand", "world"),
        ]))
        .unwrap();

        let card = fields.card.unwrap();
        assert_eq!(card.last_four.as_deref(), Some("4358"));
        assert_eq!(card.card_brand.as_deref(), Some("world"));
    }

    #[test]
    fn test_card_requires_both_tokens() {
        let fields = CallbackFields::parse(&raw(&[
            ("merchant_oid", "PT1"),
            ("status", "success"),
            ("total_amount", "10000"),
            ("hash", "abc="),
            ("utoken", "u1"),
        ]))
        .unwrap();
        assert!(fields.card.is_none());
    }
}
