//! Platform payment queries
//!
//! The platform posts every payment action to one endpoint, discriminated by
//! `type`. Each variant maps onto a single orchestrator call.

use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{success, AppState};
use crate::error::AppResult;
use crate::payments::orchestrator::{AttemptOutcome, CreatePaymentRequest};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PaymentQuery {
    Verify {
        location_id: String,
        transaction_id: String,
    },
    /// Ask the gateway about a pending payment
    Reconcile {
        location_id: String,
        transaction_id: String,
    },
    ListPaymentMethods {
        location_id: String,
        contact_id: String,
    },
    ChargePayment {
        location_id: String,
        contact_id: String,
        payment_method_id: Uuid,
        transaction_id: String,
        amount: Decimal,
        currency: String,
        email: String,
        payer_ip: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    DeletePaymentMethod {
        location_id: String,
        contact_id: String,
        payment_method_id: Uuid,
    },
    CreateSubscription {
        location_id: String,
    },
    Refund {
        location_id: String,
        transaction_id: String,
        /// Full remaining balance when absent
        #[serde(default)]
        amount: Option<Decimal>,
    },
}

impl PaymentQuery {
    pub fn location_id(&self) -> &str {
        match self {
            PaymentQuery::Verify { location_id, .. }
            | PaymentQuery::Reconcile { location_id, .. }
            | PaymentQuery::ListPaymentMethods { location_id, .. }
            | PaymentQuery::ChargePayment { location_id, .. }
            | PaymentQuery::DeletePaymentMethod { location_id, .. }
            | PaymentQuery::CreateSubscription { location_id }
            | PaymentQuery::Refund { location_id, .. } => location_id,
        }
    }
}

pub async fn payment_query(
    State(state): State<AppState>,
    Json(query): Json<PaymentQuery>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let tenant = state.tenants.find_active(query.location_id()).await?;
    let orchestrator = &state.orchestrator;

    let response = match query {
        PaymentQuery::Verify { transaction_id, .. } => {
            let projection = orchestrator.verify_payment(&tenant, &transaction_id).await?;
            (StatusCode::OK, Json(json!(projection)))
        }
        PaymentQuery::Reconcile { transaction_id, .. } => {
            let projection = orchestrator
                .reconcile_payment(&tenant, &transaction_id)
                .await?;
            (StatusCode::OK, Json(json!(projection)))
        }
        PaymentQuery::ListPaymentMethods { contact_id, .. } => {
            let methods = orchestrator.list_payment_methods(&tenant, &contact_id).await?;
            let methods: Vec<serde_json::Value> = methods
                .iter()
                .map(|m| {
                    json!({
                        "id": m.id,
                        "type": "card",
                        "title": m.card_brand.clone().unwrap_or_else(|| "Card".to_string()),
                        "subTitle": m.last_four.as_ref().map(|l| format!("**** {}", l)),
                        "expiry": match (&m.exp_month, &m.exp_year) {
                            (Some(month), Some(year)) => Some(format!("{}/{}", month, year)),
                            _ => None,
                        },
                    })
                })
                .collect();
            success(json!({ "paymentMethods": methods }))
        }
        PaymentQuery::ChargePayment {
            contact_id,
            payment_method_id,
            transaction_id,
            amount,
            currency,
            email,
            payer_ip,
            name,
            description,
            ..
        } => {
            let request = CreatePaymentRequest {
                transaction_id,
                contact_id: Some(contact_id.clone()),
                amount,
                currency,
                payer_email: email,
                payer_ip,
                payer_name: name,
                description,
                installment_count: 0,
                store_card: false,
            };
            let outcome = orchestrator
                .charge_payment(&tenant, &contact_id, payment_method_id, request)
                .await?;
            match outcome {
                AttemptOutcome::Started { payment, .. } => success(json!({
                    "chargeId": payment.merchant_oid,
                    "status": payment.status,
                })),
                AttemptOutcome::Declined { payment, failure } => (
                    StatusCode::OK,
                    Json(json!({
                        "success": false,
                        "failed": true,
                        "chargeId": payment.merchant_oid,
                        "message": failure.reason,
                    })),
                ),
            }
        }
        PaymentQuery::DeletePaymentMethod {
            contact_id,
            payment_method_id,
            ..
        } => {
            let deleted = orchestrator
                .delete_payment_method(&tenant, &contact_id, payment_method_id)
                .await?;
            (StatusCode::OK, Json(json!({ "success": deleted })))
        }
        PaymentQuery::CreateSubscription { .. } => {
            match orchestrator.create_subscription(&tenant).await? {
                Ok(()) => success(json!({})),
                Err(failure) => (
                    StatusCode::OK,
                    Json(json!({
                        "success": false,
                        "code": failure.code,
                        "message": failure.reason,
                    })),
                ),
            }
        }
        PaymentQuery::Refund {
            transaction_id,
            amount,
            ..
        } => {
            let refund = orchestrator
                .process_refund(&tenant, &transaction_id, amount)
                .await?;
            success(json!({
                "amount": refund.amount,
                "refundedAmount": refund.refunded_total,
                "reference": refund.reference,
                "status": refund.payment.status,
            }))
        }
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_refund_without_amount() {
        let query: PaymentQuery = serde_json::from_value(json!({
            "type": "refund",
            "locationId": "loc_1",
            "transactionId": "txn_1",
        }))
        .unwrap();

        match query {
            PaymentQuery::Refund { amount, .. } => assert!(amount.is_none()),
            other => panic!("unexpected query {:?}", other),
        }
    }

    #[test]
    fn test_parses_charge_payment() {
        let query: PaymentQuery = serde_json::from_value(json!({
            "type": "charge_payment",
            "locationId": "loc_1",
            "contactId": "contact_1",
            "paymentMethodId": Uuid::nil(),
            "transactionId": "txn_2",
            "amount": "49.90",
            "currency": "TRY",
            "email": "payer@example.com",
            "payerIp": "203.0.113.7",
        }))
        .unwrap();

        assert_eq!(query.location_id(), "loc_1");
        assert!(matches!(query, PaymentQuery::ChargePayment { .. }));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<PaymentQuery, _> = serde_json::from_value(json!({
            "type": "capture",
            "locationId": "loc_1",
        }));
        assert!(result.is_err());
    }
}
