//! Payment status state machine
//!
//! ```text
//! pending ──► success ──► partial_refund ──► refunded
//!    │           └───────────────────────────►┘
//!    ├──► failed
//!    └──► cancelled
//! ```
//!
//! [`apply`] is the only place a [`Payment`]'s status changes. Stores call it
//! while holding the per-payment lock so the decision and the write are atomic.

use crate::error::{AppError, AppResult};
use crate::payments::models::{Payment, RefundRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    PartialRefund,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::PartialRefund => "partial_refund",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// All statuses reachable in one step
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Success,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Success => &[PaymentStatus::PartialRefund, PaymentStatus::Refunded],
            PaymentStatus::PartialRefund => {
                &[PaymentStatus::PartialRefund, PaymentStatus::Refunded]
            }
            PaymentStatus::Failed | PaymentStatus::Refunded | PaymentStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// The payment captured funds at some point, whatever happened afterwards
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Success | PaymentStatus::PartialRefund | PaymentStatus::Refunded
        )
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::PartialRefund)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            "partial_refund" => Ok(PaymentStatus::PartialRefund),
            "refunded" => Ok(PaymentStatus::Refunded),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Something that happened to a payment and may move its status
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    /// Gateway confirmed capture
    Settled {
        provider_payment_id: Option<String>,
        settled_at: DateTime<Utc>,
    },
    /// Gateway declined or initialization failed
    Failed {
        reason_code: Option<String>,
        reason_message: Option<String>,
    },
    /// Gateway confirmed a refund of `amount`
    Refunded {
        amount: Decimal,
        reference: String,
        refunded_at: DateTime<Utc>,
    },
    Cancelled,
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::Settled { .. } => "settled",
            LedgerEvent::Failed { .. } => "failed",
            LedgerEvent::Refunded { .. } => "refunded",
            LedgerEvent::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Status moved (or refund history grew) and side effects must run
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// Payment was already in the state the event implies
    Unchanged { status: PaymentStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    pub fn status(&self) -> PaymentStatus {
        match self {
            TransitionOutcome::Applied { to, .. } => *to,
            TransitionOutcome::Unchanged { status } => *status,
        }
    }

    /// True only for a genuine move into `success`
    pub fn is_capture(&self) -> bool {
        matches!(
            self,
            TransitionOutcome::Applied {
                from: PaymentStatus::Pending,
                to: PaymentStatus::Success,
            }
        )
    }
}

/// Apply `event` to `payment` in place.
///
/// Returns `Unchanged` for repeats of an already-applied outcome so duplicate
/// gateway deliveries are acknowledged without side effects. Any other move
/// outside the state graph is a conflict and leaves the payment untouched.
pub fn apply(
    payment: &mut Payment,
    event: &LedgerEvent,
    now: DateTime<Utc>,
) -> AppResult<TransitionOutcome> {
    let from = payment.status;

    match event {
        LedgerEvent::Settled {
            provider_payment_id,
            settled_at,
        } => match from {
            PaymentStatus::Pending => {
                payment.status = PaymentStatus::Success;
                payment.provider_payment_id = provider_payment_id.clone();
                payment.paid_at = Some(*settled_at);
                payment.error_message = None;
            }
            status if status.is_settled() => {
                return Ok(TransitionOutcome::Unchanged { status });
            }
            PaymentStatus::Failed => {
                return Err(AppError::conflict(format!(
                    "payment {} already failed; late success requires manual reconciliation",
                    payment.merchant_oid
                )));
            }
            status => return Err(rejected(payment, status, PaymentStatus::Success)),
        },

        LedgerEvent::Failed {
            reason_code,
            reason_message,
        } => match from {
            PaymentStatus::Pending => {
                payment.status = PaymentStatus::Failed;
                payment.error_message = Some(failure_message(reason_code, reason_message));
            }
            PaymentStatus::Failed => {
                return Ok(TransitionOutcome::Unchanged { status: from });
            }
            status => return Err(rejected(payment, status, PaymentStatus::Failed)),
        },

        LedgerEvent::Refunded {
            amount,
            reference,
            refunded_at,
        } => {
            if !from.is_refundable() {
                return Err(AppError::conflict(format!(
                    "payment {} cannot be refunded in status {}",
                    payment.merchant_oid, from
                )));
            }
            if *amount <= Decimal::ZERO {
                return Err(AppError::validation("amount", "refund amount must be positive"));
            }
            if amount.round_dp(2) != *amount {
                return Err(AppError::validation("amount", "must have at most two decimals"));
            }

            let mut history = payment.refunds()?;
            let already_refunded: Decimal = history.iter().map(|r| r.amount).sum();
            let remaining = payment.amount - already_refunded;
            if *amount > remaining {
                return Err(AppError::conflict(format!(
                    "refund of {} exceeds remaining refundable balance {}",
                    amount, remaining
                )));
            }

            history.push(RefundRecord {
                amount: *amount,
                reference: reference.clone(),
                refunded_at: *refunded_at,
            });
            payment.set_refunds(&history)?;

            payment.status = if already_refunded + *amount >= payment.amount {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartialRefund
            };
        }

        LedgerEvent::Cancelled => match from {
            PaymentStatus::Pending => payment.status = PaymentStatus::Cancelled,
            PaymentStatus::Cancelled => {
                return Ok(TransitionOutcome::Unchanged { status: from });
            }
            status => return Err(rejected(payment, status, PaymentStatus::Cancelled)),
        },
    }

    payment.updated_at = now;
    Ok(TransitionOutcome::Applied {
        from,
        to: payment.status,
    })
}

fn rejected(payment: &Payment, from: PaymentStatus, to: PaymentStatus) -> AppError {
    AppError::conflict(format!(
        "payment {} cannot move from {} to {}",
        payment.merchant_oid, from, to
    ))
}

fn failure_message(code: &Option<String>, message: &Option<String>) -> String {
    match (code, message) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (None, Some(message)) => message.clone(),
        (Some(code), None) => code.clone(),
        (None, None) => "payment failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::models::test_payment;
    use rust_decimal_macros::dec;

    fn settle(payment: &mut Payment) -> AppResult<TransitionOutcome> {
        apply(
            payment,
            &LedgerEvent::Settled {
                provider_payment_id: Some("pay_1".to_string()),
                settled_at: Utc::now(),
            },
            Utc::now(),
        )
    }

    fn refund(payment: &mut Payment, amount: Decimal) -> AppResult<TransitionOutcome> {
        apply(
            payment,
            &LedgerEvent::Refunded {
                amount,
                reference: format!("rf_{}", amount),
                refunded_at: Utc::now(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Success,
            PaymentStatus::Failed,
            PaymentStatus::PartialRefund,
            PaymentStatus::Refunded,
            PaymentStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>(), Ok(status));
        }
        assert!("settled".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_pending_never_jumps_to_refunded() {
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Refunded));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::PartialRefund));

        let mut payment = test_payment(dec!(100.00));
        let err = refund(&mut payment, dec!(10.00)).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_sub_cent_refund_rejected() {
        let mut payment = test_payment(dec!(100.00));
        settle(&mut payment).unwrap();

        let err = refund(&mut payment, dec!(0.004)).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.refunded_amount().unwrap(), dec!(0));
    }

    #[test]
    fn test_terminal_states() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
        assert!(!PaymentStatus::PartialRefund.is_terminal());
    }

    #[test]
    fn test_settle_sets_provider_id_and_timestamp() {
        let mut payment = test_payment(dec!(100.00));
        let outcome = settle(&mut payment).unwrap();

        assert!(outcome.is_capture());
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.provider_payment_id.as_deref(), Some("pay_1"));
        assert!(payment.paid_at.is_some());
    }

    #[test]
    fn test_repeat_settle_is_unchanged() {
        let mut payment = test_payment(dec!(100.00));
        settle(&mut payment).unwrap();
        let updated_at = payment.updated_at;

        let outcome = settle(&mut payment).unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Unchanged {
                status: PaymentStatus::Success
            }
        );
        assert!(!outcome.is_capture());
        assert_eq!(payment.updated_at, updated_at);
    }

    #[test]
    fn test_settle_after_refund_is_unchanged() {
        let mut payment = test_payment(dec!(100.00));
        settle(&mut payment).unwrap();
        refund(&mut payment, dec!(30.00)).unwrap();

        let outcome = settle(&mut payment).unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(payment.status, PaymentStatus::PartialRefund);
    }

    #[test]
    fn test_late_success_on_failed_payment_conflicts() {
        let mut payment = test_payment(dec!(100.00));
        apply(
            &mut payment,
            &LedgerEvent::Failed {
                reason_code: Some("0".to_string()),
                reason_message: Some("timeout".to_string()),
            },
            Utc::now(),
        )
        .unwrap();

        let err = settle(&mut payment).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.error_message.as_deref(), Some("0: timeout"));
    }

    #[test]
    fn test_failure_after_success_conflicts() {
        let mut payment = test_payment(dec!(100.00));
        settle(&mut payment).unwrap();

        let err = apply(
            &mut payment,
            &LedgerEvent::Failed {
                reason_code: None,
                reason_message: None,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(payment.status, PaymentStatus::Success);
    }

    #[test]
    fn test_partial_then_full_refund() {
        let mut payment = test_payment(dec!(100.00));
        settle(&mut payment).unwrap();

        let first = refund(&mut payment, dec!(40.00)).unwrap();
        assert_eq!(
            first,
            TransitionOutcome::Applied {
                from: PaymentStatus::Success,
                to: PaymentStatus::PartialRefund
            }
        );
        assert_eq!(payment.refunded_amount().unwrap(), dec!(40.00));

        let second = refund(&mut payment, dec!(60.00)).unwrap();
        assert_eq!(second.status(), PaymentStatus::Refunded);
        assert_eq!(payment.refunded_amount().unwrap(), dec!(100.00));
        assert_eq!(payment.amount, dec!(100.00));
        assert_eq!(payment.refunds().unwrap().len(), 2);
    }

    #[test]
    fn test_refund_beyond_balance_is_rejected_without_mutation() {
        let mut payment = test_payment(dec!(100.00));
        settle(&mut payment).unwrap();
        refund(&mut payment, dec!(70.00)).unwrap();

        let err = refund(&mut payment, dec!(30.01)).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(payment.status, PaymentStatus::PartialRefund);
        assert_eq!(payment.refunded_amount().unwrap(), dec!(70.00));
    }

    #[test]
    fn test_refund_on_fully_refunded_payment_conflicts() {
        let mut payment = test_payment(dec!(100.00));
        settle(&mut payment).unwrap();
        refund(&mut payment, dec!(100.00)).unwrap();

        let err = refund(&mut payment, dec!(20.00)).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(payment.status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_refund_monotonicity() {
        let amounts = [dec!(10.00), dec!(25.50), dec!(0.01), dec!(64.49), dec!(5.00)];
        let mut payment = test_payment(dec!(100.00));
        settle(&mut payment).unwrap();

        for amount in amounts {
            let _ = refund(&mut payment, amount);
            let refunded = payment.refunded_amount().unwrap();
            assert!(refunded <= payment.amount);
            if refunded == payment.amount {
                assert_eq!(payment.status, PaymentStatus::Refunded);
            } else {
                assert_eq!(payment.status, PaymentStatus::PartialRefund);
            }
        }
        assert_eq!(payment.refunded_amount().unwrap(), dec!(100.00));
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut payment = test_payment(dec!(50.00));
        let outcome = apply(&mut payment, &LedgerEvent::Cancelled, Utc::now()).unwrap();
        assert_eq!(outcome.status(), PaymentStatus::Cancelled);

        let repeat = apply(&mut payment, &LedgerEvent::Cancelled, Utc::now()).unwrap();
        assert!(!repeat.is_applied());

        let err = settle(&mut payment).unwrap_err();
        assert!(err.is_conflict());
    }
}
