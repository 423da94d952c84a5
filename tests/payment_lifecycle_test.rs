//! End-to-end payment flows through the orchestrator, the PayTR adapter and
//! the in-memory ledger. The gateway is a local HTTP stand-in.

mod common;

use common::{payment_request, signed_callback, Harness};
use crm_paytr_bridge::database::repository::{PaymentMethodStore, PaymentStore};
use crm_paytr_bridge::payments::ledger::PaymentStatus;
use crm_paytr_bridge::payments::orchestrator::AttemptOutcome;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::Arc;

async fn started_payment(harness: &Harness, transaction_id: &str) -> String {
    let outcome = harness
        .orchestrator
        .create_payment(&harness.tenant, payment_request(transaction_id, dec!(100.00)))
        .await
        .expect("create_payment failed");
    assert!(outcome.is_started());
    outcome.payment().merchant_oid.clone()
}

async fn settled_payment(harness: &Harness, transaction_id: &str) -> String {
    let oid = started_payment(harness, transaction_id).await;
    harness
        .orchestrator
        .process_callback(&signed_callback(&oid, "success", "10000"))
        .await
        .expect("settlement callback failed");
    oid
}

#[tokio::test]
async fn test_create_payment_stores_token() {
    let harness = Harness::new().await;

    let outcome = harness
        .orchestrator
        .create_payment(&harness.tenant, payment_request("txn_a", dec!(100.00)))
        .await
        .unwrap();

    let AttemptOutcome::Started { payment, initialized } = outcome else {
        panic!("expected a started payment");
    };
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.merchant_oid.starts_with("PT"));

    let token = format!("tok{}", payment.merchant_oid);
    assert_eq!(payment.metadata["token"], token.as_str());
    assert_eq!(
        initialized.iframe_url.as_deref(),
        Some(format!("https://pay.example/odeme/guvenli/{}", token).as_str())
    );

    let requests = harness.gateway.state.init_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["payment_amount"], "10000");
    assert_eq!(requests[0]["currency"], "TL");
    assert_eq!(requests[0]["test_mode"], "1");
}

#[tokio::test]
async fn test_failed_initialization_fails_payment() {
    let harness = Harness::new().await;
    harness.gateway.state.fail_init.store(true, Ordering::SeqCst);

    let outcome = harness
        .orchestrator
        .create_payment(&harness.tenant, payment_request("txn_fail", dec!(100.00)))
        .await
        .unwrap();

    let AttemptOutcome::Declined { payment, failure } = outcome else {
        panic!("expected a declined payment");
    };
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(failure.reason, "merchant is not active");
    assert_eq!(harness.payments.failure_count().await, 1);

    let failures = harness.payments.failures_for(payment.id).await.unwrap();
    assert_eq!(failures[0].error_message, "merchant is not active");
    let raw_request = failures[0].raw_request.as_ref().unwrap();
    assert_eq!(raw_request["paytr_token"], "[redacted]");
    assert_eq!(raw_request["merchant_oid"], payment.merchant_oid.as_str());
}

#[tokio::test]
async fn test_invalid_request_never_reaches_gateway() {
    let harness = Harness::new().await;

    let err = harness
        .orchestrator
        .create_payment(&harness.tenant, payment_request("txn_zero", dec!(0)))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(harness.gateway.state.init_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_success_callback_settles_and_notifies_once() {
    let harness = Harness::new().await;
    let oid = started_payment(&harness, "txn_b").await;
    let callback = signed_callback(&oid, "success", "10000");

    let first = harness.orchestrator.process_callback(&callback).await.unwrap();
    assert_eq!(first.status, PaymentStatus::Success);
    assert!(first.applied);
    assert!(first.notified);

    let second = harness.orchestrator.process_callback(&callback).await.unwrap();
    assert_eq!(second.status, PaymentStatus::Success);
    assert!(!second.applied);
    assert!(!second.notified);

    assert_eq!(harness.notifier.delivered(), 1);
    let event = harness.notifier.events.lock().unwrap()[0].clone();
    assert_eq!(event.charge_id, oid);
    assert_eq!(event.transaction_id, "txn_b");
    assert_eq!(event.amount_minor, 10000);

    let payment = harness
        .payments
        .find_by_merchant_oid(&oid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert!(payment.paid_at.is_some());
}

#[tokio::test]
async fn test_tampered_hash_is_rejected_without_mutation() {
    let harness = Harness::new().await;
    let oid = started_payment(&harness, "txn_d").await;

    let mut callback = signed_callback(&oid, "success", "10000");
    callback.insert("total_amount".to_string(), "1".to_string());

    let err = harness.orchestrator.process_callback(&callback).await.unwrap_err();
    assert!(err.is_verification());
    assert_eq!(err.status_code().as_u16(), 400);

    let payment = harness
        .payments
        .find_by_merchant_oid(&oid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(harness.notifier.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_field_and_unknown_order_are_rejected() {
    let harness = Harness::new().await;
    let oid = started_payment(&harness, "txn_missing").await;

    let mut callback = signed_callback(&oid, "success", "10000");
    callback.remove("hash");
    let err = harness.orchestrator.process_callback(&callback).await.unwrap_err();
    assert!(err.is_verification());

    let unknown = signed_callback("PTUNKNOWN", "success", "10000");
    let err = harness.orchestrator.process_callback(&unknown).await.unwrap_err();
    assert!(err.is_verification());
}

#[tokio::test]
async fn test_failed_callback_records_failure() {
    let harness = Harness::new().await;
    let oid = started_payment(&harness, "txn_declined").await;

    let mut callback = signed_callback(&oid, "failed", "10000");
    callback.insert("failed_reason_code".to_string(), "2".to_string());
    callback.insert("failed_reason_msg".to_string(), "insufficient funds".to_string());

    let outcome = harness.orchestrator.process_callback(&callback).await.unwrap();
    assert_eq!(outcome.status, PaymentStatus::Failed);
    assert!(!outcome.notified);

    let payment = harness
        .payments
        .find_by_merchant_oid(&oid)
        .await
        .unwrap()
        .unwrap();
    let failures = harness.payments.failures_for(payment.id).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_code.as_deref(), Some("2"));
    assert!(failures[0].raw_response.as_ref().unwrap().get("hash").is_none());

    // Repeat delivery adds nothing
    harness.orchestrator.process_callback(&callback).await.unwrap();
    assert_eq!(harness.payments.failures_for(payment.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_late_success_after_failure_conflicts() {
    let harness = Harness::new().await;
    let oid = started_payment(&harness, "txn_late").await;

    harness
        .orchestrator
        .process_callback(&signed_callback(&oid, "failed", "10000"))
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .process_callback(&signed_callback(&oid, "success", "10000"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let payment = harness
        .payments
        .find_by_merchant_oid(&oid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(harness.notifier.delivered(), 0);
}

#[tokio::test]
async fn test_notification_failure_keeps_settlement() {
    let harness = Harness::new().await;
    harness.notifier.fail.store(true, Ordering::SeqCst);
    let oid = started_payment(&harness, "txn_notify").await;

    let outcome = harness
        .orchestrator
        .process_callback(&signed_callback(&oid, "success", "10000"))
        .await
        .unwrap();

    assert_eq!(outcome.status, PaymentStatus::Success);
    assert!(!outcome.notified);
    assert_eq!(harness.notifier.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_callbacks_notify_once() {
    let harness = Harness::new().await;
    let oid = started_payment(&harness, "txn_race").await;
    let callback = signed_callback(&oid, "success", "10000");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = Arc::clone(&harness.orchestrator);
            let callback = callback.clone();
            tokio::spawn(async move { orchestrator.process_callback(&callback).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.status, PaymentStatus::Success);
        if outcome.applied {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(harness.notifier.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_partial_then_full_refund() {
    let harness = Harness::new().await;
    settled_payment(&harness, "txn_e").await;

    let first = harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_e", Some(dec!(40.00)))
        .await
        .unwrap();
    assert_eq!(first.payment.status, PaymentStatus::PartialRefund);
    assert_eq!(first.refunded_total, dec!(40.00));

    let second = harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_e", Some(dec!(60.00)))
        .await
        .unwrap();
    assert_eq!(second.payment.status, PaymentStatus::Refunded);
    assert_eq!(second.refunded_total, dec!(100.00));

    let refunds = harness.gateway.state.refund_requests.lock().unwrap().clone();
    assert_eq!(refunds.len(), 2);
    assert_eq!(refunds[0]["return_amount"], "4000");
    assert_eq!(refunds[1]["return_amount"], "6000");

    let projection = harness
        .orchestrator
        .verify_payment(&harness.tenant, "txn_e")
        .await
        .unwrap();
    assert_eq!(projection.status, "refunded");
    assert_eq!(projection.refunded_amount, dec!(100.00));
}

#[tokio::test]
async fn test_refund_on_refunded_payment_conflicts() {
    let harness = Harness::new().await;
    settled_payment(&harness, "txn_f").await;
    harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_f", None)
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_f", Some(dec!(20.00)))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(harness.gateway.state.refund_requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_refund_amount_checks_run_before_gateway() {
    let harness = Harness::new().await;
    settled_payment(&harness, "txn_checks").await;

    let err = harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_checks", Some(dec!(0)))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_checks", Some(dec!(100.01)))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let err = harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_checks", Some(dec!(0.004)))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let pending = started_payment(&harness, "txn_pending").await;
    assert!(!pending.is_empty());
    let err = harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_pending", Some(dec!(10.00)))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    assert!(harness.gateway.state.refund_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_declined_refund_is_recorded_and_state_kept() {
    let harness = Harness::new().await;
    let oid = settled_payment(&harness, "txn_refund_fail").await;
    harness.gateway.state.fail_refund.store(true, Ordering::SeqCst);

    let err = harness
        .orchestrator
        .process_refund(&harness.tenant, "txn_refund_fail", Some(dec!(10.00)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "GATEWAY_ERROR");
    assert!(!err.is_retryable());

    let payment = harness
        .payments
        .find_by_merchant_oid(&oid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    let failures = harness.payments.failures_for(payment.id).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_code.as_deref(), Some("010"));
}

#[tokio::test]
async fn test_success_callback_stores_card_for_contact() {
    let harness = Harness::new().await;
    let oid = started_payment(&harness, "txn_card").await;

    let mut callback = signed_callback(&oid, "success", "10000");
    callback.insert("utoken".to_string(), "user-token-1".to_string());
    callback.insert("ctoken".to_string(), "card-token-1".to_string());
    callback.insert("card_brand".to_string(), "VISA".to_string());
    callback.insert("card_pan".to_string(), "4355 08** **** 4358".to_string());
    harness.orchestrator.process_callback(&callback).await.unwrap();
    harness.orchestrator.process_callback(&callback).await.unwrap();

    let methods = harness
        .orchestrator
        .list_payment_methods(&harness.tenant, "contact_1")
        .await
        .unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].last_four.as_deref(), Some("4358"));
    assert_eq!(methods[0].card_brand.as_deref(), Some("VISA"));

    // Charge the stored card
    let outcome = harness
        .orchestrator
        .charge_payment(
            &harness.tenant,
            "contact_1",
            methods[0].id,
            payment_request("txn_repeat", dec!(25.00)),
        )
        .await
        .unwrap();
    assert!(outcome.is_started());
    assert_eq!(outcome.payment().metadata["payment_method_id"], methods[0].id.to_string());

    let direct = harness.gateway.state.direct_requests.lock().unwrap().clone();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0]["utoken"], "user-token-1");
    assert_eq!(direct[0]["ctoken"], "card-token-1");

    // Delete it
    assert!(harness
        .orchestrator
        .delete_payment_method(&harness.tenant, "contact_1", methods[0].id)
        .await
        .unwrap());
    assert!(harness
        .methods
        .list_for_contact(harness.tenant.id, "contact_1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_charge_with_unknown_card_fails_payment() {
    let harness = Harness::new().await;

    let err = harness
        .orchestrator
        .charge_payment(
            &harness.tenant,
            "contact_1",
            uuid::Uuid::new_v4(),
            payment_request("txn_nocard", dec!(10.00)),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(harness.gateway.state.direct_requests.lock().unwrap().is_empty());

    let payment = harness
        .payments
        .find_by_transaction_id(harness.tenant.id, "txn_nocard")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_reconcile_settles_paid_pending_payment() {
    let harness = Harness::new().await;
    let oid = started_payment(&harness, "txn_reconcile").await;

    let projection = harness
        .orchestrator
        .reconcile_payment(&harness.tenant, "txn_reconcile")
        .await
        .unwrap();
    assert_eq!(projection.status, "pending");

    harness.gateway.state.paid.lock().unwrap().insert(oid.clone());
    let projection = harness
        .orchestrator
        .reconcile_payment(&harness.tenant, "txn_reconcile")
        .await
        .unwrap();
    assert_eq!(projection.status, "success");
    assert!(projection.success);
    assert_eq!(harness.notifier.delivered(), 1);

    // A late callback for the same capture is a duplicate
    let outcome = harness
        .orchestrator
        .process_callback(&signed_callback(&oid, "success", "10000"))
        .await
        .unwrap();
    assert!(!outcome.applied);
    assert_eq!(harness.notifier.delivered(), 1);
}

#[tokio::test]
async fn test_reconcile_surfaces_unreachable_gateway() {
    let harness = Harness::new().await;
    started_payment(&harness, "txn_status_down").await;
    harness
        .gateway
        .state
        .status_unavailable
        .store(true, Ordering::SeqCst);

    let err = harness
        .orchestrator
        .reconcile_payment(&harness.tenant, "txn_status_down")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "GATEWAY_ERROR");
    assert!(err.is_retryable());

    let payment = harness
        .orchestrator
        .verify_payment(&harness.tenant, "txn_status_down")
        .await
        .unwrap();
    assert_eq!(payment.status, "pending");
    assert_eq!(harness.notifier.delivered(), 0);
}

#[tokio::test]
async fn test_subscriptions_are_unsupported() {
    let harness = Harness::new().await;
    let failure = harness
        .orchestrator
        .create_subscription(&harness.tenant)
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(failure.code.as_deref(), Some("unsupported"));
}

#[tokio::test]
async fn test_uninstalled_tenant_cannot_pay() {
    let harness = Harness::new().await;
    harness.tenants.uninstall(common::LOCATION_ID).await.unwrap();
    let tenant = harness
        .tenants
        .find_active(common::LOCATION_ID)
        .await
        .unwrap_err();
    assert!(tenant.is_configuration());

    let mut inactive = harness.tenant.clone();
    inactive.is_active = false;
    let err = harness
        .orchestrator
        .create_payment(&inactive, payment_request("txn_inactive", dec!(10.00)))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}
