//! Shared fixtures: in-memory stores, a local stand-in for the PayTR API and
//! a notifier that counts capture events.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Form, Json, Router};
use crm_paytr_bridge::database::memory::{
    InMemoryPaymentMethodStore, InMemoryPaymentStore, InMemoryTenantStore,
};
use crm_paytr_bridge::error::{AppError, AppResult};
use crm_paytr_bridge::payments::hash::HashProtocol;
use crm_paytr_bridge::payments::notifier::{CaptureEvent, PlatformNotifier};
use crm_paytr_bridge::payments::orchestrator::{CreatePaymentRequest, PaymentOrchestrator};
use crm_paytr_bridge::payments::providers::{paytr, PaytrConfig};
use crm_paytr_bridge::payments::registry::ProviderRegistry;
use crm_paytr_bridge::tenants::{CredentialForm, CredentialSealer, Tenant, TenantService};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MERCHANT_ID: &str = "123456";
pub const MERCHANT_KEY: &str = "test-merchant-key";
pub const MERCHANT_SALT: &str = "test-merchant-salt";
pub const LOCATION_ID: &str = "loc_1";

type Fields = HashMap<String, String>;

/// What the fake gateway saw and how it should answer
#[derive(Default)]
pub struct GatewayState {
    pub init_requests: Mutex<Vec<Fields>>,
    pub direct_requests: Mutex<Vec<Fields>>,
    pub refund_requests: Mutex<Vec<Fields>>,
    pub fail_init: AtomicBool,
    pub fail_refund: AtomicBool,
    /// Status endpoint answers 503
    pub status_unavailable: AtomicBool,
    /// Orders the status endpoint reports as paid
    pub paid: Mutex<HashSet<String>>,
}

pub struct FakePaytr {
    pub base_url: String,
    pub state: Arc<GatewayState>,
}

impl FakePaytr {
    pub async fn spawn() -> Self {
        let state = Arc::new(GatewayState::default());
        let app = Router::new()
            .route("/odeme/api/get-token", post(get_token))
            .route("/odeme", post(direct_charge))
            .route("/odeme/durum-sorgu", post(status_query))
            .route("/odeme/iade", post(refund))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake gateway");
        let addr = listener.local_addr().expect("Fake gateway has no address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake gateway crashed");
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }
}

async fn get_token(State(state): State<Arc<GatewayState>>, Form(fields): Form<Fields>) -> Json<Value> {
    let oid = fields.get("merchant_oid").cloned().unwrap_or_default();
    state.init_requests.lock().unwrap().push(fields);
    if state.fail_init.load(Ordering::SeqCst) {
        return Json(json!({ "status": "failed", "reason": "merchant is not active" }));
    }
    Json(json!({ "status": "success", "token": format!("tok{}", oid) }))
}

async fn direct_charge(State(state): State<Arc<GatewayState>>, Form(fields): Form<Fields>) -> Json<Value> {
    state.direct_requests.lock().unwrap().push(fields);
    Json(json!({ "status": "success" }))
}

async fn status_query(
    State(state): State<Arc<GatewayState>>,
    Form(fields): Form<Fields>,
) -> Result<Json<Value>, StatusCode> {
    if state.status_unavailable.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let oid = fields.get("merchant_oid").cloned().unwrap_or_default();
    if state.paid.lock().unwrap().contains(&oid) {
        Ok(Json(json!({ "status": "success", "payment_id": "pay_status_1", "payment_amount": "100.00" })))
    } else {
        Ok(Json(json!({ "status": "error", "err_msg": "payment not found" })))
    }
}

async fn refund(State(state): State<Arc<GatewayState>>, Form(fields): Form<Fields>) -> Json<Value> {
    let reference = fields.get("reference_no").cloned().unwrap_or_default();
    state.refund_requests.lock().unwrap().push(fields);
    if state.fail_refund.load(Ordering::SeqCst) {
        return Json(json!({ "status": "error", "err_no": "010", "err_msg": "refund window closed" }));
    }
    Json(json!({ "status": "success", "reference_no": reference }))
}

/// Counts capture events; optionally fails every delivery
#[derive(Default)]
pub struct CountingNotifier {
    pub events: Mutex<Vec<CaptureEvent>>,
    pub attempts: AtomicUsize,
    pub fail: AtomicBool,
}

impl CountingNotifier {
    pub fn delivered(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl PlatformNotifier for CountingNotifier {
    async fn notify_capture(&self, _tenant: &Tenant, event: &CaptureEvent) -> AppResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        // Widen the window for racing callbacks
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::platform("platform unavailable"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub tenants: Arc<TenantService>,
    pub tenant: Tenant,
    pub payments: Arc<InMemoryPaymentStore>,
    pub methods: Arc<InMemoryPaymentMethodStore>,
    pub notifier: Arc<CountingNotifier>,
    pub gateway: FakePaytr,
}

impl Harness {
    pub async fn new() -> Self {
        let gateway = FakePaytr::spawn().await;
        let tenant_store = Arc::new(InMemoryTenantStore::new());
        let methods = Arc::new(InMemoryPaymentMethodStore::new());
        let payments = Arc::new(InMemoryPaymentStore::new(methods.clone()));
        let sealer = CredentialSealer::new([7u8; 32]);

        let tenants = Arc::new(TenantService::new(
            tenant_store.clone(),
            sealer.clone(),
            None,
        ));
        tenants
            .install(LOCATION_ID, Some("comp_1"))
            .await
            .expect("Failed to install tenant");
        let tenant = tenants
            .configure_credentials(
                LOCATION_ID,
                CredentialForm {
                    merchant_id: MERCHANT_ID.to_string(),
                    merchant_key: MERCHANT_KEY.to_string(),
                    merchant_salt: MERCHANT_SALT.to_string(),
                    test_mode: true,
                },
            )
            .await
            .expect("Failed to configure credentials");

        let config = PaytrConfig {
            base_url: gateway.base_url.clone(),
            iframe_base_url: "https://pay.example/odeme/guvenli".to_string(),
            timeout_secs: 5,
            ..PaytrConfig::default()
        };
        let registry = ProviderRegistry::with_paytr(
            methods.clone(),
            sealer,
            config,
            paytr::build_client(5).expect("Failed to build client"),
        );

        let notifier = Arc::new(CountingNotifier::default());
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            tenant_store,
            payments.clone(),
            Arc::new(registry),
            notifier.clone(),
        ));

        Self {
            orchestrator,
            tenants,
            tenant,
            payments,
            methods,
            notifier,
            gateway,
        }
    }
}

pub fn payment_request(transaction_id: &str, amount: Decimal) -> CreatePaymentRequest {
    CreatePaymentRequest {
        transaction_id: transaction_id.to_string(),
        contact_id: Some("contact_1".to_string()),
        amount,
        currency: "TRY".to_string(),
        payer_email: "payer@example.com".to_string(),
        payer_ip: "203.0.113.7".to_string(),
        payer_name: Some("Ayse Yilmaz".to_string()),
        description: Some("Invoice 42".to_string()),
        installment_count: 0,
        store_card: true,
    }
}

/// Callback fields signed the way PayTR signs them
pub fn signed_callback(merchant_oid: &str, status: &str, total_amount: &str) -> Fields {
    let hash = HashProtocol::new(MERCHANT_KEY, MERCHANT_SALT).callback_hash(
        merchant_oid,
        status,
        total_amount,
    );
    let mut fields = Fields::new();
    fields.insert("merchant_oid".to_string(), merchant_oid.to_string());
    fields.insert("status".to_string(), status.to_string());
    fields.insert("total_amount".to_string(), total_amount.to_string());
    fields.insert("hash".to_string(), hash);
    fields
}
