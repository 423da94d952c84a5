//! In-memory store implementations for tests and local runs

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    PaymentMethodStore, PaymentStore, TenantStore, TransitionRequest, TransitionResult,
};
use crate::error::AppResult;
use crate::payments::ledger;
use crate::payments::models::{
    NewPayment, NewPaymentFailure, NewPaymentMethod, Payment, PaymentFailure, PaymentMethod,
};
use crate::platform::PlatformToken;
use crate::tenants::{SealedCredentials, Tenant};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<Uuid, Tenant>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn find_by_location(&self, location_id: &str) -> Result<Option<Tenant>, DatabaseError> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .values()
            .find(|t| t.location_id == location_id)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, DatabaseError> {
        Ok(self.tenants.read().await.get(&id).cloned())
    }

    async fn upsert_installation(
        &self,
        location_id: &str,
        company_id: Option<&str>,
    ) -> Result<Tenant, DatabaseError> {
        let now = Utc::now();
        let mut tenants = self.tenants.write().await;

        if let Some(tenant) = tenants.values_mut().find(|t| t.location_id == location_id) {
            tenant.is_active = true;
            tenant.deactivated_at = None;
            if let Some(company_id) = company_id {
                tenant.company_id = Some(company_id.to_string());
            }
            tenant.updated_at = now;
            return Ok(tenant.clone());
        }

        let tenant = Tenant::new(location_id, company_id.map(str::to_string), now);
        tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn deactivate(&self, location_id: &str) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let mut tenants = self.tenants.write().await;
        match tenants
            .values_mut()
            .find(|t| t.location_id == location_id && t.is_active)
        {
            Some(tenant) => {
                tenant.is_active = false;
                tenant.deactivated_at = Some(now);
                tenant.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_credentials(
        &self,
        tenant_id: Uuid,
        credentials: &SealedCredentials,
    ) -> Result<Tenant, DatabaseError> {
        let mut tenants = self.tenants.write().await;
        let tenant = tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| DatabaseError::not_found("Tenant", tenant_id.to_string()))?;
        tenant.merchant_id = Some(credentials.merchant_id.clone());
        tenant.merchant_key_sealed = Some(credentials.merchant_key_sealed.clone());
        tenant.merchant_salt_sealed = Some(credentials.merchant_salt_sealed.clone());
        tenant.test_mode = credentials.test_mode;
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }

    async fn save_platform_token(
        &self,
        tenant_id: Uuid,
        token: &PlatformToken,
    ) -> Result<(), DatabaseError> {
        let mut tenants = self.tenants.write().await;
        let tenant = tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| DatabaseError::not_found("Tenant", tenant_id.to_string()))?;
        tenant.platform_token = Some(token.clone());
        tenant.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentMethodStore {
    methods: RwLock<Vec<PaymentMethod>>,
}

impl InMemoryPaymentMethodStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentMethodStore for InMemoryPaymentMethodStore {
    async fn upsert(&self, method: NewPaymentMethod) -> Result<PaymentMethod, DatabaseError> {
        let now = Utc::now();
        let mut methods = self.methods.write().await;

        if let Some(existing) = methods.iter_mut().find(|m| {
            m.tenant_id == method.tenant_id
                && m.contact_id == method.contact_id
                && m.user_token == method.user_token
        }) {
            method.apply_to(existing, now);
            return Ok(existing.clone());
        }

        let stored = method.into_method(now);
        methods.push(stored.clone());
        Ok(stored)
    }

    async fn list_for_contact(
        &self,
        tenant_id: Uuid,
        contact_id: &str,
    ) -> Result<Vec<PaymentMethod>, DatabaseError> {
        let methods = self.methods.read().await;
        let mut found: Vec<PaymentMethod> = methods
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.contact_id == contact_id && !m.is_deleted)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn find(
        &self,
        tenant_id: Uuid,
        method_id: Uuid,
    ) -> Result<Option<PaymentMethod>, DatabaseError> {
        let methods = self.methods.read().await;
        Ok(methods
            .iter()
            .find(|m| m.id == method_id && m.tenant_id == tenant_id && !m.is_deleted)
            .cloned())
    }

    async fn soft_delete(
        &self,
        tenant_id: Uuid,
        contact_id: &str,
        method_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let mut methods = self.methods.write().await;
        match methods.iter_mut().find(|m| {
            m.id == method_id && m.tenant_id == tenant_id && m.contact_id == contact_id && !m.is_deleted
        }) {
            Some(method) => {
                method.is_deleted = true;
                method.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Payment ledger held in memory. One mutex guards every payment, which is
/// a superset of per-payment locking.
pub struct InMemoryPaymentStore {
    payments: Mutex<HashMap<String, Payment>>,
    failures: Mutex<Vec<PaymentFailure>>,
    methods: Arc<InMemoryPaymentMethodStore>,
}

impl InMemoryPaymentStore {
    pub fn new(methods: Arc<InMemoryPaymentMethodStore>) -> Self {
        Self {
            payments: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            methods,
        }
    }

    pub async fn failure_count(&self) -> usize {
        self.failures.lock().await.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.lock().await;
        if payments.contains_key(&payment.merchant_oid) {
            return Err(DatabaseError::new(
                DatabaseErrorKind::UniqueConstraintViolation {
                    column: "merchant_oid".to_string(),
                    value: payment.merchant_oid,
                },
            ));
        }
        let stored = payment.into_payment(Utc::now());
        payments.insert(stored.merchant_oid.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_merchant_oid(
        &self,
        merchant_oid: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let payments = self.payments.lock().await;
        Ok(payments
            .get(merchant_oid)
            .filter(|p| p.deleted_at.is_none())
            .cloned())
    }

    async fn find_by_transaction_id(
        &self,
        tenant_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let payments = self.payments.lock().await;
        Ok(payments
            .values()
            .filter(|p| {
                p.tenant_id == tenant_id
                    && p.transaction_id == transaction_id
                    && p.deleted_at.is_none()
            })
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn merge_metadata(
        &self,
        merchant_oid: &str,
        patch: serde_json::Value,
    ) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.lock().await;
        let payment = payments
            .get_mut(merchant_oid)
            .ok_or_else(|| DatabaseError::not_found("Payment", merchant_oid))?;
        payment.merge_metadata(patch);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn apply_transition(
        &self,
        merchant_oid: &str,
        request: TransitionRequest,
    ) -> AppResult<TransitionResult> {
        let now = Utc::now();
        let mut payments = self.payments.lock().await;
        let current = payments
            .get(merchant_oid)
            .filter(|p| p.deleted_at.is_none())
            .ok_or_else(|| DatabaseError::not_found("Payment", merchant_oid))?;

        let mut candidate = current.clone();
        let outcome = ledger::apply(&mut candidate, &request.event, now)?;

        if outcome.is_applied() {
            if let Some(failure) = request.failure {
                let record = failure.into_failure(candidate.tenant_id, Some(&candidate), now);
                self.failures.lock().await.push(record);
            }
            if let Some(method) = request.payment_method {
                self.methods.upsert(method).await?;
            }
            payments.insert(merchant_oid.to_string(), candidate.clone());
        }

        Ok(TransitionResult {
            payment: candidate,
            outcome,
        })
    }

    async fn record_failure(
        &self,
        tenant_id: Uuid,
        payment: Option<&Payment>,
        failure: NewPaymentFailure,
    ) -> Result<PaymentFailure, DatabaseError> {
        let record = failure.into_failure(tenant_id, payment, Utc::now());
        self.failures.lock().await.push(record.clone());
        Ok(record)
    }

    async fn failures_for(&self, payment_id: Uuid) -> Result<Vec<PaymentFailure>, DatabaseError> {
        let failures = self.failures.lock().await;
        Ok(failures
            .iter()
            .filter(|f| f.payment_id == Some(payment_id))
            .cloned()
            .collect())
    }
}
