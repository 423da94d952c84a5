use crate::database::error::DatabaseError;
use crate::error::AppResult;
use crate::payments::ledger::{LedgerEvent, TransitionOutcome};
use crate::payments::models::{
    NewPayment, NewPaymentFailure, NewPaymentMethod, Payment, PaymentFailure, PaymentMethod,
};
use crate::platform::PlatformToken;
use crate::tenants::{SealedCredentials, Tenant};
use async_trait::async_trait;
use uuid::Uuid;

/// Tenant persistence
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_location(&self, location_id: &str) -> Result<Option<Tenant>, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, DatabaseError>;

    /// Create the tenant for `location_id`, or reactivate the existing one
    async fn upsert_installation(
        &self,
        location_id: &str,
        company_id: Option<&str>,
    ) -> Result<Tenant, DatabaseError>;

    /// Soft-deactivate. Returns false when the tenant is unknown or already inactive.
    async fn deactivate(&self, location_id: &str) -> Result<bool, DatabaseError>;

    async fn save_credentials(
        &self,
        tenant_id: Uuid,
        credentials: &SealedCredentials,
    ) -> Result<Tenant, DatabaseError>;

    async fn save_platform_token(
        &self,
        tenant_id: Uuid,
        token: &PlatformToken,
    ) -> Result<(), DatabaseError>;
}

/// A ledger event plus the records it produces when it is applied
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub event: LedgerEvent,
    /// Written only when the transition is applied
    pub failure: Option<NewPaymentFailure>,
    /// Upserted only when the transition is applied
    pub payment_method: Option<NewPaymentMethod>,
}

impl TransitionRequest {
    pub fn new(event: LedgerEvent) -> Self {
        Self {
            event,
            failure: None,
            payment_method: None,
        }
    }

    pub fn with_failure(mut self, failure: NewPaymentFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_payment_method(mut self, method: Option<NewPaymentMethod>) -> Self {
        self.payment_method = method;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub payment: Payment,
    pub outcome: TransitionOutcome,
}

/// Payment ledger persistence
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, DatabaseError>;

    async fn find_by_merchant_oid(&self, merchant_oid: &str)
        -> Result<Option<Payment>, DatabaseError>;

    /// Most recent payment for a platform transaction id
    async fn find_by_transaction_id(
        &self,
        tenant_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Shallow-merge `patch` into the payment's metadata
    async fn merge_metadata(
        &self,
        merchant_oid: &str,
        patch: serde_json::Value,
    ) -> Result<Payment, DatabaseError>;

    /// Read, decide and write one ledger transition under the payment's lock.
    ///
    /// Ledger rejections come back as `AppError` conflicts with nothing
    /// written. Side-effect records in `request` are persisted in the same
    /// unit of work only when the outcome is `Applied`.
    async fn apply_transition(
        &self,
        merchant_oid: &str,
        request: TransitionRequest,
    ) -> AppResult<TransitionResult>;

    /// Append a failure that is not tied to a status change
    async fn record_failure(
        &self,
        tenant_id: Uuid,
        payment: Option<&Payment>,
        failure: NewPaymentFailure,
    ) -> Result<PaymentFailure, DatabaseError>;

    async fn failures_for(&self, payment_id: Uuid) -> Result<Vec<PaymentFailure>, DatabaseError>;
}

/// Stored card persistence
#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    /// Insert, or refresh metadata of the row with the same (tenant, contact, user_token)
    async fn upsert(&self, method: NewPaymentMethod) -> Result<PaymentMethod, DatabaseError>;

    async fn list_for_contact(
        &self,
        tenant_id: Uuid,
        contact_id: &str,
    ) -> Result<Vec<PaymentMethod>, DatabaseError>;

    /// Live (not deleted) method by id
    async fn find(&self, tenant_id: Uuid, method_id: Uuid)
        -> Result<Option<PaymentMethod>, DatabaseError>;

    async fn soft_delete(
        &self,
        tenant_id: Uuid,
        contact_id: &str,
        method_id: Uuid,
    ) -> Result<bool, DatabaseError>;
}
