use crate::database::error::DatabaseError;
use crate::database::payment_method_repository::upsert_method;
use crate::database::repository::{PaymentStore, TransitionRequest, TransitionResult};
use crate::database::transaction::DatabaseTransaction;
use crate::error::AppResult;
use crate::payments::ledger::{self, PaymentStatus};
use crate::payments::models::{NewPayment, NewPaymentFailure, Payment, PaymentFailure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgExecutor, PgPool};
use tracing::debug;
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, tenant_id, merchant_oid, transaction_id, contact_id, amount, \
     currency, provider, provider_payment_id, status, installment_count, payer_email, payer_ip, \
     metadata, error_message, paid_at, created_at, updated_at, deleted_at";

const FAILURE_COLUMNS: &str = "id, tenant_id, payment_id, merchant_oid, error_code, \
     error_message, raw_request, raw_response, created_at";

/// Row shape of `payments`; status is stored as text
#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    tenant_id: Uuid,
    merchant_oid: String,
    transaction_id: String,
    contact_id: Option<String>,
    amount: Decimal,
    currency: String,
    provider: String,
    provider_payment_id: Option<String>,
    status: String,
    installment_count: i32,
    payer_email: String,
    payer_ip: String,
    metadata: serde_json::Value,
    error_message: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status: PaymentStatus = row
            .status
            .parse()
            .map_err(|e: String| DatabaseError::corrupt("Payment", e))?;

        Ok(Payment {
            id: row.id,
            tenant_id: row.tenant_id,
            merchant_oid: row.merchant_oid,
            transaction_id: row.transaction_id,
            contact_id: row.contact_id,
            amount: row.amount,
            currency: row.currency,
            provider: row.provider,
            provider_payment_id: row.provider_payment_id,
            status,
            installment_count: row.installment_count,
            payer_email: row.payer_email,
            payer_ip: row.payer_ip,
            metadata: row.metadata,
            error_message: row.error_message,
            paid_at: row.paid_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

fn into_payment(row: Option<PaymentRow>) -> Result<Option<Payment>, DatabaseError> {
    row.map(Payment::try_from).transpose()
}

async fn insert_failure<'e, E>(executor: E, record: &PaymentFailure) -> Result<PaymentFailure, DatabaseError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, PaymentFailure>(&format!(
        "INSERT INTO payment_failures
             (id, tenant_id, payment_id, merchant_oid, error_code, error_message,
              raw_request, raw_response, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING {}",
        FAILURE_COLUMNS
    ))
    .bind(record.id)
    .bind(record.tenant_id)
    .bind(record.payment_id)
    .bind(&record.merchant_oid)
    .bind(&record.error_code)
    .bind(&record.error_message)
    .bind(&record.raw_request)
    .bind(&record.raw_response)
    .bind(record.created_at)
    .fetch_one(executor)
    .await
    .map_err(DatabaseError::from_sqlx)
}

/// Repository for the payment ledger
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentRepository {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let payment = payment.into_payment(Utc::now());
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments
                 (id, tenant_id, merchant_oid, transaction_id, contact_id, amount, currency,
                  provider, status, installment_count, payer_email, payer_ip, metadata,
                  created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment.id)
        .bind(payment.tenant_id)
        .bind(&payment.merchant_oid)
        .bind(&payment.transaction_id)
        .bind(&payment.contact_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.provider)
        .bind(payment.status.as_str())
        .bind(payment.installment_count)
        .bind(&payment.payer_email)
        .bind(&payment.payer_ip)
        .bind(&payment.metadata)
        .bind(payment.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Payment::try_from(row)
    }

    async fn find_by_merchant_oid(
        &self,
        merchant_oid: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE merchant_oid = $1 AND deleted_at IS NULL",
            PAYMENT_COLUMNS
        ))
        .bind(merchant_oid)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_payment(row)
    }

    async fn find_by_transaction_id(
        &self,
        tenant_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments
             WHERE tenant_id = $1 AND transaction_id = $2 AND deleted_at IS NULL
             ORDER BY created_at DESC
             LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_payment(row)
    }

    async fn merge_metadata(
        &self,
        merchant_oid: &str,
        patch: serde_json::Value,
    ) -> Result<Payment, DatabaseError> {
        // jsonb || is a shallow merge, same as Payment::merge_metadata
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET metadata = metadata || $2::jsonb, updated_at = NOW()
             WHERE merchant_oid = $1 AND deleted_at IS NULL
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(merchant_oid)
        .bind(patch)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Payment", merchant_oid))?;

        Payment::try_from(row)
    }

    async fn apply_transition(
        &self,
        merchant_oid: &str,
        request: TransitionRequest,
    ) -> AppResult<TransitionResult> {
        let now = Utc::now();
        let mut tx = DatabaseTransaction::begin(&self.pool).await?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments
             WHERE merchant_oid = $1 AND deleted_at IS NULL
             FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(merchant_oid)
        .fetch_optional(tx.conn()?)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Payment", merchant_oid))?;

        let mut payment = Payment::try_from(row)?;
        let outcome = match ledger::apply(&mut payment, &request.event, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        if !outcome.is_applied() {
            debug!(
                merchant_oid = %merchant_oid,
                status = %outcome.status(),
                event = request.event.name(),
                "Transition already applied"
            );
            tx.rollback().await?;
            return Ok(TransitionResult { payment, outcome });
        }

        sqlx::query(
            "UPDATE payments
             SET status = $2, provider_payment_id = $3, metadata = $4, error_message = $5,
                 paid_at = $6, updated_at = $7
             WHERE id = $1",
        )
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(&payment.provider_payment_id)
        .bind(&payment.metadata)
        .bind(&payment.error_message)
        .bind(payment.paid_at)
        .bind(payment.updated_at)
        .execute(tx.conn()?)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(failure) = request.failure {
            let record = failure.into_failure(payment.tenant_id, Some(&payment), now);
            insert_failure(tx.conn()?, &record).await?;
        }
        if let Some(method) = request.payment_method {
            upsert_method(tx.conn()?, &method).await?;
        }

        tx.commit().await?;
        Ok(TransitionResult { payment, outcome })
    }

    async fn record_failure(
        &self,
        tenant_id: Uuid,
        payment: Option<&Payment>,
        failure: NewPaymentFailure,
    ) -> Result<PaymentFailure, DatabaseError> {
        let record = failure.into_failure(tenant_id, payment, Utc::now());
        insert_failure(&self.pool, &record).await
    }

    async fn failures_for(&self, payment_id: Uuid) -> Result<Vec<PaymentFailure>, DatabaseError> {
        sqlx::query_as::<_, PaymentFailure>(&format!(
            "SELECT {} FROM payment_failures WHERE payment_id = $1 ORDER BY created_at",
            FAILURE_COLUMNS
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::ledger::LedgerEvent;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unknown_status_row_is_corrupt() {
        let row = PaymentRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            merchant_oid: "PT1".to_string(),
            transaction_id: "t".to_string(),
            contact_id: None,
            amount: dec!(1.00),
            currency: "TRY".to_string(),
            provider: "paytr".to_string(),
            provider_payment_id: None,
            status: "settled".to_string(),
            installment_count: 0,
            payer_email: "a@b.co".to_string(),
            payer_ip: "127.0.0.1".to_string(),
            metadata: serde_json::json!({}),
            error_message: None,
            paid_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        assert!(Payment::try_from(row).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL with migrations applied
    async fn test_transition_round_trip() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        let tenants = crate::database::tenant_repository::PgTenantRepository::new(pool.clone());
        let tenant = crate::database::repository::TenantStore::upsert_installation(
            &tenants,
            &format!("loc_{}", Uuid::new_v4().simple()),
            None,
        )
        .await
        .unwrap();

        let repo = PgPaymentRepository::new(pool);
        let oid = format!("PT{}", Uuid::new_v4().simple());
        repo.insert(NewPayment {
            tenant_id: tenant.id,
            merchant_oid: oid.clone(),
            transaction_id: "txn_db".to_string(),
            contact_id: None,
            amount: dec!(100.00),
            currency: "TRY".to_string(),
            provider: "paytr".to_string(),
            installment_count: 0,
            payer_email: "a@b.co".to_string(),
            payer_ip: "127.0.0.1".to_string(),
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

        let settle = || {
            TransitionRequest::new(LedgerEvent::Settled {
                provider_payment_id: Some("p1".to_string()),
                settled_at: Utc::now(),
            })
        };
        assert!(repo.apply_transition(&oid, settle()).await.unwrap().outcome.is_capture());
        assert!(!repo.apply_transition(&oid, settle()).await.unwrap().outcome.is_applied());

        let stored = repo.find_by_merchant_oid(&oid).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
    }
}
