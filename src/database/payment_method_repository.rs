use crate::database::error::DatabaseError;
use crate::database::repository::PaymentMethodStore;
use crate::payments::models::{NewPaymentMethod, PaymentMethod};
use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

const METHOD_COLUMNS: &str = "id, tenant_id, contact_id, provider, user_token, card_token, \
     card_brand, card_type, last_four, exp_month, exp_year, is_deleted, created_at, updated_at";

/// Insert or refresh a stored card on any executor, so the callback path can
/// run it inside the payment's transaction.
pub(crate) async fn upsert_method<'e, E>(
    executor: E,
    method: &NewPaymentMethod,
) -> Result<PaymentMethod, DatabaseError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, PaymentMethod>(&format!(
        "INSERT INTO payment_methods
             (id, tenant_id, contact_id, provider, user_token, card_token,
              card_brand, card_type, last_four, exp_month, exp_year)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (tenant_id, contact_id, user_token) DO UPDATE
         SET card_token = EXCLUDED.card_token,
             card_brand = EXCLUDED.card_brand,
             card_type = EXCLUDED.card_type,
             last_four = EXCLUDED.last_four,
             exp_month = EXCLUDED.exp_month,
             exp_year = EXCLUDED.exp_year,
             is_deleted = FALSE,
             updated_at = NOW()
         RETURNING {}",
        METHOD_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(method.tenant_id)
    .bind(&method.contact_id)
    .bind(&method.provider)
    .bind(&method.user_token)
    .bind(&method.card_token)
    .bind(&method.card_brand)
    .bind(&method.card_type)
    .bind(&method.last_four)
    .bind(&method.exp_month)
    .bind(&method.exp_year)
    .fetch_one(executor)
    .await
    .map_err(DatabaseError::from_sqlx)
}

/// Repository for stored cards
pub struct PgPaymentMethodRepository {
    pool: PgPool,
}

impl PgPaymentMethodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentMethodStore for PgPaymentMethodRepository {
    async fn upsert(&self, method: NewPaymentMethod) -> Result<PaymentMethod, DatabaseError> {
        upsert_method(&self.pool, &method).await
    }

    async fn list_for_contact(
        &self,
        tenant_id: Uuid,
        contact_id: &str,
    ) -> Result<Vec<PaymentMethod>, DatabaseError> {
        sqlx::query_as::<_, PaymentMethod>(&format!(
            "SELECT {} FROM payment_methods
             WHERE tenant_id = $1 AND contact_id = $2 AND is_deleted = FALSE
             ORDER BY created_at DESC",
            METHOD_COLUMNS
        ))
        .bind(tenant_id)
        .bind(contact_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find(
        &self,
        tenant_id: Uuid,
        method_id: Uuid,
    ) -> Result<Option<PaymentMethod>, DatabaseError> {
        sqlx::query_as::<_, PaymentMethod>(&format!(
            "SELECT {} FROM payment_methods
             WHERE id = $1 AND tenant_id = $2 AND is_deleted = FALSE",
            METHOD_COLUMNS
        ))
        .bind(method_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Soft delete a stored card
    async fn soft_delete(
        &self,
        tenant_id: Uuid,
        contact_id: &str,
        method_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payment_methods SET is_deleted = TRUE, updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2 AND contact_id = $3 AND is_deleted = FALSE",
        )
        .bind(method_id)
        .bind(tenant_id)
        .bind(contact_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}
