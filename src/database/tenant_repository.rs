use crate::database::error::DatabaseError;
use crate::database::repository::TenantStore;
use crate::platform::PlatformToken;
use crate::tenants::{SealedCredentials, Tenant, DEFAULT_PROVIDER};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const TENANT_COLUMNS: &str = "id, location_id, company_id, provider, merchant_id, \
     merchant_key_sealed, merchant_salt_sealed, test_mode, platform_token, is_active, \
     created_at, updated_at, deactivated_at";

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    location_id: String,
    company_id: Option<String>,
    provider: String,
    merchant_id: Option<String>,
    merchant_key_sealed: Option<String>,
    merchant_salt_sealed: Option<String>,
    test_mode: bool,
    platform_token: Option<Json<PlatformToken>>,
    is_active: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    deactivated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant {
            id: row.id,
            location_id: row.location_id,
            company_id: row.company_id,
            provider: row.provider,
            merchant_id: row.merchant_id,
            merchant_key_sealed: row.merchant_key_sealed,
            merchant_salt_sealed: row.merchant_salt_sealed,
            test_mode: row.test_mode,
            platform_token: row.platform_token.map(|Json(token)| token),
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deactivated_at: row.deactivated_at,
        }
    }
}

/// Repository for tenant installations
pub struct PgTenantRepository {
    pool: PgPool,
}

impl PgTenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantStore for PgTenantRepository {
    async fn find_by_location(&self, location_id: &str) -> Result<Option<Tenant>, DatabaseError> {
        sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {} FROM tenants WHERE location_id = $1",
            TENANT_COLUMNS
        ))
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Tenant::from))
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, DatabaseError> {
        sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {} FROM tenants WHERE id = $1",
            TENANT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Tenant::from))
        .map_err(DatabaseError::from_sqlx)
    }

    async fn upsert_installation(
        &self,
        location_id: &str,
        company_id: Option<&str>,
    ) -> Result<Tenant, DatabaseError> {
        sqlx::query_as::<_, TenantRow>(&format!(
            "INSERT INTO tenants (id, location_id, company_id, provider)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (location_id) DO UPDATE
             SET is_active = TRUE,
                 deactivated_at = NULL,
                 company_id = COALESCE(EXCLUDED.company_id, tenants.company_id),
                 updated_at = NOW()
             RETURNING {}",
            TENANT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(location_id)
        .bind(company_id)
        .bind(DEFAULT_PROVIDER)
        .fetch_one(&self.pool)
        .await
        .map(Tenant::from)
        .map_err(DatabaseError::from_sqlx)
    }

    async fn deactivate(&self, location_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE tenants SET is_active = FALSE, deactivated_at = NOW(), updated_at = NOW()
             WHERE location_id = $1 AND is_active = TRUE",
        )
        .bind(location_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_credentials(
        &self,
        tenant_id: Uuid,
        credentials: &SealedCredentials,
    ) -> Result<Tenant, DatabaseError> {
        sqlx::query_as::<_, TenantRow>(&format!(
            "UPDATE tenants
             SET merchant_id = $2, merchant_key_sealed = $3, merchant_salt_sealed = $4,
                 test_mode = $5, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            TENANT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(&credentials.merchant_id)
        .bind(&credentials.merchant_key_sealed)
        .bind(&credentials.merchant_salt_sealed)
        .bind(credentials.test_mode)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Tenant::from)
        .ok_or_else(|| DatabaseError::not_found("Tenant", tenant_id.to_string()))
    }

    async fn save_platform_token(
        &self,
        tenant_id: Uuid,
        token: &PlatformToken,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE tenants SET platform_token = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(tenant_id)
        .bind(Json(token))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Tenant", tenant_id.to_string()));
        }
        Ok(())
    }
}
