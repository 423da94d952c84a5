//! Tenants: one platform installation (location) and its gateway credentials

pub mod crypto;
pub mod service;

pub use crypto::CredentialSealer;
pub use service::TenantService;

use crate::error::{AppError, AppResult};
use crate::platform::PlatformToken;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

pub const DEFAULT_PROVIDER: &str = "paytr";

#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    pub id: Uuid,
    pub location_id: String,
    pub company_id: Option<String>,
    /// Registry name of the configured gateway
    pub provider: String,
    pub merchant_id: Option<String>,
    pub merchant_key_sealed: Option<String>,
    pub merchant_salt_sealed: Option<String>,
    pub test_mode: bool,
    pub platform_token: Option<PlatformToken>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn new(location_id: impl Into<String>, company_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            location_id: location_id.into(),
            company_id,
            provider: DEFAULT_PROVIDER.to_string(),
            merchant_id: None,
            merchant_key_sealed: None,
            merchant_salt_sealed: None,
            test_mode: false,
            platform_token: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.merchant_id.is_some()
            && self.merchant_key_sealed.is_some()
            && self.merchant_salt_sealed.is_some()
    }

    /// Open the stored gateway credentials.
    ///
    /// `Ok(None)` when nothing is configured. A partially configured set is a
    /// configuration error and never reaches a provider.
    pub fn credentials(&self, sealer: &CredentialSealer) -> AppResult<Option<TenantCredentials>> {
        match (
            &self.merchant_id,
            &self.merchant_key_sealed,
            &self.merchant_salt_sealed,
        ) {
            (None, None, None) => Ok(None),
            (Some(merchant_id), Some(key), Some(salt)) => Ok(Some(TenantCredentials {
                merchant_id: merchant_id.clone(),
                merchant_key: sealer.open(key)?,
                merchant_salt: sealer.open(salt)?,
                test_mode: self.test_mode,
            })),
            _ => Err(AppError::configuration(format!(
                "tenant {} has a partial credential set",
                self.location_id
            ))),
        }
    }
}

/// Decrypted gateway credentials, only ever held in memory
#[derive(Clone, PartialEq, Eq)]
pub struct TenantCredentials {
    pub merchant_id: String,
    pub merchant_key: String,
    pub merchant_salt: String,
    pub test_mode: bool,
}

impl std::fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("merchant_id", &self.merchant_id)
            .field("test_mode", &self.test_mode)
            .finish_non_exhaustive()
    }
}

/// Credentials as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedCredentials {
    pub merchant_id: String,
    pub merchant_key_sealed: String,
    pub merchant_salt_sealed: String,
    pub test_mode: bool,
}

/// Setup form submitted by the tenant
#[derive(Clone, Default, Deserialize)]
pub struct CredentialForm {
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub merchant_key: String,
    #[serde(default)]
    pub merchant_salt: String,
    #[serde(default)]
    pub test_mode: bool,
}

impl CredentialForm {
    /// All three secrets must be present; a partial set is rejected outright
    pub fn validate(&self) -> AppResult<()> {
        for (field, value) in [
            ("merchant_id", &self.merchant_id),
            ("merchant_key", &self.merchant_key),
            ("merchant_salt", &self.merchant_salt),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::validation(field, "is required"));
            }
        }
        if !self.merchant_id.trim().chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::validation("merchant_id", "must be numeric"));
        }
        Ok(())
    }

    pub fn seal(&self, sealer: &CredentialSealer) -> AppResult<SealedCredentials> {
        self.validate()?;
        Ok(SealedCredentials {
            merchant_id: self.merchant_id.trim().to_string(),
            merchant_key_sealed: sealer.seal(self.merchant_key.trim())?,
            merchant_salt_sealed: sealer.seal(self.merchant_salt.trim())?,
            test_mode: self.test_mode,
        })
    }
}
