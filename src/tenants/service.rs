use crate::database::repository::TenantStore;
use crate::error::{AppError, AppResult};
use crate::platform::{PlatformClient, PlatformToken};
use crate::tenants::{CredentialForm, CredentialSealer, Tenant};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Installation lifecycle and credential management for platform locations
pub struct TenantService {
    store: Arc<dyn TenantStore>,
    sealer: CredentialSealer,
    oauth: Option<Arc<PlatformClient>>,
}

impl TenantService {
    pub fn new(
        store: Arc<dyn TenantStore>,
        sealer: CredentialSealer,
        oauth: Option<Arc<PlatformClient>>,
    ) -> Self {
        Self {
            store,
            sealer,
            oauth,
        }
    }

    /// Create or reactivate the tenant for an installed location
    pub async fn install(&self, location_id: &str, company_id: Option<&str>) -> AppResult<Tenant> {
        if location_id.trim().is_empty() {
            return Err(AppError::validation("locationId", "is required"));
        }
        let tenant = self.store.upsert_installation(location_id, company_id).await?;
        info!(location_id = %location_id, tenant_id = %tenant.id, "Location installed");
        Ok(tenant)
    }

    /// Returns false when there was nothing active to uninstall
    pub async fn uninstall(&self, location_id: &str) -> AppResult<bool> {
        let deactivated = self.store.deactivate(location_id).await?;
        if deactivated {
            info!(location_id = %location_id, "Location uninstalled");
        } else {
            warn!(location_id = %location_id, "Uninstall for unknown or inactive location");
        }
        Ok(deactivated)
    }

    /// Complete the OAuth authorisation for a location.
    ///
    /// A company-level grant is exchanged for a location token when
    /// `location_id` is given; a location-level grant carries its own.
    pub async fn authorize(&self, code: &str, location_id: Option<&str>) -> AppResult<Tenant> {
        let oauth = self.oauth()?;
        let token = oauth.exchange_code(code).await?;

        let token = match (&token, location_id) {
            (PlatformToken::Location { .. }, _) => token,
            (PlatformToken::Company { .. }, Some(location_id)) => {
                oauth.exchange_location_token(&token, location_id, None).await?
            }
            (PlatformToken::Company { .. }, None) => {
                return Err(AppError::validation(
                    "locationId",
                    "is required for a company-level grant",
                ))
            }
        };

        let location_id = token
            .location_id()
            .ok_or_else(|| AppError::platform("location token without a location id"))?
            .to_string();
        let tenant = self.install(&location_id, token.company_id()).await?;
        self.store.save_platform_token(tenant.id, &token).await?;

        info!(location_id = %location_id, user_type = token.user_type(), "Platform authorisation stored");
        self.find_active(&location_id).await
    }

    /// Validate, seal and store merchant credentials
    pub async fn configure_credentials(
        &self,
        location_id: &str,
        form: CredentialForm,
    ) -> AppResult<Tenant> {
        form.validate()?;
        let tenant = self.find_active(location_id).await?;
        let sealed = form.seal(&self.sealer)?;
        let tenant = self.store.save_credentials(tenant.id, &sealed).await?;

        info!(
            location_id = %location_id,
            merchant_id = %form.merchant_id,
            test_mode = form.test_mode,
            "Merchant credentials configured"
        );
        Ok(tenant)
    }

    /// Tenant for `location_id`; unknown and deactivated locations are errors
    pub async fn find_active(&self, location_id: &str) -> AppResult<Tenant> {
        let tenant = self
            .store
            .find_by_location(location_id)
            .await?
            .ok_or_else(|| AppError::not_found("Tenant", location_id))?;

        if !tenant.is_active {
            return Err(AppError::configuration(format!(
                "location {} is not installed",
                location_id
            )));
        }
        Ok(tenant)
    }

    pub async fn store_platform_token(&self, location_id: &str, token: &PlatformToken) -> AppResult<()> {
        let tenant = self.find_active(location_id).await?;
        if token.needs_refresh(Utc::now()) {
            warn!(location_id = %location_id, "Storing a platform token that is about to expire");
        }
        self.store.save_platform_token(tenant.id, token).await?;
        Ok(())
    }

    fn oauth(&self) -> AppResult<&PlatformClient> {
        self.oauth
            .as_deref()
            .ok_or_else(|| AppError::configuration("platform OAuth client is not configured"))
    }
}
