//! Provider lookup by name, bound to a tenant's credentials

use crate::database::repository::PaymentMethodStore;
use crate::error::{AppError, AppResult};
use crate::payments::providers::paytr::{self, PaytrConfig, PaytrProvider};
use crate::payments::traits::PaymentProvider;
use crate::tenants::{CredentialSealer, Tenant, TenantCredentials};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// What a factory gets to build a tenant-bound provider
pub struct ProviderContext {
    pub tenant_id: Uuid,
    pub credentials: TenantCredentials,
    pub methods: Arc<dyn PaymentMethodStore>,
}

type ProviderFactory = Box<dyn Fn(ProviderContext) -> Arc<dyn PaymentProvider> + Send + Sync>;

pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
    methods: Arc<dyn PaymentMethodStore>,
    sealer: CredentialSealer,
}

impl ProviderRegistry {
    pub fn new(methods: Arc<dyn PaymentMethodStore>, sealer: CredentialSealer) -> Self {
        Self {
            factories: HashMap::new(),
            methods,
            sealer,
        }
    }

    /// Registry with PayTR registered
    pub fn with_paytr(
        methods: Arc<dyn PaymentMethodStore>,
        sealer: CredentialSealer,
        config: PaytrConfig,
        client: Client,
    ) -> Self {
        let mut registry = Self::new(methods, sealer);
        let config = Arc::new(config);
        registry.register(paytr::PROVIDER_NAME, move |ctx| {
            Arc::new(PaytrProvider::new(
                config.clone(),
                client.clone(),
                ctx.credentials,
                ctx.tenant_id,
                ctx.methods,
            ))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(ProviderContext) -> Arc<dyn PaymentProvider> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the provider for `tenant`, defaulting to the tenant's configured
    /// gateway. Every failure here is a configuration error.
    pub fn resolve(
        &self,
        tenant: &Tenant,
        provider: Option<&str>,
    ) -> AppResult<Arc<dyn PaymentProvider>> {
        let name = provider.unwrap_or(tenant.provider.as_str());

        if !tenant.is_active {
            return Err(AppError::configuration(format!(
                "tenant {} is not active",
                tenant.location_id
            )));
        }

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AppError::configuration(format!("unknown payment provider '{}'", name)))?;

        if name != tenant.provider {
            return Err(AppError::configuration(format!(
                "tenant {} has no credentials for provider '{}'",
                tenant.location_id, name
            )));
        }

        let credentials = tenant.credentials(&self.sealer)?.ok_or_else(|| {
            AppError::configuration(format!(
                "tenant {} has not configured {} credentials",
                tenant.location_id, name
            ))
        })?;

        debug!(tenant = %tenant.location_id, provider = %name, "Resolved payment provider");
        Ok(factory(ProviderContext {
            tenant_id: tenant.id,
            credentials,
            methods: self.methods.clone(),
        }))
    }
}
