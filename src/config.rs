use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::sync::Arc;

use crate::payments::providers::PaytrConfig;
use crate::platform::PlatformConfig;
use crate::tenants::CredentialSealer;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub platform: PlatformSettings,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    /// `pretty` or `json`
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub iframe_base_url: String,
    pub merchant_ok_url: String,
    pub merchant_fail_url: String,
    pub timeout_secs: u64,
    pub timeout_limit_minutes: u32,
    pub max_installment: i32,
    pub lang: String,
    pub debug_on: bool,
}

#[derive(Clone, Deserialize)]
pub struct PlatformSettings {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct SecurityConfig {
    /// Base64 of the 32-byte AES-256-GCM key sealing merchant credentials
    pub sealing_key: String,
    /// Shared key the platform sends on tenant and query routes
    pub api_key: Option<String>,
}

impl std::fmt::Debug for PlatformSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSettings")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("sealing_key", &"***")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl GatewayConfig {
    pub fn paytr(&self) -> PaytrConfig {
        PaytrConfig {
            base_url: self.base_url.clone(),
            iframe_base_url: self.iframe_base_url.clone(),
            merchant_ok_url: self.merchant_ok_url.clone(),
            merchant_fail_url: self.merchant_fail_url.clone(),
            timeout_secs: self.timeout_secs,
            timeout_limit_minutes: self.timeout_limit_minutes,
            max_installment: self.max_installment,
            lang: self.lang.clone(),
            debug_on: self.debug_on,
        }
    }
}

impl PlatformSettings {
    /// OAuth client settings, when both client id and secret are set
    pub fn oauth(&self) -> Option<PlatformConfig> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(PlatformConfig {
                    base_url: self.base_url.clone(),
                    client_id: id.clone(),
                    client_secret: secret.clone(),
                    timeout_secs: self.timeout_secs,
                })
            }
            _ => None,
        }
    }
}

impl SecurityConfig {
    pub fn api_key(&self) -> Option<Arc<str>> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(Arc::from)
    }

    pub fn sealer(&self) -> Result<CredentialSealer> {
        CredentialSealer::from_base64(&self.sealing_key)
            .map_err(|e| anyhow!("SECURITY__SEALING_KEY is invalid: {}", e))
    }
}

impl Config {
    /// Defaults, then `SECTION__KEY` environment variables. The conventional
    /// `HOST`, `PORT`, `ENVIRONMENT` and `DATABASE_URL` names are honoured too.
    pub fn from_env() -> Result<Self> {
        let defaults = PaytrConfig::default();

        let settings = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.environment", "development")?
            .set_default("server.log_format", "pretty")?
            .set_default("database.max_connections", 20)?
            .set_default("gateway.base_url", defaults.base_url)?
            .set_default("gateway.iframe_base_url", defaults.iframe_base_url)?
            .set_default("gateway.merchant_ok_url", "")?
            .set_default("gateway.merchant_fail_url", "")?
            .set_default("gateway.timeout_secs", defaults.timeout_secs as i64)?
            .set_default("gateway.timeout_limit_minutes", defaults.timeout_limit_minutes as i64)?
            .set_default("gateway.max_installment", defaults.max_installment)?
            .set_default("gateway.lang", defaults.lang)?
            .set_default("gateway.debug_on", defaults.debug_on)?
            .set_default("platform.base_url", "https://services.leadconnectorhq.com")?
            .set_default("platform.timeout_secs", 10)?
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", env::var("HOST").ok())?
            .set_override_option("server.port", env::var("PORT").ok())?
            .set_override_option("server.environment", env::var("ENVIRONMENT").ok())?
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .build()
            .context("failed to load configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("configuration is incomplete (DATABASE_URL and SECURITY__SEALING_KEY are required)")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.server.log_format.as_str()) {
            return Err(anyhow!(
                "Log format must be one of: {:?}, got {}",
                valid_log_formats,
                self.server.log_format
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE__MAX_CONNECTIONS must be greater than 0"));
        }

        if self.gateway.base_url.trim().is_empty() {
            return Err(anyhow!("GATEWAY__BASE_URL cannot be empty"));
        }

        if self.gateway.timeout_secs == 0 {
            return Err(anyhow!("GATEWAY__TIMEOUT_SECS must be greater than 0"));
        }

        if self.server.environment == "production" && self.security.api_key().is_none() {
            return Err(anyhow!("SECURITY__API_KEY is required in production"));
        }

        self.security.sealer()?;
        Ok(())
    }
}
