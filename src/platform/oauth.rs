//! Platform OAuth token state and client

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// Tokens this close to expiry are refreshed before use
pub const REFRESH_SKEW_SECS: i64 = 300;

const API_VERSION: &str = "2021-07-28";

/// OAuth token held for a tenant.
///
/// Company tokens are issued for an agency install and can be exchanged for
/// a location token. The two scopes are never stored in the same field.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum PlatformToken {
    Company {
        company_id: String,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    },
    Location {
        company_id: Option<String>,
        location_id: String,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    },
}

impl std::fmt::Debug for PlatformToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformToken::Company {
                company_id,
                expires_at,
                ..
            } => f
                .debug_struct("Company")
                .field("company_id", company_id)
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
            PlatformToken::Location {
                company_id,
                location_id,
                expires_at,
                ..
            } => f
                .debug_struct("Location")
                .field("company_id", company_id)
                .field("location_id", location_id)
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
        }
    }
}

impl PlatformToken {
    pub fn access_token(&self) -> &str {
        match self {
            PlatformToken::Company { access_token, .. }
            | PlatformToken::Location { access_token, .. } => access_token,
        }
    }

    pub fn refresh_token(&self) -> &str {
        match self {
            PlatformToken::Company { refresh_token, .. }
            | PlatformToken::Location { refresh_token, .. } => refresh_token,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            PlatformToken::Company { expires_at, .. }
            | PlatformToken::Location { expires_at, .. } => *expires_at,
        }
    }

    pub fn company_id(&self) -> Option<&str> {
        match self {
            PlatformToken::Company { company_id, .. } => Some(company_id),
            PlatformToken::Location { company_id, .. } => company_id.as_deref(),
        }
    }

    pub fn location_id(&self) -> Option<&str> {
        match self {
            PlatformToken::Company { .. } => None,
            PlatformToken::Location { location_id, .. } => Some(location_id),
        }
    }

    /// `user_type` the platform expects on refresh
    pub fn user_type(&self) -> &'static str {
        match self {
            PlatformToken::Company { .. } => "Company",
            PlatformToken::Location { .. } => "Location",
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() - ChronoDuration::seconds(REFRESH_SKEW_SECS) <= now
    }

    /// A usable location token for exactly this location
    pub fn is_fresh_for_location(&self, location_id: &str, now: DateTime<Utc>) -> bool {
        self.location_id() == Some(location_id) && !self.needs_refresh(now)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default)]
    user_type: Option<String>,
    #[serde(default)]
    company_id: Option<String>,
    #[serde(default)]
    location_id: Option<String>,
}

/// Platform OAuth endpoints
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout_secs: u64,
}

pub struct PlatformClient {
    config: PlatformConfig,
    client: Client,
}

impl PlatformClient {
    pub fn new(config: PlatformConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("platform HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Trade an authorization code from the install redirect for a token
    pub async fn exchange_code(&self, code: &str) -> AppResult<PlatformToken> {
        let form = vec![
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
        ];
        let response = self.post_form("/oauth/token", None, &form).await?;
        token_from_response(response, None, Utc::now())
    }

    /// Exchange a company token for a location token.
    ///
    /// Keyed only by `location_id`: when `current` is already a fresh token
    /// for that location no request is made.
    pub async fn exchange_location_token(
        &self,
        company: &PlatformToken,
        location_id: &str,
        current: Option<&PlatformToken>,
    ) -> AppResult<PlatformToken> {
        let now = Utc::now();
        if let Some(token) = current.filter(|t| t.is_fresh_for_location(location_id, now)) {
            debug!(location_id = %location_id, "Location token still valid, skipping exchange");
            return Ok(token.clone());
        }

        let form = location_token_form(company, location_id)?;
        let response = self
            .post_form("/oauth/locationToken", Some(company.access_token()), &form)
            .await?;

        if let Some(returned) = response.location_id.as_deref() {
            if returned != location_id {
                error!(
                    requested = %location_id,
                    returned = %returned,
                    "Platform returned a token for a different location"
                );
                return Err(AppError::platform("location token issued for another location"));
            }
        }

        info!(location_id = %location_id, "Exchanged company token for location token");
        token_from_response(response, Some(location_id), now).map(|token| match token {
            PlatformToken::Location {
                company_id: None,
                location_id,
                access_token,
                refresh_token,
                expires_at,
            } => PlatformToken::Location {
                company_id: company.company_id().map(str::to_string),
                location_id,
                access_token,
                refresh_token,
                expires_at,
            },
            other => other,
        })
    }

    /// Refresh-token grant. The returned token keeps the scope of `token`.
    pub async fn refresh(&self, token: &PlatformToken) -> AppResult<PlatformToken> {
        let form = vec![
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", token.refresh_token().to_string()),
            ("user_type", token.user_type().to_string()),
        ];
        let response = self.post_form("/oauth/token", None, &form).await?;
        let expires_at = Utc::now() + ChronoDuration::seconds(response.expires_in);

        Ok(match token {
            PlatformToken::Company { company_id, .. } => PlatformToken::Company {
                company_id: company_id.clone(),
                access_token: response.access_token,
                refresh_token: response.refresh_token,
                expires_at,
            },
            PlatformToken::Location {
                company_id,
                location_id,
                ..
            } => PlatformToken::Location {
                company_id: company_id.clone(),
                location_id: location_id.clone(),
                access_token: response.access_token,
                refresh_token: response.refresh_token,
                expires_at,
            },
        })
    }

    async fn post_form(
        &self,
        path: &str,
        bearer: Option<&str>,
        form: &[(&'static str, String)],
    ) -> AppResult<TokenResponse> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self
            .client
            .post(&url)
            .header("Version", API_VERSION)
            .header("Accept", "application/json")
            .form(form);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!(path = %path, error = %e, "Platform OAuth request failed");
            AppError::platform(format!("request to {} failed: {}", path, e))
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(path = %path, status = %status, "Platform OAuth request rejected");
            return Err(AppError::platform(format!("HTTP {}: {}", status, body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| AppError::platform(format!("invalid token response: {}", e)))
    }
}

/// Form for the company → location exchange.
///
/// `companyId` always comes from the company token and `locationId` from the
/// caller; a location token cannot be used as the source.
pub fn location_token_form(
    company: &PlatformToken,
    location_id: &str,
) -> AppResult<Vec<(&'static str, String)>> {
    let PlatformToken::Company { company_id, .. } = company else {
        return Err(AppError::validation(
            "token",
            "location tokens can only be exchanged from a company token",
        ));
    };
    if location_id.trim().is_empty() {
        return Err(AppError::validation("location_id", "location id is required"));
    }
    Ok(vec![
        ("companyId", company_id.clone()),
        ("locationId", location_id.to_string()),
    ])
}

fn token_from_response(
    response: TokenResponse,
    requested_location: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<PlatformToken> {
    let expires_at = now + ChronoDuration::seconds(response.expires_in);
    let location_id = requested_location
        .map(str::to_string)
        .or(response.location_id);
    let is_company = response.user_type.as_deref() == Some("Company") && requested_location.is_none();

    match (is_company, location_id) {
        (false, Some(location_id)) => Ok(PlatformToken::Location {
            company_id: response.company_id,
            location_id,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        }),
        _ => {
            let company_id = response
                .company_id
                .ok_or_else(|| AppError::platform("token response has neither locationId nor companyId"))?;
            Ok(PlatformToken::Company {
                company_id,
                access_token: response.access_token,
                refresh_token: response.refresh_token,
                expires_at,
            })
        }
    }
}
