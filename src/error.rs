//! Application error taxonomy
//!
//! Every fallible operation in the bridge returns an [`AppError`]. The kind tells
//! callers whether the failure is worth retrying and how it maps onto HTTP.

use crate::database::error::DatabaseError;
use http::StatusCode;
use thiserror::Error;

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;

/// Business-rule failures raised by the bridge itself
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or missing request field, rejected before any gateway call
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Callback could not be authenticated. The reason is kept internal.
    #[error("Callback verification failed")]
    Verification { reason: String },

    /// Transition or refund not allowed in the current state
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Referenced record does not exist
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },
}

/// Failures of systems the bridge talks to
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    #[error("{provider} error: {message}")]
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },

    #[error("Platform error: {message}")]
    Platform { message: String },
}

/// Failures of the bridge's own environment
#[derive(Debug, Clone, Error)]
pub enum InfrastructureError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Crypto error: {message}")]
    Crypto { message: String },
}

#[derive(Debug, Clone, Error)]
pub enum AppErrorKind {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Validation {
            field: field.into(),
            message: message.into(),
        }))
    }

    pub fn verification(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Verification {
            reason: reason.into(),
        }))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Conflict {
            message: message.into(),
        }))
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Crypto {
            message: message.into(),
        }))
    }

    pub fn gateway(
        provider: impl Into<String>,
        message: impl Into<String>,
        is_retryable: bool,
    ) -> Self {
        Self::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: provider.into(),
            message: message.into(),
            is_retryable,
        }))
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::External(ExternalError::Platform {
            message: message.into(),
        }))
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::External(ExternalError::PaymentProvider { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::External(ExternalError::Platform { .. }) => true,
            AppErrorKind::Infrastructure(InfrastructureError::Database(db)) => db.is_retryable(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(DomainError::Validation { .. })
        )
    }

    pub fn is_verification(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(DomainError::Verification { .. })
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.kind, AppErrorKind::Domain(DomainError::Conflict { .. }))
    }

    pub fn is_not_found(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(DomainError::NotFound { .. }) => true,
            AppErrorKind::Infrastructure(InfrastructureError::Database(db)) => db.is_not_found(),
            _ => false,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Infrastructure(InfrastructureError::Configuration { .. })
        )
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match &self.kind {
            AppErrorKind::Domain(DomainError::Validation { .. }) => "VALIDATION_ERROR",
            AppErrorKind::Domain(DomainError::Verification { .. }) => "VERIFICATION_ERROR",
            AppErrorKind::Domain(DomainError::Conflict { .. }) => "CONFLICT",
            AppErrorKind::Domain(DomainError::NotFound { .. }) => "NOT_FOUND",
            AppErrorKind::External(ExternalError::PaymentProvider { .. }) => "GATEWAY_ERROR",
            AppErrorKind::External(ExternalError::Platform { .. }) => "PLATFORM_ERROR",
            AppErrorKind::Infrastructure(InfrastructureError::Configuration { .. }) => {
                "CONFIGURATION_ERROR"
            }
            AppErrorKind::Infrastructure(InfrastructureError::Database(_)) => "DATABASE_ERROR",
            AppErrorKind::Infrastructure(InfrastructureError::Crypto { .. }) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::Domain(DomainError::Validation { .. })
            | AppErrorKind::Domain(DomainError::Verification { .. }) => StatusCode::BAD_REQUEST,
            AppErrorKind::Domain(DomainError::Conflict { .. }) => StatusCode::CONFLICT,
            AppErrorKind::Domain(DomainError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppErrorKind::External(_) => StatusCode::BAD_GATEWAY,
            AppErrorKind::Infrastructure(InfrastructureError::Database(db)) if db.is_not_found() => {
                StatusCode::NOT_FOUND
            }
            AppErrorKind::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.kind, context),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl From<AppErrorKind> for AppError {
    fn from(kind: AppErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<DomainError> for AppError {
    fn from(error: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(error))
    }
}

impl From<DatabaseError> for AppError {
    fn from(error: DatabaseError) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Database(
            error,
        )))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        DatabaseError::from_sqlx(error).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;

    #[test]
    fn test_verification_message_hides_reason() {
        let err = AppError::verification("hash mismatch on field status");
        assert_eq!(err.to_string(), "Callback verification failed");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(AppError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::not_found("Payment", "abc").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::configuration("missing key").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::gateway("PayTR", "down", true).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::gateway("PayTR", "timeout", true).is_retryable());
        assert!(!AppError::gateway("PayTR", "declined", false).is_retryable());
        assert!(!AppError::configuration("no credentials").is_retryable());

        let db: AppError = DatabaseError::new(DatabaseErrorKind::PoolExhausted).into();
        assert!(db.is_retryable());
    }

    #[test]
    fn test_context_is_appended() {
        let err = AppError::validation("amount", "must be positive").with_context("refund");
        assert_eq!(err.to_string(), "Invalid amount: must be positive (refund)");
        assert!(err.is_validation());
    }
}
