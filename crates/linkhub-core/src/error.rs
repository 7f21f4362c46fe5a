//! Broker-wide error taxonomy.
//!
//! Every failure surfaced to a project maps to one of the stable error codes
//! here, each with a fixed HTTP status. The HTTP layer owns the response
//! envelope; this crate only knows codes, statuses, and messages.

use serde::Serialize;
use thiserror::Error;

/// Stable error codes surfaced in API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidApiKey,
    InvalidSignature,
    TimestampExpired,
    InvalidState,
    ConnectionNotFound,
    ConnectionExpired,
    ConnectionRevoked,
    ScopeInsufficient,
    ProviderError,
    RateLimited,
    ValidationError,
    NotFound,
    Forbidden,
    InternalError,
}

impl ErrorCode {
    /// The wire representation of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::TimestampExpired => "TIMESTAMP_EXPIRED",
            Self::InvalidState => "INVALID_STATE",
            Self::ConnectionNotFound => "CONNECTION_NOT_FOUND",
            Self::ConnectionExpired => "CONNECTION_EXPIRED",
            Self::ConnectionRevoked => "CONNECTION_REVOKED",
            Self::ScopeInsufficient => "SCOPE_INSUFFICIENT",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// The HTTP status associated with the code.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidApiKey
            | Self::InvalidSignature
            | Self::TimestampExpired
            | Self::ConnectionExpired
            | Self::ConnectionRevoked => 401,
            Self::InvalidState | Self::ValidationError => 400,
            Self::ConnectionNotFound | Self::NotFound => 404,
            Self::ScopeInsufficient | Self::Forbidden => 403,
            Self::ProviderError => 502,
            Self::RateLimited => 429,
            Self::InternalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker errors.
///
/// Variants that wrap internal failures (database, crypto) deliberately carry
/// only a message; the HTTP layer logs the detail and responds generically.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Unknown or revoked API key")]
    InvalidApiKey,

    #[error("Request signature does not match")]
    InvalidSignature,

    #[error("Request timestamp outside the accepted window")]
    TimestampExpired,

    #[error("OAuth state is missing, consumed, or expired")]
    InvalidState,

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Connection credentials have expired; the user must re-connect")]
    ConnectionExpired,

    #[error("Connection was revoked at the provider")]
    ConnectionRevoked,

    #[error("Provider rejected the request for missing scope: {scope}")]
    ScopeInsufficient { scope: String },

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Rate limit exceeded; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BrokerError {
    /// Convenience constructor for internal errors.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Convenience constructor for validation errors.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// The stable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidApiKey => ErrorCode::InvalidApiKey,
            Self::InvalidSignature => ErrorCode::InvalidSignature,
            Self::TimestampExpired => ErrorCode::TimestampExpired,
            Self::InvalidState => ErrorCode::InvalidState,
            Self::ConnectionNotFound => ErrorCode::ConnectionNotFound,
            Self::ConnectionExpired => ErrorCode::ConnectionExpired,
            Self::ConnectionRevoked => ErrorCode::ConnectionRevoked,
            Self::ScopeInsufficient { .. } => ErrorCode::ScopeInsufficient,
            Self::Provider { .. } => ErrorCode::ProviderError,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// The HTTP status for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.code().http_status()
    }
}

/// Result alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_are_401() {
        assert_eq!(BrokerError::InvalidApiKey.http_status(), 401);
        assert_eq!(BrokerError::InvalidSignature.http_status(), 401);
        assert_eq!(BrokerError::TimestampExpired.http_status(), 401);
    }

    #[test]
    fn test_terminal_connection_statuses_are_401() {
        assert_eq!(BrokerError::ConnectionExpired.http_status(), 401);
        assert_eq!(BrokerError::ConnectionRevoked.http_status(), 401);
    }

    #[test]
    fn test_provider_error_is_502() {
        let err = BrokerError::Provider {
            message: "upstream 503".to_string(),
            retryable: true,
        };
        assert_eq!(err.http_status(), 502);
        assert_eq!(err.code().as_str(), "PROVIDER_ERROR");
    }

    #[test]
    fn test_code_wire_form() {
        assert_eq!(ErrorCode::InvalidState.as_str(), "INVALID_STATE");
        assert_eq!(ErrorCode::RateLimited.as_str(), "RATE_LIMITED");
        assert_eq!(
            serde_json::to_string(&ErrorCode::ConnectionNotFound).unwrap(),
            "\"CONNECTION_NOT_FOUND\""
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = BrokerError::NotFound {
            resource: "Webhook subscription".to_string(),
        };
        assert_eq!(err.to_string(), "Webhook subscription not found");
        assert_eq!(err.http_status(), 404);
    }
}
