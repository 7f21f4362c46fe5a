//! Adapter error types and provider-fault classification.
//!
//! Adapters surface raw provider failures as [`AdapterError`]; the
//! [`ProviderFault`] classification drives the token manager's state machine
//! (revoked / expired / transient / rejected) and the dispatcher's error
//! normalization.

use linkhub_core::BrokerError;
use thiserror::Error;

/// Classification of a provider-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFault {
    /// The grant was explicitly invalidated or revoked (`invalid_grant`).
    GrantRevoked,
    /// The grant aged out under the provider's refresh-token policy.
    GrantExpired,
    /// Transient network error or provider 5xx; safe to surface as retryable.
    Transient,
    /// Any other provider 4xx.
    Rejected,
}

/// Errors produced by adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The provider rejected a token operation; classified for the state
    /// machine.
    #[error("Provider token fault ({fault:?}): {message}")]
    TokenFault {
        fault: ProviderFault,
        message: String,
    },

    /// The provider rejected an API call for a missing scope.
    #[error("Missing scope: {scope}")]
    ScopeInsufficient { scope: String },

    /// The requested provider resource does not exist.
    #[error("Provider resource not found")]
    ResourceNotFound,

    /// Provider returned an HTTP error on a verb call.
    #[error("Provider responded {status}: {message}")]
    Api {
        status: u16,
        message: String,
        retryable: bool,
    },

    /// Network-level failure reaching the provider.
    #[error("Provider unreachable: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider payload did not match the expected shape.
    #[error("Provider payload malformed: {0}")]
    Malformed(String),

    /// The verb parameters were invalid before any provider call.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

impl AdapterError {
    /// Classify this error for the refresh state machine.
    ///
    /// Network errors and 5xx are transient; everything else that reaches a
    /// token operation is a rejection unless already classified.
    #[must_use]
    pub fn fault(&self) -> ProviderFault {
        match self {
            Self::TokenFault { fault, .. } => *fault,
            Self::Network(_) => ProviderFault::Transient,
            Self::Api { retryable, .. } => {
                if *retryable {
                    ProviderFault::Transient
                } else {
                    ProviderFault::Rejected
                }
            }
            _ => ProviderFault::Rejected,
        }
    }

    /// Default normalization into the broker taxonomy.
    ///
    /// Adapters may override `normalize_error` for provider-specific shapes;
    /// this mapping is the shared fallback.
    #[must_use]
    pub fn into_broker_error(self) -> BrokerError {
        match self {
            Self::ScopeInsufficient { scope } => BrokerError::ScopeInsufficient { scope },
            Self::ResourceNotFound => BrokerError::NotFound {
                resource: "Provider resource".to_string(),
            },
            Self::InvalidParams(message) => BrokerError::Validation { message },
            Self::Network(e) => BrokerError::Provider {
                message: format!("provider unreachable: {e}"),
                retryable: true,
            },
            Self::Api {
                status,
                message,
                retryable,
            } => BrokerError::Provider {
                message: format!("provider responded {status}: {message}"),
                retryable,
            },
            Self::TokenFault { fault, message } => match fault {
                ProviderFault::GrantRevoked => BrokerError::ConnectionRevoked,
                ProviderFault::GrantExpired => BrokerError::ConnectionExpired,
                ProviderFault::Transient | ProviderFault::Rejected => BrokerError::Provider {
                    message,
                    retryable: fault == ProviderFault::Transient,
                },
            },
            Self::Malformed(message) => BrokerError::Provider {
                message: format!("malformed provider payload: {message}"),
                retryable: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_fault_classification() {
        let err = AdapterError::TokenFault {
            fault: ProviderFault::GrantRevoked,
            message: "invalid_grant".to_string(),
        };
        assert_eq!(err.fault(), ProviderFault::GrantRevoked);
    }

    #[test]
    fn test_api_5xx_is_transient() {
        let err = AdapterError::Api {
            status: 503,
            message: "unavailable".to_string(),
            retryable: true,
        };
        assert_eq!(err.fault(), ProviderFault::Transient);
    }

    #[test]
    fn test_api_4xx_is_rejected() {
        let err = AdapterError::Api {
            status: 400,
            message: "bad request".to_string(),
            retryable: false,
        };
        assert_eq!(err.fault(), ProviderFault::Rejected);
    }

    #[test]
    fn test_scope_normalizes_to_scope_insufficient() {
        let err = AdapterError::ScopeInsufficient {
            scope: "email.send".to_string(),
        };
        let broker = err.into_broker_error();
        assert_eq!(broker.http_status(), 403);
    }

    #[test]
    fn test_revoked_grant_normalizes_to_connection_revoked() {
        let err = AdapterError::TokenFault {
            fault: ProviderFault::GrantRevoked,
            message: "invalid_grant".to_string(),
        };
        assert!(matches!(
            err.into_broker_error(),
            BrokerError::ConnectionRevoked
        ));
    }
}
