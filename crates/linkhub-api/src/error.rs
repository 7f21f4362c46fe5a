//! HTTP-side error responder.
//!
//! Wraps [`BrokerError`] for axum handlers: the status code and stable code
//! come from the taxonomy, internal detail is logged and never echoed, and
//! rate-limit rejections carry a `Retry-After` hint.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use linkhub_core::BrokerError;
use linkhub_db::DbError;

use crate::envelope::ApiResponse;

/// Handler-level error type.
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl ApiError {
    /// The wrapped broker error.
    #[must_use]
    pub fn inner(&self) -> &BrokerError {
        &self.0
    }
}

impl From<BrokerError> for ApiError {
    fn from(error: BrokerError) -> Self {
        Self(error)
    }
}

impl From<DbError> for ApiError {
    fn from(error: DbError) -> Self {
        Self(BrokerError::internal(error.to_string()))
    }
}

impl From<linkhub_crypto::CryptoError> for ApiError {
    fn from(error: linkhub_crypto::CryptoError) -> Self {
        Self(BrokerError::internal(error.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let code = error.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internal faults are logged with detail and surfaced generically.
        let message = match &error {
            BrokerError::Internal { message } => {
                tracing::error!(target: "api", error = %message, "Internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let retry_after = match &error {
            BrokerError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ApiResponse::failure(code.as_str(), message);
        let mut response = (status, body).into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_taxonomy() {
        let response = ApiError(BrokerError::InvalidApiKey).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiError(BrokerError::InvalidState).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError(BrokerError::Provider {
            message: "x".to_string(),
            retryable: true,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let response = ApiError(BrokerError::RateLimited {
            retry_after_secs: 17,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "17");
    }

    #[tokio::test]
    async fn test_internal_detail_not_echoed() {
        let response =
            ApiError(BrokerError::internal("sqlx: relation does not exist")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("sqlx"));
        assert!(text.contains("INTERNAL_ERROR"));
    }
}
