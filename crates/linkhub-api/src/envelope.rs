//! The standard response envelope.
//!
//! Every response is `{success, data?, error?, meta: {requestId, timestamp}}`.

use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::current_request_id;

/// Response metadata echoed on every envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Meta {
    /// Build metadata for the current request scope.
    #[must_use]
    pub fn current() -> Self {
        Self {
            request_id: current_request_id().unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }
}

/// Error body inside a failed envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

impl<T: Serialize> ApiResponse<T> {
    /// A successful envelope around `data`.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Meta::current(),
        }
    }
}

impl ApiResponse<serde_json::Value> {
    /// A failed envelope with the given code and message.
    #[must_use]
    pub fn failure(code: &str, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message,
                details: None,
            }),
            meta: Meta::current(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let envelope = ApiResponse::ok(serde_json::json!({"x": 1}));
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["x"], 1);
        assert!(json.get("error").is_none());
        assert!(json["meta"].get("requestId").is_some());
        assert!(json["meta"].get("timestamp").is_some());
    }

    #[test]
    fn test_failure_envelope_shape() {
        let envelope = ApiResponse::failure("INVALID_STATE", "state consumed".to_string());
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], false);
        assert!(json.get("data").is_none());
        assert_eq!(json["error"]["code"], "INVALID_STATE");
        assert_eq!(json["error"]["message"], "state consumed");
    }
}
