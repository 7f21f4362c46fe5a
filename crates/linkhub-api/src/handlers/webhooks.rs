//! Webhook subscription management handlers.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use linkhub_core::BrokerError;
use linkhub_db::models::{CreateWebhookSubscription, WebhookSubscription};
use linkhub_webhooks::{validate_webhook_url, EventType};

use crate::auth::AuthContext;
use crate::envelope::ApiResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /webhooks`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebhookRequest {
    #[validate(length(min = 1, max = 2000))]
    pub url: String,
    /// Subscribed event types (`connection.created`, ...).
    #[validate(length(min = 1))]
    pub events: Vec<String>,
    /// Signing secret; generated by the broker when omitted.
    pub secret: Option<String>,
}

/// Public projection of a subscription. The signing secret appears only in
/// the creation response, and only when the broker generated it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookView {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub enabled: bool,
    pub consecutive_failures: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_code: Option<i16>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl WebhookView {
    fn from_row(row: &WebhookSubscription, secret: Option<String>) -> Self {
        Self {
            id: row.id,
            url: row.url.clone(),
            events: row.event_types.clone(),
            enabled: row.enabled,
            consecutive_failures: row.consecutive_failures,
            last_triggered_at: row.last_triggered_at,
            last_status_code: row.last_status_code,
            created_at: row.created_at,
            secret,
        }
    }
}

/// Generate a webhook signing secret.
fn generate_signing_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("whsec_{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// `POST /webhooks`: register a subscription.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateWebhookRequest>,
) -> ApiResult<ApiResponse<WebhookView>> {
    request
        .validate()
        .map_err(|e| ApiError(BrokerError::validation(e.to_string())))?;

    validate_webhook_url(&request.url, state.config.allow_private_webhooks)
        .map_err(BrokerError::validation)?;

    for event in &request.events {
        if EventType::parse(event).is_none() {
            return Err(ApiError(BrokerError::validation(format!(
                "unknown event type: {event}"
            ))));
        }
    }

    let generated = request.secret.is_none();
    let secret = request.secret.clone().unwrap_or_else(generate_signing_secret);
    let secret_encrypted = state
        .keyring
        .encrypt_str(&secret)
        .map_err(ApiError::from)?;

    let row = WebhookSubscription::create(
        &state.pool,
        CreateWebhookSubscription {
            project_id: auth.project_id,
            url: request.url.clone(),
            secret_encrypted,
            event_types: request.events.clone(),
        },
    )
    .await
    .map_err(ApiError::from)?;

    tracing::info!(
        target: "webhooks",
        project_id = %auth.project_id,
        subscription_id = %row.id,
        events = ?row.event_types,
        "Webhook subscription created"
    );

    // Echo the secret exactly once, so projects can store it.
    let echoed_secret = generated.then_some(secret);
    Ok(ApiResponse::ok(WebhookView::from_row(&row, echoed_secret)))
}

/// `GET /webhooks`: list a project's subscriptions.
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<Vec<WebhookView>>> {
    let rows = WebhookSubscription::list_for_project(&state.pool, auth.project_id)
        .await
        .map_err(ApiError::from)?;

    Ok(ApiResponse::ok(
        rows.iter().map(|row| WebhookView::from_row(row, None)).collect(),
    ))
}

/// `DELETE /webhooks/:id`: remove a subscription.
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let deleted = WebhookSubscription::delete(&state.pool, auth.project_id, id)
        .await
        .map_err(ApiError::from)?;

    if !deleted {
        return Err(ApiError(BrokerError::NotFound {
            resource: "Webhook subscription".to_string(),
        }));
    }

    Ok(ApiResponse::ok(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secret_shape() {
        let secret = generate_signing_secret();
        assert!(secret.starts_with("whsec_"));
        assert_eq!(secret.len(), "whsec_".len() + 43);
        assert_ne!(secret, generate_signing_secret());
    }

    #[test]
    fn test_view_omits_secret_by_default() {
        let row = WebhookSubscription {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            url: "https://hooks.example.com/x".to_string(),
            secret_encrypted: "sealed".to_string(),
            event_types: vec!["connection.created".to_string()],
            enabled: true,
            consecutive_failures: 0,
            last_triggered_at: None,
            last_status_code: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&WebhookView::from_row(&row, None)).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("sealed"));
    }
}
