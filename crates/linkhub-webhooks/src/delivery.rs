//! Webhook delivery execution.
//!
//! Finds matching subscriptions for an event, persists a delivery row before
//! the first HTTP attempt (the at-least-once guarantee), POSTs with an
//! HMAC-SHA256 signature over the raw body, and schedules retries on the
//! backoff schedule. Consecutive failures beyond the threshold auto-disable
//! the subscription.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use linkhub_crypto::{compute_signature, KeyRing};
use linkhub_db::models::{CreateWebhookDelivery, WebhookDelivery, WebhookSubscription};

use crate::events::LifecycleEvent;

/// Maximum delivery attempts per event (initial + 5 backoff retries).
pub const MAX_ATTEMPTS: i32 = 6;

/// Consecutive-failure threshold before a subscription is auto-disabled.
pub const DISABLE_THRESHOLD: i32 = 5;

/// Backoff schedule in seconds: 30 s, 2 m, 10 m, 1 h, 6 h.
pub const BACKOFF_SCHEDULE_SECS: [i64; 5] = [30, 120, 600, 3600, 21_600];

/// The JSON body POSTed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Service that executes webhook deliveries.
#[derive(Clone)]
pub struct DeliveryService {
    pool: PgPool,
    http_client: Client,
    keyring: Arc<KeyRing>,
}

impl DeliveryService {
    /// Create a delivery service with a shared HTTP client.
    ///
    /// The client uses a short connect timeout and a bounded total timeout;
    /// redirects are refused so signatures cannot leak to other hosts.
    pub fn new(pool: PgPool, keyring: Arc<KeyRing>) -> Self {
        let http_client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("linkhub-webhooks/1.0")
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            pool,
            http_client,
            keyring,
        }
    }

    /// Get a reference to the connection pool (for the worker).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Deliver an event to every enabled subscription that wants it.
    pub async fn deliver_event(&self, event: &LifecycleEvent) {
        let subscriptions = match WebhookSubscription::find_enabled_for_event(
            &self.pool,
            event.project_id,
            event.event_type.as_str(),
        )
        .await
        {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to query matching subscriptions"
                );
                return;
            }
        };

        if subscriptions.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                project_id = %event.project_id,
                "No enabled subscriptions match event type"
            );
            return;
        }

        let envelope = WebhookEnvelope {
            id: event.event_id,
            event_type: event.event_type.as_str().to_string(),
            timestamp: event.timestamp,
            data: event.data.clone(),
        };
        let payload = match serde_json::to_value(&envelope) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    error = %e,
                    "Failed to serialize webhook envelope"
                );
                return;
            }
        };

        for subscription in subscriptions {
            // The delivery row is written before the HTTP attempt so a crash
            // between the two re-delivers rather than drops.
            let delivery = match WebhookDelivery::create(
                &self.pool,
                CreateWebhookDelivery {
                    project_id: event.project_id,
                    subscription_id: subscription.id,
                    event_id: event.event_id,
                    event_type: event.event_type.as_str().to_string(),
                    payload: payload.clone(),
                },
            )
            .await
            {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        subscription_id = %subscription.id,
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to persist delivery record"
                    );
                    continue;
                }
            };

            self.execute_delivery(&delivery, &subscription).await;
        }
    }

    /// Execute one delivery attempt to a subscription's URL.
    pub async fn execute_delivery(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
    ) {
        let body = match serde_json::to_vec(&delivery.payload) {
            Ok(b) => b,
            Err(e) => {
                self.handle_failure(delivery, subscription, &format!("serialize: {e}"), None)
                    .await;
                return;
            }
        };

        // The signature covers the raw body only; the timestamp header is
        // advisory and not part of the signed payload.
        let signature = match self.keyring.decrypt_str(&subscription.secret_encrypted) {
            Ok(secret) => Some(compute_signature(&secret, &body)),
            Err(e) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to decrypt subscription secret; delivering unsigned"
                );
                None
            }
        };

        let mut request = self
            .http_client
            .post(&subscription.url)
            .header("Content-Type", "application/json")
            .header("X-Link-Event", delivery.event_type.as_str())
            .header("X-Link-Timestamp", Utc::now().timestamp().to_string())
            .body(body);
        if let Some(signature) = signature {
            request = request.header("X-Link-Signature", format!("sha256={signature}"));
        }

        let start = Instant::now();
        let result = request.send().await;
        let latency_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let status_code = response.status().as_u16() as i16;
                if (200..300).contains(&(status_code as u16)) {
                    self.handle_success(delivery, subscription, status_code, latency_ms)
                        .await;
                } else {
                    self.handle_failure(
                        delivery,
                        subscription,
                        &format!("HTTP {status_code}"),
                        Some(status_code),
                    )
                    .await;
                }
            }
            Err(e) => {
                let message = if e.is_timeout() {
                    "request timeout".to_string()
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    format!("request error: {e}")
                };
                self.handle_failure(delivery, subscription, &message, None)
                    .await;
            }
        }
    }

    /// Process a pending delivery that is ready for retry.
    pub async fn process_retry(&self, delivery: &WebhookDelivery) {
        match WebhookSubscription::find_by_id(&self.pool, delivery.subscription_id).await {
            Ok(Some(sub)) if sub.enabled => self.execute_delivery(delivery, &sub).await,
            Ok(_) => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.subscription_id,
                    "Abandoning retry: subscription disabled or deleted"
                );
                if let Err(e) = WebhookDelivery::mark_failed(
                    &self.pool,
                    delivery.id,
                    delivery.attempt_number,
                    "Subscription disabled or deleted",
                    None,
                    None,
                )
                .await
                {
                    tracing::error!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        error = %e,
                        "Failed to abandon delivery"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to load subscription for retry"
                );
            }
        }
    }

    async fn handle_success(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        status_code: i16,
        latency_ms: u128,
    ) {
        let attempt = delivery.attempt_number + 1;
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            status_code,
            latency_ms,
            attempt_number = attempt,
            "Webhook delivered"
        );

        if let Err(e) =
            WebhookDelivery::mark_delivered(&self.pool, delivery.id, attempt, status_code).await
        {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to mark delivery as delivered"
            );
        }

        if let Err(e) =
            WebhookSubscription::record_trigger(&self.pool, subscription.id, Some(status_code))
                .await
        {
            tracing::error!(
                target: "webhook_delivery",
                subscription_id = %subscription.id,
                error = %e,
                "Failed to record trigger"
            );
        }

        // First 2xx resets the failure streak.
        if let Err(e) =
            WebhookSubscription::reset_consecutive_failures(&self.pool, subscription.id).await
        {
            tracing::error!(
                target: "webhook_delivery",
                subscription_id = %subscription.id,
                error = %e,
                "Failed to reset consecutive failures"
            );
        }
    }

    async fn handle_failure(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        error_message: &str,
        status_code: Option<i16>,
    ) {
        let attempt = delivery.attempt_number + 1;
        let next_attempt_at = next_attempt_time(attempt, MAX_ATTEMPTS);

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            error = %error_message,
            attempt_number = attempt,
            will_retry = next_attempt_at.is_some(),
            "Webhook delivery failed"
        );

        if let Err(e) = WebhookDelivery::mark_failed(
            &self.pool,
            delivery.id,
            attempt,
            error_message,
            status_code,
            next_attempt_at,
        )
        .await
        {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to record delivery failure"
            );
        }

        if let Err(e) =
            WebhookSubscription::record_trigger(&self.pool, subscription.id, status_code).await
        {
            tracing::error!(
                target: "webhook_delivery",
                subscription_id = %subscription.id,
                error = %e,
                "Failed to record trigger"
            );
        }

        match WebhookSubscription::increment_consecutive_failures(&self.pool, subscription.id)
            .await
        {
            Ok(failures) if failures >= DISABLE_THRESHOLD => {
                tracing::warn!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    project_id = %subscription.project_id,
                    consecutive_failures = failures,
                    "Auto-disabling subscription after consecutive failures"
                );

                if let Err(e) = WebhookSubscription::disable(&self.pool, subscription.id).await {
                    tracing::error!(
                        target: "webhook_delivery",
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to auto-disable subscription"
                    );
                }
                if let Err(e) =
                    WebhookDelivery::abandon_for_subscription(&self.pool, subscription.id).await
                {
                    tracing::error!(
                        target: "webhook_delivery",
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to abandon pending deliveries"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to increment consecutive failures"
                );
            }
        }
    }
}

/// Next retry time for a just-failed attempt; `None` when retries are exhausted.
pub fn next_attempt_time(attempt_number: i32, max_attempts: i32) -> Option<DateTime<Utc>> {
    if attempt_number >= max_attempts {
        return None;
    }

    // Attempt 1 failing schedules retry 1 → index 0 of the schedule.
    let idx = usize::try_from((attempt_number - 1).max(0)).unwrap_or(0);
    let delay_secs = BACKOFF_SCHEDULE_SECS
        .get(idx)
        .copied()
        .unwrap_or(BACKOFF_SCHEDULE_SECS[BACKOFF_SCHEDULE_SECS.len() - 1]);

    Some(Utc::now() + Duration::seconds(delay_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay_of(attempt: i32) -> i64 {
        let next = next_attempt_time(attempt, MAX_ATTEMPTS).unwrap();
        (next - Utc::now()).num_seconds()
    }

    #[test]
    fn test_backoff_schedule_values() {
        assert!((28..=32).contains(&delay_of(1)));
        assert!((118..=122).contains(&delay_of(2)));
        assert!((598..=602).contains(&delay_of(3)));
        assert!((3598..=3602).contains(&delay_of(4)));
        assert!((21_598..=21_602).contains(&delay_of(5)));
    }

    #[test]
    fn test_retries_exhausted() {
        assert!(next_attempt_time(MAX_ATTEMPTS, MAX_ATTEMPTS).is_none());
        assert!(next_attempt_time(MAX_ATTEMPTS + 3, MAX_ATTEMPTS).is_none());
    }

    #[test]
    fn test_schedule_is_monotonic() {
        for window in BACKOFF_SCHEDULE_SECS.windows(2) {
            assert!(window[1] > window[0]);
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = WebhookEnvelope {
            id: Uuid::new_v4(),
            event_type: "connection.created".to_string(),
            timestamp: Utc::now(),
            data: serde_json::json!({"provider": "gmail"}),
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("id").is_some());
        assert_eq!(json["type"], "connection.created");
        assert!(json.get("timestamp").is_some());
        assert_eq!(json["data"]["provider"], "gmail");
    }
}
