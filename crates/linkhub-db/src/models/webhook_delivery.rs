//! Webhook delivery model: the persistent backing of the delivery queue.
//!
//! A delivery row is written before the first HTTP attempt, which is what
//! makes the at-least-once contract hold across process restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use crate::DbError;

/// Delivery lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Abandoned,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Abandoned => "abandoned",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// One event emission to one subscription, with its retry bookkeeping.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub project_id: Uuid,
    pub subscription_id: Uuid,
    /// Unique per emission; subscribers deduplicate on this.
    pub event_id: Uuid,
    pub event_type: String,
    /// The signed envelope exactly as POSTed.
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt_number: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_status_code: Option<i16>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for persisting a delivery before the first attempt.
#[derive(Debug, Clone)]
pub struct CreateWebhookDelivery {
    pub project_id: Uuid,
    pub subscription_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl WebhookDelivery {
    /// Persist a delivery row, due immediately.
    pub async fn create(pool: &PgPool, input: CreateWebhookDelivery) -> Result<Self, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO webhook_deliveries (
                project_id, subscription_id, event_id, event_type, payload, next_attempt_at
            )
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING *
            ",
        )
        .bind(input.project_id)
        .bind(input.subscription_id)
        .bind(input.event_id)
        .bind(&input.event_type)
        .bind(&input.payload)
        .fetch_one(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Pending deliveries whose retry time has arrived.
    pub async fn find_due(pool: &PgPool, limit: i64) -> Result<Vec<Self>, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_deliveries
            WHERE status = 'pending' AND next_attempt_at <= now()
            ORDER BY next_attempt_at ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Mark a delivery as successfully delivered.
    pub async fn mark_delivered(
        pool: &PgPool,
        id: Uuid,
        attempt_number: i32,
        status_code: i16,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'delivered',
                attempt_number = $2,
                last_status_code = $3,
                last_error = NULL,
                next_attempt_at = NULL,
                delivered_at = now()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempt_number)
        .bind(status_code)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }

    /// Record a failed attempt; a `None` next attempt abandons the delivery.
    pub async fn mark_failed(
        pool: &PgPool,
        id: Uuid,
        attempt_number: i32,
        error: &str,
        status_code: Option<i16>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), DbError> {
        let status = if next_attempt_at.is_some() {
            "pending"
        } else {
            "abandoned"
        };

        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = $2,
                attempt_number = $3,
                last_error = $4,
                last_status_code = $5,
                next_attempt_at = $6
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status)
        .bind(attempt_number)
        .bind(error)
        .bind(status_code)
        .bind(next_attempt_at)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }

    /// Abandon all pending deliveries of a disabled subscription.
    pub async fn abandon_for_subscription(
        pool: &PgPool,
        subscription_id: Uuid,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'abandoned', next_attempt_at = NULL, last_error = 'Subscription disabled'
            WHERE subscription_id = $1 AND status = 'pending'
            ",
        )
        .bind(subscription_id)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;

        Ok(result.rows_affected())
    }

    /// Parsed status of the row.
    #[must_use]
    pub fn parsed_status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or(DeliveryStatus::Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_round_trip() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Abandoned,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>(), Ok(status));
        }
    }
}
