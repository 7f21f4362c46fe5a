//! Webhook subscription model: a project's event delivery endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::DbError;

/// A project-registered webhook endpoint with health counters.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub project_id: Uuid,
    pub url: String,
    /// Keyring-sealed signing secret.
    #[serde(skip_serializing)]
    pub secret_encrypted: String,
    pub event_types: Vec<String>,
    pub enabled: bool,
    pub consecutive_failures: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<i16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a subscription.
#[derive(Debug, Clone)]
pub struct CreateWebhookSubscription {
    pub project_id: Uuid,
    pub url: String,
    pub secret_encrypted: String,
    pub event_types: Vec<String>,
}

impl WebhookSubscription {
    /// Register a new subscription.
    pub async fn create(pool: &PgPool, input: CreateWebhookSubscription) -> Result<Self, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO webhook_subscriptions (project_id, url, secret_encrypted, event_types)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(input.project_id)
        .bind(&input.url)
        .bind(&input.secret_encrypted)
        .bind(&input.event_types)
        .fetch_one(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// List a project's subscriptions.
    pub async fn list_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Self>, DbError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM webhook_subscriptions WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Find a subscription by id within a project.
    pub async fn find_for_project(
        pool: &PgPool,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM webhook_subscriptions WHERE id = $1 AND project_id = $2",
        )
        .bind(id)
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Find a subscription by id regardless of project (worker path).
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM webhook_subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// All enabled subscriptions of a project that include the event type.
    pub async fn find_enabled_for_event(
        pool: &PgPool,
        project_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<Self>, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE project_id = $1
              AND enabled = true
              AND $2 = ANY(event_types)
            ",
        )
        .bind(project_id)
        .bind(event_type)
        .fetch_all(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Delete a subscription.
    pub async fn delete(pool: &PgPool, project_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1 AND project_id = $2")
                .bind(id)
                .bind(project_id)
                .execute(pool)
                .await
                .map_err(DbError::QueryFailed)?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a delivery attempt outcome on the health counters.
    pub async fn record_trigger(
        pool: &PgPool,
        id: Uuid,
        status_code: Option<i16>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET last_triggered_at = now(), last_status_code = $2, updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status_code)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }

    /// Increment the consecutive-failure counter; returns the new value.
    pub async fn increment_consecutive_failures(pool: &PgPool, id: Uuid) -> Result<i32, DbError> {
        let (failures,): (i32,) = sqlx::query_as(
            r"
            UPDATE webhook_subscriptions
            SET consecutive_failures = consecutive_failures + 1, updated_at = now()
            WHERE id = $1
            RETURNING consecutive_failures
            ",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(DbError::QueryFailed)?;

        Ok(failures)
    }

    /// Reset the consecutive-failure counter after a 2xx.
    pub async fn reset_consecutive_failures(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET consecutive_failures = 0, updated_at = now()
            WHERE id = $1 AND consecutive_failures <> 0
            ",
        )
        .bind(id)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }

    /// Disable a subscription (auto-disable path).
    pub async fn disable(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE webhook_subscriptions SET enabled = false, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }
}
