//! API log model: append-only per-request observability records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::DbError;

/// One logged project API call.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiLog {
    pub id: Uuid,
    pub project_id: Uuid,
    pub provider: Option<String>,
    pub connection_id: Option<Uuid>,
    pub endpoint: String,
    pub method: String,
    pub status_code: i16,
    pub latency_ms: i32,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a log row.
#[derive(Debug, Clone)]
pub struct CreateApiLog {
    pub project_id: Uuid,
    pub provider: Option<String>,
    pub connection_id: Option<Uuid>,
    pub endpoint: String,
    pub method: String,
    pub status_code: i16,
    pub latency_ms: i32,
}

impl ApiLog {
    /// Append a log row. The table is append-only; there is no update path.
    pub async fn create(pool: &PgPool, input: CreateApiLog) -> Result<(), DbError> {
        sqlx::query(
            r"
            INSERT INTO api_logs (
                project_id, provider, connection_id, endpoint, method, status_code, latency_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(input.project_id)
        .bind(&input.provider)
        .bind(input.connection_id)
        .bind(&input.endpoint)
        .bind(&input.method)
        .bind(input.status_code)
        .bind(input.latency_ms)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }

    /// Recent log rows for a project (dashboard support queries).
    pub async fn list_recent(
        pool: &PgPool,
        project_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM api_logs
            WHERE project_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(DbError::QueryFailed)
    }
}
