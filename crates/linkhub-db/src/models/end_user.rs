//! End-user model: an identity owned by a project.
//!
//! `(project_id, external_id)` is unique; rows are created lazily on the
//! first connection attempt and cascade-deleted with the project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::DbError;

/// An end user whose provider credentials the broker holds.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EndUser {
    pub id: Uuid,
    pub project_id: Uuid,
    /// The project's own identifier for this user.
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EndUser {
    /// Resolve an end user by external id, inserting the row if absent.
    ///
    /// The no-op `DO UPDATE` makes `RETURNING` yield the existing row on
    /// conflict, so concurrent first connections race safely.
    pub async fn find_or_create(
        pool: &PgPool,
        project_id: Uuid,
        external_id: &str,
    ) -> Result<Self, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO end_users (project_id, external_id)
            VALUES ($1, $2)
            ON CONFLICT (project_id, external_id)
                DO UPDATE SET external_id = EXCLUDED.external_id
            RETURNING *
            ",
        )
        .bind(project_id)
        .bind(external_id)
        .fetch_one(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Find an end user by id within a project.
    pub async fn find_by_id(
        pool: &PgPool,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM end_users WHERE id = $1 AND project_id = $2")
            .bind(id)
            .bind(project_id)
            .fetch_optional(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// Find an end user by the project-supplied external id.
    pub async fn find_by_external_id(
        pool: &PgPool,
        project_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM end_users WHERE project_id = $1 AND external_id = $2",
        )
        .bind(project_id)
        .bind(external_id)
        .fetch_optional(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Record the email and display name captured from a provider.
    pub async fn update_profile(
        pool: &PgPool,
        id: Uuid,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE end_users
            SET email = COALESCE($2, email),
                display_name = COALESCE($3, display_name)
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(email)
        .bind(display_name)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }
}
