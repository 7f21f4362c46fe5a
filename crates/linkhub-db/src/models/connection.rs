//! Provider connection model: the long-lived credential record.
//!
//! `(project_id, provider, end_user_id)` is unique; re-authorization upserts
//! into the same row so connection ids stay stable. Token columns hold
//! keyring-sealed ciphertext only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use crate::DbError;

/// Connection lifecycle states.
///
/// ```text
/// pending ──(callback success)──► active ◄──(refresh ok)──┐
///                                   │                     │
///                                   ├─(refresh: expired)─► expired
///                                   ├─(refresh: revoked)─► revoked
///                                   └─(provider 4xx)─────► error
/// active/error/expired ──(user re-connects)──► active
/// any ──(developer deletes)──► revoked
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Expired,
    Revoked,
    Error,
}

impl ConnectionStatus {
    /// The stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Error => "error",
        }
    }

    /// Terminal statuses fail dispatches fast, without a provider call.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Revoked)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown connection status: {other}")),
        }
    }
}

/// A persisted end-user authorization at a provider.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub project_id: Uuid,
    pub provider: String,
    pub end_user_id: Uuid,
    /// Provider-side user id; opaque to the broker.
    pub provider_user_id: Option<String>,
    pub provider_email: Option<String>,
    #[serde(skip_serializing)]
    pub access_token_encrypted: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token_encrypted: Option<String>,
    pub token_type: String,
    /// `None` means the token does not expire (bearer-only providers).
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for the authorize-time upsert.
#[derive(Debug, Clone)]
pub struct UpsertConnection {
    pub project_id: Uuid,
    pub provider: String,
    pub end_user_id: Uuid,
    pub provider_user_id: Option<String>,
    pub provider_email: Option<String>,
    pub access_token_encrypted: String,
    pub refresh_token_encrypted: Option<String>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

/// Listing filters for `GET /connections`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFilter {
    pub end_user_id: Option<Uuid>,
    pub provider: Option<String>,
    pub status: Option<ConnectionStatus>,
}

impl Connection {
    /// Parsed lifecycle status of the row.
    #[must_use]
    pub fn parsed_status(&self) -> ConnectionStatus {
        // Rows only ever hold values written through ConnectionStatus; an
        // unknown value is treated as Error rather than panicking.
        self.status.parse().unwrap_or(ConnectionStatus::Error)
    }

    /// Upsert an authorized connection after a successful callback.
    ///
    /// On re-connection the existing row is refreshed in place: status
    /// returns to `active`, the error message clears, and a missing rotated
    /// refresh token falls back to the previously stored one.
    pub async fn upsert_authorized(
        pool: &PgPool,
        input: UpsertConnection,
    ) -> Result<Self, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO connections (
                project_id, provider, end_user_id, provider_user_id, provider_email,
                access_token_encrypted, refresh_token_encrypted, token_type,
                expires_at, scopes, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'active')
            ON CONFLICT (project_id, provider, end_user_id) DO UPDATE SET
                provider_user_id = COALESCE(EXCLUDED.provider_user_id, connections.provider_user_id),
                provider_email = COALESCE(EXCLUDED.provider_email, connections.provider_email),
                access_token_encrypted = EXCLUDED.access_token_encrypted,
                refresh_token_encrypted = COALESCE(EXCLUDED.refresh_token_encrypted, connections.refresh_token_encrypted),
                token_type = EXCLUDED.token_type,
                expires_at = EXCLUDED.expires_at,
                scopes = EXCLUDED.scopes,
                status = 'active',
                error_message = NULL,
                updated_at = now()
            RETURNING *
            ",
        )
        .bind(input.project_id)
        .bind(&input.provider)
        .bind(input.end_user_id)
        .bind(&input.provider_user_id)
        .bind(&input.provider_email)
        .bind(&input.access_token_encrypted)
        .bind(&input.refresh_token_encrypted)
        .bind(&input.token_type)
        .bind(input.expires_at)
        .bind(&input.scopes)
        .fetch_one(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Find a connection by id.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM connections WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// Find a connection by id, scoped to the requesting project.
    pub async fn find_for_project(
        pool: &PgPool,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM connections WHERE id = $1 AND project_id = $2")
            .bind(id)
            .bind(project_id)
            .fetch_optional(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// Re-read a row inside an open transaction (used after acquiring the
    /// refresh advisory lock, to observe a refresh another process finished).
    pub async fn find_by_id_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM connections WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// List a project's connections with optional filters.
    pub async fn list_for_project(
        pool: &PgPool,
        project_id: Uuid,
        filter: &ConnectionFilter,
    ) -> Result<Vec<Self>, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM connections
            WHERE project_id = $1
              AND ($2::uuid IS NULL OR end_user_id = $2)
              AND ($3::text IS NULL OR provider = $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC
            ",
        )
        .bind(project_id)
        .bind(filter.end_user_id)
        .bind(&filter.provider)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Write refreshed tokens inside the refresh transaction.
    pub async fn store_refreshed_tokens_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        access_token_encrypted: &str,
        refresh_token_encrypted: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE connections
            SET access_token_encrypted = $2,
                refresh_token_encrypted = COALESCE($3, refresh_token_encrypted),
                expires_at = $4,
                status = 'active',
                error_message = NULL,
                updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(access_token_encrypted)
        .bind(refresh_token_encrypted)
        .bind(expires_at)
        .execute(&mut **tx)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }

    /// Transition a connection to a new status, optionally recording an error.
    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: ConnectionStatus,
        error_message: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE connections
            SET status = $2, error_message = $3, updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(())
    }

    /// Revoke a connection and clear its stored tokens.
    pub async fn revoke(pool: &PgPool, project_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"
            UPDATE connections
            SET status = 'revoked',
                access_token_encrypted = NULL,
                refresh_token_encrypted = NULL,
                updated_at = now()
            WHERE id = $1 AND project_id = $2
            ",
        )
        .bind(id)
        .bind(project_id)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;

        Ok(result.rows_affected() > 0)
    }

    /// Update the `last_used_at` timestamp.
    pub async fn touch_last_used(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE connections SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ConnectionStatus::Pending,
            ConnectionStatus::Active,
            ConnectionStatus::Expired,
            ConnectionStatus::Revoked,
            ConnectionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ConnectionStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ConnectionStatus::Expired.is_terminal());
        assert!(ConnectionStatus::Revoked.is_terminal());
        assert!(!ConnectionStatus::Active.is_terminal());
        assert!(!ConnectionStatus::Error.is_terminal());
        assert!(!ConnectionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_unknown_status_parses_as_error() {
        let row = Connection {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            provider: "gmail".to_string(),
            end_user_id: Uuid::new_v4(),
            provider_user_id: None,
            provider_email: None,
            access_token_encrypted: None,
            refresh_token_encrypted: None,
            token_type: "Bearer".to_string(),
            expires_at: None,
            scopes: vec![],
            status: "garbled".to_string(),
            error_message: None,
            last_used_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(row.parsed_status(), ConnectionStatus::Error);
    }
}
