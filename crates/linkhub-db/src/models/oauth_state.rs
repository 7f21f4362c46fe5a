//! OAuth state model: a single-use authorization-in-progress record.
//!
//! A state token may be consumed at most once. Consumption is a conditional
//! update on `used_at IS NULL AND expires_at > now()`; the affected-row count
//! is the authoritative single-use guard under concurrent callbacks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::DbError;

/// State row lifetime.
pub const STATE_LIFETIME_MINUTES: i64 = 10;

/// A pending authorization bound to its eventual callback.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OAuthState {
    pub id: Uuid,
    /// Opaque random token carried through the provider round-trip.
    pub state_token: String,
    pub project_id: Uuid,
    pub provider: String,
    pub end_user_id: Uuid,
    /// Where the end user is returned after the flow completes.
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub pkce_verifier: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for persisting a new state row.
#[derive(Debug, Clone)]
pub struct CreateOAuthState {
    pub state_token: String,
    pub project_id: Uuid,
    pub provider: String,
    pub end_user_id: Uuid,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub pkce_verifier: String,
}

impl OAuthState {
    /// Persist a new state row with the standard 10-minute expiry.
    pub async fn create(pool: &PgPool, input: CreateOAuthState) -> Result<Self, DbError> {
        let expires_at = Utc::now() + Duration::minutes(STATE_LIFETIME_MINUTES);

        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO oauth_states (
                state_token, project_id, provider, end_user_id,
                redirect_uri, scopes, pkce_verifier, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            ",
        )
        .bind(&input.state_token)
        .bind(input.project_id)
        .bind(&input.provider)
        .bind(input.end_user_id)
        .bind(&input.redirect_uri)
        .bind(&input.scopes)
        .bind(&input.pkce_verifier)
        .bind(expires_at)
        .fetch_one(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Load a state row by token without touching it (for diagnostics).
    pub async fn find_by_token(pool: &PgPool, state_token: &str) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM oauth_states WHERE state_token = $1")
            .bind(state_token)
            .fetch_optional(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// Atomically consume a state token.
    ///
    /// Returns the row when this caller won the race; `None` when the token
    /// is absent, already consumed, or expired. Under N concurrent callbacks
    /// with the same token exactly one caller receives the row.
    pub async fn consume(pool: &PgPool, state_token: &str) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            UPDATE oauth_states
            SET used_at = now()
            WHERE state_token = $1
              AND used_at IS NULL
              AND expires_at > now()
            RETURNING *
            ",
        )
        .bind(state_token)
        .fetch_optional(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Delete expired, never-consumed rows older than the cutoff.
    ///
    /// Consumed rows are retained for audit.
    pub async fn sweep_expired(pool: &PgPool, older_than_hours: i64) -> Result<u64, DbError> {
        let cutoff = Utc::now() - Duration::hours(older_than_hours);

        let result = sqlx::query(
            r"
            DELETE FROM oauth_states
            WHERE used_at IS NULL
              AND expires_at < $1
            ",
        )
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;

        Ok(result.rows_affected())
    }

    /// Whether the row is still consumable.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.used_at.is_none() && self.expires_at > Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_row(used_at: Option<DateTime<Utc>>, expires_at: DateTime<Utc>) -> OAuthState {
        OAuthState {
            id: Uuid::new_v4(),
            state_token: "tok".to_string(),
            project_id: Uuid::new_v4(),
            provider: "gmail".to_string(),
            end_user_id: Uuid::new_v4(),
            redirect_uri: "https://app.example.com/done".to_string(),
            scopes: vec![],
            pkce_verifier: "v".to_string(),
            expires_at,
            used_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_live_fresh_row() {
        let row = state_row(None, Utc::now() + Duration::minutes(5));
        assert!(row.is_live());
    }

    #[test]
    fn test_is_live_consumed_row() {
        let row = state_row(Some(Utc::now()), Utc::now() + Duration::minutes(5));
        assert!(!row.is_live());
    }

    #[test]
    fn test_is_live_expired_row() {
        let row = state_row(None, Utc::now() - Duration::seconds(1));
        assert!(!row.is_live());
    }
}
