//! API-key model: the credential pair a project signs requests with.
//!
//! The public key is an opaque `pk_{env}_<24 base64url chars>` string. The
//! secret is stored encrypted (not hashed) because signature verification
//! recomputes the secret-side HMAC on each request.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::DbError;

/// Key status values.
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_REVOKED: &str = "revoked";

/// Random bytes behind the 24-char base64url suffix of a public key.
const PUBLIC_KEY_RANDOM_BYTES: usize = 18;

/// An API key pair scoped to a project and environment.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Opaque public identifier, e.g. `pk_test_h5Xk…` (globally unique).
    pub public_key: String,
    /// Keyring-sealed secret; never serialized outward.
    #[serde(skip_serializing)]
    pub secret_encrypted: String,
    pub environment: String,
    pub status: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Data required to create a new API key.
#[derive(Debug, Clone)]
pub struct CreateApiKey {
    pub project_id: Uuid,
    pub public_key: String,
    pub secret_encrypted: String,
    pub environment: String,
}

impl ApiKey {
    /// Whether the key may authenticate requests.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Generate a public key string for the given environment.
    #[must_use]
    pub fn generate_public_key(environment: &str) -> String {
        let mut random = [0u8; PUBLIC_KEY_RANDOM_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut random);
        format!("pk_{environment}_{}", URL_SAFE_NO_PAD.encode(random))
    }

    /// Create a new API key.
    pub async fn create(pool: &PgPool, data: CreateApiKey) -> Result<Self, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO api_keys (project_id, public_key, secret_encrypted, environment)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(data.project_id)
        .bind(&data.public_key)
        .bind(&data.secret_encrypted)
        .bind(&data.environment)
        .fetch_one(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Resolve a public key to its record, regardless of status.
    ///
    /// The authenticator distinguishes "unknown" from "revoked" itself so
    /// both collapse to the same error code for callers.
    pub async fn find_by_public_key(
        pool: &PgPool,
        public_key: &str,
    ) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM api_keys WHERE public_key = $1")
            .bind(public_key)
            .fetch_optional(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// Update the `last_used_at` timestamp.
    pub async fn touch_last_used(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(())
    }

    /// Revoke an API key.
    pub async fn revoke(pool: &PgPool, project_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE api_keys SET status = 'revoked' WHERE id = $1 AND project_id = $2",
        )
        .bind(id)
        .bind(project_id)
        .execute(pool)
        .await
        .map_err(DbError::QueryFailed)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_public_key_shape() {
        let key = ApiKey::generate_public_key("test");
        assert!(key.starts_with("pk_test_"));

        let suffix = key.strip_prefix("pk_test_").unwrap();
        assert_eq!(suffix.len(), 24);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generated_public_keys_differ() {
        assert_ne!(
            ApiKey::generate_public_key("live"),
            ApiKey::generate_public_key("live")
        );
    }

    #[test]
    fn test_is_active() {
        let mut key = ApiKey {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            public_key: "pk_test_AAAA".to_string(),
            secret_encrypted: "sealed".to_string(),
            environment: "test".to_string(),
            status: STATUS_ACTIVE.to_string(),
            last_used_at: None,
            created_at: Utc::now(),
        };
        assert!(key.is_active());

        key.status = STATUS_REVOKED.to_string();
        assert!(!key.is_active());
    }
}
