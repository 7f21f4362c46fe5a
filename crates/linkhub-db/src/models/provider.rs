//! Provider descriptor model: static configuration for a third-party service.
//!
//! Descriptor rows are inserted by seeding at startup and rarely mutated.
//! The client secret is keyring-sealed at rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::DbError;

/// Static configuration for a provider integration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: Uuid,
    /// Canonical name, e.g. `gmail`.
    pub name: String,
    pub display_name: String,
    /// Category: `mail`, `calendar`, `documents`, `issues`.
    pub category: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub permitted_scopes: Vec<String>,
    pub default_scopes: Vec<String>,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret_encrypted: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Seeding input for a provider descriptor.
#[derive(Debug, Clone)]
pub struct SeedProvider {
    pub name: String,
    pub display_name: String,
    pub category: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub permitted_scopes: Vec<String>,
    pub default_scopes: Vec<String>,
    pub client_id: String,
    pub client_secret_encrypted: String,
}

impl ProviderDescriptor {
    /// Find an enabled provider by canonical name.
    pub async fn find_enabled_by_name(
        pool: &PgPool,
        name: &str,
    ) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM providers WHERE name = $1 AND enabled = true")
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// List all enabled providers.
    pub async fn list_enabled(pool: &PgPool) -> Result<Vec<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM providers WHERE enabled = true ORDER BY name")
            .fetch_all(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// Insert or refresh a descriptor from seed data.
    ///
    /// Credentials and endpoints are updated in place; the enabled flag is
    /// left as the operator set it.
    pub async fn seed(pool: &PgPool, data: SeedProvider) -> Result<Self, DbError> {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO providers (
                name, display_name, category, authorization_endpoint, token_endpoint,
                permitted_scopes, default_scopes, client_id, client_secret_encrypted
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (name) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                category = EXCLUDED.category,
                authorization_endpoint = EXCLUDED.authorization_endpoint,
                token_endpoint = EXCLUDED.token_endpoint,
                permitted_scopes = EXCLUDED.permitted_scopes,
                default_scopes = EXCLUDED.default_scopes,
                client_id = EXCLUDED.client_id,
                client_secret_encrypted = EXCLUDED.client_secret_encrypted,
                updated_at = now()
            RETURNING *
            ",
        )
        .bind(&data.name)
        .bind(&data.display_name)
        .bind(&data.category)
        .bind(&data.authorization_endpoint)
        .bind(&data.token_endpoint)
        .bind(&data.permitted_scopes)
        .bind(&data.default_scopes)
        .bind(&data.client_id)
        .bind(&data.client_secret_encrypted)
        .fetch_one(pool)
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Scopes to request: the union of defaults and the permitted subset of
    /// the caller's request.
    #[must_use]
    pub fn scope_union(&self, requested: &[String]) -> Vec<String> {
        let mut scopes = self.default_scopes.clone();
        for scope in requested {
            if self.permitted_scopes.contains(scope) && !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        scopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            id: Uuid::new_v4(),
            name: "gmail".to_string(),
            display_name: "Gmail".to_string(),
            category: "mail".to_string(),
            authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            permitted_scopes: vec![
                "email.read".to_string(),
                "email.send".to_string(),
                "email.modify".to_string(),
            ],
            default_scopes: vec!["email.read".to_string()],
            client_id: "client".to_string(),
            client_secret_encrypted: "sealed".to_string(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_scope_union_adds_permitted_requests() {
        let scopes = descriptor().scope_union(&["email.send".to_string()]);
        assert_eq!(scopes, vec!["email.read", "email.send"]);
    }

    #[test]
    fn test_scope_union_drops_unpermitted() {
        let scopes = descriptor().scope_union(&["drive.write".to_string()]);
        assert_eq!(scopes, vec!["email.read"]);
    }

    #[test]
    fn test_scope_union_deduplicates() {
        let scopes = descriptor().scope_union(&[
            "email.read".to_string(),
            "email.send".to_string(),
            "email.send".to_string(),
        ]);
        assert_eq!(scopes, vec!["email.read", "email.send"]);
    }
}
