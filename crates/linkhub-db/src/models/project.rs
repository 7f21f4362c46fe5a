//! Project model: a platform customer's integration tenant.
//!
//! Projects are created and destroyed by the dashboard; the broker core only
//! reads them (and their settings map).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::DbError;

/// A tenant of the broker.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    /// Environment tag: `test` or `live`.
    pub environment: String,
    /// Free-form settings map (rate-limit overrides live here).
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Find a project by id.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, DbError> {
        sqlx::query_as::<_, Self>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(DbError::QueryFailed)
    }

    /// Per-minute rate-limit override from the settings map, if any.
    #[must_use]
    pub fn rate_limit_per_minute(&self) -> Option<u32> {
        self.settings
            .get("rate_limit_per_minute")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Per-day rate-limit override from the settings map, if any.
    #[must_use]
    pub fn rate_limit_per_day(&self) -> Option<u32> {
        self.settings
            .get("rate_limit_per_day")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_settings(settings: serde_json::Value) -> Project {
        Project {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Acme".to_string(),
            environment: "test".to_string(),
            settings,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_rate_limit_overrides_read_from_settings() {
        let project = project_with_settings(serde_json::json!({
            "rate_limit_per_minute": 120,
            "rate_limit_per_day": 50000,
        }));

        assert_eq!(project.rate_limit_per_minute(), Some(120));
        assert_eq!(project.rate_limit_per_day(), Some(50_000));
    }

    #[test]
    fn test_missing_overrides_are_none() {
        let project = project_with_settings(serde_json::json!({}));
        assert_eq!(project.rate_limit_per_minute(), None);
        assert_eq!(project.rate_limit_per_day(), None);
    }

    #[test]
    fn test_non_numeric_override_ignored() {
        let project =
            project_with_settings(serde_json::json!({ "rate_limit_per_minute": "lots" }));
        assert_eq!(project.rate_limit_per_minute(), None);
    }
}
