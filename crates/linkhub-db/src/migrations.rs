//! Embedded schema migrations.

use crate::error::DbError;
use sqlx::PgPool;

/// Run all pending migrations from the crate's `migrations/` directory.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(DbError::MigrationFailed)
}
