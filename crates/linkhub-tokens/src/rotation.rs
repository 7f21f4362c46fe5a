//! Master-key rotation: batch re-encryption of stored secrets.
//!
//! After the keyring gains a new current version, this routine walks every
//! secret-valued column and re-seals values still on an old version. Readers
//! tolerate both versions throughout, so the migration can run while the
//! service serves traffic.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use linkhub_core::{BrokerError, Result};
use linkhub_crypto::KeyRing;

/// Counts of re-encrypted values per table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationReport {
    pub connections: u64,
    pub api_keys: u64,
    pub providers: u64,
    pub webhook_subscriptions: u64,
}

impl RotationReport {
    /// Total re-encrypted values.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.connections + self.api_keys + self.providers + self.webhook_subscriptions
    }
}

/// Whether a sealed value needs re-encryption under the current version.
fn needs_rotation(keyring: &KeyRing, sealed: &str) -> bool {
    KeyRing::stored_version(sealed).is_ok_and(|v| v != keyring.current_version())
}

/// Re-encrypt all secret-valued columns in batches.
pub async fn reencrypt_secrets(
    pool: &PgPool,
    keyring: &Arc<KeyRing>,
    batch_size: i64,
) -> Result<RotationReport> {
    let mut report = RotationReport::default();

    report.connections = rotate_connection_tokens(pool, keyring, batch_size).await?;
    report.api_keys =
        rotate_single_column(pool, keyring, batch_size, "api_keys", "secret_encrypted").await?;
    report.providers = rotate_single_column(
        pool,
        keyring,
        batch_size,
        "providers",
        "client_secret_encrypted",
    )
    .await?;
    report.webhook_subscriptions = rotate_single_column(
        pool,
        keyring,
        batch_size,
        "webhook_subscriptions",
        "secret_encrypted",
    )
    .await?;

    tracing::info!(
        target: "key_rotation",
        connections = report.connections,
        api_keys = report.api_keys,
        providers = report.providers,
        webhook_subscriptions = report.webhook_subscriptions,
        "Key rotation sweep complete"
    );

    Ok(report)
}

/// Rotate the two token columns of the connections table.
async fn rotate_connection_tokens(
    pool: &PgPool,
    keyring: &Arc<KeyRing>,
    batch_size: i64,
) -> Result<u64> {
    let mut rotated = 0u64;
    let mut cursor = Uuid::nil();

    loop {
        let rows: Vec<(Uuid, Option<String>, Option<String>)> = sqlx::query_as(
            r"
            SELECT id, access_token_encrypted, refresh_token_encrypted
            FROM connections
            WHERE id > $1
              AND (access_token_encrypted IS NOT NULL OR refresh_token_encrypted IS NOT NULL)
            ORDER BY id
            LIMIT $2
            ",
        )
        .bind(cursor)
        .bind(batch_size)
        .fetch_all(pool)
        .await
        .map_err(|e| BrokerError::internal(e.to_string()))?;

        if rows.is_empty() {
            break;
        }

        for (id, access, refresh) in &rows {
            cursor = *id;

            let new_access = reseal_if_stale(keyring, access.as_deref())?;
            let new_refresh = reseal_if_stale(keyring, refresh.as_deref())?;
            if new_access.is_none() && new_refresh.is_none() {
                continue;
            }

            sqlx::query(
                r"
                UPDATE connections
                SET access_token_encrypted = COALESCE($2, access_token_encrypted),
                    refresh_token_encrypted = COALESCE($3, refresh_token_encrypted)
                WHERE id = $1
                ",
            )
            .bind(id)
            .bind(&new_access)
            .bind(&new_refresh)
            .execute(pool)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?;

            rotated += 1;
        }
    }

    Ok(rotated)
}

/// Rotate one sealed column of a table keyed by `id UUID`.
async fn rotate_single_column(
    pool: &PgPool,
    keyring: &Arc<KeyRing>,
    batch_size: i64,
    table: &str,
    column: &str,
) -> Result<u64> {
    let mut rotated = 0u64;
    let mut cursor = Uuid::nil();

    loop {
        let select =
            format!("SELECT id, {column} FROM {table} WHERE id > $1 ORDER BY id LIMIT $2");
        let rows: Vec<(Uuid, String)> = sqlx::query_as(&select)
            .bind(cursor)
            .bind(batch_size)
            .fetch_all(pool)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?;

        if rows.is_empty() {
            break;
        }

        for (id, sealed) in &rows {
            cursor = *id;

            let Some(resealed) = reseal_if_stale(keyring, Some(sealed))? else {
                continue;
            };

            let update = format!("UPDATE {table} SET {column} = $2 WHERE id = $1");
            sqlx::query(&update)
                .bind(id)
                .bind(&resealed)
                .execute(pool)
                .await
                .map_err(|e| BrokerError::internal(e.to_string()))?;

            rotated += 1;
        }
    }

    Ok(rotated)
}

/// Re-seal a value when it is on an old key version; `None` when current.
fn reseal_if_stale(keyring: &KeyRing, sealed: Option<&str>) -> Result<Option<String>> {
    match sealed {
        Some(sealed) if needs_rotation(keyring, sealed) => keyring
            .reencrypt(sealed)
            .map(Some)
            .map_err(|e| BrokerError::internal(format!("re-encryption failed: {e}"))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_hex(byte: u8) -> String {
        [byte; 32].iter().map(|b| format!("{b:02x}")).collect()
    }

    fn two_version_ring() -> (KeyRing, KeyRing) {
        let v1 = key_hex(0x01);
        let v2 = key_hex(0x02);
        let old = KeyRing::from_versions(1, &[(1, v1.clone())]).unwrap();
        let rotated = KeyRing::from_versions(2, &[(1, v1), (2, v2)]).unwrap();
        (old, rotated)
    }

    #[test]
    fn test_needs_rotation_detects_old_version() {
        let (old, rotated) = two_version_ring();
        let sealed_v1 = old.encrypt(b"secret").unwrap();

        assert!(needs_rotation(&rotated, &sealed_v1));
        let sealed_v2 = rotated.encrypt(b"secret").unwrap();
        assert!(!needs_rotation(&rotated, &sealed_v2));
    }

    #[test]
    fn test_reseal_if_stale_rewrites_old_values() {
        let (old, rotated) = two_version_ring();
        let sealed_v1 = old.encrypt(b"secret").unwrap();

        let resealed = reseal_if_stale(&rotated, Some(&sealed_v1)).unwrap().unwrap();
        assert_eq!(KeyRing::stored_version(&resealed).unwrap(), 2);
        assert_eq!(rotated.decrypt(&resealed).unwrap(), b"secret");
    }

    #[test]
    fn test_reseal_if_stale_skips_current_and_null() {
        let (_, rotated) = two_version_ring();
        let sealed_v2 = rotated.encrypt(b"secret").unwrap();

        assert!(reseal_if_stale(&rotated, Some(&sealed_v2)).unwrap().is_none());
        assert!(reseal_if_stale(&rotated, None).unwrap().is_none());
    }
}
