//! The token manager: freshness, refresh, and the connection state machine.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use linkhub_core::{BrokerError, ConnectionId, Result};
use linkhub_crypto::KeyRing;
use linkhub_db::models::{Connection, ConnectionStatus, EndUser};
use linkhub_providers::{AdapterRegistry, ProviderFault, TokenGrant};
use linkhub_webhooks::{EventPublisher, EventType, LifecycleEvent};

use crate::singleflight::KeyedMutex;

/// Tokens expiring within this window are refreshed eagerly.
pub const FRESHNESS_SKEW_SECONDS: i64 = 60;

/// A decrypted access token together with its connection snapshot.
#[derive(Debug, Clone)]
pub struct ValidAccessToken {
    pub connection: Connection,
    pub access_token: String,
}

/// Owns token freshness and the refresh path for all connections.
///
/// Clones share the single-flight map, so one instance should be built at
/// startup and cloned into handlers.
#[derive(Clone)]
pub struct TokenManager {
    pool: PgPool,
    keyring: Arc<KeyRing>,
    registry: Arc<AdapterRegistry>,
    events: EventPublisher,
    flights: Arc<KeyedMutex<Uuid>>,
}

impl TokenManager {
    /// Create a new token manager.
    pub fn new(
        pool: PgPool,
        keyring: Arc<KeyRing>,
        registry: Arc<AdapterRegistry>,
        events: EventPublisher,
    ) -> Self {
        Self {
            pool,
            keyring,
            registry,
            events,
            flights: Arc::new(KeyedMutex::new()),
        }
    }

    /// Return a valid access token for the connection, refreshing if needed.
    ///
    /// Terminal statuses fail fast without a provider round-trip. Concurrent
    /// callers for the same connection observe a single refresh; callers that
    /// lose the race are handed the winner's token.
    pub async fn get_valid_access_token(&self, connection_id: Uuid) -> Result<ValidAccessToken> {
        let connection = Connection::find_by_id(&self.pool, connection_id)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?
            .ok_or(BrokerError::ConnectionNotFound)?;

        self.check_usable(&connection)?;

        if is_fresh(&connection) {
            return Ok(ValidAccessToken {
                access_token: self.decrypt_access_token(&connection)?,
                connection,
            });
        }

        self.refresh_with_single_flight(connection).await
    }

    /// Reject terminal or not-yet-authorized connections.
    fn check_usable(&self, connection: &Connection) -> Result<()> {
        match connection.parsed_status() {
            ConnectionStatus::Revoked => Err(BrokerError::ConnectionRevoked),
            ConnectionStatus::Expired => Err(BrokerError::ConnectionExpired),
            ConnectionStatus::Pending => Err(BrokerError::validation(
                "connection is pending authorization",
            )),
            ConnectionStatus::Active | ConnectionStatus::Error => Ok(()),
        }
    }

    fn decrypt_access_token(&self, connection: &Connection) -> Result<String> {
        let sealed = connection
            .access_token_encrypted
            .as_deref()
            .ok_or_else(|| BrokerError::internal("active connection has no access token"))?;
        self.keyring
            .decrypt_str(sealed)
            .map_err(|e| BrokerError::internal(format!("token decryption failed: {e}")))
    }

    /// The refresh path behind the process-local single-flight mutex.
    ///
    /// The release must run on every path, including errors, or the map
    /// entry leaks; all fallible work therefore lives in `refresh_admitted`.
    async fn refresh_with_single_flight(
        &self,
        connection: Connection,
    ) -> Result<ValidAccessToken> {
        let connection_id = connection.id;
        let lock = self.flights.acquire(connection_id);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_admitted(connection_id).await
        };
        self.flights.release(&connection_id);
        result
    }

    /// Work done while holding the single-flight mutex.
    async fn refresh_admitted(&self, connection_id: Uuid) -> Result<ValidAccessToken> {
        // Re-read after being admitted: the leader may have finished.
        let current = Connection::find_by_id(&self.pool, connection_id)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?
            .ok_or(BrokerError::ConnectionNotFound)?;
        self.check_usable(&current)?;

        if is_fresh(&current) {
            return Ok(ValidAccessToken {
                access_token: self.decrypt_access_token(&current)?,
                connection: current,
            });
        }

        self.refresh_locked(current).await
    }

    /// Perform the provider refresh under the cross-process advisory lock.
    async fn refresh_locked(&self, connection: Connection) -> Result<ValidAccessToken> {
        let connection_id = connection.id;

        let Some(sealed_refresh) = connection.refresh_token_encrypted.as_deref() else {
            // No refresh token and the access token has aged out: the
            // connection is terminally expired until the user re-connects.
            self.record_terminal(
                &connection,
                ConnectionStatus::Expired,
                None,
                EventType::ConnectionExpired,
            )
            .await;
            return Err(BrokerError::ConnectionExpired);
        };
        let refresh_token = self
            .keyring
            .decrypt_str(sealed_refresh)
            .map_err(|e| BrokerError::internal(format!("token decryption failed: {e}")))?;

        let adapter = self
            .registry
            .get(&connection.provider)
            .ok_or_else(|| {
                BrokerError::internal(format!("no adapter registered: {}", connection.provider))
            })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?;

        // Cross-process exclusion: the transaction-scoped advisory lock is
        // held for the duration of the provider round-trip and token write.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_key(&connection_id))
            .execute(&mut *tx)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?;

        // Another process may have refreshed while this one waited.
        let current = Connection::find_by_id_in_tx(&mut tx, connection_id)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?
            .ok_or(BrokerError::ConnectionNotFound)?;
        self.check_usable(&current)?;
        if is_fresh(&current) {
            let token = self.decrypt_access_token(&current)?;
            tx.commit()
                .await
                .map_err(|e| BrokerError::internal(e.to_string()))?;
            return Ok(ValidAccessToken {
                access_token: token,
                connection: current,
            });
        }

        tracing::info!(
            target: "token_manager",
            connection_id = %ConnectionId::from_uuid(connection_id),
            provider = %connection.provider,
            "Refreshing access token"
        );

        match adapter.refresh(&refresh_token).await {
            Ok(grant) => {
                let stored = self.store_grant(&mut tx, &current, &grant).await?;
                tx.commit()
                    .await
                    .map_err(|e| BrokerError::internal(e.to_string()))?;
                Ok(stored)
            }
            Err(error) => {
                // Nothing was written; drop the transaction and record the
                // classified outcome outside it.
                drop(tx);
                Err(self.record_refresh_failure(&current, error).await)
            }
        }
    }

    /// Encrypt and persist a successful grant inside the refresh transaction.
    async fn store_grant(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        connection: &Connection,
        grant: &TokenGrant,
    ) -> Result<ValidAccessToken> {
        let access_sealed = self
            .keyring
            .encrypt_str(&grant.access_token)
            .map_err(|e| BrokerError::internal(format!("token encryption failed: {e}")))?;

        // Providers that rotate refresh tokens send a new one; otherwise the
        // stored token is retained (COALESCE in the update).
        let refresh_sealed = match grant.refresh_token.as_deref() {
            Some(token) => Some(
                self.keyring
                    .encrypt_str(token)
                    .map_err(|e| BrokerError::internal(format!("token encryption failed: {e}")))?,
            ),
            None => None,
        };

        let expires_at = grant
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));

        Connection::store_refreshed_tokens_in_tx(
            tx,
            connection.id,
            &access_sealed,
            refresh_sealed.as_deref(),
            expires_at,
        )
        .await
        .map_err(|e| BrokerError::internal(e.to_string()))?;

        let mut refreshed = connection.clone();
        refreshed.status = ConnectionStatus::Active.as_str().to_string();
        refreshed.error_message = None;
        refreshed.expires_at = expires_at;
        refreshed.access_token_encrypted = Some(access_sealed);
        if refresh_sealed.is_some() {
            refreshed.refresh_token_encrypted = refresh_sealed;
        }

        Ok(ValidAccessToken {
            access_token: grant.access_token.clone(),
            connection: refreshed,
        })
    }

    /// Classify a refresh failure, transition the state machine, and emit the
    /// matching lifecycle event.
    async fn record_refresh_failure(
        &self,
        connection: &Connection,
        error: linkhub_providers::AdapterError,
    ) -> BrokerError {
        let fault = error.fault();
        tracing::warn!(
            target: "token_manager",
            connection_id = %ConnectionId::from_uuid(connection.id),
            provider = %connection.provider,
            fault = ?fault,
            error = %error,
            "Token refresh failed"
        );

        match fault {
            ProviderFault::GrantRevoked => {
                self.record_terminal(
                    connection,
                    ConnectionStatus::Revoked,
                    None,
                    EventType::ConnectionRevoked,
                )
                .await;
                BrokerError::ConnectionRevoked
            }
            ProviderFault::GrantExpired => {
                self.record_terminal(
                    connection,
                    ConnectionStatus::Expired,
                    None,
                    EventType::ConnectionExpired,
                )
                .await;
                BrokerError::ConnectionExpired
            }
            ProviderFault::Transient => BrokerError::Provider {
                message: error.to_string(),
                retryable: true,
            },
            ProviderFault::Rejected => {
                let message = error.to_string();
                self.record_terminal(
                    connection,
                    ConnectionStatus::Error,
                    Some(&message),
                    EventType::ConnectionError,
                )
                .await;
                BrokerError::Provider {
                    message,
                    retryable: false,
                }
            }
        }
    }

    /// Persist a status transition and publish its lifecycle event.
    async fn record_terminal(
        &self,
        connection: &Connection,
        status: ConnectionStatus,
        error_message: Option<&str>,
        event_type: EventType,
    ) {
        if let Err(e) =
            Connection::set_status(&self.pool, connection.id, status, error_message).await
        {
            tracing::error!(
                target: "token_manager",
                connection_id = %ConnectionId::from_uuid(connection.id),
                error = %e,
                "Failed to persist connection status transition"
            );
        }

        let data = self.lifecycle_data(connection).await;
        self.events.publish(LifecycleEvent::new(
            event_type,
            connection.project_id,
            data,
        ));
    }

    /// Event payload: connection id, provider, user id, scopes.
    async fn lifecycle_data(&self, connection: &Connection) -> serde_json::Value {
        let external_id =
            EndUser::find_by_id(&self.pool, connection.project_id, connection.end_user_id)
                .await
                .ok()
                .flatten()
                .map(|user| user.external_id);

        json!({
            "connectionId": ConnectionId::from_uuid(connection.id).to_string(),
            "provider": connection.provider,
            "userId": external_id,
            "scopes": connection.scopes,
        })
    }
}

/// Whether the stored access token is still usable, with the skew buffer.
fn is_fresh(connection: &Connection) -> bool {
    match connection.expires_at {
        // A null expiry means the token does not expire.
        None => connection.access_token_encrypted.is_some(),
        Some(expires_at) => {
            connection.access_token_encrypted.is_some()
                && expires_at > Utc::now() + Duration::seconds(FRESHNESS_SKEW_SECONDS)
        }
    }
}

/// Derive the advisory-lock key from the connection id.
fn advisory_key(id: &Uuid) -> i64 {
    let bytes = id.as_bytes();
    i64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
