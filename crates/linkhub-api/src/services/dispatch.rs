//! Uniform-verb dispatch to provider adapters.
//!
//! Stateless across requests: load the connection (scoped to the requesting
//! project), resolve the adapter, obtain a valid access token from the token
//! manager, invoke the verb, normalize failures, and append an API-log row.
//! Provider responses are never cached.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use linkhub_core::{BrokerError, Result};
use linkhub_db::models::{ApiLog, Connection, CreateApiLog};
use linkhub_providers::{AdapterRegistry, ConnectionHandle, Verb};
use linkhub_tokens::TokenManager;

/// Service routing uniform verbs to adapters.
#[derive(Clone)]
pub struct DispatchService {
    pool: PgPool,
    registry: Arc<AdapterRegistry>,
    tokens: TokenManager,
}

impl DispatchService {
    /// Create the dispatcher.
    pub fn new(pool: PgPool, registry: Arc<AdapterRegistry>, tokens: TokenManager) -> Self {
        Self {
            pool,
            registry,
            tokens,
        }
    }

    /// Dispatch one verb call on behalf of a project.
    ///
    /// `provider_hint` is the path-derived provider name for
    /// `POST /{provider}/{verb}`; when present it must match the
    /// connection's provider.
    pub async fn dispatch(
        &self,
        project_id: Uuid,
        connection_id: Uuid,
        verb: Verb,
        provider_hint: Option<&str>,
        params: Value,
        endpoint: &str,
    ) -> Result<Value> {
        let started = Instant::now();
        let result = self
            .dispatch_inner(project_id, connection_id, verb, provider_hint, params)
            .await;

        let status_code: i16 = match &result {
            Ok(_) => 200,
            Err(e) => i16::try_from(e.http_status()).unwrap_or(500),
        };

        // The log write is observability, not control flow; it must never
        // fail the dispatch or extend its latency.
        let log_row = CreateApiLog {
            project_id,
            provider: provider_hint.map(String::from),
            connection_id: Some(connection_id),
            endpoint: endpoint.to_string(),
            method: "POST".to_string(),
            status_code,
            latency_ms: i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX),
        };
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = ApiLog::create(&pool, log_row).await {
                tracing::warn!(target: "dispatch", error = %e, "Failed to append API log row");
            }
        });

        result
    }

    async fn dispatch_inner(
        &self,
        project_id: Uuid,
        connection_id: Uuid,
        verb: Verb,
        provider_hint: Option<&str>,
        params: Value,
    ) -> Result<Value> {
        // Project scoping doubles as the defense against id guessing: a
        // foreign connection id is indistinguishable from an absent one.
        let connection = Connection::find_for_project(&self.pool, project_id, connection_id)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?
            .ok_or(BrokerError::ConnectionNotFound)?;

        if let Some(hint) = provider_hint {
            if hint != connection.provider {
                return Err(BrokerError::validation(format!(
                    "connection belongs to provider '{}', not '{hint}'",
                    connection.provider
                )));
            }
        }

        let adapter = self.registry.get(&connection.provider).ok_or_else(|| {
            BrokerError::internal(format!("no adapter registered: {}", connection.provider))
        })?;

        let valid = self.tokens.get_valid_access_token(connection.id).await?;

        let handle = ConnectionHandle {
            connection_id: connection.id,
            access_token: valid.access_token,
            granted_scopes: valid.connection.scopes.clone(),
            provider_user_id: valid.connection.provider_user_id.clone(),
        };

        tracing::debug!(
            target: "dispatch",
            project_id = %project_id,
            provider = %connection.provider,
            verb = %verb,
            "Dispatching verb"
        );

        let outcome = match verb {
            Verb::Fetch => adapter.fetch(&handle, params).await,
            Verb::Create => adapter.create(&handle, params).await,
            Verb::Update => adapter.update(&handle, params).await,
            Verb::Delete => adapter.delete(&handle, params).await,
        };

        {
            let pool = self.pool.clone();
            let id = connection.id;
            tokio::spawn(async move {
                let _ = Connection::touch_last_used(&pool, id).await;
            });
        }

        outcome.map_err(|e| adapter.normalize_error(e))
    }
}
