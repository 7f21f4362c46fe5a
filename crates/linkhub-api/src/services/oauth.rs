//! The OAuth state machine: authorization initiation and callback handling.
//!
//! Initiation persists a single-use state row binding the project, provider,
//! end user, caller redirect, scopes, and PKCE verifier, then hands back the
//! provider authorization URL. The callback consumes the state row (the
//! single-use guard), exchanges the code, upserts the connection, and returns
//! the end user to the caller's redirect with the outcome appended.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use linkhub_core::{BrokerError, ConnectionId, Result};
use linkhub_crypto::KeyRing;
use linkhub_db::models::{
    Connection, CreateOAuthState, EndUser, OAuthState, ProviderDescriptor, UpsertConnection,
};
use linkhub_providers::AdapterRegistry;
use linkhub_webhooks::{EventPublisher, EventType, LifecycleEvent};

/// Entropy behind state tokens and PKCE verifiers, in bytes.
const TOKEN_ENTROPY_BYTES: usize = 32;

/// Body of `POST /oauth/connect`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub provider: String,
    /// Project-scoped external user id.
    pub user_id: String,
    /// Where the end user lands after the flow completes.
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Response of `POST /oauth/connect`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateData {
    pub authorization_url: String,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

/// PKCE verifier/challenge pair (S256).
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a PKCE pair: random verifier, challenge = base64url(SHA-256(verifier)).
#[must_use]
pub fn generate_pkce() -> PkcePair {
    let mut verifier_bytes = [0u8; TOKEN_ENTROPY_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut verifier_bytes);
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    PkcePair {
        verifier,
        challenge,
    }
}

/// Verify a PKCE verifier against its challenge.
#[must_use]
pub fn verify_pkce(verifier: &str, challenge: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize()) == challenge
}

/// Generate an opaque state token with 32 bytes of entropy.
#[must_use]
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Append query pairs to a redirect URI, respecting an existing query string.
#[must_use]
pub fn append_redirect_params(redirect_uri: &str, pairs: &[(&str, &str)]) -> String {
    let mut target = redirect_uri.to_string();
    for (i, (key, value)) in pairs.iter().enumerate() {
        let sep = if i == 0 && !target.contains('?') {
            '?'
        } else {
            '&'
        };
        target.push(sep);
        target.push_str(key);
        target.push('=');
        target.push_str(&urlencoding_encode(value));
    }
    target
}

/// Minimal query-component percent encoding.
fn urlencoding_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Service implementing the authorization-code state machine.
#[derive(Clone)]
pub struct OAuthFlowService {
    pool: PgPool,
    keyring: Arc<KeyRing>,
    registry: Arc<AdapterRegistry>,
    events: EventPublisher,
    /// The broker-side callback URL providers redirect to.
    callback_url: String,
}

impl OAuthFlowService {
    /// Create the service.
    pub fn new(
        pool: PgPool,
        keyring: Arc<KeyRing>,
        registry: Arc<AdapterRegistry>,
        events: EventPublisher,
        callback_url: String,
    ) -> Self {
        Self {
            pool,
            keyring,
            registry,
            events,
            callback_url,
        }
    }

    /// Initiate an authorization: persist the state row and build the
    /// provider authorization URL.
    pub async fn initiate(
        &self,
        project_id: Uuid,
        request: &ConnectRequest,
    ) -> Result<InitiateData> {
        if request.redirect_uri.is_empty() {
            return Err(BrokerError::validation("redirectUri is required"));
        }
        if request.user_id.is_empty() {
            return Err(BrokerError::validation("userId is required"));
        }

        let descriptor = ProviderDescriptor::find_enabled_by_name(&self.pool, &request.provider)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?
            .ok_or_else(|| {
                BrokerError::validation(format!("unknown or disabled provider: {}", request.provider))
            })?;

        let adapter = self.registry.get(&descriptor.name).ok_or_else(|| {
            BrokerError::internal(format!("no adapter registered: {}", descriptor.name))
        })?;

        let end_user = EndUser::find_or_create(&self.pool, project_id, &request.user_id)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?;

        let scopes = descriptor.scope_union(&request.scopes);
        let state_token = generate_state_token();
        let pkce = generate_pkce();

        let state_row = OAuthState::create(
            &self.pool,
            CreateOAuthState {
                state_token: state_token.clone(),
                project_id,
                provider: descriptor.name.clone(),
                end_user_id: end_user.id,
                redirect_uri: request.redirect_uri.clone(),
                scopes: scopes.clone(),
                pkce_verifier: pkce.verifier.clone(),
            },
        )
        .await
        .map_err(|e| BrokerError::internal(e.to_string()))?;

        // The provider redirects to the broker's callback, never the
        // caller's; the caller redirect is replayed at the final step.
        let authorization_url = adapter.build_authorization_url(
            &self.callback_url,
            &scopes,
            &state_token,
            &pkce.challenge,
        );

        tracing::info!(
            target: "oauth_flow",
            project_id = %project_id,
            provider = %descriptor.name,
            end_user_id = %end_user.id,
            "Authorization initiated"
        );

        Ok(InitiateData {
            authorization_url,
            state: state_token,
            expires_at: state_row.expires_at,
        })
    }

    /// Handle the provider callback; returns the caller redirect target.
    ///
    /// An unknown, consumed, or expired state is an error response (the
    /// caller redirect is unknown without a state row). After the single-use
    /// guard fires, all failures redirect back to the caller with
    /// `status=error` and the state stays consumed.
    pub async fn callback(&self, code: &str, state_token: &str) -> Result<String> {
        // The conditional update is the authoritative single-use guard:
        // exactly one of N concurrent callbacks receives the row.
        let state = OAuthState::consume(&self.pool, state_token)
            .await
            .map_err(|e| BrokerError::internal(e.to_string()))?
            .ok_or(BrokerError::InvalidState)?;

        match self.complete_connection(&state, code).await {
            Ok(connection_id) => Ok(append_redirect_params(
                &state.redirect_uri,
                &[
                    ("connection_id", &connection_id.to_string()),
                    ("status", "success"),
                ],
            )),
            Err(error) => {
                tracing::warn!(
                    target: "oauth_flow",
                    provider = %state.provider,
                    project_id = %state.project_id,
                    error = %error,
                    "Callback completion failed"
                );
                Ok(append_redirect_params(
                    &state.redirect_uri,
                    &[("status", "error"), ("error_code", error.code().as_str())],
                ))
            }
        }
    }

    /// Code exchange, user-info capture, connection upsert, event emission.
    async fn complete_connection(
        &self,
        state: &OAuthState,
        code: &str,
    ) -> Result<ConnectionId> {
        let adapter = self.registry.get(&state.provider).ok_or_else(|| {
            BrokerError::internal(format!("no adapter registered: {}", state.provider))
        })?;

        let grant = adapter
            .exchange_code(code, &state.pkce_verifier, &self.callback_url)
            .await
            .map_err(|e| adapter.normalize_error(e))?;

        // User info is best-effort: a failure here must not lose the tokens.
        let provider_user = match adapter.fetch_user(&grant.access_token).await {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(
                    target: "oauth_flow",
                    provider = %state.provider,
                    error = %e,
                    "User info capture failed; continuing without identity"
                );
                None
            }
        };

        let access_sealed = self
            .keyring
            .encrypt_str(&grant.access_token)
            .map_err(|e| BrokerError::internal(format!("token encryption failed: {e}")))?;
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
        let scopes = if grant.granted_scopes.is_empty() {
            state.scopes.clone()
        } else {
            grant.granted_scopes.clone()
        };

        let connection = Connection::upsert_authorized(
            &self.pool,
            UpsertConnection {
                project_id: state.project_id,
                provider: state.provider.clone(),
                end_user_id: state.end_user_id,
                provider_user_id: provider_user.as_ref().map(|u| u.id.clone()),
                provider_email: provider_user.as_ref().and_then(|u| u.email.clone()),
                access_token_encrypted: access_sealed,
                refresh_token_encrypted: refresh_sealed,
                token_type: grant.token_type.clone(),
                expires_at,
                scopes,
            },
        )
        .await
        .map_err(|e| BrokerError::internal(e.to_string()))?;

        if let Some(user) = &provider_user {
            if let Err(e) = EndUser::update_profile(
                &self.pool,
                state.end_user_id,
                user.email.as_deref(),
                user.name.as_deref(),
            )
            .await
            {
                tracing::warn!(
                    target: "oauth_flow",
                    end_user_id = %state.end_user_id,
                    error = %e,
                    "Failed to record end-user profile"
                );
            }
        }

        let external_id = EndUser::find_by_id(&self.pool, state.project_id, state.end_user_id)
            .await
            .ok()
            .flatten()
            .map(|u| u.external_id);

        let connection_id = ConnectionId::from_uuid(connection.id);
        self.events.publish(LifecycleEvent::new(
            EventType::ConnectionCreated,
            state.project_id,
            serde_json::json!({
                "connectionId": connection_id.to_string(),
                "provider": connection.provider,
                "userId": external_id,
                "scopes": connection.scopes,
            }),
        ));

        tracing::info!(
            target: "oauth_flow",
            project_id = %state.project_id,
            provider = %connection.provider,
            connection_id = %connection_id,
            "Connection established"
        );

        Ok(connection_id)
    }

    /// Background sweep of expired unused state rows older than 24 hours.
    pub async fn sweep_expired_states(&self) {
        match OAuthState::sweep_expired(&self.pool, 24).await {
            Ok(0) => {}
            Ok(deleted) => {
                tracing::info!(target: "oauth_flow", deleted, "Swept expired OAuth states");
            }
            Err(e) => {
                tracing::error!(target: "oauth_flow", error = %e, "State sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_pkce_pair() {
        let pkce = generate_pkce();

        // Verifier is base64url without padding.
        assert!(!pkce.verifier.contains('+'));
        assert!(!pkce.verifier.contains('/'));
        assert!(!pkce.verifier.contains('='));
        assert_ne!(pkce.verifier, pkce.challenge);
        assert!(verify_pkce(&pkce.verifier, &pkce.challenge));
    }

    #[test]
    fn test_pkce_rejects_wrong_verifier() {
        let pkce = generate_pkce();
        assert!(!verify_pkce("wrong-verifier", &pkce.challenge));
    }

    #[test]
    fn test_state_token_entropy() {
        let token = generate_state_token();
        // 32 bytes base64url-encodes to 43 chars.
        assert_eq!(token.len(), 43);
        assert_ne!(token, generate_state_token());
    }

    #[test]
    fn test_append_redirect_params_no_query() {
        let target = append_redirect_params(
            "https://app.example.com/done",
            &[("connection_id", "conn_abc"), ("status", "success")],
        );
        assert_eq!(
            target,
            "https://app.example.com/done?connection_id=conn_abc&status=success"
        );
    }

    #[test]
    fn test_append_redirect_params_existing_query() {
        let target =
            append_redirect_params("https://app.example.com/done?tab=mail", &[("status", "error")]);
        assert_eq!(target, "https://app.example.com/done?tab=mail&status=error");
    }

    #[test]
    fn test_append_redirect_params_encodes_values() {
        let target = append_redirect_params("https://x.test/cb", &[("error_code", "A B&C")]);
        assert_eq!(target, "https://x.test/cb?error_code=A+B%26C");
    }
}
