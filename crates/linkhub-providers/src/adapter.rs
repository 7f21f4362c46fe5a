//! The provider adapter capability set.

use async_trait::async_trait;
use linkhub_core::BrokerError;
use serde_json::Value;

use crate::error::AdapterError;
use crate::types::{ConnectionHandle, ProviderUser, TokenGrant};

/// A provider integration as a capability bundle.
///
/// Implementations are plain values held as `Arc<dyn ProviderAdapter>` in the
/// registry; there is no hierarchy. All verb calls receive an opaque
/// [`ConnectionHandle`] with a live access token: adapters never touch
/// storage or ciphertext.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Canonical provider name (`gmail`).
    fn name(&self) -> &'static str;

    /// Human-readable name (`Gmail`).
    fn display_name(&self) -> &'static str;

    /// Category: `mail`, `calendar`, `documents`, `issues`.
    fn category(&self) -> &'static str;

    /// Translate broker-vocabulary scopes into provider-native scope strings.
    ///
    /// Unrecognized broker scopes pass through unchanged.
    fn translate_scopes(&self, scopes: &[String]) -> Vec<String> {
        scopes.to_vec()
    }

    /// Build the provider authorization URL for the hosted flow.
    fn build_authorization_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
        state: &str,
        pkce_challenge: &str,
    ) -> String;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AdapterError>;

    /// Refresh an access token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError>;

    /// Fetch the provider-side identity for a freshly exchanged token.
    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, AdapterError>;

    /// Uniform read verb.
    async fn fetch(&self, handle: &ConnectionHandle, params: Value) -> Result<Value, AdapterError>;

    /// Uniform create verb.
    async fn create(&self, handle: &ConnectionHandle, params: Value)
        -> Result<Value, AdapterError>;

    /// Uniform update verb.
    async fn update(&self, handle: &ConnectionHandle, params: Value)
        -> Result<Value, AdapterError>;

    /// Uniform delete verb.
    async fn delete(&self, handle: &ConnectionHandle, params: Value)
        -> Result<Value, AdapterError>;

    /// Map a raw adapter error into the broker taxonomy.
    fn normalize_error(&self, error: AdapterError) -> BrokerError {
        error.into_broker_error()
    }
}
