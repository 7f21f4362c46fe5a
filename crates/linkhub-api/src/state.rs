//! Shared application state for the HTTP surface.

use std::sync::Arc;

use sqlx::PgPool;

use linkhub_crypto::KeyRing;
use linkhub_providers::AdapterRegistry;
use linkhub_tokens::TokenManager;
use linkhub_webhooks::EventPublisher;

use crate::auth::SecretCache;
use crate::rate_limit::ProjectRateLimiter;
use crate::services::dispatch::DispatchService;
use crate::services::oauth::OAuthFlowService;

/// Static configuration the HTTP surface needs.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Public base URL of the broker (for building absolute URLs).
    pub broker_base_url: String,
    /// The broker-side OAuth callback URL registered with providers.
    pub oauth_callback_url: String,
    /// Permit loopback/private webhook targets (development and test modes).
    pub allow_private_webhooks: bool,
    /// Default per-minute request allowance per project.
    pub default_minute_limit: u32,
    /// Default per-day request allowance per project.
    pub default_day_limit: u32,
}

/// Shared state cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub keyring: Arc<KeyRing>,
    pub registry: Arc<AdapterRegistry>,
    pub tokens: TokenManager,
    pub events: EventPublisher,
    pub oauth: OAuthFlowService,
    pub dispatch: DispatchService,
    pub rate_limiter: Arc<ProjectRateLimiter>,
    pub secret_cache: Arc<SecretCache>,
    pub config: ApiConfig,
}

impl AppState {
    /// Assemble the state graph from its long-lived parts.
    pub fn new(
        pool: PgPool,
        keyring: Arc<KeyRing>,
        registry: Arc<AdapterRegistry>,
        events: EventPublisher,
        config: ApiConfig,
    ) -> Self {
        let tokens = TokenManager::new(
            pool.clone(),
            keyring.clone(),
            registry.clone(),
            events.clone(),
        );
        let oauth = OAuthFlowService::new(
            pool.clone(),
            keyring.clone(),
            registry.clone(),
            events.clone(),
            config.oauth_callback_url.clone(),
        );
        let dispatch = DispatchService::new(pool.clone(), registry.clone(), tokens.clone());

        Self {
            pool,
            keyring,
            registry,
            tokens,
            events,
            oauth,
            dispatch,
            rate_limiter: Arc::new(ProjectRateLimiter::new()),
            secret_cache: Arc::new(SecretCache::default()),
            config,
        }
    }
}
