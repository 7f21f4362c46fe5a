//! Startup seeding and adapter registry construction.

use std::sync::Arc;

use sqlx::PgPool;

use linkhub_crypto::KeyRing;
use linkhub_db::models::{ProviderDescriptor, SeedProvider};
use linkhub_providers::{
    AdapterRegistry, GmailAdapter, GoogleCalendarAdapter, ProviderCredentials,
};

use crate::config::Config;

/// Insert or refresh provider descriptor rows from environment credentials.
pub async fn seed_providers(
    pool: &PgPool,
    keyring: &KeyRing,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    for creds in &config.providers {
        let seed = match creds.name.as_str() {
            "gmail" => SeedProvider {
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
                client_id: creds.client_id.clone(),
                client_secret_encrypted: keyring.encrypt_str(&creds.client_secret)?,
            },
            "google-calendar" => SeedProvider {
                name: "google-calendar".to_string(),
                display_name: "Google Calendar".to_string(),
                category: "calendar".to_string(),
                authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
                permitted_scopes: vec![
                    "calendar.read".to_string(),
                    "calendar.write".to_string(),
                ],
                default_scopes: vec!["calendar.read".to_string()],
                client_id: creds.client_id.clone(),
                client_secret_encrypted: keyring.encrypt_str(&creds.client_secret)?,
            },
            other => {
                tracing::warn!(target: "bootstrap", provider = other, "No seed recipe; skipping");
                continue;
            }
        };

        let descriptor = ProviderDescriptor::seed(pool, seed).await?;
        tracing::info!(
            target: "bootstrap",
            provider = %descriptor.name,
            enabled = descriptor.enabled,
            "Provider descriptor seeded"
        );
    }

    Ok(())
}

/// Build the read-only adapter registry from enabled descriptors.
///
/// Adapters take both OAuth endpoints from the descriptor row, so a
/// descriptor pointing at a test double carries through to the adapter.
pub async fn build_registry(
    pool: &PgPool,
    keyring: &KeyRing,
) -> Result<Arc<AdapterRegistry>, Box<dyn std::error::Error>> {
    let mut registry = AdapterRegistry::new();

    for descriptor in ProviderDescriptor::list_enabled(pool).await? {
        let credentials = ProviderCredentials {
            client_id: descriptor.client_id.clone(),
            client_secret: keyring.decrypt_str(&descriptor.client_secret_encrypted)?,
        };

        match descriptor.name.as_str() {
            "gmail" => {
                let adapter = GmailAdapter::new(credentials)
                    .with_authorization_endpoint(descriptor.authorization_endpoint.clone())
                    .with_token_endpoint(descriptor.token_endpoint.clone());
                registry.register(Arc::new(adapter));
            }
            "google-calendar" => {
                let adapter = GoogleCalendarAdapter::new(credentials)
                    .with_authorization_endpoint(descriptor.authorization_endpoint.clone())
                    .with_token_endpoint(descriptor.token_endpoint.clone());
                registry.register(Arc::new(adapter));
            }
            other => {
                tracing::warn!(
                    target: "bootstrap",
                    provider = other,
                    "Descriptor has no adapter implementation; skipping"
                );
            }
        }
    }

    tracing::info!(
        target: "bootstrap",
        providers = ?registry.names(),
        "Adapter registry built"
    );

    Ok(Arc::new(registry))
}
