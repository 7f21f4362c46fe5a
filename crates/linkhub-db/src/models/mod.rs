//! Row models and their query surface.

pub mod api_key;
pub mod api_log;
pub mod connection;
pub mod end_user;
pub mod oauth_state;
pub mod project;
pub mod provider;
pub mod webhook_delivery;
pub mod webhook_subscription;

pub use api_key::{ApiKey, CreateApiKey};
pub use api_log::{ApiLog, CreateApiLog};
pub use connection::{Connection, ConnectionFilter, ConnectionStatus, UpsertConnection};
pub use end_user::EndUser;
pub use oauth_state::{CreateOAuthState, OAuthState};
pub use project::Project;
pub use provider::{ProviderDescriptor, SeedProvider};
pub use webhook_delivery::{CreateWebhookDelivery, DeliveryStatus, WebhookDelivery};
pub use webhook_subscription::{CreateWebhookSubscription, WebhookSubscription};
