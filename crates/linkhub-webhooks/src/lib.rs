//! Webhook delivery for connection lifecycle events.
//!
//! Projects subscribe callback URLs to lifecycle events
//! (`connection.created`, `connection.expired`, `connection.revoked`,
//! `connection.error`). Delivery is at-least-once: the delivery row is
//! persisted before the first HTTP attempt, a background worker retries on an
//! exponential backoff schedule, and five consecutive failures auto-disable
//! the subscription. Payloads are signed with HMAC-SHA256 over the raw body.

pub mod delivery;
pub mod events;
pub mod validation;
pub mod worker;

pub use delivery::{DeliveryService, WebhookEnvelope, BACKOFF_SCHEDULE_SECS, DISABLE_THRESHOLD};
pub use events::{EventPublisher, EventType, LifecycleEvent};
pub use validation::validate_webhook_url;
pub use worker::WebhookWorker;
