//! HTTP surface of the LinkHub broker.
//!
//! Every project-facing endpoint lives here: the OAuth connect/callback pair,
//! connection management, uniform-verb dispatch, and webhook subscription
//! management. Requests pass through the signed-request authenticator and the
//! per-project rate limiter before reaching a handler; responses are wrapped
//! in the standard envelope with a request id echo.

pub mod auth;
pub mod context;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod router;
pub mod services;
pub mod state;

pub use error::ApiError;
pub use router::api_router;
pub use state::{ApiConfig, AppState};
