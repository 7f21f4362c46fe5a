//! Token lifecycle management for provider connections.
//!
//! The hot path, [`TokenManager::get_valid_access_token`], decrypts and
//! returns a fresh access token, or refreshes it behind two layers of
//! exclusion: a process-local per-connection mutex (single-flight) and a
//! Postgres advisory lock for cross-process callers. Refresh failures are
//! classified into the connection state machine and emit lifecycle webhooks.

pub mod manager;
pub mod rotation;
pub mod singleflight;

pub use manager::{TokenManager, ValidAccessToken, FRESHNESS_SKEW_SECONDS};
pub use rotation::{reencrypt_secrets, RotationReport};
pub use singleflight::KeyedMutex;
