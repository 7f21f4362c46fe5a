//! Signed-request authentication.
//!
//! Every project-originated call (except the OAuth callback and health
//! probes) carries three headers: the opaque public key, a Unix-seconds
//! timestamp, and a hex HMAC-SHA256 signature over `<timestamp>.<raw body>`.
//! The body participates verbatim; nothing is re-serialized.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use linkhub_core::BrokerError;
use linkhub_crypto::{signed_payload, verify_signature};
use linkhub_db::models::ApiKey;

use crate::error::ApiError;
use crate::state::AppState;

/// Authentication headers.
pub const HEADER_PUBLIC_KEY: &str = "x-link-public-key";
pub const HEADER_TIMESTAMP: &str = "x-link-timestamp";
pub const HEADER_SIGNATURE: &str = "x-link-signature";

/// Accepted clock skew between signer and verifier, in seconds.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Maximum request body buffered for signature verification (1 MiB).
const MAX_SIGNED_BODY: usize = 1_048_576;

/// The verified project identity, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub project_id: Uuid,
    pub api_key_id: Uuid,
    pub environment: String,
}

/// Short-TTL cache of decrypted API-key secrets, keyed by api-key id.
///
/// Amortizes per-request AES-GCM decryption on hot keys. Entries expire after
/// the TTL; stale entries are dropped lazily on lookup and opportunistically
/// on insert.
pub struct SecretCache {
    ttl: Duration,
    entries: StdMutex<HashMap<Uuid, (String, Instant)>>,
}

impl Default for SecretCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl SecretCache {
    /// Create a cache with the given entry TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: StdMutex::new(HashMap::new()),
        }
    }

    /// Look up a cached secret, dropping it if expired.
    pub fn get(&self, key_id: &Uuid) -> Option<String> {
        let mut entries = self.entries.lock().expect("secret cache poisoned");
        match entries.get(key_id) {
            Some((secret, inserted)) if inserted.elapsed() < self.ttl => Some(secret.clone()),
            Some(_) => {
                entries.remove(key_id);
                None
            }
            None => None,
        }
    }

    /// Cache a decrypted secret.
    pub fn insert(&self, key_id: Uuid, secret: String) {
        let mut entries = self.entries.lock().expect("secret cache poisoned");
        entries.retain(|_, (_, inserted)| inserted.elapsed() < self.ttl);
        entries.insert(key_id, (secret, Instant::now()));
    }
}

/// Check the timestamp header against the verifier's wall clock.
pub fn check_timestamp(raw: &str, now_epoch: i64) -> Result<i64, BrokerError> {
    let timestamp: i64 = raw
        .parse()
        .map_err(|_| BrokerError::TimestampExpired)?;
    if (now_epoch - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(BrokerError::TimestampExpired);
    }
    Ok(timestamp)
}

/// Verify the signature over the exact `(timestamp, raw body)` the client signed.
pub fn verify_signed_request(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature_hex: &str,
) -> Result<(), BrokerError> {
    let payload = signed_payload(timestamp, body);
    if verify_signature(signature_hex, secret, &payload) {
        Ok(())
    } else {
        Err(BrokerError::InvalidSignature)
    }
}

/// Axum middleware enforcing signed-request authentication.
///
/// On success the [`AuthContext`] is inserted into request extensions and the
/// key's `last_used_at` update is deferred to a spawned task.
pub async fn signed_request_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(&state, request).await {
        Ok(request) => next.run(request).await,
        Err(error) => error.into_response(),
    }
}

async fn authenticate(
    state: &AppState,
    request: Request<Body>,
) -> Result<Request<Body>, ApiError> {
    let (public_key, timestamp, signature) = {
        let header = |name: &str| -> Result<String, ApiError> {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
                .ok_or_else(|| ApiError(BrokerError::InvalidApiKey))
        };

        (
            header(HEADER_PUBLIC_KEY)?,
            header(HEADER_TIMESTAMP)?,
            header(HEADER_SIGNATURE)?,
        )
    };

    // 1. Timestamp window before any storage work.
    check_timestamp(&timestamp, chrono::Utc::now().timestamp()).map_err(ApiError)?;

    // 2. Resolve the public key to an active record.
    let api_key = ApiKey::find_by_public_key(&state.pool, &public_key)
        .await?
        .ok_or(ApiError(BrokerError::InvalidApiKey))?;
    if !api_key.is_active() {
        return Err(ApiError(BrokerError::InvalidApiKey));
    }

    // 3. Decrypt (or recall) the signing secret and recompute the HMAC over
    //    the raw body bytes.
    let secret = match state.secret_cache.get(&api_key.id) {
        Some(secret) => secret,
        None => {
            let secret = state.keyring.decrypt_str(&api_key.secret_encrypted)?;
            state.secret_cache.insert(api_key.id, secret.clone());
            secret
        }
    };

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_SIGNED_BODY)
        .await
        .map_err(|_| {
            ApiError(BrokerError::validation(
                "request body exceeds the signable size limit",
            ))
        })?;

    verify_signed_request(&secret, &timestamp, &body_bytes, &signature).map_err(ApiError)?;

    // 4. Deferred last_used_at write.
    {
        let pool = state.pool.clone();
        let key_id = api_key.id;
        tokio::spawn(async move {
            if let Err(e) = ApiKey::touch_last_used(&pool, key_id).await {
                tracing::warn!(target: "auth", error = %e, "Failed to update key last_used_at");
            }
        });
    }

    let mut request = Request::from_parts(parts, Body::from(body_bytes));
    request.extensions_mut().insert(AuthContext {
        project_id: api_key.project_id,
        api_key_id: api_key.id,
        environment: api_key.environment,
    });

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkhub_crypto::compute_signature;

    #[test]
    fn test_timestamp_within_window() {
        assert!(check_timestamp("1700000000", 1_700_000_000).is_ok());
        assert!(check_timestamp("1700000000", 1_700_000_299).is_ok());
        assert!(check_timestamp("1700000299", 1_700_000_000).is_ok());
    }

    #[test]
    fn test_timestamp_replay_rejected() {
        // The S2 scenario: the same request 400 seconds later.
        let result = check_timestamp("1700000000", 1_700_000_400);
        assert!(matches!(result, Err(BrokerError::TimestampExpired)));
    }

    #[test]
    fn test_timestamp_garbage_rejected() {
        assert!(check_timestamp("not-a-number", 1_700_000_000).is_err());
        assert!(check_timestamp("", 1_700_000_000).is_err());
    }

    #[test]
    fn test_signed_request_happy_path() {
        // The S1 scenario: known key, body, and timestamp.
        let secret = "sk_test_BBBB";
        let body = br#"{"x":1}"#;
        let timestamp = "1700000000";

        let signature = compute_signature(secret, &signed_payload(timestamp, body));
        assert!(verify_signed_request(secret, timestamp, body, &signature).is_ok());
    }

    #[test]
    fn test_signature_over_reserialized_body_fails() {
        // Whitespace differences must break verification: the verifier works
        // on the exact bytes the client signed.
        let secret = "sk_test_BBBB";
        let timestamp = "1700000000";
        let signature = compute_signature(secret, &signed_payload(timestamp, br#"{"x":1}"#));

        let result = verify_signed_request(secret, timestamp, br#"{"x": 1}"#, &signature);
        assert!(matches!(result, Err(BrokerError::InvalidSignature)));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let timestamp = "1700000000";
        let body = b"{}";
        let signature = compute_signature("sk_test_AAAA", &signed_payload(timestamp, body));

        let result = verify_signed_request("sk_test_BBBB", timestamp, body, &signature);
        assert!(matches!(result, Err(BrokerError::InvalidSignature)));
    }

    #[test]
    fn test_secret_cache_round_trip() {
        let cache = SecretCache::new(Duration::from_secs(60));
        let key_id = Uuid::new_v4();

        assert!(cache.get(&key_id).is_none());
        cache.insert(key_id, "sk_test_BBBB".to_string());
        assert_eq!(cache.get(&key_id).as_deref(), Some("sk_test_BBBB"));
    }

    #[test]
    fn test_secret_cache_expires() {
        let cache = SecretCache::new(Duration::from_millis(0));
        let key_id = Uuid::new_v4();

        cache.insert(key_id, "secret".to_string());
        assert!(cache.get(&key_id).is_none());
    }
}
