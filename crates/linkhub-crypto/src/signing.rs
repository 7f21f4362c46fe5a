//! HMAC-SHA256 signing for project requests and webhook payloads.
//!
//! The canonical payload for a signed project request is the exact byte
//! sequence `<timestamp> "." <raw body>`; the body participates verbatim so
//! the signer and verifier never disagree over serialization. Webhook
//! signatures cover the raw delivery body only.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Build the canonical signed payload `<timestamp>.<body>`.
#[must_use]
pub fn signed_payload(timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(timestamp.len() + 1 + body.len());
    payload.extend_from_slice(timestamp.as_bytes());
    payload.push(b'.');
    payload.extend_from_slice(body);
    payload
}

/// Compute `HMAC-SHA-256(secret, payload)` as lowercase hex.
#[must_use]
pub fn compute_signature(secret: &str, payload: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against the expected HMAC, in constant time.
#[must_use]
pub fn verify_signature(expected_hex: &str, secret: &str, payload: &[u8]) -> bool {
    let computed = compute_signature(secret, payload);
    bool::from(expected_hex.as_bytes().ct_eq(computed.as_bytes()))
}
