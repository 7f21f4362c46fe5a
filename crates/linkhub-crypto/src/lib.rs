//! Cryptographic primitives for the LinkHub broker.
//!
//! Two concerns live here:
//!
//! - **At-rest encryption** of secret-valued columns (provider tokens, client
//!   secrets, API-key secrets, webhook signing secrets) with AES-256-GCM under
//!   a versioned keyring, so master keys can be rotated without a flag day.
//! - **HMAC-SHA256 signing** for signed project requests and webhook payloads,
//!   with constant-time verification.

pub mod cipher;
pub mod signing;

pub use cipher::{CryptoError, KeyRing};
pub use signing::{compute_signature, signed_payload, verify_signature};
