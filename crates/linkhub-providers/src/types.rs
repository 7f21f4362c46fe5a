//! Shared adapter input/output types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Token material returned by a code exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    /// Access token for API calls.
    pub access_token: String,
    /// Refresh token, when the provider issues one.
    pub refresh_token: Option<String>,
    /// Lifetime in seconds; `None` for non-expiring bearer tokens.
    pub expires_in: Option<i64>,
    /// Token type, normally `Bearer`.
    pub token_type: String,
    /// Scopes the provider actually granted.
    pub granted_scopes: Vec<String>,
}

/// Provider-side identity captured after a code exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUser {
    /// Stable provider-side user id.
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// OAuth client credentials for one provider, decrypted from its descriptor.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// The opaque handle a dispatcher passes into a verb call.
///
/// Bundles the live access token with the connection metadata an adapter
/// needs; adapters never see ciphertext or the refresh token.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: Uuid,
    pub access_token: String,
    pub granted_scopes: Vec<String>,
    pub provider_user_id: Option<String>,
}

/// The uniform verb set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Fetch,
    Create,
    Update,
    Delete,
}

impl Verb {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Self::Fetch),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown verb: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_round_trip() {
        for verb in [Verb::Fetch, Verb::Create, Verb::Update, Verb::Delete] {
            assert_eq!(verb.as_str().parse::<Verb>(), Ok(verb));
        }
    }

    #[test]
    fn test_verb_rejects_unknown() {
        assert!("patch".parse::<Verb>().is_err());
    }
}
