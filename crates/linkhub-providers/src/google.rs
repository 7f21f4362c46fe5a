//! Shared Google OAuth2 plumbing.
//!
//! Gmail and Google Calendar sit behind the same accounts.google.com
//! authorization server and token endpoint; this module owns the pieces both
//! adapters embed: the OAuth client, the token-fault classification of
//! Google's error bodies, and the REST error mapping.

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AdapterError, ProviderFault};
use crate::types::{ProviderCredentials, ProviderUser, TokenGrant};

/// Google OAuth2 endpoints.
pub const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Google token endpoint response.
#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

/// Google OAuth error body.
#[derive(Debug, Deserialize)]
struct GoogleOAuthError {
    error: String,
    error_description: Option<String>,
}

/// Google userinfo response.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

/// The OAuth client both Google adapters embed.
#[derive(Clone)]
pub struct GoogleOAuthClient {
    credentials: ProviderCredentials,
    http_client: Client,
    authorization_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: String,
}

impl GoogleOAuthClient {
    /// Create a client with the canonical Google endpoints.
    #[must_use]
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self {
            credentials,
            http_client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            authorization_endpoint: AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            userinfo_endpoint: USERINFO_ENDPOINT.to_string(),
        }
    }

    /// Override the authorization endpoint (descriptor-driven or tests).
    pub fn set_authorization_endpoint(&mut self, endpoint: impl Into<String>) {
        self.authorization_endpoint = endpoint.into();
    }

    /// Override the token endpoint (descriptor-driven or tests).
    pub fn set_token_endpoint(&mut self, endpoint: impl Into<String>) {
        self.token_endpoint = endpoint.into();
    }

    /// Override the userinfo endpoint (tests).
    pub fn set_userinfo_endpoint(&mut self, endpoint: impl Into<String>) {
        self.userinfo_endpoint = endpoint.into();
    }

    /// The shared HTTP client, for the embedding adapter's REST calls.
    #[must_use]
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Build the consent URL for the hosted flow.
    ///
    /// `openid` and `email` are always requested so the callback can capture
    /// the provider-side identity.
    #[must_use]
    pub fn authorization_url(
        &self,
        redirect_uri: &str,
        native_scopes: &[String],
        state: &str,
        pkce_challenge: &str,
    ) -> String {
        let mut scopes = vec!["openid".to_string(), "email".to_string()];
        for scope in native_scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        let scope_param = scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
            self.authorization_endpoint,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope_param),
            urlencoding::encode(state),
            urlencoding::encode(pkce_challenge),
        )
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AdapterError> {
        self.token_request(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", pkce_verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    /// Refresh an access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError> {
        self.token_request(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    /// Fetch the provider-side identity via the userinfo endpoint.
    pub async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, AdapterError> {
        let response = self
            .http_client
            .get(&self.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        let info: GoogleUserInfo = response
            .json()
            .await
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;

        Ok(ProviderUser {
            id: info.sub,
            email: info.email,
            name: info.name,
        })
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant, AdapterError> {
        let response = self
            .http_client
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_token_error(status, &body));
        }

        let token: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            granted_scopes: token
                .scope
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
        })
    }
}

/// Classify a non-2xx token endpoint response into a provider fault.
pub fn classify_token_error(status: u16, body: &str) -> AdapterError {
    if status >= 500 {
        return AdapterError::TokenFault {
            fault: ProviderFault::Transient,
            message: format!("token endpoint returned {status}"),
        };
    }

    if let Ok(oauth_error) = serde_json::from_str::<GoogleOAuthError>(body) {
        let description = oauth_error.error_description.unwrap_or_default();
        if oauth_error.error == "invalid_grant" {
            // Google reports both revocation and age-out as invalid_grant;
            // the description distinguishes the expired case.
            let fault = if description.to_lowercase().contains("expired") {
                ProviderFault::GrantExpired
            } else {
                ProviderFault::GrantRevoked
            };
            return AdapterError::TokenFault {
                fault,
                message: format!("{}: {description}", oauth_error.error),
            };
        }
        return AdapterError::TokenFault {
            fault: ProviderFault::Rejected,
            message: format!("{}: {description}", oauth_error.error),
        };
    }

    AdapterError::TokenFault {
        fault: ProviderFault::Rejected,
        message: format!("token endpoint returned {status}"),
    }
}

/// Map a non-2xx Google REST response into an adapter error.
pub fn api_error(status: u16, body: &str) -> AdapterError {
    match status {
        404 => AdapterError::ResourceNotFound,
        403 if body.contains("insufficientPermissions")
            || body.contains("ACCESS_TOKEN_SCOPE_INSUFFICIENT") =>
        {
            AdapterError::ScopeInsufficient {
                scope: extract_api_error_message(body)
                    .unwrap_or_else(|| "google scope".to_string()),
            }
        }
        429 => AdapterError::Api {
            status,
            message: "rate limited by provider".to_string(),
            retryable: true,
        },
        s if s >= 500 => AdapterError::Api {
            status,
            message: extract_api_error_message(body).unwrap_or_else(|| "server error".to_string()),
            retryable: true,
        },
        _ => AdapterError::Api {
            status,
            message: extract_api_error_message(body)
                .unwrap_or_else(|| "request rejected".to_string()),
            retryable: false,
        },
    }
}

/// Pull the human message out of a Google error body, if present.
fn extract_api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .get("message")?
        .as_str()
        .map(String::from)
}

/// Read a Google REST response, converting failures via [`api_error`].
pub async fn read_api_json(response: reqwest::Response) -> Result<Value, AdapterError> {
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(api_error(status, &body));
    }
    response
        .json()
        .await
        .map_err(|e| AdapterError::Malformed(e.to_string()))
}
