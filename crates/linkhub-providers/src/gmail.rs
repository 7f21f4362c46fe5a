//! Gmail provider adapter (mail category).
//!
//! Translates the uniform verbs onto the Gmail REST surface:
//! `fetch` lists or reads messages, `create` sends, `update` modifies labels
//! and read state, `delete` moves a message to trash. OAuth plumbing lives in
//! the shared [`GoogleOAuthClient`].

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::ProviderAdapter;
use crate::error::AdapterError;
use crate::google::{read_api_json, GoogleOAuthClient};
use crate::normalized::{
    parse_mailbox, parse_mailbox_list, Address, MessageBody, NormalizedMessage, Page,
};
use crate::types::{ConnectionHandle, ProviderCredentials, ProviderUser, TokenGrant};

/// Gmail REST API base.
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Cap on messages hydrated per list call.
const MAX_LIST_RESULTS: u32 = 25;

/// Gmail message list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageList {
    #[serde(default)]
    messages: Vec<GmailMessageRef>,
    next_page_token: Option<String>,
    result_size_estimate: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GmailMessageRef {
    id: String,
}

/// Gmail adapter.
#[derive(Clone)]
pub struct GmailAdapter {
    oauth: GoogleOAuthClient,
    api_base: String,
}

impl GmailAdapter {
    /// Create a new Gmail adapter.
    #[must_use]
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self {
            oauth: GoogleOAuthClient::new(credentials),
            api_base: API_BASE.to_string(),
        }
    }

    /// Override the authorization endpoint (descriptor-driven).
    #[must_use]
    pub fn with_authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.oauth.set_authorization_endpoint(endpoint);
        self
    }

    /// Override the token endpoint (descriptor-driven or tests).
    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.oauth.set_token_endpoint(endpoint);
        self
    }

    /// Override the userinfo endpoint (tests).
    #[must_use]
    pub fn with_userinfo_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.oauth.set_userinfo_endpoint(endpoint);
        self
    }

    /// Override the REST API base (tests).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// GET a Gmail API path with bearer auth, returning the JSON body.
    async fn api_get(&self, access_token: &str, path: &str) -> Result<Value, AdapterError> {
        let response = self
            .oauth
            .http_client()
            .get(format!("{}{path}", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await?;

        read_api_json(response).await
    }

    /// POST a Gmail API path with bearer auth, returning the JSON body.
    async fn api_post(
        &self,
        access_token: &str,
        path: &str,
        body: &Value,
    ) -> Result<Value, AdapterError> {
        let response = self
            .oauth
            .http_client()
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await?;

        read_api_json(response).await
    }

    /// Read a single message and normalize it.
    async fn fetch_message(
        &self,
        handle: &ConnectionHandle,
        id: &str,
        include_raw: bool,
    ) -> Result<NormalizedMessage, AdapterError> {
        let raw = self
            .api_get(
                &handle.access_token,
                &format!("/users/me/messages/{id}?format=full"),
            )
            .await?;
        normalize_message(&raw, include_raw)
    }
}

#[async_trait]
impl ProviderAdapter for GmailAdapter {
    fn name(&self) -> &'static str {
        "gmail"
    }

    fn display_name(&self) -> &'static str {
        "Gmail"
    }

    fn category(&self) -> &'static str {
        "mail"
    }

    fn translate_scopes(&self, scopes: &[String]) -> Vec<String> {
        scopes
            .iter()
            .map(|scope| match scope.as_str() {
                "email.read" => "https://www.googleapis.com/auth/gmail.readonly".to_string(),
                "email.send" => "https://www.googleapis.com/auth/gmail.send".to_string(),
                "email.modify" => "https://www.googleapis.com/auth/gmail.modify".to_string(),
                other => other.to_string(),
            })
            .collect()
    }

    fn build_authorization_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
        state: &str,
        pkce_challenge: &str,
    ) -> String {
        self.oauth.authorization_url(
            redirect_uri,
            &self.translate_scopes(scopes),
            state,
            pkce_challenge,
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AdapterError> {
        self.oauth
            .exchange_code(code, pkce_verifier, redirect_uri)
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError> {
        self.oauth.refresh(refresh_token).await
    }

    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, AdapterError> {
        self.oauth.fetch_user(access_token).await
    }

    async fn fetch(&self, handle: &ConnectionHandle, params: Value) -> Result<Value, AdapterError> {
        if let Some(id) = params.get("id").and_then(Value::as_str) {
            let message = self.fetch_message(handle, id, true).await?;
            return serde_json::to_value(message)
                .map_err(|e| AdapterError::Malformed(e.to_string()));
        }

        let max_results = params
            .get("maxResults")
            .and_then(Value::as_u64)
            .map_or(10, |v| u32::try_from(v).unwrap_or(MAX_LIST_RESULTS))
            .min(MAX_LIST_RESULTS);

        let mut path = format!("/users/me/messages?maxResults={max_results}");
        if let Some(query) = params.get("query").and_then(Value::as_str) {
            path.push_str(&format!("&q={}", urlencoding::encode(query)));
        }
        if let Some(token) = params.get("pageToken").and_then(Value::as_str) {
            path.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let listing = self.api_get(&handle.access_token, &path).await?;
        let listing: GmailMessageList =
            serde_json::from_value(listing).map_err(|e| AdapterError::Malformed(e.to_string()))?;

        let mut items = Vec::with_capacity(listing.messages.len());
        for message_ref in &listing.messages {
            items.push(self.fetch_message(handle, &message_ref.id, false).await?);
        }

        let page = Page {
            items,
            next_page_token: listing.next_page_token,
            result_size_estimate: listing.result_size_estimate,
        };
        serde_json::to_value(page).map_err(|e| AdapterError::Malformed(e.to_string()))
    }

    async fn create(
        &self,
        handle: &ConnectionHandle,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let to = match params.get("to") {
            Some(Value::String(addr)) => vec![addr.clone()],
            Some(Value::Array(addrs)) => addrs
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            _ => {
                return Err(AdapterError::InvalidParams(
                    "'to' is required to send a message".to_string(),
                ))
            }
        };
        if to.is_empty() {
            return Err(AdapterError::InvalidParams(
                "'to' must name at least one recipient".to_string(),
            ));
        }

        let subject = params
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let text = params.get("text").and_then(Value::as_str).ok_or_else(|| {
            AdapterError::InvalidParams("'text' is required to send a message".to_string())
        })?;

        let mime = build_mime_message(&to, subject, text);
        let body = json!({ "raw": URL_SAFE_NO_PAD.encode(mime) });

        let sent = self
            .api_post(&handle.access_token, "/users/me/messages/send", &body)
            .await?;

        Ok(json!({
            "id": sent.get("id").cloned().unwrap_or(Value::Null),
            "threadId": sent.get("threadId").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn update(
        &self,
        handle: &ConnectionHandle,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::InvalidParams("'id' is required".to_string()))?;

        let mut add_labels: Vec<String> = params
            .get("addLabels")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let mut remove_labels: Vec<String> = params
            .get("removeLabels")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        // Read state maps onto the UNREAD system label.
        match params.get("isRead").and_then(Value::as_bool) {
            Some(true) => remove_labels.push("UNREAD".to_string()),
            Some(false) => add_labels.push("UNREAD".to_string()),
            None => {}
        }

        if add_labels.is_empty() && remove_labels.is_empty() {
            return Err(AdapterError::InvalidParams(
                "nothing to update: provide isRead, addLabels, or removeLabels".to_string(),
            ));
        }

        let body = json!({
            "addLabelIds": add_labels,
            "removeLabelIds": remove_labels,
        });

        let modified = self
            .api_post(
                &handle.access_token,
                &format!("/users/me/messages/{id}/modify"),
                &body,
            )
            .await?;

        Ok(json!({
            "id": id,
            "labels": modified.get("labelIds").cloned().unwrap_or(json!([])),
        }))
    }

    async fn delete(
        &self,
        handle: &ConnectionHandle,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::InvalidParams("'id' is required".to_string()))?;

        self.api_post(
            &handle.access_token,
            &format!("/users/me/messages/{id}/trash"),
            &json!({}),
        )
        .await?;

        Ok(json!({ "id": id, "trashed": true }))
    }
}

/// Build a minimal RFC 5322 message for the send path.
fn build_mime_message(to: &[String], subject: &str, text: &str) -> Vec<u8> {
    let mut mime = String::new();
    mime.push_str(&format!("To: {}\r\n", to.join(", ")));
    mime.push_str(&format!("Subject: {subject}\r\n"));
    mime.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    mime.push_str("MIME-Version: 1.0\r\n\r\n");
    mime.push_str(text);
    mime.into_bytes()
}

/// Normalize a Gmail message resource (format=full) into the common schema.
fn normalize_message(raw: &Value, include_raw: bool) -> Result<NormalizedMessage, AdapterError> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::Malformed("message missing id".to_string()))?
        .to_string();

    let headers = raw
        .pointer("/payload/headers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let header = |name: &str| -> Option<String> {
        headers.iter().find_map(|h| {
            let matches = h
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name));
            if matches {
                h.get("value").and_then(Value::as_str).map(String::from)
            } else {
                None
            }
        })
    };

    let labels: Vec<String> = raw
        .get("labelIds")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let timestamp = raw
        .get("internalDate")
        .and_then(Value::as_str)
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let from = header("From")
        .map(|v| parse_mailbox(&v))
        .unwrap_or(Address {
            email: String::new(),
            name: None,
        });

    let cc = header("Cc").map(|v| parse_mailbox_list(&v));

    let body_text = extract_plain_text(raw);

    Ok(NormalizedMessage {
        id,
        thread_id: raw
            .get("threadId")
            .and_then(Value::as_str)
            .map(String::from),
        provider: "gmail".to_string(),
        subject: header("Subject").unwrap_or_default(),
        snippet: raw.get("snippet").and_then(Value::as_str).map(String::from),
        body: body_text.map(|text| MessageBody {
            text: Some(text),
            html: None,
        }),
        from,
        to: header("To").map(|v| parse_mailbox_list(&v)).unwrap_or_default(),
        cc,
        timestamp,
        is_read: !labels.iter().any(|l| l == "UNREAD"),
        labels,
        attachments: None,
        raw: include_raw.then(|| raw.clone()),
    })
}

/// Decode the first text/plain part of a full-format message, if any.
fn extract_plain_text(raw: &Value) -> Option<String> {
    let payload = raw.get("payload")?;

    let decode = |part: &Value| -> Option<String> {
        let data = part.pointer("/body/data")?.as_str()?;
        let bytes = URL_SAFE_NO_PAD.decode(data).ok()?;
        String::from_utf8(bytes).ok()
    };

    if payload.get("mimeType").and_then(Value::as_str) == Some("text/plain") {
        return decode(payload);
    }

    payload
        .get("parts")?
        .as_array()?
        .iter()
        .find(|part| part.get("mimeType").and_then(Value::as_str) == Some("text/plain"))
        .and_then(decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GmailAdapter {
        GmailAdapter::new(ProviderCredentials {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        })
    }

    #[test]
    fn test_authorization_url_translates_scopes() {
        let url = adapter().build_authorization_url(
            "https://broker.example.com/v1/oauth/callback",
            &["email.read".to_string()],
            "state-token",
            "pkce-challenge",
        );

        assert!(url.contains("gmail.readonly"));
        assert!(url.contains("state=state-token"));
        assert!(url.contains("code_challenge=pkce-challenge"));
    }

    #[test]
    fn test_authorization_endpoint_override() {
        let url = adapter()
            .with_authorization_endpoint("https://mock.test/auth")
            .build_authorization_url("https://cb.test", &[], "s", "c");

        assert!(url.starts_with("https://mock.test/auth?"));
    }

    #[test]
    fn test_scope_translation() {
        let scopes = adapter().translate_scopes(&[
            "email.read".to_string(),
            "email.send".to_string(),
            "custom.scope".to_string(),
        ]);

        assert_eq!(
            scopes,
            vec![
                "https://www.googleapis.com/auth/gmail.readonly",
                "https://www.googleapis.com/auth/gmail.send",
                "custom.scope",
            ]
        );
    }

    #[test]
    fn test_build_mime_message() {
        let mime = build_mime_message(
            &["a@example.com".to_string(), "b@example.com".to_string()],
            "Greetings",
            "Hello there",
        );
        let text = String::from_utf8(mime).unwrap();

        assert!(text.starts_with("To: a@example.com, b@example.com\r\n"));
        assert!(text.contains("Subject: Greetings\r\n"));
        assert!(text.ends_with("\r\n\r\nHello there"));
    }

    #[test]
    fn test_normalize_message_metadata() {
        let raw = json!({
            "id": "m-1",
            "threadId": "t-1",
            "snippet": "Hello…",
            "labelIds": ["INBOX", "UNREAD"],
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "text/plain",
                "headers": [
                    {"name": "Subject", "value": "Hi"},
                    {"name": "From", "value": "Jane <jane@example.com>"},
                    {"name": "To", "value": "bob@example.com"},
                ],
                "body": {"data": URL_SAFE_NO_PAD.encode("the body")}
            }
        });

        let msg = normalize_message(&raw, false).unwrap();
        assert_eq!(msg.id, "m-1");
        assert_eq!(msg.thread_id.as_deref(), Some("t-1"));
        assert_eq!(msg.subject, "Hi");
        assert_eq!(msg.from.email, "jane@example.com");
        assert_eq!(msg.to[0].email, "bob@example.com");
        assert!(!msg.is_read);
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(msg.body.unwrap().text.as_deref(), Some("the body"));
        assert!(msg.raw.is_none());
    }

    #[test]
    fn test_normalize_message_missing_id_is_malformed() {
        assert!(normalize_message(&json!({"threadId": "t"}), false).is_err());
    }

    #[test]
    fn test_extract_plain_text_from_parts() {
        let raw = json!({
            "payload": {
                "mimeType": "multipart/alternative",
                "parts": [
                    {"mimeType": "text/html", "body": {"data": URL_SAFE_NO_PAD.encode("<p>x</p>")}},
                    {"mimeType": "text/plain", "body": {"data": URL_SAFE_NO_PAD.encode("plain")}},
                ]
            }
        });
        assert_eq!(extract_plain_text(&raw).as_deref(), Some("plain"));
    }
}
