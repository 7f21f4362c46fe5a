//! Gmail adapter integration tests against a mock provider.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use linkhub_providers::{
    AdapterError, ConnectionHandle, GmailAdapter, ProviderAdapter, ProviderCredentials,
    ProviderFault,
};

fn adapter_against(server: &MockServer) -> GmailAdapter {
    GmailAdapter::new(ProviderCredentials {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
    })
    .with_token_endpoint(format!("{}/token", server.uri()))
    .with_userinfo_endpoint(format!("{}/userinfo", server.uri()))
    .with_api_base(format!("{}/gmail/v1", server.uri()))
}

fn handle() -> ConnectionHandle {
    ConnectionHandle {
        connection_id: Uuid::new_v4(),
        access_token: "at-123".to_string(),
        granted_scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        provider_user_id: Some("117730572023847612345".to_string()),
    }
}

#[tokio::test]
async fn exchange_code_returns_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code_verifier=verifier-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-new",
            "refresh_token": "rt-new",
            "expires_in": 3599,
            "token_type": "Bearer",
            "scope": "openid email https://www.googleapis.com/auth/gmail.readonly",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let grant = adapter_against(&server)
        .exchange_code("code-1", "verifier-1", "https://broker.example.com/cb")
        .await
        .unwrap();

    assert_eq!(grant.access_token, "at-new");
    assert_eq!(grant.refresh_token.as_deref(), Some("rt-new"));
    assert_eq!(grant.expires_in, Some(3599));
    assert_eq!(grant.granted_scopes.len(), 3);
}

#[tokio::test]
async fn refresh_classifies_invalid_grant_as_revoked() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been revoked.",
        })))
        .mount(&server)
        .await;

    let err = adapter_against(&server)
        .refresh("rt-dead")
        .await
        .unwrap_err();

    assert_eq!(err.fault(), ProviderFault::GrantRevoked);
}

#[tokio::test]
async fn refresh_classifies_expired_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked.",
        })))
        .mount(&server)
        .await;

    let err = adapter_against(&server)
        .refresh("rt-old")
        .await
        .unwrap_err();

    assert_eq!(err.fault(), ProviderFault::GrantExpired);
}

#[tokio::test]
async fn refresh_classifies_server_error_as_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = adapter_against(&server).refresh("rt").await.unwrap_err();
    assert_eq!(err.fault(), ProviderFault::Transient);
}

#[tokio::test]
async fn fetch_user_reads_userinfo() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "117730572023847612345",
            "email": "testuser@gmail.com",
            "name": "Test User",
        })))
        .mount(&server)
        .await;

    let user = adapter_against(&server).fetch_user("at-123").await.unwrap();
    assert_eq!(user.id, "117730572023847612345");
    assert_eq!(user.email.as_deref(), Some("testuser@gmail.com"));
}

#[tokio::test]
async fn fetch_single_message_normalizes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-1",
            "threadId": "t-1",
            "snippet": "Quarterly report attached",
            "labelIds": ["INBOX"],
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "text/plain",
                "headers": [
                    {"name": "Subject", "value": "Q3 report"},
                    {"name": "From", "value": "Alice <alice@example.com>"},
                    {"name": "To", "value": "bob@example.com"},
                ],
                "body": {"data": URL_SAFE_NO_PAD.encode("Report inside")},
            },
        })))
        .mount(&server)
        .await;

    let result = adapter_against(&server)
        .fetch(&handle(), json!({"id": "m-1"}))
        .await
        .unwrap();

    assert_eq!(result["id"], "m-1");
    assert_eq!(result["subject"], "Q3 report");
    assert_eq!(result["from"]["email"], "alice@example.com");
    assert_eq!(result["isRead"], true);
    assert_eq!(result["body"]["text"], "Report inside");
    // Single reads keep the untranslated payload for power users.
    assert!(result.get("raw").is_some());
}

#[tokio::test]
async fn fetch_list_returns_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{"id": "m-1"}, {"id": "m-2"}],
            "nextPageToken": "page-2",
            "resultSizeEstimate": 2,
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/gmail/v1/users/me/messages/m-\d$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-1",
            "labelIds": ["INBOX"],
            "internalDate": "1700000000000",
            "payload": {"headers": [
                {"name": "Subject", "value": "s"},
                {"name": "From", "value": "a@example.com"},
            ]},
        })))
        .mount(&server)
        .await;

    let result = adapter_against(&server)
        .fetch(&handle(), json!({"maxResults": 5}))
        .await
        .unwrap();

    assert_eq!(result["items"].as_array().unwrap().len(), 2);
    assert_eq!(result["nextPageToken"], "page-2");
}

#[tokio::test]
async fn create_sends_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gmail/v1/users/me/messages/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sent-1",
            "threadId": "t-9",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = adapter_against(&server)
        .create(
            &handle(),
            json!({"to": "bob@example.com", "subject": "Hi", "text": "Hello"}),
        )
        .await
        .unwrap();

    assert_eq!(result["id"], "sent-1");
    assert_eq!(result["threadId"], "t-9");
}

#[tokio::test]
async fn create_without_recipient_is_invalid() {
    let server = MockServer::start().await;

    let err = adapter_against(&server)
        .create(&handle(), json!({"subject": "Hi", "text": "Hello"}))
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::InvalidParams(_)));
}

#[tokio::test]
async fn update_modifies_read_state() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gmail/v1/users/me/messages/m-1/modify"))
        .and(body_string_contains("UNREAD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-1",
            "labelIds": ["INBOX"],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = adapter_against(&server)
        .update(&handle(), json!({"id": "m-1", "isRead": true}))
        .await
        .unwrap();

    assert_eq!(result["id"], "m-1");
}

#[tokio::test]
async fn delete_trashes_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gmail/v1/users/me/messages/m-1/trash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let result = adapter_against(&server)
        .delete(&handle(), json!({"id": "m-1"}))
        .await
        .unwrap();

    assert_eq!(result["trashed"], true);
}

#[tokio::test]
async fn verb_error_normalizes_scope_insufficient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m-1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "message": "Insufficient Permission",
                "errors": [{"reason": "insufficientPermissions"}],
            }
        })))
        .mount(&server)
        .await;

    let adapter = adapter_against(&server);
    let err = adapter
        .fetch(&handle(), json!({"id": "m-1"}))
        .await
        .unwrap_err();

    let broker = adapter.normalize_error(err);
    assert_eq!(broker.http_status(), 403);
}
