//! Google Calendar provider adapter (calendar category).
//!
//! `fetch` lists or reads events, `create` inserts one, `update` patches
//! fields, `delete` removes. Events normalize into [`NormalizedEvent`]; the
//! calendar defaults to `primary` and can be overridden per call with a
//! `calendarId` parameter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::adapter::ProviderAdapter;
use crate::error::AdapterError;
use crate::google::{read_api_json, GoogleOAuthClient};
use crate::normalized::{EventAttendee, EventStatus, EventTime, NormalizedEvent, Page};
use crate::types::{ConnectionHandle, ProviderCredentials, ProviderUser, TokenGrant};

/// Google Calendar REST API base.
const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Cap on events returned per list call.
const MAX_LIST_RESULTS: u32 = 50;

/// Google Calendar adapter.
#[derive(Clone)]
pub struct GoogleCalendarAdapter {
    oauth: GoogleOAuthClient,
    api_base: String,
}

impl GoogleCalendarAdapter {
    /// Create a new Google Calendar adapter.
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

    /// Override the REST API base (tests).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

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

    async fn api_send(
        &self,
        method: reqwest::Method,
        access_token: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, AdapterError> {
        let mut request = self
            .oauth
            .http_client()
            .request(method, format!("{}{path}", self.api_base))
            .bearer_auth(access_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        // DELETE answers 204 with an empty body.
        if response.status().as_u16() == 204 {
            return Ok(Value::Null);
        }
        read_api_json(response).await
    }
}

#[async_trait]
impl ProviderAdapter for GoogleCalendarAdapter {
    fn name(&self) -> &'static str {
        "google-calendar"
    }

    fn display_name(&self) -> &'static str {
        "Google Calendar"
    }

    fn category(&self) -> &'static str {
        "calendar"
    }

    fn translate_scopes(&self, scopes: &[String]) -> Vec<String> {
        scopes
            .iter()
            .map(|scope| match scope.as_str() {
                "calendar.read" => {
                    "https://www.googleapis.com/auth/calendar.readonly".to_string()
                }
                "calendar.write" => {
                    "https://www.googleapis.com/auth/calendar.events".to_string()
                }
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
        let calendar_id = calendar_id(&params);

        if let Some(id) = params.get("id").and_then(Value::as_str) {
            let raw = self
                .api_get(
                    &handle.access_token,
                    &format!("/calendars/{calendar_id}/events/{id}"),
                )
                .await?;
            let event = normalize_event(&raw, &calendar_id, true)?;
            return serde_json::to_value(event)
                .map_err(|e| AdapterError::Malformed(e.to_string()));
        }

        let max_results = params
            .get("maxResults")
            .and_then(Value::as_u64)
            .map_or(25, |v| u32::try_from(v).unwrap_or(MAX_LIST_RESULTS))
            .min(MAX_LIST_RESULTS);

        let mut path = format!(
            "/calendars/{calendar_id}/events?singleEvents=true&orderBy=startTime&maxResults={max_results}"
        );
        if let Some(time_min) = params.get("timeMin").and_then(Value::as_str) {
            path.push_str(&format!("&timeMin={}", urlencoding::encode(time_min)));
        }
        if let Some(time_max) = params.get("timeMax").and_then(Value::as_str) {
            path.push_str(&format!("&timeMax={}", urlencoding::encode(time_max)));
        }
        if let Some(token) = params.get("pageToken").and_then(Value::as_str) {
            path.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let listing = self.api_get(&handle.access_token, &path).await?;
        let items = listing
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut events = Vec::with_capacity(items.len());
        for raw in &items {
            events.push(normalize_event(raw, &calendar_id, false)?);
        }

        let page = Page {
            items: events,
            next_page_token: listing
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(String::from),
            result_size_estimate: None,
        };
        serde_json::to_value(page).map_err(|e| AdapterError::Malformed(e.to_string()))
    }

    async fn create(
        &self,
        handle: &ConnectionHandle,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let calendar_id = calendar_id(&params);
        let body = event_body(&params)?;
        if body.get("summary").is_none() {
            return Err(AdapterError::InvalidParams(
                "'summary' is required to create an event".to_string(),
            ));
        }
        if body.get("start").is_none() || body.get("end").is_none() {
            return Err(AdapterError::InvalidParams(
                "'start' and 'end' are required to create an event".to_string(),
            ));
        }

        let raw = self
            .api_send(
                reqwest::Method::POST,
                &handle.access_token,
                &format!("/calendars/{calendar_id}/events"),
                Some(&body),
            )
            .await?;

        let event = normalize_event(&raw, &calendar_id, true)?;
        serde_json::to_value(event).map_err(|e| AdapterError::Malformed(e.to_string()))
    }

    async fn update(
        &self,
        handle: &ConnectionHandle,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let calendar_id = calendar_id(&params);
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::InvalidParams("'id' is required".to_string()))?
            .to_string();

        let body = event_body(&params)?;
        if body.as_object().is_some_and(Map::is_empty) {
            return Err(AdapterError::InvalidParams(
                "nothing to update: provide event fields".to_string(),
            ));
        }

        let raw = self
            .api_send(
                reqwest::Method::PATCH,
                &handle.access_token,
                &format!("/calendars/{calendar_id}/events/{id}"),
                Some(&body),
            )
            .await?;

        let event = normalize_event(&raw, &calendar_id, true)?;
        serde_json::to_value(event).map_err(|e| AdapterError::Malformed(e.to_string()))
    }

    async fn delete(
        &self,
        handle: &ConnectionHandle,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let calendar_id = calendar_id(&params);
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::InvalidParams("'id' is required".to_string()))?;

        self.api_send(
            reqwest::Method::DELETE,
            &handle.access_token,
            &format!("/calendars/{calendar_id}/events/{id}"),
            None,
        )
        .await?;

        Ok(json!({ "id": id, "deleted": true }))
    }
}

/// The target calendar, defaulting to the user's primary calendar.
fn calendar_id(params: &Value) -> String {
    params
        .get("calendarId")
        .and_then(Value::as_str)
        .unwrap_or("primary")
        .to_string()
}

/// Project the writable event fields out of verb parameters.
fn event_body(params: &Value) -> Result<Value, AdapterError> {
    let mut body = Map::new();
    for field in ["summary", "description", "location", "start", "end", "attendees"] {
        if let Some(value) = params.get(field) {
            body.insert(field.to_string(), value.clone());
        }
    }
    Ok(Value::Object(body))
}

/// Normalize a Google Calendar event resource into the common schema.
fn normalize_event(
    raw: &Value,
    calendar_id: &str,
    include_raw: bool,
) -> Result<NormalizedEvent, AdapterError> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::Malformed("event missing id".to_string()))?
        .to_string();

    let status = match raw.get("status").and_then(Value::as_str) {
        Some("tentative") => EventStatus::Tentative,
        Some("cancelled") => EventStatus::Cancelled,
        _ => EventStatus::Confirmed,
    };

    let attendees = raw
        .get("attendees")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(parse_attendee).collect())
        .unwrap_or_default();

    Ok(NormalizedEvent {
        id,
        provider: "google-calendar".to_string(),
        calendar_id: calendar_id.to_string(),
        summary: raw
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        description: raw
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        location: raw
            .get("location")
            .and_then(Value::as_str)
            .map(String::from),
        start: parse_event_time(raw.get("start")),
        end: parse_event_time(raw.get("end")),
        attendees,
        organizer: raw.get("organizer").and_then(parse_attendee),
        status,
        html_link: raw
            .get("htmlLink")
            .and_then(Value::as_str)
            .map(String::from),
        raw: include_raw.then(|| raw.clone()),
    })
}

/// Parse a `start`/`end` boundary: a timed instant or an all-day date.
fn parse_event_time(value: Option<&Value>) -> EventTime {
    let date_time = value
        .and_then(|v| v.get("dateTime"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    EventTime {
        date_time,
        date: value
            .and_then(|v| v.get("date"))
            .and_then(Value::as_str)
            .map(String::from),
        time_zone: value
            .and_then(|v| v.get("timeZone"))
            .and_then(Value::as_str)
            .map(String::from),
    }
}

/// Parse an attendee or organizer entry; entries without an email are dropped.
fn parse_attendee(value: &Value) -> Option<EventAttendee> {
    Some(EventAttendee {
        email: value.get("email")?.as_str()?.to_string(),
        name: value
            .get("displayName")
            .and_then(Value::as_str)
            .map(String::from),
        response_status: value
            .get("responseStatus")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GoogleCalendarAdapter {
        GoogleCalendarAdapter::new(ProviderCredentials {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        })
    }

    fn sample_event() -> Value {
        json!({
            "id": "ev-1",
            "status": "confirmed",
            "summary": "Planning",
            "description": "Quarterly planning",
            "location": "Room 4",
            "htmlLink": "https://calendar.google.com/event?eid=abc",
            "start": {"dateTime": "2026-03-02T10:00:00Z", "timeZone": "UTC"},
            "end": {"dateTime": "2026-03-02T11:00:00Z", "timeZone": "UTC"},
            "organizer": {"email": "host@example.com", "displayName": "Host"},
            "attendees": [
                {"email": "a@example.com", "responseStatus": "accepted"},
                {"email": "b@example.com", "displayName": "Bee", "responseStatus": "needsAction"},
            ],
        })
    }

    #[test]
    fn test_scope_translation() {
        let scopes = adapter().translate_scopes(&[
            "calendar.read".to_string(),
            "calendar.write".to_string(),
            "custom.scope".to_string(),
        ]);

        assert_eq!(
            scopes,
            vec![
                "https://www.googleapis.com/auth/calendar.readonly",
                "https://www.googleapis.com/auth/calendar.events",
                "custom.scope",
            ]
        );
    }

    #[test]
    fn test_authorization_url_translates_scopes() {
        let url = adapter().build_authorization_url(
            "https://broker.example.com/v1/oauth/callback",
            &["calendar.read".to_string()],
            "state-token",
            "pkce-challenge",
        );

        assert!(url.contains("calendar.readonly"));
        assert!(url.contains("code_challenge_method=S256"));
    }

    #[test]
    fn test_normalize_event_full() {
        let event = normalize_event(&sample_event(), "primary", false).unwrap();

        assert_eq!(event.id, "ev-1");
        assert_eq!(event.calendar_id, "primary");
        assert_eq!(event.summary, "Planning");
        assert_eq!(event.status, EventStatus::Confirmed);
        assert_eq!(event.attendees.len(), 2);
        assert_eq!(event.attendees[1].name.as_deref(), Some("Bee"));
        assert_eq!(
            event.organizer.as_ref().map(|o| o.email.as_str()),
            Some("host@example.com")
        );
        assert_eq!(
            event.start.date_time.unwrap().to_rfc3339(),
            "2026-03-02T10:00:00+00:00"
        );
        assert!(event.raw.is_none());
    }

    #[test]
    fn test_normalize_all_day_event() {
        let raw = json!({
            "id": "ev-2",
            "summary": "Offsite",
            "start": {"date": "2026-03-02"},
            "end": {"date": "2026-03-03"},
        });

        let event = normalize_event(&raw, "primary", false).unwrap();
        assert!(event.start.date_time.is_none());
        assert_eq!(event.start.date.as_deref(), Some("2026-03-02"));
    }

    #[test]
    fn test_normalize_event_missing_id_is_malformed() {
        assert!(normalize_event(&json!({"summary": "x"}), "primary", false).is_err());
    }

    #[test]
    fn test_attendees_without_email_are_dropped() {
        let raw = json!({
            "id": "ev-3",
            "summary": "x",
            "start": {"date": "2026-03-02"},
            "end": {"date": "2026-03-03"},
            "attendees": [{"displayName": "No Address"}, {"email": "ok@example.com"}],
        });

        let event = normalize_event(&raw, "primary", false).unwrap();
        assert_eq!(event.attendees.len(), 1);
        assert_eq!(event.attendees[0].email, "ok@example.com");
    }

    #[test]
    fn test_event_body_projects_writable_fields() {
        let params = json!({
            "id": "ev-1",
            "calendarId": "team",
            "summary": "New title",
            "attendees": [{"email": "a@example.com"}],
            "junk": true,
        });

        let body = event_body(&params).unwrap();
        let obj = body.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("summary"));
        assert!(obj.contains_key("attendees"));
        assert!(!obj.contains_key("junk"));
        assert!(!obj.contains_key("id"));
    }

    #[test]
    fn test_calendar_id_defaults_to_primary() {
        assert_eq!(calendar_id(&json!({})), "primary");
        assert_eq!(calendar_id(&json!({"calendarId": "team"})), "team");
    }
}
