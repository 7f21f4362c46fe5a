//! Common response schemas adapters normalize into.
//!
//! Fields with no semantic analog at a provider are omitted (`None`), never
//! defaulted. The `raw` field preserves the untranslated payload for callers
//! that need provider-specific detail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Message body in one or both representations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// A message attachment reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Normalized mail message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub provider: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<MessageBody>,
    pub from: Address,
    pub to: Vec<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<Address>>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

/// A calendar time boundary: either a timed instant or an all-day date.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// An event attendee with response state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAttendee {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

/// Event status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// Normalized calendar event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub id: String,
    pub provider: String,
    pub calendar_id: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub attendees: Vec<EventAttendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer: Option<EventAttendee>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

/// Paginated result wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_size_estimate: Option<u64>,
}

/// Parse an RFC 5322 mailbox like `Jane Doe <jane@example.com>`.
///
/// Bare addresses parse with no display name; a missing angle form falls back
/// to treating the whole string as the address.
#[must_use]
pub fn parse_mailbox(value: &str) -> Address {
    let trimmed = value.trim();
    if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
        if open < close {
            let email = trimmed[open + 1..close].trim().to_string();
            let name = trimmed[..open].trim().trim_matches('"').to_string();
            return Address {
                email,
                name: if name.is_empty() { None } else { Some(name) },
            };
        }
    }
    Address {
        email: trimmed.to_string(),
        name: None,
    }
}

/// Parse a comma-separated mailbox list header.
#[must_use]
pub fn parse_mailbox_list(value: &str) -> Vec<Address> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_mailbox)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mailbox_with_name() {
        let addr = parse_mailbox("Jane Doe <jane@example.com>");
        assert_eq!(addr.email, "jane@example.com");
        assert_eq!(addr.name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_parse_mailbox_quoted_name() {
        let addr = parse_mailbox("\"Doe, Jane\" <jane@example.com>");
        assert_eq!(addr.email, "jane@example.com");
        assert_eq!(addr.name.as_deref(), Some("Doe, Jane"));
    }

    #[test]
    fn test_parse_mailbox_bare_address() {
        let addr = parse_mailbox("jane@example.com");
        assert_eq!(addr.email, "jane@example.com");
        assert!(addr.name.is_none());
    }

    #[test]
    fn test_parse_mailbox_list() {
        let addrs = parse_mailbox_list("a@x.com, Bob <b@x.com>");
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].email, "a@x.com");
        assert_eq!(addrs[1].name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_message_omits_absent_fields() {
        let msg = NormalizedMessage {
            id: "m1".to_string(),
            thread_id: None,
            provider: "gmail".to_string(),
            subject: "Hello".to_string(),
            snippet: None,
            body: None,
            from: Address {
                email: "a@x.com".to_string(),
                name: None,
            },
            to: vec![],
            cc: None,
            timestamp: Utc::now(),
            is_read: false,
            labels: vec![],
            attachments: None,
            raw: None,
        };

        let json = serde_json::to_value(&msg).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("threadId"));
        assert!(!obj.contains_key("snippet"));
        assert!(!obj.contains_key("raw"));
        assert!(obj.contains_key("isRead"));
    }

    #[test]
    fn test_page_serializes_camel_case() {
        let page = Page {
            items: vec![1, 2, 3],
            next_page_token: Some("abc".to_string()),
            result_size_estimate: Some(3),
        };
        let json = serde_json::to_value(&page).unwrap();
        assert!(json.get("nextPageToken").is_some());
        assert!(json.get("resultSizeEstimate").is_some());
    }
}
