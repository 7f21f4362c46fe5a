//! Lifecycle event types and the in-process publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection lifecycle events projects can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "connection.created")]
    ConnectionCreated,
    #[serde(rename = "connection.expired")]
    ConnectionExpired,
    #[serde(rename = "connection.revoked")]
    ConnectionRevoked,
    #[serde(rename = "connection.error")]
    ConnectionError,
}

impl EventType {
    /// All supported event types.
    #[must_use]
    pub fn all() -> Vec<Self> {
        vec![
            Self::ConnectionCreated,
            Self::ConnectionExpired,
            Self::ConnectionRevoked,
            Self::ConnectionError,
        ]
    }

    /// The string form used in payloads and subscription filters.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionCreated => "connection.created",
            Self::ConnectionExpired => "connection.expired",
            Self::ConnectionRevoked => "connection.revoked",
            Self::ConnectionError => "connection.error",
        }
    }

    /// Parse the string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connection.created" => Some(Self::ConnectionCreated),
            "connection.expired" => Some(Self::ConnectionExpired),
            "connection.revoked" => Some(Self::ConnectionRevoked),
            "connection.error" => Some(Self::ConnectionError),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event emitted by the broker, pre-fanout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Unique per emission; subscribers deduplicate on this.
    pub event_id: Uuid,
    pub event_type: EventType,
    pub project_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload: connection id, provider, user id, scopes.
    pub data: serde_json::Value,
}

impl LifecycleEvent {
    /// Build a new event stamped now.
    #[must_use]
    pub fn new(event_type: EventType, project_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            project_id,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Publisher that hands events to the delivery worker over a broadcast channel.
#[derive(Clone)]
pub struct EventPublisher {
    sender: tokio::sync::broadcast::Sender<LifecycleEvent>,
}

impl EventPublisher {
    /// Create a publisher with the given channel capacity.
    pub fn new(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<LifecycleEvent>) {
        let (sender, receiver) = tokio::sync::broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Publish an event. Fire-and-forget: a missing worker is logged, not an error.
    pub fn publish(&self, event: LifecycleEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::warn!(
                target: "webhook_delivery",
                error = %e,
                "No active webhook worker to receive event"
            );
        }
    }

    /// Get a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for event_type in EventType::all() {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn test_event_type_serde_wire_form() {
        let json = serde_json::to_string(&EventType::ConnectionRevoked).unwrap();
        assert_eq!(json, "\"connection.revoked\"");
    }

    #[test]
    fn test_unknown_event_type() {
        assert_eq!(EventType::parse("connection.sideways"), None);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let (publisher, mut rx) = EventPublisher::new(8);
        let event = LifecycleEvent::new(
            EventType::ConnectionCreated,
            Uuid::new_v4(),
            serde_json::json!({"connectionId": "conn_x"}),
        );

        publisher.publish(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, event.event_id);
        assert_eq!(received.event_type, EventType::ConnectionCreated);
    }
}
