//! Strongly typed identifiers.
//!
//! Newtype wrappers around `Uuid` prevent accidental misuse of different id
//! kinds at compile time. `ConnectionId` additionally carries the `conn_`
//! prefix on its wire form, because that is the shape projects see and store.
//!
//! # Example
//!
//! ```
//! use linkhub_core::{ConnectionId, ProjectId};
//!
//! let project = ProjectId::new();
//! let conn = ConnectionId::new();
//!
//! assert!(conn.to_string().starts_with("conn_"));
//!
//! fn requires_project(id: ProjectId) -> String {
//!     id.to_string()
//! }
//! let _ = requires_project(project);
//! // requires_project(conn); // does not compile
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for id parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The id type that failed to parse.
    pub id_type: &'static str,
    /// The underlying parse error message.
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly typed UUID-backed id.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an id from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    message: e.to_string(),
                })
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifies a project (a platform customer's integration tenant).
    ProjectId
);

define_id!(
    /// Identifies an API-key pair belonging to a project.
    ApiKeyId
);

define_id!(
    /// Identifies an end user owned by a project.
    EndUserId
);

define_id!(
    /// Identifies a single-use OAuth authorization-in-progress record.
    OAuthStateId
);

define_id!(
    /// Identifies a webhook subscription.
    SubscriptionId
);

define_id!(
    /// Identifies a single webhook delivery attempt chain.
    DeliveryId
);

define_id!(
    /// Identifies an emitted lifecycle event.
    EventId
);

/// Wire prefix for connection ids.
const CONNECTION_ID_PREFIX: &str = "conn_";

/// Identifies a provider connection. Displays and parses as `conn_<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new random connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a connection id from an existing UUID (the database key).
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns a reference to the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{CONNECTION_ID_PREFIX}{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = s.strip_prefix(CONNECTION_ID_PREFIX).ok_or(ParseIdError {
            id_type: "ConnectionId",
            message: format!("missing '{CONNECTION_ID_PREFIX}' prefix"),
        })?;
        Uuid::parse_str(raw).map(Self).map_err(|e| ParseIdError {
            id_type: "ConnectionId",
            message: e.to_string(),
        })
    }
}

impl From<ConnectionId> for Uuid {
    fn from(id: ConnectionId) -> Uuid {
        id.0
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnectionId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ProjectId::new(), ProjectId::new());
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_project_id_round_trip() {
        let id = ProjectId::new();
        let parsed: ProjectId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_project_id_rejects_garbage() {
        let result = "not-a-uuid".parse::<ProjectId>();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().id_type, "ProjectId");
    }

    #[test]
    fn test_connection_id_display_has_prefix() {
        let id = ConnectionId::new();
        let s = id.to_string();
        assert!(s.starts_with("conn_"));
        assert_eq!(s.len(), "conn_".len() + 36);
    }

    #[test]
    fn test_connection_id_round_trip() {
        let id = ConnectionId::new();
        let parsed: ConnectionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_connection_id_rejects_bare_uuid() {
        let result = Uuid::new_v4().to_string().parse::<ConnectionId>();
        assert!(result.is_err());
    }

    #[test]
    fn test_connection_id_serde_uses_wire_form() {
        let id = ConnectionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with("\"conn_"));

        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
