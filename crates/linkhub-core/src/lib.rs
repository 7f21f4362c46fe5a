//! Core types shared across the LinkHub broker.
//!
//! This crate is dependency-light on purpose: it holds the strongly typed
//! identifiers and the broker-wide error taxonomy that every other crate
//! (database, token manager, adapters, HTTP surface) builds on.

pub mod error;
pub mod ids;

pub use error::{BrokerError, ErrorCode, Result};
pub use ids::{
    ApiKeyId, ConnectionId, DeliveryId, EndUserId, EventId, OAuthStateId, ParseIdError, ProjectId,
    SubscriptionId,
};
