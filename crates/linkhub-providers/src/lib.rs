//! Provider adapter framework for the LinkHub broker.
//!
//! Every third-party service sits behind a value implementing
//! [`ProviderAdapter`]: the uniform verbs (`fetch`, `create`, `update`,
//! `delete`) plus the OAuth operations (authorization URL, code exchange,
//! refresh) and an error-normalization hook. Adapters are registered once at
//! process start into a read-only name-keyed [`AdapterRegistry`].
//!
//! Normalized response schemas live in [`normalized`]; adapters translate
//! provider payloads into them, omitting fields with no semantic analog and
//! optionally preserving the untranslated payload in `raw`. Two reference
//! adapters ship here: Gmail (mail) and Google Calendar (calendar), sharing
//! the OAuth plumbing in [`google`].

pub mod adapter;
pub mod calendar;
pub mod error;
pub mod gmail;
pub mod google;
pub mod normalized;
pub mod registry;
pub mod types;

pub use adapter::ProviderAdapter;
pub use calendar::GoogleCalendarAdapter;
pub use error::{AdapterError, ProviderFault};
pub use gmail::GmailAdapter;
pub use normalized::{Address, NormalizedEvent, NormalizedMessage, Page};
pub use registry::AdapterRegistry;
pub use types::{ConnectionHandle, ProviderCredentials, ProviderUser, TokenGrant, Verb};
