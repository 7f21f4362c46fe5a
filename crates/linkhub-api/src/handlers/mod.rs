//! HTTP handlers.

pub mod connections;
pub mod dispatch;
pub mod oauth;
pub mod webhooks;
