//! Request-processing services behind the handlers.

pub mod dispatch;
pub mod oauth;
