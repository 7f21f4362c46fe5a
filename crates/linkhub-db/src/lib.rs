//! PostgreSQL data access for the LinkHub broker.
//!
//! Row models own their query surface: each entity struct exposes associated
//! `async fn`s taking a `&PgPool`, so callers never hand-write SQL. The
//! broker's concurrency-sensitive operations live here too: the single-use
//! OAuth-state consumption (conditional update checked by affected rows) and
//! the connection upsert keyed on `(project, provider, end user)`.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use pool::{DbPool, DbPoolOptions};
