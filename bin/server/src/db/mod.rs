//! Postgres implementations of the engine's storage ports.
//!
//! This module provides data access for:
//! - Follow-up records and their lifecycle events
//! - The business entities the engine reads (clients, quotes, invoices)
//! - Per-domain follow-up rules
//!
//! Repositories own a `PgPool` and convert rows through fallible
//! `try_into_*` functions so malformed stored data surfaces as a decode
//! error instead of a panic.

pub mod entity;
pub mod followup;
pub mod rule;

pub use entity::PgEntityGateway;
pub use followup::PgFollowUpStore;
pub use rule::PgRuleStore;

/// Wraps a row-level parse failure as a sqlx decode error.
pub(crate) fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}
