//! Persistence layer.
//!
//! SQLite-backed storage for routes, optimization results, health profiles,
//! run sessions and weekly budgets. State is cached in DashMaps and written
//! through on every change.

pub mod budgets;
pub mod db;
pub mod optimizations;
pub mod profiles;
pub mod routes;
pub mod sessions;

pub use db::{init_database, Database};

use chrono::{DateTime, Utc};

/// Stored timestamps are RFC 3339; unparseable values fall back to the epoch.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|err| {
            tracing::warn!(value = raw, error = %err, "Invalid stored timestamp");
            DateTime::<Utc>::default()
        })
}
