//! Generic repository layer.
//!
//! ## Structure
//!
//! | Type | Role |
//! |------|------|
//! | [`Record`] / [`VersionedRecord`] | table name, column list, field binding for one entity shape |
//! | [`Patch`] | partial field set for in-place updates and version appends |
//! | [`EntityPolicy`] / [`VersionedPolicy`] | per-entity validation, preparation and dependency checks |
//! | [`Relationship`] | declared to-one / to-many / many-to-many edge |
//! | [`Repository`] | generic CRUD, optimistic-lock updates, relationship plumbing |
//! | [`VersionedRepository`] | append-only version chains layered on the base repository |
//!
//! ## Concurrency contract
//!
//! There is no in-memory locking. Multi-statement consistency comes from
//! SQLite transactions; lost-update protection comes from the `rev` check in
//! [`Repository::update`] and the chain-head check in
//! [`VersionedRepository::add_version`]. Two concurrent writers race and
//! exactly one wins; the loser observes [`StoreError::Conflict`] and must
//! re-read.
//!
//! [`StoreError::Conflict`]: crate::StoreError::Conflict

mod base;
mod record;
mod relation;
#[cfg(test)]
mod scenarios;
mod versioned;

pub use base::{EntityPolicy, Repository};
pub use record::{Patch, Record, SqliteQuery, VersionedRecord};
pub use relation::{DependencyCheck, Relationship};
pub use versioned::{VersionedPolicy, VersionedRepository};

use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a fresh row id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Get the current unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
