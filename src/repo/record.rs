//! Entity shape traits: how one struct maps onto one table.

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::Sqlite;

/// A positional-parameter query against SQLite, as produced by `sqlx::query`.
pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// One persisted entity shape, mapped onto a single table.
///
/// Every table carries the engine columns `id`, `rev`, `created_at` and
/// `last_updated`; [`COLUMNS`](Record::COLUMNS) lists only the declared data
/// columns (for versioned entities this includes `version_num` and
/// `version_chain_id`). [`bind_columns`](Record::bind_columns) must bind the
/// record's fields in exactly `COLUMNS` order.
pub trait Record:
    for<'r> sqlx::FromRow<'r, SqliteRow> + Clone + Send + Sync + Unpin + 'static
{
    /// Partial field set accepted by `update` and `add_version`.
    type Change: Patch;

    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);

    /// Optimistic-lock token for in-place updates. Starts at 1 on insert.
    fn rev(&self) -> i64;
    fn set_rev(&mut self, rev: i64);

    fn created_at(&self) -> i64;
    fn last_updated(&self) -> i64;
    fn set_timestamps(&mut self, created_at: i64, last_updated: i64);

    /// Overlay a partial change onto this record (used when appending a new
    /// version: unchanged fields are copied forward, changed fields override).
    fn apply(&mut self, change: &Self::Change);

    /// Bind the declared data columns, in `COLUMNS` order.
    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;

    /// True when the freshly inserted row must have its `version_chain_id`
    /// pointed back at its own id (version-1 row of a new chain). Always
    /// false for non-versioned entities.
    fn chain_bootstrap(&self) -> bool {
        false
    }
}

/// A [`Record`] whose table forms append-only version chains.
pub trait VersionedRecord: Record {
    /// Position within the chain, starting at 1.
    fn version_num(&self) -> i64;

    /// Id of the chain's version-1 row. Empty string until the insert
    /// transaction fixes it up for a brand-new chain.
    fn version_chain_id(&self) -> &str;

    fn set_version(&mut self, version_num: i64, chain_id: String);
}

/// A partial field set: which columns an update touches and how to bind them.
///
/// `columns` and `bind` must agree on order. An empty patch is rejected by
/// the repository before any statement runs.
pub trait Patch: Send + Sync {
    /// Columns set by this patch, in bind order.
    fn columns(&self) -> Vec<&'static str>;

    /// Bind the patch values, in [`columns`](Patch::columns) order.
    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;

    fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }
}
