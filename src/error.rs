//! Error taxonomy for the store layer.
//!
//! Every write path runs inside a transaction, so any error below implies the
//! database was left untouched by the failed operation. `Conflict` and
//! `ReferentialIntegrity` are recoverable (re-read and retry, or remove the
//! referencing rows); `Sqlx`/`Io`/`Migration` are infrastructure failures and
//! are not retried internally.

/// Errors from the persistence engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A mutation targeted a row that does not exist. Plain reads return
    /// `Option` instead.
    #[error("record not found")]
    NotFound,

    /// A validation hook rejected the record before any write was attempted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An optimistic-lock check failed: the row's `rev` (or a version chain's
    /// head) advanced since it was read. Re-read and retry.
    #[error("record was modified by another writer")]
    Conflict,

    /// A pre-delete dependency check found rows still referencing the target.
    #[error("cannot delete from {table}: still referenced by {references}")]
    ReferentialIntegrity {
        table: &'static str,
        references: &'static str,
    },

    /// The named relationship is a to-one edge; set its foreign-key column
    /// through `update` instead of `update_relation`.
    #[error("relationship '{0}' cannot be managed through update_relation")]
    UnsupportedRelation(&'static str),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    /// True for optimistic-lock failures, which callers typically retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }

    /// True for domain validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}
