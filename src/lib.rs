//! chainstore: an embedded, append-only, versioned entity store over SQLite.
//!
//! ## Storage model
//!
//! Every logical entity is a *version chain* of physical rows sharing a
//! `version_chain_id`; the chain's max-`version_num` row is its current
//! state. Editing appends a row instead of rewriting one, so the full
//! history of every entity stays queryable. In-place field updates (for
//! chain-internal corrections and non-versioned entities) are guarded by a
//! `rev` optimistic-lock check; version appends are guarded by a chain-head
//! check. Deletion is per physical row and blocked while any declared
//! dependency still references the target.
//!
//! ## Layers
//!
//! | Type | Role |
//! |------|------|
//! | [`Database`] | SQLite pool, WAL mode, embedded migrations |
//! | [`Repository`] | generic CRUD + relationship plumbing over one table |
//! | [`VersionedRepository`] | version-chain operations on top of the base |
//! | [`ProfileRepository`], [`LanguageRepository`] | concrete entity repositories |
//!
//! ## Example
//!
//! ```no_run
//! use chainstore::{Database, Language, LanguageChange, LanguageRepository};
//!
//! # async fn demo() -> Result<(), chainstore::StoreError> {
//! let db = Database::open(std::path::Path::new("app.db")).await?;
//! let languages = LanguageRepository::new(db.pool().clone());
//!
//! let v1 = languages.create_new(Language::new("isiZulu", "Zulu")).await?;
//! let v2 = languages
//!     .add_version(&v1, &LanguageChange { ui_ready: Some(true), ..Default::default() })
//!     .await?;
//! assert_eq!(v2.version_num, 2);
//! # Ok(())
//! # }
//! ```

mod database;
mod error;
pub mod language;
pub mod profile;
pub mod repo;

pub use database::Database;
pub use error::StoreError;
pub use language::{Language, LanguageChange, LanguageRepository};
pub use profile::{Profile, ProfileChange, ProfileRepository};
pub use repo::{
    DependencyCheck, EntityPolicy, Patch, Record, Relationship, Repository, VersionedPolicy,
    VersionedRecord, VersionedRepository,
};
