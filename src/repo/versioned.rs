//! Version-chain semantics layered on top of the base repository.
//!
//! A logical entity is a chain of physical rows sharing `version_chain_id`;
//! "current state" is the row with the chain's maximum `version_num`.
//! Editing never rewrites a row: [`VersionedRepository::add_version`] appends
//! a sibling carrying the merged field set. Appends are guarded by a
//! chain-level optimistic check, so two writers holding the same stale base
//! cannot both produce a "next" version.

use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::repo::base::{fetch_in_tx, insert_record, EntityPolicy, Repository};
use crate::repo::record::VersionedRecord;
use crate::repo::{generate_id, now_timestamp};

/// Policy for a versioned entity: everything an [`EntityPolicy`] supplies,
/// plus the column that orders [`VersionedRepository::get_latest_of_all`].
pub trait VersionedPolicy<R: VersionedRecord>: EntityPolicy<R> {
    /// Column used to present the latest-of-all listing in a stable,
    /// human-meaningful order.
    fn default_order_by(&self) -> &'static str;
}

/// Repository for entities stored as append-only version chains.
///
/// All base operations remain available through [`base`](Self::base);
/// deletion in particular stays per-physical-row and is never chain-aware.
pub struct VersionedRepository<R, P> {
    base: Repository<R, P>,
}

impl<R, P> VersionedRepository<R, P>
where
    R: VersionedRecord,
    P: VersionedPolicy<R>,
{
    pub fn new(pool: SqlitePool, policy: P) -> Self {
        Self {
            base: Repository::new(pool, policy),
        }
    }

    /// The underlying base repository (CRUD, relationships, deletion).
    pub fn base(&self) -> &Repository<R, P> {
        &self.base
    }

    /// Start a new chain: the record becomes its own version-1 row and the
    /// insert transaction points `version_chain_id` at the generated id.
    pub async fn create_new(&self, mut record: R) -> Result<R, StoreError> {
        record.set_version(1, String::new());
        self.base.create(record).await
    }

    /// Append a new version to `base_row`'s chain.
    ///
    /// The new row carries `version_num = base + 1`, the same chain id, and
    /// the base's fields overlaid with `change`. Inside the insert
    /// transaction the chain's current head is re-checked against the base;
    /// if someone else appended in the meantime the call fails with
    /// [`StoreError::Conflict`] instead of leaving two divergent heads.
    pub async fn add_version(&self, base_row: &R, change: &R::Change) -> Result<R, StoreError> {
        let mut record = base_row.clone();
        record.apply(change);
        record.set_version(
            base_row.version_num() + 1,
            base_row.version_chain_id().to_string(),
        );

        self.base.policy().prepare_for_insert(&mut record)?;
        self.base
            .policy()
            .validate_insert(self.base.pool(), &record)
            .await?;

        let now = now_timestamp();
        record.set_id(generate_id());
        record.set_rev(1);
        record.set_timestamps(now, now);

        let mut tx = self.base.pool().begin().await?;

        // Chain-level optimistic guard: the base must still be the head.
        let head_sql = format!(
            "SELECT MAX(version_num) FROM {} WHERE version_chain_id = ?",
            R::TABLE
        );
        let (head,): (Option<i64>,) = sqlx::query_as(&head_sql)
            .bind(record.version_chain_id())
            .fetch_one(&mut *tx)
            .await?;
        let head = head.ok_or(StoreError::NotFound)?;
        if head != base_row.version_num() {
            tracing::warn!(
                table = R::TABLE,
                chain = record.version_chain_id(),
                base_version = base_row.version_num(),
                head,
                "stale base for version append"
            );
            return Err(StoreError::Conflict);
        }

        insert_record(&mut tx, &record).await?;
        let created = fetch_in_tx::<R>(&mut tx, record.id()).await?;
        tx.commit().await?;

        tracing::debug!(
            table = R::TABLE,
            chain = created.version_chain_id(),
            version = created.version_num(),
            "appended version"
        );
        Ok(created)
    }

    /// Current state of one chain: the row with the chain's maximum
    /// `version_num`, or `None` for an unknown chain.
    pub async fn get_latest_of_one(&self, chain_id: &str) -> Result<Option<R>, StoreError> {
        let sql = format!(
            "SELECT t1.* FROM {table} t1 \
             INNER JOIN (\
                 SELECT MAX(version_num) AS max_version \
                 FROM {table} WHERE version_chain_id = ?\
             ) t2 ON t1.version_num = t2.max_version \
             WHERE t1.version_chain_id = ?",
            table = R::TABLE
        );
        let record = sqlx::query_as::<_, R>(&sql)
            .bind(chain_id)
            .bind(chain_id)
            .fetch_optional(self.base.pool())
            .await?;
        Ok(record)
    }

    /// Current state of every chain: one max-version row per distinct
    /// `version_chain_id`, ordered by the policy's default ordering column.
    pub async fn get_latest_of_all(&self) -> Result<Vec<R>, StoreError> {
        let sql = format!(
            "SELECT t1.* FROM {table} t1 \
             INNER JOIN (\
                 SELECT version_chain_id, MAX(version_num) AS max_version \
                 FROM {table} GROUP BY version_chain_id\
             ) t2 ON t1.version_chain_id = t2.version_chain_id \
             AND t1.version_num = t2.max_version \
             ORDER BY {order_by}",
            table = R::TABLE,
            order_by = self.base.policy().default_order_by()
        );
        let records = sqlx::query_as::<_, R>(&sql)
            .fetch_all(self.base.pool())
            .await?;
        Ok(records)
    }

    /// Full history of one chain, newest first.
    pub async fn get_versions(&self, chain_id: &str) -> Result<Vec<R>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} WHERE version_chain_id = ? ORDER BY version_num DESC",
            R::TABLE
        );
        let records = sqlx::query_as::<_, R>(&sql)
            .bind(chain_id)
            .fetch_all(self.base.pool())
            .await?;
        Ok(records)
    }
}
