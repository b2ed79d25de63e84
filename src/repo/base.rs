//! Generic table-oriented repository: CRUD, optimistic-lock updates,
//! relationship plumbing and dependency-checked deletion.

use std::future::Future;
use std::marker::PhantomData;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::StoreError;
use crate::repo::record::{Patch, Record};
use crate::repo::relation::{DependencyCheck, Relationship};
use crate::repo::{generate_id, now_timestamp};

/// Per-entity validation and preparation, injected into a [`Repository`].
///
/// These are the extension points a concrete repository supplies instead of
/// overriding methods: credential hashing in `prepare_for_insert`,
/// required-field and uniqueness rules in `validate_insert`, and the list of
/// count-queries that must come back zero before a row may be deleted.
pub trait EntityPolicy<R: Record>: Send + Sync {
    /// Mutate the record before insert (hash a credential, stamp defaults).
    fn prepare_for_insert(&self, _record: &mut R) -> Result<(), StoreError> {
        Ok(())
    }

    /// Reject the record before any write is attempted.
    fn validate_insert(
        &self,
        pool: &SqlitePool,
        record: &R,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Validate a partial change against the row identified by `id`.
    fn validate_update(
        &self,
        _pool: &SqlitePool,
        _id: &str,
        _change: &R::Change,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Ok(()) }
    }

    /// Called after a successful in-place update.
    fn after_update(&self, _record: &R) {}

    /// Count-queries run inside the delete transaction; any non-zero count
    /// aborts the delete.
    fn dependency_checks(&self) -> &'static [DependencyCheck] {
        &[]
    }
}

/// Generic repository over one table, parameterized by the entity shape `R`
/// and its policy `P`.
pub struct Repository<R, P> {
    pool: SqlitePool,
    policy: P,
    _record: PhantomData<fn() -> R>,
}

pub(crate) fn insert_sql<R: Record>() -> String {
    let mut columns = vec!["id", "rev", "created_at", "last_updated"];
    columns.extend_from_slice(R::COLUMNS);
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        R::TABLE,
        columns.join(", "),
        placeholders
    )
}

/// Insert one row inside an open transaction, binding the engine columns
/// first and the declared data columns after.
pub(crate) async fn insert_record<R: Record>(
    tx: &mut Transaction<'_, Sqlite>,
    record: &R,
) -> Result<(), StoreError> {
    let sql = insert_sql::<R>();
    let query = sqlx::query(&sql)
        .bind(record.id())
        .bind(record.rev())
        .bind(record.created_at())
        .bind(record.last_updated());
    let query = record.bind_columns(query);
    query.execute(&mut **tx).await?;
    Ok(())
}

/// Re-read one row by id inside an open transaction.
pub(crate) async fn fetch_in_tx<R: Record>(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<R, StoreError> {
    let sql = format!("SELECT * FROM {} WHERE id = ?", R::TABLE);
    let record = sqlx::query_as::<_, R>(&sql)
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(record)
}

impl<R, P> Repository<R, P>
where
    R: Record,
    P: EntityPolicy<R>,
{
    pub fn new(pool: SqlitePool, policy: P) -> Self {
        Self {
            pool,
            policy,
            _record: PhantomData,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn policy(&self) -> &P {
        &self.policy
    }

    /// Single-row lookup. Absence is not an error.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<R>, StoreError> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", R::TABLE);
        let record = sqlx::query_as::<_, R>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Unfiltered scan: every physical row of the table, historical versions
    /// included.
    pub async fn get_all(&self) -> Result<Vec<R>, StoreError> {
        let sql = format!("SELECT * FROM {}", R::TABLE);
        let records = sqlx::query_as::<_, R>(&sql).fetch_all(&self.pool).await?;
        Ok(records)
    }

    /// Insert a new row with a fresh id, `rev = 1` and stamped timestamps.
    ///
    /// For the version-1 row of a new chain the same transaction points
    /// `version_chain_id` back at the generated id.
    pub async fn create(&self, mut record: R) -> Result<R, StoreError> {
        self.policy.prepare_for_insert(&mut record)?;
        self.policy.validate_insert(&self.pool, &record).await?;

        let now = now_timestamp();
        record.set_id(generate_id());
        record.set_rev(1);
        record.set_timestamps(now, now);

        let mut tx = self.pool.begin().await?;
        insert_record(&mut tx, &record).await?;
        if record.chain_bootstrap() {
            let sql = format!(
                "UPDATE {} SET version_chain_id = ? WHERE id = ?",
                R::TABLE
            );
            sqlx::query(&sql)
                .bind(record.id())
                .bind(record.id())
                .execute(&mut *tx)
                .await?;
        }
        let created = fetch_in_tx::<R>(&mut tx, record.id()).await?;
        tx.commit().await?;

        tracing::debug!(table = R::TABLE, id = created.id(), "created record");
        Ok(created)
    }

    /// Conditional in-place update of one physical row.
    ///
    /// `base` is the row as the caller last read it; its `rev` is the
    /// optimistic-lock token. The write is predicated on `{id, rev}` and
    /// stamps `rev + 1` plus a refreshed `last_updated`. If another writer
    /// advanced the row in the meantime the update affects zero rows and
    /// surfaces [`StoreError::Conflict`]; nothing is partially applied.
    pub async fn update(&self, base: &R, change: &R::Change) -> Result<R, StoreError> {
        if change.is_empty() {
            return Err(StoreError::Validation("update contains no fields".into()));
        }
        self.policy
            .validate_update(&self.pool, base.id(), change)
            .await?;

        let set_clause = change
            .columns()
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {set_clause}, rev = ?, last_updated = ? WHERE id = ? AND rev = ?",
            R::TABLE
        );

        let mut tx = self.pool.begin().await?;
        let query = change.bind(sqlx::query(&sql));
        let result = query
            .bind(base.rev() + 1)
            .bind(now_timestamp())
            .bind(base.id())
            .bind(base.rev())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            // Distinguish a vanished row from a lost optimistic race.
            let exists_sql = format!("SELECT rev FROM {} WHERE id = ?", R::TABLE);
            let current: Option<(i64,)> = sqlx::query_as(&exists_sql)
                .bind(base.id())
                .fetch_optional(&mut *tx)
                .await?;
            return match current {
                None => Err(StoreError::NotFound),
                Some(_) => {
                    tracing::warn!(
                        table = R::TABLE,
                        id = base.id(),
                        rev = base.rev(),
                        "optimistic lock conflict"
                    );
                    Err(StoreError::Conflict)
                }
            };
        }

        let updated = fetch_in_tx::<R>(&mut tx, base.id()).await?;
        tx.commit().await?;

        self.policy.after_update(&updated);
        Ok(updated)
    }

    /// Delete one physical row after every declared dependency check comes
    /// back zero. Deletion is not chain-aware: chain-mates stay untouched.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for check in self.policy.dependency_checks() {
            let (count,): (i64,) = sqlx::query_as(check.query)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            if count > 0 {
                tracing::warn!(
                    table = R::TABLE,
                    id,
                    references = check.references,
                    "delete blocked by dependency check"
                );
                return Err(StoreError::ReferentialIntegrity {
                    table: R::TABLE,
                    references: check.references,
                });
            }
        }

        let sql = format!("DELETE FROM {} WHERE id = ?", R::TABLE);
        let result = sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;

        tracing::debug!(table = R::TABLE, id, "deleted record");
        Ok(())
    }

    /// Read the rows on the far side of a declared relationship.
    pub async fn get_related<T: Record>(
        &self,
        id: &str,
        relationship: &Relationship,
    ) -> Result<Vec<T>, StoreError> {
        let sql = relationship.read_sql(R::TABLE);
        let related = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(related)
    }

    /// Replace the full target set of a to-many or many-to-many edge:
    /// clear everything currently attached (across the owner's whole chain),
    /// then attach each given target, all in one transaction. A target id
    /// that matches no row fails the whole call with
    /// [`StoreError::NotFound`] and leaves the previous set in place.
    /// To-one edges are not managed through this path; set their foreign-key
    /// column via [`update`](Self::update).
    pub async fn update_relation(
        &self,
        id: &str,
        relationship: &Relationship,
        targets: &[&str],
    ) -> Result<(), StoreError> {
        let (clear, attach) = match (relationship.clear_sql(R::TABLE), relationship.attach_sql())
        {
            (Some(clear), Some(attach)) => (clear, attach),
            _ => return Err(StoreError::UnsupportedRelation(relationship.name())),
        };
        let verify = relationship.verify_target_sql();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&clear).bind(id).execute(&mut *tx).await?;
        for target in targets {
            // Junction inserts succeed regardless of the target's existence,
            // so those edges get an explicit probe first.
            if let Some(verify) = &verify {
                let (count,): (i64,) = sqlx::query_as(verify)
                    .bind(target)
                    .fetch_one(&mut *tx)
                    .await?;
                if count == 0 {
                    return Err(StoreError::NotFound);
                }
            }
            let result = sqlx::query(&attach)
                .bind(id)
                .bind(target)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Timestamp of the row's last write, or `None` for a missing row.
    pub async fn get_time_last_activity(&self, id: &str) -> Result<Option<i64>, StoreError> {
        let sql = format!("SELECT last_updated FROM {} WHERE id = ?", R::TABLE);
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(ts,)| ts))
    }
}
