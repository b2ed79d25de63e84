//! Declared relationships and pre-delete dependency checks.
//!
//! Each edge is a tagged variant resolved at compile time by the concrete
//! repository that declares it, so there is no runtime "unknown relationship"
//! lookup. Reads against a versioned side always resolve through the
//! latest-row-per-chain join; a superseded version never appears to hold an
//! edge. The owner side resolves through its chain as well: an edge attached
//! via a superseded row id answers identically through any row of the chain.

/// A declared edge between two entity tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relationship {
    /// Foreign-key column on the owning table pointing at a row of the
    /// target table. Read-only through the generic path: callers set the
    /// column itself via `update`.
    ToOne {
        name: &'static str,
        /// FK column on the owning table.
        column: &'static str,
        target_table: &'static str,
        target_versioned: bool,
    },
    /// Foreign-key column on the related table pointing back at the owner.
    /// Managed with clear-then-set semantics.
    ToMany {
        name: &'static str,
        /// Table holding the back-reference.
        table: &'static str,
        foreign_key: &'static str,
        target_versioned: bool,
        owner_versioned: bool,
    },
    /// Edge mediated by a junction table with two foreign-key columns.
    /// Managed with clear-then-insert semantics.
    ManyToMany {
        name: &'static str,
        junction: &'static str,
        /// Junction column keyed by the owning entity's id.
        from_field: &'static str,
        /// Junction column holding the target row id.
        to_field: &'static str,
        target_table: &'static str,
        target_versioned: bool,
        owner_versioned: bool,
    },
}

/// Subquery picking the max-version row per chain of `table`.
fn latest_per_chain(table: &str) -> String {
    format!(
        "SELECT version_chain_id, MAX(version_num) AS max_version \
         FROM {table} GROUP BY version_chain_id"
    )
}

/// Predicate matching an owner-keyed column against the bound owner id.
///
/// A stored edge may be keyed by any physical row of the owner's chain, so
/// for a versioned owner the predicate expands the bound id to every row id
/// of its chain. One `?` either way.
fn owner_predicate(owner_table: &str, owner_versioned: bool) -> String {
    if owner_versioned {
        format!(
            "IN (SELECT id FROM {owner_table} WHERE version_chain_id = \
             (SELECT version_chain_id FROM {owner_table} WHERE id = ?))"
        )
    } else {
        "= ?".to_string()
    }
}

impl Relationship {
    pub fn name(&self) -> &'static str {
        match self {
            Relationship::ToOne { name, .. }
            | Relationship::ToMany { name, .. }
            | Relationship::ManyToMany { name, .. } => name,
        }
    }

    /// Build the read query for this edge, with one `?` bound to the owning
    /// entity's row id.
    pub fn read_sql(&self, owner_table: &str) -> String {
        match self {
            Relationship::ToOne {
                column,
                target_table,
                target_versioned: false,
                ..
            } => format!(
                "SELECT t.* FROM {target_table} t \
                 WHERE t.id = (SELECT {column} FROM {owner_table} WHERE id = ?)"
            ),
            // The FK may point at any physical row of the target chain;
            // resolve that row's chain and return the chain's current head.
            Relationship::ToOne {
                column,
                target_table,
                target_versioned: true,
                ..
            } => format!(
                "SELECT t.* FROM {target_table} t \
                 WHERE t.version_chain_id = (\
                     SELECT version_chain_id FROM {target_table} \
                     WHERE id = (SELECT {column} FROM {owner_table} WHERE id = ?)\
                 ) \
                 ORDER BY t.version_num DESC LIMIT 1"
            ),
            Relationship::ToMany {
                table,
                foreign_key,
                target_versioned: false,
                owner_versioned,
                ..
            } => format!(
                "SELECT t.* FROM {table} t WHERE t.{foreign_key} {owner}",
                owner = owner_predicate(owner_table, *owner_versioned),
            ),
            // Only chain heads can hold the back-reference; a superseded
            // version keeping the FK does not surface.
            Relationship::ToMany {
                table,
                foreign_key,
                target_versioned: true,
                owner_versioned,
                ..
            } => format!(
                "SELECT t1.* FROM {table} t1 \
                 INNER JOIN ({latest}) t2 \
                 ON t1.version_chain_id = t2.version_chain_id \
                 AND t1.version_num = t2.max_version \
                 WHERE t1.{foreign_key} {owner}",
                latest = latest_per_chain(table),
                owner = owner_predicate(owner_table, *owner_versioned),
            ),
            Relationship::ManyToMany {
                junction,
                from_field,
                to_field,
                target_table,
                target_versioned: false,
                owner_versioned,
                ..
            } => format!(
                "SELECT t.* FROM {target_table} t \
                 INNER JOIN {junction} j ON j.{to_field} = t.id \
                 WHERE j.{from_field} {owner}",
                owner = owner_predicate(owner_table, *owner_versioned),
            ),
            // Junction rows reference a physical row id; surface the current
            // head of each referenced chain.
            Relationship::ManyToMany {
                junction,
                from_field,
                to_field,
                target_table,
                target_versioned: true,
                owner_versioned,
                ..
            } => format!(
                "SELECT t1.* FROM {target_table} t1 \
                 INNER JOIN ({latest}) t2 \
                 ON t1.version_chain_id = t2.version_chain_id \
                 AND t1.version_num = t2.max_version \
                 WHERE t1.version_chain_id IN (\
                     SELECT tr.version_chain_id FROM {target_table} tr \
                     INNER JOIN {junction} j ON j.{to_field} = tr.id \
                     WHERE j.{from_field} {owner}\
                 )",
                latest = latest_per_chain(target_table),
                owner = owner_predicate(owner_table, *owner_versioned),
            ),
        }
    }

    /// Statement detaching everything currently related to the owner
    /// (one `?`: owner id). Detachment covers edges attached via any row of
    /// the owner's chain, not just the bound id. `None` for to-one edges.
    pub fn clear_sql(&self, owner_table: &str) -> Option<String> {
        match self {
            Relationship::ToOne { .. } => None,
            Relationship::ToMany {
                table,
                foreign_key,
                owner_versioned,
                ..
            } => Some(format!(
                "UPDATE {table} SET {foreign_key} = NULL WHERE {foreign_key} {owner}",
                owner = owner_predicate(owner_table, *owner_versioned),
            )),
            Relationship::ManyToMany {
                junction,
                from_field,
                owner_versioned,
                ..
            } => Some(format!(
                "DELETE FROM {junction} WHERE {from_field} {owner}",
                owner = owner_predicate(owner_table, *owner_versioned),
            )),
        }
    }

    /// Statement attaching one target (binds: owner id, then target id).
    /// `None` for to-one edges.
    pub fn attach_sql(&self) -> Option<String> {
        match self {
            Relationship::ToOne { .. } => None,
            Relationship::ToMany {
                table, foreign_key, ..
            } => Some(format!(
                "UPDATE {table} SET {foreign_key} = ? WHERE id = ?"
            )),
            Relationship::ManyToMany {
                junction,
                from_field,
                to_field,
                ..
            } => Some(format!(
                "INSERT INTO {junction} ({from_field}, {to_field}) VALUES (?, ?)"
            )),
        }
    }

    /// Existence probe for one target id (one `?`), run before attaching.
    /// `None` when the attach statement itself reports a missing target
    /// through its affected-row count.
    pub fn verify_target_sql(&self) -> Option<String> {
        match self {
            Relationship::ManyToMany { target_table, .. } => Some(format!(
                "SELECT COUNT(*) FROM {target_table} WHERE id = ?"
            )),
            _ => None,
        }
    }
}

/// One pre-delete dependency check: a COUNT(*) query with a single `?`
/// bound to the row id about to be deleted. A non-zero count blocks the
/// delete.
#[derive(Debug, Clone, Copy)]
pub struct DependencyCheck {
    /// What holds the reference, used in the error message.
    pub references: &'static str,
    pub query: &'static str,
}
