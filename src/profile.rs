//! User profiles: a versioned entity with credential handling.
//!
//! Usernames are human-chosen handles and must never collide, even with a
//! superseded version of another profile — uniqueness scans every physical
//! row, exempting only the record's own chain. Passwords are stored as
//! argon2 PHC strings; hashing happens in `prepare_for_insert` and
//! verification happens in application code after the row is fetched, never
//! inside a query.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::repo::{
    now_timestamp, DependencyCheck, EntityPolicy, Patch, Record, Relationship, Repository,
    SqliteQuery, VersionedPolicy, VersionedRecord, VersionedRepository,
};

/// FK on `profile` pointing at the interface language. Read-only through the
/// generic relation path; set `ui_language_id` via `update` instead.
pub const UI_LANGUAGE: Relationship = Relationship::ToOne {
    name: "ui_language",
    column: "ui_language_id",
    target_table: "language",
    target_versioned: true,
};

/// Languages this profile speaks, through the `profile_language` junction.
pub const SPOKEN_LANGUAGES: Relationship = Relationship::ManyToMany {
    name: "spoken_languages",
    junction: "profile_language",
    from_field: "profile_id",
    to_field: "language_id",
    target_table: "language",
    target_versioned: true,
    owner_versioned: true,
};

const DEPENDENCY_CHECKS: &[DependencyCheck] = &[
    DependencyCheck {
        references: "language.creator_id",
        query: "SELECT COUNT(*) FROM language WHERE creator_id = ?",
    },
    DependencyCheck {
        references: "profile_language",
        query: "SELECT COUNT(*) FROM profile_language WHERE profile_id = ?",
    },
    // Audit entries are keyed by the denormalized username, not the row id.
    DependencyCheck {
        references: "activity_log",
        query: "SELECT COUNT(*) FROM activity_log \
                WHERE username = (SELECT username FROM profile WHERE id = ?)",
    },
];

/// One physical row of the `profile` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub rev: i64,
    pub created_at: i64,
    pub last_updated: i64,
    pub username: String,
    /// Argon2 PHC string after `prepare_for_insert`.
    pub password: String,
    pub ui_language_id: Option<String>,
    pub version_num: i64,
    pub version_chain_id: String,
}

impl Profile {
    /// A profile ready for `create_new`; the engine columns are stamped on
    /// insert and the plaintext password is hashed by the policy.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            id: String::new(),
            rev: 0,
            created_at: 0,
            last_updated: 0,
            username: username.to_string(),
            password: password.to_string(),
            ui_language_id: None,
            version_num: 0,
            version_chain_id: String::new(),
        }
    }
}

/// Partial change set for profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileChange {
    pub username: Option<String>,
    pub password: Option<String>,
    /// `Some(None)` clears the interface language.
    pub ui_language_id: Option<Option<String>>,
}

impl Patch for ProfileChange {
    fn columns(&self) -> Vec<&'static str> {
        let mut columns = Vec::new();
        if self.username.is_some() {
            columns.push("username");
        }
        if self.password.is_some() {
            columns.push("password");
        }
        if self.ui_language_id.is_some() {
            columns.push("ui_language_id");
        }
        columns
    }

    fn bind<'q>(&'q self, mut query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        if let Some(username) = &self.username {
            query = query.bind(username);
        }
        if let Some(password) = &self.password {
            query = query.bind(password);
        }
        if let Some(ui_language_id) = &self.ui_language_id {
            query = query.bind(ui_language_id);
        }
        query
    }
}

impl Record for Profile {
    type Change = ProfileChange;

    const TABLE: &'static str = "profile";
    const COLUMNS: &'static [&'static str] = &[
        "username",
        "password",
        "ui_language_id",
        "version_num",
        "version_chain_id",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn rev(&self) -> i64 {
        self.rev
    }

    fn set_rev(&mut self, rev: i64) {
        self.rev = rev;
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn last_updated(&self) -> i64 {
        self.last_updated
    }

    fn set_timestamps(&mut self, created_at: i64, last_updated: i64) {
        self.created_at = created_at;
        self.last_updated = last_updated;
    }

    fn apply(&mut self, change: &ProfileChange) {
        if let Some(username) = &change.username {
            self.username = username.clone();
        }
        if let Some(password) = &change.password {
            self.password = password.clone();
        }
        if let Some(ui_language_id) = &change.ui_language_id {
            self.ui_language_id = ui_language_id.clone();
        }
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(&self.username)
            .bind(&self.password)
            .bind(&self.ui_language_id)
            .bind(self.version_num)
            .bind(&self.version_chain_id)
    }

    fn chain_bootstrap(&self) -> bool {
        self.version_num == 1 && self.version_chain_id.is_empty()
    }
}

impl VersionedRecord for Profile {
    fn version_num(&self) -> i64 {
        self.version_num
    }

    fn version_chain_id(&self) -> &str {
        &self.version_chain_id
    }

    fn set_version(&mut self, version_num: i64, chain_id: String) {
        self.version_num = version_num;
        self.version_chain_id = chain_id;
    }
}

/// Validation and preparation rules for profiles.
pub struct ProfilePolicy;

impl ProfilePolicy {
    fn is_hashed(password: &str) -> bool {
        password.starts_with("$argon2")
    }
}

impl EntityPolicy<Profile> for ProfilePolicy {
    fn prepare_for_insert(&self, record: &mut Profile) -> Result<(), StoreError> {
        if Self::is_hashed(&record.password) {
            // Version appends carry the existing hash forward untouched.
            return Ok(());
        }
        if record.password.trim().is_empty() {
            return Err(StoreError::Validation("password is required".into()));
        }
        let salt = SaltString::generate(&mut OsRng);
        record.password = Argon2::default()
            .hash_password(record.password.as_bytes(), &salt)
            .map_err(|e| StoreError::Validation(format!("failed to hash password: {e}")))?
            .to_string();
        Ok(())
    }

    async fn validate_insert(
        &self,
        pool: &SqlitePool,
        record: &Profile,
    ) -> Result<(), StoreError> {
        if record.username.trim().len() < 3 {
            return Err(StoreError::Validation(
                "username must be at least 3 characters".into(),
            ));
        }

        // The handle must be free across every row ever written, except the
        // record's own chain: a new version re-using its chain's username is
        // not a collision. Compared by chain id, never by row id.
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM profile WHERE username = ? AND version_chain_id != ?",
        )
        .bind(&record.username)
        .bind(&record.version_chain_id)
        .fetch_one(pool)
        .await?;
        if count > 0 {
            return Err(StoreError::Validation(format!(
                "username '{}' is already taken",
                record.username
            )));
        }
        Ok(())
    }

    async fn validate_update(
        &self,
        pool: &SqlitePool,
        id: &str,
        change: &ProfileChange,
    ) -> Result<(), StoreError> {
        if change.password.is_some() {
            // In-place writes would bypass the hashing in prepare_for_insert.
            return Err(StoreError::Validation(
                "password changes must go through update_password".into(),
            ));
        }
        if let Some(username) = &change.username {
            if username.trim().len() < 3 {
                return Err(StoreError::Validation(
                    "username must be at least 3 characters".into(),
                ));
            }
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM profile WHERE username = ? \
                 AND version_chain_id != (SELECT version_chain_id FROM profile WHERE id = ?)",
            )
            .bind(username)
            .bind(id)
            .fetch_one(pool)
            .await?;
            if count > 0 {
                return Err(StoreError::Validation(format!(
                    "username '{username}' is already taken"
                )));
            }
        }
        Ok(())
    }

    fn after_update(&self, record: &Profile) {
        tracing::debug!(id = %record.id, username = %record.username, "profile updated");
    }

    fn dependency_checks(&self) -> &'static [DependencyCheck] {
        DEPENDENCY_CHECKS
    }
}

impl VersionedPolicy<Profile> for ProfilePolicy {
    fn default_order_by(&self) -> &'static str {
        "username"
    }
}

const LATEST_BY_USERNAME: &str = "SELECT t1.* FROM profile t1 \
     INNER JOIN (\
         SELECT version_chain_id, MAX(version_num) AS max_version \
         FROM profile GROUP BY version_chain_id\
     ) t2 ON t1.version_chain_id = t2.version_chain_id \
     AND t1.version_num = t2.max_version \
     WHERE t1.username = ?";

/// Repository for [`Profile`] entities.
pub struct ProfileRepository {
    repo: VersionedRepository<Profile, ProfilePolicy>,
}

impl ProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            repo: VersionedRepository::new(pool, ProfilePolicy),
        }
    }

    /// Version-chain operations.
    pub fn versioned(&self) -> &VersionedRepository<Profile, ProfilePolicy> {
        &self.repo
    }

    /// Base CRUD and relationship operations.
    pub fn base(&self) -> &Repository<Profile, ProfilePolicy> {
        self.repo.base()
    }

    pub async fn create_new(&self, profile: Profile) -> Result<Profile, StoreError> {
        self.repo.create_new(profile).await
    }

    pub async fn add_version(
        &self,
        base: &Profile,
        change: &ProfileChange,
    ) -> Result<Profile, StoreError> {
        self.repo.add_version(base, change).await
    }

    /// Look up the latest-version row for `username` and verify the password
    /// against its stored hash. The comparison runs here, post-fetch, with
    /// the same shape whether or not the password matches.
    pub async fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Profile>, StoreError> {
        let profile: Option<Profile> = sqlx::query_as(LATEST_BY_USERNAME)
            .bind(username)
            .fetch_optional(self.base().pool())
            .await?;
        let Some(profile) = profile else {
            return Ok(None);
        };
        let Ok(parsed) = PasswordHash::new(&profile.password) else {
            tracing::warn!(username, "stored password hash is malformed");
            return Ok(None);
        };
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(Some(profile)),
            Err(_) => Ok(None),
        }
    }

    /// Rotate the password by appending a new version carrying the new hash;
    /// prior versions keep their old hash in history.
    pub async fn update_password(
        &self,
        base: &Profile,
        new_password: &str,
    ) -> Result<Profile, StoreError> {
        self.repo
            .add_version(
                base,
                &ProfileChange {
                    password: Some(new_password.to_string()),
                    ..Default::default()
                },
            )
            .await
    }

    /// Append an audit entry for this profile's username.
    pub async fn record_activity(&self, username: &str, action: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO activity_log (username, action, logged_at) VALUES (?, ?, ?)")
            .bind(username)
            .bind(action)
            .bind(now_timestamp())
            .execute(self.base().pool())
            .await?;
        Ok(())
    }
}
