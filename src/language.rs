//! Languages: a versioned entity with declared relationships on both sides.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::repo::{
    DependencyCheck, EntityPolicy, Patch, Record, Relationship, Repository, SqliteQuery,
    VersionedPolicy, VersionedRecord, VersionedRepository,
};

/// FK on `language` pointing at the profile that created it.
pub const CREATOR: Relationship = Relationship::ToOne {
    name: "creator",
    column: "creator_id",
    target_table: "profile",
    target_versioned: true,
};

/// Profiles using this language for their interface: the back-reference
/// lives on `profile.ui_language_id`.
pub const UI_USERS: Relationship = Relationship::ToMany {
    name: "ui_users",
    table: "profile",
    foreign_key: "ui_language_id",
    target_versioned: true,
    owner_versioned: true,
};

/// Profiles who speak this language, through the `profile_language` junction.
pub const SPEAKERS: Relationship = Relationship::ManyToMany {
    name: "speakers",
    junction: "profile_language",
    from_field: "language_id",
    to_field: "profile_id",
    target_table: "profile",
    target_versioned: true,
    owner_versioned: true,
};

const DEPENDENCY_CHECKS: &[DependencyCheck] = &[
    DependencyCheck {
        references: "profile.ui_language_id",
        query: "SELECT COUNT(*) FROM profile WHERE ui_language_id = ?",
    },
    DependencyCheck {
        references: "profile_language",
        query: "SELECT COUNT(*) FROM profile_language WHERE language_id = ?",
    },
];

/// One physical row of the `language` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Language {
    pub id: String,
    pub rev: i64,
    pub created_at: i64,
    pub last_updated: i64,
    pub native_name: String,
    pub english_name: String,
    /// ISO 639-3 code, exactly 3 characters when present.
    pub iso639_3: Option<String>,
    pub ui_ready: bool,
    pub creator_id: Option<String>,
    pub version_num: i64,
    pub version_chain_id: String,
}

impl Language {
    pub fn new(native_name: &str, english_name: &str) -> Self {
        Self {
            id: String::new(),
            rev: 0,
            created_at: 0,
            last_updated: 0,
            native_name: native_name.to_string(),
            english_name: english_name.to_string(),
            iso639_3: None,
            ui_ready: false,
            creator_id: None,
            version_num: 0,
            version_chain_id: String::new(),
        }
    }
}

/// Partial change set for languages.
#[derive(Debug, Clone, Default)]
pub struct LanguageChange {
    pub native_name: Option<String>,
    pub english_name: Option<String>,
    /// `Some(None)` clears the code.
    pub iso639_3: Option<Option<String>>,
    pub ui_ready: Option<bool>,
    /// `Some(None)` detaches the creator.
    pub creator_id: Option<Option<String>>,
}

impl Patch for LanguageChange {
    fn columns(&self) -> Vec<&'static str> {
        let mut columns = Vec::new();
        if self.native_name.is_some() {
            columns.push("native_name");
        }
        if self.english_name.is_some() {
            columns.push("english_name");
        }
        if self.iso639_3.is_some() {
            columns.push("iso639_3");
        }
        if self.ui_ready.is_some() {
            columns.push("ui_ready");
        }
        if self.creator_id.is_some() {
            columns.push("creator_id");
        }
        columns
    }

    fn bind<'q>(&'q self, mut query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        if let Some(native_name) = &self.native_name {
            query = query.bind(native_name);
        }
        if let Some(english_name) = &self.english_name {
            query = query.bind(english_name);
        }
        if let Some(iso639_3) = &self.iso639_3 {
            query = query.bind(iso639_3);
        }
        if let Some(ui_ready) = self.ui_ready {
            query = query.bind(ui_ready);
        }
        if let Some(creator_id) = &self.creator_id {
            query = query.bind(creator_id);
        }
        query
    }
}

impl Record for Language {
    type Change = LanguageChange;

    const TABLE: &'static str = "language";
    const COLUMNS: &'static [&'static str] = &[
        "native_name",
        "english_name",
        "iso639_3",
        "ui_ready",
        "creator_id",
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

    fn apply(&mut self, change: &LanguageChange) {
        if let Some(native_name) = &change.native_name {
            self.native_name = native_name.clone();
        }
        if let Some(english_name) = &change.english_name {
            self.english_name = english_name.clone();
        }
        if let Some(iso639_3) = &change.iso639_3 {
            self.iso639_3 = iso639_3.clone();
        }
        if let Some(ui_ready) = change.ui_ready {
            self.ui_ready = ui_ready;
        }
        if let Some(creator_id) = &change.creator_id {
            self.creator_id = creator_id.clone();
        }
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(&self.native_name)
            .bind(&self.english_name)
            .bind(&self.iso639_3)
            .bind(self.ui_ready)
            .bind(&self.creator_id)
            .bind(self.version_num)
            .bind(&self.version_chain_id)
    }

    fn chain_bootstrap(&self) -> bool {
        self.version_num == 1 && self.version_chain_id.is_empty()
    }
}

impl VersionedRecord for Language {
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

/// Validation rules for languages.
pub struct LanguagePolicy;

fn validate_names(native_name: &str, english_name: &str) -> Result<(), StoreError> {
    if native_name.trim().is_empty() {
        return Err(StoreError::Validation("native name is required".into()));
    }
    if english_name.trim().is_empty() {
        return Err(StoreError::Validation("english name is required".into()));
    }
    Ok(())
}

fn validate_iso_code(code: Option<&str>) -> Result<(), StoreError> {
    if let Some(code) = code {
        if code.chars().count() != 3 {
            return Err(StoreError::Validation(
                "ISO 639-3 code must be exactly 3 characters".into(),
            ));
        }
    }
    Ok(())
}

impl EntityPolicy<Language> for LanguagePolicy {
    async fn validate_insert(
        &self,
        pool: &SqlitePool,
        record: &Language,
    ) -> Result<(), StoreError> {
        validate_names(&record.native_name, &record.english_name)?;
        validate_iso_code(record.iso639_3.as_deref())?;

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM language WHERE english_name = ? AND version_chain_id != ?",
        )
        .bind(&record.english_name)
        .bind(&record.version_chain_id)
        .fetch_one(pool)
        .await?;
        if count > 0 {
            return Err(StoreError::Validation(format!(
                "language '{}' already exists",
                record.english_name
            )));
        }
        Ok(())
    }

    async fn validate_update(
        &self,
        _pool: &SqlitePool,
        _id: &str,
        change: &LanguageChange,
    ) -> Result<(), StoreError> {
        if let Some(native_name) = &change.native_name {
            if native_name.trim().is_empty() {
                return Err(StoreError::Validation("native name is required".into()));
            }
        }
        if let Some(english_name) = &change.english_name {
            if english_name.trim().is_empty() {
                return Err(StoreError::Validation("english name is required".into()));
            }
        }
        if let Some(iso639_3) = &change.iso639_3 {
            validate_iso_code(iso639_3.as_deref())?;
        }
        Ok(())
    }

    fn dependency_checks(&self) -> &'static [DependencyCheck] {
        DEPENDENCY_CHECKS
    }
}

impl VersionedPolicy<Language> for LanguagePolicy {
    fn default_order_by(&self) -> &'static str {
        "native_name"
    }
}

/// Repository for [`Language`] entities.
pub struct LanguageRepository {
    repo: VersionedRepository<Language, LanguagePolicy>,
}

impl LanguageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            repo: VersionedRepository::new(pool, LanguagePolicy),
        }
    }

    /// Version-chain operations.
    pub fn versioned(&self) -> &VersionedRepository<Language, LanguagePolicy> {
        &self.repo
    }

    /// Base CRUD and relationship operations.
    pub fn base(&self) -> &Repository<Language, LanguagePolicy> {
        self.repo.base()
    }

    pub async fn create_new(&self, language: Language) -> Result<Language, StoreError> {
        self.repo.create_new(language).await
    }

    pub async fn add_version(
        &self,
        base: &Language,
        change: &LanguageChange,
    ) -> Result<Language, StoreError> {
        self.repo.add_version(base, change).await
    }
}
