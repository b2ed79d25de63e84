//! Cross-repository scenario tests: flows that span both concrete entity
//! types and exercise relationship reads against version chains.

use crate::database::Database;
use crate::error::StoreError;
use crate::language::{self, Language, LanguageChange, LanguageRepository};
use crate::profile::{self, Profile, ProfileChange, ProfileRepository};

async fn test_db() -> (Database, ProfileRepository, LanguageRepository) {
    let db = Database::new_in_memory().await.unwrap();
    let profiles = ProfileRepository::new(db.pool().clone());
    let languages = LanguageRepository::new(db.pool().clone());
    (db, profiles, languages)
}

#[tokio::test]
async fn chain_grows_and_latest_tracks_head() {
    let (_db, _profiles, languages) = test_db().await;

    let v1 = languages
        .create_new(Language::new("Kiswahili", "Swahili"))
        .await
        .unwrap();
    let v2 = languages
        .add_version(
            &v1,
            &LanguageChange {
                iso639_3: Some(Some("swa".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let v3 = languages
        .add_version(
            &v2,
            &LanguageChange {
                ui_ready: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let versions = languages.versioned().get_versions(&v1.id).await.unwrap();
    assert_eq!(versions.len(), 3);

    let latest = languages.versioned().get_latest_of_all().await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0], v3);

    // Deleting the historical version-1 row (no dependents) does not move
    // the chain's head.
    languages.base().delete(&v1.id).await.unwrap();
    let latest = languages
        .versioned()
        .get_latest_of_one(&v1.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest, v3);
    assert_eq!(
        languages.versioned().get_versions(&v1.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn to_many_clear_then_set_replaces_target_set() {
    let (_db, profiles, languages) = test_db().await;

    let lang = languages
        .create_new(Language::new("isiZulu", "Zulu"))
        .await
        .unwrap();
    let x = profiles
        .create_new(Profile::new("user_x", "password for x"))
        .await
        .unwrap();
    let y = profiles
        .create_new(Profile::new("user_y", "password for y"))
        .await
        .unwrap();
    let z = profiles
        .create_new(Profile::new("user_z", "password for z"))
        .await
        .unwrap();

    languages
        .base()
        .update_relation(&lang.id, &language::UI_USERS, &[x.id.as_str(), y.id.as_str()])
        .await
        .unwrap();
    languages
        .base()
        .update_relation(&lang.id, &language::UI_USERS, &[y.id.as_str(), z.id.as_str()])
        .await
        .unwrap();

    let mut attached: Vec<String> = languages
        .base()
        .get_related::<Profile>(&lang.id, &language::UI_USERS)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.username)
        .collect();
    attached.sort();
    assert_eq!(attached, vec!["user_y", "user_z"]);

    // x was detached, not deleted.
    let x_now = profiles.base().get_by_id(&x.id).await.unwrap().unwrap();
    assert_eq!(x_now.ui_language_id, None);
}

#[tokio::test]
async fn to_many_read_ignores_superseded_holders() {
    let (_db, profiles, languages) = test_db().await;

    let lang = languages
        .create_new(Language::new("isiZulu", "Zulu"))
        .await
        .unwrap();
    let v1 = profiles
        .create_new(Profile::new("amos", "correct horse battery"))
        .await
        .unwrap();
    languages
        .base()
        .update_relation(&lang.id, &language::UI_USERS, &[v1.id.as_str()])
        .await
        .unwrap();

    let holders = languages
        .base()
        .get_related::<Profile>(&lang.id, &language::UI_USERS)
        .await
        .unwrap();
    assert_eq!(holders.len(), 1);

    // A new version dropping the FK supersedes the v1 row; the stale row
    // still carries the column but must no longer surface the edge.
    let v1_current = profiles.base().get_by_id(&v1.id).await.unwrap().unwrap();
    profiles
        .add_version(
            &v1_current,
            &ProfileChange {
                ui_language_id: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let holders = languages
        .base()
        .get_related::<Profile>(&lang.id, &language::UI_USERS)
        .await
        .unwrap();
    assert!(holders.is_empty());
}

#[tokio::test]
async fn many_to_many_reads_resolve_latest_target_versions() {
    let (_db, profiles, languages) = test_db().await;

    let amos = profiles
        .create_new(Profile::new("amos", "correct horse battery"))
        .await
        .unwrap();
    let zulu = languages
        .create_new(Language::new("isiZulu", "Zulu"))
        .await
        .unwrap();
    let akan = languages
        .create_new(Language::new("Akan", "Akan"))
        .await
        .unwrap();

    profiles
        .base()
        .update_relation(&amos.id, &profile::SPOKEN_LANGUAGES, &[zulu.id.as_str(), akan.id.as_str()])
        .await
        .unwrap();

    // The junction row keeps pointing at the zulu v1 row; reads must still
    // surface the chain's current head.
    languages
        .add_version(
            &zulu,
            &LanguageChange {
                ui_ready: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let spoken = profiles
        .base()
        .get_related::<Language>(&amos.id, &profile::SPOKEN_LANGUAGES)
        .await
        .unwrap();
    assert_eq!(spoken.len(), 2);
    let zulu_now = spoken
        .iter()
        .find(|l| l.version_chain_id == zulu.version_chain_id)
        .unwrap();
    assert_eq!(zulu_now.version_num, 2);
    assert!(zulu_now.ui_ready);

    // And the reverse edge sees amos.
    let speakers = languages
        .base()
        .get_related::<Profile>(&zulu.id, &language::SPEAKERS)
        .await
        .unwrap();
    assert_eq!(speakers.len(), 1);
    assert_eq!(speakers[0].username, "amos");
}

#[tokio::test]
async fn to_one_read_resolves_latest_creator_version() {
    let (_db, profiles, languages) = test_db().await;

    let amos = profiles
        .create_new(Profile::new("amos", "correct horse battery"))
        .await
        .unwrap();
    let mut lang = Language::new("isiZulu", "Zulu");
    lang.creator_id = Some(amos.id.clone());
    let lang = languages.create_new(lang).await.unwrap();

    // The FK still points at the v1 row after amos renames.
    profiles
        .add_version(
            &amos,
            &ProfileChange {
                username: Some("amos_k".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let creator = languages
        .base()
        .get_related::<Profile>(&lang.id, &language::CREATOR)
        .await
        .unwrap();
    assert_eq!(creator.len(), 1);
    assert_eq!(creator[0].username, "amos_k");
    assert_eq!(creator[0].version_num, 2);
}

#[tokio::test]
async fn to_one_is_not_writable_through_update_relation() {
    let (_db, profiles, languages) = test_db().await;

    let amos = profiles
        .create_new(Profile::new("amos", "correct horse battery"))
        .await
        .unwrap();
    let lang = languages
        .create_new(Language::new("isiZulu", "Zulu"))
        .await
        .unwrap();

    let err = languages
        .base()
        .update_relation(&lang.id, &language::CREATOR, &[amos.id.as_str()])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedRelation("creator")));

    // The FK is set through a plain field update instead.
    let updated = languages
        .base()
        .update(
            &lang,
            &LanguageChange {
                creator_id: Some(Some(amos.id.clone())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.creator_id.as_deref(), Some(amos.id.as_str()));
}

#[tokio::test]
async fn cross_entity_referential_guard() {
    let (_db, profiles, languages) = test_db().await;

    let lang = languages
        .create_new(Language::new("isiZulu", "Zulu"))
        .await
        .unwrap();
    let amos = profiles
        .create_new(Profile::new("amos", "correct horse battery"))
        .await
        .unwrap();
    profiles
        .base()
        .update(
            &amos,
            &ProfileChange {
                ui_language_id: Some(Some(lang.id.clone())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // A referenced language row cannot be deleted.
    let err = languages.base().delete(&lang.id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::ReferentialIntegrity {
            table: "language",
            references: "profile.ui_language_id",
        }
    ));
    assert!(languages.base().get_by_id(&lang.id).await.unwrap().is_some());

    // Detaching the reference unblocks the delete.
    let amos = profiles.base().get_by_id(&amos.id).await.unwrap().unwrap();
    profiles
        .base()
        .update(
            &amos,
            &ProfileChange {
                ui_language_id: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    languages.base().delete(&lang.id).await.unwrap();
    assert!(languages.base().get_by_id(&lang.id).await.unwrap().is_none());
}

#[tokio::test]
async fn relation_reads_agree_across_owner_versions() {
    let (_db, profiles, languages) = test_db().await;

    let lang_v1 = languages
        .create_new(Language::new("isiZulu", "Zulu"))
        .await
        .unwrap();
    let amos = profiles
        .create_new(Profile::new("amos", "correct horse battery"))
        .await
        .unwrap();
    languages
        .base()
        .update_relation(&lang_v1.id, &language::UI_USERS, &[amos.id.as_str()])
        .await
        .unwrap();

    // The edge is keyed by the v1 row id; after the owner chain advances,
    // the head and the superseded row must report the same holder set.
    let lang_v2 = languages
        .add_version(
            &lang_v1,
            &LanguageChange {
                ui_ready: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let via_head = languages
        .base()
        .get_related::<Profile>(&lang_v2.id, &language::UI_USERS)
        .await
        .unwrap();
    let via_old = languages
        .base()
        .get_related::<Profile>(&lang_v1.id, &language::UI_USERS)
        .await
        .unwrap();
    assert_eq!(via_head.len(), 1);
    assert_eq!(via_old.len(), 1);
    assert_eq!(via_head[0].username, "amos");

    // Same chain-wide agreement for junction edges.
    profiles
        .base()
        .update_relation(&amos.id, &profile::SPOKEN_LANGUAGES, &[lang_v1.id.as_str()])
        .await
        .unwrap();
    let amos_v2 = profiles
        .add_version(
            &amos,
            &ProfileChange {
                ui_language_id: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let spoken_via_head = profiles
        .base()
        .get_related::<Language>(&amos_v2.id, &profile::SPOKEN_LANGUAGES)
        .await
        .unwrap();
    assert_eq!(spoken_via_head.len(), 1);
    assert_eq!(spoken_via_head[0].version_chain_id, lang_v1.version_chain_id);
}

#[tokio::test]
async fn update_relation_through_head_detaches_edges_from_older_rows() {
    let (_db, profiles, languages) = test_db().await;

    let lang_v1 = languages
        .create_new(Language::new("isiZulu", "Zulu"))
        .await
        .unwrap();
    let amos = profiles
        .create_new(Profile::new("amos", "correct horse battery"))
        .await
        .unwrap();
    languages
        .base()
        .update_relation(&lang_v1.id, &language::UI_USERS, &[amos.id.as_str()])
        .await
        .unwrap();

    let lang_v2 = languages
        .add_version(
            &lang_v1,
            &LanguageChange {
                ui_ready: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Clearing through the head id also detaches the edge attached via v1.
    languages
        .base()
        .update_relation(&lang_v2.id, &language::UI_USERS, &[])
        .await
        .unwrap();
    assert!(languages
        .base()
        .get_related::<Profile>(&lang_v1.id, &language::UI_USERS)
        .await
        .unwrap()
        .is_empty());
    let amos = profiles.base().get_by_id(&amos.id).await.unwrap().unwrap();
    assert_eq!(amos.ui_language_id, None);
}

#[tokio::test]
async fn update_relation_rejects_dangling_targets() {
    let (_db, profiles, languages) = test_db().await;

    let lang = languages
        .create_new(Language::new("isiZulu", "Zulu"))
        .await
        .unwrap();
    let amos = profiles
        .create_new(Profile::new("amos", "correct horse battery"))
        .await
        .unwrap();
    languages
        .base()
        .update_relation(&lang.id, &language::UI_USERS, &[amos.id.as_str()])
        .await
        .unwrap();

    // A missing target fails the whole replacement; the previous set stays.
    let err = languages
        .base()
        .update_relation(
            &lang.id,
            &language::UI_USERS,
            &[amos.id.as_str(), "no-such-profile"],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
    let holders = languages
        .base()
        .get_related::<Profile>(&lang.id, &language::UI_USERS)
        .await
        .unwrap();
    assert_eq!(holders.len(), 1);

    // Junction edges get the same guard even though the insert itself
    // would have succeeded.
    let err = profiles
        .base()
        .update_relation(&amos.id, &profile::SPOKEN_LANGUAGES, &["no-such-language"])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
    assert!(profiles
        .base()
        .get_related::<Language>(&amos.id, &profile::SPOKEN_LANGUAGES)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn destroying_a_logical_entity_deletes_every_chain_row() {
    let (_db, _profiles, languages) = test_db().await;

    let v1 = languages
        .create_new(Language::new("Kiswahili", "Swahili"))
        .await
        .unwrap();
    let v2 = languages
        .add_version(
            &v1,
            &LanguageChange {
                ui_ready: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Each physical row is dependency-checked and deleted individually.
    for row in languages.versioned().get_versions(&v1.id).await.unwrap() {
        languages.base().delete(&row.id).await.unwrap();
    }
    assert_eq!(
        languages.versioned().get_latest_of_one(&v1.id).await.unwrap(),
        None
    );
    assert!(languages.base().get_by_id(&v2.id).await.unwrap().is_none());
    assert!(languages.versioned().get_latest_of_all().await.unwrap().is_empty());
}
