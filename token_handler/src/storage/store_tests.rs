//! Behaviour every engine must show, run against each engine's test store.

use chrono::{DateTime, Duration, Utc};

use super::{SessionRecord, SessionStore, StoreError};

pub(crate) fn record(subject: &str, expires_in_secs: i64) -> SessionRecord {
    let expires_at = DateTime::from_timestamp(Utc::now().timestamp() + expires_in_secs, 0)
        .expect("timestamp in range");
    SessionRecord {
        subject: subject.to_string(),
        access_token: format!("{subject}-access"),
        refresh_token: format!("{subject}-refresh"),
        id_token: format!("{subject}-id"),
        expires_at,
    }
}

pub(crate) async fn run_contract(store: &dyn SessionStore) {
    // Start from an empty table.
    store.purge(Utc::now() + Duration::days(36500)).await.unwrap();

    purge_removes_only_past_records(store).await;
    add_then_get_round_trips(store).await;
    add_rejects_empty_fields(store).await;
    update_replaces_tokens(store).await;
    update_with_other_subject_is_refused(store).await;
    update_of_missing_session_is_not_found(store).await;
    delete_is_idempotent(store).await;
}

async fn purge_removes_only_past_records(store: &dyn SessionStore) {
    // Given three past and two future records
    for i in 0..3 {
        store.add(&record(&format!("past{i}"), -120)).await.unwrap();
    }
    let future_a = store.add(&record("future-a", 600)).await.unwrap();
    let future_b = store.add(&record("future-b", 600)).await.unwrap();

    // When purging with cutoff now
    let removed = store.purge(Utc::now()).await.unwrap();

    // Then exactly the past ones are gone
    assert_eq!(removed, 3);
    assert!(store.get(&future_a).await.is_ok());
    assert!(store.get(&future_b).await.is_ok());

    // And purging again removes nothing
    assert_eq!(store.purge(Utc::now()).await.unwrap(), 0);

    store.delete(&future_a).await.unwrap();
    store.delete(&future_b).await.unwrap();
}

async fn add_then_get_round_trips(store: &dyn SessionStore) {
    let original = record("alice", 300);
    let id = store.add(&original).await.unwrap();

    assert!(uuid::Uuid::parse_str(&id).is_ok());
    assert_eq!(store.get(&id).await.unwrap(), original);

    let other = store.add(&original).await.unwrap();
    assert_ne!(id, other);

    store.delete(&id).await.unwrap();
    store.delete(&other).await.unwrap();
}

async fn add_rejects_empty_fields(store: &dyn SessionStore) {
    let mut empty_subject = record("x", 60);
    empty_subject.subject.clear();
    let mut empty_access = record("x", 60);
    empty_access.access_token.clear();
    let mut empty_refresh = record("x", 60);
    empty_refresh.refresh_token.clear();
    let mut empty_id = record("x", 60);
    empty_id.id_token.clear();

    for bad in [empty_subject, empty_access, empty_refresh, empty_id] {
        assert!(matches!(
            store.add(&bad).await,
            Err(StoreError::ConstraintViolation(_))
        ));
    }
}

async fn update_replaces_tokens(store: &dyn SessionStore) {
    let id = store.add(&record("dave", 60)).await.unwrap();

    let mut refreshed = record("dave", 900);
    refreshed.access_token = "dave-access-2".to_string();
    store.update(&id, &refreshed).await.unwrap();

    assert_eq!(store.get(&id).await.unwrap(), refreshed);
    store.delete(&id).await.unwrap();
}

async fn update_with_other_subject_is_refused(store: &dyn SessionStore) {
    // Given a session of alice
    let original = record("alice", 60);
    let id = store.add(&original).await.unwrap();

    // When trying to overwrite it with mallory's tokens
    let result = store.update(&id, &record("mallory", 600)).await;

    // Then the update is refused and the record is untouched
    assert_eq!(result, Err(StoreError::SubjectMismatch));
    assert_eq!(store.get(&id).await.unwrap(), original);
    store.delete(&id).await.unwrap();
}

async fn update_of_missing_session_is_not_found(store: &dyn SessionStore) {
    let missing = uuid::Uuid::new_v4().to_string();
    assert_eq!(
        store.update(&missing, &record("alice", 60)).await,
        Err(StoreError::NotFound)
    );

    let mut invalid = record("alice", 60);
    invalid.access_token.clear();
    assert!(matches!(
        store.update(&missing, &invalid).await,
        Err(StoreError::ConstraintViolation(_))
    ));
}

async fn delete_is_idempotent(store: &dyn SessionStore) {
    let id = store.add(&record("erin", 60)).await.unwrap();
    store.delete(&id).await.unwrap();
    store.delete(&id).await.unwrap();
    assert_eq!(store.get(&id).await, Err(StoreError::NotFound));

    store
        .delete(&uuid::Uuid::new_v4().to_string())
        .await
        .unwrap();
}
