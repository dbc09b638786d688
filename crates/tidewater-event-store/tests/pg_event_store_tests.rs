//! Integration tests for `PgEventStore`.

use sqlx::PgPool;
use tidewater_core::{AggregateEvent, AggregateInfo, DomainError, EventStore};
use tidewater_event_store::pg_event_store::PgEventStore;
use tidewater_test_support::{COUNTER, Created, Incremented, Noted, counter_events};
use uuid::Uuid;

fn store(pool: PgPool) -> PgEventStore {
    PgEventStore::new(pool, counter_events())
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn at(id: &str, version: u64) -> AggregateInfo {
    AggregateInfo::new(COUNTER, id).at_version(version)
}

fn history(id: &str) -> Vec<AggregateEvent> {
    vec![
        AggregateEvent::new(at(id, 1), Created(0)),
        AggregateEvent::new(at(id, 2), Incremented),
        AggregateEvent::new(
            at(id, 3),
            Noted {
                text: "halfway".into(),
            },
        ),
        AggregateEvent::new(at(id, 4), Incremented),
    ]
}

fn versions(events: &[AggregateEvent]) -> Vec<u64> {
    events.iter().map(|e| e.info().version).collect()
}

// --- write + read ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_find_all_events_returns_empty_vec_for_unknown_aggregate(pool: PgPool) {
    let store = store(pool);

    let events = store.find_all_events(COUNTER, &new_id()).await.unwrap();

    assert!(events.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_written_events_read_back_in_version_order(pool: PgPool) {
    // Arrange
    let store = store(pool);
    let id = new_id();

    // Act
    store.write(&history(&id)).await.unwrap();
    let loaded = store.find_all_events(COUNTER, &id).await.unwrap();

    // Assert
    assert_eq!(versions(&loaded), vec![1, 2, 3, 4]);
    assert_eq!(
        loaded[0].event().unwrap().downcast_ref::<Created>(),
        Some(&Created(0))
    );
    assert_eq!(
        loaded[2].event().unwrap().downcast_ref::<Noted>(),
        Some(&Noted {
            text: "halfway".into()
        })
    );
    assert_eq!(loaded[3].raw().map(|(name, _)| name), Some("Incremented"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_range_reads_split_at_version(pool: PgPool) {
    let store = store(pool);
    let id = new_id();
    store.write(&history(&id)).await.unwrap();

    let after = store.find_events_after_version(&at(&id, 2)).await.unwrap();
    let up_to = store.find_events_up_to_version(&at(&id, 2)).await.unwrap();

    assert_eq!(versions(&after), vec![3, 4]);
    assert_eq!(versions(&up_to), vec![1, 2]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_find_latest_version(pool: PgPool) {
    let store = store(pool);
    let id = new_id();
    store.write(&history(&id)).await.unwrap();

    assert_eq!(store.find_latest_version(COUNTER, &id).await.unwrap(), Some(4));
    assert_eq!(
        store.find_latest_version(COUNTER, &new_id()).await.unwrap(),
        None
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_aggregates_are_isolated_by_type_and_id(pool: PgPool) {
    let store = store(pool);
    let id = new_id();
    store.write(&history(&id)).await.unwrap();
    let other_type = AggregateInfo::new("Gauge", id.as_str()).at_version(1);

    store
        .write(&[AggregateEvent::new(other_type, Created(5))])
        .await
        .unwrap();

    assert_eq!(store.find_all_events(COUNTER, &id).await.unwrap().len(), 4);
    assert_eq!(store.find_all_events("Gauge", &id).await.unwrap().len(), 1);
}

// --- optimistic concurrency ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_rewriting_a_version_is_version_conflict(pool: PgPool) {
    // Arrange
    let store = store(pool);
    let id = new_id();
    store.write(&history(&id)[..2]).await.unwrap();

    // Act
    let result = store
        .write(&[AggregateEvent::new(at(&id, 2), Incremented)])
        .await;

    // Assert
    assert!(matches!(
        result,
        Err(DomainError::AggregateVersionConflict {
            expected: 1,
            actual: None,
            ..
        })
    ));
    assert_eq!(store.find_all_events(COUNTER, &id).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_conflicting_batch_is_rolled_back(pool: PgPool) {
    let store = store(pool);
    let id = new_id();
    store.write(&history(&id)[..2]).await.unwrap();

    let result = store
        .write(&[
            AggregateEvent::new(at(&id, 3), Incremented),
            AggregateEvent::new(at(&id, 2), Incremented),
        ])
        .await;

    assert!(result.is_err());
    assert_eq!(store.find_latest_version(COUNTER, &id).await.unwrap(), Some(2));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_unregistered_payload_is_rejected_before_writing(pool: PgPool) {
    #[derive(Debug)]
    struct Unlisted;
    impl tidewater_core::Event for Unlisted {}

    let store = store(pool);
    let id = new_id();

    let result = store.write(&[AggregateEvent::new(at(&id, 1), Unlisted)]).await;

    assert!(matches!(result, Err(DomainError::NoSuchEvent(_))));
    assert!(store.find_all_events(COUNTER, &id).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_unknown_stored_event_name_is_no_such_event(pool: PgPool) {
    let id = new_id();
    sqlx::query(
        "INSERT INTO events (aggregate_type, aggregate_id, aggregate_version, event, data)
         VALUES ($1, $2, 1, 'Teleported', '{}')",
    )
    .bind(COUNTER)
    .bind(&id)
    .execute(&pool)
    .await
    .unwrap();
    let store = store(pool);

    let result = store.find_all_events(COUNTER, &id).await;

    assert!(matches!(result, Err(DomainError::NoSuchEvent(ref n)) if n == "Teleported"));
}
