//! Event store contract and in-memory implementation.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::DomainError;
use crate::event::{AggregateEvent, AggregateInfo};

/// Append-only, per-aggregate ordered event log.
///
/// Each (type, id, version) triple may be written once. All reads return
/// events in ascending version order.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends the events in order.
    ///
    /// A call is atomic as a whole: on error nothing from it is durable.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateVersionConflict` if any event's
    /// (type, id, version) is already taken, or `DomainError::Infrastructure`
    /// if the store fails.
    async fn write(&self, events: &[AggregateEvent]) -> Result<(), DomainError>;

    /// Highest version written for the aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store fails.
    async fn find_latest_version(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Option<u64>, DomainError>;

    /// The aggregate's full history.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store fails, or
    /// `DomainError::NoSuchEvent` if a stored event name is unknown.
    async fn find_all_events(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Vec<AggregateEvent>, DomainError>;

    /// Events with version strictly greater than `info.version`.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::find_all_events`].
    async fn find_events_after_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError>;

    /// Events with version less than or equal to `info.version`.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::find_all_events`].
    async fn find_events_up_to_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError>;
}

type StreamKey = (String, String);

/// Event store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<StreamKey, BTreeMap<u64, AggregateEvent>>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.lock().values().map(BTreeMap::len).sum()
    }

    /// Returns `true` if no events are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn range<F>(&self, aggregate_type: &str, id: &str, keep: F) -> Vec<AggregateEvent>
    where
        F: Fn(u64) -> bool,
    {
        let streams = self.streams.lock();
        streams
            .get(&(aggregate_type.to_owned(), id.to_owned()))
            .map(|stream| {
                stream
                    .iter()
                    .filter(|(version, _)| keep(**version))
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn version_conflict(info: &AggregateInfo) -> DomainError {
    DomainError::AggregateVersionConflict {
        aggregate_type: info.aggregate_type.clone(),
        aggregate_id: info.id.clone(),
        expected: info.version.saturating_sub(1),
        actual: None,
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn write(&self, events: &[AggregateEvent]) -> Result<(), DomainError> {
        let mut streams = self.streams.lock();

        let mut seen = HashSet::new();
        for event in events {
            let info = event.info();
            let taken = streams
                .get(&(info.aggregate_type.clone(), info.id.clone()))
                .is_some_and(|stream| stream.contains_key(&info.version));
            if taken || !seen.insert(info) {
                return Err(version_conflict(info));
            }
        }

        for event in events {
            let info = event.info();
            streams
                .entry((info.aggregate_type.clone(), info.id.clone()))
                .or_default()
                .insert(info.version, event.clone());
        }
        Ok(())
    }

    async fn find_latest_version(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Option<u64>, DomainError> {
        let streams = self.streams.lock();
        Ok(streams
            .get(&(aggregate_type.to_owned(), id.to_owned()))
            .and_then(|stream| stream.last_key_value())
            .map(|(version, _)| *version))
    }

    async fn find_all_events(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        Ok(self.range(aggregate_type, id, |_| true))
    }

    async fn find_events_after_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        Ok(self.range(&info.aggregate_type, &info.id, |v| v > info.version))
    }

    async fn find_events_up_to_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        Ok(self.range(&info.aggregate_type, &info.id, |v| v <= info.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[derive(Debug)]
    struct Ticked;
    impl Event for Ticked {}

    fn at(id: &str, version: u64) -> AggregateEvent {
        AggregateEvent::new(AggregateInfo::new("Clock", id).at_version(version), Ticked)
    }

    fn versions(events: &[AggregateEvent]) -> Vec<u64> {
        events.iter().map(|e| e.info().version).collect()
    }

    #[tokio::test]
    async fn test_rewriting_an_existing_version_conflicts() {
        // Arrange
        let store = InMemoryEventStore::new();
        store.write(&[at("X", 1), at("X", 2)]).await.unwrap();

        // Act
        let result = store.write(&[at("X", 2)]).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::AggregateVersionConflict { expected: 1, actual: None, .. })
        ));
        assert_eq!(store.find_all_events("Clock", "X").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_conflicting_batch_writes_nothing() {
        let store = InMemoryEventStore::new();
        store.write(&[at("X", 1)]).await.unwrap();

        let result = store.write(&[at("X", 2), at("X", 1)]).await;

        assert!(result.is_err());
        assert_eq!(store.find_latest_version("Clock", "X").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_duplicate_within_one_batch_conflicts() {
        let store = InMemoryEventStore::new();

        let result = store.write(&[at("X", 1), at("X", 1)]).await;

        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_range_reads_are_version_ordered() {
        // Arrange
        let store = InMemoryEventStore::new();
        store.write(&[at("X", 3), at("X", 1), at("X", 2)]).await.unwrap();
        store.write(&[at("Y", 1)]).await.unwrap();
        let pivot = AggregateInfo::new("Clock", "X").at_version(2);

        // Act
        let all = store.find_all_events("Clock", "X").await.unwrap();
        let after = store.find_events_after_version(&pivot).await.unwrap();
        let up_to = store.find_events_up_to_version(&pivot).await.unwrap();

        // Assert
        assert_eq!(versions(&all), vec![1, 2, 3]);
        assert_eq!(versions(&after), vec![3]);
        assert_eq!(versions(&up_to), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_latest_version_is_absent_for_unknown_aggregate() {
        let store = InMemoryEventStore::new();

        assert_eq!(store.find_latest_version("Clock", "Z").await.unwrap(), None);
    }
}
