//! Event and snapshot store doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tidewater_core::{
    AggregateEvent, AggregateInfo, DomainError, EventStore, InMemoryEventStore,
    InMemorySnapshotStore, SnapshotStore, Versioned,
};
use tokio::sync::Barrier;

/// An in-memory event store that records every `write` call, successful or
/// not, as the list of versions it tried to append.
#[derive(Debug, Default)]
pub struct RecordingEventStore {
    inner: InMemoryEventStore,
    writes: Mutex<Vec<Vec<AggregateInfo>>>,
}

impl RecordingEventStore {
    /// Creates an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions passed to each `write` call, in call order.
    pub fn writes(&self) -> Vec<Vec<AggregateInfo>> {
        self.writes.lock().clone()
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryEventStore {
        &self.inner
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn write(&self, events: &[AggregateEvent]) -> Result<(), DomainError> {
        self.writes
            .lock()
            .push(events.iter().map(|e| e.info().clone()).collect());
        self.inner.write(events).await
    }

    async fn find_latest_version(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Option<u64>, DomainError> {
        self.inner.find_latest_version(aggregate_type, id).await
    }

    async fn find_all_events(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        self.inner.find_all_events(aggregate_type, id).await
    }

    async fn find_events_after_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        self.inner.find_events_after_version(info).await
    }

    async fn find_events_up_to_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        self.inner.find_events_up_to_version(info).await
    }
}

/// An event store that always returns an infrastructure error.
#[derive(Debug)]
pub struct FailingEventStore;

fn refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn write(&self, _events: &[AggregateEvent]) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn find_latest_version(
        &self,
        _aggregate_type: &str,
        _id: &str,
    ) -> Result<Option<u64>, DomainError> {
        Err(refused())
    }

    async fn find_all_events(
        &self,
        _aggregate_type: &str,
        _id: &str,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        Err(refused())
    }

    async fn find_events_after_version(
        &self,
        _info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        Err(refused())
    }

    async fn find_events_up_to_version(
        &self,
        _info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        Err(refused())
    }
}

/// Wraps an event store so that the first `parties` history reads wait for
/// each other before returning. Two racing command handlers therefore both
/// see the same base version.
pub struct BarrierEventStore {
    inner: Arc<dyn EventStore>,
    barrier: Barrier,
    gated: AtomicUsize,
}

impl BarrierEventStore {
    /// Gates the first `parties` reads of `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            gated: AtomicUsize::new(parties),
        }
    }

    async fn gate(&self) {
        let claimed = self
            .gated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if claimed {
            self.barrier.wait().await;
        }
    }
}

#[async_trait]
impl EventStore for BarrierEventStore {
    async fn write(&self, events: &[AggregateEvent]) -> Result<(), DomainError> {
        self.inner.write(events).await
    }

    async fn find_latest_version(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Option<u64>, DomainError> {
        self.inner.find_latest_version(aggregate_type, id).await
    }

    async fn find_all_events(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        let events = self.inner.find_all_events(aggregate_type, id).await;
        self.gate().await;
        events
    }

    async fn find_events_after_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        let events = self.inner.find_events_after_version(info).await;
        self.gate().await;
        events
    }

    async fn find_events_up_to_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        self.inner.find_events_up_to_version(info).await
    }
}

/// A snapshot store that fails every read and write.
#[derive(Debug)]
pub struct FailingSnapshotStore;

#[async_trait]
impl<D: Send + Sync + 'static> SnapshotStore<D> for FailingSnapshotStore {
    async fn get_latest(&self, _id: &str) -> Result<Option<Versioned<D>>, DomainError> {
        Err(refused())
    }

    async fn get(&self, _id: &str, _version: u64) -> Result<Option<D>, DomainError> {
        Err(refused())
    }

    async fn put(&self, _info: &AggregateInfo, _data: &D) -> Result<(), DomainError> {
        Err(refused())
    }
}

/// An in-memory snapshot store that records every `put`.
#[derive(Debug)]
pub struct RecordingSnapshotStore<D> {
    inner: InMemorySnapshotStore<D>,
    puts: Mutex<Vec<(u64, D)>>,
}

impl<D> Default for RecordingSnapshotStore<D> {
    fn default() -> Self {
        Self {
            inner: InMemorySnapshotStore::new(),
            puts: Mutex::new(Vec::new()),
        }
    }
}

impl<D: Clone> RecordingSnapshotStore<D> {
    /// Creates an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// (version, data) of each `put`, in call order.
    pub fn puts(&self) -> Vec<(u64, D)> {
        self.puts.lock().clone()
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemorySnapshotStore<D> {
        &self.inner
    }
}

#[async_trait]
impl<D> SnapshotStore<D> for RecordingSnapshotStore<D>
where
    D: Clone + Send + Sync,
{
    async fn get_latest(&self, id: &str) -> Result<Option<Versioned<D>>, DomainError> {
        self.inner.get_latest(id).await
    }

    async fn get(&self, id: &str, version: u64) -> Result<Option<D>, DomainError> {
        self.inner.get(id, version).await
    }

    async fn put(&self, info: &AggregateInfo, data: &D) -> Result<(), DomainError> {
        self.puts.lock().push((info.version, data.clone()));
        self.inner.put(info, data).await
    }
}
