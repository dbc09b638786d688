//! Aggregate service: reconstruction, command handling and snapshot upkeep.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::aggregate::{Aggregate, AggregateDefinition};
use crate::command::Command;
use crate::error::DomainError;
use crate::event::AggregateEvent;
use crate::snapshot::{SnapshotStore, Versioned};
use crate::store::EventStore;

/// Type-erased view of an aggregate service.
///
/// This is what the service registry and the change-stream router hold.
#[async_trait]
pub trait AggregateHandler: Send + Sync {
    /// Aggregate type this handler owns.
    fn aggregate_type(&self) -> &str;

    /// Handles a command and returns the persisted events.
    ///
    /// # Errors
    ///
    /// See [`AggregateService::handle_command`].
    async fn handle_command(
        &self,
        id: &str,
        expected_version: Option<u64>,
        command: &dyn Command,
    ) -> Result<Vec<AggregateEvent>, DomainError>;

    /// Folds already durable events into the cached state.
    ///
    /// # Errors
    ///
    /// See [`AggregateService::apply_events`].
    async fn apply_events(&self, events: &[AggregateEvent]) -> Result<(), DomainError>;

    /// Folds one already durable event into the cached state.
    ///
    /// # Errors
    ///
    /// See [`AggregateService::apply_events`].
    async fn apply_event(&self, event: &AggregateEvent) -> Result<(), DomainError> {
        self.apply_events(std::slice::from_ref(event)).await
    }
}

/// Orchestrates the event store, the snapshot store and one aggregate
/// definition.
///
/// Every call builds a fresh [`Aggregate`] from store state. No locks are
/// taken; concurrent writers are serialized by the event store's uniqueness
/// constraint.
pub struct AggregateService<D> {
    definition: Arc<AggregateDefinition<D>>,
    event_store: Arc<dyn EventStore>,
    snapshot_store: Option<Arc<dyn SnapshotStore<D>>>,
}

impl<D> AggregateService<D>
where
    D: Send + Sync + 'static,
{
    /// Creates a service that replays from the event store on every call.
    #[must_use]
    pub fn new(definition: Arc<AggregateDefinition<D>>, event_store: Arc<dyn EventStore>) -> Self {
        Self {
            definition,
            event_store,
            snapshot_store: None,
        }
    }

    /// Adds a snapshot cache.
    #[must_use]
    pub fn with_snapshot_store(mut self, snapshot_store: Arc<dyn SnapshotStore<D>>) -> Self {
        self.snapshot_store = Some(snapshot_store);
        self
    }

    /// Aggregate type name.
    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        self.definition.aggregate_type()
    }

    /// Handles `command` against aggregate `id`.
    ///
    /// When `expected_version` is `Some`, it must equal the reconstructed
    /// version. The resulting events get contiguous versions starting after
    /// the current one and are returned once persisted.
    ///
    /// # Errors
    ///
    /// - `AggregateIdConflict` if an initializing command meets an existing
    ///   aggregate.
    /// - `NoSuchAggregate` if an ordinary command meets an aggregate with no
    ///   history.
    /// - `AggregateVersionConflict` if the expected version is stale or a
    ///   concurrent writer won the append.
    /// - `RejectedCommand` if the handler rejects the command.
    /// - `Infrastructure` or `Serialization` on store failures.
    pub async fn handle_command(
        &self,
        id: &str,
        expected_version: Option<u64>,
        command: &dyn Command,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        let mut aggregate = self.reconstruct(id).await?;
        let current = aggregate.version();
        let exists = current > 0;

        if self.definition.is_initializing(command) {
            if exists {
                return Err(DomainError::AggregateIdConflict {
                    aggregate_type: self.aggregate_type().to_owned(),
                    aggregate_id: id.to_owned(),
                });
            }
        } else if !exists {
            return Err(DomainError::NoSuchAggregate {
                aggregate_type: self.aggregate_type().to_owned(),
                aggregate_id: id.to_owned(),
            });
        }

        if let Some(expected) = expected_version.filter(|v| *v != current) {
            return Err(DomainError::AggregateVersionConflict {
                aggregate_type: self.aggregate_type().to_owned(),
                aggregate_id: id.to_owned(),
                expected,
                actual: Some(current),
            });
        }

        let produced = aggregate.handle(command)?;
        if produced.is_empty() {
            debug!(
                aggregate_type = self.aggregate_type(),
                aggregate_id = id,
                command = command.type_name(),
                "command produced no events"
            );
            return Ok(Vec::new());
        }

        let mut info = aggregate.info().clone();
        let events: Vec<AggregateEvent> = produced
            .into_iter()
            .map(|event| {
                info = info.incremented();
                AggregateEvent::from_boxed(info.clone(), event)
            })
            .collect();

        self.event_store.write(&events).await?;

        for event in &events {
            aggregate.apply(event.event()?);
        }
        debug!(
            aggregate_type = self.aggregate_type(),
            aggregate_id = id,
            version = aggregate.version(),
            count = events.len(),
            "persisted events"
        );
        self.refresh_snapshot(&aggregate).await;
        Ok(events)
    }

    /// Current state of aggregate `id`, or `None` if it has no history.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` or `Serialization` on event store failures.
    pub async fn load_latest(&self, id: &str) -> Result<Option<Aggregate<D>>, DomainError> {
        let aggregate = self.reconstruct(id).await?;
        Ok((aggregate.version() > 0).then_some(aggregate))
    }

    /// Current state of aggregate `id` from a full replay, bypassing the
    /// snapshot cache. The cache is refreshed with the result.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` or `Serialization` on event store failures.
    pub async fn load_latest_from_event_store(
        &self,
        id: &str,
    ) -> Result<Option<Aggregate<D>>, DomainError> {
        let mut aggregate = Aggregate::new(Arc::clone(&self.definition), id);
        let events = self
            .event_store
            .find_all_events(self.aggregate_type(), id)
            .await?;
        if fold_new(&mut aggregate, &events)? > 0 {
            self.refresh_snapshot(&aggregate).await;
        }
        Ok((aggregate.version() > 0).then_some(aggregate))
    }

    /// State of aggregate `id` as of exactly `version`.
    ///
    /// Returns `None` if the aggregate never reached that version.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` or `Serialization` on event store failures.
    pub async fn load_at_version(
        &self,
        id: &str,
        version: u64,
    ) -> Result<Option<Aggregate<D>>, DomainError> {
        if version == 0 {
            return Ok(None);
        }
        if let Some(store) = &self.snapshot_store {
            match store.get(id, version).await {
                Ok(Some(data)) => {
                    return Ok(Some(Aggregate::from_snapshot(
                        Arc::clone(&self.definition),
                        id,
                        Versioned { data, version },
                    )));
                }
                Ok(None) => {}
                Err(e) => warn!(
                    aggregate_type = self.aggregate_type(),
                    aggregate_id = id,
                    version,
                    error = %e,
                    "snapshot read failed, replaying"
                ),
            }
        }

        let mut aggregate = Aggregate::new(Arc::clone(&self.definition), id);
        let bound = aggregate.info().at_version(version);
        let events = self.event_store.find_events_up_to_version(&bound).await?;
        fold_new(&mut aggregate, &events)?;
        Ok((aggregate.version() == version).then_some(aggregate))
    }

    /// Folds externally observed, already durable events into the cache.
    ///
    /// Events for other aggregate types are ignored. Each owning aggregate is
    /// first rebuilt from the stores, so events already reflected there are
    /// skipped and re-delivery leaves the cached state unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` or `Serialization` on store or decode
    /// failures.
    pub async fn apply_events(&self, events: &[AggregateEvent]) -> Result<(), DomainError> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<AggregateEvent>> = HashMap::new();
        for event in events
            .iter()
            .filter(|e| e.info().aggregate_type == self.aggregate_type())
        {
            let id = event.info().id.as_str();
            groups
                .entry(id)
                .or_insert_with(|| {
                    order.push(id);
                    Vec::new()
                })
                .push(event.clone());
        }

        for id in order {
            let Some(mut incoming) = groups.remove(id) else {
                continue;
            };
            incoming.sort_by_key(|e| e.info().version);

            let mut aggregate = self.reconstruct(id).await?;
            if fold_new(&mut aggregate, &incoming)? > 0 {
                self.refresh_snapshot(&aggregate).await;
            }
        }
        Ok(())
    }

    /// Folds one externally observed event into the cache.
    ///
    /// # Errors
    ///
    /// See [`AggregateService::apply_events`].
    pub async fn apply_event(&self, event: &AggregateEvent) -> Result<(), DomainError> {
        self.apply_events(std::slice::from_ref(event)).await
    }

    async fn reconstruct(&self, id: &str) -> Result<Aggregate<D>, DomainError> {
        let snapshot = match &self.snapshot_store {
            Some(store) => store.get_latest(id).await.unwrap_or_else(|e| {
                warn!(
                    aggregate_type = self.aggregate_type(),
                    aggregate_id = id,
                    error = %e,
                    "snapshot read failed, replaying full history"
                );
                None
            }),
            None => None,
        };

        let definition = Arc::clone(&self.definition);
        let (mut aggregate, events) = match snapshot {
            Some(snapshot) => {
                let aggregate = Aggregate::from_snapshot(definition, id, snapshot);
                let events = self
                    .event_store
                    .find_events_after_version(aggregate.info())
                    .await?;
                (aggregate, events)
            }
            None => {
                let events = self
                    .event_store
                    .find_all_events(self.aggregate_type(), id)
                    .await?;
                (Aggregate::new(definition, id), events)
            }
        };

        let replayed = fold_new(&mut aggregate, &events)?;
        debug!(
            aggregate_type = self.aggregate_type(),
            aggregate_id = id,
            version = aggregate.version(),
            replayed,
            "reconstructed aggregate"
        );
        if replayed > 0 {
            self.refresh_snapshot(&aggregate).await;
        }
        Ok(aggregate)
    }

    async fn refresh_snapshot(&self, aggregate: &Aggregate<D>) {
        let (Some(store), Some(data)) = (&self.snapshot_store, aggregate.data()) else {
            return;
        };
        if let Err(e) = store.put(aggregate.info(), data).await {
            warn!(
                aggregate = %aggregate.info(),
                error = %e,
                "snapshot write failed"
            );
        }
    }
}

/// Applies the events that directly follow the aggregate's version.
///
/// Events at or below the current version are skipped. A gap stops the fold.
/// Returns the number of events applied.
fn fold_new<D>(
    aggregate: &mut Aggregate<D>,
    events: &[AggregateEvent],
) -> Result<usize, DomainError> {
    let mut applied = 0;
    for event in events {
        let version = event.info().version;
        if version <= aggregate.version() {
            continue;
        }
        if version != aggregate.version() + 1 {
            warn!(
                aggregate = %aggregate.info(),
                next = version,
                "gap in event versions, stopping replay"
            );
            break;
        }
        aggregate.apply(event.event()?);
        applied += 1;
    }
    Ok(applied)
}

#[async_trait]
impl<D> AggregateHandler for AggregateService<D>
where
    D: Send + Sync + 'static,
{
    fn aggregate_type(&self) -> &str {
        self.definition.aggregate_type()
    }

    async fn handle_command(
        &self,
        id: &str,
        expected_version: Option<u64>,
        command: &dyn Command,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        AggregateService::handle_command(self, id, expected_version, command).await
    }

    async fn apply_events(&self, events: &[AggregateEvent]) -> Result<(), DomainError> {
        AggregateService::apply_events(self, events).await
    }
}
