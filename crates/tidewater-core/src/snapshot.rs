//! Snapshot store contract and in-memory implementation.
//!
//! Snapshots are a disposable cache of reconstructed state. Losing one costs
//! replay time, never data.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::DomainError;
use crate::event::AggregateInfo;

/// Data materialized at a known version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<D> {
    /// The reconstructed data.
    pub data: D,
    /// Version of the last event folded into `data`.
    pub version: u64,
}

/// Cache of reconstructed aggregate data for one aggregate type.
#[async_trait]
pub trait SnapshotStore<D>: Send + Sync {
    /// Returns the snapshot with the highest version for `id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store is unreachable.
    async fn get_latest(&self, id: &str) -> Result<Option<Versioned<D>>, DomainError>;

    /// Returns the snapshot recorded at exactly `version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store is unreachable.
    async fn get(&self, id: &str, version: u64) -> Result<Option<D>, DomainError>;

    /// Records `data` as the state of `info.id` at `info.version`,
    /// overwriting any snapshot at that exact version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store is unreachable.
    async fn put(&self, info: &AggregateInfo, data: &D) -> Result<(), DomainError>;
}

/// Snapshot store held in process memory.
///
/// With a retention limit, only the newest `retain` versions per id are kept.
#[derive(Debug)]
pub struct InMemorySnapshotStore<D> {
    snapshots: Mutex<HashMap<String, BTreeMap<u64, D>>>,
    retain: Option<usize>,
}

impl<D> InMemorySnapshotStore<D> {
    /// Creates a store that keeps every snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            retain: None,
        }
    }

    /// Creates a store that keeps at most `retain` snapshots per id.
    #[must_use]
    pub fn with_retention(retain: usize) -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            retain: Some(retain.max(1)),
        }
    }

    /// Versions held for `id`, ascending.
    #[must_use]
    pub fn versions(&self, id: &str) -> Vec<u64> {
        self.snapshots
            .lock()
            .get(id)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl<D> Default for InMemorySnapshotStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D> SnapshotStore<D> for InMemorySnapshotStore<D>
where
    D: Clone + Send + Sync,
{
    async fn get_latest(&self, id: &str) -> Result<Option<Versioned<D>>, DomainError> {
        let snapshots = self.snapshots.lock();
        Ok(snapshots
            .get(id)
            .and_then(|versions| versions.last_key_value())
            .map(|(version, data)| Versioned {
                data: data.clone(),
                version: *version,
            }))
    }

    async fn get(&self, id: &str, version: u64) -> Result<Option<D>, DomainError> {
        let snapshots = self.snapshots.lock();
        Ok(snapshots
            .get(id)
            .and_then(|versions| versions.get(&version))
            .cloned())
    }

    async fn put(&self, info: &AggregateInfo, data: &D) -> Result<(), DomainError> {
        let mut snapshots = self.snapshots.lock();
        let versions = snapshots.entry(info.id.clone()).or_default();
        versions.insert(info.version, data.clone());
        if let Some(retain) = self.retain {
            while versions.len() > retain {
                versions.pop_first();
            }
        }
        Ok(())
    }
}
