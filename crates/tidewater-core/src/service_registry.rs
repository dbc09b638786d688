//! Lookup of aggregate services by aggregate type.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{ConfigurationError, DomainError};
use crate::event::AggregateEvent;
use crate::service::AggregateHandler;

/// The set of aggregate services running in this process.
#[derive(Default)]
pub struct AggregateServiceRegistry {
    services: BTreeMap<String, Arc<dyn AggregateHandler>>,
}

impl AggregateServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::DuplicateService` if a service for the
    /// same aggregate type is already registered.
    pub fn register(
        &mut self,
        service: Arc<dyn AggregateHandler>,
    ) -> Result<(), ConfigurationError> {
        let aggregate_type = service.aggregate_type().to_owned();
        if self.services.contains_key(&aggregate_type) {
            return Err(ConfigurationError::DuplicateService(aggregate_type));
        }
        debug!(aggregate_type = %aggregate_type, "registered aggregate service");
        self.services.insert(aggregate_type, service);
        Ok(())
    }

    /// The service owning `aggregate_type`.
    #[must_use]
    pub fn service_for_type(&self, aggregate_type: &str) -> Option<Arc<dyn AggregateHandler>> {
        self.services.get(aggregate_type).cloned()
    }

    /// Every registered service, ordered by aggregate type.
    pub fn all_services(&self) -> impl Iterator<Item = &Arc<dyn AggregateHandler>> {
        self.services.values()
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Submits a command to the service owning `aggregate_type`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoSuchAggregateType` if no service owns the
    /// type, otherwise whatever the service returns.
    pub async fn handle_command_for(
        &self,
        aggregate_type: &str,
        id: &str,
        expected_version: Option<u64>,
        command: &dyn Command,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        let Some(service) = self.services.get(aggregate_type) else {
            warn!(aggregate_type, aggregate_id = id, "no service for aggregate type");
            return Err(DomainError::NoSuchAggregateType(aggregate_type.to_owned()));
        };
        service.handle_command(id, expected_version, command).await
    }
}

impl std::fmt::Debug for AggregateServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.services.keys()).finish()
    }
}
