//! Tidewater Core — event-sourced aggregates.
//!
//! This crate defines the aggregate state machine, the event and snapshot
//! store contracts, the payload type registries and the aggregate service
//! that ties them together. It contains no database code.

pub mod aggregate;
pub mod command;
pub mod error;
pub mod event;
pub mod registry;
pub mod service;
pub mod service_registry;
pub mod snapshot;
pub mod store;

pub use aggregate::{Aggregate, AggregateBuilder, AggregateDefinition, emit};
pub use command::Command;
pub use error::{ConfigurationError, DomainError};
pub use event::{AggregateEvent, AggregateInfo, Event, Events, LazyEvent};
pub use registry::{CommandRegistry, EventRegistry};
pub use service::{AggregateHandler, AggregateService};
pub use service_registry::AggregateServiceRegistry;
pub use snapshot::{InMemorySnapshotStore, SnapshotStore, Versioned};
pub use store::{EventStore, InMemoryEventStore};
