//! Routing of decoded event rows to aggregate services.

use std::sync::Arc;

use async_trait::async_trait;
use tidewater_core::{AggregateEvent, AggregateInfo, AggregateServiceRegistry, EventRegistry};
use tracing::{debug, error, warn};

use crate::stream::EventRow;

/// Outcome of routing one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// The row was offered to every registered service. Services that do
    /// not own the aggregate type ignore it but still count as offered.
    Delivered {
        /// Services the event was offered to.
        offered: usize,
        /// Of those, the services that returned an error.
        failed: usize,
    },
    /// The event name is not registered; the row was dropped.
    Unrecognized,
}

/// Receives event rows from the log reader, in log order.
#[async_trait]
pub trait EventRouter: Send + Sync {
    /// Delivers one row. Routing never fails the reader; problems are
    /// logged and reported in the outcome.
    async fn route(&self, row: EventRow) -> Routed;
}

/// Wraps rows as lazily decoded events and fans them out to every
/// registered aggregate service.
///
/// Each service ignores events for aggregate types it does not own, so a
/// payload is decoded only if some service folds it.
#[derive(Debug, Clone)]
pub struct DefaultEventRouter {
    events: Arc<EventRegistry>,
    services: Arc<AggregateServiceRegistry>,
}

impl DefaultEventRouter {
    /// Creates a router over the given registries.
    #[must_use]
    pub fn new(events: Arc<EventRegistry>, services: Arc<AggregateServiceRegistry>) -> Self {
        Self { events, services }
    }
}

#[async_trait]
impl EventRouter for DefaultEventRouter {
    async fn route(&self, row: EventRow) -> Routed {
        let info = AggregateInfo::new(row.aggregate_type, row.aggregate_id)
            .at_version(row.aggregate_version);
        let Some(lazy) = self.events.lazy(&row.event, row.data) else {
            warn!(
                aggregate = %info,
                event = %row.event,
                "unrecognized event type, skipping"
            );
            return Routed::Unrecognized;
        };
        let event = AggregateEvent::lazy(info, lazy);
        debug!(aggregate = %event.info(), event = %row.event, "routing event");

        let mut offered = 0;
        let mut failed = 0;
        for service in self.services.all_services() {
            offered += 1;
            if let Err(e) = service.apply_event(&event).await {
                failed += 1;
                error!(
                    aggregate = %event.info(),
                    consumer = service.aggregate_type(),
                    error = %e,
                    "consumer failed to apply event"
                );
            }
        }
        Routed::Delivered { offered, failed }
    }
}
