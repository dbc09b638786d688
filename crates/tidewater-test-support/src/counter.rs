//! A minimal `Counter` aggregate used across the workspace's tests.
//!
//! `Create` starts a counter at zero, `Increment` adds one, `IncrementBy`
//! emits one `Incremented` per step, and `Annotate` records a `Noted` event
//! that the counter does not fold.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tidewater_core::{
    AggregateBuilder, AggregateDefinition, Command, CommandRegistry, DomainError, Event,
    EventRegistry, Events, emit,
};

/// Aggregate type name of the counter.
pub const COUNTER: &str = "Counter";

/// Initializing command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Create;
impl Command for Create {}

/// Adds one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Increment;
impl Command for Increment {}

/// Adds `n`, one event per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementBy(pub u64);
impl Command for IncrementBy {}

/// Attaches a note the counter itself ignores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotate(pub String);
impl Command for Annotate {}

/// Initializing event carrying the starting value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created(pub u64);
impl Event for Created {}

/// The counter went up by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incremented;
impl Event for Incremented {}

/// A note with no effect on the counter's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Noted {
    /// Free text.
    pub text: String,
}
impl Event for Noted {}

/// Builds the counter's transition table.
///
/// # Panics
///
/// Never in practice; the registrations are fixed.
#[must_use]
pub fn counter_definition() -> Arc<AggregateDefinition<u64>> {
    let definition = AggregateBuilder::<u64>::new(COUNTER)
        .initializing_command(|_: &Create| Ok(emit(Created(0))))
        .command(|_, _: &Increment| Ok(emit(Incremented)))
        .command(|_, c: &IncrementBy| {
            if c.0 == 0 {
                return Err(DomainError::rejected("increment must be positive"));
            }
            let events: Events = (0..c.0)
                .map(|_| Box::new(Incremented) as Box<dyn Event>)
                .collect();
            Ok(events)
        })
        .command(|_, c: &Annotate| Ok(emit(Noted { text: c.0.clone() })))
        .initializing_event(|e: &Created| e.0)
        .event(|n, _: &Incremented| n + 1)
        .build()
        .expect("counter definition is valid");
    Arc::new(definition)
}

/// Event registry covering every counter event.
///
/// # Panics
///
/// Never in practice; the names are distinct.
#[must_use]
pub fn counter_events() -> Arc<EventRegistry> {
    let registry = EventRegistry::builder()
        .register::<Created>("Created")
        .register::<Incremented>("Incremented")
        .register::<Noted>("Noted")
        .build()
        .expect("counter event names are distinct");
    Arc::new(registry)
}

/// Command registry covering every counter command.
///
/// # Panics
///
/// Never in practice; the names are distinct.
#[must_use]
pub fn counter_commands() -> Arc<CommandRegistry> {
    let registry = CommandRegistry::builder()
        .register::<Create>("Create")
        .register::<Increment>("Increment")
        .register::<IncrementBy>("IncrementBy")
        .register::<Annotate>("Annotate")
        .build()
        .expect("counter command names are distinct");
    Arc::new(registry)
}
