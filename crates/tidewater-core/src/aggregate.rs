//! Aggregate state machine and its declarative builder.
//!
//! An [`AggregateDefinition`] maps concrete command types to handlers and
//! concrete event types to folds. An [`Aggregate`] is one reconstructed
//! instance: optional data plus the version it has reached.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{ConfigurationError, DomainError};
use crate::event::{AggregateInfo, Event, Events};
use crate::snapshot::Versioned;

type InitializingCommandHandler =
    Box<dyn Fn(&dyn Command) -> Result<Events, DomainError> + Send + Sync>;
type CommandHandler<D> = Box<dyn Fn(&D, &dyn Command) -> Result<Events, DomainError> + Send + Sync>;
type InitializingEventFold<D> = Box<dyn Fn(&dyn Event) -> Option<D> + Send + Sync>;
type EventFold<D> = Box<dyn Fn(D, &dyn Event) -> D + Send + Sync>;

/// Wraps a single event as a handler result.
#[must_use]
pub fn emit<E: Event>(event: E) -> Events {
    let event: Box<dyn Event> = Box::new(event);
    vec![event]
}

/// Declarative registration of an aggregate's transitions.
///
/// ```ignore
/// let definition = AggregateBuilder::<u64>::new("Counter")
///     .initializing_command(|_: &Create| Ok(emit(Created(0))))
///     .command(|_, _: &Increment| Ok(emit(Incremented)))
///     .initializing_event(|e: &Created| e.0)
///     .event(|n, _: &Incremented| n + 1)
///     .build()?;
/// ```
pub struct AggregateBuilder<D> {
    aggregate_type: String,
    initializing_commands: HashMap<TypeId, InitializingCommandHandler>,
    commands: HashMap<TypeId, CommandHandler<D>>,
    initializing_events: HashMap<TypeId, InitializingEventFold<D>>,
    events: HashMap<TypeId, EventFold<D>>,
    duplicate: Option<&'static str>,
}

impl<D: 'static> AggregateBuilder<D> {
    /// Starts a definition for the named aggregate type.
    #[must_use]
    pub fn new(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            initializing_commands: HashMap::new(),
            commands: HashMap::new(),
            initializing_events: HashMap::new(),
            events: HashMap::new(),
            duplicate: None,
        }
    }

    /// Registers a command that creates the aggregate.
    #[must_use]
    pub fn initializing_command<C, F>(mut self, handler: F) -> Self
    where
        C: Command,
        F: Fn(&C) -> Result<Events, DomainError> + Send + Sync + 'static,
    {
        if self.command_registered::<C>() {
            self.note_duplicate::<C>();
            return self;
        }
        self.initializing_commands.insert(
            TypeId::of::<C>(),
            Box::new(move |command: &dyn Command| match command.downcast_ref::<C>() {
                Some(command) => handler(command),
                None => Ok(Vec::new()),
            }),
        );
        self
    }

    /// Registers a command that mutates existing data.
    #[must_use]
    pub fn command<C, F>(mut self, handler: F) -> Self
    where
        C: Command,
        F: Fn(&D, &C) -> Result<Events, DomainError> + Send + Sync + 'static,
    {
        if self.command_registered::<C>() {
            self.note_duplicate::<C>();
            return self;
        }
        self.commands.insert(
            TypeId::of::<C>(),
            Box::new(move |data: &D, command: &dyn Command| match command.downcast_ref::<C>() {
                Some(command) => handler(data, command),
                None => Ok(Vec::new()),
            }),
        );
        self
    }

    /// Registers the fold that produces the first data value.
    #[must_use]
    pub fn initializing_event<E, F>(mut self, fold: F) -> Self
    where
        E: Event,
        F: Fn(&E) -> D + Send + Sync + 'static,
    {
        if self.event_registered::<E>() {
            self.note_duplicate::<E>();
            return self;
        }
        self.initializing_events.insert(
            TypeId::of::<E>(),
            Box::new(move |event: &dyn Event| event.downcast_ref::<E>().map(&fold)),
        );
        self
    }

    /// Registers a fold over existing data.
    #[must_use]
    pub fn event<E, F>(mut self, fold: F) -> Self
    where
        E: Event,
        F: Fn(D, &E) -> D + Send + Sync + 'static,
    {
        if self.event_registered::<E>() {
            self.note_duplicate::<E>();
            return self;
        }
        self.events.insert(
            TypeId::of::<E>(),
            Box::new(move |data: D, event: &dyn Event| match event.downcast_ref::<E>() {
                Some(event) => fold(data, event),
                None => data,
            }),
        );
        self
    }

    /// Validates the registrations.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if a type was registered twice, or if
    /// there is no initializing command or no initializing event.
    pub fn build(self) -> Result<AggregateDefinition<D>, ConfigurationError> {
        if let Some(type_name) = self.duplicate {
            return Err(ConfigurationError::DuplicateHandler {
                aggregate_type: self.aggregate_type,
                type_name,
            });
        }
        if self.initializing_commands.is_empty() {
            return Err(ConfigurationError::MissingInitializingCommand(
                self.aggregate_type,
            ));
        }
        if self.initializing_events.is_empty() {
            return Err(ConfigurationError::MissingInitializingEvent(
                self.aggregate_type,
            ));
        }
        Ok(AggregateDefinition {
            aggregate_type: self.aggregate_type,
            initializing_commands: self.initializing_commands,
            commands: self.commands,
            initializing_events: self.initializing_events,
            events: self.events,
        })
    }

    fn command_registered<C: 'static>(&self) -> bool {
        let id = TypeId::of::<C>();
        self.initializing_commands.contains_key(&id) || self.commands.contains_key(&id)
    }

    fn event_registered<E: 'static>(&self) -> bool {
        let id = TypeId::of::<E>();
        self.initializing_events.contains_key(&id) || self.events.contains_key(&id)
    }

    fn note_duplicate<T>(&mut self) {
        if self.duplicate.is_none() {
            self.duplicate = Some(type_name::<T>());
        }
    }
}

/// The validated transition table of one aggregate type.
pub struct AggregateDefinition<D> {
    aggregate_type: String,
    initializing_commands: HashMap<TypeId, InitializingCommandHandler>,
    commands: HashMap<TypeId, CommandHandler<D>>,
    initializing_events: HashMap<TypeId, InitializingEventFold<D>>,
    events: HashMap<TypeId, EventFold<D>>,
}

impl<D> AggregateDefinition<D> {
    /// Aggregate type name.
    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Returns `true` if the command is registered as initializing.
    #[must_use]
    pub fn is_initializing(&self, command: &dyn Command) -> bool {
        self.initializing_commands
            .contains_key(&command.payload_type_id())
    }

    /// Returns `true` if any handler is registered for the command.
    #[must_use]
    pub fn handles(&self, command: &dyn Command) -> bool {
        let id = command.payload_type_id();
        self.initializing_commands.contains_key(&id) || self.commands.contains_key(&id)
    }
}

impl<D> fmt::Debug for AggregateDefinition<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateDefinition")
            .field("aggregate_type", &self.aggregate_type)
            .field("initializing_commands", &self.initializing_commands.len())
            .field("commands", &self.commands.len())
            .field("initializing_events", &self.initializing_events.len())
            .field("events", &self.events.len())
            .finish()
    }
}

/// One reconstructed aggregate instance.
///
/// `data` is absent until an initializing event has been folded.
pub struct Aggregate<D> {
    definition: Arc<AggregateDefinition<D>>,
    info: AggregateInfo,
    data: Option<D>,
}

impl<D> Aggregate<D> {
    /// An aggregate with no history.
    #[must_use]
    pub fn new(definition: Arc<AggregateDefinition<D>>, id: impl Into<String>) -> Self {
        let info = AggregateInfo::new(definition.aggregate_type(), id);
        Self {
            definition,
            info,
            data: None,
        }
    }

    /// An aggregate restored from cached state.
    #[must_use]
    pub fn from_snapshot(
        definition: Arc<AggregateDefinition<D>>,
        id: impl Into<String>,
        snapshot: Versioned<D>,
    ) -> Self {
        let info = AggregateInfo::new(definition.aggregate_type(), id).at_version(snapshot.version);
        Self {
            definition,
            info,
            data: Some(snapshot.data),
        }
    }

    /// Identity and position.
    #[must_use]
    pub fn info(&self) -> &AggregateInfo {
        &self.info
    }

    /// Number of events applied.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.info.version
    }

    /// Current data, if initialized.
    #[must_use]
    pub fn data(&self) -> Option<&D> {
        self.data.as_ref()
    }

    /// Consumes the aggregate, returning its data.
    #[must_use]
    pub fn into_data(self) -> Option<D> {
        self.data
    }

    /// The definition this aggregate runs against.
    #[must_use]
    pub fn definition(&self) -> &Arc<AggregateDefinition<D>> {
        &self.definition
    }

    /// Runs the command against the current data.
    ///
    /// Unregistered command types produce no events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::RejectedCommand` if an initializing command
    /// meets existing data, an ordinary command meets absent data, or the
    /// handler itself rejects the command.
    pub fn handle(&self, command: &dyn Command) -> Result<Events, DomainError> {
        let id = command.payload_type_id();
        if let Some(handler) = self.definition.initializing_commands.get(&id) {
            if self.data.is_some() {
                return Err(DomainError::rejected(format!(
                    "{} already initialized",
                    self.info
                )));
            }
            return handler(command);
        }
        if let Some(handler) = self.definition.commands.get(&id) {
            return match &self.data {
                Some(data) => handler(data, command),
                None => Err(DomainError::rejected(format!(
                    "{} not initialized",
                    self.info
                ))),
            };
        }
        debug!(
            aggregate_type = %self.info.aggregate_type,
            aggregate_id = %self.info.id,
            command = command.type_name(),
            "no handler registered, ignoring command"
        );
        Ok(Vec::new())
    }

    /// Folds the event into the data and advances the version by one.
    ///
    /// The version advances even when the event type is not recognized.
    pub fn apply(&mut self, event: &dyn Event) {
        let id = event.payload_type_id();
        if let Some(fold) = self.definition.initializing_events.get(&id) {
            if self.data.is_some() {
                warn!(
                    aggregate = %self.info,
                    event = event.type_name(),
                    "initializing event on initialized aggregate, data unchanged"
                );
            } else {
                self.data = fold(event);
            }
        } else if let Some(fold) = self.definition.events.get(&id) {
            match self.data.take() {
                Some(data) => self.data = Some(fold(data, event)),
                None => warn!(
                    aggregate = %self.info,
                    event = event.type_name(),
                    "event on uninitialized aggregate, data unchanged"
                ),
            }
        }
        self.info.version += 1;
    }
}

impl<D: fmt::Debug> fmt::Debug for Aggregate<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("info", &self.info)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Open(i64);
    impl Command for Open {}

    #[derive(Debug)]
    struct Deposit(i64);
    impl Command for Deposit {}

    #[derive(Debug)]
    struct Audit;
    impl Command for Audit {}

    #[derive(Debug)]
    struct Opened(i64);
    impl Event for Opened {}

    #[derive(Debug)]
    struct Deposited(i64);
    impl Event for Deposited {}

    #[derive(Debug)]
    struct Renamed;
    impl Event for Renamed {}

    fn ledger() -> Arc<AggregateDefinition<i64>> {
        let definition = AggregateBuilder::<i64>::new("Ledger")
            .initializing_command(|c: &Open| Ok(emit(Opened(c.0))))
            .command(|balance, c: &Deposit| {
                if c.0 <= 0 {
                    return Err(DomainError::rejected("deposit must be positive"));
                }
                let mut events = emit(Deposited(c.0));
                if balance + c.0 > 100 {
                    events.push(Box::new(Deposited(0)));
                }
                Ok(events)
            })
            .initializing_event(|e: &Opened| e.0)
            .event(|balance, e: &Deposited| balance + e.0)
            .build()
            .unwrap();
        Arc::new(definition)
    }

    #[test]
    fn test_build_requires_initializing_command() {
        let result = AggregateBuilder::<i64>::new("Ledger")
            .initializing_event(|e: &Opened| e.0)
            .build();

        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::MissingInitializingCommand("Ledger".into())
        );
    }

    #[test]
    fn test_build_requires_initializing_event() {
        let result = AggregateBuilder::<i64>::new("Ledger")
            .initializing_command(|c: &Open| Ok(emit(Opened(c.0))))
            .event(|balance, e: &Deposited| balance + e.0)
            .build();

        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::MissingInitializingEvent("Ledger".into())
        );
    }

    #[test]
    fn test_build_rejects_type_registered_twice() {
        let result = AggregateBuilder::<i64>::new("Ledger")
            .initializing_command(|c: &Open| Ok(emit(Opened(c.0))))
            .command(|_, c: &Open| Ok(emit(Deposited(c.0))))
            .initializing_event(|e: &Opened| e.0)
            .build();

        assert!(matches!(
            result.unwrap_err(),
            ConfigurationError::DuplicateHandler { ref type_name, .. } if type_name.ends_with("Open")
        ));
    }

    #[test]
    fn test_initializing_command_on_existing_data_is_rejected() {
        // Arrange
        let mut ledger = Aggregate::new(ledger(), "l-1");
        ledger.apply(&Opened(5));

        // Act
        let result = ledger.handle(&Open(1));

        // Assert
        assert!(matches!(result, Err(DomainError::RejectedCommand(ref m)) if m.contains("already initialized")));
    }

    #[test]
    fn test_ordinary_command_on_absent_data_is_rejected() {
        let ledger = Aggregate::new(ledger(), "l-1");

        let result = ledger.handle(&Deposit(1));

        assert!(matches!(result, Err(DomainError::RejectedCommand(ref m)) if m.contains("not initialized")));
    }

    #[test]
    fn test_unregistered_command_produces_no_events() {
        let mut ledger = Aggregate::new(ledger(), "l-1");
        ledger.apply(&Opened(5));

        let events = ledger.handle(&Audit).unwrap();

        assert!(events.is_empty());
    }

    #[test]
    fn test_handler_may_emit_several_events_in_order() {
        let mut ledger = Aggregate::new(ledger(), "l-1");
        ledger.apply(&Opened(90));

        let events = ledger.handle(&Deposit(20)).unwrap();

        let amounts: Vec<i64> = events
            .iter()
            .map(|e| e.downcast_ref::<Deposited>().unwrap().0)
            .collect();
        assert_eq!(amounts, vec![20, 0]);
    }

    #[test]
    fn test_unrecognized_event_still_consumes_a_version() {
        // Arrange
        let mut ledger = Aggregate::new(ledger(), "l-1");

        // Act
        ledger.apply(&Opened(5));
        ledger.apply(&Renamed);
        ledger.apply(&Deposited(3));

        // Assert
        assert_eq!(ledger.version(), 3);
        assert_eq!(ledger.data(), Some(&8));
    }

    #[test]
    fn test_ordinary_event_before_initialization_leaves_data_absent() {
        let mut ledger = Aggregate::new(ledger(), "l-1");

        ledger.apply(&Deposited(3));

        assert_eq!(ledger.version(), 1);
        assert!(ledger.data().is_none());
    }

    #[test]
    fn test_from_snapshot_resumes_at_snapshot_version() {
        let mut ledger = Aggregate::from_snapshot(
            ledger(),
            "l-1",
            Versioned {
                data: 40,
                version: 7,
            },
        );

        ledger.apply(&Deposited(2));

        assert_eq!(ledger.info().version, 8);
        assert_eq!(ledger.into_data(), Some(42));
    }
}
