//! Wiring of registries, stores, services and the change-stream router.

use std::sync::Arc;

use serde::Deserialize;
use sqlx::PgPool;
use tidewater_cdc::DefaultEventRouter;
use tidewater_core::{
    AggregateEvent, AggregateService, AggregateServiceRegistry, CommandRegistry,
    ConfigurationError, DomainError, EventRegistry, EventStore, InMemoryEventStore,
    InMemorySnapshotStore, SnapshotStore,
};
use tidewater_event_store::pg_event_store::PgEventStore;
use tidewater_event_store::pg_snapshot_store::PgSnapshotStore;
use tracing::info;

use crate::tic_tac_toe::{self, Board, GameStarted, StartGame, TIC_TAC_TOE, TakeTurn, TurnTaken};

/// A command as submitted by a caller: a registered name and a JSON body.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    /// Registered command name.
    pub command: String,
    /// Command body; `null` for commands without fields.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Every event the service stores, by wire name.
///
/// # Errors
///
/// Returns `ConfigurationError` if a name or type is registered twice.
pub fn event_registry() -> Result<EventRegistry, ConfigurationError> {
    EventRegistry::builder()
        .register::<GameStarted>("GameStarted")
        .register::<TurnTaken>("TurnTaken")
        .build()
}

/// Every command the service accepts, by wire name.
///
/// # Errors
///
/// Returns `ConfigurationError` if a name or type is registered twice.
pub fn command_registry() -> Result<CommandRegistry, ConfigurationError> {
    CommandRegistry::builder()
        .register::<StartGame>("StartGame")
        .register::<TakeTurn>("TakeTurn")
        .build()
}

/// The assembled engine.
pub struct Engine {
    events: Arc<EventRegistry>,
    commands: Arc<CommandRegistry>,
    services: Arc<AggregateServiceRegistry>,
    games: Arc<AggregateService<Board>>,
}

impl Engine {
    /// Assembles the engine over the given stores.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if an aggregate or registry is invalid.
    pub fn new(
        events: Arc<EventRegistry>,
        event_store: Arc<dyn EventStore>,
        game_snapshots: Arc<dyn SnapshotStore<Board>>,
    ) -> Result<Self, ConfigurationError> {
        let games = Arc::new(
            AggregateService::new(tic_tac_toe::definition()?, event_store)
                .with_snapshot_store(game_snapshots),
        );
        let mut services = AggregateServiceRegistry::new();
        services.register(games.clone())?;
        info!(services = ?services, "assembled aggregate services");

        Ok(Self {
            events,
            commands: Arc::new(command_registry()?),
            services: Arc::new(services),
            games,
        })
    }

    /// An engine over `PostgreSQL` event and snapshot stores.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if an aggregate or registry is invalid.
    pub fn postgres(pool: &PgPool) -> Result<Self, ConfigurationError> {
        let events = Arc::new(event_registry()?);
        let event_store = Arc::new(PgEventStore::new(pool.clone(), events.clone()));
        let snapshots = Arc::new(PgSnapshotStore::<Board>::new(pool.clone(), TIC_TAC_TOE));
        Self::new(events, event_store, snapshots)
    }

    /// An engine over in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if an aggregate or registry is invalid.
    pub fn in_memory() -> Result<Self, ConfigurationError> {
        Self::new(
            Arc::new(event_registry()?),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
        )
    }

    /// The event registry shared with the stores.
    #[must_use]
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// The registered aggregate services.
    #[must_use]
    pub fn services(&self) -> &Arc<AggregateServiceRegistry> {
        &self.services
    }

    /// A router that feeds change-stream rows to every service.
    #[must_use]
    pub fn router(&self) -> DefaultEventRouter {
        DefaultEventRouter::new(self.events.clone(), self.services.clone())
    }

    /// Decodes `request` and submits it to the service owning
    /// `aggregate_type`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchCommand` or `Serialization` if the request does not
    /// decode, `NoSuchAggregateType` if no service owns the type, and
    /// otherwise whatever the service returns.
    pub async fn submit(
        &self,
        aggregate_type: &str,
        id: &str,
        expected_version: Option<u64>,
        request: &CommandRequest,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        let body = serde_json::to_vec(&request.data)
            .map_err(|e| DomainError::Serialization(e.to_string()))?;
        let command = self.commands.decode(&request.command, &body)?;
        self.services
            .handle_command_for(aggregate_type, id, expected_version, command.as_ref())
            .await
    }

    /// The current board of game `id`, rendered as text.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchAggregate` if the game does not exist, or a store
    /// error.
    pub async fn render_game(&self, id: &str) -> Result<String, DomainError> {
        let game = self.games.load_latest(id).await?;
        game.and_then(|game| game.data().map(ToString::to_string))
            .ok_or_else(|| DomainError::NoSuchAggregate {
                aggregate_type: TIC_TAC_TOE.to_owned(),
                aggregate_id: id.to_owned(),
            })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("events", &self.events)
            .field("commands", &self.commands)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}
