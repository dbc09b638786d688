//! Command-line and environment configuration for the worker.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tidewater_cdc::{Offset, PgLogicalStreamConfig, ReaderConfig};

/// Tails the event table's replication slot and keeps game snapshots
/// current.
#[derive(Debug, Clone, Parser)]
#[command(name = "tidewater-worker", version, about)]
pub struct Args {
    /// `PostgreSQL` connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Size of the store connection pool.
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// Logical replication slot (`wal2json`) to read from.
    #[arg(long, env = "SLOT_NAME", default_value = "tidewater")]
    pub slot_name: String,

    /// Create the replication slot if it does not exist.
    #[arg(long, env = "CREATE_SLOT")]
    pub create_slot: bool,

    /// Offset (`segment/position`) to start from when no checkpoint exists.
    #[arg(long, env = "STARTING_OFFSET")]
    pub starting_offset: Option<Offset>,

    /// Checkpoint file holding the last persisted offset.
    #[arg(long, env = "OFFSET_FILE", default_value = "offset")]
    pub offset_file: PathBuf,

    /// Seconds between offset checkpoints.
    #[arg(
        long,
        env = "PERSIST_OFFSET_INTERVAL",
        default_value_t = 100,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub persist_offset_interval: u64,

    /// Milliseconds to wait after a poll finds nothing new.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Soft cap on change records per poll.
    #[arg(long, env = "BATCH_SIZE", default_value_t = 500)]
    pub batch_size: usize,

    /// Attempts to establish the change stream before giving up.
    #[arg(long, env = "CONNECT_MAX_ATTEMPTS", default_value_t = 30)]
    pub connect_max_attempts: usize,

    /// Apply the schema migrations before starting.
    #[arg(long, env = "RUN_MIGRATIONS")]
    pub run_migrations: bool,
}

impl Args {
    /// Settings for the log reader.
    #[must_use]
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            starting_offset: self.starting_offset.clone(),
            offset_file: self.offset_file.clone(),
            persist_interval: Duration::from_secs(self.persist_offset_interval),
            connect_max_attempts: self.connect_max_attempts,
            ..ReaderConfig::default()
        }
    }

    /// Settings for the replication-slot stream.
    #[must_use]
    pub fn stream_config(&self) -> PgLogicalStreamConfig {
        PgLogicalStreamConfig {
            database_url: self.database_url.clone(),
            slot_name: self.slot_name.clone(),
            create_slot: self.create_slot,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
        }
    }
}
