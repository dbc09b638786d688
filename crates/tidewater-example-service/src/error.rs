//! Tidewater example service — error types.

use thiserror::Error;
use tidewater_cdc::CdcError;
use tidewater_core::ConfigurationError;

/// Startup and runtime errors for the worker.
#[derive(Debug, Error)]
pub enum AppError {
    /// An aggregate, registry or service was assembled inconsistently.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The log reader failed to start or stopped with an error.
    #[error("change stream error: {0}")]
    Cdc(#[from] CdcError),

    /// Signal handling or other I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
