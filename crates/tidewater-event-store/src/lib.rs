//! Tidewater Event Store — `PostgreSQL` persistence for events and snapshots.

pub mod pg_event_store;
pub mod pg_snapshot_store;
pub mod schema;

use tidewater_core::DomainError;

/// Converts a stored version into a domain version.
pub(crate) fn from_db_version(version: i64) -> Result<u64, DomainError> {
    u64::try_from(version)
        .map_err(|_| DomainError::Infrastructure(format!("negative aggregate version {version}")))
}

/// Converts a domain version into a stored version.
pub(crate) fn to_db_version(version: u64) -> Result<i64, DomainError> {
    i64::try_from(version)
        .map_err(|_| DomainError::Infrastructure(format!("aggregate version {version} out of range")))
}

pub(crate) fn infrastructure(e: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(e.to_string())
}
