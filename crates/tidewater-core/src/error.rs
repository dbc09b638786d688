//! Domain and configuration error types.

use thiserror::Error;

/// Errors surfaced by command handling, reconstruction and the stores.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An initializing command targeted an aggregate that already exists.
    #[error("{aggregate_type} {aggregate_id} already exists")]
    AggregateIdConflict {
        /// Type of the existing aggregate.
        aggregate_type: String,
        /// Identifier of the existing aggregate.
        aggregate_id: String,
    },

    /// Optimistic concurrency conflict: the caller's view of the aggregate is
    /// stale, or another writer appended first.
    #[error(
        "version conflict on {aggregate_type} {aggregate_id}: expected version {expected}, found {}",
        describe_version(.actual)
    )]
    AggregateVersionConflict {
        /// Type of the conflicting aggregate.
        aggregate_type: String,
        /// Identifier of the conflicting aggregate.
        aggregate_id: String,
        /// The version the writer built on.
        expected: u64,
        /// The version actually observed, when known.
        actual: Option<u64>,
    },

    /// An ordinary command or query targeted an aggregate with no history.
    #[error("no {aggregate_type} with ID {aggregate_id}")]
    NoSuchAggregate {
        /// Requested aggregate type.
        aggregate_type: String,
        /// Requested aggregate identifier.
        aggregate_id: String,
    },

    /// No service is registered for the aggregate type.
    #[error("no such aggregate type {0}")]
    NoSuchAggregateType(String),

    /// The command name is absent from the command registry.
    #[error("no such command {0}")]
    NoSuchCommand(String),

    /// The event name or type is absent from the event registry.
    #[error("no such event {0}")]
    NoSuchEvent(String),

    /// A handler rejected the command on business-rule grounds.
    #[error("rejected command: {0}")]
    RejectedCommand(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backing store or connection failed.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Shorthand for a business-rule rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::RejectedCommand(reason.into())
    }

    /// Returns `true` for either kind of conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AggregateIdConflict { .. } | Self::AggregateVersionConflict { .. }
        )
    }
}

fn describe_version(version: &Option<u64>) -> String {
    version.map_or_else(|| "an existing event".to_owned(), |v| v.to_string())
}

/// Errors detected while assembling aggregates, registries and services.
///
/// These are fatal at startup and never produced at request time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The aggregate has no initializing command handler.
    #[error("aggregate {0} has no initializing command")]
    MissingInitializingCommand(String),

    /// The aggregate has no initializing event fold.
    #[error("aggregate {0} has no initializing event")]
    MissingInitializingEvent(String),

    /// A command or event type was registered twice on one aggregate.
    #[error("aggregate {aggregate_type} registers {type_name} more than once")]
    DuplicateHandler {
        /// The aggregate being built.
        aggregate_type: String,
        /// The duplicated payload type.
        type_name: &'static str,
    },

    /// A wire name was registered twice in a type registry.
    #[error("name {0} is registered more than once")]
    DuplicateName(String),

    /// A payload type was registered twice in a type registry.
    #[error("type {0} is registered more than once")]
    DuplicateType(&'static str),

    /// Two services claim the same aggregate type.
    #[error("a service for aggregate type {0} is already registered")]
    DuplicateService(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_message_with_known_actual() {
        let err = DomainError::AggregateVersionConflict {
            aggregate_type: "Counter".into(),
            aggregate_id: "c-1".into(),
            expected: 2,
            actual: Some(4),
        };

        assert_eq!(
            err.to_string(),
            "version conflict on Counter c-1: expected version 2, found 4"
        );
    }

    #[test]
    fn test_version_conflict_message_from_store_collision() {
        let err = DomainError::AggregateVersionConflict {
            aggregate_type: "Counter".into(),
            aggregate_id: "c-1".into(),
            expected: 1,
            actual: None,
        };

        assert_eq!(
            err.to_string(),
            "version conflict on Counter c-1: expected version 1, found an existing event"
        );
    }

    #[test]
    fn test_is_conflict_covers_both_conflict_kinds() {
        assert!(
            DomainError::AggregateIdConflict {
                aggregate_type: "Counter".into(),
                aggregate_id: "c-1".into(),
            }
            .is_conflict()
        );
        assert!(!DomainError::rejected("nope").is_conflict());
    }
}
