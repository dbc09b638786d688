//! Event store database schema.
//!
//! The tables themselves are created by the migrations in `migrations/`.
//! These are the events table's names as the change-stream decoder sees
//! them in replication messages.

/// Table holding the event log.
pub const EVENTS_TABLE: &str = "events";

/// Schema the events table lives in.
pub const SCHEMA: &str = "public";

/// Aggregate type column.
pub const AGGREGATE_TYPE: &str = "aggregate_type";

/// Aggregate identifier column.
pub const AGGREGATE_ID: &str = "aggregate_id";

/// Aggregate version column; unique together with type and id.
pub const AGGREGATE_VERSION: &str = "aggregate_version";

/// Event wire name column.
pub const EVENT: &str = "event";

/// Serialized payload column.
pub const DATA: &str = "data";
