//! `PostgreSQL` change stream over a logical replication slot.
//!
//! Changes are read with `pg_logical_slot_peek_changes` using the
//! `wal2json` output plugin (format version 2, one JSON message per change).
//! Peeking leaves the slot where it is; the slot only moves forward when
//! the reader releases an offset it has checkpointed, so after a crash the
//! source re-delivers everything since the last checkpoint.
//!
//! Every change of a transaction is reported at the transaction's commit
//! position, which is what the slot itself resumes from.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tidewater_event_store::schema;
use tracing::{debug, info, trace};

use crate::error::CdcError;
use crate::offset::Offset;
use crate::stream::{Change, ChangeRecord, ChangeStream, EventRow};

const OUTPUT_PLUGIN: &str = "wal2json";

/// Settings for [`PgLogicalStream`].
#[derive(Debug, Clone)]
pub struct PgLogicalStreamConfig {
    /// Connection string of the database holding the events table.
    pub database_url: String,
    /// Logical replication slot to read from.
    pub slot_name: String,
    /// Create the slot on connect if it does not exist.
    pub create_slot: bool,
    /// How long `poll` waits after finding nothing new.
    pub poll_interval: Duration,
    /// A poll stops reading after the transaction that brings it to this
    /// many records, so it may return more; transactions are never split.
    pub batch_size: usize,
}

impl PgLogicalStreamConfig {
    /// Default settings for the database at `database_url`.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }
}

impl Default for PgLogicalStreamConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/tidewater".to_owned(),
            slot_name: "tidewater".to_owned(),
            create_slot: false,
            poll_interval: Duration::from_millis(500),
            batch_size: 500,
        }
    }
}

/// Change stream backed by a `wal2json` logical replication slot.
#[derive(Debug)]
pub struct PgLogicalStream {
    config: PgLogicalStreamConfig,
    pool: Option<PgPool>,
    cursor: Option<Offset>,
}

impl PgLogicalStream {
    /// Creates an unconnected stream.
    #[must_use]
    pub fn new(config: PgLogicalStreamConfig) -> Self {
        Self {
            config,
            pool: None,
            cursor: None,
        }
    }

    async fn ensure_slot(&self, pool: &PgPool) -> Result<(), CdcError> {
        let slot = &self.config.slot_name;
        let plugin: Option<Option<String>> = sqlx::query_scalar(
            "SELECT plugin::text FROM pg_replication_slots WHERE slot_name = $1",
        )
        .bind(slot)
        .fetch_optional(pool)
        .await
        .map_err(|e| CdcError::Connect(e.to_string()))?;

        match plugin {
            Some(Some(plugin)) if plugin == OUTPUT_PLUGIN => Ok(()),
            Some(plugin) => Err(CdcError::Connect(format!(
                "replication slot {slot} uses {}, not {OUTPUT_PLUGIN}",
                plugin.as_deref().unwrap_or("physical replication")
            ))),
            None if self.config.create_slot => {
                sqlx::query("SELECT 1 FROM pg_create_logical_replication_slot($1, $2)")
                    .bind(slot)
                    .bind(OUTPUT_PLUGIN)
                    .execute(pool)
                    .await
                    .map_err(|e| CdcError::Connect(e.to_string()))?;
                info!(slot = %slot, "created replication slot");
                Ok(())
            }
            None => Err(CdcError::Connect(format!(
                "replication slot {slot} does not exist"
            ))),
        }
    }
}

#[async_trait]
impl ChangeStream for PgLogicalStream {
    async fn connect(&mut self, from: &Offset) -> Result<(), CdcError> {
        from.to_pg_lsn()?;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&self.config.database_url)
            .await
            .map_err(|e| CdcError::Connect(e.to_string()))?;
        self.ensure_slot(&pool).await?;
        self.pool = Some(pool);
        self.cursor = Some(from.clone());
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<ChangeRecord>, CdcError> {
        let (Some(pool), Some(cursor)) = (&self.pool, &self.cursor) else {
            return Err(CdcError::Stream("not connected".into()));
        };

        let mut rows = sqlx::query_as::<_, (String, String)>(
            r"
            SELECT lsn::text, data
            FROM pg_logical_slot_peek_changes(
                $1, NULL, NULL,
                'format-version', '2',
                'include-transaction', 'true',
                'add-tables', $2
            )
            ",
        )
        .bind(&self.config.slot_name)
        .bind(format!("{}.{}", schema::SCHEMA, schema::EVENTS_TABLE))
        .fetch(pool);

        let mut changes = CommittedChanges::new(cursor.clone(), self.config.batch_size);
        let mut peeked = 0_usize;
        while let Some((lsn, data)) = rows
            .try_next()
            .await
            .map_err(|e| CdcError::Stream(e.to_string()))?
        {
            peeked += 1;
            if changes.push(&lsn, &data)? {
                break;
            }
        }
        drop(rows);

        let records = changes.into_records();
        trace!(peeked, records = records.len(), "polled replication slot");

        match records.last() {
            Some(last) => self.cursor = Some(last.offset.clone()),
            None => tokio::time::sleep(self.config.poll_interval).await,
        }
        Ok(records)
    }

    async fn release(&mut self, offset: &Offset) -> Result<(), CdcError> {
        let Some(pool) = &self.pool else {
            return Err(CdcError::Stream("not connected".into()));
        };
        sqlx::query("SELECT 1 FROM pg_replication_slot_advance($1, CAST($2 AS pg_lsn))")
            .bind(&self.config.slot_name)
            .bind(offset.to_pg_lsn()?)
            .execute(pool)
            .await
            .map_err(|e| CdcError::Stream(e.to_string()))?;
        debug!(slot = %self.config.slot_name, offset = %offset, "advanced replication slot");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), CdcError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.cursor = None;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Message {
    action: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    columns: Vec<Column>,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
    value: serde_json::Value,
}

/// Groups peeked `(lsn, data)` rows into transactions, one row at a time,
/// keeping the changes of every transaction committed after `after`, each
/// stamped with its commit offset. A transaction with no visible change
/// yields one skipped record so that the offset still advances past it.
struct CommittedChanges {
    after: Offset,
    limit: usize,
    pending: Vec<Change>,
    records: Vec<ChangeRecord>,
}

impl CommittedChanges {
    fn new(after: Offset, limit: usize) -> Self {
        Self {
            after,
            limit,
            pending: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Feeds one peeked row. Returns `true` once a commit has brought the
    /// collected records to `limit`; later rows must not be fed.
    fn push(&mut self, lsn: &str, data: &str) -> Result<bool, CdcError> {
        let message: Message = serde_json::from_str(data)
            .map_err(|e| CdcError::Decode(format!("malformed wal2json message at {lsn}: {e}")))?;
        match message.action.as_str() {
            "B" => self.pending.clear(),
            "C" => {
                let offset = Offset::from_pg_lsn(lsn)?;
                let changes = std::mem::take(&mut self.pending);
                if offset <= self.after {
                    return Ok(false);
                }
                if changes.is_empty() {
                    self.records.push(ChangeRecord::skipped(offset, "empty transaction"));
                } else {
                    self.records.extend(changes.into_iter().map(|change| ChangeRecord {
                        offset: offset.clone(),
                        change,
                    }));
                }
                return Ok(self.records.len() >= self.limit);
            }
            "I" if is_events_table(&message) => {
                self.pending.push(Change::Insert(event_row(&message)?));
            }
            action => self.pending.push(Change::Skipped(format!(
                "{action} on {}.{}",
                message.schema.as_deref().unwrap_or("?"),
                message.table.as_deref().unwrap_or("?")
            ))),
        }
        Ok(false)
    }

    fn into_records(self) -> Vec<ChangeRecord> {
        self.records
    }
}

fn is_events_table(message: &Message) -> bool {
    message.schema.as_deref() == Some(schema::SCHEMA)
        && message.table.as_deref() == Some(schema::EVENTS_TABLE)
}

fn event_row(message: &Message) -> Result<EventRow, CdcError> {
    let column = |name: &str| {
        message
            .columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.value)
            .ok_or_else(|| CdcError::Decode(format!("insert is missing column {name}")))
    };
    let text = |name: &str| -> Result<String, CdcError> {
        column(name)?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| CdcError::Decode(format!("column {name} is not text")))
    };

    let aggregate_version = column(schema::AGGREGATE_VERSION)?
        .as_u64()
        .ok_or_else(|| {
            CdcError::Decode(format!("column {} is not a version", schema::AGGREGATE_VERSION))
        })?;
    let data = match column(schema::DATA)? {
        serde_json::Value::String(raw) => raw.clone().into_bytes(),
        other => other.to_string().into_bytes(),
    };

    Ok(EventRow {
        aggregate_type: text(schema::AGGREGATE_TYPE)?,
        aggregate_id: text(schema::AGGREGATE_ID)?,
        aggregate_version,
        event: text(schema::EVENT)?,
        data,
    })
}
