//! `PostgreSQL` implementation of the `EventStore` trait.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use tidewater_core::{AggregateEvent, AggregateInfo, DomainError, EventRegistry, EventStore};

use crate::{from_db_version, infrastructure, to_db_version};

/// PostgreSQL-backed event store.
///
/// Payloads are stored as JSONB under their registered wire name. Reads
/// return lazily decoded events.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    registry: Arc<EventRegistry>,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool, registry: Arc<EventRegistry>) -> Self {
        Self { pool, registry }
    }

    fn encode(&self, event: &AggregateEvent) -> Result<(String, String), DomainError> {
        let (name, raw) = match event.raw() {
            Some((name, raw)) => (name.to_owned(), raw.to_vec()),
            None => {
                let (name, raw) = self.registry.encode(event.event()?)?;
                (name.to_owned(), raw)
            }
        };
        let data = String::from_utf8(raw)
            .map_err(|e| DomainError::Serialization(format!("payload of {name} is not UTF-8: {e}")))?;
        Ok((name, data))
    }

    async fn fetch(
        &self,
        aggregate_type: &str,
        id: &str,
        after: u64,
        up_to: Option<u64>,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        let upper = up_to.map_or(Ok(i64::MAX), to_db_version)?;
        let rows = sqlx::query(
            r"
            SELECT aggregate_version, event, data::text AS data
            FROM events
            WHERE aggregate_type = $1
              AND aggregate_id = $2
              AND aggregate_version > $3
              AND aggregate_version <= $4
            ORDER BY aggregate_version
            ",
        )
        .bind(aggregate_type)
        .bind(id)
        .bind(to_db_version(after)?)
        .bind(upper)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        let base = AggregateInfo::new(aggregate_type, id);
        rows.iter()
            .map(|row| -> Result<AggregateEvent, DomainError> {
                let version: i64 = row.try_get("aggregate_version").map_err(infrastructure)?;
                let name: String = row.try_get("event").map_err(infrastructure)?;
                let data: String = row.try_get("data").map_err(infrastructure)?;
                let lazy = self
                    .registry
                    .lazy(&name, data.into_bytes())
                    .ok_or(DomainError::NoSuchEvent(name))?;
                Ok(AggregateEvent::lazy(
                    base.at_version(from_db_version(version)?),
                    lazy,
                ))
            })
            .collect()
    }
}

fn write_error(e: sqlx::Error, info: &AggregateInfo) -> DomainError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DomainError::AggregateVersionConflict {
                aggregate_type: info.aggregate_type.clone(),
                aggregate_id: info.id.clone(),
                expected: info.version.saturating_sub(1),
                actual: None,
            }
        }
        _ => infrastructure(e),
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn write(&self, events: &[AggregateEvent]) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(infrastructure)?;
        for event in events {
            let info = event.info();
            let (name, data) = self.encode(event)?;
            sqlx::query(
                r"
                INSERT INTO events (aggregate_type, aggregate_id, aggregate_version, event, data)
                VALUES ($1, $2, $3, $4, CAST($5 AS JSONB))
                ",
            )
            .bind(&info.aggregate_type)
            .bind(&info.id)
            .bind(to_db_version(info.version)?)
            .bind(&name)
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, info))?;
        }
        tx.commit().await.map_err(infrastructure)?;

        debug!(
            aggregate = %events[0].info(),
            count = events.len(),
            "wrote events"
        );
        Ok(())
    }

    async fn find_latest_version(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Option<u64>, DomainError> {
        let latest: Option<i64> = sqlx::query_scalar(
            r"
            SELECT MAX(aggregate_version)
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ",
        )
        .bind(aggregate_type)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(infrastructure)?;

        latest.map(from_db_version).transpose()
    }

    async fn find_all_events(
        &self,
        aggregate_type: &str,
        id: &str,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        self.fetch(aggregate_type, id, 0, None).await
    }

    async fn find_events_after_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        self.fetch(&info.aggregate_type, &info.id, info.version, None)
            .await
    }

    async fn find_events_up_to_version(
        &self,
        info: &AggregateInfo,
    ) -> Result<Vec<AggregateEvent>, DomainError> {
        self.fetch(&info.aggregate_type, &info.id, 0, Some(info.version))
            .await
    }
}
