//! `PostgreSQL` implementation of the `SnapshotStore` trait.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::trace;

use tidewater_core::{AggregateInfo, DomainError, SnapshotStore, Versioned};

use crate::{from_db_version, infrastructure, to_db_version};

/// PostgreSQL-backed snapshot store for one aggregate type.
///
/// Data is stored as JSONB, one row per (type, id, version).
#[derive(Debug)]
pub struct PgSnapshotStore<D> {
    pool: PgPool,
    aggregate_type: String,
    retain: Option<i64>,
    _data: PhantomData<fn() -> D>,
}

impl<D> Clone for PgSnapshotStore<D> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            aggregate_type: self.aggregate_type.clone(),
            retain: self.retain,
            _data: PhantomData,
        }
    }
}

impl<D> PgSnapshotStore<D> {
    /// Creates a store for snapshots of `aggregate_type` that keeps every
    /// version.
    #[must_use]
    pub fn new(pool: PgPool, aggregate_type: impl Into<String>) -> Self {
        Self {
            pool,
            aggregate_type: aggregate_type.into(),
            retain: None,
            _data: PhantomData,
        }
    }

    /// Keeps at most `retain` snapshots per aggregate, dropping the oldest.
    #[must_use]
    pub fn with_retention(mut self, retain: u32) -> Self {
        self.retain = Some(i64::from(retain.max(1)));
        self
    }
}

#[async_trait]
impl<D> SnapshotStore<D> for PgSnapshotStore<D>
where
    D: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static,
{
    async fn get_latest(&self, id: &str) -> Result<Option<Versioned<D>>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT aggregate_version, data
            FROM snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY aggregate_version DESC
            LIMIT 1
            ",
        )
        .bind(&self.aggregate_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;

        let Some(row) = row else {
            trace!(aggregate_type = %self.aggregate_type, aggregate_id = id, "no snapshot");
            return Ok(None);
        };
        let version: i64 = row.try_get("aggregate_version").map_err(infrastructure)?;
        let Json(data): Json<D> = row
            .try_get("data")
            .map_err(|e| DomainError::Serialization(e.to_string()))?;
        Ok(Some(Versioned {
            data,
            version: from_db_version(version)?,
        }))
    }

    async fn get(&self, id: &str, version: u64) -> Result<Option<D>, DomainError> {
        let data: Option<Json<D>> = sqlx::query_scalar(
            r"
            SELECT data
            FROM snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2 AND aggregate_version = $3
            ",
        )
        .bind(&self.aggregate_type)
        .bind(id)
        .bind(to_db_version(version)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;

        Ok(data.map(|Json(data)| data))
    }

    async fn put(&self, info: &AggregateInfo, data: &D) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO snapshots (aggregate_type, aggregate_id, aggregate_version, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aggregate_type, aggregate_id, aggregate_version)
            DO UPDATE SET data = EXCLUDED.data, recorded_at = now()
            ",
        )
        .bind(&self.aggregate_type)
        .bind(&info.id)
        .bind(to_db_version(info.version)?)
        .bind(Json(data))
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;

        if let Some(retain) = self.retain {
            sqlx::query(
                r"
                DELETE FROM snapshots
                WHERE aggregate_type = $1
                  AND aggregate_id = $2
                  AND aggregate_version NOT IN (
                      SELECT aggregate_version
                      FROM snapshots
                      WHERE aggregate_type = $1 AND aggregate_id = $2
                      ORDER BY aggregate_version DESC
                      LIMIT $3
                  )
                ",
            )
            .bind(&self.aggregate_type)
            .bind(&info.id)
            .bind(retain)
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;
        }

        trace!(aggregate = %info, "stored snapshot");
        Ok(())
    }
}
