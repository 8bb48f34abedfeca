//! PostgreSQL-backed [`StreamStore`].
//!
//! One row per stream id; fragments live in a JSONB array so an append is a
//! single atomic row update and readers always observe a prefix.
//!
//! ```no_run
//! # async fn example() -> Result<(), resumable_core::StoreError> {
//! use resumable_postgres::PgStreamStore;
//!
//! let store = PgStreamStore::connect(
//!     "postgres://localhost/app",
//!     resumable_core::DEFAULT_STREAM_TTL,
//! )
//! .await?;
//! store.ensure_schema().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resumable_core::{
    Fragment, StoreError, StreamId, StreamSlice, StreamState, StreamStatus, StreamStore,
    expiry_after,
};
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

const TABLE: &str = "resumable_streams";

/// Stream store over a `resumable_streams` table.
#[derive(Clone)]
pub struct PgStreamStore {
    pool: PgPool,
    ttl: Duration,
}

/// Buffer occupancy snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub active_streams: i64,
    pub completed_streams: i64,
    pub active_fragments: i64,
    pub completed_fragments: i64,
    /// Records past their expiry that the next sweep will delete.
    pub expired_streams: i64,
}

impl StoreStats {
    pub fn total_streams(&self) -> i64 {
        self.active_streams + self.completed_streams
    }

    pub fn average_fragments(&self) -> f64 {
        let total = self.total_streams();
        if total == 0 {
            return 0.0;
        }
        (self.active_fragments + self.completed_fragments) as f64 / total as f64
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::unavailable(e.to_string())
}

impl PgStreamStore {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Opens a small connection pool against `url`.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(db_error)?;
        Ok(Self::new(pool, ttl))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the table and its expiry index when missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                id TEXT PRIMARY KEY,
                owner_ref TEXT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                fragments JSONB NOT NULL DEFAULT '[]'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_fragment_at TIMESTAMPTZ NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {TABLE}_expires_at_idx ON {TABLE} (expires_at)"
        ))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        info!(table = TABLE, "stream schema ensured");
        Ok(())
    }

    /// Per-status stream and fragment counts plus the expired backlog.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT status,
                    COUNT(*)::BIGINT AS streams,
                    COALESCE(SUM(jsonb_array_length(fragments)), 0)::BIGINT AS fragments
             FROM {TABLE}
             GROUP BY status"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut stats = StoreStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(db_error)?;
            let streams: i64 = row.try_get("streams").map_err(db_error)?;
            let fragments: i64 = row.try_get("fragments").map_err(db_error)?;
            match status.parse::<StreamStatus>() {
                Ok(StreamStatus::Active) => {
                    stats.active_streams = streams;
                    stats.active_fragments = fragments;
                }
                Ok(StreamStatus::Completed) => {
                    stats.completed_streams = streams;
                    stats.completed_fragments = fragments;
                }
                Err(_) => debug!(status = %status, "ignoring rows with unknown status"),
            }
        }

        let expired = sqlx::query(&format!(
            "SELECT COUNT(*)::BIGINT AS expired FROM {TABLE} WHERE expires_at < now()"
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        stats.expired_streams = expired.try_get("expired").map_err(db_error)?;
        Ok(stats)
    }
}

fn decode_status(id: &StreamId, row: &PgRow) -> Result<StreamStatus, StoreError> {
    let raw: String = row.try_get("status").map_err(db_error)?;
    raw.parse().map_err(|e: String| StoreError::corrupt(id, e))
}

fn decode_fragments(
    id: &StreamId,
    row: &PgRow,
    column: &str,
) -> Result<Vec<Fragment>, StoreError> {
    let Json(fragments): Json<Vec<Fragment>> = row
        .try_get(column)
        .map_err(|e| StoreError::corrupt(id, format!("{column}: {e}")))?;
    Ok(fragments)
}

#[async_trait]
impl StreamStore for PgStreamStore {
    async fn get(&self, id: &StreamId) -> Result<Option<StreamState>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT id, owner_ref, status, fragments, created_at, last_fragment_at, expires_at
             FROM {TABLE} WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(StreamState {
            id: id.clone(),
            owner_ref: row.try_get("owner_ref").map_err(db_error)?,
            status: decode_status(id, &row)?,
            fragments: decode_fragments(id, &row, "fragments")?,
            created_at: row.try_get("created_at").map_err(db_error)?,
            last_fragment_at: row.try_get("last_fragment_at").map_err(db_error)?,
            expires_at: row.try_get("expires_at").map_err(db_error)?,
        }))
    }

    async fn read_from(
        &self,
        id: &StreamId,
        offset: usize,
    ) -> Result<Option<StreamSlice>, StoreError> {
        // Ordinality is 1-based, so `ord > offset` keeps indices >= offset.
        let row = sqlx::query(&format!(
            "SELECT status,
                    created_at,
                    jsonb_array_length(fragments)::BIGINT AS total,
                    COALESCE(
                        (SELECT jsonb_agg(elem ORDER BY ord)
                         FROM jsonb_array_elements(fragments) WITH ORDINALITY AS t(elem, ord)
                         WHERE ord > $2),
                        '[]'::jsonb
                    ) AS tail
             FROM {TABLE} WHERE id = $1"
        ))
        .bind(id.as_str())
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let total: i64 = row.try_get("total").map_err(db_error)?;
        let total = usize::try_from(total)
            .map_err(|_| StoreError::corrupt(id, format!("negative fragment count {total}")))?;
        Ok(Some(StreamSlice {
            status: decode_status(id, &row)?,
            offset,
            total,
            created_at: row.try_get("created_at").map_err(db_error)?,
            fragments: decode_fragments(id, &row, "tail")?,
        }))
    }

    async fn open(&self, id: &StreamId, owner_ref: Option<&str>) -> Result<(), StoreError> {
        let now = Utc::now();
        let result = sqlx::query(&format!(
            "INSERT INTO {TABLE}
                (id, owner_ref, status, fragments, created_at, last_fragment_at, expires_at)
             VALUES ($1, $2, 'active', '[]'::jsonb, $3, NULL, $4)
             ON CONFLICT (id) DO UPDATE SET
                owner_ref = EXCLUDED.owner_ref,
                status = 'active',
                fragments = '[]'::jsonb,
                created_at = GREATEST(
                    EXCLUDED.created_at,
                    {TABLE}.created_at + interval '1 microsecond'
                ),
                last_fragment_at = NULL,
                expires_at = EXCLUDED.expires_at
             WHERE {TABLE}.status = 'completed'"
        ))
        .bind(id.as_str())
        .bind(owner_ref)
        .bind(now)
        .bind(expiry_after(now, self.ttl))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyActive {
                stream_id: id.clone(),
            });
        }
        debug!(stream_id = %id, "stream generation opened");
        Ok(())
    }

    async fn append(&self, id: &StreamId, fragment: &Fragment) -> Result<(), StoreError> {
        let now = Utc::now();
        let result = sqlx::query(&format!(
            "INSERT INTO {TABLE}
                (id, owner_ref, status, fragments, created_at, last_fragment_at, expires_at)
             VALUES ($1, NULL, 'active', jsonb_build_array($2::text), $3, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
                fragments = {TABLE}.fragments || EXCLUDED.fragments,
                last_fragment_at = EXCLUDED.last_fragment_at
             WHERE {TABLE}.status = 'active'"
        ))
        .bind(id.as_str())
        .bind(fragment.as_str())
        .bind(now)
        .bind(expiry_after(now, self.ttl))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotActive {
                stream_id: id.clone(),
            });
        }
        Ok(())
    }

    async fn mark_completed(&self, id: &StreamId) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "UPDATE {TABLE} SET status = 'completed' WHERE id = $1"
        ))
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {TABLE} WHERE expires_at < $1"))
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_handles_empty_store() {
        assert_eq!(StoreStats::default().average_fragments(), 0.0);
        let stats = StoreStats {
            active_streams: 1,
            completed_streams: 3,
            active_fragments: 2,
            completed_fragments: 10,
            expired_streams: 0,
        };
        assert_eq!(stats.total_streams(), 4);
        assert_eq!(stats.average_fragments(), 3.0);
    }

    async fn store_from_env() -> Option<PgStreamStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PgStreamStore::connect(&url, Duration::from_secs(60))
            .await
            .expect("connect");
        store.ensure_schema().await.expect("schema");
        Some(store)
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch database"]
    async fn lifecycle_against_postgres() {
        let Some(store) = store_from_env().await else {
            eprintln!("skipping postgres test (DATABASE_URL missing)");
            return;
        };
        let id = StreamId::new(format!("it-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)));

        store.open(&id, Some("chat-1")).await.unwrap();
        assert!(matches!(
            store.open(&id, None).await,
            Err(StoreError::AlreadyActive { .. })
        ));
        for f in ["a", "b", "c"] {
            store.append(&id, &f.into()).await.unwrap();
        }

        let slice = store.read_from(&id, 1).await.unwrap().unwrap();
        assert_eq!(slice.total, 3);
        assert_eq!(slice.fragments, vec![Fragment::from("b"), "c".into()]);
        assert_eq!(slice.status, StreamStatus::Active);

        let generation = slice.created_at;
        store.mark_completed(&id).await.unwrap();
        store.mark_completed(&id).await.unwrap();
        assert!(matches!(
            store.append(&id, &"d".into()).await,
            Err(StoreError::NotActive { .. })
        ));
        let state = store.get(&id).await.unwrap().unwrap();
        assert!(state.is_completed());
        assert_eq!(state.owner_ref.as_deref(), Some("chat-1"));
        assert_eq!(state.fragments.len(), 3);

        store.open(&id, None).await.unwrap();
        let reopened = store.read_from(&id, 0).await.unwrap().unwrap();
        assert!(reopened.fragments.is_empty());
        assert!(reopened.created_at > generation);

        let deleted = store
            .delete_expired(Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(deleted >= 1);
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
