//! SQLite sample store implementation
//!
//! Embedded store for small to medium fleets. WAL mode keeps analytics
//! reads from blocking the ingest writes; the connection pool is shared
//! between the engine (writes) and the scheduler (bulk reads).

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{QueryRange, SampleStore};
use super::error::{StorageError, StorageResult};
use super::schema::SampleRow;
use crate::MetricSample;

pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (and create if missing) the database, run migrations, and
    /// configure SQLite for concurrent reads during writes.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite sample store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn row_from_sql(row: &sqlx::sqlite::SqliteRow) -> StorageResult<SampleRow> {
        let payload_str: String = row.get("payload");
        let payload: MetricSample = serde_json::from_str(&payload_str).map_err(|e| {
            StorageError::SerializationError(format!("failed to deserialize payload: {}", e))
        })?;

        Ok(SampleRow {
            timestamp: Self::millis_to_timestamp(row.get("timestamp")),
            server_id: row.get("server_id"),
            cpu_pct: row.get("cpu_pct"),
            mem_pct: row.get("mem_pct"),
            disk_pct: row.get("disk_pct"),
            latency_ms: row.get("latency_ms"),
            payload,
        })
    }
}

#[async_trait]
impl SampleStore for SqliteStore {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn insert_batch(&self, samples: Vec<SampleRow>) -> StorageResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        for sample in samples {
            let timestamp = Self::timestamp_to_millis(&sample.timestamp);
            let payload = serde_json::to_string(&sample.payload).map_err(|e| {
                StorageError::SerializationError(format!("failed to serialize payload: {}", e))
            })?;

            sqlx::query(
                r#"
                INSERT INTO samples (
                    server_id, timestamp, cpu_pct, mem_pct, disk_pct, latency_ms, payload
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (server_id, timestamp) DO UPDATE SET
                    cpu_pct = excluded.cpu_pct,
                    mem_pct = excluded.mem_pct,
                    disk_pct = excluded.disk_pct,
                    latency_ms = excluded.latency_ms,
                    payload = excluded.payload
                "#,
            )
            .bind(&sample.server_id)
            .bind(timestamp)
            .bind(sample.cpu_pct)
            .bind(sample.mem_pct)
            .bind(sample.disk_pct)
            .bind(sample.latency_ms)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self), fields(server_id = %query.server_id))]
    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<SampleRow>> {
        let start_millis = Self::timestamp_to_millis(&query.start);
        let end_millis = Self::timestamp_to_millis(&query.end);

        let limit_clause = query
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let sql = format!(
            r#"
            SELECT server_id, timestamp, cpu_pct, mem_pct, disk_pct, latency_ms, payload
            FROM samples
            WHERE server_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp ASC
            {}
            "#,
            limit_clause
        );

        let rows = sqlx::query(&sql)
            .bind(&query.server_id)
            .bind(start_millis)
            .bind(end_millis)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let samples: StorageResult<Vec<SampleRow>> =
            rows.iter().map(Self::row_from_sql).collect();

        let results = samples?;
        debug!("query returned {} samples", results.len());
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn query_latest(&self, server_id: &str, limit: usize) -> StorageResult<Vec<SampleRow>> {
        let rows = sqlx::query(
            r#"
            SELECT server_id, timestamp, cpu_pct, mem_pct, disk_pct, latency_ms, payload
            FROM samples
            WHERE server_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(server_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let samples: StorageResult<Vec<SampleRow>> =
            rows.iter().map(Self::row_from_sql).collect();

        let mut results = samples?;
        // Chronological order, oldest first
        results.reverse();
        Ok(results)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before_millis = Self::timestamp_to_millis(&before);

        let result = sqlx::query("DELETE FROM samples WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old samples", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM samples")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(format!(
            "SQLite: {} rows, {:.2} MB on disk",
            row.0,
            file_size as f64 / 1_000_000.0
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite sample store");
        self.pool.close().await;
        Ok(())
    }
}
