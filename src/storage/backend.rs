//! Sample store trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::SampleRow;

/// Query parameters for fetching samples within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    pub server_id: String,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (exclusive) - a day query is `[00:00, next 00:00)`
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// Trait for sample stores.
///
/// The analytics pipeline only ever reads through this trait; the engine
/// writes through it on ingest. Implementations must be `Send + Sync` as
/// they are shared across async tasks.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Insert a batch of samples.
    ///
    /// Writes of the same (server, timestamp) replace the stored row, so
    /// replays from a collector are harmless.
    async fn insert_batch(&self, samples: Vec<SampleRow>) -> StorageResult<()>;

    /// Query samples within a time range, ordered by timestamp ascending.
    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<SampleRow>>;

    /// The N most recent samples for a server, oldest first.
    async fn query_latest(&self, server_id: &str, limit: usize) -> StorageResult<Vec<SampleRow>>;

    /// Delete samples older than the given timestamp; returns how many were
    /// removed. Called by the scheduler's retention cleanup.
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Human-readable store statistics (row counts, disk usage).
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the store and release resources.
    async fn close(&self) -> StorageResult<()>;
}
