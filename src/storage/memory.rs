//! In-memory sample store (no persistence)
//!
//! Bounded ring buffer per server. Useful for tests, for deployments that
//! only care about live status, and as the default when no storage is
//! configured. All data is lost on restart and long analytics windows will
//! only see what the ring still holds.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{QueryRange, SampleStore};
use super::error::StorageResult;
use super::schema::SampleRow;

/// Default maximum samples kept per server (a bit over a day of one-minute
/// samples).
pub const DEFAULT_CAPACITY_PER_SERVER: usize = 2048;

pub struct MemoryStore {
    samples: RwLock<HashMap<String, VecDeque<SampleRow>>>,
    capacity_per_server: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_PER_SERVER)
    }

    pub fn with_capacity(capacity_per_server: usize) -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            capacity_per_server: capacity_per_server.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn insert_batch(&self, rows: Vec<SampleRow>) -> StorageResult<()> {
        let mut samples = self.samples.write().await;

        for row in rows {
            let ring = samples.entry(row.server_id.clone()).or_default();

            // Replace a replayed (server, timestamp) row instead of
            // duplicating it
            if let Some(existing) = ring.iter_mut().find(|r| r.timestamp == row.timestamp) {
                *existing = row;
                continue;
            }

            if ring.len() >= self.capacity_per_server {
                ring.pop_front();
            }

            // Samples normally arrive in order; tolerate stragglers by
            // inserting at the right position instead of assuming push_back.
            let position = ring
                .iter()
                .rposition(|r| r.timestamp <= row.timestamp)
                .map(|i| i + 1)
                .unwrap_or(0);
            ring.insert(position, row);
        }

        Ok(())
    }

    async fn query_range(&self, query: QueryRange) -> StorageResult<Vec<SampleRow>> {
        debug!("querying in-memory store for {}", query.server_id);

        let samples = self.samples.read().await;
        let rows = samples
            .get(&query.server_id)
            .map(|ring| {
                ring.iter()
                    .filter(|r| r.timestamp >= query.start && r.timestamp < query.end)
                    .take(query.limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(rows)
    }

    async fn query_latest(&self, server_id: &str, limit: usize) -> StorageResult<Vec<SampleRow>> {
        let samples = self.samples.read().await;
        let mut rows: Vec<SampleRow> = samples
            .get(server_id)
            .map(|ring| ring.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        rows.reverse();

        Ok(rows)
    }

    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut samples = self.samples.write().await;
        let mut deleted = 0;

        for ring in samples.values_mut() {
            let before_len = ring.len();
            ring.retain(|r| r.timestamp >= before);
            deleted += before_len - ring.len();
        }

        Ok(deleted)
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let samples = self.samples.read().await;
        let total: usize = samples.values().map(|r| r.len()).sum();
        Ok(format!(
            "In-Memory: {} samples across {} servers",
            total,
            samples.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
