//! Sample row definition
//!
//! Rows use a hybrid layout: the values the analytics pipeline queries most
//! (cpu/memory/disk/latency) live in typed columns, the complete sample
//! travels alongside as a JSON payload. Adding a new collector field is a
//! payload change, not a migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MetricSample;

/// A single sample row as stored in a sample store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRow {
    /// When the sample was collected (always UTC)
    pub timestamp: DateTime<Utc>,

    pub server_id: String,

    // === Aggregate columns (frequently queried) ===
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub latency_ms: f64,

    // === Full sample (everything, including network/load detail) ===
    pub payload: MetricSample,
}

impl SampleRow {
    pub fn from_sample(sample: &MetricSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            server_id: sample.server_id.clone(),
            cpu_pct: sample.cpu_pct,
            mem_pct: sample.mem_pct,
            disk_pct: sample.disk_pct,
            latency_ms: sample.network.latency_ms,
            payload: sample.clone(),
        }
    }

    pub fn into_sample(self) -> MetricSample {
        self.payload
    }
}
