//! Shared helpers for integration tests

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetmon::alerts::condition::{
    AlertConditionConfig, AlertThresholds, AntiSpamPolicy, RecurrencePolicy, Threshold,
    ThresholdOp,
};
use fleetmon::config::Config;
use fleetmon::engine::MonitorEngine;
use fleetmon::storage::memory::MemoryStore;
use fleetmon::{LoadAverages, MetricSample, NetworkMetrics, Parameter};

/// A sample with everything in the normal range except the given cpu.
pub fn sample_at(server_id: &str, timestamp: DateTime<Utc>, cpu: f64) -> MetricSample {
    MetricSample {
        server_id: server_id.to_string(),
        timestamp,
        cpu_pct: cpu,
        mem_pct: 40.0,
        disk_pct: 50.0,
        network: NetworkMetrics {
            download_mbps: 100.0,
            upload_mbps: 50.0,
            latency_ms: 10.0,
            packet_loss_pct: 0.0,
        },
        load: LoadAverages {
            one: 0.5,
            five: 0.5,
            fifteen: 0.5,
        },
        active_processes: 100,
        uptime_secs: Some(86_400),
    }
}

pub fn sample_now(server_id: &str, cpu: f64) -> MetricSample {
    sample_at(server_id, Utc::now(), cpu)
}

/// A cpu condition firing immediately (no debounce) with the given
/// anti-spam policy.
pub fn cpu_condition(
    id: &str,
    server_id: Option<&str>,
    anti_spam: AntiSpamPolicy,
) -> AlertConditionConfig {
    AlertConditionConfig {
        id: id.to_string(),
        server_id: server_id.map(str::to_string),
        parameter: Parameter::Cpu,
        name: format!("{id} condition"),
        enabled: true,
        thresholds: AlertThresholds {
            warning: Threshold {
                value: 80.0,
                operator: ThresholdOp::Gt,
                min_duration_minutes: 0,
            },
            critical: Threshold {
                value: 90.0,
                operator: ThresholdOp::Gt,
                min_duration_minutes: 0,
            },
            recovery: Threshold {
                value: 70.0,
                operator: ThresholdOp::Lt,
                min_duration_minutes: 0,
            },
        },
        anti_spam,
    }
}

pub fn anti_spam(cooldown_minutes: i64, state_based: bool) -> AntiSpamPolicy {
    AntiSpamPolicy {
        cooldown_minutes,
        state_based,
        max_per_hour: 5,
        recurring: RecurrencePolicy {
            count: 3,
            within_minutes: 60,
        },
    }
}

/// Engine over an in-memory store with the given conditions.
pub fn engine_with_conditions(conditions: Vec<AlertConditionConfig>) -> MonitorEngine {
    let config = Config {
        conditions,
        ..Config::default()
    };
    MonitorEngine::with_store(config, Arc::new(MemoryStore::with_capacity(100_000)))
        .expect("engine should start")
}

pub fn engine() -> MonitorEngine {
    engine_with_conditions(Vec::new())
}

/// Give the actors a moment to drain their channels.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
}
