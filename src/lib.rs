pub mod actors;
pub mod alerts;
pub mod analytics;
pub mod config;
pub mod engine;
pub mod error;
pub mod status;
pub mod storage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One metric sample for one server at one point in time.
///
/// Samples are produced by an external collector and are immutable once
/// recorded. All percentage fields are in `[0, 100]`; timestamps are UTC and
/// strictly increasing per server in normal operation, but out-of-order
/// samples must be tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub network: NetworkMetrics,
    pub load: LoadAverages,
    pub active_processes: u64,
    /// Seconds since the host last booted, if the collector reports it.
    /// A freshly-restarted host (under one hour) counts against uptime.
    pub uptime_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadAverages {
    #[serde(rename = "1m")]
    pub one: f64,
    #[serde(rename = "5m")]
    pub five: f64,
    #[serde(rename = "15m")]
    pub fifteen: f64,
}

/// Metric parameters the engine understands.
///
/// The classifier and the analytics pipeline operate on the five core
/// parameters (cpu, memory, disk, latency, load); alert conditions may
/// additionally target throughput, packet loss and process count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Cpu,
    Memory,
    Disk,
    Latency,
    Load,
    Throughput,
    PacketLoss,
    ActiveProcesses,
}

impl Parameter {
    /// The five parameters fed into the status classifier.
    pub const CLASSIFIED: [Parameter; 5] = [
        Parameter::Cpu,
        Parameter::Memory,
        Parameter::Disk,
        Parameter::Latency,
        Parameter::Load,
    ];

    /// Parameters analyzed by the aggregation/baseline/trend pipeline.
    pub const ANALYZED: [Parameter; 5] = [
        Parameter::Cpu,
        Parameter::Memory,
        Parameter::Disk,
        Parameter::Latency,
        Parameter::Throughput,
    ];

    /// Whether higher values are worse for this parameter.
    ///
    /// Throughput is the exception: a link degrades by *losing* bandwidth,
    /// so its alert thresholds run in the opposite direction.
    pub fn increasing(&self) -> bool {
        !matches!(self, Parameter::Throughput)
    }

    /// Physically valid value range, used to clamp predictions and
    /// confidence intervals.
    pub fn valid_range(&self) -> (f64, f64) {
        match self {
            Parameter::Cpu | Parameter::Memory | Parameter::Disk | Parameter::PacketLoss => {
                (0.0, 100.0)
            }
            Parameter::Latency => (0.0, 10_000.0),
            Parameter::Throughput => (0.0, 10_000.0),
            Parameter::Load => (0.0, 64.0),
            Parameter::ActiveProcesses => (0.0, 100_000.0),
        }
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Parameter::Cpu => "cpu",
            Parameter::Memory => "memory",
            Parameter::Disk => "disk",
            Parameter::Latency => "latency",
            Parameter::Load => "load",
            Parameter::Throughput => "throughput",
            Parameter::PacketLoss => "packet_loss",
            Parameter::ActiveProcesses => "active_processes",
        };
        write!(f, "{name}")
    }
}

impl MetricSample {
    /// Extract the value of a parameter from this sample.
    pub fn value_of(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Cpu => self.cpu_pct,
            Parameter::Memory => self.mem_pct,
            Parameter::Disk => self.disk_pct,
            Parameter::Latency => self.network.latency_ms,
            Parameter::Load => self.load.one,
            Parameter::Throughput => self.network.download_mbps,
            Parameter::PacketLoss => self.network.packet_loss_pct,
            Parameter::ActiveProcesses => self.active_processes as f64,
        }
    }

    /// A host that has been up for less than an hour is counted as having
    /// restarted within the sampling interval.
    pub fn is_restart(&self) -> bool {
        self.uptime_secs.is_some_and(|secs| secs < 3600)
    }
}
