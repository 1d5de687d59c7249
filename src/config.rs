#[cfg(feature = "storage-sqlite")]
use std::path::PathBuf;

use serde::Deserialize;
use tracing::trace;

use crate::Parameter;
use crate::alerts::condition::AlertConditionConfig;
use crate::error::{EngineError, EngineResult};
use crate::status::ServerStatus;

/// Inclusive value band for one classification level.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

/// Classification ranges for one parameter.
///
/// Bands are contiguous and share boundaries; the classifier checks worst
/// first, so a shared boundary resolves to the worse bucket.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LevelRanges {
    pub normal: Band,
    pub warning: Band,
    pub critical: Band,
    pub danger: Band,
}

impl LevelRanges {
    const fn new(warning_at: f64, critical_at: f64, danger_at: f64, ceiling: f64) -> Self {
        Self {
            normal: Band {
                min: 0.0,
                max: warning_at,
            },
            warning: Band {
                min: warning_at,
                max: critical_at,
            },
            critical: Band {
                min: critical_at,
                max: danger_at,
            },
            danger: Band {
                min: danger_at,
                max: ceiling,
            },
        }
    }

    fn validate(&self, parameter: Parameter) -> EngineResult<()> {
        let ordered = self.normal.min <= self.normal.max
            && self.normal.max == self.warning.min
            && self.warning.max == self.critical.min
            && self.critical.max == self.danger.min
            && self.danger.min <= self.danger.max;

        if !ordered {
            return Err(EngineError::Validation(format!(
                "classifier ranges for {parameter} must be contiguous and ordered"
            )));
        }
        Ok(())
    }
}

/// Threshold tables for the status classifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    pub cpu: LevelRanges,
    pub memory: LevelRanges,
    pub disk: LevelRanges,
    pub latency: LevelRanges,
    pub load: LevelRanges,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            cpu: LevelRanges::new(61.0, 81.0, 96.0, 100.0),
            memory: LevelRanges::new(71.0, 86.0, 96.0, 100.0),
            disk: LevelRanges::new(76.0, 86.0, 96.0, 100.0),
            latency: LevelRanges::new(100.0, 250.0, 500.0, 10_000.0),
            load: LevelRanges::new(2.0, 4.0, 8.0, 64.0),
        }
    }
}

impl ClassifierThresholds {
    pub fn ranges_for(&self, parameter: Parameter) -> &LevelRanges {
        match parameter {
            Parameter::Cpu => &self.cpu,
            Parameter::Memory => &self.memory,
            Parameter::Disk => &self.disk,
            Parameter::Latency => &self.latency,
            // Non-classified parameters fall back to the load table; the
            // classifier only ever asks for Parameter::CLASSIFIED members.
            _ => &self.load,
        }
    }

    /// Weight of a parameter in the diagnostic score. CPU and memory
    /// dominate because they gate the combined-status rules.
    pub fn parameter_weight(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Cpu | Parameter::Memory => 4.0,
            Parameter::Disk => 3.0,
            _ => 2.0,
        }
    }

    /// Start of the critical band, used by the trend analyzer to decide
    /// whether a prediction crosses into critical territory.
    pub fn critical_start(&self, parameter: Parameter) -> Option<f64> {
        match parameter {
            Parameter::Cpu => Some(self.cpu.critical.min),
            Parameter::Memory => Some(self.memory.critical.min),
            Parameter::Disk => Some(self.disk.critical.min),
            Parameter::Latency => Some(self.latency.critical.min),
            _ => None,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.cpu.validate(Parameter::Cpu)?;
        self.memory.validate(Parameter::Memory)?;
        self.disk.validate(Parameter::Disk)?;
        self.latency.validate(Parameter::Latency)?;
        self.load.validate(Parameter::Load)?;
        Ok(())
    }
}

/// Downgrade requirements while sitting in one status.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DowngradePolicy {
    /// Minimum minutes since the last status change
    pub delay_minutes: i64,
    /// Minimum number of recent samples agreeing with the candidate status
    pub required_samples: usize,
}

/// Hysteresis table: per-current-status downgrade policy plus staleness
/// delays. Represented as a validated lookup table so new statuses or
/// policies stay additive.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HysteresisSettings {
    pub healthy: DowngradePolicy,
    pub warning: DowngradePolicy,
    pub critical: DowngradePolicy,
    pub danger: DowngradePolicy,

    /// No sample for this long forces WARNING with a stale-data reason
    pub stale_soft_minutes: i64,
    /// No sample for this long forces OFFLINE
    pub stale_hard_minutes: i64,

    /// Capacity of the recent-status ring buffer
    pub ring_capacity: usize,
}

impl Default for HysteresisSettings {
    fn default() -> Self {
        Self {
            healthy: DowngradePolicy {
                delay_minutes: 20,
                required_samples: 3,
            },
            warning: DowngradePolicy {
                delay_minutes: 15,
                required_samples: 3,
            },
            critical: DowngradePolicy {
                delay_minutes: 10,
                required_samples: 2,
            },
            danger: DowngradePolicy {
                delay_minutes: 5,
                required_samples: 2,
            },
            stale_soft_minutes: 5,
            stale_hard_minutes: 15,
            ring_capacity: 10,
        }
    }
}

impl HysteresisSettings {
    /// Downgrade policy while in `status`. OFFLINE recovers like DANGER:
    /// quickly, but not on a single sample.
    pub fn downgrade_from(&self, status: ServerStatus) -> DowngradePolicy {
        match status {
            ServerStatus::Healthy | ServerStatus::Maintenance => self.healthy,
            ServerStatus::Warning => self.warning,
            ServerStatus::Critical => self.critical,
            ServerStatus::Danger | ServerStatus::Offline => self.danger,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        for (name, policy) in [
            ("healthy", self.healthy),
            ("warning", self.warning),
            ("critical", self.critical),
            ("danger", self.danger),
        ] {
            if policy.delay_minutes < 0 {
                return Err(EngineError::Validation(format!(
                    "hysteresis delay for {name} must be non-negative"
                )));
            }
            if policy.required_samples == 0 {
                return Err(EngineError::Validation(format!(
                    "hysteresis sample count for {name} must be at least 1"
                )));
            }
            if policy.required_samples > self.ring_capacity {
                return Err(EngineError::Validation(format!(
                    "hysteresis sample count for {name} exceeds ring capacity {}",
                    self.ring_capacity
                )));
            }
        }

        if self.stale_soft_minutes <= 0 || self.stale_hard_minutes <= self.stale_soft_minutes {
            return Err(EngineError::Validation(
                "staleness delays must satisfy 0 < soft < hard".to_string(),
            ));
        }

        Ok(())
    }
}

/// Scheduler cadence and execution budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// UTC hour at which the previous day is aggregated
    pub aggregation_hour_utc: u32,
    /// Trend analysis cadence
    pub trend_interval_hours: u64,
    /// Baseline recomputation cadence
    pub baseline_interval_days: u64,
    /// Rolling window for baselines
    pub baseline_window_days: i64,
    /// Window for trend analysis
    pub trend_window_hours: i64,
    /// Execution budget per analytics task; exceeding it aborts the task
    pub task_budget_secs: u64,
    /// Retention cleanup cadence
    pub cleanup_interval_hours: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            aggregation_hour_utc: 2,
            trend_interval_hours: 1,
            baseline_interval_days: 7,
            baseline_window_days: 30,
            trend_window_hours: 24,
            task_budget_secs: 300,
            cleanup_interval_hours: 24,
        }
    }
}

impl SchedulerSettings {
    pub fn validate(&self) -> EngineResult<()> {
        if self.aggregation_hour_utc > 23 {
            return Err(EngineError::Validation(
                "aggregation hour must be 0-23".to_string(),
            ));
        }
        if self.task_budget_secs == 0 {
            return Err(EngineError::Validation(
                "task budget must be positive".to_string(),
            ));
        }
        if self.baseline_window_days <= 0 || self.trend_window_hours <= 0 {
            return Err(EngineError::Validation(
                "analytics windows must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sample store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory ring buffers (no persistence)
    Memory,

    /// SQLite database
    #[cfg(feature = "storage-sqlite")]
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Samples older than this are deleted by the cleanup task
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

#[cfg(feature = "storage-sqlite")]
fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./samples.db")
}

fn default_retention_days() -> u32 {
    30
}

impl StorageConfig {
    pub fn retention_days(&self) -> u32 {
        match self {
            StorageConfig::Memory => default_retention_days(),
            #[cfg(feature = "storage-sqlite")]
            StorageConfig::Sqlite { retention_days, .. } => *retention_days,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thresholds: ClassifierThresholds,
    pub hysteresis: HysteresisSettings,
    pub scheduler: SchedulerSettings,
    pub storage: StorageConfig,

    /// Alert conditions, operator-provided. Server-specific entries take
    /// precedence over global (server_id = null) ones for the same parameter.
    pub conditions: Vec<AlertConditionConfig>,
}

impl Config {
    /// Validate every table before the engine starts. Nothing is partially
    /// applied: the first invalid entry fails the whole config.
    pub fn validate(&self) -> EngineResult<()> {
        self.thresholds.validate()?;
        self.hysteresis.validate()?;
        self.scheduler.validate()?;
        for condition in &self.conditions {
            condition.validate()?;
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
