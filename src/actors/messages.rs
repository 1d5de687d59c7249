//! Message types for actor communication
//!
//! Commands are request/response messages sent to one actor via mpsc;
//! events are cloneable broadcast notifications. Broadcast channels may lag
//! for slow subscribers - acceptable, samples keep coming.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::MetricSample;
use crate::alerts::condition::AlertConditionConfig;
use crate::alerts::evaluator::AlertInstance;
use crate::analytics::{Baseline, DailyAggregate, TrendAnalysis};
use crate::error::EngineResult;
use crate::status::classifier::ServerStatus;

/// Event published when a sample is ingested.
#[derive(Debug, Clone)]
pub struct SampleEvent {
    pub sample: MetricSample,
    /// When the engine received it (distinct from the sample's own
    /// collector timestamp, which staleness checks compare against).
    pub received_at: DateTime<Utc>,
}

/// Event published on every accepted status transition. This is the only
/// thing downstream notification/socket collaborators receive from the
/// health actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub server_id: String,
    pub old_status: ServerStatus,
    pub new_status: ServerStatus,
    pub reason: String,
    pub confidence: f64,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of one server's health state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub server_id: String,
    pub status: ServerStatus,
    pub last_change_at: DateTime<Utc>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub recent_statuses: Vec<ServerStatus>,
    pub override_active: bool,
}

/// Commands for the HealthActor
#[derive(Debug)]
pub enum HealthCommand {
    /// Get the current health snapshot for a server
    GetState {
        server_id: String,
        respond_to: oneshot::Sender<Option<HealthSnapshot>>,
    },

    /// Pin a status administratively (the only way into MAINTENANCE)
    Override {
        server_id: String,
        status: ServerStatus,
        reason: String,
        duration: Option<Duration>,
        respond_to: oneshot::Sender<EngineResult<()>>,
    },

    /// Clear an active override
    RevertOverride {
        server_id: String,
        respond_to: oneshot::Sender<EngineResult<()>>,
    },

    /// Gracefully shut down the health actor
    Shutdown,
}

/// Commands for the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    /// Swap the active condition set (validated before applying)
    ReplaceConditions {
        conditions: Vec<AlertConditionConfig>,
        respond_to: oneshot::Sender<EngineResult<()>>,
    },

    /// Currently active (unresolved) alert instances
    GetActive {
        respond_to: oneshot::Sender<Vec<AlertInstance>>,
    },

    /// Mute alert evaluation (maintenance windows)
    Mute,

    /// Resume alert evaluation
    Unmute,

    /// Gracefully shut down the alert actor
    Shutdown,
}

/// Analytics task types, used as the dedupe key alongside the server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Aggregation,
    Baseline,
    Trend,
    Rebuild,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskKind::Aggregation => "aggregation",
            TaskKind::Baseline => "baseline",
            TaskKind::Trend => "trend",
            TaskKind::Rebuild => "rebuild",
        };
        write!(f, "{name}")
    }
}

/// Outcome of a ranged rebuild.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub rebuilt: u32,
    /// Days skipped for insufficient data
    pub skipped: u32,
}

/// Commands for the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Aggregate one server-day now
    RunAggregation {
        server_id: String,
        date: NaiveDate,
        respond_to: oneshot::Sender<EngineResult<DailyAggregate>>,
    },

    /// Recompute the baseline over a rolling window ending now
    RunBaseline {
        server_id: String,
        window_days: i64,
        respond_to: oneshot::Sender<EngineResult<Baseline>>,
    },

    /// Analyze the trend over a window ending now
    RunTrend {
        server_id: String,
        window_hours: i64,
        respond_to: oneshot::Sender<EngineResult<TrendAnalysis>>,
    },

    /// Rebuild a range of server-days. A newer rebuild for the same server
    /// cancels a running one.
    Rebuild {
        server_id: String,
        from: NaiveDate,
        to: NaiveDate,
        respond_to: oneshot::Sender<EngineResult<RebuildSummary>>,
    },

    /// Gracefully shut down the scheduler
    Shutdown,
}
