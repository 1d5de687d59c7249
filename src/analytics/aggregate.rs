//! Daily aggregation engine
//!
//! Folds one completed server-day of samples into a single statistical
//! summary. Runs off the ingest path, invoked by the scheduler once per day
//! (or manually for rebuilds). A day with zero samples produces no record:
//! insufficient data is a first-class outcome, not a zero-filled row.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::stats;
use crate::config::ClassifierThresholds;
use crate::error::{EngineError, EngineResult};
use crate::status::classifier::{Condition, classify_sample};
use crate::{MetricSample, Parameter};

/// Minimum/maximum/average/deviation/p95 for one parameter over one day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub std: f64,
    pub p95: f64,
}

/// Minutes spent in each legacy condition bucket. Samples are one-minute
/// readings, so a sample counts as a minute.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MinutesInCondition {
    pub normal: u32,
    pub warning: u32,
    pub critical: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyTrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Coarse per-day trend indicator for one parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyParameterTrend {
    pub slope_per_hour: f64,
    pub direction: DailyTrendDirection,
    pub volatility: f64,
}

/// One server-day statistical summary. Immutable once written; a rebuild of
/// the same (server, date) replaces the record wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub server_id: String,
    pub date: NaiveDate,
    pub per_parameter: Vec<(Parameter, ParameterStats)>,
    pub dominant_condition: Condition,
    pub minutes_in_condition: MinutesInCondition,
    pub transition_count: u32,
    pub uptime_pct: f64,
    pub downtime_minutes: u32,
    pub restart_count: u32,
    pub trend: Vec<(Parameter, DailyParameterTrend)>,
    pub sample_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl DailyAggregate {
    pub fn stats_for(&self, parameter: Parameter) -> Option<&ParameterStats> {
        self.per_parameter
            .iter()
            .find(|(p, _)| *p == parameter)
            .map(|(_, s)| s)
    }
}

fn parameter_stats(values: &[f64]) -> ParameterStats {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let avg = stats::mean(values);
    ParameterStats {
        min: sorted.first().copied().unwrap_or(0.0),
        max: sorted.last().copied().unwrap_or(0.0),
        avg,
        std: stats::population_std(values, avg),
        p95: stats::percentile_nearest_rank(&sorted, 95.0),
    }
}

fn daily_trend(values: &[f64], hours: &[f64]) -> DailyParameterTrend {
    let fit = stats::linear_fit(hours, values);
    let slope = fit.map(|f| f.slope).unwrap_or(0.0);

    let direction = if slope.abs() < 0.1 {
        DailyTrendDirection::Stable
    } else if slope > 0.0 {
        DailyTrendDirection::Increasing
    } else {
        DailyTrendDirection::Decreasing
    };

    DailyParameterTrend {
        slope_per_hour: slope,
        direction,
        volatility: stats::population_std(values, stats::mean(values)),
    }
}

/// Aggregate one server-day. `samples` may contain anything the store
/// returned; everything outside `[date 00:00, date+1 00:00)` is ignored,
/// and the remainder is processed in timestamp order.
pub fn compute_daily_aggregate(
    config: &ClassifierThresholds,
    server_id: &str,
    date: NaiveDate,
    samples: &[MetricSample],
) -> EngineResult<DailyAggregate> {
    let window_start = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| EngineError::Validation(format!("invalid aggregation date {date}")))?;
    let window_end = window_start + TimeDelta::days(1);

    let mut day: Vec<&MetricSample> = samples
        .iter()
        .filter(|s| s.timestamp >= window_start && s.timestamp < window_end)
        .collect();
    day.sort_by_key(|s| s.timestamp);

    if day.is_empty() {
        return Err(EngineError::InsufficientData { needed: 1, got: 0 });
    }

    let hours: Vec<f64> = day
        .iter()
        .map(|s| (s.timestamp - window_start).num_seconds() as f64 / 3600.0)
        .collect();

    let mut per_parameter = Vec::new();
    let mut trend = Vec::new();
    for parameter in Parameter::ANALYZED {
        let values: Vec<f64> = day.iter().map(|s| s.value_of(parameter)).collect();
        per_parameter.push((parameter, parameter_stats(&values)));
        trend.push((parameter, daily_trend(&values, &hours)));
    }

    // Condition accounting from the instantaneous classifier verdicts
    let mut minutes = MinutesInCondition::default();
    let mut transition_count = 0u32;
    let mut previous: Option<Condition> = None;
    let mut restart_count = 0u32;

    for sample in &day {
        let condition = classify_sample(config, sample).status.condition();
        match condition {
            Condition::Normal => minutes.normal += 1,
            Condition::Warning => minutes.warning += 1,
            Condition::Critical => minutes.critical += 1,
        }
        if previous.is_some_and(|p| p != condition) {
            transition_count += 1;
        }
        previous = Some(condition);

        if sample.is_restart() {
            restart_count += 1;
        }
    }

    // Worst-first tiebreak: a day split evenly between critical and normal
    // reads as a critical day.
    let dominant_condition = [
        (Condition::Critical, minutes.critical),
        (Condition::Warning, minutes.warning),
        (Condition::Normal, minutes.normal),
    ]
    .into_iter()
    .max_by_key(|(condition, count)| {
        let severity = match condition {
            Condition::Critical => 2,
            Condition::Warning => 1,
            Condition::Normal => 0,
        };
        (*count, severity)
    })
    .map(|(condition, _)| condition)
    .unwrap_or(Condition::Normal);

    let total_minutes = day.len() as u32;
    let downtime_minutes = restart_count;
    let uptime_pct = (((total_minutes - downtime_minutes) as f64 / total_minutes as f64) * 100.0)
        .clamp(0.0, 100.0);

    Ok(DailyAggregate {
        server_id: server_id.to_string(),
        date,
        per_parameter,
        dominant_condition,
        minutes_in_condition: minutes,
        transition_count,
        uptime_pct,
        downtime_minutes,
        restart_count,
        trend,
        sample_count: day.len(),
        window_start,
        window_end,
    })
}
