//! Baseline calculator - statistical description of "normal" per server
//!
//! Recomputed periodically over a rolling window (default 30 days) and
//! superseded, never merged. Baselines feed the trend analyzer's adaptive
//! thresholds and the anomaly accessors; they require a minimum of 100
//! samples to be worth anything.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::stats;
use crate::error::{EngineError, EngineResult};
use crate::{MetricSample, Parameter};

/// Minimum samples for a statistically usable baseline.
pub const MIN_BASELINE_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Mean/std pair for one bucket (hour-of-day, weekday, weekend).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
    pub samples: usize,
}

fn mean_std(values: &[f64]) -> MeanStd {
    let mean = stats::mean(values);
    MeanStd {
        mean,
        std: stats::population_std(values, mean),
        samples: values.len(),
    }
}

/// Statistical baseline for one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterBaseline {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: Percentiles,
    /// 95% confidence interval for the mean, clamped to the parameter's
    /// valid range.
    pub confidence_interval_95: (f64, f64),
    /// Per hour-of-day profile, 24 buckets.
    pub hourly: Vec<MeanStd>,
    pub weekday: MeanStd,
    pub weekend: MeanStd,
}

/// Data-quality scores, each a percentage computed independently - they are
/// deliberately not averaged into one opaque number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataQuality {
    /// Samples whose fields are all present and finite
    pub completeness: f64,
    /// Samples whose values sit within documented physical bounds
    pub consistency: f64,
    /// Samples free of extreme outliers (beyond generous sanity ceilings)
    pub accuracy: f64,
}

/// Adaptive baseline for one server over one window. Superseded wholesale
/// on recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub server_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_count: usize,
    pub per_parameter: Vec<(Parameter, ParameterBaseline)>,
    pub data_quality: DataQuality,
}

impl Baseline {
    pub fn parameter(&self, parameter: Parameter) -> Option<&ParameterBaseline> {
        self.per_parameter
            .iter()
            .find(|(p, _)| *p == parameter)
            .map(|(_, b)| b)
    }

    /// Whether a value is anomalous against this baseline: beyond both the
    /// std-multiplier envelope and the p95/p5 tail, in the parameter's bad
    /// direction. Derived on read, never cached.
    pub fn is_anomaly(&self, parameter: Parameter, value: f64) -> bool {
        let Some(baseline) = self.parameter(parameter) else {
            return false;
        };
        const STD_MULTIPLIER: f64 = 2.0;

        if parameter.increasing() {
            let envelope = baseline.mean + STD_MULTIPLIER * baseline.std;
            value > envelope.max(baseline.percentiles.p95)
        } else {
            let envelope = baseline.mean - STD_MULTIPLIER * baseline.std;
            value < envelope.min(baseline.percentiles.p5)
        }
    }

    /// Expected range for a parameter: the 95% confidence interval around
    /// the mean.
    pub fn expected_range(&self, parameter: Parameter) -> Option<(f64, f64)> {
        self.parameter(parameter).map(|b| b.confidence_interval_95)
    }
}

fn sample_is_complete(sample: &MetricSample) -> bool {
    [
        sample.cpu_pct,
        sample.mem_pct,
        sample.disk_pct,
        sample.network.download_mbps,
        sample.network.upload_mbps,
        sample.network.latency_ms,
        sample.network.packet_loss_pct,
        sample.load.one,
        sample.load.five,
        sample.load.fifteen,
    ]
    .iter()
    .all(|v| v.is_finite())
}

fn sample_is_consistent(sample: &MetricSample) -> bool {
    let pct_ok = |v: f64| (0.0..=100.0).contains(&v);
    pct_ok(sample.cpu_pct)
        && pct_ok(sample.mem_pct)
        && pct_ok(sample.disk_pct)
        && pct_ok(sample.network.packet_loss_pct)
        && sample.network.latency_ms >= 0.0
        && sample.network.download_mbps >= 0.0
        && sample.load.one >= 0.0
}

fn sample_is_accurate(sample: &MetricSample) -> bool {
    // Generous ceilings: collectors do glitch, but not this far
    sample.cpu_pct < 200.0
        && sample.mem_pct < 200.0
        && sample.disk_pct < 200.0
        && sample.network.latency_ms < 10_000.0
        && sample.network.download_mbps < 10_000.0
}

fn assess_data_quality(samples: &[MetricSample]) -> DataQuality {
    let total = samples.len() as f64;
    let complete = samples.iter().filter(|s| sample_is_complete(s)).count() as f64;
    let consistent = samples.iter().filter(|s| sample_is_consistent(s)).count() as f64;
    let accurate = samples.iter().filter(|s| sample_is_accurate(s)).count() as f64;

    DataQuality {
        completeness: complete / total * 100.0,
        consistency: consistent / total * 100.0,
        accuracy: accurate / total * 100.0,
    }
}

fn parameter_baseline(parameter: Parameter, samples: &[MetricSample]) -> ParameterBaseline {
    let values: Vec<f64> = samples.iter().map(|s| s.value_of(parameter)).collect();
    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mean = stats::mean(&values);
    let std = stats::population_std(&values, mean);
    let n = values.len() as f64;

    // mean ± 1.96·(std/√n), clamped to the physically valid range
    let margin = 1.96 * (std / n.sqrt());
    let range = parameter.valid_range();
    let confidence_interval_95 = (
        stats::clamp_to(mean - margin, range),
        stats::clamp_to(mean + margin, range),
    );

    // Hour-of-day profile
    let mut hourly_values: Vec<Vec<f64>> = vec![Vec::new(); 24];
    let mut weekday_values = Vec::new();
    let mut weekend_values = Vec::new();
    for sample in samples {
        let value = sample.value_of(parameter);
        hourly_values[sample.timestamp.hour() as usize].push(value);
        match sample.timestamp.weekday() {
            chrono::Weekday::Sat | chrono::Weekday::Sun => weekend_values.push(value),
            _ => weekday_values.push(value),
        }
    }

    ParameterBaseline {
        mean,
        median: stats::median(&sorted),
        std,
        min: sorted.first().copied().unwrap_or(0.0),
        max: sorted.last().copied().unwrap_or(0.0),
        percentiles: Percentiles {
            p5: stats::percentile_interpolated(&sorted, 5.0),
            p25: stats::percentile_interpolated(&sorted, 25.0),
            p75: stats::percentile_interpolated(&sorted, 75.0),
            p95: stats::percentile_interpolated(&sorted, 95.0),
            p99: stats::percentile_interpolated(&sorted, 99.0),
        },
        confidence_interval_95,
        hourly: hourly_values.iter().map(|v| mean_std(v)).collect(),
        weekday: mean_std(&weekday_values),
        weekend: mean_std(&weekend_values),
    }
}

/// Compute a baseline over a window of samples. Fails with insufficient
/// data below [`MIN_BASELINE_SAMPLES`]; nothing is persisted in that case.
pub fn compute_baseline(
    server_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    samples: &[MetricSample],
) -> EngineResult<Baseline> {
    if samples.len() < MIN_BASELINE_SAMPLES {
        return Err(EngineError::InsufficientData {
            needed: MIN_BASELINE_SAMPLES,
            got: samples.len(),
        });
    }

    let per_parameter = Parameter::ANALYZED
        .iter()
        .map(|&p| (p, parameter_baseline(p, samples)))
        .collect();

    Ok(Baseline {
        server_id: server_id.to_string(),
        window_start,
        window_end,
        sample_count: samples.len(),
        per_parameter,
        data_quality: assess_data_quality(samples),
    })
}
