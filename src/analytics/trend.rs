//! Trend analyzer - moving averages, slope, anomalies, failure risk
//!
//! Runs over a short window (default 24h) on the scheduler's short cycle and
//! is superseded each run. The OLS fit's R² doubles as the confidence score;
//! predictions extrapolate the fitted slope and are clamped to each
//! parameter's valid range. When a baseline is available its critical
//! thresholds stay aligned with the classifier table by construction.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::stats;
use crate::config::ClassifierThresholds;
use crate::error::{EngineError, EngineResult};
use crate::{MetricSample, Parameter};

/// Minimum samples for a meaningful fit.
pub const MIN_TREND_SAMPLES: usize = 4;

/// Anomaly score above which the period counts as medium failure risk.
const ANOMALY_RISK_CUTOFF: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    StronglyIncreasing,
    Increasing,
    Stable,
    Decreasing,
    StronglyDecreasing,
}

impl Direction {
    /// Bucket a slope: stable below 0.5/h, strong beyond 2.0/h.
    fn from_slope(slope: f64) -> Self {
        if slope.abs() > 2.0 {
            if slope > 0.0 {
                Direction::StronglyIncreasing
            } else {
                Direction::StronglyDecreasing
            }
        } else if slope.abs() > 0.5 {
            if slope > 0.0 {
                Direction::Increasing
            } else {
                Direction::Decreasing
            }
        } else {
            Direction::Stable
        }
    }

    pub fn is_increasing(&self) -> bool {
        matches!(self, Direction::Increasing | Direction::StronglyIncreasing)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovingAverages {
    pub sma4: f64,
    pub sma12: f64,
    pub ema4: f64,
    pub ema12: f64,
}

/// Trend of one parameter over the window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterTrend {
    pub moving_averages: MovingAverages,
    pub slope_per_hour: f64,
    pub direction: Direction,
    /// R² of the fit scaled to 0-100.
    pub confidence: f64,
    pub predicted_1h: f64,
    pub predicted_6h: f64,
    pub predicted_24h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub parameter: Parameter,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub expected: f64,
    pub z_score: f64,
    pub severity: AnomalySeverity,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRisk {
    pub level: RiskLevel,
    pub confidence: f64,
    /// Hours until the predicted breach, when one is predicted.
    pub eta_hours: Option<f64>,
    pub primary_cause: Option<Parameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Immediate,
    ShortTerm,
    LongTerm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// A data payload for operators, not a control action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: RecommendationPriority,
    pub action: String,
    pub expected_impact: String,
    pub confidence: f64,
}

/// One trend analysis run. Superseded by the next run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub server_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_count: usize,
    pub per_parameter: Vec<(Parameter, ParameterTrend)>,
    pub anomalies: Vec<Anomaly>,
    /// Summed anomaly contributions, capped at 100.
    pub overall_anomaly_score: f64,
    /// Hours of day with the highest / lowest mean cpu (top and bottom 3).
    pub peak_hours: Vec<u32>,
    pub low_hours: Vec<u32>,
    pub failure_risk: FailureRisk,
    pub recommendations: Vec<Recommendation>,
}

impl TrendAnalysis {
    pub fn parameter(&self, parameter: Parameter) -> Option<&ParameterTrend> {
        self.per_parameter
            .iter()
            .find(|(p, _)| *p == parameter)
            .map(|(_, t)| t)
    }
}

fn parameter_trend(parameter: Parameter, values: &[f64], hours: &[f64]) -> ParameterTrend {
    let moving_averages = MovingAverages {
        sma4: stats::sma(values, 4),
        sma12: stats::sma(values, 12),
        ema4: stats::ema(values, 4),
        ema12: stats::ema(values, 12),
    };

    let fit = stats::linear_fit(hours, values);
    let slope = fit.map(|f| f.slope).unwrap_or(0.0);
    let confidence = fit.map(|f| (f.r_squared * 100.0).clamp(0.0, 100.0)).unwrap_or(0.0);

    let current = values.last().copied().unwrap_or(0.0);
    let range = parameter.valid_range();

    ParameterTrend {
        moving_averages,
        slope_per_hour: slope,
        direction: Direction::from_slope(slope),
        confidence,
        predicted_1h: stats::clamp_to(current + slope, range),
        predicted_6h: stats::clamp_to(current + slope * 6.0, range),
        predicted_24h: stats::clamp_to(current + slope * 24.0, range),
    }
}

/// Z-score anomalies against the EMA and a running stddev, as the window is
/// replayed sample by sample.
fn detect_anomalies(
    samples: &[&MetricSample],
    trends: &[(Parameter, ParameterTrend)],
) -> (Vec<Anomaly>, f64) {
    let mut anomalies = Vec::new();
    let mut score = 0.0;

    for (parameter, trend) in trends {
        let expected = trend.moving_averages.ema4;
        let values: Vec<f64> = samples.iter().map(|s| s.value_of(*parameter)).collect();

        let mut running_sq_sum = 0.0;
        for (i, sample) in samples.iter().enumerate() {
            let value = values[i];
            running_sq_sum += (value - expected).powi(2);
            let running_std = (running_sq_sum / (i + 1) as f64).sqrt();
            if running_std <= f64::EPSILON {
                continue;
            }

            let z = (value - expected).abs() / running_std;
            if z > 2.0 {
                let severity = if z > 3.0 {
                    AnomalySeverity::High
                } else if z > 2.5 {
                    AnomalySeverity::Medium
                } else {
                    AnomalySeverity::Low
                };

                anomalies.push(Anomaly {
                    parameter: *parameter,
                    timestamp: sample.timestamp,
                    value,
                    expected,
                    z_score: z,
                    severity,
                    description: format!(
                        "{parameter} anomaly: {value:.1} (expected {expected:.1})"
                    ),
                });
                score += z * 10.0;
            }
        }
    }

    (anomalies, score.min(100.0))
}

fn failure_risk(
    config: &ClassifierThresholds,
    trends: &[(Parameter, ParameterTrend)],
    samples: &[&MetricSample],
    anomaly_score: f64,
) -> FailureRisk {
    let min_confidence = trends
        .iter()
        .map(|(_, t)| t.confidence)
        .fold(100.0, f64::min);

    // High risk: some parameter's 24h extrapolation crosses its critical
    // threshold. The eta comes from the slope's time-to-threshold.
    for (parameter, trend) in trends {
        let Some(critical) = config.critical_start(*parameter) else {
            continue;
        };
        if trend.predicted_24h < critical {
            continue;
        }

        let current = samples
            .last()
            .map(|s| s.value_of(*parameter))
            .unwrap_or(0.0);
        let eta = if trend.slope_per_hour > 0.0 && current < critical {
            ((critical - current) / trend.slope_per_hour).clamp(0.0, 24.0)
        } else {
            0.0
        };

        return FailureRisk {
            level: RiskLevel::High,
            confidence: trend.confidence,
            eta_hours: Some(eta),
            primary_cause: Some(*parameter),
        };
    }

    if anomaly_score > ANOMALY_RISK_CUTOFF {
        return FailureRisk {
            level: RiskLevel::Medium,
            confidence: min_confidence,
            eta_hours: Some(72.0),
            primary_cause: None,
        };
    }

    // Nothing points at a failure. Low confidence in the fits means low
    // rather than very low: too little signal to call it quiet.
    let level = if min_confidence < 40.0 {
        RiskLevel::Low
    } else {
        RiskLevel::VeryLow
    };
    FailureRisk {
        level,
        confidence: min_confidence,
        eta_hours: None,
        primary_cause: None,
    }
}

fn recommendations(trends: &[(Parameter, ParameterTrend)]) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let trend_of = |p: Parameter| trends.iter().find(|(tp, _)| *tp == p).map(|(_, t)| t);

    if let Some(cpu) = trend_of(Parameter::Cpu) {
        if cpu.direction.is_increasing() && cpu.predicted_6h > 70.0 {
            out.push(Recommendation {
                kind: RecommendationKind::Immediate,
                priority: RecommendationPriority::High,
                action: "Monitor CPU usage closely and identify high-consuming processes"
                    .to_string(),
                expected_impact: "Prevent CPU overload".to_string(),
                confidence: cpu.confidence,
            });
        }
    }

    if let Some(memory) = trend_of(Parameter::Memory) {
        if memory.direction.is_increasing() && memory.predicted_24h > 85.0 {
            out.push(Recommendation {
                kind: RecommendationKind::ShortTerm,
                priority: RecommendationPriority::High,
                action: "Check for memory leaks and restart leaking services".to_string(),
                expected_impact: "Avoid memory exhaustion within a day".to_string(),
                confidence: memory.confidence,
            });
        }
    }

    if let Some(disk) = trend_of(Parameter::Disk) {
        if disk.slope_per_hour > 0.5 {
            out.push(Recommendation {
                kind: RecommendationKind::ShortTerm,
                priority: RecommendationPriority::Medium,
                action: "Clean up disk space and archive old files".to_string(),
                expected_impact: "Slow down disk usage growth".to_string(),
                confidence: disk.confidence,
            });
        }
    }

    if let Some(latency) = trend_of(Parameter::Latency) {
        if latency.direction == Direction::StronglyIncreasing {
            out.push(Recommendation {
                kind: RecommendationKind::Immediate,
                priority: RecommendationPriority::Medium,
                action: "Inspect network path and upstream dependencies for congestion"
                    .to_string(),
                expected_impact: "Catch link degradation before timeouts".to_string(),
                confidence: latency.confidence,
            });
        }
    }

    out
}

fn peak_and_low_hours(samples: &[&MetricSample]) -> (Vec<u32>, Vec<u32>) {
    let mut hourly: Vec<Vec<f64>> = vec![Vec::new(); 24];
    for sample in samples {
        hourly[sample.timestamp.hour() as usize].push(sample.cpu_pct);
    }

    let mut means: Vec<(u32, f64)> = hourly
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_empty())
        .map(|(h, v)| (h as u32, stats::mean(v)))
        .collect();

    means.sort_by(|a, b| b.1.total_cmp(&a.1));
    let peak = means.iter().take(3).map(|(h, _)| *h).collect();
    means.reverse();
    let low = means.iter().take(3).map(|(h, _)| *h).collect();
    (peak, low)
}

/// Analyze the trend over a window of samples.
pub fn analyze_trend(
    config: &ClassifierThresholds,
    server_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    samples: &[MetricSample],
) -> EngineResult<TrendAnalysis> {
    if samples.len() < MIN_TREND_SAMPLES {
        return Err(EngineError::InsufficientData {
            needed: MIN_TREND_SAMPLES,
            got: samples.len(),
        });
    }

    let mut ordered: Vec<&MetricSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    let first_ts = ordered[0].timestamp;
    let hours: Vec<f64> = ordered
        .iter()
        .map(|s| (s.timestamp - first_ts).num_seconds() as f64 / 3600.0)
        .collect();

    let per_parameter: Vec<(Parameter, ParameterTrend)> = Parameter::ANALYZED
        .iter()
        .map(|&p| {
            let values: Vec<f64> = ordered.iter().map(|s| s.value_of(p)).collect();
            (p, parameter_trend(p, &values, &hours))
        })
        .collect();

    let (anomalies, overall_anomaly_score) = detect_anomalies(&ordered, &per_parameter);
    let failure_risk = failure_risk(config, &per_parameter, &ordered, overall_anomaly_score);
    let recommendations = recommendations(&per_parameter);
    let (peak_hours, low_hours) = peak_and_low_hours(&ordered);

    Ok(TrendAnalysis {
        server_id: server_id.to_string(),
        window_start,
        window_end,
        sample_count: ordered.len(),
        per_parameter,
        anomalies,
        overall_anomaly_score,
        peak_hours,
        low_hours,
        failure_risk,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoadAverages, NetworkMetrics};
    use assert_matches::assert_matches;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-10T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample_at(offset_minutes: i64, cpu: f64) -> MetricSample {
        MetricSample {
            server_id: "web-01".to_string(),
            timestamp: base_time() + TimeDelta::minutes(offset_minutes),
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

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (base_time(), base_time() + TimeDelta::hours(24))
    }

    #[test]
    fn too_few_samples_is_insufficient_data() {
        let samples: Vec<MetricSample> = (0..3).map(|i| sample_at(i * 60, 40.0)).collect();
        let (start, end) = window();

        let result = analyze_trend(
            &ClassifierThresholds::default(),
            "web-01",
            start,
            end,
            &samples,
        );
        assert_matches!(result, Err(EngineError::InsufficientData { needed: 4, got: 3 }));
    }

    #[test]
    fn linear_series_recovers_analytic_slope_with_full_confidence() {
        // cpu rises exactly 2 points per hour over 24 hourly samples
        let samples: Vec<MetricSample> = (0..24)
            .map(|h| sample_at(h * 60, 10.0 + 2.0 * h as f64))
            .collect();
        let (start, end) = window();

        let analysis = analyze_trend(
            &ClassifierThresholds::default(),
            "web-01",
            start,
            end,
            &samples,
        )
        .unwrap();

        let cpu = analysis.parameter(Parameter::Cpu).unwrap();
        assert!((cpu.slope_per_hour - 2.0).abs() < 1e-9);
        assert!((cpu.confidence - 100.0).abs() < 1e-9);
        assert_eq!(cpu.direction, Direction::Increasing);

        // predictions extrapolate from the last value (56.0)
        assert!((cpu.predicted_1h - 58.0).abs() < 1e-9);
        assert!((cpu.predicted_6h - 68.0).abs() < 1e-9);
        // +24h would be 104, clamped to the percentage range
        assert_eq!(cpu.predicted_24h, 100.0);
    }

    #[test]
    fn flat_series_is_stable_with_no_anomalies() {
        let samples: Vec<MetricSample> = (0..24).map(|h| sample_at(h * 60, 40.0)).collect();
        let (start, end) = window();

        let analysis = analyze_trend(
            &ClassifierThresholds::default(),
            "web-01",
            start,
            end,
            &samples,
        )
        .unwrap();

        let cpu = analysis.parameter(Parameter::Cpu).unwrap();
        assert_eq!(cpu.direction, Direction::Stable);
        assert!(analysis.anomalies.is_empty());
        assert_eq!(analysis.overall_anomaly_score, 0.0);
        assert_matches!(
            analysis.failure_risk.level,
            RiskLevel::VeryLow | RiskLevel::Low
        );
    }

    #[test]
    fn steep_slope_is_strongly_increasing() {
        let samples: Vec<MetricSample> = (0..24)
            .map(|h| sample_at(h * 60, 10.0 + 3.0 * h as f64))
            .collect();
        let (start, end) = window();

        let analysis = analyze_trend(
            &ClassifierThresholds::default(),
            "web-01",
            start,
            end,
            &samples,
        )
        .unwrap();

        assert_eq!(
            analysis.parameter(Parameter::Cpu).unwrap().direction,
            Direction::StronglyIncreasing
        );
    }

    #[test]
    fn spike_in_quiet_series_is_flagged_as_anomaly() {
        let mut samples: Vec<MetricSample> = (0..48)
            .map(|i| sample_at(i * 30, 30.0 + (i % 3) as f64))
            .collect();
        samples[40].cpu_pct = 95.0;
        let (start, end) = window();

        let analysis = analyze_trend(
            &ClassifierThresholds::default(),
            "web-01",
            start,
            end,
            &samples,
        )
        .unwrap();

        let spike = analysis
            .anomalies
            .iter()
            .find(|a| a.parameter == Parameter::Cpu && a.value == 95.0)
            .expect("spike should be flagged");
        assert!(spike.z_score > 2.0);
        assert!(analysis.overall_anomaly_score > 0.0);
    }

    #[test]
    fn predicted_critical_crossing_is_high_risk_with_eta() {
        // cpu at 70 rising 1.0/hour: crosses the critical threshold (81)
        // in ~11 hours
        let samples: Vec<MetricSample> = (0..24)
            .map(|h| sample_at(h * 60, 47.0 + h as f64))
            .collect();
        let (start, end) = window();

        let analysis = analyze_trend(
            &ClassifierThresholds::default(),
            "web-01",
            start,
            end,
            &samples,
        )
        .unwrap();

        assert_eq!(analysis.failure_risk.level, RiskLevel::High);
        assert_eq!(analysis.failure_risk.primary_cause, Some(Parameter::Cpu));
        let eta = analysis.failure_risk.eta_hours.unwrap();
        assert!((eta - 11.0).abs() < 0.5, "eta was {eta}");
    }

    #[test]
    fn rising_cpu_produces_a_recommendation() {
        let samples: Vec<MetricSample> = (0..24)
            .map(|h| sample_at(h * 60, 47.0 + h as f64))
            .collect();
        let (start, end) = window();

        let analysis = analyze_trend(
            &ClassifierThresholds::default(),
            "web-01",
            start,
            end,
            &samples,
        )
        .unwrap();

        assert!(
            analysis
                .recommendations
                .iter()
                .any(|r| r.kind == RecommendationKind::Immediate
                    && r.priority == RecommendationPriority::High)
        );
    }

    #[test]
    fn peak_hours_surface_the_hot_part_of_the_day() {
        // Hours 12-14 run hot, everything else idles
        let samples: Vec<MetricSample> = (0..48)
            .map(|i| {
                let hour = (i * 30 / 60) % 24;
                sample_at(i * 30, if (12..15).contains(&hour) { 90.0 } else { 15.0 })
            })
            .collect();
        let (start, end) = window();

        let analysis = analyze_trend(
            &ClassifierThresholds::default(),
            "web-01",
            start,
            end,
            &samples,
        )
        .unwrap();

        let mut peaks = analysis.peak_hours.clone();
        peaks.sort_unstable();
        assert_eq!(peaks, vec![12, 13, 14]);
    }
}
