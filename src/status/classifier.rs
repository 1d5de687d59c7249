//! Status classifier - maps one sample to parameter levels and a combined status
//!
//! Classification is pure computation over a single [`MetricSample`] plus the
//! configured threshold tables. It never looks at history; anti-flapping is
//! the hysteresis machine's job.
//!
//! The combined status is decided by explicit priority rules. The weighted
//! score computed alongside is diagnostics only and never drives the
//! decision.

use serde::{Deserialize, Serialize};

use crate::config::ClassifierThresholds;
use crate::{MetricSample, Parameter};

/// Per-parameter condition level, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Normal,
    Warning,
    Critical,
    Danger,
    /// Value missing or not classifiable (counts mid-severity in the
    /// weighted score, never triggers DANGER/CRITICAL on its own).
    Unknown,
}

impl Level {
    /// Weight of this level in the diagnostic score.
    pub fn weight(&self) -> f64 {
        match self {
            Level::Normal => 1.0,
            Level::Warning => 2.0,
            Level::Critical => 3.0,
            Level::Danger => 4.0,
            Level::Unknown => 2.0,
        }
    }
}

/// Combined server status. Ordered by severity rank, see [`ServerStatus::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Healthy,
    Warning,
    Critical,
    Danger,
    Offline,
    /// Administrative state; only reachable via an explicit override and
    /// exempt from automatic transitions until cleared.
    Maintenance,
}

impl ServerStatus {
    /// Severity rank used by the hysteresis machine to decide whether a
    /// candidate transition is an upgrade (worsening) or downgrade.
    /// MAINTENANCE ranks below everything: it never wins automatically.
    pub fn rank(&self) -> u8 {
        match self {
            ServerStatus::Maintenance => 0,
            ServerStatus::Healthy => 1,
            ServerStatus::Warning => 2,
            ServerStatus::Critical => 3,
            ServerStatus::Danger => 4,
            ServerStatus::Offline => 5,
        }
    }

    /// Legacy three-level condition used by the aggregation accounting and
    /// display mapping. Not business logic: the five-level enum is canonical.
    pub fn condition(&self) -> Condition {
        match self {
            ServerStatus::Healthy | ServerStatus::Maintenance => Condition::Normal,
            ServerStatus::Warning | ServerStatus::Offline => Condition::Warning,
            ServerStatus::Critical | ServerStatus::Danger => Condition::Critical,
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerStatus::Healthy => "HEALTHY",
            ServerStatus::Warning => "WARNING",
            ServerStatus::Critical => "CRITICAL",
            ServerStatus::Danger => "DANGER",
            ServerStatus::Offline => "OFFLINE",
            ServerStatus::Maintenance => "MAINTENANCE",
        };
        write!(f, "{name}")
    }
}

/// Legacy 3-level condition vocabulary (display/aggregation only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    Normal,
    Warning,
    Critical,
}

/// Result of classifying one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub status: ServerStatus,
    pub reason: String,
    /// Confidence in the instantaneous decision, 0-100.
    pub confidence: f64,
    /// Per-parameter levels, in [`Parameter::CLASSIFIED`] order.
    pub levels: Vec<(Parameter, Level)>,
    /// Weighted diagnostic score (1.0 = all normal, 4.0 = all danger).
    pub weighted_score: f64,
}

impl Classification {
    pub fn level_of(&self, parameter: Parameter) -> Level {
        self.levels
            .iter()
            .find(|(p, _)| *p == parameter)
            .map(|(_, l)| *l)
            .unwrap_or(Level::Unknown)
    }
}

/// Classify a single parameter value against its configured ranges.
///
/// Ranges are checked worst-to-best so shared boundary values resolve to the
/// worse bucket. A finite value outside every range classifies as danger:
/// the fail-safe leans toward visibility, not silence.
pub fn classify_parameter(thresholds: &crate::config::LevelRanges, value: f64) -> Level {
    if value.is_nan() {
        return Level::Unknown;
    }

    for (level, band) in [
        (Level::Danger, &thresholds.danger),
        (Level::Critical, &thresholds.critical),
        (Level::Warning, &thresholds.warning),
        (Level::Normal, &thresholds.normal),
    ] {
        if value >= band.min && value <= band.max {
            return level;
        }
    }

    Level::Danger
}

/// Weighted criticality score across all classified parameters.
///
/// Diagnostics only. The combined status decision uses the priority rules in
/// [`classify_sample`], never this score.
pub fn weighted_score(levels: &[(Parameter, Level)], config: &ClassifierThresholds) -> f64 {
    let mut total = 0.0;
    let mut weight_sum = 0.0;

    for (parameter, level) in levels {
        let parameter_weight = config.parameter_weight(*parameter);
        total += level.weight() * parameter_weight;
        weight_sum += parameter_weight;
    }

    if weight_sum > 0.0 {
        total / weight_sum
    } else {
        Level::Unknown.weight()
    }
}

/// Classify a full sample: per-parameter levels plus the combined status.
///
/// Priority rules, evaluated in fixed order:
/// 1. DANGER - any parameter danger, or cpu/memory critical with another
///    parameter at warning or worse.
/// 2. CRITICAL - cpu or memory critical, or two or more criticals, or
///    cpu/memory warning alongside another critical.
/// 3. WARNING - two or more warnings, a lone non-cpu/memory critical, or
///    cpu/memory warning.
/// 4. HEALTHY otherwise.
pub fn classify_sample(config: &ClassifierThresholds, sample: &MetricSample) -> Classification {
    let levels: Vec<(Parameter, Level)> = Parameter::CLASSIFIED
        .iter()
        .map(|&p| (p, classify_parameter(config.ranges_for(p), sample.value_of(p))))
        .collect();

    let count = |level: Level| levels.iter().filter(|(_, l)| *l == level).count();

    let cpu = levels
        .iter()
        .find(|(p, _)| *p == Parameter::Cpu)
        .map(|(_, l)| *l)
        .unwrap_or(Level::Unknown);
    let memory = levels
        .iter()
        .find(|(p, _)| *p == Parameter::Memory)
        .map(|(_, l)| *l)
        .unwrap_or(Level::Unknown);

    let dangers = count(Level::Danger);
    let criticals = count(Level::Critical);
    let warnings = count(Level::Warning);

    let core_critical = cpu == Level::Critical || memory == Level::Critical;
    let core_warning = cpu == Level::Warning || memory == Level::Warning;

    // "warning or worse" on any parameter other than the given one; unknown
    // levels never count toward escalation
    let degraded_besides = |except: Parameter| {
        levels.iter().any(|(p, l)| {
            *p != except && matches!(l, Level::Warning | Level::Critical | Level::Danger)
        })
    };
    let core_critical_with_company = (cpu == Level::Critical && degraded_besides(Parameter::Cpu))
        || (memory == Level::Critical && degraded_besides(Parameter::Memory));

    let (status, reason, confidence) = if dangers > 0 {
        (
            ServerStatus::Danger,
            format!("{dangers} parameter(s) in danger range"),
            95.0,
        )
    } else if core_critical_with_company {
        (
            ServerStatus::Danger,
            "cpu/memory critical with other parameters degraded".to_string(),
            95.0,
        )
    } else if core_critical {
        (
            ServerStatus::Critical,
            "cpu or memory in critical range".to_string(),
            90.0,
        )
    } else if criticals >= 2 {
        (
            ServerStatus::Critical,
            format!("{criticals} parameters in critical range"),
            90.0,
        )
    } else if core_warning && criticals >= 1 {
        (
            ServerStatus::Critical,
            "cpu/memory warning with another parameter critical".to_string(),
            90.0,
        )
    } else if core_warning {
        (
            ServerStatus::Warning,
            "cpu or memory in warning range".to_string(),
            85.0,
        )
    } else if warnings >= 2 {
        (
            ServerStatus::Warning,
            format!("{warnings} parameters in warning range"),
            85.0,
        )
    } else if criticals >= 1 {
        (
            ServerStatus::Warning,
            "single non-cpu/memory parameter critical".to_string(),
            85.0,
        )
    } else {
        (
            ServerStatus::Healthy,
            "all parameters in normal range".to_string(),
            100.0,
        )
    };

    let weighted_score = weighted_score(&levels, config);

    Classification {
        status,
        reason,
        confidence,
        levels,
        weighted_score,
    }
}
