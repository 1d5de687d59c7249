//! Alert condition configuration
//!
//! A condition binds one parameter to warning/critical/recovery thresholds
//! plus an anti-spam policy. Conditions are validated when configured, never
//! at evaluation time: a condition that passes [`AlertConditionConfig::validate`]
//! cannot produce a nonsensical evaluation later.

use serde::{Deserialize, Serialize};

use crate::Parameter;
use crate::error::{EngineError, EngineResult};

/// Comparison operator for a threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl ThresholdOp {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOp::Gt => value > threshold,
            ThresholdOp::Ge => value >= threshold,
            ThresholdOp::Lt => value < threshold,
            ThresholdOp::Le => value <= threshold,
            ThresholdOp::Eq => value == threshold,
            ThresholdOp::Ne => value != threshold,
        }
    }
}

/// Alert severity. Distinct from the five-level server status: alerts only
/// know warning and critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One threshold level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Threshold {
    pub value: f64,
    #[serde(default = "default_breach_op")]
    pub operator: ThresholdOp,
    /// The threshold must hold continuously for this long before it takes
    /// effect (fires for warning/critical, resolves for recovery).
    #[serde(default = "default_min_duration")]
    pub min_duration_minutes: i64,
}

fn default_breach_op() -> ThresholdOp {
    ThresholdOp::Gt
}

fn default_min_duration() -> i64 {
    5
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub warning: Threshold,
    pub critical: Threshold,
    pub recovery: Threshold,
}

/// Escalation from transient to recurring alerts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecurrencePolicy {
    pub count: u32,
    pub within_minutes: i64,
}

impl Default for RecurrencePolicy {
    fn default() -> Self {
        Self {
            count: 3,
            within_minutes: 60,
        }
    }
}

/// Anti-spam policy for one condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiSpamPolicy {
    /// Minimum minutes between fires of the same (server, condition, severity)
    pub cooldown_minutes: i64,
    /// Track the alert as a lifecycle object; an unresolved instance of the
    /// same severity suppresses re-fires. When false, cooldown is ignored
    /// and every evaluation cycle may re-fire.
    pub state_based: bool,
    /// Hard cap on fires per hour; beyond it, breaches are recorded but
    /// marked suppressed.
    pub max_per_hour: u32,
    pub recurring: RecurrencePolicy,
}

impl Default for AntiSpamPolicy {
    fn default() -> Self {
        Self {
            cooldown_minutes: 30,
            state_based: true,
            max_per_hour: 5,
            recurring: RecurrencePolicy::default(),
        }
    }
}

/// One operator-configured alert condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConditionConfig {
    pub id: String,
    /// None means the condition applies fleet-wide; a server-specific
    /// condition for the same parameter takes precedence.
    #[serde(default)]
    pub server_id: Option<String>,
    pub parameter: Parameter,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub thresholds: AlertThresholds,
    #[serde(default)]
    pub anti_spam: AntiSpamPolicy,
}

fn default_enabled() -> bool {
    true
}

impl AlertConditionConfig {
    /// Severity triggered by a value, critical checked first.
    pub fn severity_of(&self, value: f64) -> Option<Severity> {
        if self
            .thresholds
            .critical
            .operator
            .compare(value, self.thresholds.critical.value)
        {
            Some(Severity::Critical)
        } else if self
            .thresholds
            .warning
            .operator
            .compare(value, self.thresholds.warning.value)
        {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    pub fn in_recovery(&self, value: f64) -> bool {
        self.thresholds
            .recovery
            .operator
            .compare(value, self.thresholds.recovery.value)
    }

    pub fn threshold(&self, severity: Severity) -> &Threshold {
        match severity {
            Severity::Warning => &self.thresholds.warning,
            Severity::Critical => &self.thresholds.critical,
        }
    }

    /// Reject misconfigured conditions up front.
    ///
    /// For parameters where higher is worse the chain must be
    /// recovery < warning < critical; for decreasing parameters
    /// (throughput) the chain reverses.
    pub fn validate(&self) -> EngineResult<()> {
        let AlertThresholds {
            warning,
            critical,
            recovery,
        } = &self.thresholds;

        let ordered = if self.parameter.increasing() {
            recovery.value < warning.value && warning.value < critical.value
        } else {
            recovery.value > warning.value && warning.value > critical.value
        };

        if !ordered {
            let direction = if self.parameter.increasing() {
                "recovery < warning < critical"
            } else {
                "recovery > warning > critical"
            };
            return Err(EngineError::Validation(format!(
                "condition {}: thresholds for {} must satisfy {direction}",
                self.id, self.parameter
            )));
        }

        for (name, t) in [
            ("warning", warning),
            ("critical", critical),
            ("recovery", recovery),
        ] {
            if t.min_duration_minutes < 0 {
                return Err(EngineError::Validation(format!(
                    "condition {}: {name} duration must be non-negative",
                    self.id
                )));
            }
        }

        if self.anti_spam.cooldown_minutes < 0 {
            return Err(EngineError::Validation(format!(
                "condition {}: cooldown must be non-negative",
                self.id
            )));
        }
        if self.anti_spam.max_per_hour == 0 {
            return Err(EngineError::Validation(format!(
                "condition {}: max_per_hour must be at least 1",
                self.id
            )));
        }
        if self.anti_spam.recurring.count == 0 || self.anti_spam.recurring.within_minutes <= 0 {
            return Err(EngineError::Validation(format!(
                "condition {}: recurrence policy must be positive",
                self.id
            )));
        }

        Ok(())
    }
}

/// Select the conditions that apply to one server: enabled conditions whose
/// server matches, with server-specific entries shadowing global ones for
/// the same parameter.
pub fn effective_conditions<'a>(
    conditions: &'a [AlertConditionConfig],
    server_id: &str,
) -> Vec<&'a AlertConditionConfig> {
    let mut selected: Vec<&AlertConditionConfig> = Vec::new();

    for condition in conditions.iter().filter(|c| c.enabled) {
        match &condition.server_id {
            Some(id) if id == server_id => {
                // Shadow any global condition for the same parameter
                selected.retain(|c| !(c.server_id.is_none() && c.parameter == condition.parameter));
                selected.push(condition);
            }
            None => {
                let shadowed = selected.iter().any(|c| {
                    c.server_id.as_deref() == Some(server_id) && c.parameter == condition.parameter
                });
                if !shadowed {
                    selected.push(condition);
                }
            }
            Some(_) => {}
        }
    }

    selected
}
