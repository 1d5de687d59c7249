//! Alert condition configuration and evaluation
//!
//! Conditions are operator-provided threshold rules with anti-spam policy;
//! the evaluator tracks per-(server, condition) lifecycle state (debounce,
//! cooldown, recurrence, hourly cap, recovery) independently of the status
//! machine.

pub mod condition;
pub mod evaluator;

pub use condition::{AlertConditionConfig, Severity, ThresholdOp};
pub use evaluator::{AlertEvaluator, AlertEvent, AlertEventKind, AlertInstance, AlertLifecycle};
