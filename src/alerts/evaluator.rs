//! Alert evaluation - debounce, anti-spam, recurrence, recovery
//!
//! The evaluator owns per-(server, condition) lifecycle state:
//!
//! ```text
//! value breaches threshold:
//!   breach younger than min duration      → debounced, nothing emitted
//!   breach persists, no anti-spam block   → Fired (new or re-fired instance)
//!   active instance / cooldown (stateful) → duplicate, logged only
//!   hourly fire cap reached               → Suppressed
//!   Nth episode within recurrence window  → Escalated (TRANSIENT→RECURRING)
//!
//! value in recovery zone:
//!   recovery younger than min duration    → still pending
//!   recovery held continuously            → Resolved
//! ```
//!
//! Occurrences are counted per breach *episode* (a breach onset that
//! survived the debounce), not per evaluation cycle, so a steady breach
//! sampled every minute counts once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::condition::{AlertConditionConfig, Severity};

static NEXT_ALERT_ID: AtomicU64 = AtomicU64::new(1);

fn next_alert_id() -> u64 {
    NEXT_ALERT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle state of an alert instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLifecycle {
    Transient,
    Recurring,
    Suppressed,
    Resolved,
}

/// One tracked alert: created on the first surviving breach, mutated on
/// repeat breaches, resolved when recovery holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertInstance {
    pub id: u64,
    pub condition_id: String,
    pub server_id: String,
    pub severity: Severity,
    pub value: f64,
    pub first_fired_at: DateTime<Utc>,
    pub last_fired_at: DateTime<Utc>,
    pub occurrence_count: u32,
    pub state: AlertLifecycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventKind {
    Fired,
    Escalated,
    Resolved,
    Suppressed,
}

/// Event emitted to downstream notification/transport collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub instance: AlertInstance,
    pub kind: AlertEventKind,
    pub reason: String,
}

/// Per-(server, condition) evaluation state.
#[derive(Debug, Default)]
struct ConditionState {
    /// Onset of the current breach, if any, and the severity it carries
    breach_since: Option<(Severity, DateTime<Utc>)>,
    /// Whether the current breach episode has been counted as an occurrence
    episode_counted: bool,
    /// Start of a continuous stay in the recovery zone
    recovery_since: Option<DateTime<Utc>>,
    /// Active (unresolved) alert instance
    active: Option<AlertInstance>,
    /// Last fire time per severity, for cooldown
    last_fired: HashMap<Severity, DateTime<Utc>>,
    /// Fire timestamps inside the rolling hour, for the hard cap
    fires_in_hour: VecDeque<DateTime<Utc>>,
    /// Breach-episode timestamps inside the recurrence window
    occurrences: VecDeque<DateTime<Utc>>,
}

/// Stateful evaluator for all (server, condition) pairs.
///
/// Conditions themselves are read-only input; the evaluator only owns the
/// lifecycle state keyed by (server, condition id).
#[derive(Debug, Default)]
pub struct AlertEvaluator {
    states: HashMap<(String, String), ConditionState>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently active (unresolved) instances, for observability.
    pub fn active_instances(&self) -> Vec<&AlertInstance> {
        self.states.values().filter_map(|s| s.active.as_ref()).collect()
    }

    /// Evaluate one condition against one sampled value.
    pub fn evaluate(
        &mut self,
        condition: &AlertConditionConfig,
        server_id: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        let key = (server_id.to_string(), condition.id.clone());
        let state = self.states.entry(key).or_default();

        match condition.severity_of(value) {
            Some(severity) => Self::handle_breach(state, condition, server_id, severity, value, now),
            None => Self::handle_clear(state, condition, server_id, value, now),
        }
    }

    fn handle_breach(
        state: &mut ConditionState,
        condition: &AlertConditionConfig,
        server_id: &str,
        severity: Severity,
        value: f64,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        state.recovery_since = None;

        // A severity change restarts persistence tracking: the critical
        // threshold earns its own min duration.
        let since = match state.breach_since {
            Some((current, since)) if current == severity => since,
            _ => {
                state.breach_since = Some((severity, now));
                state.episode_counted = false;
                now
            }
        };

        let held = now - since;
        let required = Duration::minutes(condition.threshold(severity).min_duration_minutes);
        if held < required {
            trace!(
                condition = %condition.id,
                server = server_id,
                "breach debounced ({}s/{}s)",
                held.num_seconds(),
                required.num_seconds()
            );
            return Vec::new();
        }

        let mut events = Vec::new();

        // First surviving evaluation of this episode counts as an occurrence.
        if !state.episode_counted {
            state.episode_counted = true;
            state.occurrences.push_back(now);
        }
        let window = Duration::minutes(condition.anti_spam.recurring.within_minutes);
        while state
            .occurrences
            .front()
            .is_some_and(|t| now - *t > window)
        {
            state.occurrences.pop_front();
        }

        // Anti-spam gates, checked in order of severity of effect.
        let blocked_reason = if condition.anti_spam.state_based {
            let duplicate_instance = state
                .active
                .as_ref()
                .is_some_and(|a| a.severity == severity && a.state != AlertLifecycle::Resolved);
            let in_cooldown = state.last_fired.get(&severity).is_some_and(|last| {
                now - *last < Duration::minutes(condition.anti_spam.cooldown_minutes)
            });

            if duplicate_instance {
                Some("state_based: instance already active")
            } else if in_cooldown {
                Some("cooldown")
            } else {
                None
            }
        } else {
            None
        };

        if let Some(reason) = blocked_reason {
            debug!(
                condition = %condition.id,
                server = server_id,
                severity = %severity,
                "fire blocked ({reason})"
            );
            // A blocked duplicate still refreshes the active instance
            if let Some(active) = &mut state.active {
                active.last_fired_at = now;
                active.value = value;
                active.occurrence_count = state.occurrences.len() as u32;
            }
        } else {
            // Hourly hard cap applies regardless of the other rules.
            while state
                .fires_in_hour
                .front()
                .is_some_and(|t| now - *t > Duration::hours(1))
            {
                state.fires_in_hour.pop_front();
            }

            let capped = state.fires_in_hour.len() >= condition.anti_spam.max_per_hour as usize;

            let instance = match &mut state.active {
                Some(active) => {
                    active.last_fired_at = now;
                    active.value = value;
                    active.occurrence_count = state.occurrences.len() as u32;
                    if severity == Severity::Critical {
                        active.severity = Severity::Critical;
                    }
                    active.clone()
                }
                None => {
                    let instance = AlertInstance {
                        id: next_alert_id(),
                        condition_id: condition.id.clone(),
                        server_id: server_id.to_string(),
                        severity,
                        value,
                        first_fired_at: now,
                        last_fired_at: now,
                        occurrence_count: state.occurrences.len() as u32,
                        state: AlertLifecycle::Transient,
                    };
                    state.active = Some(instance.clone());
                    instance
                }
            };

            if capped {
                if let Some(active) = &mut state.active {
                    active.state = AlertLifecycle::Suppressed;
                }
                let mut suppressed = instance;
                suppressed.state = AlertLifecycle::Suppressed;
                events.push(AlertEvent {
                    instance: suppressed,
                    kind: AlertEventKind::Suppressed,
                    reason: format!(
                        "max_per_hour: {} fires in the last hour",
                        state.fires_in_hour.len()
                    ),
                });
            } else {
                state.fires_in_hour.push_back(now);
                state.last_fired.insert(severity, now);
                events.push(AlertEvent {
                    instance,
                    kind: AlertEventKind::Fired,
                    reason: format!("threshold breach held for {} min", held.num_minutes()),
                });
            }
        }

        // Recurrence escalation flips the flag exactly once, on the Nth
        // occurrence inside the window, independent of fire suppression.
        if let Some(active) = &mut state.active {
            if active.state == AlertLifecycle::Transient
                && state.occurrences.len() >= condition.anti_spam.recurring.count as usize
            {
                active.state = AlertLifecycle::Recurring;
                active.occurrence_count = state.occurrences.len() as u32;
                events.push(AlertEvent {
                    instance: active.clone(),
                    kind: AlertEventKind::Escalated,
                    reason: format!(
                        "recurrence: {} occurrences within {} min",
                        state.occurrences.len(),
                        condition.anti_spam.recurring.within_minutes
                    ),
                });
            }
        }

        events
    }

    fn handle_clear(
        state: &mut ConditionState,
        condition: &AlertConditionConfig,
        server_id: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        state.breach_since = None;
        state.episode_counted = false;

        if !condition.in_recovery(value) {
            // Between recovery and warning: continuity of the recovery hold
            // is broken.
            state.recovery_since = None;
            return Vec::new();
        }

        let Some(active) = &state.active else {
            state.recovery_since = None;
            return Vec::new();
        };

        let since = *state.recovery_since.get_or_insert(now);
        let required = Duration::minutes(condition.thresholds.recovery.min_duration_minutes);
        if now - since < required {
            trace!(
                condition = %condition.id,
                server = server_id,
                "recovery pending ({}s held)",
                (now - since).num_seconds()
            );
            return Vec::new();
        }

        let mut resolved = active.clone();
        resolved.state = AlertLifecycle::Resolved;
        state.active = None;
        state.recovery_since = None;

        debug!(
            condition = %condition.id,
            server = server_id,
            "alert resolved after recovery held"
        );

        vec![AlertEvent {
            instance: resolved,
            kind: AlertEventKind::Resolved,
            reason: format!(
                "recovery held for {} min",
                required.num_minutes()
            ),
        }]
    }
}
