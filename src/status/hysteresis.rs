//! Hysteresis state machine - anti-flapping status transitions
//!
//! One [`HealthState`] per server, mutated exclusively by this module (the
//! health actor owns it, keeping the decision atomic with the ring-buffer
//! append). Rules:
//!
//! - staleness overrides everything: a hard-stale server is OFFLINE, a
//!   soft-stale one is WARNING, bypassing normal hysteresis
//! - upgrades (status worsens) apply immediately
//! - downgrades (status improves) require both a per-status minimum delay
//!   and a minimum number of agreeing samples in the ring buffer
//! - an active override pins the status until it expires or is reverted

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HysteresisSettings;
use crate::status::classifier::{Classification, ServerStatus};

/// Administrative status override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOverride {
    pub status: ServerStatus,
    pub reason: String,
    /// None pins the override until an explicit revert.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of one hysteresis evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionDecision {
    Changed {
        old: ServerStatus,
        new: ServerStatus,
        reason: String,
        confidence: f64,
    },
    /// Rejected transitions carry the machine-readable reason for
    /// observability; the engine never silently swallows a decision.
    Unchanged { reason: String },
}

/// Mutable health state for one server.
///
/// Never deleted, only superseded. The ring buffer holds the most recent
/// instantaneous classifier statuses and is bounded by the configured ring
/// capacity (which validation guarantees covers every sample-count policy).
#[derive(Debug, Clone)]
pub struct HealthState {
    pub server_id: String,
    pub current_status: ServerStatus,
    pub last_change_at: DateTime<Utc>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub confidence: f64,
    recent: VecDeque<ServerStatus>,
    override_state: Option<StatusOverride>,
}

impl HealthState {
    pub fn new(server_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            server_id: server_id.into(),
            current_status: ServerStatus::Healthy,
            last_change_at: now,
            last_sample_at: None,
            confidence: 100.0,
            recent: VecDeque::new(),
            override_state: None,
        }
    }

    pub fn recent_statuses(&self) -> impl Iterator<Item = ServerStatus> + '_ {
        self.recent.iter().copied()
    }

    pub fn active_override(&self) -> Option<&StatusOverride> {
        self.override_state.as_ref()
    }

    /// Pin the status administratively. This is the only way to enter
    /// MAINTENANCE. Returns the transition, which the caller should emit.
    pub fn apply_override(
        &mut self,
        status: ServerStatus,
        reason: String,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> TransitionDecision {
        let old = self.current_status;
        self.override_state = Some(StatusOverride {
            status,
            reason: reason.clone(),
            expires_at: duration.map(|d| now + d),
        });

        if old == status {
            return TransitionDecision::Unchanged {
                reason: format!("override_applied: already {status}"),
            };
        }

        self.current_status = status;
        self.last_change_at = now;
        self.confidence = 100.0;
        TransitionDecision::Changed {
            old,
            new: status,
            reason: format!("override: {reason}"),
            confidence: 100.0,
        }
    }

    /// Clear an active override. The pinned status remains until the next
    /// evaluation re-classifies the server.
    pub fn revert_override(&mut self) -> bool {
        self.override_state.take().is_some()
    }

    /// Staleness sweep without a fresh sample: the health actor calls this
    /// periodically so silent servers still go WARNING/OFFLINE.
    pub fn evaluate_staleness(
        &mut self,
        settings: &HysteresisSettings,
        now: DateTime<Utc>,
    ) -> TransitionDecision {
        if self.override_is_active(now) {
            return TransitionDecision::Unchanged {
                reason: "override_active".to_string(),
            };
        }

        let Some(last_sample) = self.last_sample_at else {
            return TransitionDecision::Unchanged {
                reason: "no_samples_yet".to_string(),
            };
        };

        let age_minutes = (now - last_sample).num_minutes();
        self.apply_staleness(age_minutes, settings, now)
            .unwrap_or(TransitionDecision::Unchanged {
                reason: "status_stable".to_string(),
            })
    }

    /// Evaluate one classifier result against the current state.
    pub fn evaluate(
        &mut self,
        settings: &HysteresisSettings,
        classification: &Classification,
        sample_timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TransitionDecision {
        if self.last_sample_at.is_none_or(|prev| sample_timestamp > prev) {
            self.last_sample_at = Some(sample_timestamp);
        }

        // Ring append happens before any decision so downgrade counting sees
        // the newest sample too.
        self.push_recent(classification.status, settings.ring_capacity);

        if self.override_is_active(now) {
            return TransitionDecision::Unchanged {
                reason: "override_active".to_string(),
            };
        }

        // Staleness overrides everything else.
        let age_minutes = (now - sample_timestamp).num_minutes();
        if let Some(decision) = self.apply_staleness(age_minutes, settings, now) {
            return decision;
        }

        let candidate = classification.status;
        let current = self.current_status;

        if candidate == current {
            return TransitionDecision::Unchanged {
                reason: "status_stable".to_string(),
            };
        }

        // Upgrade: worsening applies on the very next evaluation.
        if candidate.rank() > current.rank() {
            return self.transition(
                candidate,
                format!("upgrade: {}", classification.reason),
                classification.confidence,
                now,
            );
        }

        // Downgrade: both the delay and the agreeing-sample count must hold.
        let policy = settings.downgrade_from(current);
        let elapsed = (now - self.last_change_at).num_minutes();
        if elapsed < policy.delay_minutes {
            return TransitionDecision::Unchanged {
                reason: format!(
                    "downgrade_blocked: delay {elapsed}/{} min",
                    policy.delay_minutes
                ),
            };
        }

        let agreeing = self.recent.iter().filter(|s| **s == candidate).count();
        if agreeing < policy.required_samples {
            return TransitionDecision::Unchanged {
                reason: format!(
                    "downgrade_blocked: samples {agreeing}/{}",
                    policy.required_samples
                ),
            };
        }

        self.transition(
            candidate,
            format!(
                "downgrade: {} agreeing samples after {elapsed} min",
                agreeing
            ),
            80.0,
            now,
        )
    }

    fn override_is_active(&mut self, now: DateTime<Utc>) -> bool {
        match &self.override_state {
            Some(o) => {
                if o.expires_at.is_some_and(|exp| now >= exp) {
                    self.override_state = None;
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    fn apply_staleness(
        &mut self,
        age_minutes: i64,
        settings: &HysteresisSettings,
        now: DateTime<Utc>,
    ) -> Option<TransitionDecision> {
        if age_minutes > settings.stale_hard_minutes {
            if self.current_status == ServerStatus::Offline {
                return Some(TransitionDecision::Unchanged {
                    reason: "status_stable: already offline".to_string(),
                });
            }
            return Some(self.transition(
                ServerStatus::Offline,
                format!("stale_hard: no data for {age_minutes} min"),
                100.0,
                now,
            ));
        }

        if age_minutes > settings.stale_soft_minutes {
            if self.current_status == ServerStatus::Warning {
                return Some(TransitionDecision::Unchanged {
                    reason: "status_stable: already warning on stale data".to_string(),
                });
            }
            return Some(self.transition(
                ServerStatus::Warning,
                format!("stale_soft: no data for {age_minutes} min"),
                80.0,
                now,
            ));
        }

        None
    }

    fn transition(
        &mut self,
        new: ServerStatus,
        reason: String,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> TransitionDecision {
        let old = self.current_status;
        self.current_status = new;
        self.last_change_at = now;
        self.confidence = confidence;
        TransitionDecision::Changed {
            old,
            new,
            reason,
            confidence,
        }
    }

    fn push_recent(&mut self, status: ServerStatus, capacity: usize) {
        if self.recent.len() >= capacity.max(1) {
            self.recent.pop_front();
        }
        self.recent.push_back(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierThresholds;
    use crate::status::classifier::classify_sample;
    use crate::{LoadAverages, MetricSample, NetworkMetrics};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn sample_with(cpu: f64, timestamp: DateTime<Utc>) -> MetricSample {
        MetricSample {
            server_id: "web-01".to_string(),
            timestamp,
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

    fn classify(cpu: f64, timestamp: DateTime<Utc>) -> Classification {
        classify_sample(&ClassifierThresholds::default(), &sample_with(cpu, timestamp))
    }

    #[test]
    fn upgrade_applies_immediately() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        let decision = state.evaluate(&settings, &classify(90.0, now), now, now);

        assert_matches!(
            decision,
            TransitionDecision::Changed {
                old: ServerStatus::Healthy,
                new: ServerStatus::Critical,
                ..
            }
        );
        assert_eq!(state.current_status, ServerStatus::Critical);
    }

    #[test]
    fn downgrade_blocked_inside_minimum_delay() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        state.evaluate(&settings, &classify(90.0, now), now, now);
        assert_eq!(state.current_status, ServerStatus::Critical);

        // Three healthy samples one minute apart: agreement is there, the
        // 10-minute delay for CRITICAL is not.
        for i in 1..=3 {
            let ts = now + Duration::minutes(i);
            let decision = state.evaluate(&settings, &classify(20.0, ts), ts, ts);
            assert_matches!(decision, TransitionDecision::Unchanged { ref reason }
                if reason.starts_with("downgrade_blocked: delay"));
        }
        assert_eq!(state.current_status, ServerStatus::Critical);
    }

    #[test]
    fn downgrade_needs_agreeing_samples_after_delay() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        state.evaluate(&settings, &classify(90.0, now), now, now);

        // Past the delay but with only one healthy sample in the ring: the
        // sample-count condition still blocks.
        let ts = now + Duration::minutes(11);
        let decision = state.evaluate(&settings, &classify(20.0, ts), ts, ts);
        assert_matches!(decision, TransitionDecision::Unchanged { ref reason }
            if reason.starts_with("downgrade_blocked: samples"));

        // A second agreeing sample satisfies CRITICAL's 2-sample policy.
        let ts = now + Duration::minutes(12);
        let decision = state.evaluate(&settings, &classify(20.0, ts), ts, ts);
        assert_matches!(
            decision,
            TransitionDecision::Changed {
                old: ServerStatus::Critical,
                new: ServerStatus::Healthy,
                ..
            }
        );
    }

    #[test]
    fn hard_stale_forces_offline() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        let sample_ts = now - Duration::minutes(16);
        let decision = state.evaluate(&settings, &classify(20.0, sample_ts), sample_ts, now);

        assert_matches!(
            decision,
            TransitionDecision::Changed {
                new: ServerStatus::Offline,
                confidence,
                ..
            } if confidence == 100.0
        );
    }

    #[test]
    fn soft_stale_forces_warning_with_stale_reason() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        let sample_ts = now - Duration::minutes(10);
        let decision = state.evaluate(&settings, &classify(20.0, sample_ts), sample_ts, now);

        assert_matches!(
            decision,
            TransitionDecision::Changed {
                new: ServerStatus::Warning,
                ref reason,
                ..
            } if reason.starts_with("stale_soft")
        );
    }

    #[test]
    fn staleness_sweep_works_without_new_samples() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        state.evaluate(&settings, &classify(20.0, now), now, now);
        assert_eq!(state.current_status, ServerStatus::Healthy);

        let later = now + Duration::minutes(16);
        let decision = state.evaluate_staleness(&settings, later);
        assert_matches!(
            decision,
            TransitionDecision::Changed {
                new: ServerStatus::Offline,
                ..
            }
        );
    }

    #[test]
    fn override_pins_status_against_automatic_transitions() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        state.apply_override(
            ServerStatus::Maintenance,
            "planned kernel upgrade".to_string(),
            None,
            now,
        );
        assert_eq!(state.current_status, ServerStatus::Maintenance);

        // Even a danger-level sample cannot move a pinned server.
        let ts = now + Duration::minutes(1);
        let decision = state.evaluate(&settings, &classify(99.0, ts), ts, ts);
        assert_matches!(decision, TransitionDecision::Unchanged { ref reason }
            if reason == "override_active");

        // After revert, the next evaluation escapes MAINTENANCE immediately.
        assert!(state.revert_override());
        let ts = now + Duration::minutes(2);
        let decision = state.evaluate(&settings, &classify(99.0, ts), ts, ts);
        assert_matches!(
            decision,
            TransitionDecision::Changed {
                old: ServerStatus::Maintenance,
                new: ServerStatus::Danger,
                ..
            }
        );
    }

    #[test]
    fn timed_override_expires_on_its_own() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        state.apply_override(
            ServerStatus::Maintenance,
            "rolling restart".to_string(),
            Some(Duration::minutes(30)),
            now,
        );

        let during = now + Duration::minutes(10);
        let decision = state.evaluate(&settings, &classify(99.0, during), during, during);
        assert_matches!(decision, TransitionDecision::Unchanged { .. });

        let after = now + Duration::minutes(31);
        let decision = state.evaluate(&settings, &classify(99.0, after), after, after);
        assert_matches!(
            decision,
            TransitionDecision::Changed {
                new: ServerStatus::Danger,
                ..
            }
        );
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let settings = HysteresisSettings::default();
        let now = Utc::now();
        let mut state = HealthState::new("web-01", now);

        for i in 0..50 {
            let ts = now + Duration::seconds(i);
            state.evaluate(&settings, &classify(20.0, ts), ts, ts);
        }

        assert_eq!(state.recent_statuses().count(), settings.ring_capacity);
    }
}
