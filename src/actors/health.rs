//! HealthActor - single writer of per-server health state
//!
//! Runs the classifier and the hysteresis machine inline on every ingested
//! sample; owning all [`HealthState`]s in one task keeps each decision
//! atomic with its ring-buffer append without locking. A periodic staleness
//! sweep catches servers that simply stop reporting.
//!
//! Accepted transitions are published as [`StatusChangeEvent`]s; rejected
//! ones are logged with their machine-readable reason.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, trace, warn};

use crate::config::{ClassifierThresholds, HysteresisSettings};
use crate::error::{EngineError, EngineResult};
use crate::status::classifier::{ServerStatus, classify_sample};
use crate::status::hysteresis::{HealthState, TransitionDecision};

use super::messages::{HealthCommand, HealthSnapshot, SampleEvent, StatusChangeEvent};

/// How often silent servers are checked for staleness.
const STALENESS_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60);

pub struct HealthActor {
    thresholds: ClassifierThresholds,
    hysteresis: HysteresisSettings,

    /// Per-server state; this actor is the only writer
    states: HashMap<String, HealthState>,

    command_rx: mpsc::Receiver<HealthCommand>,
    sample_rx: broadcast::Receiver<SampleEvent>,
    status_tx: broadcast::Sender<StatusChangeEvent>,
}

impl HealthActor {
    pub fn new(
        thresholds: ClassifierThresholds,
        hysteresis: HysteresisSettings,
        command_rx: mpsc::Receiver<HealthCommand>,
        sample_rx: broadcast::Receiver<SampleEvent>,
        status_tx: broadcast::Sender<StatusChangeEvent>,
    ) -> Self {
        Self {
            thresholds,
            hysteresis,
            states: HashMap::new(),
            command_rx,
            sample_rx,
            status_tx,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting health actor");

        let mut sweep = interval(STALENESS_SWEEP_INTERVAL);
        // The first tick fires immediately; skip it so a fresh engine does
        // not sweep before any sample arrived.
        sweep.tick().await;

        loop {
            tokio::select! {
                result = self.sample_rx.recv() => {
                    match result {
                        Ok(event) => self.handle_sample(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("health actor lagged, skipped {skipped} samples");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("sample channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = sweep.tick() => {
                    self.sweep_staleness();
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        HealthCommand::GetState { server_id, respond_to } => {
                            let _ = respond_to.send(self.snapshot(&server_id));
                        }

                        HealthCommand::Override { server_id, status, reason, duration, respond_to } => {
                            let _ = respond_to.send(self.apply_override(server_id, status, reason, duration));
                        }

                        HealthCommand::RevertOverride { server_id, respond_to } => {
                            let _ = respond_to.send(self.revert_override(&server_id));
                        }

                        HealthCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("health actor stopped");
    }

    #[instrument(skip(self, event), fields(server_id = %event.sample.server_id))]
    fn handle_sample(&mut self, event: SampleEvent) {
        let server_id = event.sample.server_id.clone();
        let now = event.received_at;

        let classification = classify_sample(&self.thresholds, &event.sample);
        trace!(
            status = %classification.status,
            score = classification.weighted_score,
            "classified sample"
        );

        let state = self
            .states
            .entry(server_id.clone())
            .or_insert_with(|| HealthState::new(server_id, now));

        let decision =
            state.evaluate(&self.hysteresis, &classification, event.sample.timestamp, now);
        Self::publish(&self.status_tx, state, decision, now);
    }

    fn sweep_staleness(&mut self) {
        let now = Utc::now();
        for state in self.states.values_mut() {
            let decision = state.evaluate_staleness(&self.hysteresis, now);
            Self::publish(&self.status_tx, state, decision, now);
        }
    }

    fn publish(
        status_tx: &broadcast::Sender<StatusChangeEvent>,
        state: &HealthState,
        decision: TransitionDecision,
        now: chrono::DateTime<Utc>,
    ) {
        match decision {
            TransitionDecision::Changed {
                old,
                new,
                reason,
                confidence,
            } => {
                debug!(
                    server_id = %state.server_id,
                    %old,
                    %new,
                    %reason,
                    "status transition accepted"
                );
                // Send errors just mean nobody is subscribed yet.
                let _ = status_tx.send(StatusChangeEvent {
                    server_id: state.server_id.clone(),
                    old_status: old,
                    new_status: new,
                    reason,
                    confidence,
                    at: now,
                });
            }
            TransitionDecision::Unchanged { reason } => {
                trace!(server_id = %state.server_id, %reason, "status unchanged");
            }
        }
    }

    fn snapshot(&self, server_id: &str) -> Option<HealthSnapshot> {
        self.states.get(server_id).map(|state| HealthSnapshot {
            server_id: state.server_id.clone(),
            status: state.current_status,
            last_change_at: state.last_change_at,
            last_sample_at: state.last_sample_at,
            confidence: state.confidence,
            recent_statuses: state.recent_statuses().collect(),
            override_active: state.active_override().is_some(),
        })
    }

    fn apply_override(
        &mut self,
        server_id: String,
        status: ServerStatus,
        reason: String,
        duration: Option<Duration>,
    ) -> EngineResult<()> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation(
                "override requires a reason".to_string(),
            ));
        }
        if duration.is_some_and(|d| d <= Duration::zero()) {
            return Err(EngineError::Validation(
                "override duration must be positive".to_string(),
            ));
        }

        let now = Utc::now();
        let state = self
            .states
            .entry(server_id.clone())
            .or_insert_with(|| HealthState::new(server_id, now));

        let decision = state.apply_override(status, reason, duration, now);
        Self::publish(&self.status_tx, state, decision, now);
        Ok(())
    }

    fn revert_override(&mut self, server_id: &str) -> EngineResult<()> {
        let Some(state) = self.states.get_mut(server_id) else {
            return Err(EngineError::Validation(format!(
                "no health state for server {server_id}"
            )));
        };

        if !state.revert_override() {
            return Err(EngineError::Validation(format!(
                "no active override for server {server_id}"
            )));
        }
        Ok(())
    }
}

/// Handle for controlling the HealthActor
#[derive(Clone)]
pub struct HealthHandle {
    sender: mpsc::Sender<HealthCommand>,
}

impl HealthHandle {
    /// Spawn a new health actor
    pub fn spawn(
        thresholds: ClassifierThresholds,
        hysteresis: HysteresisSettings,
        sample_rx: broadcast::Receiver<SampleEvent>,
        status_tx: broadcast::Sender<StatusChangeEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = HealthActor::new(thresholds, hysteresis, cmd_rx, sample_rx, status_tx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn get_state(&self, server_id: String) -> Option<HealthSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::GetState {
                server_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    pub async fn override_status(
        &self,
        server_id: String,
        status: ServerStatus,
        reason: String,
        duration: Option<Duration>,
    ) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::Override {
                server_id,
                status,
                reason,
                duration,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::Shutdown)?;

        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    pub async fn revert_override(&self, server_id: String) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::RevertOverride {
                server_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::Shutdown)?;

        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(HealthCommand::Shutdown).await;
    }
}
