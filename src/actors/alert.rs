//! AlertActor - evaluates conditions against ingested samples
//!
//! Owns the [`AlertEvaluator`] state and the active condition set. For each
//! sample it selects the conditions that apply to the server (specific over
//! global), evaluates the sampled value, and broadcasts whatever events the
//! evaluator produced. Evaluation uses the sample's own timestamp, so
//! replayed history evaluates the same way live traffic does.

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use crate::alerts::condition::{AlertConditionConfig, effective_conditions};
use crate::alerts::evaluator::{AlertEvaluator, AlertEvent, AlertInstance};
use crate::error::{EngineError, EngineResult};

use super::messages::{AlertCommand, SampleEvent};

pub struct AlertActor {
    conditions: Vec<AlertConditionConfig>,
    evaluator: AlertEvaluator,

    command_rx: mpsc::Receiver<AlertCommand>,
    sample_rx: broadcast::Receiver<SampleEvent>,
    alert_tx: broadcast::Sender<AlertEvent>,

    muted: bool,
}

impl AlertActor {
    pub fn new(
        conditions: Vec<AlertConditionConfig>,
        command_rx: mpsc::Receiver<AlertCommand>,
        sample_rx: broadcast::Receiver<SampleEvent>,
        alert_tx: broadcast::Sender<AlertEvent>,
    ) -> Self {
        Self {
            conditions,
            evaluator: AlertEvaluator::new(),
            command_rx,
            sample_rx,
            alert_tx,
            muted: false,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor with {} conditions", self.conditions.len());

        loop {
            tokio::select! {
                result = self.sample_rx.recv() => {
                    match result {
                        Ok(event) => {
                            if !self.muted {
                                self.handle_sample(event);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("alert actor lagged, skipped {skipped} samples");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("sample channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AlertCommand::ReplaceConditions { conditions, respond_to } => {
                            let _ = respond_to.send(self.replace_conditions(conditions));
                        }

                        AlertCommand::GetActive { respond_to } => {
                            let active = self
                                .evaluator
                                .active_instances()
                                .into_iter()
                                .cloned()
                                .collect();
                            let _ = respond_to.send(active);
                        }

                        AlertCommand::Mute => {
                            debug!("muting alert evaluation");
                            self.muted = true;
                        }

                        AlertCommand::Unmute => {
                            debug!("unmuting alert evaluation");
                            self.muted = false;
                        }

                        AlertCommand::Shutdown => {
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

        debug!("alert actor stopped");
    }

    #[instrument(skip(self, event), fields(server_id = %event.sample.server_id))]
    fn handle_sample(&mut self, event: SampleEvent) {
        let sample = &event.sample;
        let applicable = effective_conditions(&self.conditions, &sample.server_id);
        trace!("{} conditions apply", applicable.len());

        for condition in applicable {
            let value = sample.value_of(condition.parameter);
            let events =
                self.evaluator
                    .evaluate(condition, &sample.server_id, value, sample.timestamp);

            for alert_event in events {
                debug!(
                    condition = %condition.id,
                    kind = ?alert_event.kind,
                    "alert event"
                );
                // Send errors just mean nobody is subscribed yet.
                let _ = self.alert_tx.send(alert_event);
            }
        }
    }

    /// Validate, then swap. Never partially applied: one bad condition
    /// rejects the whole set.
    fn replace_conditions(
        &mut self,
        conditions: Vec<AlertConditionConfig>,
    ) -> EngineResult<()> {
        for condition in &conditions {
            condition.validate()?;
        }
        debug!("replacing condition set ({} conditions)", conditions.len());
        self.conditions = conditions;
        Ok(())
    }
}

/// Handle for controlling the AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    /// Spawn a new alert actor. Conditions must already be validated (the
    /// engine validates its config at startup); replacements are validated
    /// on the way in.
    pub fn spawn(
        conditions: Vec<AlertConditionConfig>,
        sample_rx: broadcast::Receiver<SampleEvent>,
        alert_tx: broadcast::Sender<AlertEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AlertActor::new(conditions, cmd_rx, sample_rx, alert_tx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn replace_conditions(
        &self,
        conditions: Vec<AlertConditionConfig>,
    ) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::ReplaceConditions {
                conditions,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::Shutdown)?;

        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    pub async fn get_active(&self) -> Vec<AlertInstance> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AlertCommand::GetActive { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    pub async fn mute(&self) {
        let _ = self.sender.send(AlertCommand::Mute).await;
    }

    pub async fn unmute(&self) {
        let _ = self.sender.send(AlertCommand::Unmute).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
    }
}
