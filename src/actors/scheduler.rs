//! SchedulerActor - drives the analytics pipeline off the ingest path
//!
//! Periodically runs aggregation, baseline and trend per server, and serves
//! manual triggers for explicit dates/ranges. Concurrency rules:
//!
//! - at most one running task per (server, task-type) pair; an overlapping
//!   trigger is rejected with a busy error, never run concurrently
//! - a rebuild for a server is aborted when a newer rebuild for the same
//!   server arrives
//! - every task runs under the configured execution budget; on timeout it
//!   is aborted with nothing persisted, and the periodic cadence retries on
//!   the next cycle
//!
//! Records are archived only after a computation completes, so partial
//! results never land.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{NaiveDate, TimeDelta, Timelike, Utc};
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::analytics::aggregate::compute_daily_aggregate;
use crate::analytics::baseline::compute_baseline;
use crate::analytics::trend::analyze_trend;
use crate::analytics::{AnalyticsArchive, Baseline, DailyAggregate, TrendAnalysis};
use crate::config::{ClassifierThresholds, SchedulerSettings};
use crate::error::{EngineError, EngineResult};
use crate::MetricSample;
use crate::storage::{QueryRange, SampleRow, SampleStore};

use super::messages::{RebuildSummary, SampleEvent, SchedulerCommand, TaskKind};

pub struct SchedulerActor {
    store: Arc<dyn SampleStore>,
    archive: Arc<AnalyticsArchive>,
    thresholds: ClassifierThresholds,
    settings: SchedulerSettings,
    retention_days: u32,

    command_rx: mpsc::Receiver<SchedulerCommand>,
    sample_rx: broadcast::Receiver<SampleEvent>,

    /// Servers observed on the sample stream; periodic cycles cover these
    known_servers: HashSet<String>,

    /// Running tasks, for the at-most-one rule and rebuild cancellation
    running: HashMap<(String, TaskKind), JoinHandle<()>>,

    /// Last day the periodic aggregation covered
    last_aggregated: Option<NaiveDate>,

    /// When baselines were last recomputed
    last_baseline_at: Option<chrono::DateTime<Utc>>,
}

impl SchedulerActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SampleStore>,
        archive: Arc<AnalyticsArchive>,
        thresholds: ClassifierThresholds,
        settings: SchedulerSettings,
        retention_days: u32,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        sample_rx: broadcast::Receiver<SampleEvent>,
    ) -> Self {
        Self {
            store,
            archive,
            thresholds,
            settings,
            retention_days,
            command_rx,
            sample_rx,
            known_servers: HashSet::new(),
            running: HashMap::new(),
            last_aggregated: None,
            last_baseline_at: None,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut trend_ticker = interval(StdDuration::from_secs(
            self.settings.trend_interval_hours.max(1) * 3600,
        ));
        let mut hourly_ticker = interval(StdDuration::from_secs(3600));
        let mut cleanup_ticker = interval(StdDuration::from_secs(
            self.settings.cleanup_interval_hours.max(1) * 3600,
        ));
        // Skip the immediate first ticks: a fresh engine has nothing to
        // aggregate or clean yet.
        trend_ticker.tick().await;
        hourly_ticker.tick().await;
        cleanup_ticker.tick().await;

        loop {
            tokio::select! {
                result = self.sample_rx.recv() => {
                    match result {
                        Ok(event) => {
                            self.known_servers.insert(event.sample.server_id);
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Only server discovery happens here, lag is fine
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("sample channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = trend_ticker.tick() => {
                    self.periodic_trends();
                }

                _ = hourly_ticker.tick() => {
                    self.periodic_aggregation();
                    self.periodic_baselines();
                }

                _ = cleanup_ticker.tick() => {
                    self.spawn_cleanup();
                }

                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd) {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        // Drain: wait for in-flight tasks so nothing half-finishes silently
        let handles: Vec<JoinHandle<()>> = self.running.drain().map(|(_, h)| h).collect();
        join_all(handles).await;

        debug!("scheduler actor stopped");
    }

    /// Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: SchedulerCommand) -> bool {
        match cmd {
            SchedulerCommand::RunAggregation {
                server_id,
                date,
                respond_to,
            } => {
                let task = aggregation_task(
                    self.store.clone(),
                    self.archive.clone(),
                    self.thresholds.clone(),
                    server_id.clone(),
                    date,
                );
                self.try_spawn(server_id, TaskKind::Aggregation, Some(respond_to), task);
            }

            SchedulerCommand::RunBaseline {
                server_id,
                window_days,
                respond_to,
            } => {
                let task = baseline_task(
                    self.store.clone(),
                    self.archive.clone(),
                    server_id.clone(),
                    window_days,
                );
                self.try_spawn(server_id, TaskKind::Baseline, Some(respond_to), task);
            }

            SchedulerCommand::RunTrend {
                server_id,
                window_hours,
                respond_to,
            } => {
                let task = trend_task(
                    self.store.clone(),
                    self.archive.clone(),
                    self.thresholds.clone(),
                    server_id.clone(),
                    window_hours,
                );
                self.try_spawn(server_id, TaskKind::Trend, Some(respond_to), task);
            }

            SchedulerCommand::Rebuild {
                server_id,
                from,
                to,
                respond_to,
            } => {
                // Newest trigger wins: abort any rebuild already running
                // for this server before spawning the replacement.
                if let Some(previous) = self
                    .running
                    .remove(&(server_id.clone(), TaskKind::Rebuild))
                {
                    if !previous.is_finished() {
                        info!(%server_id, "cancelling superseded rebuild");
                        previous.abort();
                    }
                }

                let task = rebuild_task(
                    self.store.clone(),
                    self.archive.clone(),
                    self.thresholds.clone(),
                    server_id.clone(),
                    from,
                    to,
                );
                self.try_spawn(server_id, TaskKind::Rebuild, Some(respond_to), task);
            }

            SchedulerCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }
        true
    }

    /// Spawn a task under the per-(server, task-type) concurrency rule and
    /// the execution budget. `respond_to` is None for periodic invocations,
    /// whose failures are logged instead.
    fn try_spawn<T>(
        &mut self,
        server_id: String,
        kind: TaskKind,
        respond_to: Option<oneshot::Sender<EngineResult<T>>>,
        task: impl Future<Output = EngineResult<T>> + Send + 'static,
    ) where
        T: Send + std::fmt::Debug + 'static,
    {
        self.running.retain(|_, handle| !handle.is_finished());

        let key = (server_id.clone(), kind);
        if self.running.contains_key(&key) {
            debug!(%server_id, %kind, "task already running, trigger rejected");
            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(Err(EngineError::TaskBusy {
                    server_id,
                    task: kind.to_string(),
                }));
            }
            return;
        }

        let budget_secs = self.settings.task_budget_secs;
        let description = format!("{kind} {server_id}");

        let handle = tokio::spawn(async move {
            let outcome =
                match tokio::time::timeout(StdDuration::from_secs(budget_secs), task).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout {
                        task: description.clone(),
                        budget_secs,
                    }),
                };

            match &outcome {
                Ok(_) => debug!(task = %description, "task complete"),
                Err(EngineError::InsufficientData { needed, got }) => {
                    debug!(task = %description, needed, got, "task skipped");
                }
                Err(err) => error!(task = %description, %err, "task failed"),
            }

            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(outcome);
            }
        });

        self.running.insert(key, handle);
    }

    fn periodic_trends(&mut self) {
        let window_hours = self.settings.trend_window_hours;
        for server_id in self.known_servers.clone() {
            let task = trend_task(
                self.store.clone(),
                self.archive.clone(),
                self.thresholds.clone(),
                server_id.clone(),
                window_hours,
            );
            self.try_spawn::<TrendAnalysis>(server_id, TaskKind::Trend, None, task);
        }
    }

    fn periodic_aggregation(&mut self) {
        let now = Utc::now();
        if now.hour() != self.settings.aggregation_hour_utc {
            return;
        }

        let yesterday = now.date_naive() - TimeDelta::days(1);
        if self.last_aggregated == Some(yesterday) {
            return;
        }
        self.last_aggregated = Some(yesterday);

        info!(date = %yesterday, "running daily aggregation");
        for server_id in self.known_servers.clone() {
            let task = aggregation_task(
                self.store.clone(),
                self.archive.clone(),
                self.thresholds.clone(),
                server_id.clone(),
                yesterday,
            );
            self.try_spawn::<DailyAggregate>(server_id, TaskKind::Aggregation, None, task);
        }
    }

    fn periodic_baselines(&mut self) {
        let now = Utc::now();
        let due = self
            .last_baseline_at
            .is_none_or(|last| now - last >= TimeDelta::days(self.settings.baseline_interval_days as i64));
        if !due || self.known_servers.is_empty() {
            return;
        }
        self.last_baseline_at = Some(now);

        info!("recomputing baselines");
        let window_days = self.settings.baseline_window_days;
        for server_id in self.known_servers.clone() {
            let task = baseline_task(
                self.store.clone(),
                self.archive.clone(),
                server_id.clone(),
                window_days,
            );
            self.try_spawn::<Baseline>(server_id, TaskKind::Baseline, None, task);
        }
    }

    fn spawn_cleanup(&self) {
        let store = self.store.clone();
        let cutoff = Utc::now() - TimeDelta::days(self.retention_days as i64);

        tokio::spawn(async move {
            match store.cleanup_old_samples(cutoff).await {
                Ok(deleted) if deleted > 0 => {
                    info!(deleted, "retention cleanup removed old samples");
                }
                Ok(_) => {}
                Err(err) => error!(%err, "retention cleanup failed"),
            }
        });
    }
}

async fn load_samples(
    store: &Arc<dyn SampleStore>,
    server_id: &str,
    start: chrono::DateTime<Utc>,
    end: chrono::DateTime<Utc>,
) -> EngineResult<Vec<MetricSample>> {
    let rows = store
        .query_range(QueryRange {
            server_id: server_id.to_string(),
            start,
            end,
            limit: None,
        })
        .await?;

    Ok(rows.into_iter().map(SampleRow::into_sample).collect())
}

async fn aggregation_task(
    store: Arc<dyn SampleStore>,
    archive: Arc<AnalyticsArchive>,
    thresholds: ClassifierThresholds,
    server_id: String,
    date: NaiveDate,
) -> EngineResult<DailyAggregate> {
    let start = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| EngineError::Validation(format!("invalid aggregation date {date}")))?;
    let end = start + TimeDelta::days(1);

    let samples = load_samples(&store, &server_id, start, end).await?;
    let aggregate = compute_daily_aggregate(&thresholds, &server_id, date, &samples)?;
    archive.store_aggregate(aggregate.clone()).await;
    Ok(aggregate)
}

async fn baseline_task(
    store: Arc<dyn SampleStore>,
    archive: Arc<AnalyticsArchive>,
    server_id: String,
    window_days: i64,
) -> EngineResult<Baseline> {
    if window_days <= 0 {
        return Err(EngineError::Validation(
            "baseline window must be positive".to_string(),
        ));
    }
    let end = Utc::now();
    let start = end - TimeDelta::days(window_days);

    let samples = load_samples(&store, &server_id, start, end).await?;
    let baseline = compute_baseline(&server_id, start, end, &samples)?;
    archive.store_baseline(baseline.clone()).await;
    Ok(baseline)
}

async fn trend_task(
    store: Arc<dyn SampleStore>,
    archive: Arc<AnalyticsArchive>,
    thresholds: ClassifierThresholds,
    server_id: String,
    window_hours: i64,
) -> EngineResult<TrendAnalysis> {
    if window_hours <= 0 {
        return Err(EngineError::Validation(
            "trend window must be positive".to_string(),
        ));
    }
    let end = Utc::now();
    let start = end - TimeDelta::hours(window_hours);

    let samples = load_samples(&store, &server_id, start, end).await?;
    let analysis = analyze_trend(&thresholds, &server_id, start, end, &samples)?;
    archive.store_trend(analysis.clone()).await;
    Ok(analysis)
}

/// Rebuild a closed range of server-days. Reruns overwrite existing
/// aggregates; days without samples are counted as skipped, not failed.
async fn rebuild_task(
    store: Arc<dyn SampleStore>,
    archive: Arc<AnalyticsArchive>,
    thresholds: ClassifierThresholds,
    server_id: String,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<RebuildSummary> {
    if from > to {
        return Err(EngineError::Validation(format!(
            "rebuild range {from}..{to} is inverted"
        )));
    }

    let mut summary = RebuildSummary::default();
    let mut date = from;
    while date <= to {
        match aggregation_task(
            store.clone(),
            archive.clone(),
            thresholds.clone(),
            server_id.clone(),
            date,
        )
        .await
        {
            Ok(_) => summary.rebuilt += 1,
            Err(EngineError::InsufficientData { .. }) => summary.skipped += 1,
            Err(err) => return Err(err),
        }
        date = date + TimeDelta::days(1);
    }

    Ok(summary)
}

/// Handle for controlling the SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn spawn(
        store: Arc<dyn SampleStore>,
        archive: Arc<AnalyticsArchive>,
        thresholds: ClassifierThresholds,
        settings: SchedulerSettings,
        retention_days: u32,
        sample_rx: broadcast::Receiver<SampleEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(
            store,
            archive,
            thresholds,
            settings,
            retention_days,
            cmd_rx,
            sample_rx,
        );
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn run_aggregation(
        &self,
        server_id: String,
        date: NaiveDate,
    ) -> EngineResult<DailyAggregate> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RunAggregation {
                server_id,
                date,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::Shutdown)?;

        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    pub async fn run_baseline(
        &self,
        server_id: String,
        window_days: i64,
    ) -> EngineResult<Baseline> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RunBaseline {
                server_id,
                window_days,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::Shutdown)?;

        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    pub async fn run_trend(
        &self,
        server_id: String,
        window_hours: i64,
    ) -> EngineResult<TrendAnalysis> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RunTrend {
                server_id,
                window_hours,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::Shutdown)?;

        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Rebuild aggregates for an explicit date range. A newer rebuild for
    /// the same server cancels this one; the superseded caller observes a
    /// cancellation error.
    pub async fn rebuild(
        &self,
        server_id: String,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<RebuildSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Rebuild {
                server_id: server_id.clone(),
                from,
                to,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::Shutdown)?;

        rx.await.map_err(|_| EngineError::Cancelled {
            task: format!("rebuild {server_id}"),
        })?
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(SchedulerCommand::Shutdown).await;
    }
}
