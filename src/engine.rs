//! Engine facade - wires the actors together behind one API
//!
//! [`MonitorEngine`] is what embedders and the hub binary talk to:
//! `push_sample` feeds the pipeline, `on_status_change`/`on_alert_event`
//! hand out broadcast subscriptions (the Rust shape of the callback
//! interfaces), and the `run_*`/`override_*` methods delegate to the
//! scheduler and health actors.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::MetricSample;
use crate::actors::alert::AlertHandle;
use crate::actors::health::HealthHandle;
use crate::actors::messages::{HealthSnapshot, RebuildSummary, SampleEvent, StatusChangeEvent};
use crate::actors::scheduler::SchedulerHandle;
use crate::alerts::condition::AlertConditionConfig;
use crate::alerts::evaluator::{AlertEvent, AlertInstance};
use crate::analytics::{AnalyticsArchive, Baseline, DailyAggregate, TrendAnalysis};
use crate::config::{Config, StorageConfig};
use crate::error::{EngineError, EngineResult};
use crate::status::classifier::ServerStatus;
use crate::storage::memory::MemoryStore;
use crate::storage::{SampleRow, SampleStore};

/// Broadcast capacity for sample/status/alert channels. Slow subscribers
/// lag rather than block the ingest path.
const CHANNEL_CAPACITY: usize = 256;

pub struct MonitorEngine {
    sample_tx: broadcast::Sender<SampleEvent>,
    status_tx: broadcast::Sender<StatusChangeEvent>,
    alert_tx: broadcast::Sender<AlertEvent>,

    health: HealthHandle,
    alerts: AlertHandle,
    scheduler: SchedulerHandle,

    store: Arc<dyn SampleStore>,
    archive: Arc<AnalyticsArchive>,
}

impl MonitorEngine {
    /// Build the engine from a validated config, constructing the sample
    /// store the config asks for.
    pub async fn new(config: Config) -> EngineResult<Self> {
        let store: Arc<dyn SampleStore> = match &config.storage {
            StorageConfig::Memory => Arc::new(MemoryStore::new()),
            #[cfg(feature = "storage-sqlite")]
            StorageConfig::Sqlite { path, .. } => {
                Arc::new(crate::storage::sqlite::SqliteStore::new(path).await?)
            }
        };

        Self::with_store(config, store)
    }

    /// Build the engine around an externally-provided store (tests, custom
    /// backends).
    pub fn with_store(config: Config, store: Arc<dyn SampleStore>) -> EngineResult<Self> {
        config.validate()?;

        let (sample_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (alert_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        let archive = Arc::new(AnalyticsArchive::new());

        let health = HealthHandle::spawn(
            config.thresholds.clone(),
            config.hysteresis.clone(),
            sample_tx.subscribe(),
            status_tx.clone(),
        );

        let alerts = AlertHandle::spawn(
            config.conditions.clone(),
            sample_tx.subscribe(),
            alert_tx.clone(),
        );

        let scheduler = SchedulerHandle::spawn(
            store.clone(),
            archive.clone(),
            config.thresholds.clone(),
            config.scheduler.clone(),
            config.storage.retention_days(),
            sample_tx.subscribe(),
        );

        debug!("monitor engine started");

        Ok(Self {
            sample_tx,
            status_tx,
            alert_tx,
            health,
            alerts,
            scheduler,
            store,
            archive,
        })
    }

    /// Ingest one sample: persist it and fan it out to the health, alert
    /// and scheduler actors. Classification happens inline on the actor,
    /// off this call path.
    pub async fn push_sample(&self, sample: MetricSample) -> EngineResult<()> {
        if sample.server_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "sample requires a server id".to_string(),
            ));
        }

        self.store
            .insert_batch(vec![SampleRow::from_sample(&sample)])
            .await?;

        // Nobody subscribed is fine; the engine's own actors subscribe at
        // spawn time.
        let _ = self.sample_tx.send(SampleEvent {
            sample,
            received_at: Utc::now(),
        });

        Ok(())
    }

    /// Subscribe to accepted status transitions.
    pub fn on_status_change(&self) -> broadcast::Receiver<StatusChangeEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to alert lifecycle events (fired/escalated/resolved/
    /// suppressed).
    pub fn on_alert_event(&self) -> broadcast::Receiver<AlertEvent> {
        self.alert_tx.subscribe()
    }

    pub async fn health_state(&self, server_id: &str) -> Option<HealthSnapshot> {
        self.health.get_state(server_id.to_string()).await
    }

    pub async fn active_alerts(&self) -> Vec<AlertInstance> {
        self.alerts.get_active().await
    }

    /// Swap the alert condition set; rejected wholesale if any entry fails
    /// validation.
    pub async fn replace_conditions(
        &self,
        conditions: Vec<AlertConditionConfig>,
    ) -> EngineResult<()> {
        self.alerts.replace_conditions(conditions).await
    }

    /// Pin a server's status administratively.
    pub async fn override_status(
        &self,
        server_id: &str,
        status: ServerStatus,
        reason: &str,
        duration: Option<Duration>,
    ) -> EngineResult<()> {
        self.health
            .override_status(
                server_id.to_string(),
                status,
                reason.to_string(),
                duration,
            )
            .await
    }

    pub async fn revert_override(&self, server_id: &str) -> EngineResult<()> {
        self.health.revert_override(server_id.to_string()).await
    }

    pub async fn run_aggregation(
        &self,
        server_id: &str,
        date: NaiveDate,
    ) -> EngineResult<DailyAggregate> {
        self.scheduler
            .run_aggregation(server_id.to_string(), date)
            .await
    }

    pub async fn run_baseline(&self, server_id: &str, window_days: i64) -> EngineResult<Baseline> {
        self.scheduler
            .run_baseline(server_id.to_string(), window_days)
            .await
    }

    pub async fn run_trend(&self, server_id: &str, window_hours: i64) -> EngineResult<TrendAnalysis> {
        self.scheduler
            .run_trend(server_id.to_string(), window_hours)
            .await
    }

    /// Rebuild daily aggregates over an explicit date range (idempotent).
    pub async fn rebuild_aggregates(
        &self,
        server_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<RebuildSummary> {
        self.scheduler.rebuild(server_id.to_string(), from, to).await
    }

    /// The latest archived analytics records.
    pub fn archive(&self) -> &Arc<AnalyticsArchive> {
        &self.archive
    }

    /// Graceful shutdown: stop the actors, then close the store.
    pub async fn shutdown(self) -> EngineResult<()> {
        self.health.shutdown().await;
        self.alerts.shutdown().await;
        self.scheduler.shutdown().await;
        self.store.close().await?;
        Ok(())
    }
}
