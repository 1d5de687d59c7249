//! Analytics record archive
//!
//! Holds the latest analytics records in memory: daily aggregates keyed by
//! (server, date), plus the most recent baseline and trend analysis per
//! server. Writes overwrite - rerunning a rebuild for the same key replaces
//! the record instead of appending, which is what makes manual rebuild
//! triggers idempotent. Baselines and trends are superseded wholesale.

use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::aggregate::DailyAggregate;
use super::baseline::Baseline;
use super::trend::TrendAnalysis;

#[derive(Debug, Default)]
pub struct AnalyticsArchive {
    aggregates: RwLock<HashMap<(String, NaiveDate), DailyAggregate>>,
    baselines: RwLock<HashMap<String, Baseline>>,
    trends: RwLock<HashMap<String, TrendAnalysis>>,
}

impl AnalyticsArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store_aggregate(&self, aggregate: DailyAggregate) {
        let key = (aggregate.server_id.clone(), aggregate.date);
        self.aggregates.write().await.insert(key, aggregate);
    }

    pub async fn aggregate(&self, server_id: &str, date: NaiveDate) -> Option<DailyAggregate> {
        self.aggregates
            .read()
            .await
            .get(&(server_id.to_string(), date))
            .cloned()
    }

    pub async fn store_baseline(&self, baseline: Baseline) {
        self.baselines
            .write()
            .await
            .insert(baseline.server_id.clone(), baseline);
    }

    pub async fn latest_baseline(&self, server_id: &str) -> Option<Baseline> {
        self.baselines.read().await.get(server_id).cloned()
    }

    pub async fn store_trend(&self, trend: TrendAnalysis) {
        self.trends
            .write()
            .await
            .insert(trend.server_id.clone(), trend);
    }

    pub async fn latest_trend(&self, server_id: &str) -> Option<TrendAnalysis> {
        self.trends.read().await.get(server_id).cloned()
    }
}
