//! SQLite persistence: samples survive an engine restart

use std::sync::Arc;

use chrono::{Duration, Utc};
use fleetmon::config::Config;
use fleetmon::engine::MonitorEngine;
use fleetmon::storage::sqlite::SqliteStore;
use pretty_assertions::assert_eq;

use crate::helpers::sample_at;

#[tokio::test]
async fn samples_survive_engine_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("fleet.db");
    let now = Utc::now();

    // First engine lifetime: ingest a trend window worth of samples
    {
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        let engine = MonitorEngine::with_store(Config::default(), store).unwrap();

        for i in 0..24i64 {
            engine
                .push_sample(sample_at("web-01", now - Duration::hours(23 - i), 40.0))
                .await
                .unwrap();
        }

        engine.shutdown().await.unwrap();
    }

    // Second lifetime over the same file: analytics see the old samples
    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let engine = MonitorEngine::with_store(Config::default(), store).unwrap();

    let trend = engine.run_trend("web-01", 24).await.unwrap();
    assert_eq!(trend.sample_count, 24);

    engine.shutdown().await.unwrap();
}
