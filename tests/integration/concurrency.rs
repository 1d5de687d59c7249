//! Concurrency rules: per-server independence and per-(server, task)
//! execution limits

use chrono::{NaiveDate, TimeDelta};
use fleetmon::error::EngineError;
use futures::future::join_all;
use pretty_assertions::assert_eq;

use crate::helpers::{engine, sample_at, settle};

#[tokio::test]
async fn many_servers_ingest_concurrently() {
    let engine = engine();
    let now = chrono::Utc::now();

    for i in 0..20 {
        let server_id = format!("node-{i:02}");
        let cpu = if i % 2 == 0 { 20.0 } else { 92.0 };
        engine
            .push_sample(sample_at(&server_id, now, cpu))
            .await
            .unwrap();
    }
    settle().await;

    for i in 0..20 {
        let server_id = format!("node-{i:02}");
        let state = engine.health_state(&server_id).await.unwrap();
        let expected = if i % 2 == 0 {
            fleetmon::status::classifier::ServerStatus::Healthy
        } else {
            fleetmon::status::classifier::ServerStatus::Critical
        };
        assert_eq!(state.status, expected, "server {server_id}");
    }

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn same_pair_triggers_never_run_concurrently() {
    let engine = engine();
    let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
    let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();

    for minute in 0..600 {
        engine
            .push_sample(sample_at(
                "web-01",
                start + TimeDelta::minutes(minute),
                40.0,
            ))
            .await
            .unwrap();
    }

    // Fire several aggregation triggers for the same (server, day) at once.
    // The scheduler must run at most one; the others either complete later
    // (the first finished already) or are rejected as busy - never both
    // running at the same time.
    let triggers = (0..4).map(|_| engine.run_aggregation("web-01", date));
    let results = join_all(triggers).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert!(succeeded >= 1, "at least one trigger must complete");

    for result in &results {
        if let Err(err) = result {
            assert!(
                matches!(err, EngineError::TaskBusy { .. }),
                "unexpected error: {err}"
            );
        }
    }

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn different_task_types_for_one_server_may_overlap() {
    let engine = engine();
    let now = chrono::Utc::now();

    for i in 0..200 {
        engine
            .push_sample(sample_at("web-01", now - TimeDelta::minutes(i * 5), 40.0))
            .await
            .unwrap();
    }

    // Trend and baseline are different task types: both must complete.
    let (trend, baseline) = tokio::join!(
        engine.run_trend("web-01", 24),
        engine.run_baseline("web-01", 30),
    );

    assert!(trend.is_ok());
    assert!(baseline.is_ok());

    engine.shutdown().await.unwrap();
}
