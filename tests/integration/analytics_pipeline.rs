//! End-to-end analytics: seed the store through ingest, run the pipeline

use chrono::{Duration, NaiveDate, TimeDelta, Utc};
use fleetmon::Parameter;
use fleetmon::error::EngineError;
use pretty_assertions::assert_eq;

use crate::helpers::{engine, sample_at};

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
}

#[tokio::test]
async fn daily_aggregate_matches_reference_p95() {
    let engine = engine();
    let start = date().and_hms_opt(0, 0, 0).unwrap().and_utc();

    // A full synthetic day: 1440 one-minute samples, cpu = minute / 24
    for minute in 0..1440 {
        engine
            .push_sample(sample_at(
                "web-01",
                start + TimeDelta::minutes(minute),
                minute as f64 / 24.0,
            ))
            .await
            .unwrap();
    }

    let aggregate = engine.run_aggregation("web-01", date()).await.unwrap();

    let cpu = aggregate.stats_for(Parameter::Cpu).unwrap();
    // nearest-rank reference: sorted[floor(1440 * 0.95)] = 1368 / 24
    assert!((cpu.p95 - 57.0).abs() < 1e-9);
    assert_eq!(aggregate.sample_count, 1440);
    assert!((aggregate.uptime_pct - 100.0).abs() < 1e-9);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn aggregation_without_samples_is_a_clean_skip() {
    let engine = engine();

    let result = engine.run_aggregation("web-01", date()).await;
    assert!(matches!(result, Err(EngineError::InsufficientData { .. })));
    assert!(engine.archive().aggregate("web-01", date()).await.is_none());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn constant_baseline_collapses_to_the_value() {
    let engine = engine();
    let now = Utc::now();

    for i in 0..150 {
        let mut sample = sample_at("web-01", now - Duration::minutes(i * 10), 42.0);
        sample.mem_pct = 42.0;
        sample.disk_pct = 42.0;
        sample.network.latency_ms = 42.0;
        sample.network.download_mbps = 42.0;
        engine.push_sample(sample).await.unwrap();
    }

    let baseline = engine.run_baseline("web-01", 30).await.unwrap();

    for parameter in Parameter::ANALYZED {
        let b = baseline.parameter(parameter).unwrap();
        assert_eq!(b.mean, 42.0);
        assert_eq!(b.median, 42.0);
        assert_eq!(b.std, 0.0);
        assert_eq!(b.percentiles.p5, 42.0);
        assert_eq!(b.percentiles.p99, 42.0);
        assert_eq!(b.confidence_interval_95, (42.0, 42.0));
    }

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn baseline_guard_requires_one_hundred_samples() {
    let engine = engine();
    let now = Utc::now();

    for i in 0..99 {
        engine
            .push_sample(sample_at("web-01", now - Duration::minutes(i), 42.0))
            .await
            .unwrap();
    }

    let result = engine.run_baseline("web-01", 30).await;
    assert!(matches!(
        result,
        Err(EngineError::InsufficientData { needed: 100, .. })
    ));
    assert!(engine.archive().latest_baseline("web-01").await.is_none());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn linear_series_yields_analytic_slope_and_full_confidence() {
    let engine = engine();
    let now = Utc::now();

    // 24 hourly samples rising exactly 1.5 cpu points per hour
    for h in 0..24i64 {
        let age_hours = 23 - h;
        engine
            .push_sample(sample_at(
                "web-01",
                now - Duration::hours(age_hours),
                10.0 + 1.5 * h as f64,
            ))
            .await
            .unwrap();
    }

    let trend = engine.run_trend("web-01", 24).await.unwrap();
    let cpu = trend.parameter(Parameter::Cpu).unwrap();

    assert!((cpu.slope_per_hour - 1.5).abs() < 1e-9);
    assert!((cpu.confidence - 100.0).abs() < 1e-9);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn rebuild_is_idempotent_and_overwrites() {
    let engine = engine();
    let start = date().and_hms_opt(0, 0, 0).unwrap().and_utc();

    for minute in 0..120 {
        engine
            .push_sample(sample_at(
                "web-01",
                start + TimeDelta::minutes(minute),
                35.0,
            ))
            .await
            .unwrap();
    }

    let first = engine
        .rebuild_aggregates("web-01", date(), date())
        .await
        .unwrap();
    assert_eq!(first.rebuilt, 1);

    let second = engine
        .rebuild_aggregates("web-01", date(), date())
        .await
        .unwrap();
    assert_eq!(second.rebuilt, 1);

    let stored = engine.archive().aggregate("web-01", date()).await.unwrap();
    assert_eq!(stored.sample_count, 120);

    engine.shutdown().await.unwrap();
}
