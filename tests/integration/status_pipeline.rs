//! End-to-end status pipeline: ingest -> classifier -> hysteresis -> events

use chrono::{Duration, Utc};
use fleetmon::status::classifier::ServerStatus;
use pretty_assertions::assert_eq;

use crate::helpers::{engine, sample_at, sample_now, settle};

#[tokio::test]
async fn saturated_sample_goes_danger_immediately() {
    let engine = engine();
    let mut status_rx = engine.on_status_change();

    let mut sample = sample_now("web-01", 96.0);
    sample.mem_pct = 96.0;
    sample.disk_pct = 96.0;
    engine.push_sample(sample).await.unwrap();

    let event = status_rx.recv().await.unwrap();
    assert_eq!(event.old_status, ServerStatus::Healthy);
    assert_eq!(event.new_status, ServerStatus::Danger);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn all_normal_sample_stays_healthy() {
    let engine = engine();
    let mut status_rx = engine.on_status_change();

    engine.push_sample(sample_now("web-01", 25.0)).await.unwrap();
    settle().await;

    assert!(status_rx.try_recv().is_err());
    let state = engine.health_state("web-01").await.unwrap();
    assert_eq!(state.status, ServerStatus::Healthy);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn upgrade_applies_on_the_very_next_sample() {
    let engine = engine();
    let mut status_rx = engine.on_status_change();

    engine.push_sample(sample_now("web-01", 20.0)).await.unwrap();
    engine.push_sample(sample_now("web-01", 92.0)).await.unwrap();

    let event = status_rx.recv().await.unwrap();
    assert_eq!(event.new_status, ServerStatus::Critical);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn downgrade_is_blocked_inside_the_minimum_delay() {
    let engine = engine();

    engine.push_sample(sample_now("web-01", 92.0)).await.unwrap();
    settle().await;

    // Three healthy samples arriving right away: agreement exists but the
    // per-status delay has not elapsed, so CRITICAL must hold.
    for _ in 0..3 {
        engine.push_sample(sample_now("web-01", 20.0)).await.unwrap();
    }
    settle().await;

    let state = engine.health_state("web-01").await.unwrap();
    assert_eq!(state.status, ServerStatus::Critical);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn hard_stale_sample_forces_offline() {
    let engine = engine();
    let mut status_rx = engine.on_status_change();

    let stale = sample_at("web-01", Utc::now() - Duration::minutes(16), 20.0);
    engine.push_sample(stale).await.unwrap();

    let event = status_rx.recv().await.unwrap();
    assert_eq!(event.new_status, ServerStatus::Offline);
    assert_eq!(event.confidence, 100.0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn soft_stale_sample_forces_warning_with_stale_reason() {
    let engine = engine();
    let mut status_rx = engine.on_status_change();

    let stale = sample_at("web-01", Utc::now() - Duration::minutes(10), 20.0);
    engine.push_sample(stale).await.unwrap();

    let event = status_rx.recv().await.unwrap();
    assert_eq!(event.new_status, ServerStatus::Warning);
    assert!(event.reason.starts_with("stale_soft"), "reason: {}", event.reason);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn maintenance_override_pins_the_server() {
    let engine = engine();

    engine.push_sample(sample_now("web-01", 20.0)).await.unwrap();
    settle().await;

    engine
        .override_status("web-01", ServerStatus::Maintenance, "kernel upgrade", None)
        .await
        .unwrap();

    // A danger-level sample cannot move a pinned server
    let mut sample = sample_now("web-01", 99.0);
    sample.mem_pct = 99.0;
    engine.push_sample(sample).await.unwrap();
    settle().await;

    let state = engine.health_state("web-01").await.unwrap();
    assert_eq!(state.status, ServerStatus::Maintenance);
    assert!(state.override_active);

    // After revert, the next sample re-classifies immediately
    engine.revert_override("web-01").await.unwrap();
    let mut sample = sample_now("web-01", 99.0);
    sample.mem_pct = 99.0;
    engine.push_sample(sample).await.unwrap();
    settle().await;

    let state = engine.health_state("web-01").await.unwrap();
    assert_eq!(state.status, ServerStatus::Danger);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn servers_transition_independently() {
    let engine = engine();

    engine.push_sample(sample_now("web-01", 92.0)).await.unwrap();
    engine.push_sample(sample_now("db-01", 20.0)).await.unwrap();
    settle().await;

    assert_eq!(
        engine.health_state("web-01").await.unwrap().status,
        ServerStatus::Critical
    );
    assert_eq!(
        engine.health_state("db-01").await.unwrap().status,
        ServerStatus::Healthy
    );

    engine.shutdown().await.unwrap();
}
