//! End-to-end alert pipeline: ingest -> condition evaluation -> events
//!
//! The evaluator works on sample timestamps, so these tests replay
//! synthetic timelines instead of sleeping.

use chrono::{Duration, Utc};
use fleetmon::alerts::condition::Severity;
use fleetmon::alerts::evaluator::{AlertEventKind, AlertLifecycle};
use pretty_assertions::assert_eq;

use crate::helpers::{anti_spam, cpu_condition, engine_with_conditions, sample_at, settle};

#[tokio::test]
async fn cooldown_produces_exactly_one_firing() {
    let engine =
        engine_with_conditions(vec![cpu_condition("cpu-high", None, anti_spam(30, true))]);
    let mut alert_rx = engine.on_alert_event();

    // Two breaches five minutes apart with a 30-minute cooldown
    let t0 = Utc::now() - Duration::minutes(10);
    engine
        .push_sample(sample_at("web-01", t0, 85.0))
        .await
        .unwrap();
    engine
        .push_sample(sample_at("web-01", t0 + Duration::minutes(5), 85.0))
        .await
        .unwrap();
    settle().await;

    let event = alert_rx.try_recv().unwrap();
    assert_eq!(event.kind, AlertEventKind::Fired);
    assert_eq!(event.instance.severity, Severity::Warning);
    assert!(alert_rx.try_recv().is_err(), "second breach must not fire");

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn recurrence_escalates_on_the_third_occurrence() {
    let engine =
        engine_with_conditions(vec![cpu_condition("cpu-high", None, anti_spam(0, true))]);
    let mut alert_rx = engine.on_alert_event();

    let t0 = Utc::now() - Duration::minutes(50);

    // Three breach episodes within the hour, separated by recoveries
    for (i, minutes) in [0i64, 10, 20].iter().enumerate() {
        engine
            .push_sample(sample_at("web-01", t0 + Duration::minutes(*minutes), 85.0))
            .await
            .unwrap();
        // Recover between episodes (but not after the last)
        if i < 2 {
            engine
                .push_sample(sample_at(
                    "web-01",
                    t0 + Duration::minutes(minutes + 2),
                    50.0,
                ))
                .await
                .unwrap();
        }
    }
    settle().await;

    let mut kinds = Vec::new();
    while let Ok(event) = alert_rx.try_recv() {
        kinds.push((event.kind, event.instance.state));
    }

    // fired, resolved, fired, resolved, fired, escalated
    let escalations: Vec<_> = kinds
        .iter()
        .filter(|(k, _)| *k == AlertEventKind::Escalated)
        .collect();
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].1, AlertLifecycle::Recurring);

    let fires = kinds
        .iter()
        .filter(|(k, _)| *k == AlertEventKind::Fired)
        .count();
    assert_eq!(fires, 3);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn hourly_cap_suppresses_further_fires() {
    // stateless + zero cooldown: every breach evaluation may fire, the
    // hourly cap is the only brake
    let engine =
        engine_with_conditions(vec![cpu_condition("cpu-high", None, anti_spam(0, false))]);
    let mut alert_rx = engine.on_alert_event();

    let t0 = Utc::now() - Duration::minutes(30);
    for i in 0..7 {
        engine
            .push_sample(sample_at("web-01", t0 + Duration::minutes(i), 95.0))
            .await
            .unwrap();
    }
    settle().await;

    let mut fired = 0;
    let mut suppressed = 0;
    while let Ok(event) = alert_rx.try_recv() {
        match event.kind {
            AlertEventKind::Fired => fired += 1,
            AlertEventKind::Suppressed => suppressed += 1,
            _ => {}
        }
    }

    assert_eq!(fired, 5, "max_per_hour caps fires");
    assert_eq!(suppressed, 2);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn server_specific_condition_shadows_global() {
    // Global fires above 80; the web-01 specific one only above 95
    let mut specific = cpu_condition("web01-cpu", Some("web-01"), anti_spam(0, true));
    specific.thresholds.warning.value = 95.0;
    specific.thresholds.critical.value = 98.0;

    let engine = engine_with_conditions(vec![
        cpu_condition("global-cpu", None, anti_spam(0, true)),
        specific,
    ]);
    let mut alert_rx = engine.on_alert_event();

    let now = Utc::now();

    // 85% breaches the global threshold but not web-01's own condition
    engine
        .push_sample(sample_at("web-01", now, 85.0))
        .await
        .unwrap();
    // Another server still uses the global condition
    engine
        .push_sample(sample_at("db-01", now, 85.0))
        .await
        .unwrap();
    settle().await;

    let mut events = Vec::new();
    while let Ok(event) = alert_rx.try_recv() {
        events.push(event);
    }

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].instance.server_id, "db-01");
    assert_eq!(events[0].instance.condition_id, "global-cpu");

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn resolved_alert_clears_the_active_set() {
    let engine =
        engine_with_conditions(vec![cpu_condition("cpu-high", None, anti_spam(0, true))]);

    let t0 = Utc::now() - Duration::minutes(5);
    engine
        .push_sample(sample_at("web-01", t0, 95.0))
        .await
        .unwrap();
    settle().await;
    assert_eq!(engine.active_alerts().await.len(), 1);

    engine
        .push_sample(sample_at("web-01", t0 + Duration::minutes(1), 50.0))
        .await
        .unwrap();
    settle().await;
    assert!(engine.active_alerts().await.is_empty());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn replacing_conditions_takes_effect() {
    let engine =
        engine_with_conditions(vec![cpu_condition("cpu-high", None, anti_spam(0, true))]);
    let mut alert_rx = engine.on_alert_event();

    // Raise the bar so 85% no longer breaches
    let mut relaxed = cpu_condition("cpu-high", None, anti_spam(0, true));
    relaxed.thresholds.warning.value = 95.0;
    relaxed.thresholds.critical.value = 99.0;
    engine.replace_conditions(vec![relaxed]).await.unwrap();

    engine
        .push_sample(sample_at("web-01", Utc::now(), 85.0))
        .await
        .unwrap();
    settle().await;

    assert!(alert_rx.try_recv().is_err());

    engine.shutdown().await.unwrap();
}
