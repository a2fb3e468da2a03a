//! App foreground/background transitions, permissions and cadence.

use crate::helpers::Harness;
use fieldtrack::LifecycleEvent;
use fieldtrack::TrackerEvent;
use fieldtrack::platform::PermissionStatus;
use fieldtrack::runtime::AttentionIssue;
use fieldtrack::service::ReconcileCause;
use fieldtrack::tracking::TrackingState;
use std::time::Duration;

fn attention_count(events: &[TrackerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TrackerEvent::AttentionRequired { .. }))
        .count()
}

#[tokio::test]
async fn background_keeps_one_sampler_at_coarse_cadence() {
    let h = Harness::new();
    h.enable().await;
    let options = h.sim.options().unwrap();
    assert_eq!(options.interval, Duration::from_secs(15));
    assert!(options.foreground_indicator);

    let state = h.service.on_lifecycle(LifecycleEvent::Background).await.unwrap();
    assert_eq!(state, TrackingState::Suspended);
    let options = h.sim.options().unwrap();
    assert_eq!(options.interval, Duration::from_secs(45));
    assert!(!options.foreground_indicator);

    h.advance(15);
    let state = h.service.on_lifecycle(LifecycleEvent::Foreground).await.unwrap();
    assert_eq!(state, TrackingState::Active);
    assert_eq!(h.sim.options().unwrap().interval, Duration::from_secs(15));
    assert_eq!(h.sim.start_count(), 1);
    assert_eq!(h.sim.stop_count(), 0);
}

#[tokio::test]
async fn foreground_switch_mid_sleep_is_not_a_kill() {
    let h = Harness::new();
    h.enable().await;

    for _ in 0..3 {
        h.service.on_lifecycle(LifecycleEvent::Background).await.unwrap();
        h.engine().sampling_tick().await;
        // Sampler now sleeps out the 45s background cadence.
        h.advance(20);
        let state = h.service.on_lifecycle(LifecycleEvent::Foreground).await.unwrap();
        assert_eq!(state, TrackingState::Active);
        h.advance(11);
        h.engine().watchdog_tick().await;
        assert_eq!(h.state().await, TrackingState::Active);
        h.advance(20);
    }

    let record = h.engine().recovery_record().await;
    assert_eq!(record.restart_attempts, 0);
    assert!(!record.exhausted);
    assert_eq!(h.sim.start_count(), 1);
    assert_eq!(h.sim.stop_count(), 0);
}

#[tokio::test]
async fn rapid_lifecycle_flapping_is_folded_into_next_tick() {
    let h = Harness::new();
    h.enable().await;
    assert_eq!(h.engine().generation().await, 1);

    let state = h.service.on_lifecycle(LifecycleEvent::Background).await.unwrap();
    assert_eq!(state, TrackingState::Suspended);
    for event in [
        LifecycleEvent::Foreground,
        LifecycleEvent::Background,
        LifecycleEvent::Foreground,
    ] {
        h.advance(2);
        let state = h.service.on_lifecycle(event).await.unwrap();
        assert_eq!(state, TrackingState::Suspended);
    }
    assert_eq!(h.engine().generation().await, 2);
    assert_eq!(h.sim.options().unwrap().interval, Duration::from_secs(45));

    h.advance(15);
    let state = h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    assert_eq!(state, TrackingState::Active);
    assert_eq!(h.engine().generation().await, 3);
    assert_eq!(h.sim.options().unwrap().interval, Duration::from_secs(15));
    assert_eq!(h.sim.start_count(), 1);
}

#[tokio::test]
async fn foreground_only_permission_stops_sampler_in_background() {
    let mut h = Harness::new();
    h.sim.set_permission(PermissionStatus::ForegroundOnly);
    assert_eq!(h.enable().await, TrackingState::Active);

    let state = h.service.on_lifecycle(LifecycleEvent::Background).await.unwrap();

    assert_eq!(state, TrackingState::Idle);
    assert!(h.drain_events().contains(&TrackerEvent::AttentionRequired {
        issue: AttentionIssue::PermissionDenied
    }));
}

#[tokio::test]
async fn attention_is_published_once_per_new_issue() {
    let mut h = Harness::new();
    h.sim.set_permission(PermissionStatus::Denied);
    assert_eq!(h.enable().await, TrackingState::Idle);
    h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    assert_eq!(attention_count(&h.drain_events()), 1);

    h.sim.set_permission(PermissionStatus::Granted);
    let state = h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    assert_eq!(state, TrackingState::Active);

    h.sim.set_permission(PermissionStatus::Denied);
    let state = h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    assert_eq!(state, TrackingState::Idle);
    assert_eq!(attention_count(&h.drain_events()), 1);
}

#[tokio::test]
async fn disabled_location_services_request_attention() {
    let mut h = Harness::new();
    h.sim.set_services_enabled(false);
    assert_eq!(h.enable().await, TrackingState::Idle);
    assert!(h.drain_events().contains(&TrackerEvent::AttentionRequired {
        issue: AttentionIssue::ServiceDisabled
    }));
}

#[tokio::test]
async fn low_battery_slows_foreground_cadence() {
    let h = Harness::new();
    h.enable().await;
    h.sim.set_battery(Some(15));

    h.engine().sampling_tick().await;
    assert_eq!(h.engine().sampling_interval().await, Duration::from_secs(45));
    h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    assert_eq!(h.sim.options().unwrap().interval, Duration::from_secs(45));

    h.sim.set_battery(Some(80));
    h.advance(45);
    h.engine().sampling_tick().await;
    assert_eq!(h.engine().sampling_interval().await, Duration::from_secs(15));
}

#[tokio::test]
async fn service_start_and_stop_are_idempotent() {
    let h = Harness::new();
    h.service.start().await.unwrap();
    h.service.start().await.unwrap();
    assert!(h.service.is_tracking_active().await);

    h.service.stop().await.unwrap();
    h.service.stop().await.unwrap();
    assert!(!h.service.is_tracking_active().await);
    assert_eq!(h.sim.start_count(), 1);
    assert_eq!(h.sim.stop_count(), 1);
}
