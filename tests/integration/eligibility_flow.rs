//! Eligibility decisions as seen through the running engine.

use crate::helpers::{Harness, monday};
use chrono::NaiveDate;
use fieldtrack::config::{FailMode, TrackerConfig};
use fieldtrack::platform::LocationProvider;
use fieldtrack::policy::{Eligibility, Policy};
use fieldtrack::service::ReconcileCause;
use fieldtrack::tracking::TrackingState;

#[tokio::test]
async fn window_end_stops_sampler_on_the_minute() {
    let h = Harness::at(monday(16, 59));
    assert_eq!(h.enable().await, TrackingState::Active);

    h.clock.set_local(monday(17, 0));
    let state = h.engine().reconcile(ReconcileCause::Tick).await.unwrap();

    assert_eq!(state, TrackingState::Idle);
    assert_eq!(h.sim.stop_count(), 1);
    assert!(!h.sim.is_running());
    let status = h.service.status().await;
    assert_eq!(status.eligibility, Some(Eligibility::OutsideWindow));
}

#[tokio::test]
async fn before_window_opens_nothing_starts() {
    let h = Harness::at(monday(8, 59));
    assert_eq!(h.enable().await, TrackingState::Idle);
    assert_eq!(h.sim.start_count(), 0);

    h.clock.set_local(monday(9, 0));
    let state = h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    assert_eq!(state, TrackingState::Active);
}

#[tokio::test]
async fn refreshed_policy_revoking_role_stops_tracking() {
    let h = Harness::new();
    assert_eq!(h.enable().await, TrackingState::Active);

    h.policy.set_policy(Policy::for_roles(["admin"]));
    let state = h.engine().policy_refresh_tick().await.unwrap();

    assert_eq!(state, TrackingState::Idle);
    assert_eq!(
        h.service.status().await.eligibility,
        Some(Eligibility::RoleNotAuthorized)
    );
}

#[tokio::test]
async fn sign_out_stops_tracking() {
    let h = Harness::new();
    h.enable().await;
    h.identity.set(None);

    let state = h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    assert_eq!(state, TrackingState::Idle);
    assert_eq!(
        h.service.status().await.eligibility,
        Some(Eligibility::NoIdentity)
    );
}

#[tokio::test]
async fn holiday_keeps_tracker_idle() {
    let h = Harness::new();
    h.policy.set_policy(
        Policy::default().with_holiday(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()),
    );
    assert_eq!(h.enable().await, TrackingState::Idle);
    assert_eq!(
        h.service.status().await.eligibility,
        Some(Eligibility::Holiday)
    );
}

#[tokio::test]
async fn unreachable_policy_fails_open_by_default() {
    let h = Harness::new();
    h.policy.set_failing(true);

    assert_eq!(h.enable().await, TrackingState::Active);
    assert_eq!(
        h.service.status().await.eligibility,
        Some(Eligibility::FailedOpen)
    );
}

#[tokio::test]
async fn unreachable_policy_fails_closed_when_configured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = TrackerConfig::default();
    config.policy.fail_mode = FailMode::Closed;
    let h = Harness::build(dir, monday(10, 0), config);
    h.policy.set_failing(true);

    assert_eq!(h.enable().await, TrackingState::Idle);
    assert_eq!(
        h.service.status().await.eligibility,
        Some(Eligibility::FailedClosed)
    );
}
