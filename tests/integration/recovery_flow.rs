//! OS kills of the sampling task and bounded restarts.

use crate::helpers::{Harness, monday};
use fieldtrack::TrackerEvent;
use fieldtrack::LifecycleEvent;
use fieldtrack::platform::LocationProvider;
use fieldtrack::service::ReconcileCause;
use fieldtrack::tracking::TrackingState;

#[tokio::test]
async fn killed_sampler_is_restarted() {
    let h = Harness::new();
    h.enable().await;
    h.sim.kill();

    h.engine().watchdog_tick().await;

    assert_eq!(h.state().await, TrackingState::Active);
    assert!(h.sim.is_running());
    assert_eq!(h.sim.start_count(), 2);
    assert_eq!(h.engine().recovery_record().await.restart_attempts, 1);
}

#[tokio::test]
async fn silent_sampler_counts_as_dead_and_record_clears_after_survival() {
    let h = Harness::new();
    h.enable().await;
    h.engine().sampling_tick().await;

    // Two full intervals without a fix.
    h.advance(31);
    h.engine().watchdog_tick().await;
    assert_eq!(h.state().await, TrackingState::Active);
    assert_eq!(h.engine().recovery_record().await.restart_attempts, 1);

    h.engine().sampling_tick().await;
    h.advance(15);
    h.engine().watchdog_tick().await;
    assert!(h.engine().recovery_record().await.is_clear());
}

#[tokio::test]
async fn third_kill_exhausts_recovery_until_foreground() {
    let mut h = Harness::new();
    h.enable().await;

    h.sim.kill();
    h.engine().watchdog_tick().await;
    assert_eq!(h.state().await, TrackingState::Active);

    // Second kill lands inside the restart backoff.
    h.sim.kill();
    h.engine().watchdog_tick().await;
    assert_eq!(h.state().await, TrackingState::Recovering);
    h.advance(60);
    h.engine().watchdog_tick().await;
    assert_eq!(h.state().await, TrackingState::Active);

    h.sim.kill();
    h.engine().watchdog_tick().await;
    assert_eq!(h.state().await, TrackingState::Idle);
    assert!(h.engine().recovery_record().await.exhausted);
    assert!(
        h.drain_events()
            .contains(&TrackerEvent::RecoveryExhausted { attempts: 3 })
    );

    // A plain tick does not re-arm.
    let state = h.engine().reconcile(ReconcileCause::Tick).await.unwrap();
    assert_eq!(state, TrackingState::Idle);

    let state = h.service.on_lifecycle(LifecycleEvent::Foreground).await.unwrap();
    assert_eq!(state, TrackingState::Active);
    let record = h.engine().recovery_record().await;
    assert_eq!(record.restart_attempts, 0);
    assert!(!record.exhausted);
}

#[tokio::test]
async fn dead_sampler_outside_window_is_stood_down() {
    let h = Harness::at(monday(16, 59));
    h.enable().await;
    h.sim.kill();
    h.clock.set_local(monday(17, 1));

    h.engine().watchdog_tick().await;

    assert_eq!(h.state().await, TrackingState::Idle);
    assert!(h.engine().recovery_record().await.is_clear());
    assert!(!h.sim.is_running());
}
