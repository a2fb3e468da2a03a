//! State carried across a process restart.

use crate::helpers::Harness;
use fieldtrack::LifecycleEvent;
use fieldtrack::platform::{LocationProvider, SimulatedLocationProvider};
use fieldtrack::tracking::TrackingState;
use std::sync::Arc;

#[tokio::test]
async fn resumed_active_state_is_recovered_by_watchdog() {
    let h = Harness::new();
    h.enable().await;
    h.service.on_lifecycle(LifecycleEvent::Terminating).await.unwrap();

    let sim = Arc::new(SimulatedLocationProvider::new(h.clock.clone(), 17.0, 78.0));
    let resumed = h.reopen(&sim);
    assert_eq!(resumed.state().await, TrackingState::Active);
    assert_eq!(resumed.engine().generation().await, 1);

    resumed.engine().set_enabled(true).await;
    resumed.engine().watchdog_tick().await;

    assert_eq!(resumed.state().await, TrackingState::Active);
    assert_eq!(resumed.engine().generation().await, 3);
    assert!(sim.is_running());
    assert_eq!(resumed.engine().recovery_record().await.restart_attempts, 1);
}

#[tokio::test]
async fn offline_queue_survives_restart() {
    let h = Harness::new();
    h.sim.script([(1.0, 1.0), (2.0, 2.0)]);
    h.writer.set_offline(true);
    h.enable().await;
    h.engine().sampling_tick().await;
    h.advance(15);
    h.engine().sampling_tick().await;

    let sim = Arc::new(SimulatedLocationProvider::new(h.clock.clone(), 17.0, 78.0));
    let resumed = h.reopen(&sim);
    assert_eq!(resumed.engine().pipeline().queue_len().await, 2);

    h.writer.set_offline(false);
    h.advance(30);
    let report = resumed.engine().drain_tick().await;
    assert_eq!(report.delivered, 2);
    assert_eq!(h.writer.latitudes(), vec![1.0, 2.0]);
}
