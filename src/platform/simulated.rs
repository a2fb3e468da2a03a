//! In-process location provider with scripted fixes.
//!
//! Stands in for the OS service in tests and in the host bridge. Supports
//! the failure modes the tracker has to survive: OS kill of the task,
//! revoked permission, disabled services, and a stalled sensor.

use super::{LocationProvider, PermissionStatus, SamplingOptions};
use crate::clock::Clock;
use crate::error::{Result, TrackingError};
use crate::sample::{DeviceInfo, LocationFix};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct SimState {
    permission: PermissionStatus,
    services_enabled: bool,
    running: bool,
    options: Option<SamplingOptions>,
    script: VecDeque<(f64, f64)>,
    position: (f64, f64),
    stalled: bool,
    device: DeviceInfo,
    starts: u32,
    stops: u32,
}

pub struct SimulatedLocationProvider {
    clock: Arc<dyn Clock>,
    state: Mutex<SimState>,
}

impl SimulatedLocationProvider {
    /// A provider parked at `(latitude, longitude)` with permission granted.
    pub fn new(clock: Arc<dyn Clock>, latitude: f64, longitude: f64) -> Self {
        Self {
            clock,
            state: Mutex::new(SimState {
                permission: PermissionStatus::Granted,
                services_enabled: true,
                running: false,
                options: None,
                script: VecDeque::new(),
                position: (latitude, longitude),
                stalled: false,
                device: DeviceInfo {
                    manufacturer: Some("fieldtrack".to_owned()),
                    model: Some("simulator".to_owned()),
                    os_version: None,
                    brand: None,
                    is_device: false,
                    battery_pct: Some(100),
                },
                starts: 0,
                stops: 0,
            }),
        }
    }

    /// Queue positions to report, one per `current_fix` call. When the
    /// script runs out the last position repeats.
    pub fn script<I: IntoIterator<Item = (f64, f64)>>(&self, positions: I) {
        self.lock().script.extend(positions);
    }

    /// Simulate the OS terminating the sampling task.
    pub fn kill(&self) {
        self.lock().running = false;
    }

    pub fn set_permission(&self, permission: PermissionStatus) {
        self.lock().permission = permission;
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        self.lock().services_enabled = enabled;
    }

    /// While stalled, `current_fix` never completes.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    pub fn set_battery(&self, pct: Option<u8>) {
        self.lock().device.battery_pct = pct;
    }

    /// Number of `start_updates` calls that started the task.
    pub fn start_count(&self) -> u32 {
        self.lock().starts
    }

    /// Number of `stop_updates` calls that stopped a running task.
    pub fn stop_count(&self) -> u32 {
        self.lock().stops
    }

    /// Options the task is currently running with.
    pub fn options(&self) -> Option<SamplingOptions> {
        self.lock().options.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SimulatedLocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedLocationProvider")
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocationProvider {
    async fn permission_status(&self) -> PermissionStatus {
        self.lock().permission
    }

    async fn services_enabled(&self) -> bool {
        self.lock().services_enabled
    }

    async fn start_updates(&self, options: &SamplingOptions) -> Result<()> {
        let mut state = self.lock();
        if !state.services_enabled {
            return Err(TrackingError::ServiceDisabled);
        }
        if !state.permission.allows(options.app_state) {
            return Err(TrackingError::PermissionDenied(format!(
                "{:?} permission for {} sampling",
                state.permission,
                options.app_state.as_str()
            )));
        }
        if !state.running {
            state.running = true;
            state.starts += 1;
        }
        state.options = Some(options.clone());
        Ok(())
    }

    async fn reconfigure(&self, options: &SamplingOptions) -> Result<()> {
        let mut state = self.lock();
        if !state.running {
            return Err(TrackingError::TaskKilled("sampling task not running".to_owned()));
        }
        state.options = Some(options.clone());
        Ok(())
    }

    async fn stop_updates(&self) -> Result<()> {
        let mut state = self.lock();
        if state.running {
            state.running = false;
            state.stops += 1;
        }
        state.options = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lock().running
    }

    async fn current_fix(&self) -> Result<LocationFix> {
        let (stalled, next) = {
            let mut state = self.lock();
            if !state.running {
                return Err(TrackingError::TaskKilled("sampling task not running".to_owned()));
            }
            if let Some(position) = state.script.pop_front() {
                state.position = position;
            }
            (state.stalled, state.position)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut fix = LocationFix::at(next.0, next.1, self.clock.now());
        fix.accuracy = Some(5.0);
        Ok(fix)
    }

    async fn device_info(&self) -> DeviceInfo {
        self.lock().device.clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::clock::SystemClock;
    use crate::sample::AppState;
    use std::time::Duration;

    fn provider() -> SimulatedLocationProvider {
        SimulatedLocationProvider::new(Arc::new(SystemClock), 17.385, 78.4867)
    }

    fn options() -> SamplingOptions {
        SamplingOptions::new(Duration::from_secs(15), AppState::Foreground)
    }

    #[tokio::test]
    async fn start_and_stop_are_counted_once() {
        let sim = provider();
        sim.start_updates(&options()).await.unwrap();
        sim.start_updates(&options()).await.unwrap();
        sim.stop_updates().await.unwrap();
        sim.stop_updates().await.unwrap();
        assert_eq!(sim.start_count(), 1);
        assert_eq!(sim.stop_count(), 1);
    }

    #[tokio::test]
    async fn script_is_replayed_then_repeats() {
        let sim = provider();
        sim.script([(1.0, 2.0), (3.0, 4.0)]);
        sim.start_updates(&options()).await.unwrap();
        assert_eq!(sim.current_fix().await.unwrap().latitude, 1.0);
        assert_eq!(sim.current_fix().await.unwrap().latitude, 3.0);
        assert_eq!(sim.current_fix().await.unwrap().latitude, 3.0);
    }

    #[tokio::test]
    async fn killed_task_yields_no_fix() {
        let sim = provider();
        sim.start_updates(&options()).await.unwrap();
        sim.kill();
        assert!(!sim.is_running());
        let err = sim.current_fix().await.unwrap_err();
        assert!(matches!(err, TrackingError::TaskKilled(_)));
    }

    #[tokio::test]
    async fn denied_permission_refuses_start() {
        let sim = provider();
        sim.set_permission(PermissionStatus::Denied);
        let err = sim.start_updates(&options()).await.unwrap_err();
        assert!(err.is_fatal());

        sim.set_permission(PermissionStatus::Granted);
        sim.set_services_enabled(false);
        let err = sim.start_updates(&options()).await.unwrap_err();
        assert!(matches!(err, TrackingError::ServiceDisabled));
    }

    #[tokio::test]
    async fn stalled_sensor_times_out() {
        let sim = provider();
        sim.start_updates(&options()).await.unwrap();
        sim.set_stalled(true);
        let result = tokio::time::timeout(Duration::from_millis(20), sim.current_fix()).await;
        assert!(result.is_err());
    }
}
