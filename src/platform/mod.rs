//! OS location provider seam.
//!
//! The tracker never talks to a platform location API directly. It drives a
//! [`LocationProvider`], which on a device wraps the OS continuous-update
//! service and in tests and the host bridge is a
//! [`SimulatedLocationProvider`].

use crate::error::Result;
use crate::sample::{AppState, DeviceInfo, LocationFix};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

mod simulated;

pub use simulated::SimulatedLocationProvider;

/// OS location permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// Foreground and background access.
    Granted,
    /// Access only while the app is visible.
    ForegroundOnly,
    Denied,
}

impl PermissionStatus {
    /// Whether sampling may run in the given app state.
    #[must_use]
    pub fn allows(self, app_state: AppState) -> bool {
        match self {
            Self::Granted => true,
            Self::ForegroundOnly => app_state == AppState::Foreground,
            Self::Denied => false,
        }
    }
}

/// How the OS sampling task should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingOptions {
    pub interval: Duration,
    pub app_state: AppState,
    /// Show the persistent "location in use" indicator. Only in the foreground.
    pub foreground_indicator: bool,
}

impl SamplingOptions {
    #[must_use]
    pub fn new(interval: Duration, app_state: AppState) -> Self {
        Self {
            interval,
            app_state,
            foreground_indicator: app_state == AppState::Foreground,
        }
    }
}

/// Continuous location updates from the operating system.
///
/// `start_updates` and `stop_updates` are called by the tracking state
/// machine only. `stop_updates` on a stopped provider must succeed.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn permission_status(&self) -> PermissionStatus;

    async fn services_enabled(&self) -> bool;

    async fn start_updates(&self, options: &SamplingOptions) -> Result<()>;

    /// Change cadence or indicator of a running task without restarting it.
    async fn reconfigure(&self, options: &SamplingOptions) -> Result<()>;

    async fn stop_updates(&self) -> Result<()>;

    /// Whether the OS still reports the task as alive.
    fn is_running(&self) -> bool;

    /// The most recent fix. Callers bound this with a timeout.
    async fn current_fix(&self) -> Result<LocationFix>;

    async fn device_info(&self) -> DeviceInfo;
}
