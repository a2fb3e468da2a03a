//! Location samples and the metadata captured with them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host application visibility at capture time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    #[default]
    Foreground,
    Background,
}

impl AppState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

/// Device metadata attached to every sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub brand: Option<String>,
    /// `false` on simulators and emulators.
    pub is_device: bool,
    /// Battery charge in percent, when the platform reports it.
    pub battery_pct: Option<u8>,
}

/// A raw reading from the OS location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub altitude: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl LocationFix {
    /// A fix with only coordinates set.
    #[must_use]
    pub fn at(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            heading: None,
            altitude: None,
            captured_at,
        }
    }
}

/// One captured position, ready for delivery.
///
/// Samples are never mutated after capture; the pipeline and queue move them
/// by value. Ordering is by `captured_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub altitude: Option<f64>,
    pub captured_at: DateTime<Utc>,
    pub app_state: AppState,
    pub device: DeviceInfo,
}

impl LocationSample {
    #[must_use]
    pub fn from_fix(fix: LocationFix, app_state: AppState, device: DeviceInfo) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            speed: fix.speed,
            heading: fix.heading,
            altitude: fix.altitude,
            captured_at: fix.captured_at,
            app_state,
            device,
        }
    }

    /// Exact coordinate equality, the dedup criterion.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn same_position(&self, other: &Self) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}
