//! Configuration types for the tracker.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the location telemetry engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Policy cache and eligibility gate settings.
    pub policy: PolicyConfig,
    /// Sensor cadence settings.
    pub sampling: SamplingConfig,
    /// Remote delivery and offline queue settings.
    pub sync: SyncConfig,
    /// Watchdog and restart settings.
    pub recovery: RecoveryConfig,
    /// Upper bound for a single OS start/stop call, in seconds.
    pub transition_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            sampling: SamplingConfig::default(),
            sync: SyncConfig::default(),
            recovery: RecoveryConfig::default(),
            transition_timeout_secs: 10,
        }
    }
}

/// What the gate answers when eligibility cannot be confirmed.
///
/// Applies when no policy has ever been fetched, and when a stale policy
/// rejects the identity and the refresh attempt fails. An explicit
/// working-window boundary is honoured in both modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Keep (or start) tracking.
    #[default]
    Open,
    /// Stop (or do not start) tracking.
    Closed,
}

/// Policy cache and eligibility gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// URL serving the policy JSON. Without one the built-in default policy is used.
    pub url: Option<String>,
    /// Age after which a cached policy is stale.
    pub ttl_secs: u64,
    /// Upper bound for one remote policy fetch.
    pub fetch_timeout_secs: u64,
    /// Period of the out-of-band refresh timer.
    pub refresh_interval_secs: u64,
    /// How long a computed eligibility answer is reused.
    pub gate_memo_secs: u64,
    /// Behaviour when eligibility cannot be confirmed.
    pub fail_mode: FailMode,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            url: None,
            ttl_secs: 300,
            fetch_timeout_secs: 10,
            refresh_interval_secs: 300,
            gate_memo_secs: 5,
            fail_mode: FailMode::Open,
        }
    }
}

impl PolicyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn gate_memo(&self) -> Duration {
        Duration::from_secs(self.gate_memo_secs)
    }
}

/// Sensor cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Tick interval while the app is in the foreground.
    pub foreground_interval_secs: u64,
    /// Tick interval while the app is backgrounded (coarser cadence).
    pub background_interval_secs: u64,
    /// Upper bound for one sensor read.
    pub sensor_timeout_secs: u64,
    /// Battery percentage at or below which the coarse cadence is used
    /// even in the foreground.
    pub low_battery_threshold_pct: u8,
    /// Foreground/background changes closer together than this are folded
    /// into the next sampling tick. Zero applies every change at once.
    pub lifecycle_debounce_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            foreground_interval_secs: 15,
            background_interval_secs: 45,
            sensor_timeout_secs: 10,
            low_battery_threshold_pct: 20,
            lifecycle_debounce_secs: 15,
        }
    }
}

impl SamplingConfig {
    pub fn foreground_interval(&self) -> Duration {
        Duration::from_secs(self.foreground_interval_secs)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_interval_secs)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_secs(self.sensor_timeout_secs)
    }

    pub fn lifecycle_debounce(&self) -> Duration {
        Duration::from_secs(self.lifecycle_debounce_secs)
    }
}

/// Remote delivery and offline queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote write endpoint (e.g. `https://host/api/location`).
    ///
    /// `None` disables the HTTP writer; the host must supply its own.
    pub endpoint: Option<String>,
    /// Upper bound for one delivery request.
    pub request_timeout_secs: u64,
    /// Maximum number of queued samples; the oldest is evicted beyond this.
    pub queue_capacity: usize,
    /// Queued samples older than this are dropped instead of delivered.
    pub staleness_secs: u64,
    /// Period of the drain timer.
    pub drain_interval_secs: u64,
    /// A queued sample is dropped after this many failed deliveries.
    pub max_entry_attempts: u32,
    /// First network retry delay; doubles per consecutive failure.
    pub retry_base_secs: u64,
    /// Cap for the network retry delay.
    pub retry_max_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_secs: 10,
            queue_capacity: 500,
            staleness_secs: 1800,
            drain_interval_secs: 30,
            max_entry_attempts: 10,
            retry_base_secs: 10,
            retry_max_secs: 300,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }
}

/// Recovery supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Period of the watchdog timer.
    pub watchdog_interval_secs: u64,
    /// The sampler counts as dead after `alive_multiplier` sampling intervals
    /// without a confirmed fix.
    pub alive_multiplier: u32,
    /// Restart attempts allowed within one recovery window.
    pub max_restart_attempts: u32,
    /// Minimum spacing between two restart attempts.
    pub restart_backoff_secs: u64,
    /// Attempts older than this window no longer count.
    pub window_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_secs: 15,
            alive_multiplier: 2,
            max_restart_attempts: 3,
            restart_backoff_secs: 60,
            window_secs: 900,
        }
    }
}

impl RecoveryConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl TrackerConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::TrackingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TrackingError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`tracker_dirs::config_file()`).
    pub fn default_config_path() -> PathBuf {
        crate::tracker_dirs::config_file()
    }

    /// Reject values that would make a timer spin or the queue useless.
    pub fn validate(&self) -> crate::error::Result<()> {
        let nonzero = [
            ("policy.ttl_secs", self.policy.ttl_secs),
            ("policy.fetch_timeout_secs", self.policy.fetch_timeout_secs),
            ("policy.refresh_interval_secs", self.policy.refresh_interval_secs),
            ("sampling.foreground_interval_secs", self.sampling.foreground_interval_secs),
            ("sampling.background_interval_secs", self.sampling.background_interval_secs),
            ("sampling.sensor_timeout_secs", self.sampling.sensor_timeout_secs),
            ("sync.request_timeout_secs", self.sync.request_timeout_secs),
            ("sync.drain_interval_secs", self.sync.drain_interval_secs),
            ("sync.retry_base_secs", self.sync.retry_base_secs),
            ("recovery.watchdog_interval_secs", self.recovery.watchdog_interval_secs),
            ("transition_timeout_secs", self.transition_timeout_secs),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(crate::error::TrackingError::Config(format!(
                "{name} must be greater than zero"
            )));
        }
        if self.sync.queue_capacity == 0 {
            return Err(crate::error::TrackingError::Config(
                "sync.queue_capacity must be greater than zero".to_owned(),
            ));
        }
        if self.recovery.alive_multiplier == 0 {
            return Err(crate::error::TrackingError::Config(
                "recovery.alive_multiplier must be greater than zero".to_owned(),
            ));
        }
        if self.sync.retry_max_secs < self.sync.retry_base_secs {
            return Err(crate::error::TrackingError::Config(
                "sync.retry_max_secs must not be below sync.retry_base_secs".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_secs(self.transition_timeout_secs)
    }
}
