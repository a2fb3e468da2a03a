//! Centralized application directory paths for the tracker.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data (state, logs) | `~/Library/Application Support/fieldtrack/` | `~/.local/share/fieldtrack/` |
//! | Config | `~/Library/Application Support/fieldtrack/` | `~/.config/fieldtrack/` |
//!
//! # Environment Overrides
//!
//! - `FIELDTRACK_DATA_DIR`: overrides [`data_dir`]
//! - `FIELDTRACK_CONFIG_DIR`: overrides [`config_dir`]

use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "fieldtrack";

fn resolve(override_dir: Option<OsString>, base: Option<PathBuf>, fallback: &str) -> PathBuf {
    if let Some(dir) = override_dir {
        return PathBuf::from(dir);
    }
    base.map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Application data root directory.
///
/// Holds persisted tracker state and logs. Resolves to
/// `dirs::data_dir()/fieldtrack/` unless `FIELDTRACK_DATA_DIR` is set.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve(
        std::env::var_os("FIELDTRACK_DATA_DIR"),
        dirs::data_dir(),
        "/tmp/fieldtrack-data",
    )
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve(
        std::env::var_os("FIELDTRACK_CONFIG_DIR"),
        dirs::config_dir(),
        "/tmp/fieldtrack-config",
    )
}

/// Persisted key-value state directory (`data_dir()/state/`).
#[must_use]
pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
