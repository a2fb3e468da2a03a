//! Watchdog bookkeeping for the OS sampling task.
//!
//! The supervisor decides; the service applies its decisions to the state
//! machine. Kill detections inside one window are counted, restarts are
//! spaced by a minimum backoff, and once the count reaches the maximum the
//! supervisor gives up until something external re-arms it.

use crate::clock::elapsed;
use crate::config::RecoveryConfig;
use crate::store::{KEY_RECOVERY_RECORD, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Persisted recovery progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryRecord {
    pub last_confirmed_alive_at: Option<DateTime<Utc>>,
    pub kill_detected_at: Option<DateTime<Utc>>,
    pub restart_attempts: u32,
    pub window_start_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the last successful restart happened; cleared once it survives.
    pub restarted_at: Option<DateTime<Utc>>,
    /// Attempts ran out; nothing restarts until re-armed.
    pub exhausted: bool,
}

impl RecoveryRecord {
    /// No kill is being tracked.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.kill_detected_at.is_none() && self.restart_attempts == 0 && !self.exhausted
    }
}

/// What the watchdog should do about a dead sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    Restart,
    /// Too soon after the previous attempt.
    Backoff { remaining: Duration },
    Exhausted,
}

#[derive(Debug)]
pub struct RecoverySupervisor {
    config: RecoveryConfig,
    store: StateStore,
    record: RecoveryRecord,
}

impl RecoverySupervisor {
    /// Build a supervisor, resuming any record persisted in `store`.
    pub fn new(config: RecoveryConfig, store: StateStore) -> Self {
        let record = match store.load::<RecoveryRecord>(KEY_RECOVERY_RECORD) {
            Ok(Some(record)) => {
                if !record.is_clear() {
                    info!(
                        attempts = record.restart_attempts,
                        exhausted = record.exhausted,
                        "resumed recovery record"
                    );
                }
                record
            }
            Ok(None) => RecoveryRecord::default(),
            Err(e) => {
                warn!("cannot read recovery record: {e}");
                RecoveryRecord::default()
            }
        };
        Self {
            config,
            store,
            record,
        }
    }

    pub fn record(&self) -> &RecoveryRecord {
        &self.record
    }

    pub fn is_exhausted(&self) -> bool {
        self.record.exhausted
    }

    pub fn watchdog_interval(&self) -> Duration {
        self.config.watchdog_interval()
    }

    /// The sampler produced a fix (or was just started).
    pub fn confirm_alive(&mut self, now: DateTime<Utc>) {
        self.record.last_confirmed_alive_at = Some(now);
    }

    /// Upper bound on the silence of a healthy sampler.
    pub fn alive_bound(&self, sampling_interval: Duration) -> Duration {
        sampling_interval.saturating_mul(self.config.alive_multiplier)
    }

    /// Whether the sampler looks dead: the OS says it is gone, or it has
    /// not produced a fix for longer than [`alive_bound`](Self::alive_bound).
    pub fn is_sampler_dead(
        &self,
        now: DateTime<Utc>,
        sampling_interval: Duration,
        os_running: bool,
    ) -> bool {
        if !os_running {
            return true;
        }
        self.record
            .last_confirmed_alive_at
            .is_some_and(|alive| elapsed(alive, now) > self.alive_bound(sampling_interval))
    }

    /// Count a kill. Returns the attempt count inside the current window.
    pub fn record_kill(&mut self, now: DateTime<Utc>) -> u32 {
        let window_expired = self
            .record
            .window_start_at
            .is_none_or(|start| elapsed(start, now) >= self.config.window());
        if window_expired {
            self.record.window_start_at = Some(now);
            self.record.restart_attempts = 0;
        }
        self.record.kill_detected_at = Some(now);
        self.record.restarted_at = None;
        self.record.restart_attempts += 1;
        warn!(
            attempts = self.record.restart_attempts,
            max = self.config.max_restart_attempts,
            "sampling task kill detected"
        );
        self.persist();
        self.record.restart_attempts
    }

    pub fn next_step(&self, now: DateTime<Utc>) -> RecoveryStep {
        if self.record.restart_attempts >= self.config.max_restart_attempts {
            return RecoveryStep::Exhausted;
        }
        if let Some(last) = self.record.last_attempt_at {
            let since = elapsed(last, now);
            let backoff = self.config.restart_backoff();
            if since < backoff {
                return RecoveryStep::Backoff {
                    remaining: backoff - since,
                };
            }
        }
        RecoveryStep::Restart
    }

    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        self.record.last_attempt_at = Some(now);
        self.persist();
    }

    /// A restart attempt failed; it counts against the budget.
    pub fn restart_failed(&mut self) {
        self.record.restart_attempts += 1;
        self.persist();
    }

    pub fn mark_restarted(&mut self, now: DateTime<Utc>) {
        self.record.restarted_at = Some(now);
        self.record.last_confirmed_alive_at = Some(now);
        info!(attempts = self.record.restart_attempts, "sampling task restarted");
        self.persist();
    }

    /// Clear the record once a restart has run for a full sampling interval.
    /// Returns whether it was cleared.
    pub fn confirm_survival(&mut self, now: DateTime<Utc>, sampling_interval: Duration) -> bool {
        let Some(restarted) = self.record.restarted_at else {
            return false;
        };
        if elapsed(restarted, now) < sampling_interval {
            return false;
        }
        debug!("restart survived a full interval, clearing recovery record");
        self.clear();
        true
    }

    pub fn mark_exhausted(&mut self) {
        self.record.exhausted = true;
        self.record.restarted_at = None;
        warn!(
            attempts = self.record.restart_attempts,
            "restart attempts exhausted, tracking abandoned until next eligibility re-check"
        );
        self.persist();
    }

    /// Forget an exhausted record so the next eligibility check starts
    /// from zero attempts. Returns whether anything was reset.
    pub fn rearm(&mut self) -> bool {
        if !self.record.exhausted {
            return false;
        }
        info!("recovery re-armed");
        self.clear();
        true
    }

    /// Drop all recovery progress, keeping only liveness.
    pub fn clear(&mut self) {
        let alive = self.record.last_confirmed_alive_at;
        self.record = RecoveryRecord {
            last_confirmed_alive_at: alive,
            ..RecoveryRecord::default()
        };
        self.persist();
    }

    pub fn persist(&self) {
        self.store.save_or_warn(KEY_RECOVERY_RECORD, &self.record);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn supervisor(dir: &tempfile::TempDir) -> RecoverySupervisor {
        RecoverySupervisor::new(RecoveryConfig::default(), StateStore::new(dir.path()))
    }

    fn secs(n: u64) -> chrono::Duration {
        chrono::Duration::seconds(n as i64)
    }

    #[test]
    fn silence_beyond_bound_is_death() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sup = supervisor(&dir);
        let t0 = Utc::now();
        let interval = Duration::from_secs(15);
        sup.confirm_alive(t0);

        assert!(!sup.is_sampler_dead(t0 + secs(30), interval, true));
        assert!(sup.is_sampler_dead(t0 + secs(31), interval, true));
        assert!(sup.is_sampler_dead(t0, interval, false));
    }

    #[test]
    fn third_kill_in_window_exhausts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sup = supervisor(&dir);
        let t0 = Utc::now();

        sup.record_kill(t0);
        assert_eq!(sup.next_step(t0), RecoveryStep::Restart);
        sup.record_attempt(t0);
        sup.mark_restarted(t0);

        sup.record_kill(t0 + secs(20));
        assert!(matches!(
            sup.next_step(t0 + secs(20)),
            RecoveryStep::Backoff { remaining } if remaining == Duration::from_secs(40)
        ));
        assert_eq!(sup.next_step(t0 + secs(60)), RecoveryStep::Restart);
        sup.record_attempt(t0 + secs(60));

        sup.record_kill(t0 + secs(120));
        assert_eq!(sup.next_step(t0 + secs(200)), RecoveryStep::Exhausted);
    }

    #[test]
    fn expired_window_resets_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sup = supervisor(&dir);
        let t0 = Utc::now();
        sup.record_kill(t0);
        sup.record_kill(t0 + secs(10));
        assert_eq!(sup.record_kill(t0 + secs(900)), 1);
    }

    #[test]
    fn survival_clears_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sup = supervisor(&dir);
        let t0 = Utc::now();
        sup.record_kill(t0);
        sup.record_attempt(t0);
        sup.mark_restarted(t0);

        assert!(!sup.confirm_survival(t0 + secs(10), Duration::from_secs(15)));
        assert!(sup.confirm_survival(t0 + secs(15), Duration::from_secs(15)));
        assert!(sup.record().is_clear());
    }

    #[test]
    fn exhausted_record_persists_until_rearmed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t0 = Utc::now();
        {
            let mut sup = supervisor(&dir);
            for i in 0..3 {
                sup.record_kill(t0 + secs(i));
            }
            sup.mark_exhausted();
        }

        let mut resumed = supervisor(&dir);
        assert!(resumed.is_exhausted());
        assert_eq!(resumed.record().restart_attempts, 3);
        assert!(resumed.rearm());
        assert_eq!(resumed.record().restart_attempts, 0);
        assert!(!resumed.rearm());
    }
}
