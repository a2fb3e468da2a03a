//! Shared engine state and the tick bodies the actors run.
//!
//! [`TrackerCore`] is the single writer: the state machine, the recovery
//! record and lifecycle flags live behind one `tokio::sync::Mutex`. Identity
//! lookups, eligibility checks, sensor reads and network delivery happen
//! before the lock is taken; their results are applied only if the
//! generation observed beforehand is still current.

use super::{Collaborators, LifecycleEvent};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::{Result, TrackingError};
use crate::identity::IdentityProvider;
use crate::platform::{LocationProvider, SamplingOptions};
use crate::policy::{Eligibility, EligibilityGate, PolicyCache};
use crate::recovery::{RecoveryRecord, RecoveryStep, RecoverySupervisor};
use crate::runtime::{AttentionIssue, TrackerEvent};
use crate::sample::{AppState, LocationSample};
use crate::store::StateStore;
use crate::sync::{DrainReport, OfflineQueue, SubmitOutcome, SyncPipeline};
use crate::tracking::{TrackingMachine, TrackingState, Transition, Trigger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};
use tracing::{debug, info, warn};

/// Why eligibility is being re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileCause {
    Tick,
    PolicyRefreshed,
    Foregrounded,
    Backgrounded,
    StartRequested,
    /// The host signed a user in or out.
    IdentityChanged,
}

impl ReconcileCause {
    /// Causes that count as a fresh eligibility re-check and re-arm an
    /// exhausted supervisor.
    fn rearms(self) -> bool {
        matches!(
            self,
            Self::PolicyRefreshed | Self::Foregrounded | Self::StartRequested
        )
    }
}

/// Result of one sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleTick {
    /// No sampler is expected to run.
    NotSampling,
    NoIdentity,
    SensorTimeout,
    /// The provider returned an error instead of a fix.
    SensorError,
    /// The state machine moved on while the fix was being read.
    StaleGeneration,
    Submitted(SubmitOutcome),
}

/// Point-in-time view for hosts and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    pub enabled: bool,
    pub state: TrackingState,
    pub generation: u64,
    pub app_state: AppState,
    pub eligibility: Option<Eligibility>,
    pub queue_len: usize,
    pub recovery: RecoveryRecord,
}

/// State owned by the single writer.
#[derive(Debug)]
pub(crate) struct TrackerCore {
    machine: TrackingMachine,
    supervisor: RecoverySupervisor,
    enabled: bool,
    app_state: AppState,
    battery_low: bool,
    last_eligibility: Option<Eligibility>,
    attention: Option<AttentionIssue>,
    /// Cadence the sampler may still be sleeping on; tightened by the next
    /// confirmed fix.
    alive_cadence: Option<Duration>,
    last_lifecycle_at: Option<DateTime<Utc>>,
    /// Lifecycle re-check deferred by the debounce.
    pending_cause: Option<ReconcileCause>,
}

impl TrackerCore {
    fn sampling_interval(&self, config: &TrackerConfig) -> Duration {
        if self.app_state == AppState::Background || self.battery_low {
            config.sampling.background_interval()
        } else {
            config.sampling.foreground_interval()
        }
    }

    fn options(&self, config: &TrackerConfig) -> SamplingOptions {
        SamplingOptions::new(self.sampling_interval(config), self.app_state)
    }

    /// Interval the liveness bound is measured against: the slower of the
    /// current cadence and the one in effect before the last change.
    fn liveness_interval(&self, config: &TrackerConfig) -> Duration {
        let current = self.sampling_interval(config);
        self.alive_cadence.map_or(current, |previous| previous.max(current))
    }

    fn confirm_alive(&mut self, now: DateTime<Utc>, config: &TrackerConfig) {
        self.supervisor.confirm_alive(now);
        self.alive_cadence = Some(self.sampling_interval(config));
    }
}

/// Everything the actors share.
pub struct TrackerEngine {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    identity: Arc<dyn IdentityProvider>,
    location: Arc<dyn LocationProvider>,
    gate: EligibilityGate,
    pipeline: SyncPipeline,
    events: broadcast::Sender<TrackerEvent>,
    core: Mutex<TrackerCore>,
    cadence_changed: Notify,
}

impl TrackerEngine {
    pub(crate) fn new(
        config: TrackerConfig,
        collaborators: Collaborators,
        store: StateStore,
        events: broadcast::Sender<TrackerEvent>,
    ) -> Self {
        let Collaborators {
            identity,
            policy,
            location,
            writer,
            clock,
        } = collaborators;

        let cache = Arc::new(
            PolicyCache::new(policy, clock.clone(), &config.policy).with_store(store.clone()),
        );
        let gate = EligibilityGate::new(cache, clock.clone(), &config.policy);
        let pipeline = SyncPipeline::new(
            writer,
            clock.clone(),
            events.clone(),
            OfflineQueue::load(store.clone(), config.sync.queue_capacity),
            &config.sync,
        );
        let machine = TrackingMachine::new(
            location.clone(),
            clock.clone(),
            store.clone(),
            events.clone(),
            config.transition_timeout(),
        );
        let supervisor = RecoverySupervisor::new(config.recovery.clone(), store);

        Self {
            config,
            clock,
            identity,
            location,
            gate,
            pipeline,
            events,
            core: Mutex::new(TrackerCore {
                machine,
                supervisor,
                enabled: false,
                app_state: AppState::Foreground,
                battery_low: false,
                last_eligibility: None,
                attention: None,
                alive_cadence: None,
                last_lifecycle_at: None,
                pending_cause: None,
            }),
            cadence_changed: Notify::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &SyncPipeline {
        &self.pipeline
    }

    pub fn gate(&self) -> &EligibilityGate {
        &self.gate
    }

    pub async fn state(&self) -> TrackingState {
        self.core.lock().await.machine.state()
    }

    pub async fn generation(&self) -> u64 {
        self.core.lock().await.machine.generation()
    }

    pub async fn recovery_record(&self) -> RecoveryRecord {
        self.core.lock().await.supervisor.record().clone()
    }

    pub async fn status(&self) -> TrackerStatus {
        let queue_len = self.pipeline.queue_len().await;
        let core = self.core.lock().await;
        TrackerStatus {
            enabled: core.enabled,
            state: core.machine.state(),
            generation: core.machine.generation(),
            app_state: core.app_state,
            eligibility: core.last_eligibility,
            queue_len,
            recovery: core.supervisor.record().clone(),
        }
    }

    /// Current sampling cadence.
    pub async fn sampling_interval(&self) -> Duration {
        self.core.lock().await.sampling_interval(&self.config)
    }

    /// Resolves when an applied lifecycle change altered the cadence.
    pub(crate) async fn cadence_changed(&self) {
        self.cadence_changed.notified().await;
    }

    /// Hosts that schedule the tick methods themselves enable the engine
    /// here instead of calling `TrackerService::start`.
    pub async fn set_enabled(&self, enabled: bool) {
        self.core.lock().await.enabled = enabled;
    }

    /// Re-evaluate eligibility and drive the state machine toward it.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `ServiceDisabled` when the sampler
    /// should start but the OS refuses; every other failure is absorbed.
    pub async fn reconcile(&self, cause: ReconcileCause) -> Result<TrackingState> {
        let cause = if cause == ReconcileCause::Tick {
            self.take_pending_cause().await.unwrap_or(cause)
        } else {
            cause
        };
        let observed = self.generation().await;
        if cause != ReconcileCause::Tick {
            self.gate.invalidate();
        }
        let identity = self.identity.current_identity().await;
        let eligibility = self.gate.check(identity.as_ref()).await;
        let permission = self.location.permission_status().await;
        let services_enabled = self.location.services_enabled().await;

        let mut core = self.core.lock().await;
        if !core.enabled {
            return Ok(core.machine.state());
        }

        if core.last_eligibility != Some(eligibility) {
            info!(?eligibility, ?cause, "eligibility changed");
            core.last_eligibility = Some(eligibility);
            let _ = self.events.send(TrackerEvent::EligibilityChanged {
                eligible: eligibility.allows(),
                reason: eligibility,
            });
        }

        let issue = if !services_enabled {
            Some(AttentionIssue::ServiceDisabled)
        } else if !permission.allows(core.app_state) {
            Some(AttentionIssue::PermissionDenied)
        } else {
            None
        };
        self.set_attention(&mut core, issue);

        if cause.rearms() && core.supervisor.rearm() {
            debug!(?cause, "recovery budget reset by eligibility re-check");
        }

        let wanted = eligibility.allows() && issue.is_none();
        let state = core.machine.state();
        let options = core.options(&self.config);

        match (state, wanted) {
            (TrackingState::Idle, true) => {
                if core.supervisor.is_exhausted() {
                    debug!("recovery exhausted, waiting for re-arm before starting");
                    return Ok(state);
                }
                let started = core
                    .machine
                    .apply(Trigger::BecameEligible, observed, &options)
                    .await;
                match started {
                    Ok(Transition::Applied { .. }) => {
                        let now = self.clock.now();
                        core.supervisor.clear();
                        core.confirm_alive(now, &self.config);
                        if core.app_state == AppState::Background {
                            core.machine.fire(Trigger::Backgrounded, &options).await?;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => return Err(self.start_failed(&mut core, e)),
                }
            }
            (TrackingState::Active | TrackingState::Suspended | TrackingState::Recovering, false) => {
                let stopped = core
                    .machine
                    .apply(Trigger::BecameIneligible, observed, &options)
                    .await?;
                if stopped.applied() {
                    core.supervisor.clear();
                }
            }
            (TrackingState::Active, true) if core.app_state == AppState::Background => {
                core.machine
                    .apply(Trigger::Backgrounded, observed, &options)
                    .await?;
            }
            (TrackingState::Suspended, true) if core.app_state == AppState::Foreground => {
                if let Err(e) = core
                    .machine
                    .apply(Trigger::Foregrounded, observed, &options)
                    .await
                {
                    return Err(self.start_failed(&mut core, e));
                }
            }
            (TrackingState::Active | TrackingState::Suspended, true) => {
                if let Err(e) = core.machine.reconfigure(&options).await {
                    debug!("cadence change not applied: {e}");
                }
            }
            _ => {}
        }
        Ok(core.machine.state())
    }

    /// Read one fix and hand it to the pipeline.
    pub async fn sampling_tick(&self) -> SampleTick {
        let (generation, app_state) = {
            let core = self.core.lock().await;
            if !core.enabled || !core.machine.state().expects_sampler() {
                return SampleTick::NotSampling;
            }
            (core.machine.generation(), core.app_state)
        };

        let Some(identity) = self.identity.current_identity().await else {
            return SampleTick::NoIdentity;
        };

        let timeout = self.config.sampling.sensor_timeout();
        let fix = match tokio::time::timeout(timeout, self.location.current_fix()).await {
            Ok(Ok(fix)) => fix,
            Ok(Err(e)) => {
                debug!("no fix this tick: {e}");
                return SampleTick::SensorError;
            }
            Err(_) => {
                let e = TrackingError::SensorTimeout(timeout.as_secs());
                warn!("skipping tick: {e}");
                return SampleTick::SensorTimeout;
            }
        };
        let device = self.location.device_info().await;

        {
            let mut core = self.core.lock().await;
            if core.machine.generation() != generation {
                debug!(
                    observed = generation,
                    current = core.machine.generation(),
                    "discarding fix from previous generation"
                );
                return SampleTick::StaleGeneration;
            }
            let threshold = self.config.sampling.low_battery_threshold_pct;
            let low = device.battery_pct.is_some_and(|pct| pct <= threshold);
            if low != core.battery_low {
                info!(battery_pct = ?device.battery_pct, low, "battery state changed");
                core.battery_low = low;
            }
            core.confirm_alive(self.clock.now(), &self.config);
        }

        let sample = LocationSample::from_fix(fix, app_state, device);
        SampleTick::Submitted(self.pipeline.submit(&identity, sample).await)
    }

    /// Refresh the policy out of band, then re-check eligibility.
    pub async fn policy_refresh_tick(&self) -> Result<TrackingState> {
        let refreshed = self.gate.cache().refresh().await;
        debug!(refreshed, "policy refresh tick");
        self.reconcile(ReconcileCause::PolicyRefreshed).await
    }

    pub async fn drain_tick(&self) -> DrainReport {
        self.pipeline.drain().await
    }

    /// Compare the claimed state with OS reality and recover if needed.
    pub async fn watchdog_tick(&self) {
        let identity = self.identity.current_identity().await;
        let eligible = self.gate.check(identity.as_ref()).await.allows();
        let os_running = self.location.is_running();
        let now = self.clock.now();

        let mut core = self.core.lock().await;
        if !core.enabled {
            return;
        }
        let interval = core.liveness_interval(&self.config);
        let options = core.options(&self.config);

        match core.machine.state() {
            TrackingState::Idle => return,
            TrackingState::Active | TrackingState::Suspended => {
                if !core.supervisor.is_sampler_dead(now, interval, os_running) {
                    core.supervisor.confirm_survival(now, interval);
                    return;
                }
                if !eligible {
                    self.stand_down(&mut core, &options).await;
                    return;
                }
                core.supervisor.record_kill(now);
                if let Err(e) = core.machine.fire(Trigger::TaskKilled, &options).await {
                    warn!("cannot enter recovery: {e}");
                    return;
                }
            }
            TrackingState::Recovering => {}
        }

        if !eligible {
            self.stand_down(&mut core, &options).await;
            return;
        }

        match core.supervisor.next_step(now) {
            RecoveryStep::Backoff { remaining } => {
                debug!(remaining_secs = remaining.as_secs(), "restart backoff pending");
            }
            RecoveryStep::Exhausted => {
                let attempts = core.supervisor.record().restart_attempts;
                if let Err(e) = core.machine.fire(Trigger::RecoveryExhausted, &options).await {
                    warn!("cannot leave recovery: {e}");
                }
                core.supervisor.mark_exhausted();
                let _ = self.events.send(TrackerEvent::RecoveryExhausted { attempts });
            }
            RecoveryStep::Restart => {
                core.supervisor.record_attempt(now);
                match core.machine.fire(Trigger::RestartSucceeded, &options).await {
                    Ok(_) => {
                        core.supervisor.mark_restarted(now);
                        if core.app_state == AppState::Background {
                            if let Err(e) = core.machine.fire(Trigger::Backgrounded, &options).await {
                                warn!("restarted sampler not suspended: {e}");
                            }
                        }
                    }
                    Err(e) => {
                        warn!("restart attempt failed: {e}");
                        core.supervisor.restart_failed();
                        if let Some(issue) = attention_for(&e) {
                            self.set_attention(&mut core, Some(issue));
                        }
                    }
                }
            }
        }
    }

    /// Feed an app lifecycle signal through the single writer.
    ///
    /// The first change after a quiet period is applied at once. Changes
    /// inside the debounce window only record the new app state; the next
    /// sampling tick applies the latest one.
    pub async fn on_lifecycle(&self, event: LifecycleEvent) -> Result<TrackingState> {
        let now = self.clock.now();
        let cause = {
            let mut core = self.core.lock().await;
            let (app_state, cause) = match event {
                LifecycleEvent::Foreground => (AppState::Foreground, ReconcileCause::Foregrounded),
                LifecycleEvent::Background => (AppState::Background, ReconcileCause::Backgrounded),
                LifecycleEvent::Terminating => {
                    info!(state = %core.machine.state(), "terminating, persisting state");
                    core.machine.persist();
                    core.supervisor.persist();
                    return Ok(core.machine.state());
                }
            };
            let previous = core.liveness_interval(&self.config);
            core.app_state = app_state;
            core.alive_cadence = Some(previous);

            let debounce = self.config.sampling.lifecycle_debounce();
            let quiet = core
                .last_lifecycle_at
                .is_none_or(|at| crate::clock::elapsed(at, now) >= debounce);
            if !quiet {
                debug!(?event, "lifecycle change debounced");
                core.pending_cause = Some(cause);
                return Ok(core.machine.state());
            }
            core.last_lifecycle_at = Some(now);
            core.pending_cause = None;
            cause
        };
        debug!(?event, "lifecycle event");
        let state = self.reconcile(cause).await;
        self.cadence_changed.notify_waiters();
        state
    }

    /// A debounced lifecycle cause, once its window has passed.
    async fn take_pending_cause(&self) -> Option<ReconcileCause> {
        let now = self.clock.now();
        let debounce = self.config.sampling.lifecycle_debounce();
        let mut core = self.core.lock().await;
        let quiet = core
            .last_lifecycle_at
            .is_none_or(|at| crate::clock::elapsed(at, now) >= debounce);
        if !quiet {
            return None;
        }
        let cause = core.pending_cause.take()?;
        core.last_lifecycle_at = Some(now);
        Some(cause)
    }

    /// Move to `Idle` unconditionally; used by `stop()`.
    pub(crate) async fn shutdown(&self) {
        let mut core = self.core.lock().await;
        core.enabled = false;
        let options = core.options(&self.config);
        self.stand_down(&mut core, &options).await;
        core.last_eligibility = None;
        core.attention = None;
    }

    async fn stand_down(&self, core: &mut TrackerCore, options: &SamplingOptions) {
        match core.machine.fire(Trigger::BecameIneligible, options).await {
            Ok(Transition::Applied { .. }) => core.supervisor.clear(),
            Ok(_) => {}
            Err(e) => warn!("cannot stop sampler: {e}"),
        }
    }

    fn start_failed(&self, core: &mut TrackerCore, error: TrackingError) -> TrackingError {
        warn!("sampler did not start: {error}");
        if let Some(issue) = attention_for(&error) {
            self.set_attention(core, Some(issue));
        }
        error
    }

    /// Publish `AttentionRequired` when a new issue appears.
    fn set_attention(&self, core: &mut TrackerCore, issue: Option<AttentionIssue>) {
        if core.attention == issue {
            return;
        }
        core.attention = issue;
        if let Some(issue) = issue {
            warn!(?issue, "user action required");
            let _ = self.events.send(TrackerEvent::AttentionRequired { issue });
        }
    }
}

impl std::fmt::Debug for TrackerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerEngine")
            .field("gate", &self.gate)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

fn attention_for(error: &TrackingError) -> Option<AttentionIssue> {
    match error {
        TrackingError::PermissionDenied(_) => Some(AttentionIssue::PermissionDenied),
        TrackingError::ServiceDisabled => Some(AttentionIssue::ServiceDisabled),
        _ => None,
    }
}
