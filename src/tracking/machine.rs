//! The tracking state machine: sole owner of the OS sampling task.
//!
//! Every transition is tagged with the generation the caller observed
//! before it started any I/O. If the machine has moved on since, the
//! request is discarded. Completed transitions bump the generation,
//! persist the snapshot and publish [`TrackerEvent::StateChanged`].

use super::{TrackingSnapshot, TrackingState, Trigger};
use crate::clock::Clock;
use crate::error::{Result, TrackingError};
use crate::platform::{LocationProvider, SamplingOptions};
use crate::runtime::TrackerEvent;
use crate::store::{KEY_TRACKING_STATE, StateStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Result of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: TrackingState,
        to: TrackingState,
        generation: u64,
    },
    /// Requested under a generation that is no longer current.
    Stale { observed: u64, current: u64 },
    /// The trigger does not apply to the current state.
    NotApplicable,
}

impl Transition {
    #[must_use]
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

pub struct TrackingMachine {
    provider: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    store: StateStore,
    events: broadcast::Sender<TrackerEvent>,
    op_timeout: Duration,
    snapshot: TrackingSnapshot,
    options: Option<SamplingOptions>,
}

impl TrackingMachine {
    /// Build a machine, resuming the generation and state persisted in `store`.
    ///
    /// A resumed running state has no sampler in this process; the
    /// supervisor will notice and restart it.
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        clock: Arc<dyn Clock>,
        store: StateStore,
        events: broadcast::Sender<TrackerEvent>,
        op_timeout: Duration,
    ) -> Self {
        let snapshot = match store.load::<TrackingSnapshot>(KEY_TRACKING_STATE) {
            Ok(Some(snapshot)) => {
                info!(
                    state = %snapshot.state,
                    generation = snapshot.generation,
                    "resumed persisted tracking state"
                );
                snapshot
            }
            Ok(None) => TrackingSnapshot {
                state: TrackingState::Idle,
                generation: 0,
                since: clock.now(),
            },
            Err(e) => {
                warn!("cannot read tracking state, starting idle: {e}");
                TrackingSnapshot {
                    state: TrackingState::Idle,
                    generation: 0,
                    since: clock.now(),
                }
            }
        };
        Self {
            provider,
            clock,
            store,
            events,
            op_timeout,
            snapshot,
            options: None,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.snapshot.state
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }

    pub fn snapshot(&self) -> &TrackingSnapshot {
        &self.snapshot
    }

    /// Options the sampler was last started or reconfigured with.
    pub fn options(&self) -> Option<&SamplingOptions> {
        self.options.as_ref()
    }

    pub fn provider(&self) -> &Arc<dyn LocationProvider> {
        &self.provider
    }

    /// Write the snapshot to disk now.
    pub fn persist(&self) {
        self.store.save_or_warn(KEY_TRACKING_STATE, &self.snapshot);
    }

    /// Apply `trigger` with the sampler configured as `options`.
    ///
    /// # Errors
    ///
    /// Returns the provider error when starting the sampler fails (for
    /// example `PermissionDenied`); the state is left unchanged.
    pub async fn apply(
        &mut self,
        trigger: Trigger,
        observed_generation: u64,
        options: &SamplingOptions,
    ) -> Result<Transition> {
        let current = self.snapshot.generation;
        if observed_generation != current {
            debug!(
                ?trigger,
                observed = observed_generation,
                current,
                "discarding stale transition"
            );
            return Ok(Transition::Stale {
                observed: observed_generation,
                current,
            });
        }

        let from = self.snapshot.state;
        let Some(to) = from.next(trigger) else {
            return Ok(Transition::NotApplicable);
        };

        self.run_side_effects(from, to, options).await?;

        self.snapshot = TrackingSnapshot {
            state: to,
            generation: current + 1,
            since: self.clock.now(),
        };
        self.persist();
        info!(
            %from,
            %to,
            ?trigger,
            generation = self.snapshot.generation,
            "tracking state changed"
        );
        let _ = self.events.send(TrackerEvent::StateChanged {
            from,
            to,
            generation: self.snapshot.generation,
        });

        Ok(Transition::Applied {
            from,
            to,
            generation: self.snapshot.generation,
        })
    }

    /// Apply `trigger` under the current generation.
    pub async fn fire(&mut self, trigger: Trigger, options: &SamplingOptions) -> Result<Transition> {
        let generation = self.snapshot.generation;
        self.apply(trigger, generation, options).await
    }

    /// Retune a running sampler without a state change.
    pub async fn reconfigure(&mut self, options: &SamplingOptions) -> Result<()> {
        if !self.snapshot.state.expects_sampler() || self.options.as_ref() == Some(options) {
            return Ok(());
        }
        bounded(self.op_timeout, "reconfigure", self.provider.reconfigure(options)).await?;
        debug!(interval_secs = options.interval.as_secs(), "sampler reconfigured");
        self.options = Some(options.clone());
        Ok(())
    }

    async fn run_side_effects(
        &mut self,
        from: TrackingState,
        to: TrackingState,
        options: &SamplingOptions,
    ) -> Result<()> {
        match to {
            TrackingState::Active | TrackingState::Suspended if from.expects_sampler() => {
                let retuned =
                    bounded(self.op_timeout, "reconfigure", self.provider.reconfigure(options))
                        .await;
                if let Err(e) = retuned {
                    debug!("reconfigure failed, restarting sampler: {e}");
                    bounded(self.op_timeout, "start", self.provider.start_updates(options))
                        .await?;
                }
                self.options = Some(options.clone());
            }
            TrackingState::Active | TrackingState::Suspended => {
                bounded(self.op_timeout, "start", self.provider.start_updates(options)).await?;
                self.options = Some(options.clone());
            }
            TrackingState::Idle => {
                if let Err(e) =
                    bounded(self.op_timeout, "stop", self.provider.stop_updates()).await
                {
                    warn!("stopping sampler failed, treating as stopped: {e}");
                }
                self.options = None;
            }
            TrackingState::Recovering => {
                // Clear whatever the OS left behind before restarting.
                if let Err(e) =
                    bounded(self.op_timeout, "stop", self.provider.stop_updates()).await
                {
                    debug!("cleanup of killed sampler failed: {e}");
                }
                self.options = None;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TrackingMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingMachine")
            .field("snapshot", &self.snapshot)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

async fn bounded<F>(limit: Duration, op: &str, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TrackingError::TaskKilled(format!(
            "sampler {op} timed out after {}s",
            limit.as_secs()
        ))),
    }
}
