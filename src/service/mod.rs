//! Public entry point: [`TrackerService`].
//!
//! ```rust,ignore
//! let service = TrackerService::new(config, collaborators, StateStore::open_default())?;
//! let mut events = service.subscribe();
//! service.start().await?;
//! service.on_lifecycle(LifecycleEvent::Background).await?;
//! ```

mod actors;
mod engine;

pub use engine::{ReconcileCause, SampleTick, TrackerEngine, TrackerStatus};

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::identity::IdentityProvider;
use crate::platform::LocationProvider;
use crate::policy::PolicyProvider;
use crate::runtime::TrackerEvent;
use crate::store::{KEY_SERVICE_ENABLED, StateStore};
use crate::sync::RemoteWriter;
use crate::tracking::TrackingState;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// External systems the tracker consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub policy: Arc<dyn PolicyProvider>,
    pub location: Arc<dyn LocationProvider>,
    pub writer: Arc<dyn RemoteWriter>,
    pub clock: Arc<dyn Clock>,
}

/// App lifecycle signals delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Foreground,
    Background,
    /// The process is about to be killed; persist now.
    Terminating,
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Background location tracker.
pub struct TrackerService {
    engine: Arc<TrackerEngine>,
    store: StateStore,
    events: broadcast::Sender<TrackerEvent>,
    running: Mutex<Option<Running>>,
}

impl TrackerService {
    /// # Errors
    ///
    /// Returns `Config` if `config` fails validation.
    pub fn new(
        config: TrackerConfig,
        collaborators: Collaborators,
        store: StateStore,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let engine = Arc::new(TrackerEngine::new(
            config,
            collaborators,
            store.clone(),
            events.clone(),
        ));
        Ok(Self {
            engine,
            store,
            events,
            running: Mutex::new(None),
        })
    }

    /// Receive tracker events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// The shared engine, for driving ticks directly.
    pub fn engine(&self) -> &Arc<TrackerEngine> {
        &self.engine
    }

    /// Enable tracking and spawn the actors. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `ServiceDisabled` if the sampler
    /// cannot start right now. The actors keep running regardless and
    /// start the sampler once the user resolves the issue.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        self.engine.set_enabled(true).await;
        self.store.save_or_warn(KEY_SERVICE_ENABLED, &true);
        let initial = self.engine.reconcile(ReconcileCause::StartRequested).await;

        let cancel = CancellationToken::new();
        let handles = vec![
            tokio::spawn(actors::run_sampling(self.engine.clone(), cancel.child_token())),
            tokio::spawn(actors::run_policy_refresh(
                self.engine.clone(),
                cancel.child_token(),
            )),
            tokio::spawn(actors::run_drain(self.engine.clone(), cancel.child_token())),
            tokio::spawn(actors::run_watchdog(self.engine.clone(), cancel.child_token())),
        ];
        *running = Some(Running { cancel, handles });
        info!("tracker started");

        initial.map(|_| ())
    }

    /// Cancel the actors, stop the sampler and disable tracking.
    pub async fn stop(&self) -> Result<()> {
        let taken = self.running.lock().await.take();
        if let Some(Running { cancel, handles }) = taken {
            cancel.cancel();
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("actor ended abnormally: {e}");
                }
            }
        }
        self.engine.shutdown().await;
        self.store.save_or_warn(KEY_SERVICE_ENABLED, &false);
        info!("tracker stopped");
        Ok(())
    }

    /// Start again if tracking was enabled when the process last ran.
    /// Returns whether it was.
    pub async fn resume_if_enabled(&self) -> Result<bool> {
        let enabled = self
            .store
            .load::<bool>(KEY_SERVICE_ENABLED)?
            .unwrap_or(false);
        if enabled {
            info!("resuming previously enabled tracker");
            self.start().await?;
        }
        Ok(enabled)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// True while the sampler is supposed to be producing fixes.
    pub async fn is_tracking_active(&self) -> bool {
        self.engine.state().await.expects_sampler()
    }

    pub async fn state(&self) -> TrackingState {
        self.engine.state().await
    }

    pub async fn status(&self) -> TrackerStatus {
        self.engine.status().await
    }

    /// Re-check eligibility after the host signed a user in or out.
    pub async fn on_identity_changed(&self) -> Result<TrackingState> {
        self.engine.reconcile(ReconcileCause::IdentityChanged).await
    }

    /// Deliver an app lifecycle signal.
    pub async fn on_lifecycle(&self, event: LifecycleEvent) -> Result<TrackingState> {
        self.engine.on_lifecycle(event).await
    }
}

impl std::fmt::Debug for TrackerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerService")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
