//! Shared harness for integration tests.
//!
//! Builds a tracker over a temp-dir store with a manual clock, a simulated
//! sensor and a recording writer, and drives the tick methods directly so
//! every scenario is deterministic.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use fieldtrack::clock::ManualClock;
use fieldtrack::config::TrackerConfig;
use fieldtrack::error::{Result, TrackingError};
use fieldtrack::identity::{Identity, StaticIdentityProvider};
use fieldtrack::platform::SimulatedLocationProvider;
use fieldtrack::policy::StaticPolicyProvider;
use fieldtrack::service::{ReconcileCause, TrackerEngine};
use fieldtrack::store::StateStore;
use fieldtrack::sync::{LocationPayload, RemoteWriter};
use fieldtrack::tracking::TrackingState;
use fieldtrack::{Collaborators, TrackerEvent, TrackerService};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Remote writer that records what it delivered and can go offline.
#[derive(Debug, Default)]
pub(crate) struct RecordingWriter {
    offline: AtomicBool,
    delivered: Mutex<Vec<LocationPayload>>,
}

impl RecordingWriter {
    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn delivered(&self) -> Vec<LocationPayload> {
        self.delivered.lock().unwrap().clone()
    }

    pub(crate) fn latitudes(&self) -> Vec<f64> {
        self.delivered().iter().map(|p| p.latitude).collect()
    }
}

#[async_trait]
impl RemoteWriter for RecordingWriter {
    async fn upsert(&self, payload: &LocationPayload) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TrackingError::NetworkFailure("offline".to_owned()));
        }
        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn probe(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

/// Monday 2 June 2025 at `hour:minute`, local.
pub(crate) fn monday(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 2)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub(crate) struct Harness {
    pub(crate) service: TrackerService,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) sim: Arc<SimulatedLocationProvider>,
    pub(crate) writer: Arc<RecordingWriter>,
    pub(crate) policy: Arc<StaticPolicyProvider>,
    pub(crate) identity: Arc<StaticIdentityProvider>,
    pub(crate) events: broadcast::Receiver<TrackerEvent>,
    pub(crate) dir: tempfile::TempDir,
}

impl Harness {
    /// Staff member signed in, Monday 10:00, default policy and config.
    pub(crate) fn new() -> Self {
        Self::at(monday(10, 0))
    }

    pub(crate) fn at(local: NaiveDateTime) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        Self::build(dir, local, TrackerConfig::default())
    }

    pub(crate) fn build(dir: tempfile::TempDir, local: NaiveDateTime, config: TrackerConfig) -> Self {
        let clock = Arc::new(ManualClock::at_local(local));
        let sim = Arc::new(SimulatedLocationProvider::new(clock.clone(), 17.0, 78.0));
        let writer = Arc::new(RecordingWriter::default());
        let policy = Arc::new(StaticPolicyProvider::default());
        let identity = Arc::new(StaticIdentityProvider::new(Some(Identity::new(
            "asha@example.com",
            "staff",
        ))));
        let service = open_service(dir.path(), config, &clock, &sim, &writer, &policy, &identity);
        let events = service.subscribe();
        Self {
            service,
            clock,
            sim,
            writer,
            policy,
            identity,
            events,
            dir,
        }
    }

    /// A second service over the same store and collaborators, as after a
    /// process restart.
    pub(crate) fn reopen(&self, sim: &Arc<SimulatedLocationProvider>) -> TrackerService {
        open_service(
            self.dir.path(),
            TrackerConfig::default(),
            &self.clock,
            sim,
            &self.writer,
            &self.policy,
            &self.identity,
        )
    }

    pub(crate) fn engine(&self) -> &Arc<TrackerEngine> {
        self.service.engine()
    }

    /// Enable the engine without spawning actors and run the start check.
    pub(crate) async fn enable(&self) -> TrackingState {
        self.engine().set_enabled(true).await;
        self.engine()
            .reconcile(ReconcileCause::StartRequested)
            .await
            .expect("start check")
    }

    pub(crate) async fn state(&self) -> TrackingState {
        self.service.state().await
    }

    pub(crate) fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    pub(crate) fn drain_events(&mut self) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn open_service(
    root: &Path,
    config: TrackerConfig,
    clock: &Arc<ManualClock>,
    sim: &Arc<SimulatedLocationProvider>,
    writer: &Arc<RecordingWriter>,
    policy: &Arc<StaticPolicyProvider>,
    identity: &Arc<StaticIdentityProvider>,
) -> TrackerService {
    let collaborators = Collaborators {
        identity: identity.clone(),
        policy: policy.clone(),
        location: sim.clone(),
        writer: writer.clone(),
        clock: clock.clone(),
    };
    TrackerService::new(config, collaborators, StateStore::new(root)).expect("build service")
}
