//! Fieldtrack: background location telemetry for enrolled mobile users.
//!
//! The engine samples device location only while the signed-in user is
//! eligible under an administrator-defined policy, delivers each sample to a
//! remote write endpoint, and keeps working through connectivity loss and
//! OS termination of the sampling task.
//!
//! # Architecture
//!
//! Independent actors share one [`service::TrackerEngine`]:
//! - **Sampling**: re-checks eligibility and reads a fix at the current cadence
//! - **Policy refresh**: re-fetches the tracking policy out of band
//! - **Drain**: replays the offline queue oldest-first with backoff
//! - **Watchdog**: notices a dead sampler and restarts it a bounded number of times
//!
//! All state changes go through the [`tracking::TrackingMachine`], guarded by
//! a generation counter so results of slow I/O never land on a newer state.

pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod identity;
pub mod platform;
pub mod policy;
pub mod recovery;
pub mod runtime;
pub mod sample;
pub mod service;
pub mod store;
pub mod sync;
pub mod tracker_dirs;
pub mod tracking;

pub use config::TrackerConfig;
pub use error::{Result, TrackingError};
pub use runtime::TrackerEvent;
pub use service::{Collaborators, LifecycleEvent, TrackerService};
