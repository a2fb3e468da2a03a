//! Events published by the tracker for the host application.
//!
//! Delivered over a `tokio::sync::broadcast` channel obtained from
//! [`TrackerService::subscribe`](crate::service::TrackerService::subscribe).
//! Dropping the receiver unsubscribes. Events are small and cloneable so
//! publishing never blocks an actor; a lagging subscriber loses the oldest
//! events rather than slowing the engine down.

use crate::policy::Eligibility;
use crate::tracking::TrackingState;
use serde::Serialize;

/// Something the user has to fix before tracking can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionIssue {
    /// OS location permission (foreground or background) is not granted.
    PermissionDenied,
    /// Device location services are switched off.
    ServiceDisabled,
}

/// Why a sample never reached the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropReason {
    /// Queued longer than the staleness threshold.
    Stale { age_secs: u64 },
    /// Evicted from a full offline queue.
    QueueOverflow,
    /// Failed delivery too many times.
    AttemptsExhausted { attempts: u32 },
    /// Permanently rejected by the endpoint.
    Rejected,
}

/// Events that describe what the tracker is doing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// The gate's answer flipped.
    EligibilityChanged {
        eligible: bool,
        reason: Eligibility,
    },
    /// The state machine completed a transition.
    StateChanged {
        from: TrackingState,
        to: TrackingState,
        generation: u64,
    },
    /// The host should send the user to a permission or settings screen.
    AttentionRequired { issue: AttentionIssue },
    /// A sample was discarded without delivery.
    SampleDropped { reason: DropReason },
    /// The supervisor gave up restarting the sampler.
    RecoveryExhausted { attempts: u32 },
}
