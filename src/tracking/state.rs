//! Tracking states and the transitions allowed between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// Not sampling.
    #[default]
    Idle,
    /// Sampling at foreground cadence.
    Active,
    /// Sampling at background cadence without a foreground indicator.
    Suspended,
    /// The OS killed the sampling task; the supervisor is restarting it.
    Recovering,
}

impl TrackingState {
    /// States in which the OS sampling task is supposed to be alive.
    #[must_use]
    pub fn expects_sampler(self) -> bool {
        matches!(self, Self::Active | Self::Suspended)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Recovering => "recovering",
        }
    }
}

impl std::fmt::Display for TrackingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    BecameEligible,
    BecameIneligible,
    Backgrounded,
    Foregrounded,
    /// The supervisor found the sampling task dead.
    TaskKilled,
    RestartSucceeded,
    RecoveryExhausted,
}

impl TrackingState {
    /// Target of `trigger` from this state, or `None` if it does not apply.
    #[must_use]
    pub fn next(self, trigger: Trigger) -> Option<Self> {
        use Trigger::*;
        use TrackingState::*;
        match (self, trigger) {
            (Idle, BecameEligible) => Some(Active),
            (Active | Suspended | Recovering, BecameIneligible) => Some(Idle),
            (Active, Backgrounded) => Some(Suspended),
            (Suspended, Foregrounded) => Some(Active),
            (Active | Suspended, TaskKilled) => Some(Recovering),
            (Recovering, RestartSucceeded) => Some(Active),
            (Recovering, RecoveryExhausted) => Some(Idle),
            _ => None,
        }
    }
}

/// Persisted view of the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub state: TrackingState,
    /// Incremented on every completed transition.
    pub generation: u64,
    pub since: DateTime<Utc>,
}
