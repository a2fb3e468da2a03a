//! Eligibility gate: policy + identity + wall clock → "track now?".
//!
//! [`evaluate`] is the pure decision. [`EligibilityGate`] wraps it with the
//! policy cache, the configured fail mode, and a short memo so that
//! several actors asking within the same minute share one answer.

use super::{Policy, PolicyCache, PolicyStatus};
use crate::clock::Clock;
use crate::config::{FailMode, PolicyConfig};
use crate::identity::Identity;
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// The gate's answer together with the reason for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    /// The policy could not be confirmed and the gate fails open.
    FailedOpen,
    NoIdentity,
    RoleNotAuthorized,
    Holiday,
    NonWorkingDay,
    OutsideWindow,
    /// The policy could not be confirmed and the gate fails closed.
    FailedClosed,
}

impl Eligibility {
    #[must_use]
    pub fn allows(self) -> bool {
        matches!(self, Self::Eligible | Self::FailedOpen)
    }
}

/// Decide eligibility from a policy, without I/O or side effects.
///
/// Checks, in order: an identity is present, its role is authorized, the
/// date is not a holiday, the weekday has a working window, and `now`
/// falls inside that window.
#[must_use]
pub fn evaluate(policy: &Policy, identity: Option<&Identity>, now: NaiveDateTime) -> Eligibility {
    let Some(identity) = identity else {
        return Eligibility::NoIdentity;
    };
    if !policy.authorizes(&identity.role) {
        return Eligibility::RoleNotAuthorized;
    }
    calendar(policy, now)
}

/// The holiday and working-window part of [`evaluate`].
fn calendar(policy: &Policy, now: NaiveDateTime) -> Eligibility {
    if policy.is_holiday(now.date()) {
        return Eligibility::Holiday;
    }
    let Some(window) = policy.working_window(now.weekday()) else {
        return Eligibility::NonWorkingDay;
    };
    if window.contains(now.time()) {
        Eligibility::Eligible
    } else {
        Eligibility::OutsideWindow
    }
}

#[derive(Debug)]
struct Memo {
    identity: Option<Identity>,
    minute: NaiveDateTime,
    computed_at: DateTime<Utc>,
    answer: Eligibility,
}

/// Cached, fail-mode aware front of [`evaluate`].
pub struct EligibilityGate {
    cache: Arc<PolicyCache>,
    clock: Arc<dyn Clock>,
    fail_mode: FailMode,
    memo_ttl: Duration,
    memo: Mutex<Option<Memo>>,
}

impl EligibilityGate {
    pub fn new(cache: Arc<PolicyCache>, clock: Arc<dyn Clock>, config: &PolicyConfig) -> Self {
        Self {
            cache,
            clock,
            fail_mode: config.fail_mode,
            memo_ttl: config.gate_memo(),
            memo: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    /// Drop the memoized answer so the next check recomputes.
    pub fn invalidate(&self) {
        *self.memo.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Eligibility at the clock's current local time.
    pub async fn check(&self, identity: Option<&Identity>) -> Eligibility {
        let now = self.clock.local_now();
        self.check_at(identity, now).await
    }

    pub async fn should_track(&self, identity: Option<&Identity>, now: NaiveDateTime) -> bool {
        self.check_at(identity, now).await.allows()
    }

    /// Eligibility at local time `now`.
    ///
    /// A positive answer from a stale policy is trusted. A negative one
    /// forces a refresh first. If that refresh fails, the configured fail
    /// mode decides: failing open overrides the authorization check only,
    /// the calendar of the last known policy always stands.
    pub async fn check_at(&self, identity: Option<&Identity>, now: NaiveDateTime) -> Eligibility {
        let minute = truncate_to_minute(now);
        if let Some(answer) = self.memoized(identity, minute) {
            return answer;
        }

        let answer = self.decide(identity, now).await;
        debug!(?answer, identity = identity.map(|i| i.id.as_str()), "eligibility computed");

        *self.memo.lock().unwrap_or_else(|e| e.into_inner()) = Some(Memo {
            identity: identity.cloned(),
            minute,
            computed_at: self.clock.now(),
            answer,
        });
        answer
    }

    async fn decide(&self, identity: Option<&Identity>, now: NaiveDateTime) -> Eligibility {
        let mut snapshot = self.cache.peek();
        if snapshot.status == PolicyStatus::Missing {
            snapshot = self.cache.get(false).await;
        }

        let Some(policy) = snapshot.policy else {
            return match (identity, self.fail_mode) {
                (None, _) => Eligibility::NoIdentity,
                (Some(_), FailMode::Open) => Eligibility::FailedOpen,
                (Some(_), FailMode::Closed) => Eligibility::FailedClosed,
            };
        };

        let answer = evaluate(&policy, identity, now);
        if answer.allows()
            || answer == Eligibility::NoIdentity
            || snapshot.status == PolicyStatus::Fresh
        {
            return answer;
        }

        let refreshed = self.cache.get(true).await;
        match refreshed.policy {
            Some(policy) if !refreshed.refresh_failed => evaluate(&policy, identity, now),
            _ => match self.fail_mode {
                FailMode::Closed => answer,
                FailMode::Open => match calendar(&policy, now) {
                    Eligibility::Eligible => Eligibility::FailedOpen,
                    boundary => boundary,
                },
            },
        }
    }

    fn memoized(&self, identity: Option<&Identity>, minute: NaiveDateTime) -> Option<Eligibility> {
        let guard = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        let memo = guard.as_ref()?;
        let fresh = crate::clock::elapsed(memo.computed_at, self.clock.now()) < self.memo_ttl;
        (fresh && memo.minute == minute && memo.identity.as_ref() == identity).then_some(memo.answer)
    }
}

impl std::fmt::Debug for EligibilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EligibilityGate")
            .field("cache", &self.cache)
            .field("fail_mode", &self.fail_mode)
            .field("memo_ttl", &self.memo_ttl)
            .finish_non_exhaustive()
    }
}

fn truncate_to_minute(now: NaiveDateTime) -> NaiveDateTime {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}
