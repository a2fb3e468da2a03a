//! TTL cache in front of a [`PolicyProvider`].
//!
//! Reads never touch the network unless the cached copy is missing,
//! expired, or a refresh is explicitly forced. A failed refresh keeps the
//! previous copy, however old, and flags the snapshot so the gate can
//! decide how much to trust it. Only one fetch runs at a time.

use super::{Policy, PolicyProvider};
use crate::clock::Clock;
use crate::config::PolicyConfig;
use crate::store::{KEY_POLICY_CACHE, StateStore};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Freshness of the cached policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyStatus {
    /// Younger than the TTL.
    Fresh,
    /// Older than the TTL (or loaded from disk without a stamp).
    Stale,
    /// Never fetched.
    Missing,
}

/// What a cache read returns.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub policy: Option<Arc<Policy>>,
    pub status: PolicyStatus,
    /// The most recent fetch attempt failed.
    pub refresh_failed: bool,
}

#[derive(Debug, Default)]
struct Slot {
    policy: Option<Arc<Policy>>,
    refresh_failed: bool,
}

pub struct PolicyCache {
    provider: Arc<dyn PolicyProvider>,
    clock: Arc<dyn Clock>,
    store: Option<StateStore>,
    ttl: Duration,
    fetch_timeout: Duration,
    slot: RwLock<Slot>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl PolicyCache {
    pub fn new(
        provider: Arc<dyn PolicyProvider>,
        clock: Arc<dyn Clock>,
        config: &PolicyConfig,
    ) -> Self {
        Self {
            provider,
            clock,
            store: None,
            ttl: config.ttl(),
            fetch_timeout: config.fetch_timeout(),
            slot: RwLock::new(Slot::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Persist successful fetches to `store` and seed the cache with the
    /// last known good policy found there.
    #[must_use]
    pub fn with_store(mut self, store: StateStore) -> Self {
        match store.load::<Policy>(KEY_POLICY_CACHE) {
            Ok(Some(policy)) => {
                debug!(refreshed_at = ?policy.refreshed_at, "loaded cached policy from disk");
                self.write_slot().policy = Some(Arc::new(policy));
            }
            Ok(None) => {}
            Err(e) => warn!("cannot read cached policy: {e}"),
        }
        self.store = Some(store);
        self
    }

    /// Current cache contents, without any I/O.
    pub fn peek(&self) -> PolicySnapshot {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        let status = match &slot.policy {
            None => PolicyStatus::Missing,
            Some(policy) if policy.is_stale(self.clock.now(), self.ttl) => PolicyStatus::Stale,
            Some(_) => PolicyStatus::Fresh,
        };
        PolicySnapshot {
            policy: slot.policy.clone(),
            status,
            refresh_failed: slot.refresh_failed,
        }
    }

    /// Return the policy, fetching first when the cache is not fresh or
    /// `force_refresh` is set. Never fails: on fetch error the existing
    /// copy is returned with `refresh_failed` set.
    pub async fn get(&self, force_refresh: bool) -> PolicySnapshot {
        if !force_refresh {
            let snapshot = self.peek();
            if snapshot.status == PolicyStatus::Fresh {
                return snapshot;
            }
        }

        let _guard = self.refresh_lock.lock().await;
        if !force_refresh {
            // Another caller may have refreshed while we waited.
            let snapshot = self.peek();
            if snapshot.status == PolicyStatus::Fresh {
                return snapshot;
            }
        }

        self.fetch().await;
        self.peek()
    }

    /// Force a fetch. Returns whether it succeeded.
    pub async fn refresh(&self) -> bool {
        !self.get(true).await.refresh_failed
    }

    async fn fetch(&self) {
        let outcome = tokio::time::timeout(self.fetch_timeout, self.provider.fetch_policy()).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(crate::error::TrackingError::PolicyFetchFailure(format!(
                "timed out after {}s",
                self.fetch_timeout.as_secs()
            ))),
        };

        match result {
            Ok(mut policy) => {
                policy.refreshed_at = Some(self.clock.now());
                if let Some(store) = &self.store {
                    store.save_or_warn(KEY_POLICY_CACHE, &policy);
                }
                info!(
                    roles = policy.authorized_roles.len(),
                    working_days = policy.working_days.len(),
                    holidays = policy.holidays.len(),
                    "policy refreshed"
                );
                let mut slot = self.write_slot();
                slot.policy = Some(Arc::new(policy));
                slot.refresh_failed = false;
            }
            Err(e) => {
                let mut slot = self.write_slot();
                warn!(
                    has_cached = slot.policy.is_some(),
                    "policy refresh failed, keeping cached copy: {e}"
                );
                slot.refresh_failed = true;
            }
        }
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for PolicyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyCache")
            .field("ttl", &self.ttl)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}
