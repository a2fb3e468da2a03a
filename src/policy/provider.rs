//! Sources of the eligibility policy.

use super::Policy;
use crate::error::{Result, TrackingError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Fetches the current policy document. May fail transiently.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn fetch_policy(&self) -> Result<Policy>;
}

/// In-memory provider. Serves a fixed policy, or fails while marked offline.
#[derive(Debug)]
pub struct StaticPolicyProvider {
    inner: Mutex<StaticState>,
}

#[derive(Debug)]
struct StaticState {
    policy: Policy,
    failing: bool,
    fetches: u32,
}

impl StaticPolicyProvider {
    #[must_use]
    pub fn new(policy: Policy) -> Self {
        Self {
            inner: Mutex::new(StaticState {
                policy,
                failing: false,
                fetches: 0,
            }),
        }
    }

    /// Replace the served policy.
    pub fn set_policy(&self, policy: Policy) {
        self.lock().policy = policy;
    }

    /// While `true`, every fetch returns `PolicyFetchFailure`.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Number of fetch attempts so far, failed ones included.
    #[must_use]
    pub fn fetch_count(&self) -> u32 {
        self.lock().fetches
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StaticPolicyProvider {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

#[async_trait]
impl PolicyProvider for StaticPolicyProvider {
    async fn fetch_policy(&self) -> Result<Policy> {
        let mut state = self.lock();
        state.fetches += 1;
        if state.failing {
            return Err(TrackingError::PolicyFetchFailure(
                "policy source unavailable".to_owned(),
            ));
        }
        Ok(state.policy.clone())
    }
}

/// Reads the policy as JSON from a URL.
#[derive(Debug, Clone)]
pub struct HttpPolicyProvider {
    url: String,
    client: reqwest::Client,
}

impl HttpPolicyProvider {
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackingError::Config(format!("cannot build policy client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl PolicyProvider for HttpPolicyProvider {
    async fn fetch_policy(&self) -> Result<Policy> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TrackingError::PolicyFetchFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackingError::PolicyFetchFailure(format!(
                "policy endpoint returned {status}"
            )));
        }

        response
            .json::<Policy>()
            .await
            .map_err(|e| TrackingError::PolicyFetchFailure(format!("malformed policy: {e}")))
    }
}
