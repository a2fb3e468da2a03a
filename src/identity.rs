//! Authenticated identity consumed by the eligibility gate.
//!
//! Session management lives in the host application; the tracker only asks
//! "who is signed in, and with which role" through [`IdentityProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// The signed-in user as far as tracking is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable key used for the remote upsert (the user's email in practice).
    pub id: String,
    /// Role name, compared case-insensitively against the policy.
    pub role: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_ascii_lowercase(),
            role: role.into().trim().to_ascii_lowercase(),
        }
    }
}

/// Returns the current authenticated identity, if any.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_identity(&self) -> Option<Identity>;
}

/// Identity provider backed by a value the host sets on sign-in/sign-out.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    identity: RwLock<Option<Identity>>,
}

impl StaticIdentityProvider {
    #[must_use]
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity: RwLock::new(identity),
        }
    }

    /// Replace the signed-in identity (`None` on sign-out).
    pub fn set(&self, identity: Option<Identity>) {
        let mut guard = self.identity.write().unwrap_or_else(|e| e.into_inner());
        *guard = identity;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn current_identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
