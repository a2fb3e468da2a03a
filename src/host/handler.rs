//! Routes host commands to the tracker service.

use crate::error::{Result, TrackingError};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::identity::{Identity, StaticIdentityProvider};
use crate::runtime::TrackerEvent;
use crate::service::{LifecycleEvent, TrackerService};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Payload of `identity.set`. `null` signs the user out.
#[derive(Debug, Deserialize)]
struct IdentityPayload {
    email: String,
    role: String,
}

/// Dispatches decoded envelopes against a running [`TrackerService`].
pub struct HostCommandHandler {
    service: Arc<TrackerService>,
    identity: Arc<StaticIdentityProvider>,
}

impl std::fmt::Debug for HostCommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCommandHandler").finish_non_exhaustive()
    }
}

impl HostCommandHandler {
    pub fn new(service: Arc<TrackerService>, identity: Arc<StaticIdentityProvider>) -> Self {
        Self { service, identity }
    }

    pub fn service(&self) -> &Arc<TrackerService> {
        &self.service
    }

    /// Handle one envelope. Never fails; errors become error responses.
    pub async fn handle(&self, envelope: CommandEnvelope) -> ResponseEnvelope {
        if let Err(message) = envelope.validate() {
            return ResponseEnvelope::error(envelope.request_id, message);
        }
        let request_id = envelope.request_id.clone();
        match self.dispatch(envelope.command, &envelope.payload).await {
            Ok(payload) => ResponseEnvelope::ok(request_id, payload),
            Err(e) => {
                warn!(command = envelope.command.as_str(), error = %e, "host command failed");
                ResponseEnvelope::error(request_id, e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        command: CommandName,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        match command {
            CommandName::HostPing => Ok(serde_json::json!({ "pong": true })),
            CommandName::TrackerStart => {
                self.service.start().await?;
                self.status_json().await
            }
            CommandName::TrackerStop => {
                self.service.stop().await?;
                self.status_json().await
            }
            CommandName::TrackerStatus => self.status_json().await,
            CommandName::IdentitySet => {
                let identity = if payload.is_null() {
                    None
                } else {
                    let parsed: IdentityPayload = serde_json::from_value(payload.clone())
                        .map_err(|e| TrackingError::Config(format!("invalid identity payload: {e}")))?;
                    Some(Identity::new(parsed.email, parsed.role))
                };
                info!(signed_in = identity.is_some(), "identity updated by host");
                self.identity.set(identity);
                let state = self.service.on_identity_changed().await?;
                Ok(serde_json::json!({ "state": state }))
            }
            CommandName::LifecycleForeground => self.lifecycle(LifecycleEvent::Foreground).await,
            CommandName::LifecycleBackground => self.lifecycle(LifecycleEvent::Background).await,
            CommandName::LifecycleTerminating => {
                self.lifecycle(LifecycleEvent::Terminating).await
            }
        }
    }

    async fn lifecycle(&self, event: LifecycleEvent) -> Result<serde_json::Value> {
        let state = self.service.on_lifecycle(event).await?;
        Ok(serde_json::json!({ "state": state }))
    }

    async fn status_json(&self) -> Result<serde_json::Value> {
        let status = self.service.status().await;
        serde_json::to_value(status)
            .map_err(|e| TrackingError::Channel(format!("cannot encode status: {e}")))
    }
}

/// Wrap a tracker event for the wire. The event name is the serialized tag.
pub fn event_envelope(event: &TrackerEvent) -> Result<EventEnvelope> {
    let mut payload = serde_json::to_value(event)
        .map_err(|e| TrackingError::Channel(format!("cannot encode event: {e}")))?;
    let name = payload
        .as_object_mut()
        .and_then(|object| object.remove("event"))
        .and_then(|tag| tag.as_str().map(str::to_owned))
        .unwrap_or_else(|| "unknown".to_owned());
    Ok(EventEnvelope::new(
        uuid::Uuid::new_v4().to_string(),
        format!("tracker.{name}"),
        payload,
    ))
}
