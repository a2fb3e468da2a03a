//! Versioned command/event envelopes exchanged with the host application.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Commands the host can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "tracker.start")]
    TrackerStart,
    #[serde(rename = "tracker.stop")]
    TrackerStop,
    #[serde(rename = "tracker.status")]
    TrackerStatus,
    #[serde(rename = "identity.set")]
    IdentitySet,
    #[serde(rename = "lifecycle.foreground")]
    LifecycleForeground,
    #[serde(rename = "lifecycle.background")]
    LifecycleBackground,
    #[serde(rename = "lifecycle.terminating")]
    LifecycleTerminating,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::TrackerStart => "tracker.start",
            Self::TrackerStop => "tracker.stop",
            Self::TrackerStatus => "tracker.status",
            Self::IdentitySet => "identity.set",
            Self::LifecycleForeground => "lifecycle.foreground",
            Self::LifecycleBackground => "lifecycle.background",
            Self::LifecycleTerminating => "lifecycle.terminating",
        }
    }
}

/// A versioned response envelope from tracker -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from host -> tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), String> {
        if self.v != EVENT_VERSION {
            return Err(format!(
                "unsupported contract version {}; expected {}",
                self.v, EVENT_VERSION
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err("request_id cannot be empty".to_owned());
        }
        Ok(())
    }
}

/// A versioned event envelope from tracker -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn command_name_uses_dotted_wire_format() {
        let json = serde_json::to_string(&CommandName::LifecycleBackground).unwrap();
        assert_eq!(json, "\"lifecycle.background\"");
        assert_eq!(CommandName::TrackerStart.as_str(), "tracker.start");
    }

    #[test]
    fn payload_may_be_omitted() {
        let envelope: CommandEnvelope =
            serde_json::from_str(r#"{"v":1,"request_id":"r1","command":"tracker.status"}"#)
                .expect("parse");
        assert_eq!(envelope.command, CommandName::TrackerStatus);
        assert!(envelope.payload.is_null());
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn validate_rejects_wrong_version_and_empty_id() {
        let mut envelope = CommandEnvelope::new("r1", CommandName::HostPing, serde_json::json!({}));
        envelope.v = 7;
        assert!(envelope.validate().is_err());
        let envelope = CommandEnvelope::new("  ", CommandName::HostPing, serde_json::json!({}));
        assert!(envelope.validate().is_err());
    }
}
