//! Remote write endpoint client.
//!
//! The endpoint upserts one document per identity, so re-sending an
//! unchanged fix overwrites rather than appends.

use crate::error::{Result, TrackingError};
use crate::identity::Identity;
use crate::sample::{AppState, DeviceInfo, LocationSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// JSON body of one upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub email: String,
    pub user_role: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub app_state: AppState,
    pub is_background: bool,
    pub device_info: DeviceInfo,
}

impl LocationPayload {
    #[must_use]
    pub fn new(identity: &Identity, sample: &LocationSample) -> Self {
        Self {
            email: identity.id.clone(),
            user_role: identity.role.clone(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            altitude: sample.altitude,
            speed: sample.speed,
            heading: sample.heading,
            timestamp: sample.captured_at,
            app_state: sample.app_state,
            is_background: sample.app_state == AppState::Background,
            device_info: sample.device.clone(),
        }
    }
}

/// Idempotent remote upsert.
///
/// Implementations return `NetworkFailure` for transient problems (the
/// sample is queued and retried) and `Rejected` for permanent ones (the
/// sample is dropped).
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn upsert(&self, payload: &LocationPayload) -> Result<()>;

    /// Cheap reachability check run before draining the offline queue.
    async fn probe(&self) -> bool {
        true
    }
}

/// Writer for the HTTP endpoint: `POST {base}/save`, probe `GET {base}/test`.
#[derive(Debug, Clone)]
pub struct HttpRemoteWriter {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteWriter {
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackingError::Config(format!("cannot build delivery client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client,
        })
    }
}

#[async_trait]
impl RemoteWriter for HttpRemoteWriter {
    async fn upsert(&self, payload: &LocationPayload) -> Result<()> {
        let url = format!("{}/save", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| TrackingError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, email = %payload.email, "location delivered");
            return Ok(());
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.unwrap_or_default();
        if is_transient(status) {
            let hint = retry_after
                .map(|after| format!(" (retry after {after})"))
                .unwrap_or_default();
            Err(TrackingError::NetworkFailure(format!("{status}{hint}: {body}")))
        } else if status.is_client_error() {
            Err(TrackingError::Rejected(format!("{status}: {body}")))
        } else {
            Err(TrackingError::NetworkFailure(format!("{status}: {body}")))
        }
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/test", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("connectivity probe failed: {e}");
                false
            }
        }
    }
}

/// Statuses worth retrying: server errors plus request timeout and rate
/// limiting. Every other 4xx refuses the payload itself.
fn is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Writer that only logs. Used when no endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRemoteWriter;

#[async_trait]
impl RemoteWriter for LogRemoteWriter {
    async fn upsert(&self, payload: &LocationPayload) -> Result<()> {
        info!(
            email = %payload.email,
            latitude = payload.latitude,
            longitude = payload.longitude,
            is_background = payload.is_background,
            "location sample (no endpoint configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::sample::LocationFix;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload(app_state: AppState) -> LocationPayload {
        let sample = LocationSample::from_fix(
            LocationFix::at(17.385, 78.4867, Utc::now()),
            app_state,
            DeviceInfo::default(),
        );
        LocationPayload::new(&Identity::new("Asha@Example.com", "Staff"), &sample)
    }

    fn writer(server: &MockServer) -> HttpRemoteWriter {
        HttpRemoteWriter::new(format!("{}/", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn payload_uses_wire_field_names() {
        let json = serde_json::to_value(payload(AppState::Background)).unwrap();
        assert_eq!(json["email"], "asha@example.com");
        assert_eq!(json["userRole"], "staff");
        assert_eq!(json["appState"], "background");
        assert_eq!(json["isBackground"], true);
        assert!(json.get("deviceInfo").is_some());
        assert!(json.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn success_posts_to_save() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/save"))
            .and(body_partial_json(serde_json::json!({ "email": "asha@example.com" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        writer(&server).upsert(&payload(AppState::Foreground)).await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = writer(&server)
            .upsert(&payload(AppState::Foreground))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn client_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Missing required fields"))
            .mount(&server)
            .await;

        let err = writer(&server)
            .upsert(&payload(AppState::Foreground))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::Rejected(msg) if msg.contains("Missing")));
    }

    #[tokio::test]
    async fn rate_limit_and_request_timeout_are_network_failures() {
        for status in [408, 429] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).insert_header("Retry-After", "30"))
                .mount(&server)
                .await;

            let err = writer(&server)
                .upsert(&payload(AppState::Foreground))
                .await
                .unwrap_err();
            assert!(
                matches!(&err, TrackingError::NetworkFailure(msg) if msg.contains("retry after 30")),
                "{status} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn probe_hits_test_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(writer(&server).probe().await);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_probe() {
        let writer =
            HttpRemoteWriter::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(!writer.probe().await);
        let err = writer.upsert(&payload(AppState::Foreground)).await.unwrap_err();
        assert!(matches!(err, TrackingError::NetworkFailure(_)));
    }
}
