//! Headless tracker host for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! dispatches them to the tracker, and writes `ResponseEnvelope` and
//! `EventEnvelope` messages to stdout.
//!
//! Diagnostics go to stderr and to a daily log file under the tracker's
//! logs directory so that stdout remains a clean JSON protocol channel.
//!
//! Environment:
//! - `FIELDTRACK_CONFIG`: config file path (defaults to the platform config dir)
//! - `FIELDTRACK_EMAIL` / `FIELDTRACK_ROLE`: identity to sign in with at launch
//! - `RUST_LOG`: tracing filter (defaults to `info`)

use fieldtrack::clock::SystemClock;
use fieldtrack::config::TrackerConfig;
use fieldtrack::host::HostCommandHandler;
use fieldtrack::host::stdio::run_stdio_bridge;
use fieldtrack::identity::{Identity, StaticIdentityProvider};
use fieldtrack::platform::SimulatedLocationProvider;
use fieldtrack::policy::{HttpPolicyProvider, PolicyProvider, StaticPolicyProvider};
use fieldtrack::store::StateStore;
use fieldtrack::sync::{HttpRemoteWriter, LogRemoteWriter, RemoteWriter};
use fieldtrack::{Collaborators, TrackerService, tracker_dirs};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

// Simulated sensor origin until a platform provider is wired in.
const DEFAULT_LATITUDE: f64 = 17.385;
const DEFAULT_LONGITUDE: f64 = 78.4867;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logs_dir = tracker_dirs::logs_dir();
    std::fs::create_dir_all(&logs_dir)?;
    let (file_writer, _log_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&logs_dir, "fieldtrack.log"));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    tracing::info!("fieldtrack-host starting");

    let config = load_config()?;
    let identity = Arc::new(StaticIdentityProvider::new(identity_from_env()));
    let clock = Arc::new(SystemClock);

    let writer: Arc<dyn RemoteWriter> = match &config.sync.endpoint {
        Some(endpoint) => Arc::new(HttpRemoteWriter::new(
            endpoint.clone(),
            config.sync.request_timeout(),
        )?),
        None => {
            tracing::warn!("no sync endpoint configured; samples will only be logged");
            Arc::new(LogRemoteWriter)
        }
    };
    let policy: Arc<dyn PolicyProvider> = match &config.policy.url {
        Some(url) => Arc::new(HttpPolicyProvider::new(
            url.clone(),
            config.policy.fetch_timeout(),
        )?),
        None => Arc::new(StaticPolicyProvider::default()),
    };

    let collaborators = Collaborators {
        identity: identity.clone(),
        policy,
        location: Arc::new(SimulatedLocationProvider::new(
            clock.clone(),
            DEFAULT_LATITUDE,
            DEFAULT_LONGITUDE,
        )),
        writer,
        clock,
    };
    let service = Arc::new(TrackerService::new(
        config,
        collaborators,
        StateStore::open_default(),
    )?);

    match service.resume_if_enabled().await {
        Ok(true) => tracing::info!("tracking resumed from previous session"),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "could not resume tracking"),
    }

    run_stdio_bridge(HostCommandHandler::new(service, identity))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "fieldtrack-host exited with error");
            anyhow::anyhow!("fieldtrack-host failed: {e}")
        })?;

    tracing::info!("fieldtrack-host shut down cleanly");
    Ok(())
}

fn load_config() -> anyhow::Result<TrackerConfig> {
    let path = std::env::var_os("FIELDTRACK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(TrackerConfig::default_config_path);
    if path.exists() {
        tracing::info!(path = %path.display(), "loading config");
        Ok(TrackerConfig::from_file(&path)?)
    } else {
        tracing::info!(path = %path.display(), "no config file; using defaults");
        Ok(TrackerConfig::default())
    }
}

fn identity_from_env() -> Option<Identity> {
    let email = std::env::var("FIELDTRACK_EMAIL").ok()?;
    let role = std::env::var("FIELDTRACK_ROLE").unwrap_or_else(|_| "staff".to_owned());
    Some(Identity::new(email, role))
}
