//! Error types for the location telemetry engine.

/// Top-level error type for the tracker.
///
/// The first six variants form the failure taxonomy the engine reasons
/// about. Only [`PermissionDenied`](TrackingError::PermissionDenied) and
/// [`ServiceDisabled`](TrackingError::ServiceDisabled) are surfaced to the
/// host application; everything else is absorbed by the pipeline, the
/// offline queue, or the recovery supervisor.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    /// OS location permission is missing. Fatal until the user grants it.
    #[error("location permission denied: {0}")]
    PermissionDenied(String),

    /// Device location services are switched off. Fatal until re-enabled.
    #[error("location services disabled")]
    ServiceDisabled,

    /// Remote delivery failed (timeout, 5xx, 408, 429, offline).
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The sensor did not produce a fix within the allotted time.
    #[error("sensor timed out after {0}s")]
    SensorTimeout(u64),

    /// The OS sampling task is no longer running.
    #[error("sampling task killed: {0}")]
    TaskKilled(String),

    /// The policy document could not be fetched.
    #[error("policy fetch failed: {0}")]
    PolicyFetchFailure(String),

    /// Remote endpoint rejected the payload permanently (4xx other than
    /// request timeout and rate limiting).
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// No authenticated identity is available.
    #[error("no authenticated identity")]
    NoIdentity,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Persisted state could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl TrackingError {
    /// Errors that need user action before tracking can proceed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::ServiceDisabled)
    }

    /// Errors the engine absorbs and retries (boundedly) on its own.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure(_)
                | Self::SensorTimeout(_)
                | Self::TaskKilled(_)
                | Self::PolicyFetchFailure(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TrackingError>;
