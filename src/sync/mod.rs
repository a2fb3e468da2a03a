//! Getting samples to the remote endpoint, online or not.

mod delivery;
mod pipeline;
mod queue;

pub use delivery::{HttpRemoteWriter, LocationPayload, LogRemoteWriter, RemoteWriter};
pub use pipeline::{DrainReport, NetworkBackoff, SubmitOutcome, SyncPipeline};
pub use queue::{OfflineQueue, OfflineQueueEntry};
