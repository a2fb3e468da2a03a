//! Sample delivery: dedup, live upsert, offline queue and drain.
//!
//! Network calls run without holding the pipeline lock. Queued entries stay
//! at the head of the queue while their delivery is in flight and are
//! removed only once acknowledged, so a live sample can never overtake an
//! older queued one.

use super::{LocationPayload, OfflineQueue, OfflineQueueEntry, RemoteWriter};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{Result, TrackingError};
use crate::identity::Identity;
use crate::runtime::{DropReason, TrackerEvent};
use crate::sample::LocationSample;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};
use tracing::{debug, info, warn};

/// Exponential retry delay for network failures.
#[derive(Debug, Clone)]
pub struct NetworkBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl NetworkBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
            next_attempt_at: None,
        }
    }

    /// Delay that the next failure will impose.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Duration {
        let delay = self.next_delay();
        self.failures = self.failures.saturating_add(1);
        self.next_attempt_at = chrono::Duration::from_std(delay).ok().map(|d| now + d);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.next_attempt_at = None;
    }

    #[must_use]
    pub fn ready(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| now >= at)
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// What happened to a submitted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Same coordinates as the last reported sample; no I/O.
    Duplicate,
    Delivered,
    /// Appended to the offline queue.
    Queued,
    /// Permanently refused by the endpoint.
    Rejected,
}

/// Summary of one drain run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub dropped: usize,
    pub remaining: usize,
    /// The run did not attempt delivery (backoff pending or probe failed).
    pub skipped: bool,
}

#[derive(Debug)]
struct SyncState {
    queue: OfflineQueue,
    last_delivered: Option<LocationSample>,
    backoff: NetworkBackoff,
}

impl SyncState {
    /// The newest sample handed to the endpoint or waiting in the queue.
    fn last_reported(&self) -> Option<&LocationSample> {
        self.queue
            .back()
            .map(|entry| &entry.sample)
            .or(self.last_delivered.as_ref())
    }
}

pub struct SyncPipeline {
    writer: Arc<dyn RemoteWriter>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<TrackerEvent>,
    request_timeout: Duration,
    staleness: Duration,
    max_entry_attempts: u32,
    state: Mutex<SyncState>,
    drain_wake: Notify,
}

impl SyncPipeline {
    pub fn new(
        writer: Arc<dyn RemoteWriter>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<TrackerEvent>,
        queue: OfflineQueue,
        config: &SyncConfig,
    ) -> Self {
        Self {
            writer,
            clock,
            events,
            request_timeout: config.request_timeout(),
            staleness: config.staleness(),
            max_entry_attempts: config.max_entry_attempts.max(1),
            state: Mutex::new(SyncState {
                queue,
                last_delivered: None,
                backoff: NetworkBackoff::new(
                    Duration::from_secs(config.retry_base_secs),
                    Duration::from_secs(config.retry_max_secs),
                ),
            }),
            drain_wake: Notify::new(),
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Captured-at timestamps of the queued samples, oldest first.
    pub async fn queued_timestamps(&self) -> Vec<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .queue
            .iter()
            .map(|e| e.sample.captured_at)
            .collect()
    }

    /// Resolves when a submit asks for the queue to be drained.
    pub async fn drain_requested(&self) {
        self.drain_wake.notified().await;
    }

    /// Deliver one freshly captured sample.
    pub async fn submit(&self, identity: &Identity, sample: LocationSample) -> SubmitOutcome {
        {
            let mut state = self.state.lock().await;
            if state
                .last_reported()
                .is_some_and(|last| last.same_position(&sample))
            {
                debug!(
                    latitude = sample.latitude,
                    longitude = sample.longitude,
                    "unchanged position, skipping delivery"
                );
                return SubmitOutcome::Duplicate;
            }
            if !state.queue.is_empty() {
                self.enqueue(&mut state, identity.clone(), sample);
                self.drain_wake.notify_one();
                return SubmitOutcome::Queued;
            }
        }

        let payload = LocationPayload::new(identity, &sample);
        let result = self.deliver(&payload).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(()) => {
                state.last_delivered = Some(sample);
                state.backoff.reset();
                SubmitOutcome::Delivered
            }
            Err(TrackingError::Rejected(reason)) => {
                warn!(%reason, "sample rejected by endpoint, dropping");
                self.dropped(DropReason::Rejected);
                SubmitOutcome::Rejected
            }
            Err(e) => {
                let delay = state.backoff.record_failure(self.clock.now());
                info!(
                    retry_in_secs = delay.as_secs(),
                    "live delivery failed, queueing sample: {e}"
                );
                self.enqueue(&mut state, identity.clone(), sample);
                self.drain_wake.notify_one();
                SubmitOutcome::Queued
            }
        }
    }

    /// Retry queued samples in FIFO order until the queue is empty or a
    /// delivery fails.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        {
            let state = self.state.lock().await;
            if state.queue.is_empty() {
                return report;
            }
            if !state.backoff.ready(self.clock.now()) {
                report.skipped = true;
                report.remaining = state.queue.len();
                return report;
            }
        }

        let reachable = tokio::time::timeout(self.request_timeout, self.writer.probe())
            .await
            .unwrap_or(false);
        if !reachable {
            let mut state = self.state.lock().await;
            let delay = state.backoff.record_failure(self.clock.now());
            debug!(retry_in_secs = delay.as_secs(), "endpoint unreachable, drain skipped");
            report.skipped = true;
            report.remaining = state.queue.len();
            return report;
        }

        loop {
            let entry = {
                let mut state = self.state.lock().await;
                match self.next_deliverable(&mut state, &mut report) {
                    Some(entry) => entry,
                    None => break,
                }
            };

            let payload = LocationPayload::new(&entry.identity, &entry.sample);
            let result = self.deliver(&payload).await;

            let mut state = self.state.lock().await;
            match result {
                Ok(()) => {
                    state.queue.pop_if(entry.id);
                    state.last_delivered = Some(entry.sample);
                    state.backoff.reset();
                    report.delivered += 1;
                }
                Err(TrackingError::Rejected(reason)) => {
                    warn!(%reason, entry = %entry.id, "queued sample rejected, dropping");
                    state.queue.pop_if(entry.id);
                    self.dropped(DropReason::Rejected);
                    report.dropped += 1;
                }
                Err(e) => {
                    match state.queue.record_failure(entry.id) {
                        Some(attempts) if attempts >= self.max_entry_attempts => {
                            warn!(entry = %entry.id, attempts, "giving up on queued sample");
                            state.queue.pop_if(entry.id);
                            self.dropped(DropReason::AttemptsExhausted { attempts });
                            report.dropped += 1;
                        }
                        Some(_) => {}
                        // Evicted by overflow while in flight; already reported.
                        None => debug!(entry = %entry.id, "failed entry no longer queued"),
                    }
                    let delay = state.backoff.record_failure(self.clock.now());
                    info!(
                        retry_in_secs = delay.as_secs(),
                        queue_len = state.queue.len(),
                        "drain interrupted: {e}"
                    );
                    break;
                }
            }
        }

        report.remaining = self.state.lock().await.queue.len();
        if report.delivered > 0 || report.dropped > 0 {
            info!(
                delivered = report.delivered,
                dropped = report.dropped,
                remaining = report.remaining,
                "offline queue drained"
            );
        }
        report
    }

    /// Head of the queue, after discarding stale entries from the front.
    fn next_deliverable(
        &self,
        state: &mut SyncState,
        report: &mut DrainReport,
    ) -> Option<OfflineQueueEntry> {
        let now = self.clock.now();
        loop {
            let head = state.queue.front()?.clone();
            let age = crate::clock::elapsed(head.sample.captured_at, now);
            if age <= self.staleness {
                return Some(head);
            }
            warn!(
                entry = %head.id,
                age_secs = age.as_secs(),
                captured_at = %head.sample.captured_at,
                "dropping stale queued sample"
            );
            state.queue.pop_if(head.id);
            self.dropped(DropReason::Stale {
                age_secs: age.as_secs(),
            });
            report.dropped += 1;
        }
    }

    fn enqueue(&self, state: &mut SyncState, identity: Identity, sample: LocationSample) {
        let entry = OfflineQueueEntry::new(identity, sample, self.clock.now());
        if let Some(evicted) = state.queue.push(entry) {
            warn!(
                entry = %evicted.id,
                capacity = state.queue.capacity(),
                "offline queue full, evicted oldest sample"
            );
            self.dropped(DropReason::QueueOverflow);
        }
        debug!(queue_len = state.queue.len(), "sample queued");
    }

    async fn deliver(&self, payload: &LocationPayload) -> Result<()> {
        match tokio::time::timeout(self.request_timeout, self.writer.upsert(payload)).await {
            Ok(result) => result,
            Err(_) => Err(TrackingError::NetworkFailure(format!(
                "delivery timed out after {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }

    fn dropped(&self, reason: DropReason) {
        let _ = self.events.send(TrackerEvent::SampleDropped { reason });
    }
}

impl std::fmt::Debug for SyncPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPipeline")
            .field("request_timeout", &self.request_timeout)
            .field("staleness", &self.staleness)
            .field("max_entry_attempts", &self.max_entry_attempts)
            .finish_non_exhaustive()
    }
}
