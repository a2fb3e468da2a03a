//! Durable, bounded FIFO of samples waiting for delivery.

use crate::identity::Identity;
use crate::sample::LocationSample;
use crate::store::{KEY_OFFLINE_QUEUE, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};
use uuid::Uuid;

/// A sample that failed live delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueEntry {
    pub id: Uuid,
    /// Who the sample belongs to, fixed at capture time.
    pub identity: Identity,
    pub sample: LocationSample,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

impl OfflineQueueEntry {
    #[must_use]
    pub fn new(identity: Identity, sample: LocationSample, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            sample,
            enqueued_at,
            attempts: 0,
        }
    }
}

/// Bounded FIFO. Pushing past capacity evicts the oldest entry.
///
/// With a store attached every mutation is written through.
#[derive(Debug)]
pub struct OfflineQueue {
    entries: VecDeque<OfflineQueueEntry>,
    capacity: usize,
    store: Option<StateStore>,
}

impl OfflineQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            store: None,
        }
    }

    /// Queue backed by `store`, restoring any entries persisted there.
    #[must_use]
    pub fn load(store: StateStore, capacity: usize) -> Self {
        let mut entries: VecDeque<OfflineQueueEntry> =
            match store.load::<VecDeque<OfflineQueueEntry>>(KEY_OFFLINE_QUEUE) {
                Ok(Some(entries)) => entries,
                Ok(None) => VecDeque::new(),
                Err(e) => {
                    warn!("cannot read offline queue, starting empty: {e}");
                    VecDeque::new()
                }
            };
        let capacity = capacity.max(1);
        while entries.len() > capacity {
            entries.pop_front();
        }
        if !entries.is_empty() {
            debug!(queue_len = entries.len(), "restored offline queue");
        }
        Self {
            entries,
            capacity,
            store: Some(store),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn front(&self) -> Option<&OfflineQueueEntry> {
        self.entries.front()
    }

    pub fn back(&self) -> Option<&OfflineQueueEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OfflineQueueEntry> {
        self.entries.iter()
    }

    /// Append an entry. Returns the evicted oldest entry when full.
    pub fn push(&mut self, entry: OfflineQueueEntry) -> Option<OfflineQueueEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        self.persist();
        evicted
    }

    /// Remove the head if it is the entry with `id`.
    pub fn pop_if(&mut self, id: Uuid) -> Option<OfflineQueueEntry> {
        if self.entries.front().map(|e| e.id) != Some(id) {
            return None;
        }
        let popped = self.entries.pop_front();
        self.persist();
        popped
    }

    /// Count one failed attempt against entry `id`; returns its new count.
    pub fn record_failure(&mut self, id: Uuid) -> Option<u32> {
        let entry = self.entries.iter_mut().find(|e| e.id == id)?;
        entry.attempts += 1;
        let attempts = entry.attempts;
        self.persist();
        Some(attempts)
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            store.save_or_warn(KEY_OFFLINE_QUEUE, &self.entries);
        }
    }
}
