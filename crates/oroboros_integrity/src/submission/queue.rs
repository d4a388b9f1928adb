//! # Offline Queue
//!
//! Bounded FIFO of sealed submissions waiting for connectivity.
//! What happens when it is full is a [`QueueOverflowPolicy`], and the
//! entry that loses is handed back so the caller can report it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// What to do with a push into a full queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOverflowPolicy {
    /// Evict the oldest entry to make room.
    #[default]
    DropOldest,
    /// Refuse the new entry.
    RejectNewest,
}

/// A sealed submission parked for later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSubmission {
    /// Controller-local submission id.
    pub id: u64,
    /// Score the caller submitted.
    pub score: i64,
    /// Match the score belongs to.
    pub match_id: String,
    /// Request body, sealed once and resent as-is.
    pub body: String,
    /// Retries spent before parking.
    pub retry_count: u32,
    /// Wall-clock time of parking.
    pub queued_at_ms: i64,
}

/// Result of [`OfflineQueue::push`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueuePush {
    /// Stored, nothing lost.
    Queued,
    /// Stored, the returned oldest entry was evicted.
    Evicted(QueuedSubmission),
    /// Not stored. The entry is handed back.
    Rejected(QueuedSubmission),
}

/// Bounded offline queue.
#[derive(Clone, Debug)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedSubmission>,
    capacity: usize,
    policy: QueueOverflowPolicy,
}

impl OfflineQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(capacity: usize, policy: QueueOverflowPolicy) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            policy,
        }
    }

    /// Adds an entry at the back, applying the overflow policy.
    pub fn push(&mut self, entry: QueuedSubmission) -> QueuePush {
        if self.capacity == 0 {
            return QueuePush::Rejected(entry);
        }
        if self.entries.len() < self.capacity {
            self.entries.push_back(entry);
            return QueuePush::Queued;
        }
        match self.policy {
            QueueOverflowPolicy::RejectNewest => QueuePush::Rejected(entry),
            QueueOverflowPolicy::DropOldest => {
                let evicted = self.entries.pop_front();
                self.entries.push_back(entry);
                evicted.map_or(QueuePush::Queued, QueuePush::Evicted)
            }
        }
    }

    /// Takes the oldest entry.
    pub fn pop_front(&mut self) -> Option<QueuedSubmission> {
        self.entries.pop_front()
    }

    /// Discards everything. Returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedSubmission> {
        self.entries.iter()
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
