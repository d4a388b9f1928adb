//! # Score Trail
//!
//! Append-only history of score updates folded into a running hash:
//!
//! ```text
//! H0 = 0x00..00
//! Hn = SHA-256( Hn-1 ‖ timestamp_ms (LE) ‖ score (LE) )
//! ```
//!
//! The server never sees the raw trail, only `Hn`. Reordering the same
//! scores produces a different hash; that is the point.

use sha2::{Digest, Sha256};

/// Size of the running hash in bytes.
pub const TRAIL_HASH_LEN: usize = 32;

/// One recorded score update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrailEntry {
    /// Session-relative monotonic time of the update.
    pub timestamp_ms: u64,
    /// Score after the update.
    pub score: i64,
}

/// Append-only score history with its running hash.
#[derive(Clone, Debug, Default)]
pub struct ScoreTrail {
    entries: Vec<TrailEntry>,
    running_hash: [u8; TRAIL_HASH_LEN],
}

impl ScoreTrail {
    /// Creates an empty trail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an update and folds it into the running hash.
    pub fn record(&mut self, timestamp_ms: u64, score: i64) {
        let entry = TrailEntry { timestamp_ms, score };
        self.running_hash = fold(&self.running_hash, entry);
        self.entries.push(entry);
    }

    /// Current running hash.
    #[inline]
    #[must_use]
    pub const fn running_hash(&self) -> &[u8; TRAIL_HASH_LEN] {
        &self.running_hash
    }

    /// Running hash as lowercase hex.
    #[must_use]
    pub fn running_hash_hex(&self) -> String {
        hex::encode(self.running_hash)
    }

    /// Recorded entries, oldest first.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[TrailEntry] {
        &self.entries
    }

    /// Number of recorded updates.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was recorded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent score, if any.
    #[must_use]
    pub fn last_score(&self) -> Option<i64> {
        self.entries.last().map(|e| e.score)
    }

    /// Recomputes the hash from the entries and compares with the stored one.
    #[must_use]
    pub fn verify(&self) -> bool {
        let recomputed = self
            .entries
            .iter()
            .fold([0u8; TRAIL_HASH_LEN], |acc, entry| fold(&acc, *entry));
        recomputed == self.running_hash
    }

    /// Drops every entry and resets the hash.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.running_hash = [0u8; TRAIL_HASH_LEN];
    }
}

fn fold(previous: &[u8; TRAIL_HASH_LEN], entry: TrailEntry) -> [u8; TRAIL_HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(previous);
    hasher.update(entry.timestamp_ms.to_le_bytes());
    hasher.update(entry.score.to_le_bytes());
    hasher.finalize().into()
}
