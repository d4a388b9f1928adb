//! # Clocks
//!
//! Two time sources, on purpose:
//!
//! - **Wall clock**: Unix epoch milliseconds. Used for wire timestamps.
//!   The device owner can set it, which is exactly what the time-tamper
//!   check looks for.
//! - **Monotonic clock**: process-relative milliseconds. Used for deltas,
//!   deadlines and backoff. Cannot be moved by the user.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source shared by every component of the pipeline.
pub trait Clock: Send + Sync {
    /// Unix epoch milliseconds (user adjustable).
    fn wall_millis(&self) -> i64;

    /// Milliseconds since an arbitrary fixed point (never goes backwards).
    fn monotonic_millis(&self) -> u64;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Real clock backed by `SystemTime` and `Instant`.
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose monotonic origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }

    /// Creates a shared handle to a new system clock.
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }

    fn monotonic_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock for tests and deterministic simulation.
///
/// Cloning shares the underlying time, so a test can keep one handle and
/// give another to the pipeline.
#[derive(Clone, Debug)]
pub struct ManualClock {
    wall: Arc<AtomicI64>,
    monotonic: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock at the given wall time with monotonic time zero.
    #[must_use]
    pub fn new(wall_millis: i64) -> Self {
        Self {
            wall: Arc::new(AtomicI64::new(wall_millis)),
            monotonic: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Moves both clocks forward.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.monotonic.fetch_add(ms, Ordering::SeqCst);
        self.wall
            .fetch_add(i64::try_from(ms).unwrap_or(i64::MAX), Ordering::SeqCst);
    }

    /// Sets the wall clock only (simulates the user changing device time).
    pub fn set_wall_millis(&self, wall_millis: i64) {
        self.wall.store(wall_millis, Ordering::SeqCst);
    }

    /// Returns a shared handle to this clock.
    #[must_use]
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn wall_millis(&self) -> i64 {
        self.wall.load(Ordering::SeqCst)
    }

    fn monotonic_millis(&self) -> u64 {
        self.monotonic.load(Ordering::SeqCst)
    }
}
