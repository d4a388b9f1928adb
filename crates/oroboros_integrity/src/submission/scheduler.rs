//! # Timers
//!
//! Retry backoff and response deadlines are plain data, not callbacks.
//!
//! ```text
//! controller ──schedule(delay, task)──► Scheduler ──poll_due()──► controller.update()
//!            ◄──────── TimerHandle ────┘
//! ```
//!
//! A cancelled handle is never returned by `poll_due`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::clock::SharedClock;

/// Handle to a scheduled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// What a timer means when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerTask {
    /// No response arrived for this attempt in time.
    ResponseTimeout {
        /// Submission the attempt belongs to.
        submission_id: u64,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Backoff is over, send the next attempt.
    Retry {
        /// Submission to retry.
        submission_id: u64,
    },
}

/// Injected timer service.
pub trait Scheduler: Send {
    /// Arms `task` to fire after `delay`.
    fn schedule(&mut self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Disarms a timer. Returns false if it already fired or was cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    /// Removes and returns every task whose deadline has passed, earliest first.
    fn poll_due(&mut self) -> Vec<(TimerHandle, TimerTask)>;

    /// Number of armed timers.
    fn pending(&self) -> usize;
}

/// Deadline heap over the monotonic clock.
pub struct ClockScheduler {
    clock: SharedClock,
    /// (deadline ms, handle) min-heap. May hold cancelled entries.
    deadlines: BinaryHeap<Reverse<(u64, TimerHandle)>>,
    /// Armed tasks. Absent here means cancelled.
    armed: HashMap<TimerHandle, TimerTask>,
    next_handle: u64,
}

impl ClockScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            deadlines: BinaryHeap::new(),
            armed: HashMap::new(),
            next_handle: 1,
        }
    }
}

impl Scheduler for ClockScheduler {
    fn schedule(&mut self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let deadline = self.clock.monotonic_millis().saturating_add(delay_ms);
        self.deadlines.push(Reverse((deadline, handle)));
        self.armed.insert(handle, task);
        tracing::debug!("Timer {:?} armed for {:?}: {:?}", handle, delay, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.armed.remove(&handle).is_some()
    }

    fn poll_due(&mut self) -> Vec<(TimerHandle, TimerTask)> {
        let now = self.clock.monotonic_millis();
        let mut due = Vec::new();
        while let Some(Reverse((deadline, handle))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            if let Some(task) = self.armed.remove(&handle) {
                due.push((handle, task));
            }
        }
        if self.armed.is_empty() {
            self.deadlines.clear();
        }
        due
    }

    fn pending(&self) -> usize {
        self.armed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn retry(id: u64) -> TimerTask {
        TimerTask::Retry { submission_id: id }
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let clock = ManualClock::new(0);
        let mut scheduler = ClockScheduler::new(clock.shared());
        scheduler.schedule(Duration::from_secs(2), retry(2));
        scheduler.schedule(Duration::from_secs(1), retry(1));

        assert!(scheduler.poll_due().is_empty());
        clock.advance(Duration::from_secs(5));
        let fired: Vec<_> = scheduler.poll_due().into_iter().map(|(_, t)| t).collect();
        assert_eq!(fired, vec![retry(1), retry(2)]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let clock = ManualClock::new(0);
        let mut scheduler = ClockScheduler::new(clock.shared());
        let handle = scheduler.schedule(Duration::from_millis(10), retry(7));

        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        clock.advance(Duration::from_secs(1));
        assert!(scheduler.poll_due().is_empty());
    }

    #[test]
    fn test_fires_exactly_at_deadline() {
        let clock = ManualClock::new(0);
        let mut scheduler = ClockScheduler::new(clock.shared());
        scheduler.schedule(Duration::from_millis(1_000), retry(1));
        clock.advance(Duration::from_millis(999));
        assert!(scheduler.poll_due().is_empty());
        clock.advance(Duration::from_millis(1));
        assert_eq!(scheduler.poll_due().len(), 1);
    }
}
