//! Injected time sources.
//!
//! Every runtime reads time through a [`TimeSource`]. The threaded runtime
//! defaults to [`WallClock`]; the lab runtime uses [`VirtualClock`], which
//! only moves when told to, so sleeps and timeouts are deterministic.

use crate::types::Time;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of the current [`Time`].
pub trait TimeSource: Send + Sync {
    /// The current time.
    fn now(&self) -> Time;
}

/// Monotonic wall-clock time measured from the clock's creation.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::from_nanos(u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX))
    }
}

/// Manually driven time.
///
/// ```
/// use fibra::time::{TimeSource, VirtualClock};
/// use fibra::types::Time;
///
/// let clock = VirtualClock::new();
/// clock.advance(std::time::Duration::from_millis(5));
/// assert_eq!(clock.now(), Time::from_millis(5));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// A clock at [`Time::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock at the given instant.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: std::time::Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                Some(t.saturating_add(nanos))
            });
    }

    /// Moves time forward to `time`. Never moves backwards.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}
