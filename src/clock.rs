//! Clock abstraction for LRU timestamps
//!
//! The cache never calls `Utc::now()` directly; it reads time through the
//! injected [`Clock`] so tests can drive LRU ordering deterministically.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of timestamps for LRU bookkeeping. Only needs to be monotonic
/// enough for last-access comparisons.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock that only moves when explicitly advanced.
///
/// # Example
///
/// ```rust
/// use blockcache::clock::{Clock, TestClock};
/// use chrono::Duration;
///
/// let clock = TestClock::new();
/// let before = clock.now();
/// clock.advance(Duration::seconds(1));
/// assert_eq!(clock.now() - before, Duration::seconds(1));
/// ```
#[derive(Debug)]
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    /// Create a clock pinned at the Unix epoch.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(DateTime::UNIX_EPOCH),
        }
    }

    /// Create a clock pinned at the given time.
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        let mut now = self.now.lock();
        *now += step;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
