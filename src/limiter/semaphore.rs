//! Signed counted semaphore
//!
//! Unlike the usual unsigned semaphore, the count here may go negative:
//! when a dynamic ceiling shrinks below what is already reserved, the
//! tracker force-acquires the difference and the semaphore naturally
//! throttles new admissions until releases bring the count back above
//! zero.

use crate::context::Context;
use crate::error::LimiterResult;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Counted semaphore over an `i64` permit count.
///
/// Acquires that cannot be satisfied immediately park on a notifier and are
/// re-woken on every release. An acquire that *is* immediately satisfiable
/// succeeds even when the context is already cancelled; cancellation is
/// only checked once the caller would actually block.
#[derive(Debug)]
pub struct CountedSemaphore {
    count: Mutex<i64>,
    notify: Notify,
}

impl CountedSemaphore {
    /// Create a semaphore holding `initial` permits.
    pub fn new(initial: i64) -> Self {
        Self {
            count: Mutex::new(initial),
            notify: Notify::new(),
        }
    }

    /// Snapshot of the current permit count. May be negative.
    pub fn count(&self) -> i64 {
        *self.count.lock()
    }

    /// Take `n` permits without blocking. Returns the post-acquire count,
    /// or `None` when fewer than `n` permits are available.
    pub fn try_acquire(&self, n: i64) -> Option<i64> {
        debug_assert!(n >= 0, "acquire count must be non-negative");
        let mut count = self.count.lock();
        if *count >= n {
            *count -= n;
            Some(*count)
        } else {
            None
        }
    }

    /// Take `n` permits, waiting until they are available or the context is
    /// done. Returns the post-acquire count. On cancellation no permits are
    /// consumed and the cancellation cause is returned.
    pub async fn acquire(&self, ctx: &Context, n: i64) -> LimiterResult<i64> {
        let mut notified = std::pin::pin!(self.notify.notified());
        loop {
            // Arm the waiter before testing the count so a release between
            // the test and the await cannot be missed.
            notified.as_mut().enable();
            if let Some(count) = self.try_acquire(n) {
                return Ok(count);
            }
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            tokio::select! {
                () = notified.as_mut() => {}
                err = ctx.done() => return Err(err),
            }
            notified.set(self.notify.notified());
        }
    }

    /// Return `n` permits and wake waiters. Returns the new count; a
    /// negative count moves closer to zero.
    pub fn release(&self, n: i64) -> i64 {
        debug_assert!(n >= 0, "release count must be non-negative");
        let new_count = {
            let mut count = self.count.lock();
            *count += n;
            *count
        };
        self.notify.notify_waiters();
        new_count
    }

    /// Take `n` permits unconditionally, allowing the count to go negative.
    /// Returns the new count.
    pub fn force_acquire(&self, n: i64) -> i64 {
        debug_assert!(n >= 0, "acquire count must be non-negative");
        let mut count = self.count.lock();
        *count -= n;
        *count
    }
}
