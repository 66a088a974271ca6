//! Per-resource accounting with a dynamic semaphore ceiling
//!
//! A tracker accounts one scalar resource (bytes or file count) consumed by
//! committed journal or cache writes, plus the free capacity the disk
//! probe last reported. From those it derives the semaphore ceiling
//! `min(frac × (used + free), limit)` and keeps the semaphore reconciled
//! with it: when the ceiling grows, permits are released; when it shrinks
//! below outstanding reservations, the difference is force-acquired and the
//! count goes negative until deletes catch up.

use crate::context::Context;
use crate::error::{LimiterError, LimiterResult};
use crate::limiter::semaphore::CountedSemaphore;
use std::sync::Arc;

/// Test-observable view of a tracker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSnapshot {
    /// Resources reserved by committed operations.
    pub used: i64,
    /// Free capacity as of the last probe refresh.
    pub free: i64,
    /// Current semaphore ceiling.
    pub max: i64,
    /// Current semaphore count.
    pub count: i64,
}

/// Accounting for one scalar resource and its admission semaphore.
#[derive(Debug)]
pub(crate) struct ResourceTracker {
    /// Utilization below which no delay applies.
    min_threshold: f64,
    /// Utilization at which the delay saturates.
    max_threshold: f64,
    /// Fraction of the total resource this consumer may claim.
    frac: f64,
    /// Static upper bound on the semaphore ceiling.
    limit: i64,
    used: i64,
    free: i64,
    semaphore_max: i64,
    semaphore: Arc<CountedSemaphore>,
}

impl ResourceTracker {
    pub(crate) fn new(
        min_threshold: f64,
        max_threshold: f64,
        frac: f64,
        limit: i64,
        initial_free: i64,
    ) -> LimiterResult<Self> {
        if !(0.0..=1.0).contains(&min_threshold) {
            return Err(LimiterError::InvalidConfig(format!(
                "min threshold {min_threshold} out of range [0, 1]"
            )));
        }
        if !(min_threshold..=1.0).contains(&max_threshold) {
            return Err(LimiterError::InvalidConfig(format!(
                "max threshold {max_threshold} out of range [{min_threshold}, 1]"
            )));
        }
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(LimiterError::InvalidConfig(format!(
                "resource fraction {frac} out of range (0, 1]"
            )));
        }
        if limit < 0 {
            return Err(LimiterError::InvalidConfig(format!(
                "resource limit {limit} is negative"
            )));
        }
        if initial_free < 0 {
            return Err(LimiterError::InvalidConfig(format!(
                "initial free count {initial_free} is negative"
            )));
        }

        let mut tracker = Self {
            min_threshold,
            max_threshold,
            frac,
            limit,
            used: 0,
            free: initial_free,
            semaphore_max: 0,
            semaphore: Arc::new(CountedSemaphore::new(0)),
        };
        tracker.semaphore_max = tracker.current_max();
        tracker.semaphore.release(tracker.semaphore_max);
        Ok(tracker)
    }

    /// `min(frac × (used + free), limit)` as an unrounded float. The sum
    /// is computed in floating point so sentinel-sized `free` values cannot
    /// overflow.
    fn current_limit(&self) -> f64 {
        (self.frac * (self.used as f64 + self.free as f64)).min(self.limit as f64)
    }

    /// [`current_limit`](Self::current_limit) truncated toward zero and
    /// clamped to `[0, limit]`.
    fn current_max(&self) -> i64 {
        (self.current_limit() as i64).clamp(0, self.limit)
    }

    /// Reconcile the semaphore with a recomputed ceiling: release the
    /// difference when the ceiling grew, force-acquire it when it shrank.
    fn update_semaphore_max(&mut self) {
        let new_max = self.current_max();
        let delta = new_max - self.semaphore_max;
        if delta > 0 {
            self.semaphore.release(delta);
        } else if delta < 0 {
            self.semaphore.force_acquire(-delta);
        }
        self.semaphore_max = new_max;
    }

    /// Account `n` resources already committed (journal coming online).
    /// Returns the resulting semaphore count.
    pub(crate) fn on_enable(&mut self, n: i64) -> i64 {
        self.semaphore.force_acquire(n);
        self.used += n;
        self.update_semaphore_max();
        self.semaphore.count()
    }

    /// Inverse of [`on_enable`](Self::on_enable).
    pub(crate) fn on_disable(&mut self, n: i64) {
        self.semaphore.release(n);
        self.used -= n;
        self.update_semaphore_max();
    }

    /// Record a fresh probe reading and resize the ceiling.
    pub(crate) fn update_free(&mut self, free: i64) {
        self.free = free;
        self.update_semaphore_max();
    }

    /// Reserve `n` resources for an in-flight put, blocking under
    /// backpressure. Returns the post-acquire count; on cancellation no
    /// permits are consumed.
    pub(crate) async fn before_block_put(&self, ctx: &Context, n: i64) -> LimiterResult<i64> {
        self.semaphore.acquire(ctx, n).await
    }

    /// Commit or roll back a reservation made by
    /// [`before_block_put`](Self::before_block_put).
    pub(crate) fn after_block_put(&mut self, n: i64, put_data: bool) {
        if put_data {
            self.used += n;
            self.update_semaphore_max();
        } else {
            self.semaphore.release(n);
        }
    }

    /// Account `n` committed resources freed by block deletion.
    pub(crate) fn on_blocks_delete(&mut self, n: i64) {
        self.semaphore.release(n);
        self.used -= n;
        self.update_semaphore_max();
    }

    /// Reserve `n` resources without blocking, allowing over-commit. Used
    /// by the disk cache, which evicts instead of waiting. Returns the
    /// post-acquire count (negative when over the ceiling).
    pub(crate) fn force_acquire(&self, n: i64) -> i64 {
        self.semaphore.force_acquire(n)
    }

    pub(crate) fn used(&self) -> i64 {
        self.used
    }

    pub(crate) fn semaphore(&self) -> Arc<CountedSemaphore> {
        Arc::clone(&self.semaphore)
    }

    /// Raw utilization of this resource: used over the current (unrounded)
    /// ceiling, so a static limit far below the disk's capacity still
    /// produces backpressure as it fills.
    pub(crate) fn delay_scale(&self) -> f64 {
        let limit = self.current_limit();
        if limit <= 0.0 {
            0.0
        } else {
            self.used as f64 / limit
        }
    }

    /// The delay scale mapped linearly from the threshold band onto
    /// `[0, 1]`, clamped.
    pub(crate) fn delay_fraction(&self) -> f64 {
        let scale = self.delay_scale();
        if self.max_threshold <= self.min_threshold {
            return if scale >= self.max_threshold { 1.0 } else { 0.0 };
        }
        ((scale - self.min_threshold) / (self.max_threshold - self.min_threshold)).clamp(0.0, 1.0)
    }

    pub(crate) fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            used: self.used,
            free: self.free,
            max: self.semaphore_max,
            count: self.semaphore.count(),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_state_for_test(&mut self, used: i64, free: i64) {
        self.used = used;
        self.free = free;
    }
}
