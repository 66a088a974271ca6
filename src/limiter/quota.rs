//! Remote-quota accounting
//!
//! Tracks journal bytes queued locally against the usage and quota the
//! block server last reported. Quota pressure is enforced purely through
//! admission delay, so unlike the byte and file trackers there is no
//! semaphore here.

use crate::error::{LimiterError, LimiterResult};

/// Test-observable view of the quota tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Unflushed journal bytes plus remote usage.
    pub used: i64,
    /// Quota remaining after `used`.
    pub free: i64,
}

/// Accounting of unflushed journal bytes versus the remote quota.
#[derive(Debug)]
pub(crate) struct QuotaTracker {
    /// Quota utilization below which no delay applies.
    min_threshold: f64,
    /// Quota utilization at which the delay saturates. May exceed 1: a
    /// server can keep accepting writes past the nominal quota for a while.
    max_threshold: f64,
    unflushed_bytes: i64,
    remote_used_bytes: i64,
    quota_bytes: i64,
}

impl QuotaTracker {
    pub(crate) fn new(min_threshold: f64, max_threshold: f64) -> LimiterResult<Self> {
        if min_threshold < 0.0 {
            return Err(LimiterError::InvalidConfig(format!(
                "quota min threshold {min_threshold} is negative"
            )));
        }
        if max_threshold < min_threshold {
            return Err(LimiterError::InvalidConfig(format!(
                "quota max threshold {max_threshold} below min threshold {min_threshold}"
            )));
        }
        Ok(Self {
            min_threshold,
            max_threshold,
            unflushed_bytes: 0,
            remote_used_bytes: 0,
            // Unlimited until the first remote report arrives.
            quota_bytes: i64::MAX,
        })
    }

    pub(crate) fn on_journal_enable(&mut self, unflushed_bytes: i64) {
        self.unflushed_bytes += unflushed_bytes;
    }

    pub(crate) fn on_journal_disable(&mut self, unflushed_bytes: i64) {
        self.unflushed_bytes -= unflushed_bytes;
    }

    /// Commit a put's bytes as unflushed; failed puts change nothing.
    pub(crate) fn after_block_put(&mut self, n: i64, put_data: bool) {
        if put_data {
            self.unflushed_bytes += n;
        }
    }

    /// Account bytes that finished flushing to the server.
    pub(crate) fn on_blocks_flush(&mut self, n: i64) {
        self.unflushed_bytes -= n;
    }

    /// Record the server's latest usage and quota report.
    pub(crate) fn update_remote(&mut self, remote_used_bytes: i64, quota_bytes: i64) {
        self.remote_used_bytes = remote_used_bytes;
        self.quota_bytes = quota_bytes;
    }

    /// Projected quota utilization once everything unflushed lands.
    pub(crate) fn delay_scale(&self) -> f64 {
        if self.quota_bytes <= 0 {
            return 0.0;
        }
        (self.unflushed_bytes as f64 + self.remote_used_bytes as f64) / self.quota_bytes as f64
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

    pub(crate) fn unflushed_bytes(&self) -> i64 {
        self.unflushed_bytes
    }

    pub(crate) fn remote_used_bytes(&self) -> i64 {
        self.remote_used_bytes
    }

    pub(crate) fn quota_bytes(&self) -> i64 {
        self.quota_bytes
    }

    pub(crate) fn snapshot(&self) -> QuotaSnapshot {
        let used = self.unflushed_bytes + self.remote_used_bytes;
        QuotaSnapshot {
            used,
            free: self.quota_bytes - used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walks every public operation and checks the counters after each.
    #[test]
    fn test_quota_counter_walk() {
        let mut quota = QuotaTracker::new(0.1, 0.9).unwrap();
        assert_eq!(quota.unflushed_bytes(), 0);
        assert_eq!(quota.remote_used_bytes(), 0);
        assert_eq!(quota.quota_bytes(), i64::MAX);

        quota.on_journal_enable(10);
        assert_eq!(quota.unflushed_bytes(), 10);

        quota.on_journal_disable(9);
        assert_eq!(quota.unflushed_bytes(), 1);

        quota.update_remote(10, 100);
        assert_eq!(quota.remote_used_bytes(), 10);
        assert_eq!(quota.quota_bytes(), 100);

        quota.after_block_put(10, true);
        assert_eq!(quota.unflushed_bytes(), 11);

        // A failed put leaves the counters alone.
        quota.after_block_put(9, false);
        assert_eq!(quota.unflushed_bytes(), 11);

        quota.on_blocks_flush(10);
        assert_eq!(quota.unflushed_bytes(), 1);
        assert_eq!(quota.remote_used_bytes(), 10);
        assert_eq!(quota.quota_bytes(), 100);

        assert_eq!(quota.snapshot(), QuotaSnapshot { used: 11, free: 89 });
    }

    #[test]
    fn test_delay_fraction_band_may_exceed_one() {
        let mut quota = QuotaTracker::new(0.8, 1.2).unwrap();
        quota.update_remote(10, 100);
        quota.on_journal_enable(80);
        // (80 + 10) / 100 = 0.9 → (0.9 − 0.8) / 0.4 = 0.25.
        assert!((quota.delay_fraction() - 0.25).abs() < 1e-9);

        quota.update_remote(20, 100);
        // (80 + 20) / 100 = 1.0 → 0.5.
        assert!((quota.delay_fraction() - 0.5).abs() < 1e-9);

        quota.update_remote(60, 100);
        // Past the max threshold the fraction saturates.
        assert_eq!(quota.delay_fraction(), 1.0);
    }

    #[test]
    fn test_unlimited_quota_never_delays() {
        let mut quota = QuotaTracker::new(0.8, 1.2).unwrap();
        quota.on_journal_enable(1 << 40);
        assert!(quota.delay_scale() < 1e-6);
        assert_eq!(quota.delay_fraction(), 0.0);
    }

    #[test]
    fn test_constructor_rejects_bad_thresholds() {
        assert!(QuotaTracker::new(-0.1, 0.9).is_err());
        assert!(QuotaTracker::new(1.2, 0.8).is_err());
        assert!(QuotaTracker::new(0.8, 1.2).is_ok());
    }
}
