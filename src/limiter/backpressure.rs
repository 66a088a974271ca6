//! Composed backpressure disk limiter
//!
//! Combines a byte tracker, a file tracker, and a quota tracker for the
//! block journal with a separate byte tracker for the disk block cache.
//! Journal admission sleeps for a graduated delay as the worst of the three
//! journal axes climbs between its thresholds, then reserves bytes and
//! files from the semaphores. Cache admission never sleeps or blocks; it
//! force-acquires and lets the cache evict its way back under the ceiling.

use crate::context::Context;
use crate::error::{LimiterError, LimiterResult};
use crate::limiter::quota::{QuotaSnapshot, QuotaTracker};
use crate::limiter::tracker::{ResourceTracker, TrackerSnapshot};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Slack subtracted from a context deadline when sizing a delay, so the
/// operation behind the delay still has time to run.
const DEADLINE_SLACK: Duration = Duration::from_secs(1);

// ============================================================================
// Capability traits
// ============================================================================

/// Injected sleep honoring cancellation. Tests substitute a recording
/// implementation to observe computed delays without waiting them out.
#[async_trait]
pub trait Delayer: Send + Sync {
    /// Sleep for `duration` or until the context is done, whichever comes
    /// first. A done context yields its cancellation cause.
    async fn delay(&self, ctx: &Context, duration: Duration) -> LimiterResult<()>;
}

/// Production delayer backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelayer;

#[async_trait]
impl Delayer for TokioDelayer {
    async fn delay(&self, ctx: &Context, duration: Duration) -> LimiterResult<()> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            err = ctx.done() => Err(err),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Samples free disk capacity: `(free_bytes, free_files)`.
///
/// Closures with the matching signature implement this directly.
pub trait DiskProbe: Send + Sync {
    /// Current free bytes and free file slots on the volume holding the
    /// journal and cache.
    fn free_bytes_and_files(&self) -> std::io::Result<(i64, i64)>;
}

impl<F> DiskProbe for F
where
    F: Fn() -> std::io::Result<(i64, i64)> + Send + Sync,
{
    fn free_bytes_and_files(&self) -> std::io::Result<(i64, i64)> {
        self()
    }
}

/// Fixed-answer probe for simulated disks.
#[derive(Debug, Clone, Copy)]
pub struct FixedDiskProbe {
    /// Free bytes to report.
    pub free_bytes: i64,
    /// Free file slots to report.
    pub free_files: i64,
}

impl FixedDiskProbe {
    /// A probe reporting the given free capacity.
    pub fn new(free_bytes: i64, free_files: i64) -> Self {
        Self {
            free_bytes,
            free_files,
        }
    }

    /// A probe reporting effectively infinite capacity.
    pub fn unlimited() -> Self {
        Self::new(i64::MAX, i64::MAX)
    }
}

impl DiskProbe for FixedDiskProbe {
    fn free_bytes_and_files(&self) -> std::io::Result<(i64, i64)> {
        Ok((self.free_bytes, self.free_files))
    }
}

/// Samples the server's view of this user's block usage:
/// `(remote_used_bytes, quota_bytes)`.
///
/// Closures with the matching signature implement this directly.
pub trait QuotaProvider: Send + Sync {
    /// Latest known remote usage and quota.
    fn remote_usage(&self, ctx: &Context) -> (i64, i64);
}

impl<F> QuotaProvider for F
where
    F: for<'a> Fn(&'a Context) -> (i64, i64) + Send + Sync,
{
    fn remote_usage(&self, ctx: &Context) -> (i64, i64) {
        self(ctx)
    }
}

/// Quota provider reporting no usage against an unlimited quota, for
/// clients that have not fetched a quota yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedQuota;

impl QuotaProvider for UnlimitedQuota {
    fn remote_usage(&self, _ctx: &Context) -> (i64, i64) {
        (0, i64::MAX)
    }
}

// ============================================================================
// Admission interface
// ============================================================================

/// Admission surface the journal and the disk block cache call.
///
/// The cache depends on this trait rather than the concrete limiter so
/// tests can substitute permissive or recording limiters.
#[async_trait]
pub trait DiskLimiter: Send + Sync {
    /// Gate a journal block put of `block_bytes`/`block_files`. Applies the
    /// computed backpressure delay, then reserves from the byte and file
    /// semaphores. Returns the post-acquire available counts. On failure
    /// nothing stays reserved.
    async fn before_block_put(
        &self,
        ctx: &Context,
        block_bytes: i64,
        block_files: i64,
    ) -> LimiterResult<(i64, i64)>;

    /// Commit (`put_data = true`) or roll back a reservation made by
    /// [`before_block_put`](DiskLimiter::before_block_put).
    fn after_block_put(&self, block_bytes: i64, block_files: i64, put_data: bool);

    /// Account a journal coming online with existing content. Returns the
    /// available byte and file counts after accounting.
    fn on_journal_enable(&self, journal_bytes: i64, journal_files: i64) -> (i64, i64);

    /// Inverse of [`on_journal_enable`](DiskLimiter::on_journal_enable).
    fn on_journal_disable(&self, journal_bytes: i64, journal_files: i64);

    /// Account journal blocks deleted locally.
    fn on_blocks_delete(&self, block_bytes: i64, block_files: i64);

    /// Account journal bytes that finished flushing to the server.
    fn on_blocks_flush(&self, block_bytes: i64);

    /// Account a cache coming online with existing content. Returns the
    /// available byte count after accounting.
    fn on_disk_block_cache_enable(&self, cache_bytes: i64) -> i64;

    /// Gate a disk cache put of `block_bytes`. Never blocks: reserves
    /// unconditionally and returns the resulting available count, negative
    /// when the cache is over its share (the cache responds by evicting).
    async fn before_disk_block_cache_put(
        &self,
        ctx: &Context,
        block_bytes: i64,
    ) -> LimiterResult<i64>;

    /// Commit or roll back a reservation made by
    /// [`before_disk_block_cache_put`](DiskLimiter::before_disk_block_cache_put).
    fn after_disk_block_cache_put(&self, block_bytes: i64, put_data: bool);

    /// Account bytes removed from the disk cache.
    fn on_disk_block_cache_delete(&self, block_bytes: i64);
}

// ============================================================================
// Configuration
// ============================================================================

/// Parameters of the backpressure limiter.
///
/// Thresholds are utilizations of the consumer's share of disk (or of
/// quota): below `min_threshold` admission is immediate, above
/// `max_threshold` every put waits the full `max_delay`, and in between the
/// delay grows linearly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    /// Utilization below which no delay applies.
    pub min_threshold: f64,
    /// Utilization at which the delay saturates to `max_delay`.
    pub max_threshold: f64,
    /// Quota utilization below which no delay applies.
    pub quota_min_threshold: f64,
    /// Quota utilization at which the delay saturates. May exceed 1.
    pub quota_max_threshold: f64,
    /// Fraction of `used + free` disk the journal may claim.
    pub journal_frac: f64,
    /// Fraction of `used + free` disk the block cache may claim.
    pub disk_cache_frac: f64,
    /// Static upper bound on bytes, split between journal and cache by
    /// their fractions.
    pub byte_limit: i64,
    /// Static upper bound on file count.
    pub file_limit: i64,
    /// Ceiling for the admission delay.
    pub max_delay: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            min_threshold: 0.5,
            max_threshold: 0.95,
            quota_min_threshold: 0.95,
            quota_max_threshold: 1.2,
            journal_frac: 0.25,
            disk_cache_frac: 0.10,
            byte_limit: 10 * 1024 * 1024 * 1024,
            file_limit: 1_500_000,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackpressureConfig {
    /// Validate all parameters. Any violation is fatal at construction.
    pub fn validate(&self) -> LimiterResult<()> {
        let bad = |msg: String| Err(LimiterError::InvalidConfig(msg));
        if !(0.0..=1.0).contains(&self.min_threshold) {
            return bad(format!(
                "min_threshold {} out of range [0, 1]",
                self.min_threshold
            ));
        }
        if !(self.min_threshold..=1.0).contains(&self.max_threshold) {
            return bad(format!(
                "max_threshold {} out of range [{}, 1]",
                self.max_threshold, self.min_threshold
            ));
        }
        if self.quota_min_threshold < 0.0 {
            return bad(format!(
                "quota_min_threshold {} is negative",
                self.quota_min_threshold
            ));
        }
        if self.quota_max_threshold < self.quota_min_threshold {
            return bad(format!(
                "quota_max_threshold {} below quota_min_threshold {}",
                self.quota_max_threshold, self.quota_min_threshold
            ));
        }
        if self.journal_frac <= 0.0 || self.disk_cache_frac <= 0.0 {
            return bad("journal_frac and disk_cache_frac must be positive".to_string());
        }
        if self.journal_frac + self.disk_cache_frac > 1.0 {
            return bad(format!(
                "journal_frac {} + disk_cache_frac {} exceeds 1",
                self.journal_frac, self.disk_cache_frac
            ));
        }
        if self.byte_limit <= 0 {
            return bad(format!("byte_limit {} must be positive", self.byte_limit));
        }
        if self.file_limit <= 0 {
            return bad(format!("file_limit {} must be positive", self.file_limit));
        }
        if self.max_delay.is_zero() {
            return bad("max_delay must be positive".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Limiter
// ============================================================================

/// Trackers guarded by the limiter lock. The lock is held only for memory
/// updates, never across the delay or a semaphore acquire.
struct LimiterState {
    journal_bytes: ResourceTracker,
    journal_files: ResourceTracker,
    quota: QuotaTracker,
    disk_cache_bytes: ResourceTracker,
}

/// Backpressure-based admission controller for journal and cache disk use.
pub struct BackpressureLimiter {
    max_delay: Duration,
    delayer: Arc<dyn Delayer>,
    probe: Arc<dyn DiskProbe>,
    quota_provider: Arc<dyn QuotaProvider>,
    state: Mutex<LimiterState>,
    /// Set while the last computed delay was saturated, so the warning
    /// fires once per episode instead of once per put.
    saturation_logged: AtomicBool,
}

impl std::fmt::Debug for BackpressureLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureLimiter")
            .field("max_delay", &self.max_delay)
            .field("saturation_logged", &self.saturation_logged)
            .finish_non_exhaustive()
    }
}

impl BackpressureLimiter {
    /// Build a limiter from validated parameters, sampling the probe once
    /// for the initial free-space reading. Probe errors are returned
    /// verbatim.
    pub fn new(
        config: BackpressureConfig,
        delayer: Arc<dyn Delayer>,
        probe: Arc<dyn DiskProbe>,
        quota_provider: Arc<dyn QuotaProvider>,
    ) -> LimiterResult<Self> {
        config.validate()?;
        let (free_bytes, free_files) = probe
            .free_bytes_and_files()
            .map_err(LimiterError::Probe)?;
        let free_bytes = free_bytes.max(0);
        let free_files = free_files.max(0);

        let journal_bytes = ResourceTracker::new(
            config.min_threshold,
            config.max_threshold,
            config.journal_frac,
            share_of(config.byte_limit, config.journal_frac),
            free_bytes,
        )?;
        let journal_files = ResourceTracker::new(
            config.min_threshold,
            config.max_threshold,
            config.journal_frac,
            share_of(config.file_limit, config.journal_frac),
            free_files,
        )?;
        let quota = QuotaTracker::new(config.quota_min_threshold, config.quota_max_threshold)?;
        let disk_cache_bytes = ResourceTracker::new(
            config.min_threshold,
            config.max_threshold,
            config.disk_cache_frac,
            share_of(config.byte_limit, config.disk_cache_frac),
            free_bytes,
        )?;

        Ok(Self {
            max_delay: config.max_delay,
            delayer,
            probe,
            quota_provider,
            state: Mutex::new(LimiterState {
                journal_bytes,
                journal_files,
                quota,
                disk_cache_bytes,
            }),
            saturation_logged: AtomicBool::new(false),
        })
    }

    fn sample_probe(&self) -> LimiterResult<(i64, i64)> {
        let (free_bytes, free_files) = self
            .probe
            .free_bytes_and_files()
            .map_err(LimiterError::Probe)?;
        Ok((free_bytes.max(0), free_files.max(0)))
    }

    /// Delay for the worst journal axis, shrunk when the context deadline
    /// leaves less headroom than `max_delay`.
    fn delay_locked(&self, state: &LimiterState, ctx: &Context, now: Instant) -> Duration {
        let fraction = state
            .journal_bytes
            .delay_fraction()
            .max(state.journal_files.delay_fraction())
            .max(state.quota.delay_fraction());

        let mut max_delay = self.max_delay;
        if let Some(deadline) = ctx.deadline() {
            let headroom = deadline
                .saturating_duration_since(now)
                .saturating_sub(DEADLINE_SLACK);
            max_delay = max_delay.min(headroom);
        }
        max_delay.mul_f64(fraction)
    }

    fn log_delay(&self, delay: Duration, block_bytes: i64, block_files: i64) {
        if delay.is_zero() {
            self.saturation_logged.store(false, Ordering::Relaxed);
            return;
        }
        if delay >= self.max_delay {
            if !self.saturation_logged.swap(true, Ordering::Relaxed) {
                warn!(
                    "journal admission saturated: delaying {:?} for {} bytes / {} files",
                    delay, block_bytes, block_files
                );
            }
        } else {
            debug!(
                "journal admission delayed {:?} for {} bytes / {} files",
                delay, block_bytes, block_files
            );
        }
    }

    /// Byte and file tracker snapshots, in that order.
    pub fn journal_snapshots(&self) -> (TrackerSnapshot, TrackerSnapshot) {
        let state = self.state.lock();
        (
            state.journal_bytes.snapshot(),
            state.journal_files.snapshot(),
        )
    }

    /// Quota tracker snapshot.
    pub fn quota_snapshot(&self) -> QuotaSnapshot {
        self.state.lock().quota.snapshot()
    }

    /// Disk cache byte tracker snapshot.
    pub fn disk_cache_snapshot(&self) -> TrackerSnapshot {
        self.state.lock().disk_cache_bytes.snapshot()
    }
}

/// `frac × limit`, truncated toward zero.
fn share_of(limit: i64, frac: f64) -> i64 {
    (frac * limit as f64) as i64
}

#[async_trait]
impl DiskLimiter for BackpressureLimiter {
    async fn before_block_put(
        &self,
        ctx: &Context,
        block_bytes: i64,
        block_files: i64,
    ) -> LimiterResult<(i64, i64)> {
        if block_bytes <= 0 {
            return Err(LimiterError::InvalidInput(format!(
                "before_block_put called with {block_bytes} block bytes"
            )));
        }
        if block_files <= 0 {
            return Err(LimiterError::InvalidInput(format!(
                "before_block_put called with {block_files} block files"
            )));
        }

        let (free_bytes, free_files) = self.sample_probe()?;
        let (remote_used, quota_bytes) = self.quota_provider.remote_usage(ctx);

        let (delay, byte_sem, file_sem) = {
            let mut state = self.state.lock();
            // Cache space is reclaimable, so the journal's view of free
            // space includes whatever the cache currently holds.
            let cache_used = state.disk_cache_bytes.used();
            state
                .journal_bytes
                .update_free(free_bytes.saturating_add(cache_used));
            state.journal_files.update_free(free_files);
            state.quota.update_remote(remote_used, quota_bytes);
            let delay = self.delay_locked(&state, ctx, Instant::now());
            (
                delay,
                state.journal_bytes.semaphore(),
                state.journal_files.semaphore(),
            )
        };

        self.log_delay(delay, block_bytes, block_files);
        self.delayer.delay(ctx, delay).await?;

        let avail_bytes = byte_sem.acquire(ctx, block_bytes).await?;
        let avail_files = match file_sem.acquire(ctx, block_files).await {
            Ok(count) => count,
            Err(err) => {
                // Don't leak the byte reservation when the file acquire
                // fails.
                byte_sem.release(block_bytes);
                return Err(err);
            }
        };
        Ok((avail_bytes, avail_files))
    }

    fn after_block_put(&self, block_bytes: i64, block_files: i64, put_data: bool) {
        let mut state = self.state.lock();
        state.journal_bytes.after_block_put(block_bytes, put_data);
        state.journal_files.after_block_put(block_files, put_data);
        state.quota.after_block_put(block_bytes, put_data);
    }

    fn on_journal_enable(&self, journal_bytes: i64, journal_files: i64) -> (i64, i64) {
        let mut state = self.state.lock();
        let avail_bytes = state.journal_bytes.on_enable(journal_bytes);
        let avail_files = state.journal_files.on_enable(journal_files);
        state.quota.on_journal_enable(journal_bytes);
        (avail_bytes, avail_files)
    }

    fn on_journal_disable(&self, journal_bytes: i64, journal_files: i64) {
        let mut state = self.state.lock();
        state.journal_bytes.on_disable(journal_bytes);
        state.journal_files.on_disable(journal_files);
        state.quota.on_journal_disable(journal_bytes);
    }

    fn on_blocks_delete(&self, block_bytes: i64, block_files: i64) {
        let mut state = self.state.lock();
        state.journal_bytes.on_blocks_delete(block_bytes);
        state.journal_files.on_blocks_delete(block_files);
    }

    fn on_blocks_flush(&self, block_bytes: i64) {
        self.state.lock().quota.on_blocks_flush(block_bytes);
    }

    fn on_disk_block_cache_enable(&self, cache_bytes: i64) -> i64 {
        self.state.lock().disk_cache_bytes.on_enable(cache_bytes)
    }

    async fn before_disk_block_cache_put(
        &self,
        _ctx: &Context,
        block_bytes: i64,
    ) -> LimiterResult<i64> {
        if block_bytes <= 0 {
            return Err(LimiterError::InvalidInput(format!(
                "before_disk_block_cache_put called with {block_bytes} block bytes"
            )));
        }
        let (free_bytes, _) = self.sample_probe()?;
        let mut state = self.state.lock();
        state.disk_cache_bytes.update_free(free_bytes);
        Ok(state.disk_cache_bytes.force_acquire(block_bytes))
    }

    fn after_disk_block_cache_put(&self, block_bytes: i64, put_data: bool) {
        self.state
            .lock()
            .disk_cache_bytes
            .after_block_put(block_bytes, put_data);
    }

    fn on_disk_block_cache_delete(&self, block_bytes: i64) {
        self.state.lock().disk_cache_bytes.on_blocks_delete(block_bytes);
    }
}
