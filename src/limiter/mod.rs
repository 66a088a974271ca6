//! Backpressure disk limiter
//!
//! Admission control for everything this client writes to local disk: the
//! block journal and the disk block cache. The limiter accounts bytes,
//! files, and remote quota against dynamically sized ceilings, delays
//! journal writers as utilization climbs between a minimum and a maximum
//! threshold, and coordinates the two consumers so cache growth never
//! starves the journal (cache space counts as reclaimable when sizing the
//! journal's share).
//!
//! # Architecture
//!
//! ```text
//! journal writer ──▶ before_block_put ──▶ delay ──▶ byte sem ──▶ file sem
//!                         │                              ▲
//!                         └── utilization across ────────┘
//!                             bytes / files / quota
//!
//! disk cache ──▶ before_disk_block_cache_put ──▶ force-acquire (never blocks,
//!                                                cache evicts instead)
//! ```
//!
//! # Key Components
//!
//! - **`CountedSemaphore`**: signed counted semaphore; goes negative when a
//!   dynamic ceiling shrinks below outstanding reservations
//! - **`ResourceTracker`**: per-resource accounting of used/free space and
//!   the derived semaphore ceiling
//! - **`QuotaTracker`**: unflushed journal bytes against the remote quota
//! - **`BackpressureLimiter`**: composes the trackers into the admission
//!   surface the journal and cache call

/// Composed admission controller and its capability traits
pub mod backpressure;
/// Remote-quota accounting
pub mod quota;
/// Signed counted semaphore with cancellable acquire
pub mod semaphore;
/// Per-resource accounting with a dynamic semaphore ceiling
pub mod tracker;

pub use backpressure::{
    BackpressureConfig, BackpressureLimiter, Delayer, DiskLimiter, DiskProbe, FixedDiskProbe,
    QuotaProvider, TokioDelayer, UnlimitedQuota,
};
pub use quota::QuotaSnapshot;
pub use semaphore::CountedSemaphore;
pub use tracker::TrackerSnapshot;
