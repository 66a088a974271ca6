//! blockcache — local disk block cache and admission control for a
//! distributed filesystem client
//!
//! This library provides the client-side disk subsystem that sits between a
//! filesystem's block journal, its block cache, and the finite disk they
//! share:
//!
//! - A persistent, content-addressed LRU cache of opaque encrypted blocks,
//!   indexed by `(folder, block id)`, with folder-scoped bulk deletion and
//!   probabilistic eviction whose cost is independent of cache size
//! - A multi-resource admission controller that delays journal writers as
//!   bytes, files, or remote quota approach exhaustion, and that keeps cache
//!   growth from starving the journal
//!
//! # Architecture
//!
//! ```text
//! journal writer ─▶ BackpressureLimiter ─▶ delay ─▶ byte/file semaphores
//!                        ▲         │
//!        free space incl.│         │ force-acquire (cache share)
//!        cache bytes     │         ▼
//! block put ───────────▶ DiskBlockCache ─▶ block / metadata / folder stores
//!                                  │
//!                                  └─▶ probabilistic LRU eviction
//! ```
//!
//! All collaborators with an environment behind them — the metadata codec,
//! the clock, the key-value engine, the disk probe, the quota source, and
//! the delay itself — are injected as capability traits, so the whole
//! subsystem runs deterministically under test.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use blockcache::cache::{CacheConfig, DiskBlockCache};
//! use blockcache::clock::SystemClock;
//! use blockcache::codec::JsonCodec;
//! use blockcache::context::Context;
//! use blockcache::engine::MemoryKvStore;
//! use blockcache::limiter::{
//!     BackpressureConfig, BackpressureLimiter, FixedDiskProbe, TokioDelayer, UnlimitedQuota,
//! };
//! use blockcache::types::{BlockId, FolderId, ServerKeyHalf};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = Arc::new(BackpressureLimiter::new(
//!     BackpressureConfig::default(),
//!     Arc::new(TokioDelayer),
//!     Arc::new(FixedDiskProbe::unlimited()),
//!     Arc::new(UnlimitedQuota),
//! )?);
//! let cache = DiskBlockCache::new(
//!     CacheConfig::default(),
//!     Arc::new(JsonCodec),
//!     Arc::new(SystemClock),
//!     limiter,
//!     Box::new(MemoryKvStore::new()),
//!     Box::new(MemoryKvStore::new()),
//!     Box::new(MemoryKvStore::new()),
//! )?;
//!
//! let ctx = Context::background();
//! let folder = FolderId::fake(1);
//! let block = BlockId::from_slice(b"block-0001");
//! cache
//!     .put(&ctx, folder, &block, b"ciphertext", ServerKeyHalf::default())
//!     .await?;
//! let (payload, _key_half) = cache.get(&ctx, folder, &block).await?;
//! assert_eq!(&payload[..], b"ciphertext");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod clock;
pub mod codec;
pub mod context;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod types;

// Re-export main types
pub use cache::{CacheConfig, DiskBlockCache};
pub use context::Context;
pub use error::{CacheError, CacheResult, EngineError, LimiterError, LimiterResult};
pub use limiter::{BackpressureConfig, BackpressureLimiter, DiskLimiter};
pub use types::{BlockId, BlockMetadata, FolderId, ServerKeyHalf};
