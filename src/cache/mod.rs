//! Disk block cache
//!
//! A persistent, content-addressed LRU cache of opaque encrypted filesystem
//! blocks, indexed by `(folder, block id)`. Three injected key-value
//! namespaces back it:
//!
//! ```text
//! block store:    block_id → payload ‖ server_key_half
//! metadata store: block_id → { folder_id, lru_time, block_size }
//! folder index:   folder_id ‖ block_id → ∅
//! ```
//!
//! Growth is gated by the disk limiter's cache tracker; when a put lands
//! over the cache's share, a bounded probabilistic eviction pass removes
//! the least recently used of a random sample, keeping eviction cost
//! independent of cache size.

/// Three-store cache implementation with probabilistic LRU eviction
pub mod block_cache;

pub use block_cache::{CacheConfig, DiskBlockCache, DEFAULT_EVICT_COUNT};
