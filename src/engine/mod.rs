//! Pluggable key-value engine architecture
//!
//! The cache persists its three namespaces (blocks, metadata, folder index)
//! through an injected sorted-key engine rather than a fixed embedded store.
//! Any engine offering ordered forward iteration can back the cache; the
//! in-memory implementation here is the default for tests and ephemeral
//! caches.

/// In-memory ordered store implementation
pub mod memory;
/// Core trait definitions for key-value engines
pub mod traits;

pub use memory::MemoryKvStore;
pub use traits::{KvIterator, KvStore};
