//! Core trait definitions for pluggable key-value engines

use crate::error::EngineError;

/// Sorted-key store backing one cache namespace.
///
/// Keys are opaque byte strings ordered lexicographically. The cache relies
/// on ordered iteration for prefix scans of the folder index and for its
/// randomized eviction sampling, so engines must iterate in key order.
///
/// Implementations are internally synchronized; the cache may call them from
/// multiple tasks.
pub trait KvStore: Send + Sync {
    /// Unique identifier for this engine implementation.
    fn engine_id(&self) -> &str;

    /// Look up a key. `Ok(None)` when absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// Insert or overwrite a key.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), EngineError>;

    /// Forward iterator over all entries with key `>= start`, in key order.
    fn iter_from(&self, start: &[u8]) -> Result<Box<dyn KvIterator>, EngineError>;

    /// Forward iterator over all entries whose key starts with `prefix`.
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>, EngineError>;

    /// Close the store. Idempotent; operations after close return
    /// [`EngineError::Closed`].
    fn close(&self) -> Result<(), EngineError>;
}

/// Forward iterator over a [`KvStore`]. Resources are released on drop.
pub trait KvIterator: Send {
    /// The next entry in key order, or `None` when exhausted.
    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, EngineError>;
}
