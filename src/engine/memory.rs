//! In-memory ordered store
//!
//! Default engine for tests and ephemeral caches. Entries live in an ordered
//! map; iterators hold a cursor rather than a snapshot, so they stay valid
//! across interleaved writes and observe them (matching the semantics of an
//! on-disk engine's non-snapshot iterators closely enough for the cache's
//! bounded scans).

use crate::engine::traits::{KvIterator, KvStore};
use crate::error::EngineError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared state behind a [`MemoryKvStore`] and its iterators.
#[derive(Debug, Default)]
struct StoreInner {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl StoreInner {
    fn check_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

/// In-memory [`KvStore`] over an ordered map.
///
/// Cloning is cheap and yields a handle onto the same store, which lets
/// tests keep a handle for inspection after moving one into the cache.
///
/// # Example
///
/// ```rust
/// use blockcache::engine::{KvStore, MemoryKvStore};
///
/// let store = MemoryKvStore::new();
/// store.put(b"a", b"1").unwrap();
/// assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryKvStore {
    inner: Arc<StoreInner>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.map.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.map.read().is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn engine_id(&self) -> &str {
        "memory-v1"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.inner.check_open()?;
        Ok(self.inner.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.inner.check_open()?;
        self.inner.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.inner.check_open()?;
        self.inner.map.write().remove(key);
        Ok(())
    }

    fn iter_from(&self, start: &[u8]) -> Result<Box<dyn KvIterator>, EngineError> {
        self.inner.check_open()?;
        Ok(Box::new(MemoryIterator {
            inner: Arc::clone(&self.inner),
            cursor: Cursor::Start(start.to_vec()),
            prefix: None,
        }))
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>, EngineError> {
        self.inner.check_open()?;
        Ok(Box::new(MemoryIterator {
            inner: Arc::clone(&self.inner),
            cursor: Cursor::Start(prefix.to_vec()),
            prefix: Some(prefix.to_vec()),
        }))
    }

    fn close(&self) -> Result<(), EngineError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Iterator position: before the first key `>= Start`, or strictly after
/// the last returned key.
#[derive(Debug)]
enum Cursor {
    Start(Vec<u8>),
    After(Vec<u8>),
}

/// Cursor-based iterator; each step re-locks the map and seeks past the
/// previously returned key, so no lock is held between steps.
struct MemoryIterator {
    inner: Arc<StoreInner>,
    cursor: Cursor,
    prefix: Option<Vec<u8>>,
}

impl KvIterator for MemoryIterator {
    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, EngineError> {
        self.inner.check_open()?;
        let map = self.inner.map.read();
        let lower = match &self.cursor {
            Cursor::Start(key) => Bound::Included(key.clone()),
            Cursor::After(key) => Bound::Excluded(key.clone()),
        };
        let entry = map
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        drop(map);

        match entry {
            Some((key, value)) => {
                if let Some(prefix) = &self.prefix {
                    if !key.starts_with(prefix) {
                        return Ok(None);
                    }
                }
                self.cursor = Cursor::After(key.clone());
                Ok(Some((key, value)))
            }
            None => Ok(None),
        }
    }
}
