//! Error types for the block cache and disk limiter

use crate::types::BlockId;
use thiserror::Error;

/// Errors surfaced by the disk block cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The requested block is not in the cache. This is a normal negative
    /// result, not a failure.
    #[error("block {0} not found in the disk cache")]
    NoSuchBlock(BlockId),

    /// A metadata or LRU lookup found no entry for the key.
    #[error("no entry found")]
    NotFound,

    /// A put carried a payload that differs from the entry already cached
    /// under the same block id.
    #[error("inconsistent put for block {0}: payload differs from cached entry")]
    InconsistentBlock(BlockId),

    /// A single block is larger than the entire configured cache, so no
    /// amount of eviction can admit it.
    #[error("block {0} of {1} bytes exceeds the cache capacity of {2} bytes")]
    OverCapacity(BlockId, u64, u64),

    /// Stores disagree about a block (e.g. a payload exists without its
    /// metadata record). Unrecoverable at this layer.
    #[error("cache corrupted for block {block}: {detail}")]
    Corrupted {
        /// The block whose records are inconsistent.
        block: BlockId,
        /// What was found to disagree.
        detail: String,
    },

    /// The cache has been shut down.
    #[error("disk cache is shut down")]
    ShutDown,

    /// A construction-time parameter violated its documented range. Fatal.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// The injected codec failed to marshal or unmarshal a metadata record.
    #[error("codec error: {0}")]
    Codec(String),

    /// Key-value engine failure.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Admission was refused by the disk limiter.
    #[error(transparent)]
    Limiter(#[from] LimiterError),
}

/// Errors surfaced by the backpressure disk limiter.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The context was cancelled. Propagated unchanged so callers can
    /// distinguish cancellation from real failures.
    #[error("operation cancelled")]
    Cancelled,

    /// The context deadline passed before the operation completed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A construction-time parameter violated its documented range. Fatal.
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// A caller passed a value outside the operation's domain, such as a
    /// zero-byte admission request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The disk probe failed to report free space.
    #[error("disk probe failed: {0}")]
    Probe(#[source] std::io::Error),
}

impl LimiterError {
    /// Whether this error is a cancellation (cancel or deadline), the only
    /// retryable failure the limiter produces.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Errors surfaced by a key-value engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

/// Result alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Result alias for limiter operations.
pub type LimiterResult<T> = std::result::Result<T, LimiterError>;
