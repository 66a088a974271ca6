//! Core data types for the block cache and disk limiter
//!
//! # Key Types
//!
//! - **`FolderId`**: 16-byte identifier of a top-level folder, opaque to the
//!   cache beyond its use as an index prefix
//! - **`BlockId`**: variable-length content address of an encrypted block
//! - **`ServerKeyHalf`**: 32-byte server key half persisted verbatim next to
//!   the block payload
//! - **`BlockMetadata`**: the per-block record kept in the metadata store
//!   (owning folder, last access time, stored size)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length in bytes of a [`FolderId`].
pub const FOLDER_ID_LEN: usize = 16;

/// Length in bytes of a [`ServerKeyHalf`].
pub const SERVER_KEY_HALF_LEN: usize = 32;

/// Identifier of a top-level folder.
///
/// Folder ids prefix every folder-index key, so all blocks belonging to one
/// folder are contiguous under a 16-byte prefix scan.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FolderId([u8; FOLDER_ID_LEN]);

impl FolderId {
    /// Create a folder id from its raw bytes.
    pub fn new(bytes: [u8; FOLDER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a deterministic folder id from a single byte, for tests and
    /// simulations. The byte is placed in the first position with the rest
    /// zeroed.
    pub fn fake(tag: u8) -> Self {
        let mut bytes = [0u8; FOLDER_ID_LEN];
        bytes[0] = tag;
        Self(bytes)
    }

    /// Raw bytes of the folder id.
    pub fn as_bytes(&self) -> &[u8; FOLDER_ID_LEN] {
        &self.0
    }

    /// Parse a folder id from a slice, returning `None` when the length is
    /// not exactly [`FOLDER_ID_LEN`].
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; FOLDER_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FolderId({})", hex_prefix(&self.0))
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_prefix(&self.0))
    }
}

/// Content address of a cached block.
///
/// Block ids are produced upstream (a hash of the encrypted payload) and are
/// opaque here; the cache only relies on them being unique per payload and
/// byte-comparable. Ids of different lengths are permitted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(Vec<u8>);

impl BlockId {
    /// Create a block id from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Create a block id by copying a slice.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Raw bytes of the block id.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the id in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the id is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", hex_prefix(&self.0))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_prefix(&self.0))
    }
}

/// Server key half stored alongside a block payload.
///
/// The cache persists this verbatim as a fixed-length suffix of the block
/// store entry and never interprets it.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerKeyHalf([u8; SERVER_KEY_HALF_LEN]);

impl ServerKeyHalf {
    /// Create a key half from its raw bytes.
    pub fn new(bytes: [u8; SERVER_KEY_HALF_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the key half.
    pub fn as_bytes(&self) -> &[u8; SERVER_KEY_HALF_LEN] {
        &self.0
    }

    /// Parse a key half from a slice, returning `None` when the length is
    /// not exactly [`SERVER_KEY_HALF_LEN`].
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SERVER_KEY_HALF_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for ServerKeyHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerKeyHalf({})", hex_prefix(&self.0))
    }
}

/// Metadata record for a cached block, stored in the metadata store keyed by
/// block id and marshaled through the injected [`Codec`](crate::codec::Codec).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Folder the block belongs to.
    pub folder_id: FolderId,
    /// Last access time, refreshed on every get and duplicate put.
    pub lru_time: DateTime<Utc>,
    /// Stored size of the block entry (payload plus key half) in bytes.
    pub block_size: u32,
}

/// Render the leading bytes of an id as lowercase hex, eliding the tail of
/// long ids so log lines stay readable.
fn hex_prefix(bytes: &[u8]) -> String {
    const VISIBLE: usize = 8;
    let shown = &bytes[..bytes.len().min(VISIBLE)];
    let mut out = String::with_capacity(2 * shown.len() + 1);
    for b in shown {
        out.push_str(&format!("{b:02x}"));
    }
    if bytes.len() > VISIBLE {
        out.push('…');
    }
    out
}
