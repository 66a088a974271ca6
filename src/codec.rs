//! Codec abstraction for metadata records
//!
//! The cache marshals [`BlockMetadata`](crate::types::BlockMetadata) records
//! through an injected codec rather than a fixed wire format. A codec must
//! be deterministic: encoding the same record twice yields identical bytes,
//! which the cache relies on for equality checks.

use crate::types::BlockMetadata;

/// Marshals cache metadata records to and from bytes.
pub trait Codec: Send + Sync {
    /// Encode a metadata record. Deterministic for a given record.
    fn encode(&self, record: &BlockMetadata) -> Result<Vec<u8>, CodecError>;

    /// Decode a metadata record previously produced by [`encode`].
    ///
    /// [`encode`]: Codec::encode
    fn decode(&self, bytes: &[u8]) -> Result<BlockMetadata, CodecError>;
}

/// Failure to marshal or unmarshal a record.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// JSON codec, the default. Serde serialization of a fixed struct emits
/// fields in declaration order, so output is deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, record: &BlockMetadata) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(record).map_err(|e| CodecError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<BlockMetadata, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError(e.to_string()))
    }
}
