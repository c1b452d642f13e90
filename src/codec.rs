use crate::builder::compiled::CompiledDocument;
use crate::error::CodecError;

/// Encodes compiled documents to bytes and back.
///
/// Implementations are opaque to the engine: their errors reach the caller
/// unchanged and no partial artifact is produced.
pub trait BinaryCodec {
    fn encode(&self, document: &CompiledDocument) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<CompiledDocument, CodecError>;
}

/// Default codec: the compiled document as compact JSON bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl BinaryCodec for JsonCodec {
    fn encode(&self, document: &CompiledDocument) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(document).map_err(|e| CodecError::new(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CompiledDocument, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::new(e.to_string()))
    }
}
