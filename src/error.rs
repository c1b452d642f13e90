use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum GraphError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Deserialize(#[from] DeserializeError),
}

/// Failure reported by a binary codec collaborator. Passed through unmodified.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
#[error("Binary codec failure: {message}")]
#[diagnostic(
    code(codec::failure),
    help("The external binary codec rejected the document; no partial result was produced.")
)]
pub struct CodecError {
    pub message: String,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by an asset loader.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct LoadError {
    pub message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum SerializeError {
    #[error("Contradictory serialization options: {reason}")]
    #[diagnostic(
        code(serialize::configuration),
        help("Check the combination of `format`, `stringify` and `useBinaryForm`.")
    )]
    Configuration { reason: String },

    #[error("Value of type `{type_name}` cannot be serialized")]
    #[diagnostic(
        code(serialize::unserializable_value),
        help("The root of a pass must be a dict, an array or an instance of a registered class.")
    )]
    UnserializableValue { type_name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum DeserializeError {
    #[error("Malformed artifact: {reason}")]
    #[diagnostic(
        code(deserialize::malformed_artifact),
        help("The artifact was not produced by a compatible serializer.")
    )]
    MalformedArtifact { reason: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Codec(#[from] CodecError),

    #[error("Asset id list contains a non-string entry: {value}")]
    #[diagnostic(
        code(deserialize::invalid_asset_id),
        help("Every tracked asset id must be a string; this is a serializer contract violation.")
    )]
    InvalidAssetId { value: String },

    #[error("Failed to load asset `{uuid}`")]
    #[diagnostic(code(deserialize::asset_load))]
    AssetLoad {
        uuid: String,
        #[source]
        source: LoadError,
    },

    #[error("Asset slot points at id #{index}, which is absent from the tracked id list")]
    #[diagnostic(
        code(deserialize::dangling_reference),
        help("The detail tracker does not match the artifact it was built for.")
    )]
    DanglingReference { index: usize },

    #[error("Object loaded for `{uuid}` is a `{class_name}`, not an asset")]
    #[diagnostic(
        code(deserialize::type_mismatch),
        help("The asset loader must return objects carrying the asset capability.")
    )]
    TypeMismatch { uuid: String, class_name: String },
}

impl DeserializeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DeserializeError::MalformedArtifact {
            reason: reason.into(),
        }
    }
}
