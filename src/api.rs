use crate::builder::compiled::{CompiledBuilder, CompiledDocument};
use crate::builder::OutputBuilder;
use crate::builder::dynamic::DynamicBuilder;
use crate::codec::{BinaryCodec, JsonCodec};
use crate::context::{OutputFormat, ParsingContext, SerializeOptions};
use crate::deserializer::{AssetLoader, DeserializeOutput, Deserializer};
use crate::error::{CodecError, DeserializeError, SerializeError};
use crate::missing::MissingReport;
use crate::object::Variant;
use crate::schema::ClassRegistry;
use crate::walker::{GraphWalker, WalkOutcome};
use serde::{Serialize, Serializer as _};
use serde_json::Value;
use std::collections::BTreeSet;

/// A serialized graph in one of its output forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// Dynamic form as a JSON structure.
    Dynamic(Value),
    /// Dynamic form rendered as text.
    Text(String),
    Compiled(CompiledDocument),
    /// Compiled form passed through a binary codec.
    Binary(Vec<u8>),
}

impl Serialize for Artifact {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Artifact::Dynamic(value) => value.serialize(serializer),
            Artifact::Text(text) => serializer.serialize_str(text),
            Artifact::Compiled(document) => document.serialize(serializer),
            Artifact::Binary(bytes) => serializer.serialize_bytes(bytes),
        }
    }
}

impl Artifact {
    /// Renders the artifact as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// Renders the artifact as YAML.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }

    #[must_use]
    pub fn as_dynamic(&self) -> Option<&Value> {
        match self {
            Artifact::Dynamic(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_compiled(&self) -> Option<&CompiledDocument> {
        match self {
            Artifact::Compiled(document) => Some(document),
            _ => None,
        }
    }
}

/// Result of a successful serialization.
#[derive(Debug)]
pub struct SerializeOutput {
    pub artifact: Artifact,
    /// Uncompressed ids of every asset the artifact refers to.
    pub dependencies: BTreeSet<String>,
    pub reports: Vec<MissingReport>,
}

/// Serialization entry point bound to a class registry.
pub struct Serializer<'a> {
    registry: &'a ClassRegistry,
    codec: &'a dyn BinaryCodec,
}

impl<'a> Serializer<'a> {
    pub fn new(registry: &'a ClassRegistry) -> Self {
        Self {
            registry,
            codec: &JsonCodec,
        }
    }

    /// Codec used when `useBinaryForm` is set.
    #[must_use]
    pub fn with_codec(mut self, codec: &'a dyn BinaryCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Serializes the graph under `root`.
    ///
    /// # Errors
    /// Returns `Configuration` for contradictory options, `UnserializableValue`
    /// for an unsupported root and `Codec` if the binary codec fails.
    pub fn serialize(
        &self,
        root: &Variant,
        options: &SerializeOptions,
    ) -> Result<SerializeOutput, SerializeError> {
        let context = ParsingContext::new(options)?;
        match context.format {
            OutputFormat::Dynamic => {
                let outcome = self.walk(root, &context, DynamicBuilder::new())?;
                let artifact = if context.stringify {
                    Artifact::Text(
                        serde_json::to_string_pretty(&outcome.output)
                            .map_err(|e| CodecError::new(e.to_string()))?,
                    )
                } else {
                    Artifact::Dynamic(outcome.output)
                };
                Ok(SerializeOutput {
                    artifact,
                    dependencies: outcome.dependencies,
                    reports: outcome.reports,
                })
            }
            OutputFormat::Compiled => {
                let outcome = self.walk(root, &context, CompiledBuilder::new())?;
                let artifact = if context.use_binary_form {
                    Artifact::Binary(self.codec.encode(&outcome.output)?)
                } else {
                    Artifact::Compiled(outcome.output)
                };
                Ok(SerializeOutput {
                    artifact,
                    dependencies: outcome.dependencies,
                    reports: outcome.reports,
                })
            }
        }
    }

    fn walk<B: OutputBuilder>(
        &self,
        root: &Variant,
        context: &ParsingContext,
        builder: B,
    ) -> Result<WalkOutcome<B::Output>, SerializeError> {
        let mut walker = GraphWalker::new(self.registry, context, builder);
        walker.parse(root)?;
        Ok(walker.finish())
    }
}

/// Serializes `root` with the default codec.
///
/// # Errors
/// See [`Serializer::serialize`].
pub fn serialize(
    registry: &ClassRegistry,
    root: &Variant,
    options: &SerializeOptions,
) -> Result<SerializeOutput, SerializeError> {
    Serializer::new(registry).serialize(root, options)
}

/// Rebuilds a graph with the default codec, loading assets through `loader`.
///
/// # Errors
/// See [`Deserializer::deserialize`].
pub async fn deserialize(
    registry: &ClassRegistry,
    loader: &dyn AssetLoader,
    artifact: &Artifact,
) -> Result<DeserializeOutput, DeserializeError> {
    Deserializer::new(registry, loader).deserialize(artifact).await
}
