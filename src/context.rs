use crate::error::SerializeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-inspectable JSON document.
    #[default]
    Dynamic,
    /// Compact document for the paired fast loader.
    Compiled,
}

/// Caller-facing options of a serialization pass.
///
/// Field names follow the camelCase keys used by option files, so the same
/// record can be loaded from JSON or YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SerializeOptions {
    pub format: OutputFormat,
    pub exporting: bool,
    pub compress_uuid: bool,
    /// Dynamic form only: render the document as text.
    pub stringify: bool,
    pub dont_strip_default: bool,
    /// Compiled form only: pass the document through the binary codec.
    pub use_binary_form: bool,
    pub keep_node_uuid: bool,
    pub discard_invalid: bool,
    pub reserve_contents_for_syncable_prefab: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Dynamic,
            exporting: false,
            compress_uuid: false,
            stringify: false,
            dont_strip_default: false,
            use_binary_form: false,
            keep_node_uuid: false,
            discard_invalid: true,
            reserve_contents_for_syncable_prefab: false,
        }
    }
}

impl SerializeOptions {
    /// Options for a release export in the compiled form.
    pub fn export() -> Self {
        Self {
            format: OutputFormat::Compiled,
            exporting: true,
            ..Self::default()
        }
    }

    /// # Errors
    /// Returns a `Configuration` error if the text is not a valid option record.
    pub fn from_json_str(text: &str) -> Result<Self, SerializeError> {
        serde_json::from_str(text).map_err(|e| SerializeError::Configuration {
            reason: format!("invalid option file: {e}"),
        })
    }

    /// # Errors
    /// Returns a `Configuration` error if the text is not a valid option record.
    pub fn from_yaml_str(text: &str) -> Result<Self, SerializeError> {
        serde_yaml::from_str(text).map_err(|e| SerializeError::Configuration {
            reason: format!("invalid option file: {e}"),
        })
    }
}

/// Validated, read-only configuration of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsingContext {
    pub format: OutputFormat,
    pub exporting: bool,
    pub compress_uuid: bool,
    pub stringify: bool,
    pub discard_invalid: bool,
    pub dont_strip_default: bool,
    pub keep_node_uuid: bool,
    pub reserve_contents_for_all_syncable_prefab: bool,
    pub use_binary_form: bool,
}

impl ParsingContext {
    /// # Errors
    /// Returns `Configuration` when options contradict each other.
    pub fn new(options: &SerializeOptions) -> Result<Self, SerializeError> {
        if options.stringify && options.format == OutputFormat::Compiled {
            return Err(SerializeError::Configuration {
                reason: "`stringify` only applies to the dynamic form".into(),
            });
        }
        if options.use_binary_form && options.format == OutputFormat::Dynamic {
            return Err(SerializeError::Configuration {
                reason: "`useBinaryForm` only applies to the compiled form".into(),
            });
        }
        Ok(Self {
            format: options.format,
            exporting: options.exporting,
            compress_uuid: options.compress_uuid,
            stringify: options.stringify,
            discard_invalid: options.discard_invalid,
            dont_strip_default: options.dont_strip_default,
            keep_node_uuid: options.keep_node_uuid,
            reserve_contents_for_all_syncable_prefab: options.reserve_contents_for_syncable_prefab,
            use_binary_form: options.use_binary_form,
        })
    }

    /// Fields equal to their schema default are elided.
    pub fn strip_defaults(&self) -> bool {
        self.exporting && !self.dont_strip_default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SerializeOptions::default();
        assert!(options.discard_invalid);
        let context = ParsingContext::new(&options).unwrap();
        assert_eq!(context.format, OutputFormat::Dynamic);
        assert!(!context.strip_defaults());
    }

    #[test]
    fn test_stringify_compiled_is_rejected() {
        let options = SerializeOptions {
            stringify: true,
            ..SerializeOptions::export()
        };
        assert!(matches!(
            ParsingContext::new(&options),
            Err(SerializeError::Configuration { .. })
        ));
    }

    #[test]
    fn test_binary_dynamic_is_rejected() {
        let options = SerializeOptions {
            use_binary_form: true,
            ..SerializeOptions::default()
        };
        assert!(ParsingContext::new(&options).is_err());
    }

    #[test]
    fn test_options_from_json() {
        let options =
            SerializeOptions::from_json_str(r#"{ "exporting": true, "compressUuid": true }"#)
                .unwrap();
        assert!(options.exporting);
        assert!(options.compress_uuid);
        assert!(options.discard_invalid);
        assert!(ParsingContext::new(&options).unwrap().strip_defaults());
    }

    #[test]
    fn test_options_from_yaml() {
        let yaml = "format: compiled\nexporting: true\nuseBinaryForm: true\nreserveContentsForSyncablePrefab: true\n";
        let options = SerializeOptions::from_yaml_str(yaml).unwrap();
        assert_eq!(options.format, OutputFormat::Compiled);
        assert!(options.use_binary_form);
        assert!(options.reserve_contents_for_syncable_prefab);
    }

    #[test]
    fn test_options_unknown_format() {
        let result = SerializeOptions::from_json_str(r#"{ "format": "xml" }"#);
        assert!(matches!(result, Err(SerializeError::Configuration { .. })));
    }
}
