use crate::object::{ObjectKind, SceneObject};
use crate::uuid::compress_uuid;
use std::collections::BTreeSet;

/// Turns asset objects into id tokens and remembers every id it handed out.
#[derive(Debug, Default)]
pub struct AssetRefResolver {
    compress: bool,
    dependencies: BTreeSet<String>,
}

impl AssetRefResolver {
    pub fn new(compress: bool) -> Self {
        Self {
            compress,
            dependencies: BTreeSet::new(),
        }
    }

    /// Returns the token to emit for `asset`, or `None` if the object is not
    /// an asset or has not been persisted yet.
    pub fn resolve(&mut self, asset: &SceneObject) -> Option<String> {
        let ObjectKind::Asset { uuid: Some(uuid) } = &asset.kind else {
            return None;
        };
        if uuid.is_empty() {
            return None;
        }
        self.dependencies.insert(uuid.clone());
        Some(if self.compress {
            compress_uuid(uuid, true)
        } else {
            uuid.clone()
        })
    }

    /// Uncompressed ids touched so far.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn into_dependencies(self) -> BTreeSet<String> {
        self.dependencies
    }
}
