//! Type-schema registry: class name to declared field list, plus instance
//! construction for the deserializer.

use crate::error::SerializeError;
use crate::object::{ComponentInfo, Dict, NodeInfo, ObjectKind, SceneObject, Variant};
use crate::walker::PropertyWriter;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Which capability set instances of a class carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassKind {
    #[default]
    Plain,
    Asset,
    Node,
    /// A node that acts as the top-level scene container.
    Scene,
    Component,
    ValueType,
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub default: Variant,
    /// Name under which older artifacts stored this field.
    pub formerly: Option<String>,
    /// Visible to the editor only; never exported.
    pub editor_only: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, default: impl Into<Variant>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            formerly: None,
            editor_only: false,
        }
    }

    #[must_use]
    pub fn formerly(mut self, name: impl Into<String>) -> Self {
        self.formerly = Some(name.into());
        self
    }

    #[must_use]
    pub fn editor_only(mut self) -> Self {
        self.editor_only = true;
        self
    }
}

/// Per-type serialization hook.
///
/// `serialize` takes over writing the object's content; it may call back into
/// the walker through the [`PropertyWriter`]. `deserialize` receives every
/// property the hook wrote, already reconstructed.
pub trait CustomSerialize {
    fn serialize(
        &self,
        object: &SceneObject,
        writer: &mut dyn PropertyWriter,
    ) -> Result<(), SerializeError>;

    fn deserialize(&self, object: &mut SceneObject, properties: Dict) {
        object.fields.extend(properties);
    }
}

#[derive(Clone)]
pub struct ClassSchema {
    pub name: String,
    pub parent: Option<String>,
    pub kind: ClassKind,
    /// Fields declared by this class, excluding inherited ones.
    pub fields: Vec<FieldSchema>,
    pub hook: Option<Rc<dyn CustomSerialize>>,
}

impl ClassSchema {
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            parent: None,
            kind,
            fields: Vec::new(),
            hook: None,
        }
    }

    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_hook(mut self, hook: impl CustomSerialize + 'static) -> Self {
        self.hook = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for ClassSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassSchema")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassSchema>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ClassSchema) -> &mut Self {
        self.classes.insert(schema.name.clone(), schema);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ClassSchema> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Superclass chain starting at `name` itself, stopping at the first
    /// unregistered ancestor.
    fn lineage(&self, name: &str) -> Vec<&ClassSchema> {
        let mut chain = Vec::new();
        let mut current = self.classes.get(name);
        while let Some(schema) = current {
            // Guard against accidental inheritance loops.
            if chain.iter().any(|c: &&ClassSchema| c.name == schema.name) {
                break;
            }
            chain.push(schema);
            current = schema.parent.as_deref().and_then(|p| self.classes.get(p));
        }
        chain
    }

    /// Every field visible on `name`, ancestors first. A redeclared field
    /// keeps its ancestor's position but takes the subclass definition.
    pub fn fields(&self, name: &str) -> Vec<&FieldSchema> {
        let mut fields: Vec<&FieldSchema> = Vec::new();
        for schema in self.lineage(name).into_iter().rev() {
            for field in &schema.fields {
                match fields.iter_mut().find(|f| f.name == field.name) {
                    Some(slot) => *slot = field,
                    None => fields.push(field),
                }
            }
        }
        fields
    }

    /// Fields of the immediate superclass of `name`.
    pub fn super_fields(&self, name: &str) -> Vec<&FieldSchema> {
        match self.get(name).and_then(|s| s.parent.as_deref()) {
            Some(parent) => self.fields(parent),
            None => Vec::new(),
        }
    }

    /// The nearest custom hook along the superclass chain.
    pub fn hook(&self, name: &str) -> Option<Rc<dyn CustomSerialize>> {
        self.lineage(name).into_iter().find_map(|s| s.hook.clone())
    }

    /// Builds an instance with every declared field at its default.
    pub fn instantiate(&self, name: &str) -> Option<SceneObject> {
        let schema = self.get(name)?;
        let kind = match schema.kind {
            ClassKind::Plain => ObjectKind::Plain,
            ClassKind::Asset => ObjectKind::Asset { uuid: None },
            ClassKind::Node => ObjectKind::Node(NodeInfo::default()),
            ClassKind::Scene => ObjectKind::Node(NodeInfo {
                scene: true,
                ..NodeInfo::default()
            }),
            ClassKind::Component => ObjectKind::Component(ComponentInfo::default()),
            ClassKind::ValueType => ObjectKind::ValueType,
        };
        let mut object = SceneObject::new(name, kind);
        for field in self.fields(name) {
            object
                .fields
                .insert(field.name.clone(), field.default.deep_clone());
        }
        Some(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        registry
            .register(
                ClassSchema::new("Base", ClassKind::Plain)
                    .field(FieldSchema::new("a", 1))
                    .field(FieldSchema::new("b", "x")),
            )
            .register(
                ClassSchema::new("Derived", ClassKind::Plain)
                    .extends("Base")
                    .field(FieldSchema::new("c", true))
                    .field(FieldSchema::new("a", 2)),
            );
        registry
    }

    #[test]
    fn test_fields_are_inherited_in_declaration_order() {
        let registry = registry();
        let names: Vec<&str> = registry
            .fields("Derived")
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        let a = registry.fields("Derived")[0];
        assert_eq!(a.default.as_f64(), Some(2.0));
    }

    #[test]
    fn test_super_fields() {
        let registry = registry();
        let names: Vec<&str> = registry
            .super_fields("Derived")
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(registry.super_fields("Base").is_empty());
    }

    #[test]
    fn test_instantiate_fills_defaults() {
        let registry = registry();
        let object = registry.instantiate("Derived").unwrap();
        assert_eq!(object.get("a").and_then(Variant::as_f64), Some(2.0));
        assert!(matches!(object.get("c"), Some(Variant::Bool(true))));
        assert!(registry.instantiate("Unknown").is_none());
    }

    #[test]
    fn test_instantiate_scene_marks_node() {
        let mut registry = ClassRegistry::new();
        registry.register(ClassSchema::new("Scene", ClassKind::Scene));
        let scene = registry.instantiate("Scene").unwrap();
        assert!(matches!(scene.kind, ObjectKind::Node(NodeInfo { scene: true, .. })));
    }
}
