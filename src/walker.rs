//! Graph traversal. One `GraphWalker` serializes one root into one output
//! builder; every visited value goes through the removal, identity, asset,
//! value-type, prefab and schema checks before anything is emitted.

use crate::asset_ref::AssetRefResolver;
use crate::builder::{
    OutputBuilder, Slot, MOUNTED_KEY, OBJECT_ID_KEY, PERSISTENT_KEY, PREFAB_KEY, TRS_KEY,
};
use crate::context::ParsingContext;
use crate::error::SerializeError;
use crate::identity::{IdentityCache, ValueInfo};
use crate::missing::{MissingKind, MissingReport, MissingTypeReporter};
use crate::object::{
    number_to_json, ArrayRef, DictRef, ObjRef, ObjectFlags, ObjectId, ObjectKind, SceneObject,
    Variant,
};
use crate::prefab::PrefabPolicy;
use crate::schema::{ClassRegistry, FieldSchema};
use log::{debug, trace, warn};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};

/// Dict key kept despite the reserved `__` prefix, unless exporting.
pub const EDITOR_EXTRAS_KEY: &str = "__editorExtras__";

/// Everything a finished pass produced.
#[derive(Debug)]
pub struct WalkOutcome<T> {
    pub output: T,
    /// Uncompressed ids of every asset referenced by the output.
    pub dependencies: BTreeSet<String>,
    pub reports: Vec<MissingReport>,
}

/// Writer handed to custom serialization hooks.
pub trait PropertyWriter {
    /// Writes `value` under `name`, going through the full walker checks.
    fn write_property(&mut self, name: &str, value: &Variant) -> Result<(), SerializeError>;

    /// Writes every schema field of the object, as if it had no hook.
    fn write_this(&mut self) -> Result<(), SerializeError>;

    /// Writes the fields declared by the superclass chain only.
    fn write_super(&mut self) -> Result<(), SerializeError>;
}

pub struct GraphWalker<'a, B: OutputBuilder> {
    registry: &'a ClassRegistry,
    context: &'a ParsingContext,
    builder: B,
    cache: IdentityCache,
    assets: AssetRefResolver,
    prefab: PrefabPolicy,
    missing: MissingTypeReporter,
    root_info: Option<ValueInfo>,
    /// Stable id of the root, when the root is an asset.
    root_asset_uuid: Option<String>,
    /// Classes of the objects currently being written, innermost last.
    owners: Vec<String>,
}

impl<'a, B: OutputBuilder> GraphWalker<'a, B> {
    pub fn new(registry: &'a ClassRegistry, context: &'a ParsingContext, builder: B) -> Self {
        GraphWalker {
            registry,
            context,
            builder,
            cache: IdentityCache::new(),
            assets: AssetRefResolver::new(context.compress_uuid),
            prefab: PrefabPolicy::new(None, context),
            missing: MissingTypeReporter::new(),
            root_info: None,
            root_asset_uuid: None,
            owners: Vec::new(),
        }
    }

    /// Serializes `root` into the builder.
    ///
    /// # Errors
    /// Returns `UnserializableValue` if the root is a primitive or an object
    /// of an unregistered class.
    pub fn parse(&mut self, root: &Variant) -> Result<ValueInfo, SerializeError> {
        debug!(
            "serializing `{}` (format={:?}, exporting={}, compress_uuid={})",
            root.type_name(),
            self.context.format,
            self.context.exporting,
            self.context.compress_uuid
        );
        self.prefab = PrefabPolicy::new(root.identity(), self.context);
        let info = match root {
            Variant::Array(items) => self.emit_array(None, items)?,
            Variant::Dict(entries) => self.emit_dict(None, entries)?,
            Variant::Object(object) => self.parse_root_object(object)?,
            other => {
                return Err(SerializeError::UnserializableValue {
                    type_name: other.type_name(),
                })
            }
        };
        self.builder.set_root(info);
        debug!(
            "serialized {} objects, {} asset dependencies, {} missing",
            self.cache.len(),
            self.assets.dependencies().len(),
            self.missing.reports().len()
        );
        Ok(info)
    }

    pub fn finish(self) -> WalkOutcome<B::Output> {
        WalkOutcome {
            output: self.builder.dump(),
            dependencies: self.assets.into_dependencies(),
            reports: self.missing.into_reports(),
        }
    }

    fn parse_root_object(&mut self, object: &ObjRef) -> Result<ValueInfo, SerializeError> {
        let borrowed = object.borrow();
        if borrowed.kind != ObjectKind::Missing && !self.registry.contains(&borrowed.class_name) {
            return Err(SerializeError::UnserializableValue {
                type_name: borrowed.class_name.clone(),
            });
        }
        if let ObjectKind::Asset { uuid: Some(uuid) } = &borrowed.kind {
            self.root_asset_uuid = Some(uuid.clone());
        }
        self.emit_object(None, ObjectId::of(object), &borrowed)
    }

    fn visit(&mut self, slot: Slot, value: &Variant) -> Result<(), SerializeError> {
        match value {
            Variant::Null => self.builder.set_property_raw(slot, Value::Null),
            Variant::Bool(b) => self.builder.set_property_raw(slot, Value::Bool(*b)),
            Variant::Number(n) => self.builder.set_property_raw(slot, number_to_json(*n)),
            Variant::String(s) => self.builder.set_property_raw(slot, Value::String(s.clone())),
            Variant::Buffer(buffer) => self.builder.set_property_typed_array(slot, buffer),
            Variant::Array(items) => match self.cache.lookup(ObjectId::of(items)) {
                Some(info) => self.builder.set_property_parsed_object(slot, info),
                None => {
                    self.emit_array(Some(slot), items)?;
                }
            },
            Variant::Dict(entries) => match self.cache.lookup(ObjectId::of(entries)) {
                Some(info) => self.builder.set_property_parsed_object(slot, info),
                None => {
                    self.emit_dict(Some(slot), entries)?;
                }
            },
            Variant::Object(object) => self.visit_object(slot, object)?,
        }
        Ok(())
    }

    fn visit_object(&mut self, slot: Slot, object: &ObjRef) -> Result<(), SerializeError> {
        let id = ObjectId::of(object);
        let borrowed = object.borrow();

        if self.is_removed(&borrowed) {
            trace!("dropping removed `{}` at `{}`", borrowed.class_name, slot.key);
            self.builder.set_property_raw(slot, Value::Null);
            return Ok(());
        }

        if let Some(info) = self.cache.lookup(id) {
            self.builder.set_property_parsed_object(slot, info);
            return Ok(());
        }
        if let Some(root) = self.root_alias(&borrowed) {
            self.builder.set_property_parsed_object(slot, root);
            return Ok(());
        }

        match &borrowed.kind {
            ObjectKind::Asset { .. } => {
                match self.assets.resolve(&borrowed) {
                    Some(token) => {
                        self.builder
                            .set_property_asset_uuid(slot, &token, &borrowed.class_name)
                    }
                    None => {
                        self.report(Some(id), MissingKind::Asset, &slot, &borrowed.class_name);
                        self.builder.set_property_raw(slot, Value::Null);
                    }
                }
                return Ok(());
            }
            ObjectKind::ValueType => {
                // Only the first occurrence claims the slot; value types are
                // never back-referenced, so repeats are written out again.
                if !self.cache.claim_value_type_slot(id) {
                    trace!("repeated `{}` written in place", borrowed.class_name);
                }
                self.emit_value_type(slot, &borrowed);
                return Ok(());
            }
            ObjectKind::Node(node) if self.prefab.is_node_prunable(id, node) => {
                self.builder.set_property_raw(slot, Value::Null);
                return Ok(());
            }
            ObjectKind::Component(component) if self.prefab.is_component_prunable(component) => {
                self.builder.set_property_raw(slot, Value::Null);
                return Ok(());
            }
            _ => {}
        }

        if borrowed.kind != ObjectKind::Missing && !self.registry.contains(&borrowed.class_name) {
            self.report(Some(id), MissingKind::Type, &slot, &borrowed.class_name);
            self.builder.set_property_raw(slot, Value::Null);
            return Ok(());
        }

        self.emit_object(Some(slot), id, &borrowed)?;
        Ok(())
    }

    /// A copy of the root asset carries the root's id; point it at the root.
    fn root_alias(&self, object: &SceneObject) -> Option<ValueInfo> {
        match (&object.kind, &self.root_asset_uuid) {
            (ObjectKind::Asset { uuid: Some(uuid) }, Some(root_uuid)) if uuid == root_uuid => {
                self.root_info
            }
            _ => None,
        }
    }

    fn is_removed(&self, object: &SceneObject) -> bool {
        let flags = object.flags;
        let context = self.context;
        let dont_save = flags.contains(ObjectFlags::DONT_SAVE)
            && context.discard_invalid
            && !(flags.contains(ObjectFlags::DONT_DESTROY) && !context.exporting);
        dont_save
            || (flags.contains(ObjectFlags::EDITOR_ONLY) && context.exporting)
            || (flags.contains(ObjectFlags::DESTROYED) && context.discard_invalid)
    }

    /// Array elements that would be written as null are left out instead.
    fn is_filtered_element(&self, value: &Variant) -> bool {
        let Variant::Object(object) = value else {
            return false;
        };
        let id = ObjectId::of(object);
        let borrowed = object.borrow();
        if self.is_removed(&borrowed) {
            return true;
        }
        if self.cache.lookup(id).is_some() {
            return false;
        }
        match &borrowed.kind {
            ObjectKind::Node(node) => self.prefab.is_node_prunable(id, node),
            ObjectKind::Component(component) => self.prefab.is_component_prunable(component),
            _ => false,
        }
    }

    fn emit_object(
        &mut self,
        slot: Option<Slot>,
        id: ObjectId,
        object: &SceneObject,
    ) -> Result<ValueInfo, SerializeError> {
        if object.kind == ObjectKind::Missing {
            let owner = self.owners.last().cloned();
            self.missing.report(
                Some(id),
                MissingKind::Type,
                owner.as_deref(),
                slot.as_ref().map(|s| s.key.to_string()),
                &object.class_name,
            );
        }

        let hook = self.registry.hook(&object.class_name);
        let is_root = slot.is_none();
        let info = if hook.is_some() {
            self.builder
                .set_property_customized_class(slot, &object.class_name)
        } else {
            self.builder.set_property_class(slot, &object.class_name)
        };
        self.cache.register(id, info);
        if is_root && self.root_info.is_none() {
            self.root_info = Some(info);
        }
        trace!("emitting `{}` as #{}", object.class_name, info.index());

        let mut written = self.write_meta(info, object);
        let node = match &object.kind {
            ObjectKind::Node(node) => Some(node),
            _ => None,
        };
        if let Some(node) = node {
            self.prefab.enter_node(id, node);
        }
        self.owners.push(object.class_name.clone());

        let result = match hook {
            Some(hook) => {
                let mut writer = WriterContext {
                    walker: self,
                    object,
                    info,
                    written,
                };
                hook.serialize(object, &mut writer)
            }
            None if object.kind == ObjectKind::Missing => {
                self.write_raw_fields(info, object, &written)
            }
            None => {
                let registry = self.registry;
                let fields = registry.fields(&object.class_name);
                self.write_fields(info, object, &fields, &mut written)
            }
        };

        self.owners.pop();
        if node.is_some() {
            self.prefab.exit_node();
        }
        result.map(|()| info)
    }

    /// Writes node and component metadata. Returns the keys it wrote so
    /// fields of the same name are not written a second time.
    fn write_meta(&mut self, info: ValueInfo, object: &SceneObject) -> HashSet<String> {
        let mut meta: Vec<(&str, Value)> = Vec::new();
        if let Some(short_id) = &object.id {
            if self.prefab.keep_id(object) {
                meta.push((OBJECT_ID_KEY, json!(short_id)));
            }
        }
        match &object.kind {
            ObjectKind::Node(node) => {
                if let Some(link) = node.prefab {
                    meta.push((PREFAB_KEY, json!({ "sync": link.sync })));
                }
                if node.mounted {
                    meta.push((MOUNTED_KEY, Value::Bool(true)));
                }
                if node.persistent {
                    meta.push((PERSISTENT_KEY, Value::Bool(true)));
                }
            }
            ObjectKind::Component(component) if component.mounted => {
                meta.push((MOUNTED_KEY, Value::Bool(true)));
            }
            _ => {}
        }

        let mut written = HashSet::with_capacity(meta.len());
        for (key, value) in meta {
            self.builder.set_property_raw(Slot::new(info, key), value);
            written.insert(key.to_string());
        }
        written
    }

    fn write_fields(
        &mut self,
        info: ValueInfo,
        object: &SceneObject,
        fields: &[&FieldSchema],
        written: &mut HashSet<String>,
    ) -> Result<(), SerializeError> {
        let exporting = self.context.exporting;
        let strip_defaults = self.context.strip_defaults();
        for field in fields {
            if field.editor_only && exporting {
                continue;
            }
            let Some(value) = object.fields.get(&field.name) else {
                continue;
            };
            if field.name == TRS_KEY {
                if let Variant::Buffer(buffer) = value {
                    if buffer.is_identity_transform() {
                        continue;
                    }
                }
            }
            if strip_defaults && value.matches_default(&field.default) {
                continue;
            }
            if !written.insert(field.name.clone()) {
                trace!("`{}.{}` already written", object.class_name, field.name);
                continue;
            }
            self.visit(Slot::new(info, field.name.as_str()), value)?;

            if exporting {
                continue;
            }
            if let Some(former) = &field.formerly {
                if !fields.iter().any(|f| f.name == *former) && written.insert(former.clone()) {
                    self.visit(Slot::new(info, former.as_str()), value)?;
                }
            }
        }
        Ok(())
    }

    /// Placeholders carry their last known payload instead of a schema.
    fn write_raw_fields(
        &mut self,
        info: ValueInfo,
        object: &SceneObject,
        written: &HashSet<String>,
    ) -> Result<(), SerializeError> {
        for (name, value) in &object.fields {
            if written.contains(name) {
                continue;
            }
            self.visit(Slot::new(info, name.as_str()), value)?;
        }
        Ok(())
    }

    fn emit_value_type(&mut self, slot: Slot, object: &SceneObject) -> ValueInfo {
        let info = self.builder.set_property_value_type(slot, &object.class_name);
        let registry = self.registry;
        if registry.contains(&object.class_name) {
            for field in registry.fields(&object.class_name) {
                if let Some(value) = object.fields.get(&field.name) {
                    self.visit_inline(Slot::new(info, field.name.as_str()), value);
                }
            }
        } else {
            for (name, value) in &object.fields {
                self.visit_inline(Slot::new(info, name.as_str()), value);
            }
        }
        info
    }

    /// Value types only hold plain data.
    fn visit_inline(&mut self, slot: Slot, value: &Variant) {
        match value {
            Variant::Null => self.builder.set_property_raw(slot, Value::Null),
            Variant::Bool(b) => self.builder.set_property_raw(slot, Value::Bool(*b)),
            Variant::Number(n) => self.builder.set_property_raw(slot, number_to_json(*n)),
            Variant::String(s) => self.builder.set_property_raw(slot, Value::String(s.clone())),
            Variant::Buffer(buffer) => self.builder.set_property_typed_array(slot, buffer),
            Variant::Object(object) if object.borrow().kind.is_value_type() => {
                self.emit_value_type(slot, &object.borrow());
            }
            other => {
                warn!(
                    "`{}` inside a value type is not supported, writing null at `{}`",
                    other.type_name(),
                    slot.key
                );
                self.builder.set_property_raw(slot, Value::Null);
            }
        }
    }

    fn emit_array(&mut self, slot: Option<Slot>, array: &ArrayRef) -> Result<ValueInfo, SerializeError> {
        let items = array.borrow();
        let kept: Vec<&Variant> = items
            .iter()
            .filter(|item| !self.is_filtered_element(item))
            .collect();
        let info = self.builder.set_property_array(slot, kept.len());
        self.cache.register(ObjectId::of(array), info);
        for (index, item) in kept.into_iter().enumerate() {
            self.visit(Slot::new(info, index), item)?;
        }
        Ok(info)
    }

    fn emit_dict(&mut self, slot: Option<Slot>, dict: &DictRef) -> Result<ValueInfo, SerializeError> {
        let info = self.builder.set_property_dict(slot);
        self.cache.register(ObjectId::of(dict), info);
        let entries = dict.borrow();
        for (key, value) in entries.iter() {
            let reserved = key.starts_with("__")
                && !(key == EDITOR_EXTRAS_KEY && !self.context.exporting);
            if reserved {
                continue;
            }
            self.visit(Slot::new(info, key.as_str()), value)?;
        }
        Ok(info)
    }

    fn report(&mut self, id: Option<ObjectId>, kind: MissingKind, slot: &Slot, attempted: &str) {
        let owner = self.owners.last().cloned();
        self.missing
            .report(id, kind, owner.as_deref(), Some(slot.key.to_string()), attempted);
    }
}

/// Hook-side view of the object being written.
struct WriterContext<'w, 'a, B: OutputBuilder> {
    walker: &'w mut GraphWalker<'a, B>,
    object: &'w SceneObject,
    info: ValueInfo,
    written: HashSet<String>,
}

impl<B: OutputBuilder> PropertyWriter for WriterContext<'_, '_, B> {
    fn write_property(&mut self, name: &str, value: &Variant) -> Result<(), SerializeError> {
        if !self.written.insert(name.to_string()) {
            warn!(
                "`{}.{name}` is already written, a custom hook cannot overwrite it",
                self.object.class_name
            );
            return Ok(());
        }
        self.walker.visit(Slot::new(self.info, name), value)
    }

    fn write_this(&mut self) -> Result<(), SerializeError> {
        let registry = self.walker.registry;
        let fields = registry.fields(&self.object.class_name);
        self.walker
            .write_fields(self.info, self.object, &fields, &mut self.written)
    }

    fn write_super(&mut self) -> Result<(), SerializeError> {
        let registry = self.walker.registry;
        let fields = registry.super_fields(&self.object.class_name);
        self.walker
            .write_fields(self.info, self.object, &fields, &mut self.written)
    }
}
