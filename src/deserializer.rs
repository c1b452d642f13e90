//! Load path. Rebuilds the object graph from an artifact in three phases:
//! a synchronous reconstruction that leaves every asset reference as a null
//! slot recorded in [`Details`], a concurrent load of every referenced asset,
//! and a synchronous rewrite that drops the loaded assets into their slots.

use crate::api::Artifact;
use crate::builder::{
    PropertyKey, EXPECTED_TYPE_KEY, ID_REF_KEY, MOUNTED_KEY, OBJECT_ID_KEY, PERSISTENT_KEY,
    PREFAB_KEY, TYPED_ARRAY_TYPE, TYPE_KEY, UUID_KEY,
};
use crate::codec::{BinaryCodec, JsonCodec};
use crate::error::{DeserializeError, LoadError};
use crate::missing::{MissingKind, MissingReport, MissingTypeReporter};
use crate::object::{
    ArrayRef, Dict, DictRef, ObjRef, ObjectId, ObjectKind, PrefabLink, TypedArray, Variant,
};
use crate::schema::ClassRegistry;
use crate::uuid::decompress_uuid;
use futures_util::future::{try_join_all, LocalBoxFuture};
use log::{debug, trace};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Host-side asset lookup.
pub trait AssetLoader {
    fn load<'a>(&'a self, uuid: &'a str) -> LocalBoxFuture<'a, Result<ObjRef, LoadError>>;
}

/// Container holding an asset slot.
#[derive(Debug, Clone)]
pub enum SlotOwner {
    Object(ObjRef),
    Dict(DictRef),
    Array(ArrayRef),
}

impl SlotOwner {
    fn is_object(&self, object: &ObjRef) -> bool {
        matches!(self, SlotOwner::Object(owner) if Rc::ptr_eq(owner, object))
    }
}

#[derive(Debug, Clone)]
pub struct AssetSlot {
    pub owner: SlotOwner,
    pub key: PropertyKey,
    /// Position in [`Details::uuid_list`].
    pub uuid_index: usize,
    pub expected_type: Option<String>,
}

/// Every asset reference found while rebuilding a graph.
#[derive(Debug, Default, Clone)]
pub struct Details {
    /// Distinct asset ids, in first-seen order. Entries are expected to be
    /// strings; anything else is rejected when the assets are resolved.
    pub uuid_list: Vec<Value>,
    pub slots: Vec<AssetSlot>,
    index: HashMap<String, usize>,
}

impl Details {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a slot referring to `uuid` and returns the id's list index.
    pub fn push(
        &mut self,
        owner: SlotOwner,
        key: PropertyKey,
        uuid: Value,
        expected_type: Option<String>,
    ) -> usize {
        let uuid_index = match uuid.as_str().and_then(|s| self.index.get(s)) {
            Some(&index) => index,
            None => {
                if let Some(s) = uuid.as_str() {
                    self.index.insert(s.to_string(), self.uuid_list.len());
                }
                self.uuid_list.push(uuid);
                self.uuid_list.len() - 1
            }
        };
        self.slots.push(AssetSlot {
            owner,
            key,
            uuid_index,
            expected_type,
        });
        uuid_index
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Moves the slots of `object` stored under `from` to `to`.
    fn rekey(&mut self, object: &ObjRef, from: &str, to: &str) {
        for slot in &mut self.slots {
            if slot.owner.is_object(object) && slot.key == PropertyKey::from(from) {
                slot.key = PropertyKey::from(to);
            }
        }
    }
}

#[derive(Debug)]
pub struct DeserializeOutput {
    pub root: Variant,
    pub details: Details,
    pub reports: Vec<MissingReport>,
}

pub struct Deserializer<'a> {
    registry: &'a ClassRegistry,
    loader: &'a dyn AssetLoader,
    codec: &'a dyn BinaryCodec,
}

impl<'a> Deserializer<'a> {
    pub fn new(registry: &'a ClassRegistry, loader: &'a dyn AssetLoader) -> Self {
        Self {
            registry,
            loader,
            codec: &JsonCodec,
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: &'a dyn BinaryCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Rebuilds the graph stored in `artifact` and resolves its assets.
    ///
    /// # Errors
    /// Fails as a whole if the artifact is malformed, the codec rejects it,
    /// or any referenced asset cannot be loaded.
    pub async fn deserialize(&self, artifact: &Artifact) -> Result<DeserializeOutput, DeserializeError> {
        let document = self.decode(artifact)?;
        let output = self.reconstruct(&document)?;
        let loaded = self.resolve_assets(&output.details).await?;
        Self::rewrite(&output.details, &loaded)?;
        debug!(
            "deserialized `{}` with {} asset slots",
            output.root.type_name(),
            output.details.slots.len()
        );
        Ok(output)
    }

    fn decode<'d>(&self, artifact: &'d Artifact) -> Result<Cow<'d, Value>, DeserializeError> {
        Ok(match artifact {
            Artifact::Dynamic(value) => Cow::Borrowed(value),
            Artifact::Text(text) => Cow::Owned(
                serde_json::from_str(text)
                    .map_err(|e| DeserializeError::malformed(format!("invalid JSON: {e}")))?,
            ),
            Artifact::Compiled(document) => Cow::Owned(document.expand()?),
            Artifact::Binary(bytes) => Cow::Owned(self.codec.decode(bytes)?.expand()?),
        })
    }

    /// Builds the graph of a dynamic-form document. Asset references are
    /// left as null and listed in the returned details.
    ///
    /// # Errors
    /// Returns `MalformedArtifact` if the document is not an entry list or an
    /// entry refers to a missing one.
    pub fn reconstruct(&self, document: &Value) -> Result<DeserializeOutput, DeserializeError> {
        let entries = document
            .as_array()
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| DeserializeError::malformed("expected a non-empty entry list"))?;
        let mut rebuild = Rebuild {
            registry: self.registry,
            shells: Vec::with_capacity(entries.len()),
            details: Details::new(),
            missing: MissingTypeReporter::new(),
        };
        for entry in entries {
            let shell = rebuild.shell(entry)?;
            rebuild.shells.push(shell);
        }
        for (entry, shell) in entries.iter().zip(rebuild.shells.clone()) {
            rebuild.fill(&shell, entry)?;
        }
        trace!(
            "rebuilt {} entries, {} asset slots",
            rebuild.shells.len(),
            rebuild.details.slots.len()
        );
        Ok(DeserializeOutput {
            root: rebuild.shells[0].clone(),
            details: rebuild.details,
            reports: rebuild.missing.into_reports(),
        })
    }

    /// Loads every listed asset concurrently. The first failure fails the
    /// whole call.
    ///
    /// # Errors
    /// Returns `InvalidAssetId` for a non-string id and `AssetLoad` for a
    /// failed load.
    pub async fn resolve_assets(&self, details: &Details) -> Result<Vec<ObjRef>, DeserializeError> {
        let uuids = details
            .uuid_list
            .iter()
            .map(|value| {
                value.as_str().ok_or_else(|| DeserializeError::InvalidAssetId {
                    value: value.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!("loading {} assets", uuids.len());
        try_join_all(uuids.into_iter().map(|uuid| async move {
            self.loader
                .load(uuid)
                .await
                .map_err(|source| DeserializeError::AssetLoad {
                    uuid: uuid.to_string(),
                    source,
                })
        }))
        .await
    }

    /// Writes loaded assets into their slots. `loaded` is indexed like
    /// [`Details::uuid_list`].
    ///
    /// # Errors
    /// Returns `DanglingReference` for a slot whose id is not listed and
    /// `TypeMismatch` if a loaded object is not an asset.
    pub fn rewrite(details: &Details, loaded: &[ObjRef]) -> Result<(), DeserializeError> {
        for slot in &details.slots {
            let dangling = || DeserializeError::DanglingReference {
                index: slot.uuid_index,
            };
            let uuid = details.uuid_list.get(slot.uuid_index).ok_or_else(dangling)?;
            let asset = loaded.get(slot.uuid_index).ok_or_else(dangling)?;
            {
                let borrowed = asset.borrow();
                if !borrowed.kind.is_asset() {
                    return Err(DeserializeError::TypeMismatch {
                        uuid: uuid.as_str().unwrap_or_default().to_string(),
                        class_name: borrowed.class_name.clone(),
                    });
                }
            }
            let value = Variant::Object(asset.clone());
            match (&slot.owner, &slot.key) {
                (SlotOwner::Object(object), PropertyKey::Name(name)) => {
                    let mut object = object.borrow_mut();
                    if object.fields.contains_key(name) {
                        object.fields.insert(name.clone(), value);
                    }
                }
                (SlotOwner::Dict(dict), PropertyKey::Name(name)) => {
                    dict.borrow_mut().insert(name.clone(), value);
                }
                (SlotOwner::Array(array), PropertyKey::Index(index)) => {
                    if let Some(item) = array.borrow_mut().get_mut(*index) {
                        *item = value;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

struct Rebuild<'r> {
    registry: &'r ClassRegistry,
    shells: Vec<Variant>,
    details: Details,
    missing: MissingTypeReporter,
}

impl Rebuild<'_> {
    /// Empty container for a top-level entry, so that back-references can be
    /// resolved before the entry itself is filled.
    fn shell(&mut self, entry: &Value) -> Result<Variant, DeserializeError> {
        match entry {
            Value::Array(_) => Ok(Variant::array(Vec::new())),
            Value::Object(map) => match map.get(TYPE_KEY) {
                Some(Value::String(class_name)) if class_name != TYPED_ARRAY_TYPE => {
                    Ok(Variant::Object(self.instantiate(class_name, None)))
                }
                Some(_) => Err(DeserializeError::malformed(
                    "top-level entry with an invalid `__type__`",
                )),
                None => Ok(Variant::dict(Dict::new())),
            },
            other => Err(DeserializeError::malformed(format!(
                "top-level entry must be an object or an array, found `{other}`"
            ))),
        }
    }

    fn instantiate(&mut self, class_name: &str, key: Option<&PropertyKey>) -> ObjRef {
        let registry = self.registry;
        match registry.instantiate(class_name) {
            Some(object) => object.into_ref(),
            None => {
                let placeholder = MissingTypeReporter::placeholder(class_name, Dict::new()).into_ref();
                self.missing.report(
                    Some(ObjectId::of(&placeholder)),
                    MissingKind::Type,
                    None,
                    key.map(ToString::to_string),
                    class_name,
                );
                placeholder
            }
        }
    }

    fn fill(&mut self, shell: &Variant, entry: &Value) -> Result<(), DeserializeError> {
        match (shell, entry) {
            (Variant::Array(array), Value::Array(items)) => self.fill_array(array, items),
            (Variant::Dict(dict), Value::Object(map)) => self.fill_dict(dict, map),
            (Variant::Object(object), Value::Object(map)) => self.fill_object(object, map),
            _ => Err(DeserializeError::malformed("entry does not match its shell")),
        }
    }

    fn fill_array(&mut self, array: &ArrayRef, items: &[Value]) -> Result<(), DeserializeError> {
        let owner = SlotOwner::Array(array.clone());
        let values = items
            .iter()
            .enumerate()
            .map(|(index, item)| self.value(item, &owner, PropertyKey::Index(index)))
            .collect::<Result<Vec<_>, _>>()?;
        *array.borrow_mut() = values;
        Ok(())
    }

    fn fill_dict(&mut self, dict: &DictRef, map: &Map<String, Value>) -> Result<(), DeserializeError> {
        let owner = SlotOwner::Dict(dict.clone());
        let mut entries = Dict::new();
        for (key, value) in map {
            entries.insert(key.clone(), self.value(value, &owner, PropertyKey::from(key.as_str()))?);
        }
        *dict.borrow_mut() = entries;
        Ok(())
    }

    fn fill_object(&mut self, object: &ObjRef, map: &Map<String, Value>) -> Result<(), DeserializeError> {
        let owner = SlotOwner::Object(object.clone());
        let class_name = object.borrow().class_name.clone();

        if object.borrow().kind == ObjectKind::Missing {
            let mut fields = Dict::new();
            for (key, value) in map.iter().filter(|(key, _)| *key != TYPE_KEY) {
                fields.insert(key.clone(), self.value(value, &owner, PropertyKey::from(key.as_str()))?);
            }
            object.borrow_mut().fields = fields;
            return Ok(());
        }

        let mut short_id = None;
        let mut prefab = None;
        let mut mounted = false;
        let mut persistent = false;
        let mut properties = Dict::new();
        for (key, value) in map {
            match key.as_str() {
                TYPE_KEY => {}
                OBJECT_ID_KEY => short_id = value.as_str().map(str::to_string),
                PREFAB_KEY => {
                    prefab = Some(PrefabLink {
                        sync: value.get("sync").and_then(Value::as_bool).unwrap_or(false),
                    });
                }
                MOUNTED_KEY => mounted = value.as_bool().unwrap_or(false),
                PERSISTENT_KEY => persistent = value.as_bool().unwrap_or(false),
                _ => {
                    let parsed = self.value(value, &owner, PropertyKey::from(key.as_str()))?;
                    properties.insert(key.clone(), parsed);
                }
            }
        }

        let mut target = object.borrow_mut();
        target.id = short_id;
        match &mut target.kind {
            ObjectKind::Node(node) => {
                node.prefab = prefab;
                node.mounted = mounted;
                node.persistent = persistent;
            }
            ObjectKind::Component(component) => component.mounted = mounted,
            _ => {}
        }

        let registry = self.registry;
        if let Some(hook) = registry.hook(&class_name) {
            hook.deserialize(&mut target, properties);
            return Ok(());
        }
        for field in registry.fields(&class_name) {
            if let Some(value) = properties.remove(&field.name) {
                target.fields.insert(field.name.clone(), value);
                if let Some(former) = &field.formerly {
                    properties.remove(former);
                }
            } else if let Some(former) = &field.formerly {
                if let Some(value) = properties.remove(former) {
                    target.fields.insert(field.name.clone(), value);
                    self.details.rekey(object, former, &field.name);
                }
            }
        }
        if !properties.is_empty() {
            trace!(
                "`{class_name}` ignores undeclared properties {:?}",
                properties.keys().collect::<Vec<_>>()
            );
        }
        Ok(())
    }

    fn value(&mut self, value: &Value, owner: &SlotOwner, key: PropertyKey) -> Result<Variant, DeserializeError> {
        Ok(match value {
            Value::Null => Variant::Null,
            Value::Bool(b) => Variant::Bool(*b),
            Value::Number(n) => Variant::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => Variant::String(s.clone()),
            Value::Array(items) => {
                let array: ArrayRef = Rc::new(RefCell::new(Vec::new()));
                self.fill_array(&array, items)?;
                Variant::Array(array)
            }
            Value::Object(map) => {
                if let Some(index) = map.get(ID_REF_KEY) {
                    return index
                        .as_u64()
                        .and_then(|i| self.shells.get(i as usize))
                        .cloned()
                        .ok_or_else(|| {
                            DeserializeError::malformed(format!("reference to missing entry {index}"))
                        });
                }
                if let Some(uuid) = map.get(UUID_KEY) {
                    let uuid = match uuid {
                        Value::String(token) => Value::String(decompress_uuid(token)),
                        other => other.clone(),
                    };
                    let expected_type = map
                        .get(EXPECTED_TYPE_KEY)
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    self.details.push(owner.clone(), key, uuid, expected_type);
                    return Ok(Variant::Null);
                }
                match map.get(TYPE_KEY).and_then(Value::as_str) {
                    Some(TYPED_ARRAY_TYPE) => Variant::Buffer(
                        TypedArray::from_json(map).map_err(DeserializeError::malformed)?,
                    ),
                    Some(class_name) => {
                        let object = self.instantiate(class_name, Some(&key));
                        self.fill_object(&object, map)?;
                        Variant::Object(object)
                    }
                    None => {
                        let dict: DictRef = Rc::new(RefCell::new(Dict::new()));
                        self.fill_dict(&dict, map)?;
                        Variant::Dict(dict)
                    }
                }
            }
        })
    }
}

/// Convenience for loaders that already hold their assets.
impl AssetLoader for HashMap<String, ObjRef> {
    fn load<'a>(&'a self, uuid: &'a str) -> LocalBoxFuture<'a, Result<ObjRef, LoadError>> {
        let result = self
            .get(uuid)
            .cloned()
            .ok_or_else(|| LoadError::new(format!("no asset `{uuid}`")));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ComponentInfo, SceneObject};
    use crate::schema::{ClassKind, ClassSchema, FieldSchema};
    use serde_json::json;

    const UUID: &str = "fc991dd7-0033-4b80-9d41-c8a86a702e59";

    fn registry() -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        registry
            .register(
                ClassSchema::new("Sprite", ClassKind::Component)
                    .field(FieldSchema::new("frame", Variant::Null))
                    .field(FieldSchema::new("size", 1).formerly("_size")),
            )
            .register(ClassSchema::new("SpriteFrame", ClassKind::Asset));
        registry
    }

    fn assets() -> HashMap<String, ObjRef> {
        let mut assets = HashMap::new();
        assets.insert(UUID.to_string(), SceneObject::asset("SpriteFrame", UUID).into_ref());
        assets
    }

    #[test]
    fn test_reconstruct_records_asset_slots() {
        let registry = registry();
        let assets = assets();
        let deserializer = Deserializer::new(&registry, &assets);
        let document = json!([{
            "__type__": "Sprite",
            "frame": { "__uuid__": "fcmR3XADNLgJ1ByKhqcC5Z", "__expectedType__": "SpriteFrame" },
            "_mounted": true
        }]);
        let output = deserializer.reconstruct(&document).unwrap();
        assert_eq!(output.details.uuid_list, vec![json!(UUID)]);
        assert_eq!(output.details.slots[0].expected_type.as_deref(), Some("SpriteFrame"));
        let root = output.root.as_object().unwrap().borrow();
        assert!(root.get("frame").unwrap().is_null());
        assert_eq!(root.kind, ObjectKind::Component(ComponentInfo { mounted: true }));
    }

    #[test]
    fn test_deserialize_fills_asset_slots() {
        let registry = registry();
        let assets = assets();
        let deserializer = Deserializer::new(&registry, &assets);
        let artifact = Artifact::Dynamic(json!([
            { "__type__": "Sprite", "frame": { "__uuid__": UUID } }
        ]));
        let output = pollster::block_on(deserializer.deserialize(&artifact)).unwrap();
        let root = output.root.as_object().unwrap().borrow();
        let frame = root.get("frame").and_then(Variant::as_object).unwrap();
        assert!(Rc::ptr_eq(frame, &assets[UUID]));
    }

    #[test]
    fn test_former_field_name_is_read() {
        let registry = registry();
        let assets = assets();
        let deserializer = Deserializer::new(&registry, &assets);
        let output = deserializer
            .reconstruct(&json!([{ "__type__": "Sprite", "_size": 7 }]))
            .unwrap();
        let root = output.root.as_object().unwrap().borrow();
        assert_eq!(root.get("size").and_then(Variant::as_f64), Some(7.0));
        assert!(root.get("_size").is_none());
    }

    #[test]
    fn test_unknown_class_becomes_placeholder() {
        let registry = registry();
        let assets = assets();
        let deserializer = Deserializer::new(&registry, &assets);
        let output = deserializer
            .reconstruct(&json!([{ "__type__": "game.Mover", "speed": 3, "_id": "x" }]))
            .unwrap();
        assert_eq!(output.reports.len(), 1);
        let root = output.root.as_object().unwrap().borrow();
        assert_eq!(root.kind, ObjectKind::Missing);
        assert!(matches!(root.get("_id"), Some(Variant::String(id)) if id == "x"));
        assert_eq!(root.get("speed").and_then(Variant::as_f64), Some(3.0));
    }

    #[test]
    fn test_non_string_asset_id_is_rejected() {
        let registry = registry();
        let assets = assets();
        let deserializer = Deserializer::new(&registry, &assets);
        let artifact = Artifact::Dynamic(json!([{ "__type__": "Sprite", "frame": { "__uuid__": 12 } }]));
        let result = pollster::block_on(deserializer.deserialize(&artifact));
        assert!(matches!(result, Err(DeserializeError::InvalidAssetId { .. })));
    }

    #[test]
    fn test_dangling_slot_and_type_mismatch() {
        let registry = registry();
        let assets = assets();
        let deserializer = Deserializer::new(&registry, &assets);
        let mut output = deserializer
            .reconstruct(&json!([{ "__type__": "Sprite", "frame": { "__uuid__": UUID } }]))
            .unwrap();
        let not_an_asset = SceneObject::new("Sprite", ObjectKind::Plain).into_ref();
        assert!(matches!(
            Deserializer::rewrite(&output.details, &[not_an_asset]),
            Err(DeserializeError::TypeMismatch { .. })
        ));

        output.details.slots[0].uuid_index = 5;
        assert!(matches!(
            Deserializer::rewrite(&output.details, &[]),
            Err(DeserializeError::DanglingReference { index: 5 })
        ));
    }

    #[test]
    fn test_malformed_documents() {
        let registry = registry();
        let assets = assets();
        let deserializer = Deserializer::new(&registry, &assets);
        assert!(deserializer.reconstruct(&json!({})).is_err());
        assert!(deserializer.reconstruct(&json!([])).is_err());
        assert!(deserializer.reconstruct(&json!([{ "a": { "__id__": 4 } }])).is_err());
        assert!(deserializer.reconstruct(&json!([3])).is_err());
    }
}
