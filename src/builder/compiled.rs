//! Load-optimized output.
//!
//! Every class instance, dict and array becomes one entry of `instances`.
//! Class names and field names are interned into shared tables so that an
//! instance only stores a type index, a mask index (which of the class keys it
//! carries) and its values. Object and asset references are pulled out of the
//! values into `refs` and `assets`, which lets the loader allocate every
//! instance first and then patch references in one sweep.

use super::{
    OutputBuilder, Prop, PropertyKey, RecordArena, RecordKind, Slot, ID_REF_KEY, TYPE_KEY,
    UUID_KEY,
};
use crate::error::DeserializeError;
use crate::identity::ValueInfo;
use crate::object::TypedArray;
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub const COMPILED_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLayout {
    pub name: String,
    /// Union of the keys written by any instance of the class.
    pub keys: Vec<String>,
}

/// Property position inside an instance: a layout key index for class
/// instances, an element index for arrays, a key for dicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyRef {
    Index(usize),
    Name(String),
}

/// `(owner instance, key, target instance)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRecord(pub usize, pub KeyRef, pub usize);

/// `(owner instance, key, uuid index)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord(pub usize, pub KeyRef, pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompiledInstance {
    #[serde(rename = "c")]
    Class { t: usize, m: usize, v: Vec<Value> },
    #[serde(rename = "d")]
    Dict(Map<String, Value>),
    #[serde(rename = "a")]
    Array(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledDocument {
    pub version: u32,
    pub uuids: Vec<String>,
    pub types: Vec<ClassLayout>,
    pub masks: Vec<Vec<usize>>,
    pub instances: Vec<CompiledInstance>,
    pub refs: Vec<RefRecord>,
    pub assets: Vec<AssetRecord>,
    pub root: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedSection {
    pub instances: Vec<CompiledInstance>,
    pub refs: Vec<RefRecord>,
    pub assets: Vec<AssetRecord>,
    pub root: usize,
}

/// Several compiled documents sharing one set of uuid, type and mask tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedDocuments {
    pub version: u32,
    pub uuids: Vec<String>,
    pub types: Vec<ClassLayout>,
    pub masks: Vec<Vec<usize>>,
    pub sections: Vec<PackedSection>,
}

#[derive(Debug, Default)]
struct Tables {
    uuids: Vec<String>,
    uuid_index: HashMap<String, usize>,
    types: Vec<ClassLayout>,
    type_index: HashMap<String, usize>,
    masks: Vec<Vec<usize>>,
    mask_index: HashMap<Vec<usize>, usize>,
}

impl Tables {
    fn uuid(&mut self, uuid: &str) -> usize {
        if let Some(&index) = self.uuid_index.get(uuid) {
            return index;
        }
        self.uuids.push(uuid.to_string());
        self.uuid_index.insert(uuid.to_string(), self.uuids.len() - 1);
        self.uuids.len() - 1
    }

    fn layout(&mut self, name: &str) -> usize {
        if let Some(&index) = self.type_index.get(name) {
            return index;
        }
        self.types.push(ClassLayout {
            name: name.to_string(),
            keys: Vec::new(),
        });
        self.type_index.insert(name.to_string(), self.types.len() - 1);
        self.types.len() - 1
    }

    fn key(&mut self, layout: usize, key: &str) -> usize {
        let keys = &mut self.types[layout].keys;
        match keys.iter().position(|k| k == key) {
            Some(index) => index,
            None => {
                keys.push(key.to_string());
                keys.len() - 1
            }
        }
    }

    fn mask(&mut self, keys: Vec<usize>) -> usize {
        if let Some(&index) = self.mask_index.get(&keys) {
            return index;
        }
        self.masks.push(keys.clone());
        self.mask_index.insert(keys, self.masks.len() - 1);
        self.masks.len() - 1
    }
}

#[derive(Debug, Default)]
pub struct CompiledBuilder {
    arena: RecordArena,
}

impl CompiledBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputBuilder for CompiledBuilder {
    type Output = CompiledDocument;

    fn set_root(&mut self, info: ValueInfo) {
        self.arena.root = Some(info);
    }

    fn set_property_raw(&mut self, slot: Slot, value: Value) {
        self.arena.put(slot, Prop::Raw(value));
    }

    fn set_property_parsed_object(&mut self, slot: Slot, target: ValueInfo) {
        self.arena.put(slot, Prop::Ref(target));
    }

    fn set_property_asset_uuid(&mut self, slot: Slot, uuid: &str, expected_type: &str) {
        self.arena.put(
            slot,
            Prop::Asset {
                uuid: uuid.to_string(),
                expected_type: expected_type.to_string(),
            },
        );
    }

    fn set_property_class(&mut self, slot: Option<Slot>, class_name: &str) -> ValueInfo {
        self.arena
            .create(slot, RecordKind::Class(class_name.to_string()))
    }

    fn set_property_customized_class(
        &mut self,
        slot: Option<Slot>,
        class_name: &str,
    ) -> ValueInfo {
        self.arena
            .create(slot, RecordKind::Customized(class_name.to_string()))
    }

    fn set_property_value_type(&mut self, slot: Slot, class_name: &str) -> ValueInfo {
        self.arena
            .create(Some(slot), RecordKind::ValueType(class_name.to_string()))
    }

    fn set_property_typed_array(&mut self, slot: Slot, buffer: &TypedArray) {
        self.arena.put(slot, Prop::Buffer(buffer.clone()));
    }

    fn set_property_array(&mut self, slot: Option<Slot>, len: usize) -> ValueInfo {
        self.arena.create(slot, RecordKind::Array(len))
    }

    fn set_property_dict(&mut self, slot: Option<Slot>) -> ValueInfo {
        self.arena.create(slot, RecordKind::Dict)
    }

    fn dump(self) -> CompiledDocument {
        Compiler::new(&self.arena).compile()
    }
}

struct Compiler<'a> {
    arena: &'a RecordArena,
    positions: Vec<Option<usize>>,
    order: Vec<ValueInfo>,
    tables: Tables,
    refs: Vec<RefRecord>,
    assets: Vec<AssetRecord>,
}

impl<'a> Compiler<'a> {
    fn new(arena: &'a RecordArena) -> Self {
        let root = arena.root();
        let mut positions = vec![None; arena.records.len()];
        let mut order = Vec::new();
        if !arena.records.is_empty() {
            positions[root.0] = Some(0);
            order.push(root);
        }
        for (index, record) in arena.records.iter().enumerate() {
            if index != root.0 && !matches!(record.kind, RecordKind::ValueType(_)) {
                positions[index] = Some(order.len());
                order.push(ValueInfo(index));
            }
        }
        Self {
            arena,
            positions,
            order,
            tables: Tables::default(),
            refs: Vec::new(),
            assets: Vec::new(),
        }
    }

    fn compile(mut self) -> CompiledDocument {
        let order = std::mem::take(&mut self.order);
        let instances: Vec<CompiledInstance> = order
            .iter()
            .enumerate()
            .map(|(position, &info)| self.instance(position, info))
            .collect();
        trace!(
            "compiled document with {} instances, {} refs, {} assets",
            instances.len(),
            self.refs.len(),
            self.assets.len()
        );
        CompiledDocument {
            version: COMPILED_VERSION,
            uuids: self.tables.uuids,
            types: self.tables.types,
            masks: self.tables.masks,
            instances,
            refs: self.refs,
            assets: self.assets,
            root: 0,
        }
    }

    fn instance(&mut self, position: usize, info: ValueInfo) -> CompiledInstance {
        let record = self.arena.get(info);
        match &record.kind {
            RecordKind::Array(len) => {
                let mut items = vec![Value::Null; *len];
                for (key, prop) in &record.props {
                    if let PropertyKey::Index(i) = key {
                        let value = self.encode(prop, position, KeyRef::Index(*i));
                        if let Some(item) = items.get_mut(*i) {
                            *item = value;
                        }
                    }
                }
                CompiledInstance::Array(items)
            }
            RecordKind::Dict => {
                let mut map = Map::new();
                for (key, prop) in &record.props {
                    let name = key.to_string();
                    let value = self.encode(prop, position, KeyRef::Name(name.clone()));
                    map.insert(name, value);
                }
                CompiledInstance::Dict(map)
            }
            kind => {
                let t = self.tables.layout(kind.class_name().unwrap_or_default());
                let mut keys = Vec::with_capacity(record.props.len());
                let mut values = Vec::with_capacity(record.props.len());
                for (key, prop) in &record.props {
                    let k = self.tables.key(t, &key.to_string());
                    keys.push(k);
                    values.push(self.encode(prop, position, KeyRef::Index(k)));
                }
                let m = self.tables.mask(keys);
                CompiledInstance::Class { t, m, v: values }
            }
        }
    }

    fn encode(&mut self, prop: &Prop, owner: usize, key: KeyRef) -> Value {
        match prop {
            Prop::Raw(value) => value.clone(),
            Prop::Buffer(buffer) => buffer.to_json(),
            Prop::Asset { uuid, .. } => {
                let u = self.tables.uuid(uuid);
                self.assets.push(AssetRecord(owner, key, u));
                Value::Null
            }
            Prop::Ref(target) => match self.positions[target.0] {
                Some(position) => {
                    self.refs.push(RefRecord(owner, key, position));
                    Value::Null
                }
                None => self.value_type(*target),
            },
        }
    }

    /// `[type, mask, values...]`
    fn value_type(&mut self, info: ValueInfo) -> Value {
        let record = self.arena.get(info);
        let t = self
            .tables
            .layout(record.kind.class_name().unwrap_or_default());
        let mut keys = Vec::with_capacity(record.props.len());
        let mut encoded = vec![Value::Null, Value::Null];
        for (key, prop) in &record.props {
            keys.push(self.tables.key(t, &key.to_string()));
            encoded.push(match prop {
                Prop::Raw(value) => value.clone(),
                Prop::Buffer(buffer) => buffer.to_json(),
                Prop::Ref(nested) if self.positions[nested.0].is_none() => {
                    self.value_type(*nested)
                }
                _ => Value::Null,
            });
        }
        encoded[0] = Value::from(t);
        encoded[1] = Value::from(self.tables.mask(keys));
        Value::Array(encoded)
    }
}

impl CompiledDocument {
    /// The instance the document was built from.
    pub fn root_data(&self) -> Option<&CompiledInstance> {
        self.instances.get(self.root)
    }

    /// Rebuilds the equivalent dynamic-form document.
    ///
    /// # Errors
    /// Returns `MalformedArtifact` if a table index is out of range.
    pub fn expand(&self) -> Result<Value, DeserializeError> {
        let count = self.instances.len();
        if self.root >= count {
            return Err(DeserializeError::malformed(format!(
                "root #{} out of {count} instances",
                self.root
            )));
        }
        let mut positions = vec![0; count];
        let mut next = 1;
        for (index, position) in positions.iter_mut().enumerate() {
            if index != self.root {
                *position = next;
                next += 1;
            }
        }

        let mut entries = vec![Value::Null; count];
        for (index, instance) in self.instances.iter().enumerate() {
            entries[positions[index]] = self.expand_instance(instance)?;
        }
        for RefRecord(owner, key, target) in &self.refs {
            let position = positions.get(*target).ok_or_else(|| {
                DeserializeError::malformed(format!("reference to missing instance #{target}"))
            })?;
            self.assign(&mut entries, &positions, *owner, key, json!({ ID_REF_KEY: position }))?;
        }
        for AssetRecord(owner, key, uuid) in &self.assets {
            let uuid = self.uuids.get(*uuid).ok_or_else(|| {
                DeserializeError::malformed(format!("asset reference to missing uuid #{uuid}"))
            })?;
            self.assign(&mut entries, &positions, *owner, key, json!({ UUID_KEY: uuid }))?;
        }
        Ok(Value::Array(entries))
    }

    fn expand_instance(&self, instance: &CompiledInstance) -> Result<Value, DeserializeError> {
        match instance {
            CompiledInstance::Class { t, m, v } => self.expand_class(*t, *m, v),
            CompiledInstance::Dict(map) => Ok(Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.expand_inline(v)?)))
                    .collect::<Result<Map<_, _>, DeserializeError>>()?,
            )),
            CompiledInstance::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| self.expand_inline(v))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
        }
    }

    fn expand_class(&self, t: usize, m: usize, values: &[Value]) -> Result<Value, DeserializeError> {
        let layout = self
            .types
            .get(t)
            .ok_or_else(|| DeserializeError::malformed(format!("missing type #{t}")))?;
        let mask = self
            .masks
            .get(m)
            .ok_or_else(|| DeserializeError::malformed(format!("missing mask #{m}")))?;
        if mask.len() != values.len() {
            return Err(DeserializeError::malformed(format!(
                "`{}` instance carries {} values for {} keys",
                layout.name,
                values.len(),
                mask.len()
            )));
        }
        let mut map = Map::new();
        map.insert(TYPE_KEY.into(), Value::String(layout.name.clone()));
        for (k, value) in mask.iter().zip(values) {
            let key = layout.keys.get(*k).ok_or_else(|| {
                DeserializeError::malformed(format!("missing key #{k} of `{}`", layout.name))
            })?;
            map.insert(key.clone(), self.expand_inline(value)?);
        }
        Ok(Value::Object(map))
    }

    fn expand_inline(&self, value: &Value) -> Result<Value, DeserializeError> {
        match value {
            Value::Array(items) => {
                let index = |i: usize| {
                    items
                        .get(i)
                        .and_then(Value::as_u64)
                        .map(|n| n as usize)
                        .ok_or_else(|| DeserializeError::malformed("truncated inline value"))
                };
                self.expand_class(index(0)?, index(1)?, &items[2..])
            }
            other => Ok(other.clone()),
        }
    }

    fn assign(
        &self,
        entries: &mut [Value],
        positions: &[usize],
        owner: usize,
        key: &KeyRef,
        value: Value,
    ) -> Result<(), DeserializeError> {
        let bad_slot = || DeserializeError::malformed(format!("invalid slot {key:?} on #{owner}"));
        let instance = self.instances.get(owner).ok_or_else(bad_slot)?;
        let entry = &mut entries[positions[owner]];
        match (instance, key) {
            (CompiledInstance::Class { t, .. }, KeyRef::Index(k)) => {
                let name = self
                    .types
                    .get(*t)
                    .and_then(|layout| layout.keys.get(*k))
                    .ok_or_else(bad_slot)?;
                entry
                    .as_object_mut()
                    .ok_or_else(bad_slot)?
                    .insert(name.clone(), value);
            }
            (CompiledInstance::Dict(_), KeyRef::Name(name)) => {
                entry
                    .as_object_mut()
                    .ok_or_else(bad_slot)?
                    .insert(name.clone(), value);
            }
            (CompiledInstance::Array(_), KeyRef::Index(i)) => {
                *entry
                    .as_array_mut()
                    .and_then(|items| items.get_mut(*i))
                    .ok_or_else(bad_slot)? = value;
            }
            _ => return Err(bad_slot()),
        }
        Ok(())
    }
}

/// Merges several documents into one bundle with shared tables.
///
/// # Errors
/// Returns `MalformedArtifact` if a document refers to a missing table entry.
pub fn pack(documents: &[CompiledDocument]) -> Result<PackedDocuments, DeserializeError> {
    let mut tables = Tables::default();
    let mut sections = Vec::with_capacity(documents.len());
    for document in documents {
        let remap = Remap::new(document, &mut tables);
        sections.push(remap.section(document, &mut tables)?);
    }
    Ok(PackedDocuments {
        version: COMPILED_VERSION,
        uuids: tables.uuids,
        types: tables.types,
        masks: tables.masks,
        sections,
    })
}

/// Splits a bundle back into standalone documents.
pub fn unpack(packed: &PackedDocuments) -> Vec<CompiledDocument> {
    packed
        .sections
        .iter()
        .map(|section| CompiledDocument {
            version: packed.version,
            uuids: packed.uuids.clone(),
            types: packed.types.clone(),
            masks: packed.masks.clone(),
            instances: section.instances.clone(),
            refs: section.refs.clone(),
            assets: section.assets.clone(),
            root: section.root,
        })
        .collect()
}

/// Index translation from one document's tables into the shared tables.
struct Remap<'d> {
    document: &'d CompiledDocument,
    types: Vec<usize>,
    keys: Vec<Vec<usize>>,
    uuids: Vec<usize>,
}

impl<'d> Remap<'d> {
    fn new(document: &'d CompiledDocument, tables: &mut Tables) -> Self {
        let types: Vec<usize> = document
            .types
            .iter()
            .map(|layout| tables.layout(&layout.name))
            .collect();
        let keys = document
            .types
            .iter()
            .zip(&types)
            .map(|(layout, &t)| layout.keys.iter().map(|k| tables.key(t, k)).collect())
            .collect();
        let uuids = document.uuids.iter().map(|u| tables.uuid(u)).collect();
        Self {
            document,
            types,
            keys,
            uuids,
        }
    }

    fn section(&self, document: &CompiledDocument, tables: &mut Tables) -> Result<PackedSection, DeserializeError> {
        let instances = document
            .instances
            .iter()
            .map(|instance| self.instance(instance, tables))
            .collect::<Result<Vec<_>, _>>()?;
        let refs = document
            .refs
            .iter()
            .map(|RefRecord(owner, key, target)| {
                Ok(RefRecord(*owner, self.key(*owner, key)?, *target))
            })
            .collect::<Result<Vec<_>, DeserializeError>>()?;
        let assets = document
            .assets
            .iter()
            .map(|AssetRecord(owner, key, uuid)| {
                let uuid = self.uuids.get(*uuid).copied().ok_or_else(|| {
                    DeserializeError::malformed(format!("missing uuid #{uuid}"))
                })?;
                Ok(AssetRecord(*owner, self.key(*owner, key)?, uuid))
            })
            .collect::<Result<Vec<_>, DeserializeError>>()?;
        Ok(PackedSection {
            instances,
            refs,
            assets,
            root: document.root,
        })
    }

    fn class(&self, t: usize, m: usize, tables: &mut Tables) -> Result<(usize, usize), DeserializeError> {
        let missing = || DeserializeError::malformed(format!("invalid type #{t} / mask #{m}"));
        let shared_t = *self.types.get(t).ok_or_else(missing)?;
        let key_map = self.keys.get(t).ok_or_else(missing)?;
        let mask = self
            .document
            .masks
            .get(m)
            .ok_or_else(missing)?
            .iter()
            .map(|k| key_map.get(*k).copied().ok_or_else(missing))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((shared_t, tables.mask(mask)))
    }

    fn instance(&self, instance: &CompiledInstance, tables: &mut Tables) -> Result<CompiledInstance, DeserializeError> {
        Ok(match instance {
            CompiledInstance::Class { t, m, v } => {
                let (t, m) = self.class(*t, *m, tables)?;
                let v = v
                    .iter()
                    .map(|value| self.inline(value, tables))
                    .collect::<Result<Vec<_>, _>>()?;
                CompiledInstance::Class { t, m, v }
            }
            CompiledInstance::Dict(map) => CompiledInstance::Dict(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.inline(v, tables)?)))
                    .collect::<Result<Map<_, _>, DeserializeError>>()?,
            ),
            CompiledInstance::Array(items) => CompiledInstance::Array(
                items
                    .iter()
                    .map(|value| self.inline(value, tables))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }

    fn inline(&self, value: &Value, tables: &mut Tables) -> Result<Value, DeserializeError> {
        let Value::Array(items) = value else {
            return Ok(value.clone());
        };
        let index = |i: usize| {
            items
                .get(i)
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .ok_or_else(|| DeserializeError::malformed("truncated inline value"))
        };
        let (t, m) = self.class(index(0)?, index(1)?, tables)?;
        let mut out = vec![Value::from(t), Value::from(m)];
        for nested in &items[2..] {
            out.push(self.inline(nested, tables)?);
        }
        Ok(Value::Array(out))
    }

    fn key(&self, owner: usize, key: &KeyRef) -> Result<KeyRef, DeserializeError> {
        match (self.document.instances.get(owner), key) {
            (Some(CompiledInstance::Class { t, .. }), KeyRef::Index(k)) => self
                .keys
                .get(*t)
                .and_then(|keys| keys.get(*k))
                .map(|&k| KeyRef::Index(k))
                .ok_or_else(|| DeserializeError::malformed(format!("missing key #{k}"))),
            (Some(_), key) => Ok(key.clone()),
            (None, _) => Err(DeserializeError::malformed(format!(
                "slot on missing instance #{owner}"
            ))),
        }
    }
}
