//! Debug-oriented output: a JSON array of entries, root first.
//!
//! Class instances always get an entry of their own. Dicts and arrays stay
//! inline at their only use site and are promoted to an entry when something
//! refers to them a second time. Value types are always inline.

use super::{
    OutputBuilder, Prop, PropertyKey, RecordArena, RecordKind, Slot, EXPECTED_TYPE_KEY,
    ID_REF_KEY, TYPE_KEY, UUID_KEY,
};
use crate::identity::ValueInfo;
use crate::object::TypedArray;
use log::trace;
use serde_json::{json, Map, Value};

#[derive(Debug, Default)]
pub struct DynamicBuilder {
    arena: RecordArena,
}

impl DynamicBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputBuilder for DynamicBuilder {
    type Output = Value;

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

    fn dump(self) -> Value {
        Renderer::new(&self.arena).render()
    }
}

struct Renderer<'a> {
    arena: &'a RecordArena,
    /// Entry index of every promoted record.
    positions: Vec<Option<usize>>,
    order: Vec<ValueInfo>,
}

impl<'a> Renderer<'a> {
    fn new(arena: &'a RecordArena) -> Self {
        let root = arena.root();
        let mut positions = vec![None; arena.records.len()];
        let mut order = Vec::new();
        if !arena.records.is_empty() {
            positions[root.0] = Some(0);
            order.push(root);
        }
        for (index, record) in arena.records.iter().enumerate() {
            if index == root.0 {
                continue;
            }
            let promoted = match record.kind {
                RecordKind::Class(_) | RecordKind::Customized(_) => true,
                RecordKind::ValueType(_) => false,
                RecordKind::Dict | RecordKind::Array(_) => record.inbound > 1,
            };
            if promoted {
                positions[index] = Some(order.len());
                order.push(ValueInfo(index));
            }
        }
        Self {
            arena,
            positions,
            order,
        }
    }

    fn render(&self) -> Value {
        trace!("dynamic document with {} entries", self.order.len());
        Value::Array(self.order.iter().map(|&info| self.record(info)).collect())
    }

    fn record(&self, info: ValueInfo) -> Value {
        let record = self.arena.get(info);
        match &record.kind {
            RecordKind::Array(len) => {
                let mut items = vec![Value::Null; *len];
                for (key, prop) in &record.props {
                    if let PropertyKey::Index(i) = key {
                        if let Some(item) = items.get_mut(*i) {
                            *item = self.prop(prop);
                        }
                    }
                }
                Value::Array(items)
            }
            kind => {
                let mut map = Map::new();
                if let Some(class_name) = kind.class_name() {
                    map.insert(TYPE_KEY.into(), Value::String(class_name.to_string()));
                }
                for (key, prop) in &record.props {
                    map.insert(key.to_string(), self.prop(prop));
                }
                Value::Object(map)
            }
        }
    }

    fn prop(&self, prop: &Prop) -> Value {
        match prop {
            Prop::Raw(value) => value.clone(),
            Prop::Ref(target) => match self.positions[target.0] {
                Some(position) => json!({ ID_REF_KEY: position }),
                // Only reachable from its single owner, so no cycle.
                None => self.record(*target),
            },
            Prop::Asset {
                uuid,
                expected_type,
            } => json!({ UUID_KEY: uuid, EXPECTED_TYPE_KEY: expected_type }),
            Prop::Buffer(buffer) => buffer.to_json(),
        }
    }
}
