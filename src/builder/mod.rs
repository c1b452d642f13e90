//! Output builders. The walker drives a builder through `set_property_*`
//! calls; the builder decides how the emitted values are laid out.

pub mod compiled;
pub mod dynamic;

use crate::identity::ValueInfo;
use crate::object::TypedArray;
use serde_json::Value;
use std::fmt;

pub const TYPE_KEY: &str = "__type__";
pub const ID_REF_KEY: &str = "__id__";
pub const UUID_KEY: &str = "__uuid__";
pub const EXPECTED_TYPE_KEY: &str = "__expectedType__";
pub const TYPED_ARRAY_TYPE: &str = "TypedArray";

pub const OBJECT_ID_KEY: &str = "_id";
pub const PREFAB_KEY: &str = "_prefab";
pub const MOUNTED_KEY: &str = "_mounted";
pub const PERSISTENT_KEY: &str = "_persistent";
pub const TRS_KEY: &str = "_trs";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    Name(String),
    Index(usize),
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Name(name) => write!(f, "{name}"),
            PropertyKey::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(value: &str) -> Self {
        PropertyKey::Name(value.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(value: String) -> Self {
        PropertyKey::Name(value)
    }
}

impl From<usize> for PropertyKey {
    fn from(value: usize) -> Self {
        PropertyKey::Index(value)
    }
}

/// A property position: the emitted owner and the key inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
    pub owner: ValueInfo,
    pub key: PropertyKey,
}

impl Slot {
    pub fn new(owner: ValueInfo, key: impl Into<PropertyKey>) -> Self {
        Self {
            owner,
            key: key.into(),
        }
    }
}

/// Sink for one serialization pass.
///
/// Every `(owner, key)` pair is written at most once per pass. Methods taking
/// `Option<Slot>` accept `None` for the root of the pass.
pub trait OutputBuilder {
    type Output;

    fn set_root(&mut self, info: ValueInfo);

    /// Writes a JSON primitive.
    fn set_property_raw(&mut self, slot: Slot, value: Value);

    /// Writes a back-reference to an already emitted value.
    fn set_property_parsed_object(&mut self, slot: Slot, target: ValueInfo);

    fn set_property_asset_uuid(&mut self, slot: Slot, uuid: &str, expected_type: &str);

    fn set_property_class(&mut self, slot: Option<Slot>, class_name: &str) -> ValueInfo;

    /// Like `set_property_class`, for objects written by a custom hook.
    fn set_property_customized_class(&mut self, slot: Option<Slot>, class_name: &str)
        -> ValueInfo;

    /// Inline value object. Never the target of a back-reference.
    fn set_property_value_type(&mut self, slot: Slot, class_name: &str) -> ValueInfo;

    fn set_property_typed_array(&mut self, slot: Slot, buffer: &TypedArray);

    fn set_property_array(&mut self, slot: Option<Slot>, len: usize) -> ValueInfo;

    fn set_property_dict(&mut self, slot: Option<Slot>) -> ValueInfo;

    fn dump(self) -> Self::Output;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RecordKind {
    Class(String),
    Customized(String),
    ValueType(String),
    Dict,
    Array(usize),
}

impl RecordKind {
    pub(crate) fn class_name(&self) -> Option<&str> {
        match self {
            RecordKind::Class(name) | RecordKind::Customized(name) | RecordKind::ValueType(name) => {
                Some(name)
            }
            RecordKind::Dict | RecordKind::Array(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Prop {
    Raw(Value),
    Ref(ValueInfo),
    Asset { uuid: String, expected_type: String },
    Buffer(TypedArray),
}

#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub(crate) kind: RecordKind,
    pub(crate) props: Vec<(PropertyKey, Prop)>,
    /// Number of properties pointing at this record.
    pub(crate) inbound: usize,
}

/// Emission log shared by both builders: one record per emitted container,
/// in emission order, each holding its properties in write order.
#[derive(Debug, Default)]
pub(crate) struct RecordArena {
    pub(crate) records: Vec<Record>,
    pub(crate) root: Option<ValueInfo>,
}

impl RecordArena {
    pub(crate) fn create(&mut self, slot: Option<Slot>, kind: RecordKind) -> ValueInfo {
        let info = ValueInfo(self.records.len());
        self.records.push(Record {
            kind,
            props: Vec::new(),
            inbound: 0,
        });
        if let Some(slot) = slot {
            self.put(slot, Prop::Ref(info));
        }
        info
    }

    pub(crate) fn put(&mut self, slot: Slot, prop: Prop) {
        if let Prop::Ref(target) = &prop {
            self.records[target.0].inbound += 1;
        }
        let owner = &mut self.records[slot.owner.0];
        debug_assert!(
            owner.props.iter().all(|(key, _)| *key != slot.key),
            "property `{}` written twice",
            slot.key
        );
        owner.props.push((slot.key, prop));
    }

    pub(crate) fn get(&self, info: ValueInfo) -> &Record {
        &self.records[info.0]
    }

    pub(crate) fn root(&self) -> ValueInfo {
        self.root.unwrap_or(ValueInfo(0))
    }
}
