//! The runtime object graph handed to the serializer.
//!
//! The host owns every value; the walker only borrows them for the duration of
//! one pass. Reference-bearing values (objects, arrays, dicts) are shared
//! through `Rc<RefCell<_>>` so that the graph can contain repeated references
//! and cycles, and their allocation address is their identity.

use crate::builder::{TYPED_ARRAY_TYPE, TYPE_KEY};
use bitflags::bitflags;
use log::warn;
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

pub type Shared<T> = Rc<RefCell<T>>;
pub type ObjRef = Shared<SceneObject>;
pub type ArrayRef = Shared<Vec<Variant>>;
pub type Dict = BTreeMap<String, Variant>;
pub type DictRef = Shared<Dict>;

/// The translation/rotation/scale buffer of an untransformed node.
pub const IDENTITY_TRS: [f64; 10] = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];

bitflags! {
    /// Lifecycle flags carried by every scene object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u32 {
        /// The object is transient and must not be written out.
        const DONT_SAVE = 1 << 0;
        /// The object survives scene switches.
        const DONT_DESTROY = 1 << 1;
        /// The object only exists inside the editor.
        const EDITOR_ONLY = 1 << 2;
        /// The object was destroyed but is still referenced somewhere.
        const DESTROYED = 1 << 3;
    }
}

impl Default for ObjectFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Stable identity of a reference-bearing value within one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn of<T>(shared: &Shared<T>) -> Self {
        ObjectId(Rc::as_ptr(shared) as *const () as usize)
    }
}

/// Prefab link stored on the root node of a prefab instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrefabLink {
    /// Whether the instance content is kept in sync with its prefab asset.
    pub sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeInfo {
    /// Top-level scene-like container.
    pub scene: bool,
    /// Resident node that is kept alive across scenes.
    pub persistent: bool,
    /// Explicitly added or edited on one prefab instance.
    pub mounted: bool,
    pub prefab: Option<PrefabLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComponentInfo {
    pub mounted: bool,
}

/// The closed set of capabilities an object can expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    /// An ordinary schema type.
    Plain,
    /// An asset, referenced from other graphs by its stable id.
    Asset { uuid: Option<String> },
    Node(NodeInfo),
    Component(ComponentInfo),
    /// Small, copyable value such as a vector or a color.
    ValueType,
    /// Stand-in for an object whose class could not be resolved. The fields
    /// hold the last known raw payload.
    Missing,
}

impl ObjectKind {
    pub fn is_asset(&self) -> bool {
        matches!(self, ObjectKind::Asset { .. })
    }

    pub fn is_node(&self) -> bool {
        matches!(self, ObjectKind::Node(_))
    }

    pub fn is_component(&self) -> bool {
        matches!(self, ObjectKind::Component(_))
    }

    pub fn is_value_type(&self) -> bool {
        matches!(self, ObjectKind::ValueType)
    }
}

/// A class instance in the host object model.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub class_name: String,
    pub kind: ObjectKind,
    pub flags: ObjectFlags,
    /// Short identifier of nodes and components.
    pub id: Option<String>,
    pub fields: Dict,
}

impl SceneObject {
    pub fn new(class_name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            class_name: class_name.into(),
            kind,
            flags: ObjectFlags::empty(),
            id: None,
            fields: Dict::new(),
        }
    }

    pub fn asset(class_name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self::new(
            class_name,
            ObjectKind::Asset {
                uuid: Some(uuid.into()),
            },
        )
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: ObjectFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Variant>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn into_ref(self) -> ObjRef {
        Rc::new(RefCell::new(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl TypedArrayKind {
    pub fn ctor_name(self) -> &'static str {
        match self {
            TypedArrayKind::Int8 => "Int8Array",
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Int16 => "Int16Array",
            TypedArrayKind::Uint16 => "Uint16Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Uint32 => "Uint32Array",
            TypedArrayKind::Float32 => "Float32Array",
            TypedArrayKind::Float64 => "Float64Array",
        }
    }

    pub fn from_ctor_name(name: &str) -> Option<Self> {
        Some(match name {
            "Int8Array" => TypedArrayKind::Int8,
            "Uint8Array" => TypedArrayKind::Uint8,
            "Int16Array" => TypedArrayKind::Int16,
            "Uint16Array" => TypedArrayKind::Uint16,
            "Int32Array" => TypedArrayKind::Int32,
            "Uint32Array" => TypedArrayKind::Uint32,
            "Float32Array" => TypedArrayKind::Float32,
            "Float64Array" => TypedArrayKind::Float64,
            _ => return None,
        })
    }

    fn is_integer(self) -> bool {
        !matches!(self, TypedArrayKind::Float32 | TypedArrayKind::Float64)
    }
}

/// A binary numeric buffer. Stored as an opaque blob by both output forms.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    pub kind: TypedArrayKind,
    pub data: Vec<f64>,
}

impl TypedArray {
    pub fn new(kind: TypedArrayKind, data: Vec<f64>) -> Self {
        Self { kind, data }
    }

    pub fn identity_transform() -> Self {
        Self::new(TypedArrayKind::Float64, IDENTITY_TRS.to_vec())
    }

    pub fn is_identity_transform(&self) -> bool {
        self.data == IDENTITY_TRS
    }

    pub fn to_json(&self) -> Value {
        let array: Vec<Value> = if self.kind.is_integer() {
            self.data.iter().map(|n| Value::from(*n as i64)).collect()
        } else {
            self.data.iter().map(|n| number_to_json(*n)).collect()
        };
        let mut map = Map::new();
        map.insert(TYPE_KEY.into(), json!(TYPED_ARRAY_TYPE));
        map.insert("ctor".into(), json!(self.kind.ctor_name()));
        map.insert("array".into(), Value::Array(array));
        Value::Object(map)
    }

    pub fn from_json(map: &Map<String, Value>) -> Result<Self, String> {
        let ctor = map
            .get("ctor")
            .and_then(Value::as_str)
            .ok_or_else(|| "typed array without `ctor`".to_string())?;
        let kind = TypedArrayKind::from_ctor_name(ctor)
            .ok_or_else(|| format!("unknown typed array constructor `{ctor}`"))?;
        let data = map
            .get("array")
            .and_then(Value::as_array)
            .ok_or_else(|| "typed array without `array`".to_string())?
            .iter()
            .map(|n| {
                n.as_f64()
                    .ok_or_else(|| format!("non-numeric element in {ctor}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { kind, data })
    }
}

/// Converts a number to JSON, keeping integral values integral.
///
/// JSON has no representation for NaN or infinities; they are written as null.
pub(crate) fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        warn!("non-finite number {n} cannot be represented, writing null");
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 && !(n == 0.0 && n.is_sign_negative()) {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

/// Any value that can appear in a field of the object graph.
#[derive(Clone, Default)]
pub enum Variant {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ArrayRef),
    Dict(DictRef),
    Buffer(TypedArray),
    Object(ObjRef),
}

impl Variant {
    pub fn object(object: SceneObject) -> Self {
        Variant::Object(object.into_ref())
    }

    pub fn array(items: Vec<Variant>) -> Self {
        Variant::Array(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: Dict) -> Self {
        Variant::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Variant::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Identity of reference-bearing values; `None` for plain data.
    pub fn identity(&self) -> Option<ObjectId> {
        match self {
            Variant::Array(a) => Some(ObjectId::of(a)),
            Variant::Dict(d) => Some(ObjectId::of(d)),
            Variant::Object(o) => Some(ObjectId::of(o)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Variant::Null => "null".into(),
            Variant::Bool(_) => "bool".into(),
            Variant::Number(_) => "number".into(),
            Variant::String(_) => "string".into(),
            Variant::Array(_) => "array".into(),
            Variant::Dict(_) => "dict".into(),
            Variant::Buffer(b) => b.kind.ctor_name().into(),
            Variant::Object(o) => o.borrow().class_name.clone(),
        }
    }

    /// Whether this value can be elided in favor of a schema default.
    ///
    /// Only data-like values compare: primitives, buffers, value types and
    /// empty containers. Object references never equal a default.
    pub fn matches_default(&self, default: &Variant) -> bool {
        match (self, default) {
            (Variant::Array(a), Variant::Array(b)) => a.borrow().is_empty() && b.borrow().is_empty(),
            (Variant::Dict(a), Variant::Dict(b)) => a.borrow().is_empty() && b.borrow().is_empty(),
            (Variant::Object(a), Variant::Object(b)) => {
                a.borrow().kind.is_value_type()
                    && b.borrow().kind.is_value_type()
                    && self.structurally_eq(default)
            }
            (Variant::Object(_), _) | (_, Variant::Object(_)) => false,
            _ => self.structurally_eq(default),
        }
    }

    /// Deep structural comparison of two graphs. Cycles are compared pairwise,
    /// so two graphs with the same shape of back-references compare equal.
    pub fn structurally_eq(&self, other: &Variant) -> bool {
        let mut visited = HashSet::new();
        structurally_eq_inner(self, other, &mut visited)
    }

    /// Copies the value, duplicating every reachable container and object
    /// while preserving shared references and cycles inside the copy.
    pub fn deep_clone(&self) -> Variant {
        let mut copies = HashMap::new();
        deep_clone_inner(self, &mut copies)
    }
}

fn structurally_eq_inner(
    a: &Variant,
    b: &Variant,
    visited: &mut HashSet<(ObjectId, ObjectId)>,
) -> bool {
    if let (Some(ia), Some(ib)) = (a.identity(), b.identity()) {
        if !visited.insert((ia, ib)) {
            return true;
        }
    }
    match (a, b) {
        (Variant::Null, Variant::Null) => true,
        (Variant::Bool(x), Variant::Bool(y)) => x == y,
        (Variant::Number(x), Variant::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Variant::String(x), Variant::String(y)) => x == y,
        (Variant::Buffer(x), Variant::Buffer(y)) => x == y,
        (Variant::Array(x), Variant::Array(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(x, y)| structurally_eq_inner(x, y, visited))
        }
        (Variant::Dict(x), Variant::Dict(y)) => dicts_eq(&x.borrow(), &y.borrow(), visited),
        (Variant::Object(x), Variant::Object(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.class_name == y.class_name
                && x.kind == y.kind
                && x.flags == y.flags
                && x.id == y.id
                && dicts_eq(&x.fields, &y.fields, visited)
        }
        _ => false,
    }
}

fn dicts_eq(x: &Dict, y: &Dict, visited: &mut HashSet<(ObjectId, ObjectId)>) -> bool {
    x.len() == y.len()
        && x.iter().zip(y.iter()).all(|((kx, vx), (ky, vy))| {
            kx == ky && structurally_eq_inner(vx, vy, visited)
        })
}

fn deep_clone_inner(value: &Variant, copies: &mut HashMap<ObjectId, Variant>) -> Variant {
    if let Some(id) = value.identity() {
        if let Some(copy) = copies.get(&id) {
            return copy.clone();
        }
    }
    match value {
        Variant::Array(items) => {
            let copy = Rc::new(RefCell::new(Vec::new()));
            copies.insert(ObjectId::of(items), Variant::Array(copy.clone()));
            let cloned: Vec<Variant> = items
                .borrow()
                .iter()
                .map(|item| deep_clone_inner(item, copies))
                .collect();
            *copy.borrow_mut() = cloned;
            Variant::Array(copy)
        }
        Variant::Dict(entries) => {
            let copy = Rc::new(RefCell::new(Dict::new()));
            copies.insert(ObjectId::of(entries), Variant::Dict(copy.clone()));
            let cloned: Dict = entries
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), deep_clone_inner(v, copies)))
                .collect();
            *copy.borrow_mut() = cloned;
            Variant::Dict(copy)
        }
        Variant::Object(obj) => {
            let source = obj.borrow();
            let copy = SceneObject {
                fields: Dict::new(),
                ..source.clone()
            }
            .into_ref();
            copies.insert(ObjectId::of(obj), Variant::Object(copy.clone()));
            let cloned: Dict = source
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), deep_clone_inner(v, copies)))
                .collect();
            copy.borrow_mut().fields = cloned;
            Variant::Object(copy)
        }
        other => other.clone(),
    }
}

// Shallow on purpose: graphs may be cyclic.
impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => write!(f, "Null"),
            Variant::Bool(b) => write!(f, "Bool({b})"),
            Variant::Number(n) => write!(f, "Number({n})"),
            Variant::String(s) => write!(f, "String({s:?})"),
            Variant::Buffer(b) => write!(f, "Buffer({}, {:?})", b.kind.ctor_name(), b.data),
            Variant::Array(a) => match a.try_borrow() {
                Ok(items) => write!(f, "Array(len={}, {:p})", items.len(), Rc::as_ptr(a)),
                Err(_) => write!(f, "Array({:p})", Rc::as_ptr(a)),
            },
            Variant::Dict(d) => match d.try_borrow() {
                Ok(entries) => write!(f, "Dict(len={}, {:p})", entries.len(), Rc::as_ptr(d)),
                Err(_) => write!(f, "Dict({:p})", Rc::as_ptr(d)),
            },
            Variant::Object(o) => match o.try_borrow() {
                Ok(object) => write!(f, "Object({}, {:p})", object.class_name, Rc::as_ptr(o)),
                Err(_) => write!(f, "Object({:p})", Rc::as_ptr(o)),
            },
        }
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Bool(value)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Number(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Variant::Number(f64::from(value))
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<TypedArray> for Variant {
    fn from(value: TypedArray) -> Self {
        Variant::Buffer(value)
    }
}

impl From<ObjRef> for Variant {
    fn from(value: ObjRef) -> Self {
        Variant::Object(value)
    }
}

impl From<SceneObject> for Variant {
    fn from(value: SceneObject) -> Self {
        Variant::object(value)
    }
}
