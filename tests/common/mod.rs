#![allow(dead_code)]

use scene_serde::object::{
    NodeInfo, ObjRef, ObjectKind, PrefabLink, SceneObject, TypedArray, Variant,
};
use scene_serde::schema::{ClassKind, ClassRegistry, ClassSchema, FieldSchema};
use std::collections::HashMap;

pub const FRAME_UUID: &str = "fc991dd7-0033-4b80-9d41-c8a86a702e59";
pub const TEXTURE_UUID: &str = "0e95a9f8-d4e7-4849-875a-7a11dd692b34@6c48a";

pub fn color(r: i32, g: i32, b: i32) -> Variant {
    Variant::object(
        SceneObject::new("Color", ObjectKind::ValueType)
            .with_field("r", r)
            .with_field("g", g)
            .with_field("b", b)
            .with_field("a", 255),
    )
}

pub fn registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry
        .register(
            ClassSchema::new("Scene", ClassKind::Scene)
                .field(FieldSchema::new("children", Variant::array(vec![]))),
        )
        .register(
            ClassSchema::new("Node", ClassKind::Node)
                .field(FieldSchema::new("name", ""))
                .field(FieldSchema::new("_trs", TypedArray::identity_transform()))
                .field(FieldSchema::new("parent", Variant::Null))
                .field(FieldSchema::new("children", Variant::array(vec![])))
                .field(FieldSchema::new("components", Variant::array(vec![]))),
        )
        .register(
            ClassSchema::new("Sprite", ClassKind::Component)
                .field(FieldSchema::new("node", Variant::Null))
                .field(FieldSchema::new("frame", Variant::Null))
                .field(FieldSchema::new("color", color(255, 255, 255)))
                .field(FieldSchema::new("size", 1).formerly("_size")),
        )
        .register(
            ClassSchema::new("Color", ClassKind::ValueType)
                .field(FieldSchema::new("r", 255))
                .field(FieldSchema::new("g", 255))
                .field(FieldSchema::new("b", 255))
                .field(FieldSchema::new("a", 255)),
        )
        .register(
            ClassSchema::new("Follower", ClassKind::Plain)
                .field(FieldSchema::new("label", ""))
                .field(FieldSchema::new("target", Variant::Null)),
        )
        .register(
            ClassSchema::new("Pair", ClassKind::Plain)
                .field(FieldSchema::new("first", Variant::Null))
                .field(FieldSchema::new("second", Variant::Null)),
        )
        .register(ClassSchema::new("SpriteFrame", ClassKind::Asset))
        .register(ClassSchema::new("Texture", ClassKind::Asset));
    registry
}

pub fn instance(registry: &ClassRegistry, class_name: &str) -> ObjRef {
    registry
        .instantiate(class_name)
        .unwrap_or_else(|| panic!("`{class_name}` is not registered"))
        .into_ref()
}

pub fn node(registry: &ClassRegistry, name: &str) -> ObjRef {
    let node = instance(registry, "Node");
    node.borrow_mut().set("name", name);
    node
}

pub fn prefab_root(registry: &ClassRegistry, name: &str, sync: bool) -> ObjRef {
    let node = node(registry, name);
    node.borrow_mut().kind = ObjectKind::Node(NodeInfo {
        prefab: Some(PrefabLink { sync }),
        ..NodeInfo::default()
    });
    node
}

fn push(owner: &ObjRef, field: &str, value: Variant) {
    let owner = owner.borrow();
    match owner.get(field) {
        Some(Variant::Array(items)) => items.borrow_mut().push(value),
        other => panic!("`{field}` is not an array: {other:?}"),
    }
}

pub fn add_child(parent: &ObjRef, child: &ObjRef) {
    push(parent, "children", Variant::Object(child.clone()));
    child
        .borrow_mut()
        .set("parent", Variant::Object(parent.clone()));
}

pub fn add_component(node: &ObjRef, component: &ObjRef) {
    push(node, "components", Variant::Object(component.clone()));
    component
        .borrow_mut()
        .set("node", Variant::Object(node.clone()));
}

pub fn sprite_frame() -> ObjRef {
    SceneObject::asset("SpriteFrame", FRAME_UUID).into_ref()
}

pub fn loader(assets: &[&ObjRef]) -> HashMap<String, ObjRef> {
    assets
        .iter()
        .map(|asset| {
            let uuid = match &asset.borrow().kind {
                ObjectKind::Asset { uuid: Some(uuid) } => uuid.clone(),
                other => panic!("not a saved asset: {other:?}"),
            };
            (uuid, (*asset).clone())
        })
        .collect()
}

/// Scene with one node carrying a sprite that references a frame asset.
pub fn sprite_scene(registry: &ClassRegistry, frame: &ObjRef) -> ObjRef {
    let scene = instance(registry, "Scene");
    let hero = node(registry, "hero");
    hero.borrow_mut().id = Some("hero-id".into());
    add_child(&scene, &hero);

    let sprite = instance(registry, "Sprite");
    {
        let mut sprite = sprite.borrow_mut();
        sprite.set("frame", Variant::Object(frame.clone()));
        sprite.set("color", color(10, 20, 30));
        sprite.set("size", 4);
    }
    add_component(&hero, &sprite);
    scene
}

pub fn entries(value: &serde_json::Value) -> &Vec<serde_json::Value> {
    value.as_array().expect("dynamic document is an entry list")
}

pub fn names(value: &serde_json::Value) -> Vec<String> {
    entries(value)
        .iter()
        .filter_map(|entry| entry.get("name").and_then(|n| n.as_str()).map(str::to_string))
        .collect()
}
