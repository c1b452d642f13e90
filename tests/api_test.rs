mod common;

use common::{entries, loader, registry, sprite_frame, sprite_scene, FRAME_UUID};
use scene_serde::api::{deserialize, serialize, Artifact, Serializer};
use scene_serde::context::{OutputFormat, SerializeOptions};
use scene_serde::object::{Dict, Variant};
use serde_json::json;
use std::rc::Rc;

#[test]
fn test_concrete_scenario_dict_with_self_reference() {
    let mut entries_map = Dict::new();
    entries_map.insert("a".into(), 1.into());
    entries_map.insert("b".into(), Variant::Null);
    entries_map.insert(
        "c".into(),
        Variant::array(vec![1.into(), 2.into(), 3.into()]),
    );
    let root = Variant::dict(entries_map);
    if let Variant::Dict(dict) = &root {
        dict.borrow_mut().insert("self".into(), root.clone());
    }

    let registry = registry();
    let output = serialize(&registry, &root, &SerializeOptions::default()).unwrap();
    assert_eq!(
        output.artifact,
        Artifact::Dynamic(json!([
            { "a": 1, "b": null, "c": [1, 2, 3], "self": { "__id__": 0 } }
        ]))
    );

    let assets = loader(&[]);
    let loaded = pollster::block_on(deserialize(&registry, &assets, &output.artifact)).unwrap();
    let Variant::Dict(dict) = &loaded.root else {
        panic!("expected a dict root");
    };
    let dict_ref = dict.borrow();
    match dict_ref.get("self") {
        Some(Variant::Dict(inner)) => assert!(Rc::ptr_eq(inner, dict)),
        other => panic!("unexpected `self`: {other:?}"),
    }
    assert!(dict_ref.get("b").unwrap().is_null());
}

#[test]
fn test_dynamic_round_trip() {
    let registry = registry();
    let frame = sprite_frame();
    let scene = Variant::Object(sprite_scene(&registry, &frame));

    let output = serialize(&registry, &scene, &SerializeOptions::default()).unwrap();
    assert_eq!(
        output.dependencies.iter().collect::<Vec<_>>(),
        vec![FRAME_UUID]
    );
    let document = output.artifact.as_dynamic().unwrap();
    assert_eq!(entries(document).len(), 3);
    assert_eq!(document[0]["__type__"], "Scene");
    assert_eq!(document[1]["_id"], "hero-id");
    assert_eq!(
        document[2]["frame"],
        json!({ "__uuid__": FRAME_UUID, "__expectedType__": "SpriteFrame" })
    );
    assert_eq!(document[2]["_size"], json!(4));

    let assets = loader(&[&frame]);
    let loaded = pollster::block_on(deserialize(&registry, &assets, &output.artifact)).unwrap();
    assert!(loaded.root.structurally_eq(&scene));
    assert!(loaded.reports.is_empty());
}

#[test]
fn test_compiled_round_trip() {
    let registry = registry();
    let frame = sprite_frame();
    let scene = Variant::Object(sprite_scene(&registry, &frame));

    let output = serialize(&registry, &scene, &SerializeOptions::export()).unwrap();
    let document = output.artifact.as_compiled().unwrap();
    assert_eq!(document.uuids, vec![FRAME_UUID.to_string()]);
    assert!(document.root_data().is_some());

    let assets = loader(&[&frame]);
    let loaded = pollster::block_on(deserialize(&registry, &assets, &output.artifact)).unwrap();
    let expected = {
        // Exporting drops the short id of non-persistent nodes.
        let copy = scene.deep_clone();
        let root = copy.as_object().unwrap().borrow();
        if let Some(Variant::Array(children)) = root.get("children") {
            children.borrow()[0].as_object().unwrap().borrow_mut().id = None;
        }
        drop(root);
        copy
    };
    assert!(loaded.root.structurally_eq(&expected));
}

#[test]
fn test_binary_round_trip() {
    let registry = registry();
    let frame = sprite_frame();
    let scene = Variant::Object(sprite_scene(&registry, &frame));
    let options = SerializeOptions {
        use_binary_form: true,
        ..SerializeOptions::export()
    };

    let output = Serializer::new(&registry).serialize(&scene, &options).unwrap();
    assert!(matches!(output.artifact, Artifact::Binary(ref bytes) if !bytes.is_empty()));

    let assets = loader(&[&frame]);
    let loaded = pollster::block_on(deserialize(&registry, &assets, &output.artifact)).unwrap();
    let root = loaded.root.as_object().unwrap().borrow();
    assert_eq!(root.class_name, "Scene");
}

#[test]
fn test_stringified_output() {
    let registry = registry();
    let frame = sprite_frame();
    let scene = Variant::Object(sprite_scene(&registry, &frame));
    let options = SerializeOptions {
        stringify: true,
        ..SerializeOptions::default()
    };
    let output = serialize(&registry, &scene, &options).unwrap();
    let Artifact::Text(text) = &output.artifact else {
        panic!("expected text output");
    };
    let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
    let plain = serialize(&registry, &scene, &SerializeOptions::default()).unwrap();
    assert_eq!(Some(&parsed), plain.artifact.as_dynamic());
}

#[test]
fn test_serialization_is_idempotent() {
    let registry = registry();
    let frame = sprite_frame();
    let scene = Variant::Object(sprite_scene(&registry, &frame));
    for options in [SerializeOptions::default(), SerializeOptions::export()] {
        let first = serialize(&registry, &scene, &options).unwrap();
        let second = serialize(&registry, &scene, &options).unwrap();
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(first.dependencies, second.dependencies);
    }
}

#[test]
fn test_artifact_to_json_and_yaml() {
    let registry = registry();
    let root = Variant::array(vec![1.into(), "two".into()]);
    let output = serialize(&registry, &root, &SerializeOptions::default()).unwrap();

    let json_text = output.artifact.to_json().unwrap();
    let reparsed: serde_json::Value = serde_json::from_str(&json_text).unwrap();
    assert_eq!(reparsed, json!([[1, "two"]]));

    let yaml = output.artifact.to_yaml().unwrap();
    let from_yaml: serde_json::Value = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(from_yaml, json!([[1, "two"]]));
}

#[test]
fn test_compiled_format_option() {
    let registry = registry();
    let root = Variant::array(vec![1.into()]);
    let options = SerializeOptions {
        format: OutputFormat::Compiled,
        ..SerializeOptions::default()
    };
    let output = serialize(&registry, &root, &options).unwrap();
    let document = output.artifact.as_compiled().unwrap();
    assert_eq!(document.instances.len(), 1);
    assert_eq!(document.expand().unwrap(), json!([[1]]));
}
