// Option files and artifacts stored on disk.

mod common;

use common::{loader, registry, sprite_frame, sprite_scene, FRAME_UUID};
use scene_serde::api::{deserialize, serialize, Artifact};
use scene_serde::context::{OutputFormat, SerializeOptions};
use scene_serde::error::SerializeError;
use scene_serde::object::Variant;
use scene_serde::uuid::decompress_uuid;
use std::fs;
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

#[test]
fn test_options_from_yaml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "format: compiled").unwrap();
    writeln!(file, "exporting: true").unwrap();
    writeln!(file, "compressUuid: true").unwrap();
    writeln!(file, "keepNodeUuid: true").unwrap();

    let text = fs::read_to_string(file.path()).unwrap();
    let options = SerializeOptions::from_yaml_str(&text).unwrap();
    assert_eq!(options.format, OutputFormat::Compiled);
    assert!(options.exporting && options.compress_uuid && options.keep_node_uuid);
    assert!(options.discard_invalid);

    let registry = registry();
    let frame = sprite_frame();
    let scene = Variant::Object(sprite_scene(&registry, &frame));
    let output = serialize(&registry, &scene, &options).unwrap();
    let document = output.artifact.as_compiled().unwrap();
    assert_eq!(document.uuids.len(), 1);
    assert_eq!(document.uuids[0].len(), 22);
    assert_eq!(decompress_uuid(&document.uuids[0]), FRAME_UUID);
}

#[test]
fn test_options_from_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("options.json");
    fs::write(&path, r#"{ "stringify": true, "dontStripDefault": true }"#).unwrap();

    let options = SerializeOptions::from_json_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert!(options.stringify);
    assert!(options.dont_strip_default);
    assert_eq!(options.format, OutputFormat::Dynamic);
}

#[test]
fn test_invalid_option_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("options.yaml");
    fs::write(&path, "exporting: [not, a, bool]\n").unwrap();
    let result = SerializeOptions::from_yaml_str(&fs::read_to_string(&path).unwrap());
    assert!(matches!(result, Err(SerializeError::Configuration { .. })));
}

#[test]
fn test_stringified_artifact_survives_disk() {
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

    let dir = tempdir().unwrap();
    let path = dir.path().join("scene.json");
    fs::write(&path, text).unwrap();
    let artifact = Artifact::Text(fs::read_to_string(&path).unwrap());

    let assets = loader(&[&frame]);
    let loaded = pollster::block_on(deserialize(&registry, &assets, &artifact)).unwrap();
    assert!(loaded.root.structurally_eq(&scene));
}

#[test]
fn test_options_round_trip_through_yaml() {
    let options = SerializeOptions {
        reserve_contents_for_syncable_prefab: true,
        ..SerializeOptions::export()
    };
    let yaml = serde_yaml::to_string(&options).unwrap();
    assert!(yaml.contains("reserveContentsForSyncablePrefab: true"));
    assert_eq!(SerializeOptions::from_yaml_str(&yaml).unwrap(), options);
}
