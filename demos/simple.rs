use scene_serde::api::serialize;
use scene_serde::context::SerializeOptions;
use scene_serde::object::{ObjectKind, SceneObject, Variant};
use scene_serde::schema::{ClassKind, ClassRegistry, ClassSchema, FieldSchema};

fn main() {
    let mut registry = ClassRegistry::new();
    registry
        .register(
            ClassSchema::new("Player", ClassKind::Plain)
                .field(FieldSchema::new("name", ""))
                .field(FieldSchema::new("friend", Variant::Null))
                .field(FieldSchema::new("avatar", Variant::Null)),
        )
        .register(ClassSchema::new("Texture", ClassKind::Asset));

    let avatar = SceneObject::asset("Texture", "0e95a9f8-d4e7-4849-875a-7a11dd692b34").into_ref();
    let alice = SceneObject::new("Player", ObjectKind::Plain)
        .with_field("name", "Alice")
        .with_field("avatar", avatar)
        .into_ref();
    let bob = SceneObject::new("Player", ObjectKind::Plain)
        .with_field("name", "Bob")
        .with_field("friend", alice.clone())
        .into_ref();
    alice.borrow_mut().set("friend", bob);

    match serialize(&registry, &Variant::Object(alice), &SerializeOptions::default()) {
        Ok(output) => {
            let json_output = output.artifact.to_json().unwrap();
            println!("Serialized scene graph:\n{json_output}");
            println!("Depends on: {:?}", output.dependencies);
        }
        Err(e) => {
            eprintln!("Failed to serialize: {e:?}");
        }
    }
}
