use glam::{Vec2, Vec3};
use storage_ecs::prelude::*;
use storage_ecs::{component_id_by_name, register_script_component, ScriptComponentDescriptor};

fn register(name: &str) -> ComponentId {
    register_script_component(
        ScriptComponentDescriptor::new(name)
            .with_field("velocity", Vec3::ZERO)
            .with_field("speed", 1.0)
            .with_field("label", "none"),
    )
    .unwrap()
}

#[test]
fn test_typed_set_through_dynamic_query() {
    let id = register("Mover.gd");
    let mut world = World::new();
    let e = world
        .create_entity()
        .with_dynamic(id, vec![("speed".to_string(), ReflectValue::Float(4.0))])
        .build()
        .unwrap();

    let mut query = DynamicQuery::new();
    query.with_component(id, true);
    {
        let mut cursor = query.begin(&mut world).unwrap();
        assert_eq!(cursor.get_current_entity_id(), e);

        let access = cursor.get_access_mut(0).unwrap();
        assert_eq!(access.get("speed"), Some(ReflectValue::Float(4.0)));
        assert_eq!(access.get("label"), Some(ReflectValue::from("none")));
        assert!(access.set("velocity", ReflectValue::Vec3(Vec3::new(1.0, 2.0, 3.0))));
    }

    let storage = world.get_storage_by_id(id).unwrap();
    assert_eq!(
        storage.get_reflect(e).unwrap().get_field("velocity"),
        Some(ReflectValue::Vec3(Vec3::new(1.0, 2.0, 3.0)))
    );
}

#[test]
fn test_mismatched_type_is_ignored() {
    let id = register("Mismatch.gd");
    let mut world = World::new();
    let e = world.create_entity().with_dynamic(id, Vec::new()).build().unwrap();

    let mut query = DynamicQuery::new();
    query.with_component(id, true);
    let mut cursor = query.begin(&mut world).unwrap();
    let access = cursor.get_access_mut(0).unwrap();

    assert!(!access.set("velocity", ReflectValue::Vec2(Vec2::new(1.0, 1.0))));
    assert_eq!(access.get("velocity"), Some(ReflectValue::Vec3(Vec3::ZERO)));
    assert!(!access.set("missing", ReflectValue::Int(1)));
    assert!(cursor.fetch(e));
}

#[test]
fn test_immutable_set_is_ignored() {
    let id = register("ReadOnly.gd");
    let mut world = World::new();
    world.create_entity().with_dynamic(id, Vec::new()).build().unwrap();

    let mut query = DynamicQuery::new();
    query.with_component(id, false);
    let mut cursor = query.begin(&mut world).unwrap();
    let access = cursor.get_access_mut(0).unwrap();

    assert!(!access.is_mutable());
    assert!(!access.set("speed", ReflectValue::Float(9.0)));
    assert_eq!(access.get("speed"), Some(ReflectValue::Float(1.0)));
}

#[test]
fn test_bad_initial_values_abort_the_entity() {
    let id = register("Strict.gd");
    let mut world = World::new();

    let result = world
        .create_entity()
        .with_dynamic(id, vec![("speed".to_string(), ReflectValue::from("fast"))])
        .build();
    assert_eq!(
        result,
        Err(EcsError::FieldTypeMismatch {
            field: "speed".to_string()
        })
    );
    assert_eq!(world.entity_count(), 0);
}

#[test]
fn test_descriptor_from_json() {
    let descriptor = ScriptComponentDescriptor::from_json(
        r#"{
            "name": "FromJson.gd",
            "fields": [
                { "name": "hp", "default": { "Int": 100 } },
                { "name": "alive", "default": { "Bool": true } }
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(descriptor.fields.len(), 2);

    let id = register_script_component(descriptor).unwrap();
    assert_eq!(component_id_by_name("FromJson.gd"), Some(id));

    let mut world = World::new();
    let e = world.spawn_empty();
    world
        .insert_dynamic(e, id, vec![("hp".to_string(), ReflectValue::Int(42))])
        .unwrap();

    let target = world.get_storage_by_id(id).unwrap().get_reflect(e).unwrap();
    assert_eq!(target.get_field("hp"), Some(ReflectValue::Int(42)));
    assert_eq!(target.get_field("alive"), Some(ReflectValue::Bool(true)));
}

#[test]
fn test_duplicate_registration_fails() {
    register("Twice.gd");
    let again = register_script_component(ScriptComponentDescriptor::new("Twice.gd"));
    assert!(matches!(again, Err(EcsError::DuplicateComponent(_))));
}
