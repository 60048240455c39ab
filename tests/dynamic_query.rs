use glam::Vec3;
use storage_ecs::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Transform {
    origin: Vec3,
}
impl_component!(Transform, fields: [origin]);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health {
    value: i64,
}
impl_component!(Health, fields: [value]);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Dead;
impl_component!(Dead);

fn populate(world: &mut World) -> Vec<EntityId> {
    let mut entities = Vec::new();
    for i in 0..3 {
        let e = world
            .spawn((Transform {
                origin: Vec3::splat(i as f32),
            }, Health { value: 10 * i }))
            .unwrap();
        entities.push(e);
    }
    let dead = world
        .spawn((Transform { origin: Vec3::ZERO }, Dead))
        .unwrap();
    entities.push(dead);
    entities
}

#[test]
fn test_iterate_and_write_fields() {
    let mut world = World::new();
    let entities = populate(&mut world);
    let transform = register_component::<Transform>();
    let health = register_component::<Health>();

    let mut query = DynamicQuery::new();
    query
        .with_component(transform, false)
        .with_component(health, true);
    assert!(query.is_valid());

    {
        let mut cursor = query.begin(&mut world).unwrap();
        assert_eq!(cursor.access_count(), 2);
        let mut visited = 0;
        while cursor.is_not_done() {
            assert!(!cursor.get_current_entity_id().is_null());
            let origin = cursor.get_access(0).unwrap().get("origin");
            assert!(matches!(origin, Some(ReflectValue::Vec3(_))));

            let access = cursor.get_access_mut(1).unwrap();
            assert!(access.is_mutable());
            assert_eq!(access.component_id(), health);
            assert!(access.set("value", ReflectValue::Int(99)));
            visited += 1;
            cursor.next();
        }
        assert_eq!(visited, 3);
        assert!(cursor.get_current_entity_id().is_null());
        cursor.end();
    }

    for &e in &entities[..3] {
        assert_eq!(world.get::<Health>(e), Some(&Health { value: 99 }));
    }
}

#[test]
fn test_fetch_random_entity() {
    let mut world = World::new();
    let entities = populate(&mut world);

    let mut query = DynamicQuery::new();
    query.with_component(register_component::<Health>(), false);
    let mut cursor = query.begin(&mut world).unwrap();

    assert!(cursor.fetch(entities[2]));
    assert_eq!(
        cursor.get_access(0).unwrap().get("value"),
        Some(ReflectValue::Int(20))
    );

    // The dead entity has no health, accessors stay where they were
    assert!(!cursor.fetch(entities[3]));
    assert_eq!(
        cursor.get_access(0).unwrap().get("value"),
        Some(ReflectValue::Int(20))
    );
    assert!(cursor.has(entities[0]));
    assert!(!cursor.has(entities[3]));
}

#[test]
fn test_without_component() {
    let mut world = World::new();
    let entities = populate(&mut world);

    let mut query = DynamicQuery::new();
    query
        .with_component(register_component::<Transform>(), true)
        .without_component(register_component::<Dead>());
    let mut cursor = query.begin(&mut world).unwrap();

    assert!(!cursor.has(entities[3]));
    let without = cursor.get_access(1).unwrap();
    assert!(!without.is_mutable());
    assert!(without.get_target().is_none());
    assert_eq!(cursor.count(), 3);
}

#[test]
fn test_maybe_component() {
    let mut world = World::new();
    let entities = populate(&mut world);

    let mut query = DynamicQuery::new();
    query
        .with_component(register_component::<Transform>(), false)
        .maybe_component(register_component::<Health>(), false);
    let mut cursor = query.begin(&mut world).unwrap();

    let mut present = 0;
    let mut absent = 0;
    while cursor.is_not_done() {
        match cursor.get_access(1).unwrap().get_target() {
            Some(_) => present += 1,
            None => {
                assert_eq!(cursor.get_current_entity_id(), entities[3]);
                absent += 1;
            }
        }
        cursor.next();
    }
    assert_eq!((present, absent), (3, 1));
}

#[test]
fn test_maybe_only_query_is_vacuous() {
    let mut world = World::new();
    populate(&mut world);

    let mut query = DynamicQuery::new();
    query.maybe_component(register_component::<Health>(), true);
    assert!(query.is_valid());

    let mut cursor = query.begin(&mut world).unwrap();
    assert!(!cursor.is_not_done());
    assert_eq!(cursor.count(), 0);
    drop(cursor);

    let mut query = DynamicQuery::new();
    query.without_component(register_component::<Dead>());
    let cursor = query.begin(&mut world).unwrap();
    assert!(!cursor.is_not_done());
}

#[test]
fn test_count_ignores_cursor_position() {
    let mut world = World::new();
    populate(&mut world);

    let mut query = DynamicQuery::new();
    query.with_component(register_component::<Health>(), false);
    let mut cursor = query.begin(&mut world).unwrap();
    while cursor.is_not_done() {
        cursor.next();
    }
    assert_eq!(cursor.count(), 3);
    assert!(!cursor.is_not_done());
}

#[test]
fn test_invalid_then_reset_then_valid() {
    let mut world = World::new();
    populate(&mut world);
    let health = register_component::<Health>();

    let mut query = DynamicQuery::new();
    query
        .with_component(health, true)
        .with_component(ComponentId::from_raw(u32::MAX - 1), false);
    assert!(!query.is_valid());
    assert!(matches!(
        query.begin(&mut world),
        Err(EcsError::InvalidQuery(_))
    ));

    query.reset();
    assert!(!query.is_valid());
    query.with_component(health, true);
    assert!(query.is_valid());
    assert_eq!(query.begin(&mut world).unwrap().count(), 3);
}

#[test]
fn test_changed_component() {
    let mut world = World::new();
    let entities = populate(&mut world);
    let health = register_component::<Health>();

    let mut query = DynamicQuery::new();
    query.changed_component(health, false);

    // begin turns tracing on; nothing has changed yet
    assert_eq!(query.begin(&mut world).unwrap().count(), 0);

    world.get_mut::<Health>(entities[1]).unwrap().value = 5;
    {
        let cursor = query.begin(&mut world).unwrap();
        assert_eq!(cursor.get_current_entity_id(), entities[1]);
        assert_eq!(
            cursor.get_access(0).unwrap().get("value"),
            Some(ReflectValue::Int(5))
        );
    }

    world.flush_changed();
    assert_eq!(query.begin(&mut world).unwrap().count(), 0);
}

#[test]
fn test_mutable_access_marks_changed() {
    let mut world = World::new();
    let entities = populate(&mut world);
    let health = register_component::<Health>();
    world
        .get_storage_by_id_mut(health)
        .unwrap()
        .set_tracing_change(true);

    let mut reader = DynamicQuery::new();
    reader.with_component(health, false);
    reader.begin(&mut world).unwrap().count();
    assert!(!world.get_storage::<Health>().unwrap().is_changed(entities[0]));

    let mut writer = DynamicQuery::new();
    writer.with_component(health, true);
    // begin loads the first match mutably
    let cursor = writer.begin(&mut world).unwrap();
    let first = cursor.get_current_entity_id();
    cursor.end();
    let storage = world.get_storage::<Health>().unwrap();
    assert!(storage.is_changed(first));
    assert_eq!(storage.change_tracker().changed_count(), 1);
}

#[test]
fn test_access_report() {
    let transform = register_component::<Transform>();
    let health = register_component::<Health>();
    let dead = register_component::<Dead>();

    let mut query = DynamicQuery::new();
    query
        .with_component(transform, true)
        .changed_component(health, false)
        .without_component(dead);

    let mut info = SystemExeInfo::new();
    query.get_components(&mut info);
    assert!(info.mutable_components.contains(&transform));
    assert!(info.immutable_components.contains(&health));
    assert!(info.immutable_components.contains(&dead));
    assert!(info.need_changed.contains(&health));
}

#[test]
fn test_shared_accessors_on_one_storage() {
    let mut world = World::new();
    let entities = populate(&mut world);
    let health = register_component::<Health>();

    let mut query = DynamicQuery::new();
    query
        .with_component(health, false)
        .maybe_component(health, false);
    assert!(query.is_valid());

    let mut cursor = query.begin(&mut world).unwrap();
    let mut values = Vec::new();
    while cursor.is_not_done() {
        let first = cursor.get_access(0).unwrap().get("value");
        let second = cursor.get_access(1).unwrap().get("value");
        assert_eq!(first, second);
        values.push(first);
        cursor.next();
    }
    assert_eq!(values.len(), 3);

    assert!(cursor.fetch(entities[1]));
    assert_eq!(
        cursor.get_access(0).unwrap().get("value"),
        Some(ReflectValue::Int(10))
    );
    assert_eq!(
        cursor.get_access(1).unwrap().get("value"),
        Some(ReflectValue::Int(10))
    );
}
