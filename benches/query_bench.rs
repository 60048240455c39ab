//! Query benchmarks
//!
//! Run with: cargo bench
//!
//! Measures:
//! - Spawning into per-component storages
//! - Static query iteration (read, write, filtered)
//! - Dynamic query iteration through reflected field access

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hecs::World as HecsWorld;
use storage_ecs::prelude::*;

#[derive(Debug, Copy, Clone)]
struct Position {
    x: f64,
    y: f64,
}
impl_component!(Position, fields: [x, y]);

#[derive(Debug, Copy, Clone)]
struct Velocity {
    x: f64,
    y: f64,
}
impl_component!(Velocity, fields: [x, y]);

#[derive(Debug, Copy, Clone)]
struct Frozen;
impl_component!(Frozen);

fn populate(count: usize) -> World {
    let mut world = World::new();
    for i in 0..count {
        let e = world
            .spawn((
                Position { x: i as f64, y: 0.0 },
                Velocity { x: 1.0, y: 1.0 },
            ))
            .unwrap();
        if i % 4 == 0 {
            world.insert(e, Frozen).unwrap();
        }
    }
    world
}

fn populate_hecs(count: usize) -> HecsWorld {
    let mut world = HecsWorld::new();
    for i in 0..count {
        let e = world.spawn((
            Position { x: i as f64, y: 0.0 },
            Velocity { x: 1.0, y: 1.0 },
        ));
        if i % 4 == 0 {
            world.insert_one(e, Frozen).unwrap();
        }
    }
    world
}

fn bench_spawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    group.bench_function("storage_spawn_1k", |b| {
        b.iter(|| black_box(populate(1_000)));
    });
    group.bench_function("hecs_spawn_1k", |b| {
        b.iter(|| black_box(populate_hecs(1_000)));
    });

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    for count in [1_000usize, 10_000] {
        let mut world = populate(count);
        group.bench_with_input(BenchmarkId::new("storage_read", count), &count, |b, _| {
            b.iter(|| {
                let mut sum = 0.0;
                for (pos, vel) in world.query::<(&Position, &Velocity)>().iter() {
                    sum += pos.x + vel.x;
                }
                black_box(sum)
            });
        });
        group.bench_with_input(BenchmarkId::new("storage_write", count), &count, |b, _| {
            b.iter(|| {
                for (pos, vel) in world.query::<(&mut Position, &Velocity)>().iter() {
                    pos.x += vel.x;
                    pos.y += vel.y;
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("storage_without", count), &count, |b, _| {
            b.iter(|| {
                black_box(
                    world
                        .query::<(&Position, Without<&Frozen>)>()
                        .count(),
                )
            });
        });

        let mut hecs_world = populate_hecs(count);
        group.bench_with_input(BenchmarkId::new("hecs_write", count), &count, |b, _| {
            b.iter(|| {
                for (_, (pos, vel)) in hecs_world.query_mut::<(&mut Position, &Velocity)>() {
                    pos.x += vel.x;
                    pos.y += vel.y;
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("hecs_without", count), &count, |b, _| {
            b.iter(|| {
                black_box(
                    hecs_world
                        .query_mut::<&Position>()
                        .without::<&Frozen>()
                        .into_iter()
                        .count(),
                )
            });
        });
    }

    group.finish();
}

fn bench_dynamic(c: &mut Criterion) {
    let mut world = populate(10_000);
    let mut query = DynamicQuery::new();
    query
        .with_component(ComponentId::of::<Position>(), true)
        .with_component(ComponentId::of::<Velocity>(), false);

    c.bench_function("dynamic_write_10k", |b| {
        b.iter(|| {
            let mut cursor = query.begin(&mut world).unwrap();
            while cursor.is_not_done() {
                let speed = cursor.get_access(1).and_then(|access| access.get("x"));
                if let (Some(ReflectValue::Float(dx)), Some(access)) =
                    (speed, cursor.get_access_mut(0))
                {
                    access.set("x", ReflectValue::Float(dx));
                }
                cursor.next();
            }
        });
    });
}

criterion_group!(benches, bench_spawn, bench_iterate, bench_dynamic);
criterion_main!(benches);
