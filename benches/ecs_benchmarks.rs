//! Criterion benchmarks for the storage core: spawning, shape transitions,
//! and bulk view iteration.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Vel {
    dx: f32,
    dy: f32,
}

struct Hot; // tag

fn spawn_10k(c: &mut Criterion) {
    c.bench_function("spawn_10k_two_components", |b| {
        b.iter(|| {
            let mut world = World::new();
            world.register::<Pos>();
            world.register::<Vel>();
            for i in 0..10_000u32 {
                let e = world.create();
                world
                    .assign(
                        e,
                        Pos {
                            x: i as f32,
                            y: 0.0,
                        },
                    )
                    .unwrap();
                world.assign(e, Vel { dx: 1.0, dy: 1.0 }).unwrap();
            }
            black_box(world.entity_count())
        });
    });
}

fn shape_transition(c: &mut Criterion) {
    // After the first toggle the transition graph is warm; this measures the
    // cached-edge migration path.
    let mut world = World::new();
    world.register::<Pos>();
    world.register::<Vel>();
    let tag = world.register::<Hot>();
    let entities: Vec<Entity> = (0..1_000)
        .map(|i| {
            let e = world.create();
            world
                .assign(
                    e,
                    Pos {
                        x: i as f32,
                        y: 0.0,
                    },
                )
                .unwrap();
            world.assign(e, Vel { dx: 0.0, dy: 0.0 }).unwrap();
            e
        })
        .collect();

    c.bench_function("toggle_tag_1k_cached_edges", |b| {
        b.iter(|| {
            for &e in &entities {
                world.assign_with(e, &tag, Hot).unwrap();
            }
            for &e in &entities {
                world.unassign_with(e, &tag).unwrap();
            }
        });
    });
}

fn view_iteration(c: &mut Criterion) {
    let mut world = World::new();
    let pos = world.register::<Pos>();
    let vel = world.register::<Vel>();
    let moving = world.new_view(&[pos.id(), vel.id()], &[]).unwrap();
    for i in 0..100_000u32 {
        let e = world.create();
        world
            .assign(
                e,
                Pos {
                    x: i as f32,
                    y: 0.0,
                },
            )
            .unwrap();
        world.assign(e, Vel { dx: 1.0, dy: 2.0 }).unwrap();
    }

    c.bench_function("integrate_100k_rows", |b| {
        b.iter(|| {
            for mut row in world.view_iter_mut(moving) {
                let (dx, dy) = {
                    let v = row.get_with::<Vel>(&vel).unwrap();
                    (v.dx, v.dy)
                };
                let p = row.get_with_mut::<Pos>(&pos).unwrap();
                p.x += dx;
                p.y += dy;
            }
        });
    });
}

criterion_group!(benches, spawn_10k, shape_transition, view_iteration);
criterion_main!(benches);
