//! Benchmarks for batched stepping and episode generation.
//!
//! Run with: `cargo bench -p batch-sim`
//!
//! Measures step throughput (envs * steps / second) with forced random
//! actions, inline and on the physics worker, and the cost of generating an
//! episode set.

#![allow(missing_docs, clippy::unwrap_used, clippy::cast_precision_loss)]

use std::hint::black_box;

use batch_sim::{
    BatchedSimulator, Collection, FixedObject, FreeObjectEntry, RobotEntry, RobotLinkEntry,
    RobotModel, SimulatorAssets, Sphere, generate_benchmark_episode_set,
};
use batch_spatial::{Aabb, ColumnGridSet, ColumnGridSource};
use batch_types::{BatchedSimulatorConfig, EpisodeGenerationParams, EpisodeSource};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nalgebra::{Point3, Vector3};

const RADII: [f32; 2] = [0.015, 0.05];

// ============================================================================
// Scene
// ============================================================================

fn stage(name: &str) -> FixedObject {
    let grids = RADII
        .iter()
        .map(|&r| {
            let mut grid = ColumnGridSource::new(-1.0, -2.0, 120, 80, 0.05, r).unwrap();
            grid.fill_uniform(r, 2.5 - r);
            grid
        })
        .collect();
    FixedObject::new(name, ColumnGridSet::from_grids(grids))
}

/// A 6-link arm with two spheres per link.
fn robot_entry(num_links: usize) -> RobotEntry {
    RobotEntry {
        name: "arm".into(),
        links: (0..num_links)
            .map(|i| RobotLinkEntry {
                link_name: format!("link_{i}"),
                collision_spheres: vec![
                    Sphere::new(Point3::new(0.0, 0.1, 0.0), 0.05),
                    Sphere::new(Point3::new(0.0, 0.18, 0.0), 0.015),
                ],
            })
            .collect(),
        gripper_link: format!("link_{}", num_links - 1),
        gripper_query_offset: Vector3::new(0.0, 0.2, 0.0),
        gripper_query_radius: 0.1,
    }
}

fn collection() -> Collection {
    let can = Aabb::new(Point3::new(-0.04, -0.04, 0.0), Point3::new(0.04, 0.04, 0.12));
    let crate_box = Aabb::new(Point3::new(-0.1, -0.08, 0.0), Point3::new(0.1, 0.08, 0.15));
    Collection::new(RADII.to_vec())
        .with_free_object(FreeObjectEntry::generated("can", can, "uprightCylinder"))
        .with_free_object(FreeObjectEntry::generated("crate", crate_box, "box"))
        .with_robot(robot_entry(6))
}

fn params() -> EpisodeGenerationParams {
    EpisodeGenerationParams::default()
        .with_num_episodes(32)
        .with_target_num_spawns(32)
        .with_seed(3)
}

fn simulator(num_envs: usize, asynchronous: bool) -> BatchedSimulator {
    let mut config = BatchedSimulatorConfig::new(num_envs)
        .with_substeps(2)
        .with_random_actions()
        .with_episode_source(EpisodeSource::Procedural(params()));
    config.do_async_physics_step = asynchronous;
    let assets = SimulatorAssets::new(
        vec![stage("a"), stage("b")],
        collection(),
        RobotModel::n_link_arm("arm", 6, 0.2),
    );
    BatchedSimulator::new(config, assets).unwrap()
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_step(c: &mut Criterion) {
    let steps_per_iter = 10;
    let mut group = c.benchmark_group("batched_step");

    for &num_envs in &[16, 64, 256] {
        for (label, asynchronous) in [("inline", false), ("worker", true)] {
            group.throughput(Throughput::Elements((num_envs * steps_per_iter) as u64));
            group.bench_with_input(
                BenchmarkId::new(label, num_envs),
                &num_envs,
                |b, &num_envs| {
                    let mut sim = simulator(num_envs, asynchronous);
                    let dim = sim.action_layout().action_dim();
                    b.iter(|| {
                        for _ in 0..steps_per_iter {
                            sim.start_step_physics_or_reset(
                                vec![0.0; num_envs * dim],
                                vec![None; num_envs],
                            )
                            .unwrap();
                            sim.wait_step_physics_or_reset().unwrap();
                        }
                        black_box(sim.get_environment_states().len())
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_episode_generation(c: &mut Criterion) {
    let stages = vec![stage("a"), stage("b")];
    let collection = collection();
    c.bench_function("generate_episode_set_32x32", |b| {
        b.iter(|| {
            let set = generate_benchmark_episode_set(&params(), stages.clone(), &collection).unwrap();
            black_box(set.num_episodes())
        });
    });
}

criterion_group!(benches, bench_step, bench_episode_generation);
criterion_main!(benches);
