//! Benchmarks for column grid and broadphase queries.
//!
//! Run with: `cargo bench -p batch-spatial`
//!
//! Compares cached against uncached column grid lookups on a multi-layer
//! stage, and measures broadphase sphere queries with a populated grid.

#![allow(
    missing_docs,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::unwrap_used
)]

use std::hint::black_box;

use batch_spatial::{Aabb, CollisionBroadphaseGrid, ColumnGridSource, QueryCache};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A 20 x 20 m stage at 5 cm cells with a floor, a table top and a shelf.
fn layered_stage() -> ColumnGridSource {
    let mut grid = ColumnGridSource::new(-10.0, -10.0, 400, 400, 0.05, 0.05).unwrap();
    grid.fill_uniform(0.05, 0.7);
    for cell_x in 0..400 {
        for cell_z in 0..400 {
            grid.append_column(cell_x, cell_z, 0.8, 1.4);
            grid.append_column(cell_x, cell_z, 1.5, 2.8);
        }
    }
    grid
}

fn query_points(n: usize) -> Vec<Point3<f32>> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|_| {
            Point3::new(
                rng.gen_range(-9.0..9.0),
                rng.gen_range(0.0..2.8),
                rng.gen_range(-9.0..9.0),
            )
        })
        .collect()
}

fn bench_column_grid(c: &mut Criterion) {
    let grid = layered_stage();
    let points = query_points(4096);
    let mut group = c.benchmark_group("column_grid_contact_test");

    group.bench_function("uncached", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for point in &points {
                let (hit, _) = grid.contact_test(black_box(point), QueryCache::NONE);
                hits += usize::from(hit);
            }
            hits
        });
    });

    // A sphere moving in small increments, as robot spheres do between substeps
    let trajectory: Vec<_> = (0..4096)
        .map(|i| Point3::new(-5.0 + i as f32 * 0.002, 1.1, 0.3))
        .collect();
    group.bench_function("coherent_cached", |b| {
        b.iter(|| {
            let mut cache = QueryCache::NONE;
            let mut hits = 0usize;
            for point in &trajectory {
                let (hit, next) = grid.contact_test(black_box(point), cache);
                cache = next;
                hits += usize::from(hit);
            }
            hits
        });
    });

    group.finish();
}

fn bench_broadphase(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadphase_contact_test_sphere");
    let points = query_points(1024);

    for &n_obstacles in &[16, 64, 256] {
        let mut grid =
            CollisionBroadphaseGrid::new(0.15, -10.0, -10.0, 10.0, 10.0, 1000 * 1024, 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let local = Aabb::from_center(Point3::origin(), Vector3::new(0.1, 0.05, 0.08));
        for _ in 0..n_obstacles {
            let position = Point3::new(rng.gen_range(-9.0..9.0), 1.0, rng.gen_range(-9.0..9.0));
            let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), rng.gen_range(0.0..std::f32::consts::TAU));
            grid.insert_obstacle(&position, &yaw, &local);
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(n_obstacles),
            &grid,
            |b, grid| {
                b.iter(|| {
                    points
                        .iter()
                        .filter(|p| grid.contact_test_sphere(black_box(p), 0.05))
                        .count()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_column_grid, bench_broadphase);
criterion_main!(benches);
