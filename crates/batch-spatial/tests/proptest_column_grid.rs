//! Property-based tests for column grid queries and persistence.
//!
//! Run with: cargo test -p batch-spatial -- proptest

#![allow(clippy::unwrap_used, clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use batch_spatial::{Aabb, ColumnGridSource, Layer, QueryCache, sphere_box_contact_test};
use nalgebra::Point3;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// Sorted, disjoint layers built from (gap, thickness) pairs.
fn arb_layers(max_layers: usize) -> impl Strategy<Value = Vec<Layer>> {
    prop::collection::vec((0.05f32..2.0, 0.1f32..3.0), 0..=max_layers).prop_map(|spans| {
        let mut y = -5.0f32;
        spans
            .into_iter()
            .map(|(gap, thickness)| {
                let free_min = y + gap;
                let free_max = free_min + thickness;
                y = free_max;
                Layer::new(free_min, free_max)
            })
            .collect()
    })
}

fn arb_cache() -> impl Strategy<Value = QueryCache> {
    prop_oneof![Just(QueryCache::NONE), (-1i16..12).prop_map(QueryCache)]
}

fn grid_with_cell(layers: &[Layer]) -> ColumnGridSource {
    let mut grid = ColumnGridSource::new(-2.0, -2.0, 4, 4, 1.0, 0.05).unwrap();
    for layer in layers {
        grid.append_column(1, 2, layer.free_min, layer.free_max);
    }
    grid
}

/// A point in cell (1, 2) of `grid_with_cell`.
fn cell_point(fx: f32, fz: f32, y: f32) -> Point3<f32> {
    Point3::new(-1.0 + fx, y, fz)
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn proptest_empty_cell_always_contacts(
        fx in 0.0f32..0.999,
        fz in 0.0f32..0.999,
        y in -100.0f32..100.0,
        cache in arb_cache(),
    ) {
        let grid = grid_with_cell(&[]);
        let (hit, _) = grid.contact_test(&cell_point(fx, fz, y), cache);
        prop_assert!(hit);
    }

    #[test]
    fn proptest_inside_layer_is_free_and_cache_settles(
        layers in arb_layers(8),
        pick in any::<prop::sample::Index>(),
        t in 0.1f32..0.9,
        cache in arb_cache(),
    ) {
        prop_assume!(!layers.is_empty());
        let k = pick.index(layers.len());
        let layer = layers[k];
        let y = layer.free_min + t * (layer.free_max - layer.free_min);
        let grid = grid_with_cell(&layers);

        let (hit, next) = grid.contact_test(&cell_point(0.5, 0.5, y), cache);
        prop_assert!(!hit);
        prop_assert_eq!(next.layer_index(), Some(k));

        let (hit, again) = grid.contact_test(&cell_point(0.5, 0.5, y), next);
        prop_assert!(!hit);
        prop_assert_eq!(again, next);
    }

    #[test]
    fn proptest_gaps_and_boundaries_contact(
        layers in arb_layers(8),
        pick in any::<prop::sample::Index>(),
        cache in arb_cache(),
    ) {
        prop_assume!(!layers.is_empty());
        let k = pick.index(layers.len());
        let layer = layers[k];
        let grid = grid_with_cell(&layers);

        for y in [layer.free_min, layer.free_max, layer.free_min - 0.02] {
            let (hit, _) = grid.contact_test(&cell_point(0.5, 0.5, y), cache);
            prop_assert!(hit, "y = {} should contact", y);
        }
    }

    #[test]
    fn proptest_out_of_bounds_always_contacts(
        layers in arb_layers(4),
        x in prop_oneof![-50.0f32..-2.001, 2.0f32..50.0],
        z in -50.0f32..50.0,
        y in -10.0f32..10.0,
    ) {
        let mut grid = grid_with_cell(&layers);
        grid.fill_uniform(20.0, 30.0);
        let (hit, _) = grid.contact_test(&Point3::new(x, y, z), QueryCache::NONE);
        prop_assert!(hit);
    }

    #[test]
    fn proptest_save_load_roundtrip(
        cells in prop::collection::vec(arb_layers(5), 6),
        min_x in -10.0f32..10.0,
        min_z in -10.0f32..10.0,
        spacing in 0.01f32..2.0,
        radius in 0.0f32..1.0,
    ) {
        let mut grid = ColumnGridSource::new(min_x, min_z, 2, 3, spacing, radius).unwrap();
        for (i, layers) in cells.iter().enumerate() {
            let (cx, cz) = ((i / 3) as i32, (i % 3) as i32);
            for layer in layers {
                grid.append_column(cx, cz, layer.free_min, layer.free_max);
            }
        }
        let mut bytes = Vec::new();
        grid.write_to(&mut bytes).unwrap();
        let loaded = ColumnGridSource::read_from(bytes.as_slice()).unwrap();
        prop_assert_eq!(loaded, grid);
    }

    #[test]
    fn proptest_sphere_box_matches_distance(
        center in prop::array::uniform3(-200.0f32..200.0),
        radius in 0.0f32..50.0,
    ) {
        let aabb = Aabb::new(
            Point3::new(-1.0, -12.0, -130.0),
            Point3::new(2.0, 13.0, 140.0),
        );
        let center = Point3::from(center);
        let expected = aabb.distance_squared(&center) < radius * radius;
        prop_assert_eq!(sphere_box_contact_test(&center, radius, &aabb), expected);
    }
}
