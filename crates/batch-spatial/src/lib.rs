//! Spatial collision structures for batched simulation.
//!
//! This crate holds the collision substrate shared by episode generation and
//! the batched simulator:
//!
//! - [`ColumnGridSource`] - Per-cell vertical free-space intervals for
//!   sphere-vs-static-stage queries, with a binary file format
//! - [`ColumnGridSet`] - One column grid per collision-sphere radius class
//! - [`CollisionBroadphaseGrid`] - Uniform grid over oriented obstacle boxes
//!   (placed free objects)
//! - [`Aabb`], [`sphere_box_contact_test`] and
//!   [`batch_sphere_oriented_box_contact_test`] - Contact primitives
//!
//! # Layer 0 Crate
//!
//! No rendering, physics-engine or simulator dependencies. Grids can be built
//! and queried from tools, tests and the simulator alike.
//!
//! # Coordinate Systems
//!
//! Y is up. Both grids partition the horizontal X/Z plane into square cells;
//! the column grid resolves Y per cell with sorted [`Layer`]s. World
//! coordinates are `f32` to match the column grid file format.
//!
//! # Example
//!
//! ```
//! use batch_spatial::{ColumnGridSource, QueryCache};
//! use nalgebra::Point3;
//!
//! // A 10 x 10 m stage with a floor at y = 0 and a ceiling at y = 3,
//! // for spheres of radius 0.1.
//! let mut grid = ColumnGridSource::new(0.0, 0.0, 20, 20, 0.5, 0.1).unwrap();
//! grid.fill_uniform(0.1, 2.9);
//!
//! let mut cache = QueryCache::NONE;
//! for step in 0..10 {
//!     let point = Point3::new(1.0 + step as f32 * 0.01, 1.0, 1.0);
//!     let (hit, next) = grid.contact_test(&point, cache);
//!     assert!(!hit);
//!     cache = next;
//! }
//! assert_eq!(cache.layer_index(), Some(0));
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod aabb;
mod broadphase;
mod cell;
mod column_grid;
mod column_grid_set;
mod contact;
mod error;

pub use aabb::Aabb;
pub use broadphase::{CollisionBroadphaseGrid, Obstacle, ObstacleHandle};
pub use cell::CellCoord;
pub use column_grid::{ColumnGridSource, Layer, QueryCache};
pub use column_grid_set::ColumnGridSet;
pub use contact::{
    ContactHits, batch_sphere_oriented_box_contact_test, inverse_transform_point,
    sphere_box_contact_test,
};
pub use error::{SpatialError, SpatialResult};

// Re-export nalgebra types for convenience
pub use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector3};
