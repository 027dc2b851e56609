//! Uniform-grid broadphase over oriented obstacle boxes.
//!
//! The grid partitions the horizontal (X, Z) plane into square cells. Each
//! obstacle is referenced from every cell its world-space bounds overlap, and
//! a query visits only the cells overlapped by the query volume. Obstacles and
//! queries that fall outside the grid extent are clamped into the edge cells,
//! so nothing is ever lost, it just shares a bucket.
//!
//! The grid is used twice: while procedurally placing free objects (each
//! accepted spawn becomes an obstacle for the next), and at run time to test
//! robot spheres against the free objects of one environment. Gripping removes
//! an obstacle and dropping reinserts it under the same [`ObstacleHandle`].
//!
//! # Example
//!
//! ```
//! use batch_spatial::{Aabb, CollisionBroadphaseGrid};
//! use nalgebra::{Point3, UnitQuaternion};
//!
//! let mut grid = CollisionBroadphaseGrid::new(0.2, -2.0, -2.0, 2.0, 2.0, 1024 * 1024, 0.5).unwrap();
//! let cube = Aabb::new(Point3::new(-0.1, -0.1, -0.1), Point3::new(0.1, 0.1, 0.1));
//! let handle = grid.insert_obstacle(&Point3::new(1.0, 0.5, 1.0), &UnitQuaternion::identity(), &cube);
//!
//! assert!(grid.contact_test_sphere(&Point3::new(1.0, 0.5, 1.15), 0.1));
//! assert!(!grid.contact_test_sphere(&Point3::new(1.0, 0.5, 1.25), 0.1));
//!
//! grid.remove_obstacle(handle);
//! assert!(!grid.contact_test_sphere(&Point3::new(1.0, 0.5, 1.15), 0.1));
//! ```

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use smallvec::SmallVec;
use tracing::debug;

use crate::aabb::Aabb;
use crate::cell::CellCoord;
use crate::error::{SpatialError, SpatialResult};

/// Smallest cell size used when the obstacle radius is tiny.
const MIN_GRID_SPACING: f32 = 1e-3;

/// Growth factor applied to the cell size while fitting the byte budget.
const SPACING_GROWTH: f32 = 1.25;

type Bucket = SmallVec<[ObstacleHandle; 4]>;

/// Stable handle to an obstacle in a [`CollisionBroadphaseGrid`].
///
/// Handles are dense indices in insertion order and stay valid across
/// [`remove_obstacle`](CollisionBroadphaseGrid::remove_obstacle) and
/// [`reinsert_obstacle`](CollisionBroadphaseGrid::reinsert_obstacle) until the
/// grid is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObstacleHandle(u32);

impl ObstacleHandle {
    /// The dense index of this obstacle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An oriented box registered with the broadphase grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    local_aabb: Aabb,
    transform: Isometry3<f32>,
    inverse: Isometry3<f32>,
    world_aabb: Aabb,
    bounding_radius: f32,
    active: bool,
}

impl Obstacle {
    fn new(position: &Point3<f32>, rotation: &UnitQuaternion<f32>, local_aabb: &Aabb) -> Self {
        let mut obstacle = Self {
            local_aabb: *local_aabb,
            transform: Isometry3::identity(),
            inverse: Isometry3::identity(),
            world_aabb: *local_aabb,
            bounding_radius: local_aabb.origin_bounding_radius(),
            active: true,
        };
        obstacle.set_pose(position, rotation);
        obstacle
    }

    fn set_pose(&mut self, position: &Point3<f32>, rotation: &UnitQuaternion<f32>) {
        self.transform = Isometry3::from_parts(Translation3::from(position.coords), *rotation);
        self.inverse = self.transform.inverse();
        self.world_aabb = self.local_aabb.transformed(&self.transform);
    }

    /// World position of the obstacle's local origin.
    #[must_use]
    pub fn position(&self) -> Point3<f32> {
        Point3::from(self.transform.translation.vector)
    }

    /// World rotation.
    #[must_use]
    pub const fn rotation(&self) -> &UnitQuaternion<f32> {
        &self.transform.rotation
    }

    /// Local-to-world transform.
    #[must_use]
    pub const fn transform(&self) -> &Isometry3<f32> {
        &self.transform
    }

    /// Box in the obstacle's local frame.
    #[must_use]
    pub const fn local_aabb(&self) -> &Aabb {
        &self.local_aabb
    }

    /// World-space bounds of the oriented box.
    #[must_use]
    pub const fn world_aabb(&self) -> &Aabb {
        &self.world_aabb
    }

    /// Radius of a sphere around the local origin containing the box.
    #[must_use]
    pub const fn bounding_radius(&self) -> f32 {
        self.bounding_radius
    }

    /// Whether the obstacle is currently in the grid.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    fn sphere_contact(&self, center: &Point3<f32>, radius_sq: f32) -> bool {
        if self.world_aabb.distance_squared(center) >= radius_sq {
            return false;
        }
        let local = self.inverse.transform_point(center);
        self.local_aabb.distance_squared(&local) < radius_sq
    }

    fn point_contact(&self, point: &Point3<f32>) -> bool {
        self.world_aabb.contains(point)
            && self.local_aabb.contains(&self.inverse.transform_point(point))
    }
}

/// Uniform horizontal grid of obstacle buckets.
#[derive(Debug, Clone)]
pub struct CollisionBroadphaseGrid {
    min_x: f32,
    min_z: f32,
    dim_x: i32,
    dim_z: i32,
    grid_spacing: f32,
    inv_grid_spacing: f32,
    max_obstacle_radius: f32,
    cells: Vec<Bucket>,
    obstacles: Vec<Obstacle>,
    num_active: usize,
}

impl CollisionBroadphaseGrid {
    /// Creates an empty grid covering `[min_x, max_x] × [min_z, max_z]`.
    ///
    /// The cell size starts at twice `max_obstacle_radius`, capped at
    /// `max_grid_spacing`, and grows only as far as needed for the cell table
    /// to fit in `max_bytes`.
    ///
    /// `max_bytes` bounds the cell table only: one inline bucket per cell.
    /// Obstacle records and buckets that spill past their inline capacity
    /// are allocated on insertion and are not counted against it.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::InvalidExtent`] for an empty or non-finite
    /// extent, [`SpatialError::InvalidRadius`] or
    /// [`SpatialError::InvalidSpacing`] for bad sizing parameters, and
    /// [`SpatialError::BudgetExceeded`] if the table does not fit the budget
    /// even at `max_grid_spacing`.
    pub fn new(
        max_obstacle_radius: f32,
        min_x: f32,
        min_z: f32,
        max_x: f32,
        max_z: f32,
        max_bytes: usize,
        max_grid_spacing: f32,
    ) -> SpatialResult<Self> {
        let extent_ok = [min_x, min_z, max_x, max_z].iter().all(|v| v.is_finite())
            && max_x > min_x
            && max_z > min_z;
        if !extent_ok {
            return Err(SpatialError::InvalidExtent {
                min_x,
                min_z,
                max_x,
                max_z,
            });
        }
        if !max_obstacle_radius.is_finite() || max_obstacle_radius < 0.0 {
            return Err(SpatialError::InvalidRadius(max_obstacle_radius));
        }
        if !max_grid_spacing.is_finite() || max_grid_spacing <= 0.0 {
            return Err(SpatialError::InvalidSpacing(max_grid_spacing));
        }

        let (grid_spacing, dim_x, dim_z) =
            fit_spacing(max_obstacle_radius, max_x - min_x, max_z - min_z, max_bytes, max_grid_spacing)?;
        let num_cells = usize::try_from(dim_x).unwrap_or(0) * usize::try_from(dim_z).unwrap_or(0);

        debug!(
            dim_x,
            dim_z,
            grid_spacing,
            bytes = num_cells * size_of::<Bucket>(),
            "Created broadphase grid"
        );

        Ok(Self {
            min_x,
            min_z,
            dim_x,
            dim_z,
            grid_spacing,
            inv_grid_spacing: 1.0 / grid_spacing,
            max_obstacle_radius,
            cells: vec![Bucket::new(); num_cells],
            obstacles: Vec::new(),
            num_active: 0,
        })
    }

    /// Cell size chosen at construction.
    #[must_use]
    pub const fn grid_spacing(&self) -> f32 {
        self.grid_spacing
    }

    /// Cell counts along X and Z.
    #[must_use]
    pub const fn dims(&self) -> (i32, i32) {
        (self.dim_x, self.dim_z)
    }

    /// The obstacle radius the grid was sized for.
    #[must_use]
    pub const fn max_obstacle_radius(&self) -> f32 {
        self.max_obstacle_radius
    }

    /// Number of obstacles currently in the grid.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.num_active
    }

    /// Whether no obstacle is currently in the grid.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.num_active == 0
    }

    /// Looks up an obstacle.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not belong to this grid.
    #[must_use]
    pub fn obstacle(&self, handle: ObstacleHandle) -> &Obstacle {
        self.check_handle(handle);
        &self.obstacles[handle.index()]
    }

    /// Adds an oriented box and returns its handle.
    ///
    /// `aabb` is in the obstacle's local frame; `position` and `rotation`
    /// place that frame in the world.
    ///
    /// # Panics
    ///
    /// Panics if the grid already holds `u32::MAX` obstacles.
    pub fn insert_obstacle(
        &mut self,
        position: &Point3<f32>,
        rotation: &UnitQuaternion<f32>,
        aabb: &Aabb,
    ) -> ObstacleHandle {
        let Ok(raw) = u32::try_from(self.obstacles.len()) else {
            panic!("broadphase grid obstacle count overflow");
        };
        let handle = ObstacleHandle(raw);
        let obstacle = Obstacle::new(position, rotation, aabb);
        self.link(handle, &obstacle.world_aabb);
        self.obstacles.push(obstacle);
        self.num_active += 1;
        handle
    }

    /// Takes an obstacle out of the grid. Its handle stays reserved.
    ///
    /// # Panics
    ///
    /// Panics if the handle is unknown or the obstacle is already removed.
    pub fn remove_obstacle(&mut self, handle: ObstacleHandle) {
        self.check_handle(handle);
        let world_aabb = {
            let obstacle = &mut self.obstacles[handle.index()];
            assert!(obstacle.active, "obstacle {} already removed", handle.index());
            obstacle.active = false;
            obstacle.world_aabb
        };
        self.unlink(handle, &world_aabb);
        self.num_active -= 1;
    }

    /// Puts an obstacle back at a new pose.
    ///
    /// An obstacle that is still in the grid is moved.
    ///
    /// # Panics
    ///
    /// Panics if the handle is unknown.
    pub fn reinsert_obstacle(
        &mut self,
        handle: ObstacleHandle,
        position: &Point3<f32>,
        rotation: &UnitQuaternion<f32>,
    ) {
        self.check_handle(handle);
        if self.obstacles[handle.index()].active {
            self.remove_obstacle(handle);
        }
        let world_aabb = {
            let obstacle = &mut self.obstacles[handle.index()];
            obstacle.set_pose(position, rotation);
            obstacle.active = true;
            obstacle.world_aabb
        };
        self.link(handle, &world_aabb);
        self.num_active += 1;
    }

    /// Removes every obstacle. Previously issued handles become invalid.
    pub fn clear(&mut self) {
        for bucket in &mut self.cells {
            bucket.clear();
        }
        self.obstacles.clear();
        self.num_active = 0;
    }

    /// Whether a sphere touches any obstacle (boundary exclusive).
    #[must_use]
    pub fn contact_test_sphere(&self, center: &Point3<f32>, radius: f32) -> bool {
        let radius_sq = radius * radius;
        let query = Aabb::from_center(*center, Vector3::repeat(radius));
        self.candidates(&query)
            .any(|handle| self.obstacles[handle.index()].sphere_contact(center, radius_sq))
    }

    /// Whether a point lies inside any obstacle (boundary inclusive).
    #[must_use]
    pub fn contact_test_point(&self, point: &Point3<f32>) -> bool {
        let query = Aabb::new(*point, *point);
        self.candidates(&query)
            .any(|handle| self.obstacles[handle.index()].point_contact(point))
    }

    /// All obstacles touched by a sphere, in handle order.
    #[must_use]
    pub fn query_sphere(&self, center: &Point3<f32>, radius: f32) -> Vec<ObstacleHandle> {
        let radius_sq = radius * radius;
        let query = Aabb::from_center(*center, Vector3::repeat(radius));
        let mut hits: Vec<_> = self
            .candidates(&query)
            .filter(|handle| self.obstacles[handle.index()].sphere_contact(center, radius_sq))
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    /// Whether a world-space box overlaps the world bounds of any obstacle.
    #[must_use]
    pub fn overlaps_aabb(&self, aabb: &Aabb) -> bool {
        self.candidates(aabb)
            .any(|handle| self.obstacles[handle.index()].world_aabb.intersects(aabb))
    }

    /// Handles referenced by the cells overlapping `query`.
    ///
    /// A handle is yielded once per cell it shares with `query`, so callers
    /// that need distinct handles must deduplicate.
    pub fn candidates<'a>(&'a self, query: &Aabb) -> impl Iterator<Item = ObstacleHandle> + 'a {
        let (lo, hi) = self.cell_span(query);
        (lo.x..=hi.x).flat_map(move |x| {
            (lo.z..=hi.z).flat_map(move |z| {
                let index = CellCoord::new(x, z)
                    .linear_index(self.dim_x, self.dim_z)
                    .unwrap_or(0);
                self.cells[index].iter().copied()
            })
        })
    }

    fn cell_span(&self, aabb: &Aabb) -> (CellCoord, CellCoord) {
        let lo = CellCoord::from_world(&aabb.min, self.min_x, self.min_z, self.inv_grid_spacing)
            .clamped(self.dim_x, self.dim_z);
        let hi = CellCoord::from_world(&aabb.max, self.min_x, self.min_z, self.inv_grid_spacing)
            .clamped(self.dim_x, self.dim_z);
        (lo, hi)
    }

    fn link(&mut self, handle: ObstacleHandle, world_aabb: &Aabb) {
        let (lo, hi) = self.cell_span(world_aabb);
        for x in lo.x..=hi.x {
            for z in lo.z..=hi.z {
                if let Some(index) = CellCoord::new(x, z).linear_index(self.dim_x, self.dim_z) {
                    self.cells[index].push(handle);
                }
            }
        }
    }

    fn unlink(&mut self, handle: ObstacleHandle, world_aabb: &Aabb) {
        let (lo, hi) = self.cell_span(world_aabb);
        for x in lo.x..=hi.x {
            for z in lo.z..=hi.z {
                if let Some(index) = CellCoord::new(x, z).linear_index(self.dim_x, self.dim_z) {
                    self.cells[index].retain(|h| *h != handle);
                }
            }
        }
    }

    fn check_handle(&self, handle: ObstacleHandle) {
        assert!(
            handle.index() < self.obstacles.len(),
            "obstacle handle {} out of range ({} obstacles)",
            handle.index(),
            self.obstacles.len()
        );
    }
}

/// Picks the cell size and dimensions for an extent under a byte budget.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn fit_spacing(
    max_obstacle_radius: f32,
    size_x: f32,
    size_z: f32,
    max_bytes: usize,
    max_grid_spacing: f32,
) -> SpatialResult<(f32, i32, i32)> {
    let cell_bytes = size_of::<Bucket>();
    let mut spacing = (2.0 * max_obstacle_radius)
        .max(MIN_GRID_SPACING)
        .min(max_grid_spacing);
    loop {
        let dim_x = (size_x / spacing).ceil().max(1.0);
        let dim_z = (size_z / spacing).ceil().max(1.0);
        let cells = dim_x * dim_z;
        let fits_i32 = dim_x <= i32::MAX as f32 && dim_z <= i32::MAX as f32;
        let required = (cells * cell_bytes as f32).min(usize::MAX as f32) as usize;
        if fits_i32 && required <= max_bytes {
            return Ok((spacing, dim_x as i32, dim_z as i32));
        }
        if spacing >= max_grid_spacing {
            return Err(SpatialError::BudgetExceeded {
                required,
                budget: max_bytes,
                spacing,
            });
        }
        spacing = (spacing * SPACING_GROWTH).min(max_grid_spacing);
    }
}
