//! Randomized placement of free objects against static and dynamic obstacles.

use batch_spatial::{CollisionBroadphaseGrid, ColumnGridSet, QueryCache};
use nalgebra::{Isometry3, Translation3};
use rand::Rng;
use rand::rngs::StdRng;

use crate::episode::FreeObject;

/// Default perturbation retries per placement.
pub const DEFAULT_MAX_FAILED_PLACEMENTS: usize = 3;

/// Whether every collision sphere of `free_object` at `transform` is clear of
/// the stage and of all obstacles in `broadphase`.
#[must_use]
pub fn is_pose_free(
    column_grids: &ColumnGridSet,
    broadphase: &CollisionBroadphaseGrid,
    transform: &Isometry3<f32>,
    free_object: &FreeObject,
) -> bool {
    free_object.collision_spheres.iter().all(|sphere| {
        let center = transform * sphere.origin;
        !column_grids
            .contact_test(sphere.radius_idx, &center, QueryCache::NONE)
            .0
            && !broadphase.contact_test_sphere(&center, sphere.radius)
    })
}

/// Finds a collision-free pose near a candidate pose.
///
/// # Example
///
/// ```
/// use batch_sim::{FreeObject, FreeObjectSphere, PlacementHelper};
/// use batch_spatial::{Aabb, CollisionBroadphaseGrid, ColumnGridSet, ColumnGridSource};
/// use nalgebra::{Isometry3, Point3, Vector3};
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let mut floor = ColumnGridSource::new(-2.0, -2.0, 8, 8, 0.5, 0.05).unwrap();
/// floor.fill_uniform(0.05, 3.0);
/// let grids = ColumnGridSet::from_grids(vec![floor]);
/// let broadphase =
///     CollisionBroadphaseGrid::new(0.05, -2.0, -2.0, 2.0, 2.0, 1 << 20, 0.5).unwrap();
///
/// let mut ball = FreeObject::new("ball", Aabb::from_center(Point3::origin(), Vector3::repeat(0.05)), 1);
/// ball.collision_spheres.push(FreeObjectSphere::new(Point3::origin(), 0, 0.05));
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let mut helper = PlacementHelper::new(&grids, &broadphase, &mut rng);
/// let mut pose = Isometry3::translation(0.0, 0.5, 0.0);
/// assert!(helper.place(&mut pose, &ball));
/// // Settled toward the floor.
/// assert!(pose.translation.y < 0.5);
/// ```
pub struct PlacementHelper<'a> {
    column_grids: &'a ColumnGridSet,
    broadphase: &'a CollisionBroadphaseGrid,
    rng: &'a mut StdRng,
    max_failed_placements: usize,
    perturb_distance: f32,
    settle_step: f32,
    max_settle_distance: f32,
}

impl<'a> PlacementHelper<'a> {
    /// Creates a helper with default retry, perturbation and settling settings.
    pub fn new(
        column_grids: &'a ColumnGridSet,
        broadphase: &'a CollisionBroadphaseGrid,
        rng: &'a mut StdRng,
    ) -> Self {
        Self {
            column_grids,
            broadphase,
            rng,
            max_failed_placements: DEFAULT_MAX_FAILED_PLACEMENTS,
            perturb_distance: 0.05,
            settle_step: 0.01,
            max_settle_distance: 0.3,
        }
    }

    /// Sets how many perturbed retries follow a failed first attempt.
    #[must_use]
    pub fn with_max_failed_placements(mut self, max_failed_placements: usize) -> Self {
        self.max_failed_placements = max_failed_placements;
        self
    }

    /// Sets the largest horizontal perturbation.
    #[must_use]
    pub fn with_perturb_distance(mut self, perturb_distance: f32) -> Self {
        self.perturb_distance = perturb_distance;
        self
    }

    /// Sets the downward settling increment and limit. A zero step disables
    /// settling.
    #[must_use]
    pub fn with_settling(mut self, settle_step: f32, max_settle_distance: f32) -> Self {
        self.settle_step = settle_step;
        self.max_settle_distance = max_settle_distance;
        self
    }

    /// Tries to place `free_object` at or near `transform`.
    ///
    /// On success the accepted, settled pose is written back and true is
    /// returned. On failure `transform` is left untouched.
    pub fn place(&mut self, transform: &mut Isometry3<f32>, free_object: &FreeObject) -> bool {
        let original = *transform;
        for attempt in 0..=self.max_failed_placements {
            let mut candidate = if attempt == 0 {
                original
            } else {
                self.perturb(&original, free_object)
            };
            if self.is_free(&candidate, free_object) {
                self.settle(&mut candidate, free_object);
                *transform = candidate;
                return true;
            }
        }
        false
    }

    fn is_free(&self, transform: &Isometry3<f32>, free_object: &FreeObject) -> bool {
        is_pose_free(self.column_grids, self.broadphase, transform, free_object)
    }

    fn perturb(&mut self, original: &Isometry3<f32>, free_object: &FreeObject) -> Isometry3<f32> {
        let d = self.perturb_distance;
        let (dx, dz) = if d > 0.0 {
            (self.rng.gen_range(-d..=d), self.rng.gen_range(-d..=d))
        } else {
            (0.0, 0.0)
        };
        let rotation = if free_object.start_rotations.is_empty() {
            original.rotation
        } else {
            free_object.start_rotations[self.rng.gen_range(0..free_object.start_rotations.len())]
        };
        let mut translation = original.translation;
        translation.x += dx;
        translation.z += dz;
        Isometry3::from_parts(translation, rotation)
    }

    fn settle(&self, transform: &mut Isometry3<f32>, free_object: &FreeObject) {
        if self.settle_step <= 0.0 {
            return;
        }
        let step = Translation3::new(0.0, -self.settle_step, 0.0);
        let mut dropped = 0.0;
        while dropped + self.settle_step <= self.max_settle_distance {
            let next = Isometry3::from_parts(step * transform.translation, transform.rotation);
            if !self.is_free(&next, free_object) {
                break;
            }
            *transform = next;
            dropped += self.settle_step;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::episode::FreeObjectSphere;
    use batch_spatial::{Aabb, ColumnGridSource};
    use nalgebra::{Point3, UnitQuaternion, Vector3};
    use rand::SeedableRng;

    const RADIUS: f32 = 0.05;

    /// Floor at y = 0, ceiling at y = 3, 4 x 4 m.
    fn flat_stage() -> ColumnGridSet {
        let mut grid = ColumnGridSource::new(-2.0, -2.0, 40, 40, 0.1, RADIUS).unwrap();
        grid.fill_uniform(RADIUS, 3.0 - RADIUS);
        ColumnGridSet::from_grids(vec![grid])
    }

    fn empty_broadphase() -> CollisionBroadphaseGrid {
        CollisionBroadphaseGrid::new(RADIUS, -2.0, -2.0, 2.0, 2.0, 1 << 20, 0.5).unwrap()
    }

    fn ball() -> FreeObject {
        let aabb = Aabb::from_center(Point3::origin(), Vector3::repeat(RADIUS));
        let mut object = FreeObject::new("ball", aabb, 4);
        object
            .collision_spheres
            .push(FreeObjectSphere::new(Point3::origin(), 0, RADIUS));
        object
    }

    #[test]
    fn test_free_pose_settles_down() {
        let grids = flat_stage();
        let broadphase = empty_broadphase();
        let mut rng = StdRng::seed_from_u64(1);
        let mut helper = PlacementHelper::new(&grids, &broadphase, &mut rng).with_settling(0.01, 0.3);

        let mut pose = Isometry3::translation(0.0, 0.2, 0.0);
        assert!(helper.place(&mut pose, &ball()));
        // Dropped in 1 cm steps until the next step would touch the floor.
        assert!(pose.translation.y > RADIUS);
        assert!(pose.translation.y < RADIUS + 0.011);
        assert_eq!(pose.translation.x, 0.0);
    }

    #[test]
    fn test_settle_distance_is_bounded() {
        let grids = flat_stage();
        let broadphase = empty_broadphase();
        let mut rng = StdRng::seed_from_u64(1);
        let mut helper = PlacementHelper::new(&grids, &broadphase, &mut rng).with_settling(0.1, 0.35);

        let mut pose = Isometry3::translation(0.0, 2.0, 0.0);
        assert!(helper.place(&mut pose, &ball()));
        approx::assert_relative_eq!(pose.translation.y, 1.7, epsilon = 1e-5);
    }

    #[test]
    fn test_blocked_pose_fails_and_is_untouched() {
        let grids = flat_stage();
        let mut broadphase = empty_broadphase();
        // A slab much wider than the perturbation covers the candidate.
        let slab = Aabb::from_center(Point3::origin(), Vector3::new(0.5, 0.2, 0.5));
        broadphase.insert_obstacle(&Point3::new(0.0, 1.0, 0.0), &UnitQuaternion::identity(), &slab);

        let mut rng = StdRng::seed_from_u64(3);
        let mut helper = PlacementHelper::new(&grids, &broadphase, &mut rng);
        let start = Isometry3::translation(0.0, 1.0, 0.0);
        let mut pose = start;
        assert!(!helper.place(&mut pose, &ball()));
        assert_eq!(pose, start);
    }

    #[test]
    fn test_perturbation_escapes_small_obstacle() {
        let grids = flat_stage();
        let mut broadphase = empty_broadphase();
        let pebble = Aabb::from_center(Point3::origin(), Vector3::repeat(0.001));
        broadphase.insert_obstacle(&Point3::new(0.0, 1.0, 0.0), &UnitQuaternion::identity(), &pebble);

        let mut rng = StdRng::seed_from_u64(5);
        let mut helper = PlacementHelper::new(&grids, &broadphase, &mut rng)
            .with_max_failed_placements(50)
            .with_perturb_distance(0.2)
            .with_settling(0.0, 0.0);
        let mut pose = Isometry3::translation(0.0, 1.0, 0.0);
        assert!(helper.place(&mut pose, &ball()));
        assert_eq!(pose.translation.y, 1.0);
        let offset = Vector3::new(pose.translation.x, 0.0, pose.translation.z).norm();
        assert!(offset > 0.0);
        assert!(pose.translation.x.abs() <= 0.2 && pose.translation.z.abs() <= 0.2);
    }

    #[test]
    fn test_out_of_stage_is_never_free() {
        let grids = flat_stage();
        let broadphase = empty_broadphase();
        let pose = Isometry3::translation(5.0, 1.0, 0.0);
        assert!(!is_pose_free(&grids, &broadphase, &pose, &ball()));
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let grids = flat_stage();
        let broadphase = empty_broadphase();
        let mut rng = StdRng::seed_from_u64(0);
        let mut helper =
            PlacementHelper::new(&grids, &broadphase, &mut rng).with_max_failed_placements(0);
        // Inside the floor: the only attempt fails.
        let mut pose = Isometry3::translation(0.0, 0.0, 0.0);
        assert!(!helper.place(&mut pose, &ball()));
    }
}
