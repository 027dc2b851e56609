//! Per-environment robot state.

use batch_spatial::QueryCache;
use nalgebra::{Isometry3, Point3};

use crate::robot_model::{ArticulationEngine, RobotModel};

/// Gripping state of one robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotInstance {
    /// Spawn index of the held free object.
    pub gripped_free_object: Option<usize>,
    /// Held object pose relative to the gripper link.
    pub grip_offset: Isometry3<f32>,
    /// A grip succeeded during the last step.
    pub did_grasp: bool,
    /// A drop succeeded during the last step.
    pub did_drop: bool,
    /// Any substep of the last step collided.
    pub did_collide: bool,
}

impl Default for RobotInstance {
    fn default() -> Self {
        Self {
            gripped_free_object: None,
            grip_offset: Isometry3::identity(),
            did_grasp: false,
            did_drop: false,
            did_collide: false,
        }
    }
}

impl RobotInstance {
    /// Clears the per-step event flags.
    pub fn clear_events(&mut self) {
        self.did_grasp = false;
        self.did_drop = false;
        self.did_collide = false;
    }
}

/// Robot collision scratch and gripping state for every environment.
///
/// Sphere origins and query caches are parallel arrays of
/// `num_envs × num_collision_spheres`, allocated once.
#[derive(Debug, Clone)]
pub struct RobotInstanceSet {
    num_envs: usize,
    num_spheres: usize,
    collision_sphere_world_origins: Vec<Point3<f32>>,
    collision_sphere_query_caches: Vec<QueryCache>,
    collision_results: Vec<bool>,
    robot_instances: Vec<RobotInstance>,
}

impl RobotInstanceSet {
    /// Allocates state for `num_envs` copies of `model`.
    #[must_use]
    pub fn new(model: &RobotModel, num_envs: usize) -> Self {
        let num_spheres = model.collision_spheres().len();
        Self {
            num_envs,
            num_spheres,
            collision_sphere_world_origins: vec![Point3::origin(); num_envs * num_spheres],
            collision_sphere_query_caches: vec![QueryCache::NONE; num_envs * num_spheres],
            collision_results: vec![false; num_envs],
            robot_instances: vec![RobotInstance::default(); num_envs],
        }
    }

    /// Number of environments.
    #[must_use]
    pub const fn num_envs(&self) -> usize {
        self.num_envs
    }

    /// Collision spheres per robot.
    #[must_use]
    pub const fn num_spheres(&self) -> usize {
        self.num_spheres
    }

    fn sphere_range(&self, env: usize) -> std::ops::Range<usize> {
        assert!(
            env < self.num_envs,
            "environment {env} out of range for {} environments",
            self.num_envs
        );
        env * self.num_spheres..(env + 1) * self.num_spheres
    }

    /// Returns an environment to its per-episode defaults.
    pub fn reset_env(&mut self, env: usize) {
        let range = self.sphere_range(env);
        self.collision_sphere_query_caches[range].fill(QueryCache::NONE);
        self.collision_results[env] = false;
        self.robot_instances[env] = RobotInstance::default();
    }

    /// Recomputes world-space sphere origins from link transforms.
    pub fn update_sphere_origins(
        &mut self,
        env: usize,
        model: &RobotModel,
        link_transforms: &[Isometry3<f32>],
    ) {
        debug_assert_eq!(link_transforms.len(), model.num_links());
        let range = self.sphere_range(env);
        for (origin, sphere) in self.collision_sphere_world_origins[range]
            .iter_mut()
            .zip(model.collision_spheres())
        {
            *origin = link_transforms[sphere.link] * sphere.origin;
        }
    }

    /// World-space sphere origins of an environment.
    #[must_use]
    pub fn sphere_origins(&self, env: usize) -> &[Point3<f32>] {
        &self.collision_sphere_world_origins[self.sphere_range(env)]
    }

    /// Sphere origins together with mutable query caches.
    pub fn spheres_and_caches_mut(&mut self, env: usize) -> (&[Point3<f32>], &mut [QueryCache]) {
        let range = self.sphere_range(env);
        (
            &self.collision_sphere_world_origins[range.clone()],
            &mut self.collision_sphere_query_caches[range],
        )
    }

    /// Query caches of an environment.
    #[must_use]
    pub fn query_caches(&self, env: usize) -> &[QueryCache] {
        &self.collision_sphere_query_caches[self.sphere_range(env)]
    }

    /// Collision result of the last substep.
    #[must_use]
    pub fn collision_result(&self, env: usize) -> bool {
        self.collision_results[env]
    }

    pub(crate) fn set_collision_result(&mut self, env: usize, collided: bool) {
        self.collision_results[env] = collided;
    }

    /// Gripping state of an environment.
    #[must_use]
    pub fn instance(&self, env: usize) -> &RobotInstance {
        &self.robot_instances[env]
    }

    /// Mutable gripping state of an environment.
    pub fn instance_mut(&mut self, env: usize) -> &mut RobotInstance {
        &mut self.robot_instances[env]
    }
}
