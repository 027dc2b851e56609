//! Configuration types for the batched simulator.
//!
//! [`BatchedSimulatorConfig`] controls the environment count, the camera
//! sensor, the physics substep count and threading, and where episodes come
//! from. Procedural episode generation is tuned through
//! [`EpisodeGenerationParams`].

use std::path::PathBuf;

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::SimError;

/// Main configuration for a batched simulator.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchedSimulatorConfig {
    /// Number of environments simulated in lockstep.
    pub num_envs: usize,
    /// Render device index.
    pub gpu_id: u32,
    /// Whether the renderer produces depth images.
    pub include_depth: bool,
    /// Whether the renderer produces color images.
    pub include_color: bool,
    /// The robot-mounted camera.
    pub sensor0: CameraSensorConfig,
    /// Replace incoming actions with seeded random ones.
    pub force_random_actions: bool,
    /// Run physics on the dedicated worker thread.
    pub do_async_physics_step: bool,
    /// Physics substeps per step.
    pub num_substeps: usize,
    /// Odd environments mirror the episode of the preceding even environment.
    pub do_paired_debug_envs: bool,
    /// Where episodes come from.
    pub episode_source: EpisodeSource,
    /// Seed for random actions and random episode selection.
    pub seed: u64,
}

impl Default for BatchedSimulatorConfig {
    fn default() -> Self {
        Self {
            num_envs: 1,
            gpu_id: 0,
            include_depth: true,
            include_color: true,
            sensor0: CameraSensorConfig::default(),
            force_random_actions: false,
            do_async_physics_step: true,
            num_substeps: 1,
            do_paired_debug_envs: false,
            episode_source: EpisodeSource::default(),
            seed: 0,
        }
    }
}

impl BatchedSimulatorConfig {
    /// Create a config for `num_envs` environments with default settings.
    #[must_use]
    pub fn new(num_envs: usize) -> Self {
        Self {
            num_envs,
            ..Default::default()
        }
    }

    /// Set the substep count.
    #[must_use]
    pub fn with_substeps(mut self, num_substeps: usize) -> Self {
        self.num_substeps = num_substeps;
        self
    }

    /// Set the camera sensor.
    #[must_use]
    pub fn with_sensor(mut self, sensor: CameraSensorConfig) -> Self {
        self.sensor0 = sensor;
        self
    }

    /// Run physics inline on the calling thread instead of the worker.
    #[must_use]
    pub fn synchronous(mut self) -> Self {
        self.do_async_physics_step = false;
        self
    }

    /// Ignore incoming actions and drive every environment randomly.
    #[must_use]
    pub fn with_random_actions(mut self) -> Self {
        self.force_random_actions = true;
        self
    }

    /// Pair odd environments with the preceding even environment.
    #[must_use]
    pub fn with_paired_debug_envs(mut self) -> Self {
        self.do_paired_debug_envs = true;
        self
    }

    /// Set the episode source.
    #[must_use]
    pub fn with_episode_source(mut self, source: EpisodeSource) -> Self {
        self.episode_source = source;
        self
    }

    /// Set the render device.
    #[must_use]
    pub fn with_gpu(mut self, gpu_id: u32) -> Self {
        self.gpu_id = gpu_id;
        self
    }

    /// Set the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_envs == 0 {
            return Err(SimError::InvalidEnvCount(self.num_envs));
        }
        if self.num_substeps == 0 {
            return Err(SimError::InvalidSubsteps(self.num_substeps));
        }
        if self.do_paired_debug_envs && self.num_envs % 2 != 0 {
            return Err(SimError::invalid_config(format!(
                "paired debug envs need an even environment count, got {}",
                self.num_envs
            )));
        }
        self.sensor0.validate()?;
        self.episode_source.validate()?;
        Ok(())
    }
}

/// Camera sensor resolution and field of view.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CameraSensorConfig {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Horizontal field of view in degrees.
    pub hfov: f32,
}

impl Default for CameraSensorConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 128,
            hfov: 45.0,
        }
    }
}

impl CameraSensorConfig {
    /// Create a sensor config.
    #[must_use]
    pub const fn new(width: u32, height: u32, hfov: f32) -> Self {
        Self { width, height, hfov }
    }

    /// Width over height.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    /// Validate the sensor settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.width == 0 || self.height == 0 || !(self.hfov.is_finite() && self.hfov > 0.0 && self.hfov < 180.0) {
            return Err(SimError::InvalidSensor {
                width: self.width,
                height: self.height,
                hfov: self.hfov,
            });
        }
        Ok(())
    }
}

/// Where the simulator's episode set comes from.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EpisodeSource {
    /// Generate episodes procedurally at startup.
    Procedural(EpisodeGenerationParams),
    /// Load a previously saved episode set.
    File(PathBuf),
}

impl Default for EpisodeSource {
    fn default() -> Self {
        Self::Procedural(EpisodeGenerationParams::default())
    }
}

impl EpisodeSource {
    /// Validate the source.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Self::Procedural(params) => params.validate(),
            Self::File(path) if path.as_os_str().is_empty() => {
                Err(SimError::invalid_config("episode set path is empty"))
            }
            Self::File(_) => Ok(()),
        }
    }
}

/// Parameters for procedural episode generation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EpisodeGenerationParams {
    /// Episodes to generate.
    pub num_episodes: usize,
    /// Free objects each episode tries to place.
    pub target_num_spawns: usize,
    /// Spawn attempts per episode before giving up on the target.
    pub num_spawn_attempts: usize,
    /// Perturbation retries per spawn attempt.
    pub max_failed_placements: usize,
    /// Lower corner of the region spawns must end up in.
    pub spawn_range_min: Point3<f32>,
    /// Upper corner of the region spawns must end up in.
    pub spawn_range_max: Point3<f32>,
    /// Robot start position for every episode.
    pub robot_start_pos: Point3<f32>,
    /// Robot start yaw about the up axis (radians).
    pub robot_start_yaw: f32,
    /// Half-extents of the box around the robot start that spawns avoid.
    pub robot_exclusion_half_extents: Vector3<f32>,
    /// Number of yaw rotations offered to each free object.
    pub num_start_rotations: usize,
    /// Names of the free objects to spawn; empty means all.
    pub selected_free_objects: Vec<String>,
    /// Byte budget for each episode's broadphase grid.
    pub broadphase_max_bytes: usize,
    /// Largest broadphase cell size.
    pub broadphase_max_grid_spacing: f32,
    /// Largest horizontal offset applied when a placement is perturbed.
    pub perturb_distance: f32,
    /// Downward increment used to settle a placed object.
    pub settle_step: f32,
    /// Furthest a placed object is settled downward.
    pub max_settle_distance: f32,
    /// Seed for the generator.
    pub seed: u64,
}

impl Default for EpisodeGenerationParams {
    fn default() -> Self {
        Self {
            num_episodes: 100,
            target_num_spawns: 64,
            num_spawn_attempts: 1000,
            max_failed_placements: 3,
            spawn_range_min: Point3::new(0.33, 0.15, -0.4),
            spawn_range_max: Point3::new(1.18, 1.85, -0.25),
            robot_start_pos: Point3::new(2.39, 0.0, 0.0),
            robot_start_yaw: std::f32::consts::PI,
            robot_exclusion_half_extents: Vector3::new(0.9, 2.0, 0.9),
            num_start_rotations: 32,
            selected_free_objects: Vec::new(),
            broadphase_max_bytes: 1000 * 1024,
            broadphase_max_grid_spacing: 0.5,
            perturb_distance: 0.05,
            settle_step: 0.01,
            max_settle_distance: 0.3,
            seed: 0,
        }
    }
}

impl EpisodeGenerationParams {
    /// Set the episode count.
    #[must_use]
    pub fn with_num_episodes(mut self, num_episodes: usize) -> Self {
        self.num_episodes = num_episodes;
        self
    }

    /// Set the spawn target per episode.
    #[must_use]
    pub fn with_target_num_spawns(mut self, target_num_spawns: usize) -> Self {
        self.target_num_spawns = target_num_spawns;
        self
    }

    /// Set the spawn region.
    #[must_use]
    pub fn with_spawn_range(mut self, min: Point3<f32>, max: Point3<f32>) -> Self {
        self.spawn_range_min = min;
        self.spawn_range_max = max;
        self
    }

    /// Restrict spawns to the named free objects.
    #[must_use]
    pub fn with_selected_free_objects<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_free_objects = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Whether `point` lies inside the spawn region (boundary inclusive).
    #[must_use]
    pub fn in_spawn_range(&self, point: &Point3<f32>) -> bool {
        let (lo, hi) = (&self.spawn_range_min, &self.spawn_range_max);
        (lo.x..=hi.x).contains(&point.x)
            && (lo.y..=hi.y).contains(&point.y)
            && (lo.z..=hi.z).contains(&point.z)
    }

    /// Whether `point` lies inside the box kept clear around the robot start.
    #[must_use]
    pub fn in_robot_exclusion(&self, point: &Point3<f32>) -> bool {
        let offset = point - self.robot_start_pos;
        let pad = &self.robot_exclusion_half_extents;
        offset.x.abs() < pad.x && offset.y.abs() < pad.y && offset.z.abs() < pad.z
    }

    /// Validate the parameters.
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_episodes == 0 {
            return Err(SimError::invalid_config("num_episodes must be positive"));
        }
        if self.num_start_rotations == 0 {
            return Err(SimError::invalid_config("num_start_rotations must be positive"));
        }
        let (lo, hi) = (&self.spawn_range_min, &self.spawn_range_max);
        if !(lo.x <= hi.x && lo.y <= hi.y && lo.z <= hi.z) {
            return Err(SimError::invalid_config(format!(
                "spawn range is inverted: {lo:?} .. {hi:?}"
            )));
        }
        if !self.broadphase_max_grid_spacing.is_finite() || self.broadphase_max_grid_spacing <= 0.0 {
            return Err(SimError::invalid_config(format!(
                "broadphase_max_grid_spacing must be positive, got {}",
                self.broadphase_max_grid_spacing
            )));
        }
        if self.settle_step < 0.0 || self.max_settle_distance < 0.0 || self.perturb_distance < 0.0
        {
            return Err(SimError::invalid_config(
                "placement distances must be non-negative",
            ));
        }
        Ok(())
    }
}
