//! The batched simulator facade.

use std::sync::Arc;

use batch_spatial::{Aabb, ColumnGridSet};
use batch_types::{
    ActionLayout, BatchedSimulatorConfig, EnvironmentState, EpisodeSource, SimError, StatRecord,
};
use nalgebra::{Isometry3, Point3, UnitQuaternion};
use tracing::{debug, info};

use crate::collection::Collection;
use crate::episode::{EpisodeSet, FixedObject, generate_benchmark_episode_set};
use crate::error::BatchResult;
use crate::physics::{PhysicsState, StepSnapshot};
use crate::render::{
    CameraPlacement, DebugInstance, EnvRenderState, HeadlessRenderer, RenderBackend, RenderFrame,
};
use crate::robot_model::{ArticulationEngine, RobotModel};
use crate::worker::PhysicsRunner;

/// Asset name used for debug boxes.
pub const DEBUG_BOX_ASSET: &str = "cube_wireframe";

/// Asset name used for debug spheres.
pub const DEBUG_SPHERE_ASSET: &str = "sphere_wireframe";

/// Scene content handed to [`BatchedSimulator::new`].
#[derive(Debug, Clone)]
pub struct SimulatorAssets {
    /// Stages with their column grids.
    pub stages: Vec<FixedObject>,
    /// Collision metadata.
    pub collection: Collection,
    /// The robot every environment runs.
    pub robot: RobotModel,
    /// A prebuilt episode set, used instead of the configured source.
    pub episode_set: Option<EpisodeSet>,
}

impl SimulatorAssets {
    /// Assets whose episodes come from the configured source.
    #[must_use]
    pub fn new(stages: Vec<FixedObject>, collection: Collection, robot: RobotModel) -> Self {
        Self {
            stages,
            collection,
            robot,
            episode_set: None,
        }
    }

    /// Use a prebuilt episode set.
    #[must_use]
    pub fn with_episode_set(mut self, episode_set: EpisodeSet) -> Self {
        self.episode_set = Some(episode_set);
        self
    }
}

/// Runs many environments in lockstep.
///
/// Steps are split into [`start_step_physics_or_reset`] and
/// [`wait_step_physics_or_reset`], which must alternate. With
/// `do_async_physics_step` the step runs on a dedicated worker thread in
/// between, so the caller can prepare the next actions and read the previous
/// [`EnvironmentState`]s meanwhile.
///
/// Rendering has its own fence: [`start_render`] / [`wait_render`].
///
/// [`start_step_physics_or_reset`]: Self::start_step_physics_or_reset
/// [`wait_step_physics_or_reset`]: Self::wait_step_physics_or_reset
/// [`start_render`]: Self::start_render
/// [`wait_render`]: Self::wait_render
pub struct BatchedSimulator {
    config: BatchedSimulatorConfig,
    layout: ActionLayout,
    model: Arc<RobotModel>,
    stage_grids: Vec<Arc<ColumnGridSet>>,
    num_episodes: usize,
    runner: PhysicsRunner,
    published: Box<StepSnapshot>,
    spare: Option<Box<StepSnapshot>>,
    step_in_flight: bool,
    renderer: Box<dyn RenderBackend>,
    render_in_flight: bool,
    debug_instances: Vec<DebugInstance>,
    camera: CameraPlacement,
    stats: StatRecord,
}

impl BatchedSimulator {
    /// Builds a simulator with a [`HeadlessRenderer`].
    ///
    /// Every environment starts on episode `env % num_episodes`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid config, a collection that does not match the
    /// robot or the episode set, stages without a column grid for every
    /// radius class, episode generation or loading errors, and a worker
    /// thread that cannot be spawned.
    pub fn new(config: BatchedSimulatorConfig, assets: SimulatorAssets) -> BatchResult<Self> {
        Self::with_renderer(config, assets, Box::new(HeadlessRenderer::new()))
    }

    /// Builds a simulator drawing through `renderer`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_renderer(
        config: BatchedSimulatorConfig,
        assets: SimulatorAssets,
        renderer: Box<dyn RenderBackend>,
    ) -> BatchResult<Self> {
        config.validate()?;
        let SimulatorAssets {
            stages,
            collection,
            mut robot,
            episode_set,
        } = assets;
        robot.update_from_collection(&collection)?;

        let episode_set = match (episode_set, &config.episode_source) {
            (Some(set), _) => set,
            (None, EpisodeSource::Procedural(params)) => {
                generate_benchmark_episode_set(params, stages, &collection)?
            }
            (None, EpisodeSource::File(path)) => {
                let mut set = EpisodeSet::load_json(path, &stages)?;
                set.update_from_collection(&collection)?;
                set
            }
        };
        episode_set.check_radius_classes(collection.collision_radius_working_set.len())?;
        if episode_set.num_episodes() == 0 {
            return Err(SimError::invalid_config("episode set has no episodes").into());
        }

        let num_episodes = episode_set.num_episodes();
        let stage_grids = episode_set
            .fixed_objects()
            .iter()
            .map(|stage| Arc::clone(&stage.column_grids))
            .collect();
        let stats = StatRecord {
            num_failed_placements: episode_set.num_failed_placements() as u64,
            ..StatRecord::default()
        };
        let model = Arc::new(robot);
        let layout = ActionLayout::new(model.num_joints());
        let state = PhysicsState::new(&config, Arc::clone(&model), episode_set)?;
        let runner = PhysicsRunner::new(state, config.do_async_physics_step)?;

        info!(
            num_envs = config.num_envs,
            num_episodes,
            num_substeps = config.num_substeps,
            asynchronous = config.do_async_physics_step,
            robot = model.name(),
            "Created batched simulator"
        );

        let mut sim = Self {
            layout,
            model,
            stage_grids,
            num_episodes,
            runner,
            published: Box::default(),
            spare: Some(Box::default()),
            step_in_flight: false,
            renderer,
            render_in_flight: false,
            debug_instances: Vec::new(),
            camera: CameraPlacement::default(),
            stats,
            config,
        };
        let initial = (0..sim.config.num_envs).map(|env| env % num_episodes).collect();
        sim.reset(initial)?;
        Ok(sim)
    }

    /// Number of environments.
    #[must_use]
    pub fn num_envs(&self) -> usize {
        self.config.num_envs
    }

    /// The configuration the simulator was built with.
    #[must_use]
    pub const fn config(&self) -> &BatchedSimulatorConfig {
        &self.config
    }

    /// Layout of each environment's action slice.
    #[must_use]
    pub const fn action_layout(&self) -> ActionLayout {
        self.layout
    }

    /// Number of episodes in the episode set.
    #[must_use]
    pub const fn get_num_episodes(&self) -> usize {
        self.num_episodes
    }

    /// Resets every environment and waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::ResetLengthMismatch`] unless there is exactly one
    /// episode index per environment.
    ///
    /// # Panics
    ///
    /// Panics if a step is in flight or an episode index is out of range.
    pub fn reset(&mut self, episodes: Vec<usize>) -> BatchResult<()> {
        let num_envs = self.num_envs();
        if episodes.len() != num_envs {
            return Err(SimError::ResetLengthMismatch {
                expected: num_envs,
                actual: episodes.len(),
            }
            .into());
        }
        let actions = vec![0.0; num_envs * self.layout.action_dim()];
        let resets = episodes.into_iter().map(Some).collect();
        self.start_step_physics_or_reset(actions, resets)?;
        self.wait_step_physics_or_reset()
    }

    /// Starts a step.
    ///
    /// Environments with a reset request restart on that episode; all others
    /// apply their slice of `actions`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::ActionLengthMismatch`] or
    /// [`SimError::ResetLengthMismatch`] for wrongly sized inputs.
    ///
    /// # Panics
    ///
    /// Panics if the previous step was not waited on, or if a reset names an
    /// episode that does not exist.
    pub fn start_step_physics_or_reset(
        &mut self,
        actions: Vec<f32>,
        resets: Vec<Option<usize>>,
    ) -> BatchResult<()> {
        assert!(
            !self.step_in_flight,
            "start_step_physics_or_reset called while a step is in flight"
        );
        let num_envs = self.num_envs();
        self.layout.check_len(&actions, num_envs)?;
        if resets.len() != num_envs {
            return Err(SimError::ResetLengthMismatch {
                expected: num_envs,
                actual: resets.len(),
            }
            .into());
        }
        for &episode in resets.iter().flatten() {
            assert!(
                episode < self.num_episodes,
                "episode index {episode} out of range for {} episodes",
                self.num_episodes
            );
        }

        let snapshot = self.spare.take().unwrap_or_default();
        self.runner.start_step(actions, resets, snapshot)?;
        self.step_in_flight = true;
        Ok(())
    }

    /// Blocks until the started step completes and publishes its snapshot.
    ///
    /// # Errors
    ///
    /// Fails if a reset could not rebuild a broadphase grid or the worker
    /// is gone.
    ///
    /// # Panics
    ///
    /// Panics if no step was started.
    pub fn wait_step_physics_or_reset(&mut self) -> BatchResult<()> {
        assert!(
            self.step_in_flight,
            "wait_step_physics_or_reset called without a started step"
        );
        self.step_in_flight = false;
        let snapshot = self.runner.wait_step()?;
        self.stats.accumulate(&snapshot.stats);
        let previous = std::mem::replace(&mut self.published, snapshot);
        self.spare = Some(previous);
        Ok(())
    }

    /// Whether a step has been started and not yet waited on.
    #[must_use]
    pub const fn is_step_in_flight(&self) -> bool {
        self.step_in_flight
    }

    /// State of every environment after the last completed step.
    #[must_use]
    pub fn get_environment_states(&self) -> &[EnvironmentState] {
        &self.published.env_states
    }

    /// Instance transforms of every environment after the last completed step.
    #[must_use]
    pub fn render_states(&self) -> &[EnvRenderState] {
        &self.published.render
    }

    /// Counters accumulated since the last report, without resetting them.
    #[must_use]
    pub const fn recent_stats(&self) -> &StatRecord {
        &self.stats
    }

    /// Formats and resets the counters accumulated since the last call.
    pub fn get_recent_stats_and_reset(&mut self) -> String {
        let stats = self.stats.take();
        debug!(steps = stats.num_steps, episodes = stats.num_episodes, "Reporting stats");
        stats.to_string()
    }

    /// Applies new collision metadata to the running simulator.
    ///
    /// Live environments keep their current obstacles until their next reset.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::HotReloadMismatch`](crate::BatchError::HotReloadMismatch)
    /// if the collection names a free object the episode set does not have,
    /// [`SpatialError::MissingRadiusClass`](batch_spatial::SpatialError::MissingRadiusClass)
    /// if it adds a radius class the stages have no column grid for, or any
    /// other collection error. On error nothing changes.
    ///
    /// # Panics
    ///
    /// Panics if a step is in flight.
    pub fn reload_serialize_collection(&mut self, collection: Collection) -> BatchResult<()> {
        assert!(
            !self.step_in_flight,
            "reload_serialize_collection called while a step is in flight"
        );
        let mut model = (*self.model).clone();
        model.update_from_collection(&collection)?;
        self.runner.reload(collection)?;
        self.model = Arc::new(model);
        info!("Hot-reloaded collection");
        Ok(())
    }

    /// Submits a frame built from the last completed step.
    ///
    /// Non-persistent debug instances are drawn once and then deleted.
    ///
    /// # Panics
    ///
    /// Panics if the previous render was not waited on.
    pub fn start_render(&mut self) {
        assert!(!self.render_in_flight, "start_render called while a render is in flight");
        let frame = RenderFrame {
            envs: self.published.render.clone(),
            debug_instances: self.debug_instances.clone(),
            camera: self.camera,
        };
        self.renderer.submit(&frame);
        self.render_in_flight = true;
        self.delete_debug_instances();
    }

    /// Blocks until the submitted frame is drawn.
    ///
    /// # Panics
    ///
    /// Panics if no render was started.
    pub fn wait_render(&mut self) {
        assert!(self.render_in_flight, "wait_render called without a started render");
        self.renderer.wait();
        self.render_in_flight = false;
    }

    /// Removes every non-persistent debug instance.
    pub fn delete_debug_instances(&mut self) {
        self.debug_instances.retain(|instance| instance.persistent);
    }

    /// Debug instances queued for the next frame.
    #[must_use]
    pub fn debug_instances(&self) -> &[DebugInstance] {
        &self.debug_instances
    }

    /// Queues a debug instance.
    ///
    /// # Panics
    ///
    /// Panics if `instance.env` is out of range.
    pub fn add_debug_instance(&mut self, instance: DebugInstance) {
        assert!(
            instance.env < self.num_envs(),
            "environment {} out of range for {} environments",
            instance.env,
            self.num_envs()
        );
        self.debug_instances.push(instance);
    }

    /// Queues a sphere for one frame.
    pub fn add_sphere_debug_instance(&mut self, env: usize, center: &Point3<f32>, radius: f32) {
        self.add_debug_instance(DebugInstance::sphere(DEBUG_SPHERE_ASSET, env, center, radius));
    }

    /// Queues an oriented box for one frame.
    pub fn add_box_debug_instance(
        &mut self,
        env: usize,
        position: &Point3<f32>,
        rotation: &UnitQuaternion<f32>,
        aabb: &Aabb,
        pad: f32,
        show_backfaces: bool,
    ) {
        self.add_debug_instance(DebugInstance::oriented_box(
            DEBUG_BOX_ASSET,
            env,
            position,
            rotation,
            aabb,
            pad,
            show_backfaces,
        ));
    }

    /// Queues one box per free-space layer of the environment's stage grid.
    ///
    /// Cells are visited in storage order; only those with linear index in
    /// `min_progress..max_progress` are emitted, so a caller can reveal the
    /// grid incrementally. `None` means every remaining cell.
    ///
    /// # Errors
    ///
    /// Fails if the stage has no column grid.
    ///
    /// # Panics
    ///
    /// Panics if `env` is out of range.
    pub fn debug_render_column_grids(
        &mut self,
        env: usize,
        min_progress: usize,
        max_progress: Option<usize>,
    ) -> BatchResult<()> {
        assert!(
            env < self.num_envs(),
            "environment {env} out of range for {} environments",
            self.num_envs()
        );
        let stage = self.published.render[env].stage;
        let grids = Arc::clone(&self.stage_grids[stage]);
        let grid = grids.grid(0)?;
        let (dim_x, dim_z) = (grid.dim_x(), grid.dim_z());
        let spacing = grid.grid_spacing();

        let mut index = 0usize;
        let end = max_progress.unwrap_or(usize::MAX);
        for cell_x in 0..dim_x {
            for cell_z in 0..dim_z {
                if index >= end {
                    return Ok(());
                }
                if index >= min_progress {
                    #[allow(clippy::cast_precision_loss)]
                    let (x, z) = (
                        grid.min_x() + cell_x as f32 * spacing,
                        grid.min_z() + cell_z as f32 * spacing,
                    );
                    for layer in grid.layers(cell_x, cell_z) {
                        let aabb = Aabb::new(
                            Point3::new(x, layer.free_min, z),
                            Point3::new(x + spacing, layer.free_max, z + spacing),
                        );
                        self.add_box_debug_instance(
                            env,
                            &Point3::origin(),
                            &UnitQuaternion::identity(),
                            &aabb,
                            0.0,
                            false,
                        );
                    }
                }
                index += 1;
            }
        }
        Ok(())
    }

    /// Places the camera in world space.
    pub fn set_camera(&mut self, position: Point3<f32>, rotation: UnitQuaternion<f32>) {
        self.camera = CameraPlacement::World { position, rotation };
    }

    /// Attaches the camera to a robot link.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::UnknownLink`](crate::BatchError::UnknownLink)
    /// for an unknown link name.
    pub fn attach_camera_to_link(&mut self, link_name: &str, transform: Isometry3<f32>) -> BatchResult<()> {
        let link = self.model.link_index(link_name)?;
        self.camera = CameraPlacement::Link { link, transform };
        Ok(())
    }

    /// Current camera placement.
    #[must_use]
    pub const fn camera(&self) -> &CameraPlacement {
        &self.camera
    }

    /// Waits for outstanding work and stops the physics worker.
    ///
    /// # Errors
    ///
    /// Returns the error of an outstanding step.
    pub fn close(mut self) -> BatchResult<()> {
        self.finish_outstanding()
    }

    fn finish_outstanding(&mut self) -> BatchResult<()> {
        if self.render_in_flight {
            self.wait_render();
        }
        if self.step_in_flight {
            self.wait_step_physics_or_reset()?;
        }
        Ok(())
    }
}

impl Drop for BatchedSimulator {
    fn drop(&mut self) {
        if let Err(err) = self.finish_outstanding() {
            debug!(%err, "Outstanding step failed during shutdown");
        }
    }
}
