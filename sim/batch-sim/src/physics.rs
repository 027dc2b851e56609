//! The per-step collision and gripping pipeline.
//!
//! [`PhysicsState`] owns everything the physics side mutates. It runs either
//! on the worker thread or inline on the control thread; in both cases the
//! control side only sees the [`StepSnapshot`] it publishes.

use std::sync::Arc;

use batch_spatial::{
    Aabb, CollisionBroadphaseGrid, ObstacleHandle, batch_sphere_oriented_box_contact_test,
};
use batch_types::{ActionLayout, BatchedSimulatorConfig, EnvironmentState, GripRequest, StatRecord};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::collection::Collection;
use crate::episode::EpisodeSet;
use crate::episode_instance::EpisodeInstanceSet;
use crate::error::BatchResult;
use crate::placement::is_pose_free;
use crate::render::EnvRenderState;
use crate::robot_instance::RobotInstanceSet;
use crate::robot_model::{ArticulationEngine, CollisionSphere, RobotModel};
use crate::rollout::RolloutRecord;

/// Sphere/box pairs tested per batched contact call.
const CONTACT_BATCH: usize = 8;

/// Magnitude of forced random motion actions.
const RANDOM_ACTION_SCALE: f32 = 0.1;

/// Everything published by one step.
#[derive(Debug, Clone, Default)]
pub struct StepSnapshot {
    /// Per-environment state.
    pub env_states: Vec<EnvironmentState>,
    /// Per-environment instance transforms.
    pub render: Vec<EnvRenderState>,
    /// Counters for this step only.
    pub stats: StatRecord,
}

/// Physics-side simulator state.
pub(crate) struct PhysicsState {
    num_envs: usize,
    num_substeps: usize,
    force_random_actions: bool,
    paired_envs: bool,
    layout: ActionLayout,
    model: Arc<RobotModel>,
    episode_set: EpisodeSet,
    episodes: EpisodeInstanceSet,
    robots: RobotInstanceSet,
    rollout: RolloutRecord,
    rng: StdRng,
    start_joint_positions: Vec<f32>,
    random_actions: Vec<f32>,
    delta_scratch: Vec<f32>,
    link_scratch: Vec<Isometry3<f32>>,
    resetting: Vec<bool>,
    collided: Vec<bool>,
}

impl PhysicsState {
    pub(crate) fn new(
        config: &BatchedSimulatorConfig,
        model: Arc<RobotModel>,
        episode_set: EpisodeSet,
    ) -> BatchResult<Self> {
        let num_envs = config.num_envs;
        let num_episodes = episode_set.num_episodes();
        let initial: Vec<usize> = (0..num_envs).map(|env| env % num_episodes).collect();
        let episodes = EpisodeInstanceSet::new(&episode_set, &initial)?;
        let layout = ActionLayout::new(model.num_joints());
        let num_rollout_substeps = (config.num_substeps + 1).max(2);

        Ok(Self {
            num_envs,
            num_substeps: config.num_substeps,
            force_random_actions: config.force_random_actions,
            paired_envs: config.do_paired_debug_envs,
            layout,
            robots: RobotInstanceSet::new(&model, num_envs),
            rollout: RolloutRecord::new(
                num_rollout_substeps,
                num_envs,
                model.num_joints(),
                model.num_links() + 1,
            ),
            rng: StdRng::seed_from_u64(config.seed),
            start_joint_positions: model.start_joint_positions(),
            random_actions: Vec::new(),
            delta_scratch: vec![0.0; model.num_joints()],
            link_scratch: vec![Isometry3::identity(); model.num_links()],
            resetting: vec![false; num_envs],
            collided: vec![false; num_envs],
            model,
            episode_set,
            episodes,
        })
    }

    /// Runs one step and writes the result into `out`.
    ///
    /// `actions` holds `num_envs × action_dim` values; `resets` holds one
    /// optional episode index per environment.
    ///
    /// # Panics
    ///
    /// Panics on a reset to an out-of-range episode.
    pub(crate) fn step(
        &mut self,
        actions: &[f32],
        resets: &[Option<usize>],
        out: &mut StepSnapshot,
    ) -> BatchResult<()> {
        let mut stats = StatRecord::default();
        let random = if self.force_random_actions {
            self.generate_random_actions()
        } else {
            Vec::new()
        };
        let actions = if self.force_random_actions {
            &random[..]
        } else {
            actions
        };

        for env in 0..self.num_envs {
            let source = self.source_env(env);
            self.resetting[env] = resets[source].is_some();
            self.collided[env] = false;
            if let Some(episode) = resets[source] {
                self.reset_env(env, episode)?;
                stats.num_episodes += 1;
            } else {
                self.robots.instance_mut(env).clear_events();
            }
        }

        for _ in 0..self.num_substeps {
            self.substep(actions);
        }

        for env in 0..self.num_envs {
            if self.resetting[env] {
                continue;
            }
            let env_actions = self.layout.env_actions(actions, self.source_env(env));
            let held = self.robots.instance(env).gripped_free_object;
            match (ActionLayout::grip_request(env_actions), held) {
                (GripRequest::Grip, None) => self.try_grip(env, &mut stats),
                (GripRequest::Drop, Some(spawn)) => self.try_drop(env, spawn, &mut stats),
                _ => {}
            }

            stats.num_steps += 1;
            if self.collided[env] {
                stats.num_steps_in_collision += 1;
            }
            self.robots.instance_mut(env).did_collide = self.collided[env];
            self.episodes.get_mut(env).advance_step();
        }

        self.random_actions = random;
        self.publish(out);
        out.stats = stats;
        Ok(())
    }

    /// Applies a reloaded collection to the free-object templates and robot.
    ///
    /// Nothing changes unless both updates succeed.
    pub(crate) fn reload(&mut self, collection: &Collection) -> BatchResult<()> {
        self.episode_set
            .check_radius_classes(collection.collision_radius_working_set.len())?;
        let mut episode_set = self.episode_set.clone();
        episode_set.update_from_collection(collection)?;
        let mut model = (*self.model).clone();
        model.update_from_collection(collection)?;

        if model.collision_spheres().len() != self.robots.num_spheres() {
            let mut robots = RobotInstanceSet::new(&model, self.num_envs);
            for env in 0..self.num_envs {
                *robots.instance_mut(env) = *self.robots.instance(env);
            }
            self.robots = robots;
        }
        self.episode_set = episode_set;
        self.model = Arc::new(model);
        info!(
            free_objects = collection.free_objects.len(),
            robot_spheres = self.model.collision_spheres().len(),
            "Reloaded collection"
        );
        Ok(())
    }

    fn source_env(&self, env: usize) -> usize {
        if self.paired_envs { env & !1 } else { env }
    }

    fn generate_random_actions(&mut self) -> Vec<f32> {
        let mut random = std::mem::take(&mut self.random_actions);
        let dim = self.layout.action_dim();
        random.resize(self.num_envs * dim, 0.0);
        for (i, value) in random.iter_mut().enumerate() {
            let sample: f32 = self.rng.gen_range(-1.0..=1.0);
            *value = if i % dim == ActionLayout::GRIP {
                sample
            } else {
                sample * RANDOM_ACTION_SCALE
            };
        }
        random
    }

    fn reset_env(&mut self, env: usize, episode_index: usize) -> BatchResult<()> {
        self.episodes.reset_env(&self.episode_set, env, episode_index)?;
        self.robots.reset_env(env);

        let episode = self.episode_set.episode(episode_index);
        let (yaw, start) = (episode.robot_start_yaw, episode.robot_start_pos);
        let step = self.rollout.current_step();
        self.rollout
            .joint_positions_mut(step, env)
            .copy_from_slice(&self.start_joint_positions);
        self.rollout.set_yaw(step, env, yaw);
        self.rollout.set_position(step, env, Vector2::new(start.x, start.z));
        self.update_kinematics(env, step);
        self.rollout.broadcast_env(step, env);
        Ok(())
    }

    fn root_transform(&self, env: usize, step: usize) -> Isometry3<f32> {
        let height = self
            .episode_set
            .episode(self.episodes.get(env).episode_index())
            .robot_start_pos
            .y;
        let position = self.rollout.position(step, env);
        Isometry3::from_parts(
            Translation3::new(position.x, height, position.y),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), self.rollout.yaw(step, env)),
        )
    }

    /// Recomputes root, link and sphere transforms from slot `step`.
    fn update_kinematics(&mut self, env: usize, step: usize) {
        let root = self.root_transform(env, step);
        self.model.compute_link_transforms(
            &root,
            self.rollout.joint_positions(step, env),
            &mut self.link_scratch,
        );
        let nodes = self.rollout.node_transforms_mut(step, env);
        nodes[0] = root;
        nodes[1..].copy_from_slice(&self.link_scratch);
        self.rollout.set_root_transform(step, env, root);
        self.robots.update_sphere_origins(env, &self.model, &self.link_scratch);
    }

    #[allow(clippy::cast_precision_loss)]
    fn apply_action(&mut self, env: usize, step: usize, env_actions: &[f32]) {
        let scale = 1.0 / self.num_substeps as f32;
        let yaw = self.rollout.yaw(step, env) + env_actions[ActionLayout::BASE_YAW] * scale;
        let forward = env_actions[ActionLayout::BASE_FORWARD] * scale;
        let position = self.rollout.position(step, env) + Vector2::new(yaw.cos(), -yaw.sin()) * forward;
        self.rollout.set_yaw(step, env, yaw);
        self.rollout.set_position(step, env, position);

        for (delta, action) in self
            .delta_scratch
            .iter_mut()
            .zip(ActionLayout::joint_deltas(env_actions))
        {
            *delta = action * scale;
        }
        self.model
            .integrate_joints(self.rollout.joint_positions_mut(step, env), &self.delta_scratch);
    }

    fn substep(&mut self, actions: &[f32]) {
        self.rollout.advance();
        let (current, previous) = (self.rollout.current_step(), self.rollout.previous_step());
        for env in 0..self.num_envs {
            self.rollout.copy_env(previous, current, env);
            if self.resetting[env] {
                continue;
            }
            let env_actions = self.layout.env_actions(actions, self.source_env(env));
            self.apply_action(env, current, env_actions);
            self.update_kinematics(env, current);

            let collided = self.test_collision(env);
            self.robots.set_collision_result(env, collided);
            if collided {
                self.rollout.copy_env(previous, current, env);
                self.collided[env] = true;
            } else if let Some(spawn) = self.robots.instance(env).gripped_free_object {
                let pose = self.held_object_pose(env);
                self.episodes.get_mut(env).set_free_object_pose(spawn, pose);
            }
        }
    }

    /// Held object pose from the most recent link transforms.
    fn held_object_pose(&self, env: usize) -> Isometry3<f32> {
        self.link_scratch[self.model.gripper_link()] * self.robots.instance(env).grip_offset
    }

    /// Tests the candidate pose in `link_scratch` and the robot sphere
    /// origins against the stage, free objects and the held object.
    fn test_collision(&mut self, env: usize) -> bool {
        let instance = self.episodes.get(env);
        let episode = self.episode_set.episode(instance.episode_index());
        let grids = &self.episode_set.stage(episode).column_grids;
        let spheres = self.model.collision_spheres();

        let (origins, caches) = self.robots.spheres_and_caches_mut(env);
        for ((sphere, origin), cache) in spheres.iter().zip(origins).zip(caches.iter_mut()) {
            let (contact, next) = grids.contact_test(sphere.radius_idx, origin, *cache);
            *cache = next;
            if contact {
                return true;
            }
        }

        if spheres_hit_obstacles(instance.broadphase(), spheres, origins) {
            return true;
        }

        if let Some(spawn) = self.robots.instance(env).gripped_free_object {
            let pose =
                self.link_scratch[self.model.gripper_link()] * self.robots.instance(env).grip_offset;
            let template = self
                .episode_set
                .free_object(self.episode_set.spawns(episode)[spawn].free_obj_index);
            return !is_pose_free(grids, instance.broadphase(), &pose, template);
        }
        false
    }

    fn gripper_transform(&self, env: usize) -> Isometry3<f32> {
        let step = self.rollout.current_step();
        self.rollout.node_transforms(step, env)[self.model.gripper_link() + 1]
    }

    fn try_grip(&mut self, env: usize, stats: &mut StatRecord) {
        stats.num_grip_attempts += 1;
        let gripper = self.gripper_transform(env);
        let query = gripper * Point3::from(*self.model.gripper_query_offset());

        let instance = self.episodes.get(env);
        let broadphase = instance.broadphase();
        let nearest = broadphase
            .query_sphere(&query, self.model.gripper_query_radius())
            .into_iter()
            .min_by(|a, b| {
                let da = (broadphase.obstacle(*a).position() - query).norm_squared();
                let db = (broadphase.obstacle(*b).position() - query).norm_squared();
                da.total_cmp(&db)
            });
        let Some((handle, spawn)) = nearest.and_then(|h| instance.spawn_of(h).map(|s| (h, s)))
        else {
            return;
        };
        let pose = instance.free_object_poses()[spawn];

        self.episodes.get_mut(env).broadphase_mut().remove_obstacle(handle);
        let robot = self.robots.instance_mut(env);
        robot.gripped_free_object = Some(spawn);
        robot.grip_offset = gripper.inverse() * pose;
        robot.did_grasp = true;
        stats.num_grips += 1;
    }

    fn try_drop(&mut self, env: usize, spawn: usize, stats: &mut StatRecord) {
        let pose = self.gripper_transform(env) * self.robots.instance(env).grip_offset;
        let instance = self.episodes.get(env);
        let episode = self.episode_set.episode(instance.episode_index());
        let template = self
            .episode_set
            .free_object(self.episode_set.spawns(episode)[spawn].free_obj_index);
        let grids = &self.episode_set.stage(episode).column_grids;

        if !is_pose_free(grids, instance.broadphase(), &pose, template) {
            stats.num_failed_drops += 1;
            debug!(env, spawn, "Drop rejected: held object would collide");
            return;
        }

        let handle: ObstacleHandle = instance.obstacle_handle(spawn);
        let instance = self.episodes.get_mut(env);
        instance.broadphase_mut().reinsert_obstacle(
            handle,
            &Point3::from(pose.translation.vector),
            &pose.rotation,
        );
        instance.set_free_object_pose(spawn, pose);
        let robot = self.robots.instance_mut(env);
        robot.gripped_free_object = None;
        robot.did_drop = true;
        stats.num_drops += 1;
    }

    fn publish(&self, out: &mut StepSnapshot) {
        let step = self.rollout.current_step();
        out.env_states.resize_with(self.num_envs, EnvironmentState::default);
        out.render.resize_with(self.num_envs, EnvRenderState::default);

        for env in 0..self.num_envs {
            let instance = self.episodes.get(env);
            let episode = self.episode_set.episode(instance.episode_index());
            let spawns = self.episode_set.spawns(episode);
            let robot = self.robots.instance(env);
            let root = self.rollout.root_transform(step, env);
            let nodes = self.rollout.node_transforms(step, env);
            let gripper = nodes[self.model.gripper_link() + 1];

            let state = &mut out.env_states[env];
            state.episode_idx = instance.episode_index();
            state.episode_step_idx = instance.step_index();
            state.target_obj_idx = episode.target_obj_index;
            if let Some(target) = spawns.get(episode.target_obj_index) {
                let pose = self.episode_set.spawn_transform(target);
                state.target_obj_start_pos = Point3::from(pose.translation.vector);
                state.target_obj_start_rotation = pose.rotation;
            }
            let start = episode.robot_start_transform();
            state.robot_start_pos = episode.robot_start_pos;
            state.robot_start_rotation = start.rotation;
            state.goal_pos = episode.goal_pos;
            state.goal_rotation = episode.goal_rotation;
            state.robot_pos = Point3::from(root.translation.vector);
            state.robot_rotation = root.rotation;
            state.robot_joint_positions.clear();
            state
                .robot_joint_positions
                .extend_from_slice(self.rollout.joint_positions(step, env));
            state.ee_pos = gripper * Point3::from(*self.model.gripper_query_offset());
            state.ee_rotation = gripper.rotation;
            state.did_collide = robot.did_collide;
            state.held_obj_idx = robot.gripped_free_object;
            state.did_grasp = robot.did_grasp;
            state.did_drop = robot.did_drop;
            state.obj_positions.clear();
            state.obj_rotations.clear();
            for pose in instance.free_object_poses() {
                state.obj_positions.push(Point3::from(pose.translation.vector));
                state.obj_rotations.push(pose.rotation);
            }

            let render = &mut out.render[env];
            render.stage = instance.stage_index();
            render.robot_nodes.clear();
            render.robot_nodes.extend_from_slice(nodes);
            render.free_objects.clear();
            render.free_objects.extend(
                spawns
                    .iter()
                    .zip(instance.free_object_poses())
                    .map(|(spawn, pose)| (spawn.free_obj_index, *pose)),
            );
            render.held = robot.gripped_free_object;
        }
    }
}

/// Whether any robot sphere touches a free object in `broadphase`.
///
/// Candidate obstacles of each sphere are tested in fixed-size batches; a
/// short final batch is padded by repeating its last pair.
fn spheres_hit_obstacles(
    broadphase: &CollisionBroadphaseGrid,
    spheres: &[CollisionSphere],
    origins: &[Point3<f32>],
) -> bool {
    if broadphase.is_empty() {
        return false;
    }
    let mut candidates: SmallVec<[ObstacleHandle; 16]> = SmallVec::new();
    for (sphere, origin) in spheres.iter().zip(origins) {
        let query = Aabb::from_center(*origin, Vector3::repeat(sphere.radius));
        candidates.clear();
        candidates.extend(broadphase.candidates(&query));
        candidates.sort_unstable();
        candidates.dedup();

        for chunk in candidates.chunks(CONTACT_BATCH) {
            let pick = |k: usize| broadphase.obstacle(chunk[k.min(chunk.len() - 1)]);
            let transforms: [&Isometry3<f32>; CONTACT_BATCH] = std::array::from_fn(|k| pick(k).transform());
            let boxes: [&Aabb; CONTACT_BATCH] = std::array::from_fn(|k| pick(k).local_aabb());
            let positions = [origin; CONTACT_BATCH];
            let hits = batch_sphere_oriented_box_contact_test(
                &transforms,
                &positions,
                sphere.radius * sphere.radius,
                &boxes,
                1,
            );
            if !hits.is_empty() {
                return true;
            }
        }
    }
    false
}
