//! Batched embodied-agent simulator.
//!
//! Thousands of independent environments, each holding one stage, a set of
//! free objects and one articulated robot, are stepped in lockstep. The
//! heavy lifting is collision: robot spheres are tested against per-stage
//! column grids and against free objects in a per-environment broadphase
//! grid, and colliding substeps are reverted rather than resolved.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────── control thread ─────────────────────────────┐
//! │ BatchedSimulator: actions/resets in, EnvironmentState + render frames out │
//! └───────────────┬──────────────────────────────────────────▲────────────────┘
//!                 │ WorkerCommand::Step                      │ WorkerReply::Stepped
//!                 ▼                                          │
//! ┌───────────────────────────── physics worker ─────────────┴────────────────┐
//! │ PhysicsState: RolloutRecord → ArticulationEngine → RobotInstanceSet       │
//! │   → ColumnGridSet / CollisionBroadphaseGrid → commit or revert → gripping │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Episodes come from an [`EpisodeSet`], generated procedurally with
//! [`generate_benchmark_episode_set`] or loaded from JSON, and are
//! instantiated per environment by [`EpisodeInstanceSet`]. Collision proxies
//! come from a hot-reloadable [`Collection`].
//!
//! # Quick Start
//!
//! ```ignore
//! use batch_sim::{BatchedSimulator, SimulatorAssets};
//! use batch_types::BatchedSimulatorConfig;
//!
//! let config = BatchedSimulatorConfig::new(64).with_substeps(2);
//! let mut sim = BatchedSimulator::new(config, SimulatorAssets::new(stages, collection, robot))?;
//!
//! let layout = sim.action_layout();
//! let actions = vec![0.0; sim.num_envs() * layout.action_dim()];
//! sim.start_step_physics_or_reset(actions, vec![None; sim.num_envs()])?;
//! sim.wait_step_physics_or_reset()?;
//! for state in sim.get_environment_states() {
//!     println!("{:?} collided: {}", state.robot_pos, state.did_collide);
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn, // Many methods can't be const due to nalgebra
    clippy::missing_errors_doc,   // Error docs added where non-obvious
    clippy::module_name_repetitions,
)]

mod collection;
mod episode;
mod episode_instance;
mod error;
mod physics;
mod placement;
mod render;
mod robot_instance;
mod robot_model;
mod rollout;
mod simulator;
mod worker;

#[cfg(test)]
mod test_fixtures;

pub use collection::{
    Collection, CollisionBox, FreeObjectEntry, MEDIUM_SPHERE_RADIUS, RobotEntry, RobotLinkEntry,
    SMALL_SPHERE_RADIUS, Sphere, SphereTechnique,
};
pub use episode::{
    BroadphaseSizing, Episode, EpisodeSet, FixedObject, FreeObject, FreeObjectSphere,
    FreeObjectSpawn, generate_benchmark_episode_set,
};
pub use episode_instance::{EpisodeInstance, EpisodeInstanceSet};
pub use error::{BatchError, BatchResult};
pub use physics::StepSnapshot;
pub use placement::{DEFAULT_MAX_FAILED_PLACEMENTS, PlacementHelper, is_pose_free};
pub use render::{
    CameraPlacement, DebugInstance, EnvRenderState, HeadlessRenderer, RenderBackend, RenderFrame,
};
pub use robot_instance::{RobotInstance, RobotInstanceSet};
pub use robot_model::{ArticulationEngine, CollisionSphere, Link, RobotModel};
pub use rollout::RolloutRecord;
pub use simulator::{BatchedSimulator, DEBUG_BOX_ASSET, DEBUG_SPHERE_ASSET, SimulatorAssets};
