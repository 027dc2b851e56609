//! Scenes shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use batch_sim::{
    BatchedSimulator, BroadphaseSizing, Collection, Episode, EpisodeSet, FixedObject, FreeObject,
    FreeObjectEntry, FreeObjectSpawn, RobotEntry, RobotLinkEntry, RobotModel, SimulatorAssets,
    Sphere,
};
use batch_spatial::{Aabb, ColumnGridSet, ColumnGridSource};
use batch_types::{BatchedSimulatorConfig, EpisodeGenerationParams, EpisodeSource};
use nalgebra::{Point3, UnitQuaternion, Vector3};

pub const RADII: [f32; 2] = [0.015, 0.05];

/// Routes simulator logs to the test harness. Set `RUST_LOG` to override.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("batch_sim=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A 6 x 4 m room spanning x in [-1, 5] and z in [-2, 2], floor at y = 0,
/// ceiling at y = 2.5.
pub fn room(name: &str) -> FixedObject {
    let grids = RADII
        .iter()
        .map(|&r| {
            let mut grid = ColumnGridSource::new(-1.0, -2.0, 60, 40, 0.1, r).unwrap();
            grid.fill_uniform(r, 2.5 - r);
            grid
        })
        .collect();
    FixedObject::new(name, ColumnGridSet::from_grids(grids))
}

pub fn ball_aabb() -> Aabb {
    Aabb::from_center(Point3::origin(), Vector3::repeat(0.05))
}

/// Link spheres at heights 0.25, 0.75 and 1.0 above the root when straight;
/// the gripper query sphere sits at the arm tip, 1.0 above the root.
pub fn arm_entry() -> RobotEntry {
    RobotEntry {
        name: "arm".into(),
        links: vec![
            RobotLinkEntry {
                link_name: "link_0".into(),
                collision_spheres: vec![Sphere::new(Point3::new(0.0, 0.25, 0.0), 0.05)],
            },
            RobotLinkEntry {
                link_name: "link_1".into(),
                collision_spheres: vec![
                    Sphere::new(Point3::new(0.0, 0.25, 0.0), 0.05),
                    Sphere::new(Point3::new(0.0, 0.5, 0.0), 0.015),
                ],
            },
        ],
        gripper_link: "link_1".into(),
        gripper_query_offset: Vector3::new(0.0, 0.5, 0.0),
        gripper_query_radius: 0.1,
    }
}

pub fn collection() -> Collection {
    let can = Aabb::new(Point3::new(-0.04, -0.04, 0.0), Point3::new(0.04, 0.04, 0.12));
    Collection::new(RADII.to_vec())
        .with_free_object(FreeObjectEntry::generated("can", can, "uprightCylinder"))
        .with_free_object(FreeObjectEntry::new(
            "ball",
            ball_aabb(),
            vec![Sphere::new(Point3::origin(), 0.05)],
        ))
        .with_robot(arm_entry())
}

pub fn arm() -> RobotModel {
    RobotModel::n_link_arm("arm", 2, 0.5)
}

pub fn params() -> EpisodeGenerationParams {
    EpisodeGenerationParams::default()
        .with_num_episodes(6)
        .with_target_num_spawns(6)
        .with_seed(11)
}

/// One hand-authored episode: robot start and ball positions.
pub struct Scene {
    pub robot_start: Point3<f32>,
    pub robot_yaw: f32,
    pub balls: Vec<Point3<f32>>,
}

impl Scene {
    pub fn new(robot_start: Point3<f32>, balls: Vec<Point3<f32>>) -> Self {
        Self {
            robot_start,
            robot_yaw: 0.0,
            balls,
        }
    }
}

/// An episode set on one room with a ball at each listed position.
pub fn authored_set(scenes: &[Scene]) -> EpisodeSet {
    let collection = collection();
    let free_objects: Vec<FreeObject> = collection
        .free_objects
        .iter()
        .map(|entry| FreeObject::new(&entry.name, entry.collision_box.aabb(), 32))
        .collect();
    let ball = free_objects.iter().position(|f| f.name == "ball").unwrap();

    let mut spawns = Vec::new();
    let mut episodes = Vec::new();
    for scene in scenes {
        let first = spawns.len();
        spawns.extend(scene.balls.iter().map(|&start_pos| FreeObjectSpawn {
            free_obj_index: ball,
            start_rotation_index: 0,
            start_pos,
        }));
        episodes.push(Episode {
            stage_fixed_obj_index: 0,
            first_free_object_spawn_index: first,
            num_free_object_spawns: scene.balls.len(),
            target_obj_index: 0,
            goal_pos: Point3::new(1.0, 1.0, 0.0),
            goal_rotation: UnitQuaternion::identity(),
            robot_start_pos: scene.robot_start,
            robot_start_yaw: scene.robot_yaw,
        });
    }

    let sizing = BroadphaseSizing {
        max_obstacle_radius: collection.max_collision_radius(),
        ..BroadphaseSizing::default()
    };
    let mut set = EpisodeSet::from_parts(vec![room("room")], free_objects, spawns, episodes, sizing)
        .unwrap();
    set.update_from_collection(&collection).unwrap();
    set
}

pub fn authored_sim(config: BatchedSimulatorConfig, scenes: &[Scene]) -> BatchedSimulator {
    init_tracing();
    let assets = SimulatorAssets::new(vec![room("room")], collection(), arm())
        .with_episode_set(authored_set(scenes));
    BatchedSimulator::new(config, assets).unwrap()
}

pub fn procedural_sim(config: BatchedSimulatorConfig) -> BatchedSimulator {
    init_tracing();
    let config = config.with_episode_source(EpisodeSource::Procedural(params()));
    let assets = SimulatorAssets::new(vec![room("a"), room("b")], collection(), arm());
    BatchedSimulator::new(config, assets).unwrap()
}

/// Per-environment action: `[grip, forward, yaw, joint deltas...]`.
pub fn actions(sim: &BatchedSimulator, per_env: &[[f32; 5]]) -> Vec<f32> {
    assert_eq!(sim.action_layout().action_dim(), 5);
    assert_eq!(per_env.len(), sim.num_envs());
    per_env.iter().flatten().copied().collect()
}

pub fn step(sim: &mut BatchedSimulator, actions: Vec<f32>) {
    let resets = vec![None; sim.num_envs()];
    sim.start_step_physics_or_reset(actions, resets).unwrap();
    sim.wait_step_physics_or_reset().unwrap();
}

pub fn act(sim: &mut BatchedSimulator, per_env: &[[f32; 5]]) {
    let actions = actions(sim, per_env);
    step(sim, actions);
}
