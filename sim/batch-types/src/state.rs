//! Per-environment snapshot published after every step.

use nalgebra::{Point3, UnitQuaternion};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The externally visible state of one environment.
///
/// Written by the physics pipeline at the end of each step and read by the
/// control side between steps. Fields that only change on reset (episode
/// index, start and goal poses) are refreshed on every publish so a snapshot
/// is self-contained.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnvironmentState {
    /// Episode currently instantiated in this environment.
    pub episode_idx: usize,
    /// Steps taken since the last reset.
    pub episode_step_idx: usize,
    /// Free object the episode asks the robot to move.
    pub target_obj_idx: usize,
    /// Start position of the target object.
    pub target_obj_start_pos: Point3<f32>,
    /// Start rotation of the target object.
    pub target_obj_start_rotation: UnitQuaternion<f32>,
    /// Robot base start position.
    pub robot_start_pos: Point3<f32>,
    /// Robot base start rotation.
    pub robot_start_rotation: UnitQuaternion<f32>,
    /// Goal position for the target object.
    pub goal_pos: Point3<f32>,
    /// Goal rotation for the target object.
    pub goal_rotation: UnitQuaternion<f32>,
    /// Robot base position.
    pub robot_pos: Point3<f32>,
    /// Robot base rotation.
    pub robot_rotation: UnitQuaternion<f32>,
    /// Joint positions.
    pub robot_joint_positions: Vec<f32>,
    /// End-effector (gripper query point) position.
    pub ee_pos: Point3<f32>,
    /// End-effector rotation.
    pub ee_rotation: UnitQuaternion<f32>,
    /// Whether any substep of the last step was rejected for collision.
    pub did_collide: bool,
    /// Free object currently held by the gripper.
    pub held_obj_idx: Option<usize>,
    /// Whether the last step picked up an object.
    pub did_grasp: bool,
    /// Whether the last step released an object.
    pub did_drop: bool,
    /// Free object positions, indexed by spawn order within the episode.
    pub obj_positions: Vec<Point3<f32>>,
    /// Free object rotations, indexed like `obj_positions`.
    pub obj_rotations: Vec<UnitQuaternion<f32>>,
}

impl Default for EnvironmentState {
    fn default() -> Self {
        Self {
            episode_idx: 0,
            episode_step_idx: 0,
            target_obj_idx: 0,
            target_obj_start_pos: Point3::origin(),
            target_obj_start_rotation: UnitQuaternion::identity(),
            robot_start_pos: Point3::origin(),
            robot_start_rotation: UnitQuaternion::identity(),
            goal_pos: Point3::origin(),
            goal_rotation: UnitQuaternion::identity(),
            robot_pos: Point3::origin(),
            robot_rotation: UnitQuaternion::identity(),
            robot_joint_positions: Vec::new(),
            ee_pos: Point3::origin(),
            ee_rotation: UnitQuaternion::identity(),
            did_collide: false,
            held_obj_idx: None,
            did_grasp: false,
            did_drop: false,
            obj_positions: Vec::new(),
            obj_rotations: Vec::new(),
        }
    }
}

impl EnvironmentState {
    /// A snapshot sized for `num_joints` joints and `max_free_objects` objects.
    #[must_use]
    pub fn with_capacity(num_joints: usize, max_free_objects: usize) -> Self {
        Self {
            robot_joint_positions: vec![0.0; num_joints],
            obj_positions: Vec::with_capacity(max_free_objects),
            obj_rotations: Vec::with_capacity(max_free_objects),
            ..Default::default()
        }
    }

    /// Whether the robot holds an object.
    #[must_use]
    pub const fn is_holding(&self) -> bool {
        self.held_obj_idx.is_some()
    }
}
