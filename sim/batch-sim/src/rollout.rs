//! Ring buffer of per-substep robot state.
//!
//! Each array is laid out `[storage_step][env][element]`. The simulator
//! writes the current slot from the previous one every substep and copies it
//! back when the substep collides, so the previous slot always holds the last
//! committed state.

use nalgebra::{Isometry3, Vector2};

/// Per-substep joint positions, base poses and node transforms.
#[derive(Debug, Clone)]
pub struct RolloutRecord {
    num_rollout_substeps: usize,
    num_envs: usize,
    num_joints: usize,
    num_nodes: usize,
    joint_positions: Vec<f32>,
    yaws: Vec<f32>,
    positions: Vec<Vector2<f32>>,
    root_transforms: Vec<Isometry3<f32>>,
    node_transforms: Vec<Isometry3<f32>>,
    current: usize,
    previous: usize,
}

impl RolloutRecord {
    /// Allocates a ring of `num_rollout_substeps` slots.
    ///
    /// `num_nodes` counts the root plus every link.
    ///
    /// # Panics
    ///
    /// Panics if fewer than 2 slots are requested.
    #[must_use]
    pub fn new(num_rollout_substeps: usize, num_envs: usize, num_joints: usize, num_nodes: usize) -> Self {
        assert!(
            num_rollout_substeps >= 2,
            "rollout record needs at least 2 slots, got {num_rollout_substeps}"
        );
        let slots = num_rollout_substeps * num_envs;
        Self {
            num_rollout_substeps,
            num_envs,
            num_joints,
            num_nodes,
            joint_positions: vec![0.0; slots * num_joints],
            yaws: vec![0.0; slots],
            positions: vec![Vector2::zeros(); slots],
            root_transforms: vec![Isometry3::identity(); slots],
            node_transforms: vec![Isometry3::identity(); slots * num_nodes],
            current: 0,
            previous: num_rollout_substeps - 1,
        }
    }

    /// Ring length.
    #[must_use]
    pub const fn num_rollout_substeps(&self) -> usize {
        self.num_rollout_substeps
    }

    /// Nodes per environment.
    #[must_use]
    pub const fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Slot being written.
    #[must_use]
    pub const fn current_step(&self) -> usize {
        self.current
    }

    /// Slot holding the last committed state.
    #[must_use]
    pub const fn previous_step(&self) -> usize {
        self.previous
    }

    /// Moves both cursors one slot forward.
    pub fn advance(&mut self) {
        self.previous = self.current;
        self.current = (self.current + 1) % self.num_rollout_substeps;
    }

    fn slot(&self, step: usize, env: usize) -> usize {
        assert!(
            step < self.num_rollout_substeps,
            "rollout step {step} out of range for {} slots",
            self.num_rollout_substeps
        );
        assert!(
            env < self.num_envs,
            "environment {env} out of range for {} environments",
            self.num_envs
        );
        step * self.num_envs + env
    }

    /// Joint positions of one environment at one slot.
    #[must_use]
    pub fn joint_positions(&self, step: usize, env: usize) -> &[f32] {
        let start = self.slot(step, env) * self.num_joints;
        &self.joint_positions[start..start + self.num_joints]
    }

    /// Mutable joint positions of one environment at one slot.
    pub fn joint_positions_mut(&mut self, step: usize, env: usize) -> &mut [f32] {
        let start = self.slot(step, env) * self.num_joints;
        &mut self.joint_positions[start..start + self.num_joints]
    }

    /// Base yaw.
    #[must_use]
    pub fn yaw(&self, step: usize, env: usize) -> f32 {
        self.yaws[self.slot(step, env)]
    }

    /// Sets the base yaw.
    pub fn set_yaw(&mut self, step: usize, env: usize, yaw: f32) {
        let slot = self.slot(step, env);
        self.yaws[slot] = yaw;
    }

    /// Base position on the ground plane as `(x, z)`.
    #[must_use]
    pub fn position(&self, step: usize, env: usize) -> Vector2<f32> {
        self.positions[self.slot(step, env)]
    }

    /// Sets the base position.
    pub fn set_position(&mut self, step: usize, env: usize, position: Vector2<f32>) {
        let slot = self.slot(step, env);
        self.positions[slot] = position;
    }

    /// Robot root transform.
    #[must_use]
    pub fn root_transform(&self, step: usize, env: usize) -> &Isometry3<f32> {
        &self.root_transforms[self.slot(step, env)]
    }

    /// Sets the root transform.
    pub fn set_root_transform(&mut self, step: usize, env: usize, transform: Isometry3<f32>) {
        let slot = self.slot(step, env);
        self.root_transforms[slot] = transform;
    }

    /// Node transforms: the root followed by every link.
    #[must_use]
    pub fn node_transforms(&self, step: usize, env: usize) -> &[Isometry3<f32>] {
        let start = self.slot(step, env) * self.num_nodes;
        &self.node_transforms[start..start + self.num_nodes]
    }

    /// Mutable node transforms.
    pub fn node_transforms_mut(&mut self, step: usize, env: usize) -> &mut [Isometry3<f32>] {
        let start = self.slot(step, env) * self.num_nodes;
        &mut self.node_transforms[start..start + self.num_nodes]
    }

    /// Copies one environment's state from slot `from` to slot `to`.
    pub fn copy_env(&mut self, from: usize, to: usize, env: usize) {
        let (src, dst) = (self.slot(from, env), self.slot(to, env));
        if src == dst {
            return;
        }
        copy_stride(&mut self.joint_positions, src, dst, self.num_joints);
        copy_stride(&mut self.node_transforms, src, dst, self.num_nodes);
        self.yaws[dst] = self.yaws[src];
        self.positions[dst] = self.positions[src];
        self.root_transforms[dst] = self.root_transforms[src];
    }

    /// Writes one environment's state into every slot.
    pub fn broadcast_env(&mut self, from: usize, env: usize) {
        for step in 0..self.num_rollout_substeps {
            self.copy_env(from, step, env);
        }
    }
}

fn copy_stride<T: Copy>(data: &mut [T], src: usize, dst: usize, stride: usize) {
    data.copy_within(src * stride..(src + 1) * stride, dst * stride);
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_cursors_wrap() {
        let mut record = RolloutRecord::new(3, 1, 0, 1);
        assert_eq!((record.current_step(), record.previous_step()), (0, 2));
        record.advance();
        assert_eq!((record.current_step(), record.previous_step()), (1, 0));
        record.advance();
        record.advance();
        assert_eq!((record.current_step(), record.previous_step()), (0, 2));
    }

    #[test]
    fn test_copy_env_is_per_environment() {
        let mut record = RolloutRecord::new(2, 2, 2, 3);
        record.joint_positions_mut(0, 1).copy_from_slice(&[0.5, -0.5]);
        record.set_yaw(0, 1, 1.25);
        record.set_position(0, 1, Vector2::new(2.0, 3.0));
        record.node_transforms_mut(0, 1)[2] = Isometry3::translation(0.0, 1.0, 0.0);
        record.set_yaw(1, 0, 9.0);

        record.copy_env(0, 1, 1);
        assert_eq!(record.joint_positions(1, 1), &[0.5, -0.5]);
        assert_eq!(record.yaw(1, 1), 1.25);
        assert_eq!(record.position(1, 1), Vector2::new(2.0, 3.0));
        assert_eq!(record.node_transforms(1, 1)[2].translation.y, 1.0);
        // Environment 0 is untouched.
        assert_eq!(record.yaw(1, 0), 9.0);
        assert_eq!(record.joint_positions(1, 0), &[0.0, 0.0]);
    }

    #[test]
    fn test_broadcast_env() {
        let mut record = RolloutRecord::new(4, 1, 1, 1);
        record.joint_positions_mut(2, 0)[0] = 7.0;
        record.broadcast_env(2, 0);
        for step in 0..4 {
            assert_eq!(record.joint_positions(step, 0), &[7.0]);
        }
    }

    #[test]
    #[should_panic(expected = "rollout step 2 out of range")]
    fn test_step_out_of_range() {
        let record = RolloutRecord::new(2, 1, 1, 1);
        let _ = record.yaw(2, 0);
    }

    #[test]
    #[should_panic(expected = "at least 2 slots")]
    fn test_ring_too_short() {
        let _ = RolloutRecord::new(1, 1, 1, 1);
    }
}
