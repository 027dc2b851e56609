//! Layout of the flattened per-environment action buffer.
//!
//! Each environment contributes `3 + num_joints` floats:
//!
//! | Index | Meaning |
//! |-------|---------|
//! | 0 | grip/drop: `> 0.5` grips, `< -0.5` drops |
//! | 1 | base forward distance |
//! | 2 | base yaw delta (radians) |
//! | 3.. | joint position deltas |
//!
//! All motion values are per step; the pipeline divides them across substeps.

use crate::SimError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Threshold above which the grip channel requests a grip.
pub const GRIP_THRESHOLD: f32 = 0.5;

/// Threshold below which the grip channel requests a drop.
pub const DROP_THRESHOLD: f32 = -0.5;

/// What the grip channel asks for this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripRequest {
    /// Leave the gripper alone.
    None,
    /// Try to pick up an object.
    Grip,
    /// Try to release the held object.
    Drop,
}

impl GripRequest {
    /// Interprets the grip channel value.
    #[must_use]
    pub fn from_value(value: f32) -> Self {
        if value > GRIP_THRESHOLD {
            Self::Grip
        } else if value < DROP_THRESHOLD {
            Self::Drop
        } else {
            Self::None
        }
    }
}

/// Action buffer layout for a robot with `num_joints` joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActionLayout {
    /// Robot joint count.
    pub num_joints: usize,
}

impl ActionLayout {
    /// Index of the grip/drop channel.
    pub const GRIP: usize = 0;
    /// Index of the base forward channel.
    pub const BASE_FORWARD: usize = 1;
    /// Index of the base yaw channel.
    pub const BASE_YAW: usize = 2;
    /// Index of the first joint delta.
    pub const JOINT_OFFSET: usize = 3;

    /// Create a layout.
    #[must_use]
    pub const fn new(num_joints: usize) -> Self {
        Self { num_joints }
    }

    /// Floats per environment.
    #[must_use]
    pub const fn action_dim(&self) -> usize {
        Self::JOINT_OFFSET + self.num_joints
    }

    /// Checks a flattened buffer for `num_envs` environments.
    pub fn check_len(&self, actions: &[f32], num_envs: usize) -> crate::Result<()> {
        let expected = num_envs * self.action_dim();
        if actions.len() == expected {
            Ok(())
        } else {
            Err(SimError::ActionLengthMismatch {
                expected,
                actual: actions.len(),
            })
        }
    }

    /// The slice belonging to one environment.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is too short for `env`.
    #[must_use]
    pub fn env_actions<'a>(&self, actions: &'a [f32], env: usize) -> &'a [f32] {
        let dim = self.action_dim();
        let start = env * dim;
        assert!(
            start + dim <= actions.len(),
            "environment {env} out of range for action buffer of length {}",
            actions.len()
        );
        &actions[start..start + dim]
    }

    /// Grip request of one environment's action slice.
    #[must_use]
    pub fn grip_request(env_actions: &[f32]) -> GripRequest {
        GripRequest::from_value(env_actions[Self::GRIP])
    }

    /// Joint deltas of one environment's action slice.
    #[must_use]
    pub fn joint_deltas(env_actions: &[f32]) -> &[f32] {
        &env_actions[Self::JOINT_OFFSET..]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_grip_request_thresholds() {
        assert_eq!(GripRequest::from_value(0.51), GripRequest::Grip);
        assert_eq!(GripRequest::from_value(0.5), GripRequest::None);
        assert_eq!(GripRequest::from_value(-0.5), GripRequest::None);
        assert_eq!(GripRequest::from_value(-0.9), GripRequest::Drop);
    }

    #[test]
    fn test_env_slices() {
        let layout = ActionLayout::new(2);
        assert_eq!(layout.action_dim(), 5);
        let actions: Vec<f32> = (0..10).map(|i| i as f32).collect();
        layout.check_len(&actions, 2).unwrap();
        assert!(layout.check_len(&actions, 3).is_err());

        let env1 = layout.env_actions(&actions, 1);
        assert_eq!(env1[ActionLayout::BASE_FORWARD], 6.0);
        assert_eq!(ActionLayout::joint_deltas(env1), &[8.0, 9.0]);
        assert_eq!(ActionLayout::grip_request(env1), GripRequest::Grip);
    }

    #[test]
    #[should_panic(expected = "environment 2 out of range")]
    fn test_env_slice_out_of_range() {
        let layout = ActionLayout::new(0);
        let _ = layout.env_actions(&[0.0; 6], 2);
    }
}
