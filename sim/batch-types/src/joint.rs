//! Joint types for the robot's kinematic tree.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Type of joint connecting a link to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JointType {
    /// Fixed joint - no relative motion allowed.
    #[default]
    Fixed,
    /// Revolute joint - rotation around a single axis.
    Revolute,
    /// Prismatic joint - translation along a single axis.
    Prismatic,
}

impl JointType {
    /// Get the number of degrees of freedom for this joint type.
    #[must_use]
    pub const fn dof(self) -> usize {
        match self {
            Self::Fixed => 0,
            Self::Revolute | Self::Prismatic => 1,
        }
    }
}

/// Position limits of a one-DOF joint.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointLimits {
    /// Minimum position (angle for revolute, distance for prismatic).
    pub min: f32,
    /// Maximum position.
    pub max: f32,
}

impl Default for JointLimits {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl JointLimits {
    /// Create limits with specified bounds.
    #[must_use]
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Create unlimited joint limits.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
        }
    }

    /// Create symmetric limits around zero.
    #[must_use]
    pub const fn symmetric(range: f32) -> Self {
        Self {
            min: -range,
            max: range,
        }
    }

    /// Clamp a position into the limits.
    #[must_use]
    pub fn clamp(&self, position: f32) -> f32 {
        position.clamp(self.min, self.max)
    }

    /// Whether the bounds are ordered and not NaN.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.min.is_nan() && !self.max.is_nan() && self.min <= self.max
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_dof() {
        assert_eq!(JointType::Fixed.dof(), 0);
        assert_eq!(JointType::Revolute.dof(), 1);
    }

    #[test]
    fn test_limits_clamp() {
        let limits = JointLimits::symmetric(1.5);
        assert_eq!(limits.clamp(2.0), 1.5);
        assert_eq!(limits.clamp(-0.3), -0.3);
        assert_eq!(JointLimits::unlimited().clamp(1e9), 1e9);
        assert!(limits.is_valid());
        assert!(!JointLimits::new(1.0, 0.0).is_valid());
    }
}
