//! Error types for simulator configuration and inputs.

use thiserror::Error;

/// Errors raised while validating simulator configuration and per-step inputs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Environment count must be positive.
    #[error("invalid environment count: {0} (must be positive)")]
    InvalidEnvCount(usize),

    /// Substep count must be positive.
    #[error("invalid substep count: {0} (must be positive)")]
    InvalidSubsteps(usize),

    /// Camera sensor settings are out of range.
    #[error("invalid camera sensor: {width}x{height}, hfov {hfov} degrees")]
    InvalidSensor {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Horizontal field of view in degrees.
        hfov: f32,
    },

    /// The flattened action buffer has the wrong length.
    #[error("action buffer length mismatch: expected {expected}, got {actual}")]
    ActionLengthMismatch {
        /// `num_envs × action_dim`.
        expected: usize,
        /// Length provided.
        actual: usize,
    },

    /// The reset buffer has the wrong length.
    #[error("reset buffer length mismatch: expected {expected}, got {actual}")]
    ResetLengthMismatch {
        /// `num_envs`.
        expected: usize,
        /// Length provided.
        actual: usize,
    },

    /// Joint limits are inverted or not finite.
    #[error("joint {joint} has invalid limits [{min}, {max}]")]
    InvalidJointLimits {
        /// Joint index.
        joint: usize,
        /// Lower limit.
        min: f32,
        /// Upper limit.
        max: f32,
    },
}

impl SimError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        !matches!(
            self,
            Self::ActionLengthMismatch { .. } | Self::ResetLengthMismatch { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::InvalidEnvCount(0);
        assert!(err.to_string().contains('0'));

        let err = SimError::ActionLengthMismatch {
            expected: 12,
            actual: 10,
        };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("10"));

        let err = SimError::invalid_config("episode set path is empty");
        assert!(err.to_string().contains("episode set path"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(SimError::invalid_config("bad").is_config_error());
        assert!(SimError::InvalidSubsteps(0).is_config_error());
        assert!(
            !SimError::ResetLengthMismatch {
                expected: 4,
                actual: 3
            }
            .is_config_error()
        );
    }
}
