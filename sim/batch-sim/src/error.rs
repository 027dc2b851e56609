//! Error types for the batched simulator.

use std::path::PathBuf;

use batch_spatial::SpatialError;
use batch_types::SimError;
use thiserror::Error;

/// Result type for simulator operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors raised while building, reloading or driving a batched simulator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BatchError {
    /// Configuration or per-step input was rejected.
    #[error(transparent)]
    Config(#[from] SimError),

    /// A column grid or broadphase operation failed.
    #[error(transparent)]
    Spatial(#[from] SpatialError),

    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The file being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A free object has no entry in the collection.
    #[error(
        "free object {name} is missing from the collection. If you hit this error during hot-reloading, try restarting the simulator"
    )]
    HotReloadMismatch {
        /// Free-object name.
        name: String,
    },

    /// A sphere-generation technique name is not recognized.
    #[error(
        "unknown collision sphere technique {technique:?}. Valid values are empty-string, \"box\", and \"uprightCylinder\""
    )]
    UnknownSphereTechnique {
        /// The technique as written in the collection.
        technique: String,
    },

    /// A free object ended up without any collision sphere.
    #[error("free object {name} has no collision spheres")]
    NoCollisionSpheres {
        /// Free-object name.
        name: String,
    },

    /// A sphere radius is not one of the collection's working-set radii.
    #[error("collision sphere radius {radius} is not in the radius working set")]
    RadiusNotInWorkingSet {
        /// The offending radius.
        radius: f32,
    },

    /// A free object named by the caller does not exist.
    #[error("unknown free object {name}")]
    UnknownFreeObject {
        /// The requested name.
        name: String,
    },

    /// A robot link named by the caller does not exist.
    #[error("unknown robot link {name}")]
    UnknownLink {
        /// The requested name.
        name: String,
    },

    /// The collection has no entry for the robot.
    #[error("robot {name} is missing from the collection")]
    UnknownRobot {
        /// Robot name.
        name: String,
    },

    /// An episode set references a stage that was not supplied.
    #[error("stage {name} was not supplied")]
    MissingStage {
        /// Stage name.
        name: String,
    },

    /// No stage was supplied.
    #[error("at least one stage is required")]
    NoStages,

    /// An episode set violates its structural invariants.
    #[error("invalid episode set: {reason}")]
    InvalidEpisodeSet {
        /// What is wrong.
        reason: String,
    },

    /// The physics worker thread could not be started.
    #[error("failed to spawn physics worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The physics worker thread is gone.
    #[error("physics worker disconnected")]
    WorkerDisconnected,
}

impl BatchError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid episode set error.
    pub fn invalid_episode_set(reason: impl Into<String>) -> Self {
        Self::InvalidEpisodeSet {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hot_reload_message() {
        let err = BatchError::HotReloadMismatch {
            name: "024_bowl".into(),
        };
        let text = err.to_string();
        assert!(text.contains("024_bowl"));
        assert!(text.contains("try restarting the simulator"));
    }

    #[test]
    fn test_technique_message_lists_valid_values() {
        let err = BatchError::UnknownSphereTechnique {
            technique: "sphere".into(),
        };
        assert!(err.to_string().contains("\"uprightCylinder\""));
    }

    #[test]
    fn test_from_conversions() {
        let err: BatchError = SimError::InvalidSubsteps(0).into();
        assert!(matches!(err, BatchError::Config(_)));
        let err: BatchError = SpatialError::InvalidSpacing(0.0).into();
        assert!(err.to_string().contains("spacing"));
    }
}
