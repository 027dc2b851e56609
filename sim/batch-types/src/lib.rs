//! Core types for the batched embodied-agent simulator.
//!
//! This crate provides the data shared between the simulator and its callers:
//!
//! - [`BatchedSimulatorConfig`] - Environment count, camera, substeps, threading
//! - [`EpisodeSource`] and [`EpisodeGenerationParams`] - Where episodes come from
//! - [`EnvironmentState`] - Per-environment snapshot published after each step
//! - [`ActionLayout`] - Layout of the flattened action buffer
//! - [`StatRecord`] - Aggregate counters
//! - [`JointType`] and [`JointLimits`] - Robot joint descriptions
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They carry no physics and no threading, so
//! they can be shared by the simulator, training loops and analysis tools.
//!
//! # Coordinate System
//!
//! - X: right
//! - Y: up
//! - Z: toward the viewer
//! - Right-handed, `f32`
//!
//! # Example
//!
//! ```
//! use batch_types::{ActionLayout, BatchedSimulatorConfig, GripRequest};
//!
//! let config = BatchedSimulatorConfig::new(64).with_substeps(2).synchronous();
//! assert!(config.validate().is_ok());
//!
//! let layout = ActionLayout::new(7);
//! let actions = vec![0.0; config.num_envs * layout.action_dim()];
//! let env3 = layout.env_actions(&actions, 3);
//! assert_eq!(ActionLayout::grip_request(env3), GripRequest::None);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod action;
mod config;
mod error;
mod joint;
mod state;
mod stats;

pub use action::{ActionLayout, DROP_THRESHOLD, GRIP_THRESHOLD, GripRequest};
pub use config::{BatchedSimulatorConfig, CameraSensorConfig, EpisodeGenerationParams, EpisodeSource};
pub use error::SimError;
pub use joint::{JointLimits, JointType};
pub use state::EnvironmentState;
pub use stats::StatRecord;

// Re-export math types for convenience
pub use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector3};

/// Result type for simulator configuration and inputs.
pub type Result<T> = std::result::Result<T, SimError>;
