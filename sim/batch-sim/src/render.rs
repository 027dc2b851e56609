//! Render-side view of the simulation and the render backend seam.
//!
//! The simulator never draws anything itself. After each step it publishes
//! one [`EnvRenderState`] per environment; [`start_render`] packs those and
//! the debug instances into a [`RenderFrame`] for a [`RenderBackend`].
//!
//! [`start_render`]: crate::BatchedSimulator::start_render

use batch_spatial::Aabb;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

/// Instance transforms of one environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvRenderState {
    /// Stage index in the episode set.
    pub stage: usize,
    /// Robot root followed by every link.
    pub robot_nodes: Vec<Isometry3<f32>>,
    /// `(free-object template, world pose)` per spawn.
    pub free_objects: Vec<(usize, Isometry3<f32>)>,
    /// Spawn held by the robot.
    pub held: Option<usize>,
}

/// A named instance drawn for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugInstance {
    /// Render asset name.
    pub name: String,
    /// Environment it is drawn in.
    pub env: usize,
    /// World transform.
    pub transform: Isometry3<f32>,
    /// Non-uniform scale applied before `transform`.
    pub scale: Vector3<f32>,
    /// Survives [`delete_debug_instances`](crate::BatchedSimulator::delete_debug_instances).
    pub persistent: bool,
    /// Draw back faces too.
    pub show_backfaces: bool,
}

impl DebugInstance {
    /// An unscaled instance.
    #[must_use]
    pub fn new(name: impl Into<String>, env: usize, transform: Isometry3<f32>, persistent: bool) -> Self {
        Self {
            name: name.into(),
            env,
            transform,
            scale: Vector3::repeat(1.0),
            persistent,
            show_backfaces: false,
        }
    }

    /// A unit-sphere asset scaled to `radius` at `center`.
    #[must_use]
    pub fn sphere(name: impl Into<String>, env: usize, center: &Point3<f32>, radius: f32) -> Self {
        Self {
            scale: Vector3::repeat(radius),
            ..Self::new(name, env, Isometry3::translation(center.x, center.y, center.z), false)
        }
    }

    /// A unit-cube asset stretched over `aabb` grown by `pad`, placed by
    /// `position` and `rotation`.
    #[must_use]
    pub fn oriented_box(
        name: impl Into<String>,
        env: usize,
        position: &Point3<f32>,
        rotation: &UnitQuaternion<f32>,
        aabb: &Aabb,
        pad: f32,
        show_backfaces: bool,
    ) -> Self {
        let padded = aabb.padded(pad);
        let local_center = padded.center();
        let transform = Isometry3::from_parts(Translation3::from(position.coords), *rotation)
            * Isometry3::translation(local_center.x, local_center.y, local_center.z);
        Self {
            scale: padded.size(),
            show_backfaces,
            ..Self::new(name, env, transform, false)
        }
    }
}

/// Where the camera is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraPlacement {
    /// A world-space pose shared by every environment.
    World {
        /// Camera position.
        position: Point3<f32>,
        /// Camera orientation.
        rotation: UnitQuaternion<f32>,
    },
    /// Attached to a robot link in every environment.
    Link {
        /// Link index.
        link: usize,
        /// Camera pose in the link frame.
        transform: Isometry3<f32>,
    },
}

impl Default for CameraPlacement {
    fn default() -> Self {
        Self::World {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }
}

impl CameraPlacement {
    /// Camera pose in one environment.
    ///
    /// `robot_nodes` are the environment's root and link transforms.
    #[must_use]
    pub fn world_transform(&self, robot_nodes: &[Isometry3<f32>]) -> Isometry3<f32> {
        match self {
            Self::World { position, rotation } => {
                Isometry3::from_parts(Translation3::from(position.coords), *rotation)
            }
            Self::Link { link, transform } => robot_nodes[link + 1] * transform,
        }
    }
}

/// Everything a backend needs to draw one frame.
#[derive(Debug, Clone, Default)]
pub struct RenderFrame {
    /// Per-environment instance transforms.
    pub envs: Vec<EnvRenderState>,
    /// Debug instances to draw this frame.
    pub debug_instances: Vec<DebugInstance>,
    /// Camera placement.
    pub camera: CameraPlacement,
}

/// A renderer consuming [`RenderFrame`]s.
///
/// `submit` may return before drawing finishes; `wait` blocks until the
/// submitted frame is done.
pub trait RenderBackend: Send {
    /// Starts drawing a frame.
    fn submit(&mut self, frame: &RenderFrame);

    /// Blocks until the last submitted frame is drawn.
    fn wait(&mut self);
}

/// A backend that draws nothing and counts frames.
#[derive(Debug, Clone, Default)]
pub struct HeadlessRenderer {
    frames_submitted: u64,
    frames_completed: u64,
    last_debug_instances: usize,
}

impl HeadlessRenderer {
    /// Creates a renderer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames submitted so far.
    #[must_use]
    pub const fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Frames waited on so far.
    #[must_use]
    pub const fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    /// Debug instance count of the last frame.
    #[must_use]
    pub const fn last_debug_instances(&self) -> usize {
        self.last_debug_instances
    }
}

impl RenderBackend for HeadlessRenderer {
    fn submit(&mut self, frame: &RenderFrame) {
        self.frames_submitted += 1;
        self.last_debug_instances = frame.debug_instances.len();
    }

    fn wait(&mut self) {
        self.frames_completed = self.frames_submitted;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_oriented_box_covers_padded_aabb() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f32::consts::FRAC_PI_2);
        let instance =
            DebugInstance::oriented_box("cube", 0, &Point3::new(5.0, 0.0, 0.0), &yaw, &aabb, 0.5, true);

        assert_relative_eq!(instance.scale, Vector3::new(3.0, 2.0, 2.0));
        // Local center (1, 0.5, 0.5) yawed 90 degrees about Y lands at (0.5, 0.5, -1).
        assert_relative_eq!(
            instance.transform.translation.vector,
            Vector3::new(5.5, 0.5, -1.0),
            epsilon = 1e-5
        );
        assert!(instance.show_backfaces);
        assert!(!instance.persistent);
    }

    #[test]
    fn test_camera_attached_to_link() {
        let nodes = [Isometry3::identity(), Isometry3::translation(0.0, 1.0, 0.0)];
        let camera = CameraPlacement::Link {
            link: 0,
            transform: Isometry3::translation(0.0, 0.2, 0.0),
        };
        assert_relative_eq!(camera.world_transform(&nodes).translation.y, 1.2);
        assert_eq!(
            CameraPlacement::default().world_transform(&nodes),
            Isometry3::identity()
        );
    }

    #[test]
    fn test_headless_counts_frames() {
        let mut renderer = HeadlessRenderer::new();
        let frame = RenderFrame {
            debug_instances: vec![DebugInstance::sphere("sphere", 0, &Point3::origin(), 0.1)],
            ..Default::default()
        };
        renderer.submit(&frame);
        assert_eq!(renderer.frames_submitted(), 1);
        assert_eq!(renderer.frames_completed(), 0);
        renderer.wait();
        assert_eq!(renderer.frames_completed(), 1);
        assert_eq!(renderer.last_debug_instances(), 1);
    }
}
