//! Kinematic robot description and the articulation seam.
//!
//! The simulator only needs two things from an articulated-body engine:
//! integrating joint positions from per-substep deltas, and producing link
//! transforms from joint positions. [`ArticulationEngine`] captures that
//! contract; [`RobotModel`] implements it with a plain serial/tree forward
//! kinematics pass and also carries the collision spheres and gripper query
//! loaded from a [`Collection`](crate::Collection).

use batch_types::{JointLimits, JointType, SimError};
use hashbrown::HashMap;
use nalgebra::{Isometry3, Point3, Translation3, Unit, UnitQuaternion, Vector3};
use tracing::debug;

use crate::collection::Collection;
use crate::error::{BatchError, BatchResult};

/// Joint integration and forward kinematics for one robot.
///
/// Implementations must be pure functions of their inputs so that every
/// environment can share one engine.
pub trait ArticulationEngine: Send + Sync {
    /// Number of joint coordinates.
    fn num_joints(&self) -> usize;

    /// Number of links.
    fn num_links(&self) -> usize;

    /// Adds `deltas` to `positions`, respecting joint limits.
    fn integrate_joints(&self, positions: &mut [f32], deltas: &[f32]);

    /// Writes each link's world transform into `out`, given the robot root.
    fn compute_link_transforms(
        &self,
        root: &Isometry3<f32>,
        positions: &[f32],
        out: &mut [Isometry3<f32>],
    );
}

/// A rigid link attached to its parent by at most one joint.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Unique link name.
    pub name: String,
    /// Parent link, or `None` for links attached to the robot root.
    pub parent: Option<usize>,
    /// Joint connecting this link to its parent.
    pub joint_type: JointType,
    /// Joint axis in the joint frame.
    pub joint_axis: Unit<Vector3<f32>>,
    /// Joint frame relative to the parent link frame.
    pub origin: Isometry3<f32>,
    /// Joint limits, used by integration.
    pub limits: JointLimits,
    /// Index into the joint position array, assigned on insertion.
    pub joint_index: Option<usize>,
}

impl Link {
    /// A link rigidly attached to its parent.
    #[must_use]
    pub fn fixed(name: impl Into<String>, parent: Option<usize>, origin: Isometry3<f32>) -> Self {
        Self {
            name: name.into(),
            parent,
            joint_type: JointType::Fixed,
            joint_axis: Vector3::z_axis(),
            origin,
            limits: JointLimits::unlimited(),
            joint_index: None,
        }
    }

    /// A link rotating about `axis`.
    #[must_use]
    pub fn revolute(
        name: impl Into<String>,
        parent: Option<usize>,
        origin: Isometry3<f32>,
        axis: Unit<Vector3<f32>>,
        limits: JointLimits,
    ) -> Self {
        Self {
            joint_type: JointType::Revolute,
            joint_axis: axis,
            limits,
            ..Self::fixed(name, parent, origin)
        }
    }

    /// A link sliding along `axis`.
    #[must_use]
    pub fn prismatic(
        name: impl Into<String>,
        parent: Option<usize>,
        origin: Isometry3<f32>,
        axis: Unit<Vector3<f32>>,
        limits: JointLimits,
    ) -> Self {
        Self {
            joint_type: JointType::Prismatic,
            joint_axis: axis,
            limits,
            ..Self::fixed(name, parent, origin)
        }
    }

    fn joint_motion(&self, position: f32) -> Isometry3<f32> {
        match self.joint_type {
            JointType::Fixed => Isometry3::identity(),
            JointType::Revolute => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&self.joint_axis, position),
            ),
            JointType::Prismatic => Isometry3::from_parts(
                Translation3::from(self.joint_axis.into_inner() * position),
                UnitQuaternion::identity(),
            ),
        }
    }
}

/// A robot collision sphere in its link's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionSphere {
    /// Owning link.
    pub link: usize,
    /// Center in the link frame.
    pub origin: Point3<f32>,
    /// Radius class in the collection's working set.
    pub radius_idx: usize,
    /// Radius.
    pub radius: f32,
}

/// Kinematic tree, collision spheres and gripper of a robot.
#[derive(Debug, Clone)]
pub struct RobotModel {
    name: String,
    links: Vec<Link>,
    num_joints: usize,
    link_index_by_name: HashMap<String, usize>,
    collision_spheres: Vec<CollisionSphere>,
    spheres_by_link: Vec<Vec<usize>>,
    gripper_link: usize,
    gripper_query_offset: Vector3<f32>,
    gripper_query_radius: f32,
}

impl RobotModel {
    /// Creates a robot with no links.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
            num_joints: 0,
            link_index_by_name: HashMap::new(),
            collision_spheres: Vec::new(),
            spheres_by_link: Vec::new(),
            gripper_link: 0,
            gripper_query_offset: Vector3::zeros(),
            gripper_query_radius: 0.0,
        }
    }

    /// Creates an upright serial arm of `n` revolute links.
    ///
    /// A fixed `base` link sits at the root; each following link `link_{i}`
    /// rotates about its local Z axis and is offset `link_length` up (+Y)
    /// from its parent. The gripper defaults to the tip of the last link.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn n_link_arm(name: impl Into<String>, n: usize, link_length: f32) -> Self {
        assert!(n >= 1, "n_link_arm requires at least 1 link");
        let mut model = Self::new(name);
        let mut links = vec![Link::fixed("base", None, Isometry3::identity())];
        for i in 0..n {
            let offset = if i == 0 { 0.0 } else { link_length };
            links.push(Link::revolute(
                format!("link_{i}"),
                Some(i),
                Isometry3::translation(0.0, offset, 0.0),
                Vector3::z_axis(),
                JointLimits::symmetric(std::f32::consts::PI),
            ));
        }
        for link in links {
            // Names are unique and parents precede children by construction.
            if model.add_link(link).is_err() {
                unreachable!("n_link_arm links are valid");
            }
        }
        model.gripper_link = n;
        model.gripper_query_offset = Vector3::new(0.0, link_length, 0.0);
        model.gripper_query_radius = link_length * 0.5;
        model
    }

    /// Appends a link and returns its index.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken, the parent does not precede the link, or
    /// the joint limits are invalid.
    pub fn add_link(&mut self, mut link: Link) -> BatchResult<usize> {
        let index = self.links.len();
        if self.link_index_by_name.contains_key(&link.name) {
            return Err(SimError::invalid_config(format!("duplicate link name {}", link.name)).into());
        }
        if let Some(parent) = link.parent
            && parent >= index
        {
            return Err(SimError::invalid_config(format!(
                "link {} has parent {parent}, which does not precede it",
                link.name
            ))
            .into());
        }
        if link.joint_type.dof() > 0 {
            if !link.limits.is_valid() {
                return Err(SimError::InvalidJointLimits {
                    joint: self.num_joints,
                    min: link.limits.min,
                    max: link.limits.max,
                }
                .into());
            }
            link.joint_index = Some(self.num_joints);
            self.num_joints += 1;
        } else {
            link.joint_index = None;
        }
        self.link_index_by_name.insert(link.name.clone(), index);
        self.links.push(link);
        self.spheres_by_link.push(Vec::new());
        Ok(index)
    }

    /// Robot name, used to find its collection entry.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All links in topological order.
    #[must_use]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Index of a named link.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::UnknownLink`] for an unknown name.
    pub fn link_index(&self, name: &str) -> BatchResult<usize> {
        self.link_index_by_name
            .get(name)
            .copied()
            .ok_or_else(|| BatchError::UnknownLink {
                name: name.to_string(),
            })
    }

    /// All collision spheres.
    #[must_use]
    pub fn collision_spheres(&self) -> &[CollisionSphere] {
        &self.collision_spheres
    }

    /// Indices of the spheres attached to `link`.
    #[must_use]
    pub fn spheres_of_link(&self, link: usize) -> &[usize] {
        &self.spheres_by_link[link]
    }

    /// Link carrying the gripper query sphere.
    #[must_use]
    pub const fn gripper_link(&self) -> usize {
        self.gripper_link
    }

    /// Gripper query center in the gripper link frame.
    #[must_use]
    pub const fn gripper_query_offset(&self) -> &Vector3<f32> {
        &self.gripper_query_offset
    }

    /// Gripper query radius.
    #[must_use]
    pub const fn gripper_query_radius(&self) -> f32 {
        self.gripper_query_radius
    }

    /// Per-joint limits in joint order.
    #[must_use]
    pub fn joint_limits(&self) -> Vec<JointLimits> {
        self.links
            .iter()
            .filter(|link| link.joint_index.is_some())
            .map(|link| link.limits)
            .collect()
    }

    /// Joint positions at the start of an episode: zero, clamped into limits.
    #[must_use]
    pub fn start_joint_positions(&self) -> Vec<f32> {
        self.joint_limits().iter().map(|limits| limits.clamp(0.0)).collect()
    }

    /// Replaces spheres and gripper settings with the collection's entry.
    ///
    /// # Errors
    ///
    /// Fails if the collection has no entry for this robot, an entry names an
    /// unknown link, or a sphere radius is outside the working set.
    pub fn update_from_collection(&mut self, collection: &Collection) -> BatchResult<()> {
        let entry = collection
            .robot(&self.name)
            .ok_or_else(|| BatchError::UnknownRobot {
                name: self.name.clone(),
            })?;

        let mut spheres = Vec::new();
        for link_entry in &entry.links {
            let link = self.link_index(&link_entry.link_name)?;
            for sphere in &link_entry.collision_spheres {
                spheres.push(CollisionSphere {
                    link,
                    origin: sphere.origin,
                    radius_idx: collection.collision_radius_index(sphere.radius)?,
                    radius: sphere.radius,
                });
            }
        }
        let gripper_link = self.link_index(&entry.gripper_link)?;

        let mut spheres_by_link = vec![Vec::new(); self.links.len()];
        for (i, sphere) in spheres.iter().enumerate() {
            spheres_by_link[sphere.link].push(i);
        }
        self.collision_spheres = spheres;
        self.spheres_by_link = spheres_by_link;
        self.gripper_link = gripper_link;
        self.gripper_query_offset = entry.gripper_query_offset;
        self.gripper_query_radius = entry.gripper_query_radius;

        debug!(
            robot = %self.name,
            spheres = self.collision_spheres.len(),
            "Updated robot from collection"
        );
        Ok(())
    }
}

impl ArticulationEngine for RobotModel {
    fn num_joints(&self) -> usize {
        self.num_joints
    }

    fn num_links(&self) -> usize {
        self.links.len()
    }

    fn integrate_joints(&self, positions: &mut [f32], deltas: &[f32]) {
        for link in &self.links {
            if let Some(j) = link.joint_index {
                positions[j] = link.limits.clamp(positions[j] + deltas[j]);
            }
        }
    }

    fn compute_link_transforms(
        &self,
        root: &Isometry3<f32>,
        positions: &[f32],
        out: &mut [Isometry3<f32>],
    ) {
        for (i, link) in self.links.iter().enumerate() {
            let parent = link.parent.map_or(*root, |p| out[p]);
            let position = link.joint_index.map_or(0.0, |j| positions[j]);
            out[i] = parent * link.origin * link.joint_motion(position);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::collection::{RobotEntry, RobotLinkEntry, Sphere};
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    fn arm_entry() -> RobotEntry {
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

    #[test]
    fn test_n_link_arm_structure() {
        let arm = RobotModel::n_link_arm("arm", 3, 0.5);
        assert_eq!(arm.num_links(), 4);
        assert_eq!(arm.num_joints(), 3);
        assert_eq!(arm.link_index("link_2").unwrap(), 3);
        assert!(matches!(arm.link_index("hand"), Err(BatchError::UnknownLink { .. })));
        assert_eq!(arm.start_joint_positions(), vec![0.0; 3]);
    }

    #[test]
    fn test_forward_kinematics_straight_and_bent() {
        let arm = RobotModel::n_link_arm("arm", 2, 0.5);
        let root = Isometry3::translation(1.0, 0.0, 2.0);
        let mut out = vec![Isometry3::identity(); arm.num_links()];

        arm.compute_link_transforms(&root, &[0.0, 0.0], &mut out);
        assert_relative_eq!(out[2].translation.vector, Vector3::new(1.0, 0.5, 2.0), epsilon = 1e-6);

        // Bending the first joint by 90 degrees about Z swings the second
        // link toward -X.
        arm.compute_link_transforms(&root, &[FRAC_PI_2, 0.0], &mut out);
        assert_relative_eq!(out[2].translation.vector, Vector3::new(0.5, 0.0, 2.0), epsilon = 1e-6);
    }

    #[test]
    fn test_prismatic_joint() {
        let mut robot = RobotModel::new("slider");
        robot
            .add_link(Link::prismatic(
                "carriage",
                None,
                Isometry3::identity(),
                Vector3::x_axis(),
                JointLimits::new(0.0, 1.0),
            ))
            .unwrap();
        let mut positions = vec![0.0];
        robot.integrate_joints(&mut positions, &[1.5]);
        assert_eq!(positions[0], 1.0);

        let mut out = vec![Isometry3::identity()];
        robot.compute_link_transforms(&Isometry3::identity(), &positions, &mut out);
        assert_relative_eq!(out[0].translation.x, 1.0);
    }

    #[test]
    fn test_integrate_clamps_to_limits() {
        let arm = RobotModel::n_link_arm("arm", 2, 0.5);
        let mut positions = vec![3.0, -1.0];
        arm.integrate_joints(&mut positions, &[1.0, 0.25]);
        assert_eq!(positions[0], std::f32::consts::PI);
        assert_eq!(positions[1], -0.75);
    }

    #[test]
    fn test_add_link_validation() {
        let mut robot = RobotModel::new("bad");
        robot.add_link(Link::fixed("a", None, Isometry3::identity())).unwrap();
        assert!(robot.add_link(Link::fixed("a", None, Isometry3::identity())).is_err());
        assert!(robot.add_link(Link::fixed("b", Some(5), Isometry3::identity())).is_err());
        let inverted = Link::revolute(
            "c",
            Some(0),
            Isometry3::identity(),
            Vector3::z_axis(),
            JointLimits::new(1.0, -1.0),
        );
        assert!(matches!(
            robot.add_link(inverted),
            Err(BatchError::Config(SimError::InvalidJointLimits { .. }))
        ));
    }

    #[test]
    fn test_update_from_collection() {
        let collection = Collection::new(vec![0.015, 0.05]).with_robot(arm_entry());
        let mut arm = RobotModel::n_link_arm("arm", 2, 0.5);
        arm.update_from_collection(&collection).unwrap();

        assert_eq!(arm.collision_spheres().len(), 3);
        assert_eq!(arm.collision_spheres()[0].radius_idx, 1);
        assert_eq!(arm.collision_spheres()[2].radius_idx, 0);
        assert_eq!(arm.spheres_of_link(2), &[1, 2]);
        assert!(arm.spheres_of_link(0).is_empty());
        assert_eq!(arm.gripper_link(), 2);
        assert_eq!(arm.gripper_query_radius(), 0.1);
    }

    #[test]
    fn test_update_from_collection_errors() {
        let mut arm = RobotModel::n_link_arm("arm", 2, 0.5);
        assert!(matches!(
            arm.update_from_collection(&Collection::new(vec![0.05])),
            Err(BatchError::UnknownRobot { .. })
        ));

        // 0.015 is missing from the working set.
        let collection = Collection::new(vec![0.05]).with_robot(arm_entry());
        assert!(matches!(
            arm.update_from_collection(&collection),
            Err(BatchError::RadiusNotInWorkingSet { .. })
        ));

        let mut entry = arm_entry();
        entry.gripper_link = "hand".into();
        let collection = Collection::new(vec![0.015, 0.05]).with_robot(entry);
        assert!(matches!(
            arm.update_from_collection(&collection),
            Err(BatchError::UnknownLink { .. })
        ));
    }
}
