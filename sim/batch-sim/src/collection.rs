//! Collision metadata for free objects and robots.
//!
//! A [`Collection`] is the hot-reloadable JSON document that describes the
//! collision proxies of every free object and robot link: boxes, explicit
//! spheres, and rules for generating spheres from a box. Sphere radii must
//! come from a small working set, since each radius class has its own
//! column grid per stage.
//!
//! Field names are camelCase on disk.

use std::fs;
use std::path::Path;

use batch_spatial::Aabb;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BatchError, BatchResult};

/// Radius of the larger spheres placed by generation techniques.
pub const MEDIUM_SPHERE_RADIUS: f32 = 0.05;

/// Radius of the smaller spheres placed by generation techniques.
pub const SMALL_SPHERE_RADIUS: f32 = 0.015;

/// A collision sphere in some local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    /// Center in the owner's local frame.
    pub origin: Point3<f32>,
    /// Radius; must be in the collection's radius working set.
    pub radius: f32,
}

impl Sphere {
    /// Creates a sphere.
    #[must_use]
    pub const fn new(origin: Point3<f32>, radius: f32) -> Self {
        Self { origin, radius }
    }
}

/// Local-frame box of a free object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionBox {
    /// Lower corner.
    pub min: Point3<f32>,
    /// Upper corner.
    pub max: Point3<f32>,
}

impl CollisionBox {
    /// The box as an [`Aabb`].
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.min, self.max)
    }
}

impl From<Aabb> for CollisionBox {
    fn from(aabb: Aabb) -> Self {
        Self {
            min: aabb.min,
            max: aabb.max,
        }
    }
}

/// How a free object's collision spheres are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SphereTechnique {
    /// Use the spheres listed in the collection.
    Explicit,
    /// Spheres at the 8 box corners.
    Box,
    /// Spheres at the rim points of the bottom and top faces.
    UprightCylinder,
}

impl SphereTechnique {
    /// Parses a technique name as written in the collection.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::UnknownSphereTechnique`] for any other name.
    pub fn parse(name: &str) -> BatchResult<Self> {
        match name {
            "" => Ok(Self::Explicit),
            "box" => Ok(Self::Box),
            "uprightCylinder" => Ok(Self::UprightCylinder),
            other => Err(BatchError::UnknownSphereTechnique {
                technique: other.to_string(),
            }),
        }
    }
}

/// Collision description of one free object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeObjectEntry {
    /// Object name, matching the episode set's free-object template.
    pub name: String,
    /// Local-frame bounds. Z is up in this frame.
    pub collision_box: CollisionBox,
    /// `""`, `"box"` or `"uprightCylinder"`.
    #[serde(default)]
    pub generate_collision_spheres_technique: String,
    /// Explicit spheres, used when no technique is set.
    #[serde(default)]
    pub collision_spheres: Vec<Sphere>,
}

impl FreeObjectEntry {
    /// Creates an entry with explicit spheres.
    #[must_use]
    pub fn new(name: impl Into<String>, collision_box: Aabb, spheres: Vec<Sphere>) -> Self {
        Self {
            name: name.into(),
            collision_box: collision_box.into(),
            generate_collision_spheres_technique: String::new(),
            collision_spheres: spheres,
        }
    }

    /// Creates an entry whose spheres are generated with `technique`.
    #[must_use]
    pub fn generated(
        name: impl Into<String>,
        collision_box: Aabb,
        technique: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            collision_box: collision_box.into(),
            generate_collision_spheres_technique: technique.into(),
            collision_spheres: Vec::new(),
        }
    }

    /// The spheres this entry resolves to.
    ///
    /// Generated spheres are pulled inside the box without crossing its
    /// center, and duplicates (same origin) are removed keeping the first
    /// occurrence, so larger spheres win over smaller ones.
    ///
    /// # Errors
    ///
    /// Fails for an unknown technique, when generation yields nothing, or
    /// when no technique is set and no spheres are listed.
    pub fn resolve_collision_spheres(&self) -> BatchResult<Vec<Sphere>> {
        let technique = SphereTechnique::parse(&self.generate_collision_spheres_technique)?;
        if technique == SphereTechnique::Explicit {
            if self.collision_spheres.is_empty() {
                return Err(BatchError::NoCollisionSpheres {
                    name: self.name.clone(),
                });
            }
            return Ok(self.collision_spheres.clone());
        }

        let aabb = self.collision_box.aabb();
        let mut spheres = match technique {
            SphereTechnique::Box => box_corner_spheres(&aabb),
            _ => upright_cylinder_spheres(&aabb),
        };
        for sphere in &mut spheres {
            sphere.origin = clamp_inside(&aabb, &sphere.origin, sphere.radius);
        }
        remove_duplicate_origins(&mut spheres);

        if spheres.is_empty() {
            return Err(BatchError::NoCollisionSpheres {
                name: self.name.clone(),
            });
        }
        debug!(
            name = %self.name,
            technique = %self.generate_collision_spheres_technique,
            count = spheres.len(),
            "Generated free object collision spheres"
        );
        Ok(spheres)
    }
}

fn box_corner_spheres(aabb: &Aabb) -> Vec<Sphere> {
    let size = aabb.size();
    let mut spheres = Vec::with_capacity(16);
    for radius in [MEDIUM_SPHERE_RADIUS, SMALL_SPHERE_RADIUS] {
        if size.norm() < radius * 2.0 || size.z < radius * 2.0 {
            continue;
        }
        spheres.extend(aabb.corners().iter().map(|corner| Sphere::new(*corner, radius)));
    }
    spheres
}

fn upright_cylinder_spheres(aabb: &Aabb) -> Vec<Sphere> {
    let size = aabb.size();
    let center = aabb.center();
    let mut spheres = Vec::with_capacity(16);
    for radius in [MEDIUM_SPHERE_RADIUS, SMALL_SPHERE_RADIUS] {
        if size.norm() < radius * 2.0 {
            continue;
        }
        for z in [aabb.min.z, aabb.max.z] {
            for dim in 0..2 {
                let other = 1 - dim;
                let mut low = Point3::new(0.0, 0.0, z);
                low[dim] = aabb.min[dim];
                low[other] = center[other];
                let mut high = low;
                high[dim] = aabb.max[dim];
                spheres.push(Sphere::new(low, radius));
                spheres.push(Sphere::new(high, radius));
            }
        }
    }
    spheres
}

/// Moves `origin` inward by `radius` per axis, never past the box center.
fn clamp_inside(aabb: &Aabb, origin: &Point3<f32>, radius: f32) -> Point3<f32> {
    let center = aabb.center();
    let mut clamped = *origin;
    for dim in 0..3 {
        clamped[dim] = if origin[dim] < center[dim] {
            origin[dim].clamp((aabb.min[dim] + radius).min(center[dim]), center[dim])
        } else {
            origin[dim].clamp(center[dim], (aabb.max[dim] - radius).max(center[dim]))
        };
    }
    clamped
}

#[allow(clippy::float_cmp)]
fn remove_duplicate_origins(spheres: &mut Vec<Sphere>) {
    for i in (0..spheres.len()).rev() {
        if spheres[..i].iter().any(|other| other.origin == spheres[i].origin) {
            spheres.remove(i);
        }
    }
}

/// Collision spheres attached to one robot link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotLinkEntry {
    /// Link name.
    pub link_name: String,
    /// Spheres in the link's local frame.
    pub collision_spheres: Vec<Sphere>,
}

/// Collision and gripper description of a robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotEntry {
    /// Robot name, matching the robot model.
    pub name: String,
    /// Per-link spheres.
    pub links: Vec<RobotLinkEntry>,
    /// Link the gripper query sphere is attached to.
    pub gripper_link: String,
    /// Query sphere center in the gripper link's frame.
    pub gripper_query_offset: Vector3<f32>,
    /// Query sphere radius.
    pub gripper_query_radius: f32,
}

/// The full collision metadata document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Allowed sphere radii; the position of a radius is its radius class.
    pub collision_radius_working_set: Vec<f32>,
    /// Free-object entries.
    #[serde(default)]
    pub free_objects: Vec<FreeObjectEntry>,
    /// Robot entries.
    #[serde(default)]
    pub robots: Vec<RobotEntry>,
}

impl Collection {
    /// Creates an empty collection with the given radius working set.
    #[must_use]
    pub fn new(collision_radius_working_set: Vec<f32>) -> Self {
        Self {
            collision_radius_working_set,
            ..Default::default()
        }
    }

    /// Adds a free-object entry.
    #[must_use]
    pub fn with_free_object(mut self, entry: FreeObjectEntry) -> Self {
        self.free_objects.push(entry);
        self
    }

    /// Adds a robot entry.
    #[must_use]
    pub fn with_robot(mut self, entry: RobotEntry) -> Self {
        self.robots.push(entry);
        self
    }

    /// Parses a collection from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Json`] for malformed input.
    pub fn from_json_str(text: &str) -> BatchResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a collection from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Io`] or [`BatchError::Json`].
    pub fn load_json<P: AsRef<Path>>(path: P) -> BatchResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| BatchError::io(path, e))?;
        let collection = Self::from_json_str(&text)?;
        debug!(
            path = %path.display(),
            free_objects = collection.free_objects.len(),
            robots = collection.robots.len(),
            "Loaded collection"
        );
        Ok(collection)
    }

    /// Writes the collection as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Io`] or [`BatchError::Json`].
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> BatchResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|e| BatchError::io(path, e))
    }

    /// The radius class of `radius`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::RadiusNotInWorkingSet`] unless `radius` is
    /// exactly one of the working-set radii.
    #[allow(clippy::float_cmp)]
    pub fn collision_radius_index(&self, radius: f32) -> BatchResult<usize> {
        self.collision_radius_working_set
            .iter()
            .position(|&r| r == radius)
            .ok_or(BatchError::RadiusNotInWorkingSet { radius })
    }

    /// Largest radius in the working set, or 0 when it is empty.
    #[must_use]
    pub fn max_collision_radius(&self) -> f32 {
        self.collision_radius_working_set
            .iter()
            .copied()
            .fold(0.0, f32::max)
    }

    /// Looks up a free-object entry by name.
    #[must_use]
    pub fn free_object(&self, name: &str) -> Option<&FreeObjectEntry> {
        self.free_objects.iter().find(|entry| entry.name == name)
    }

    /// Looks up a robot entry by name.
    #[must_use]
    pub fn robot(&self, name: &str) -> Option<&RobotEntry> {
        self.robots.iter().find(|entry| entry.name == name)
    }
}
