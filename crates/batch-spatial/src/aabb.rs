//! Axis-aligned boxes in single precision.

use nalgebra::{Isometry3, Point3, Vector3};

/// An axis-aligned bounding box.
///
/// Used both for object-local collision boxes (free-object templates) and for
/// world-space bounds of broadphase obstacles.
///
/// # Example
///
/// ```
/// use batch_spatial::Aabb;
/// use nalgebra::Point3;
///
/// let aabb = Aabb::new(Point3::new(1.0, 1.0, 1.0), Point3::new(-1.0, -1.0, -1.0));
/// assert_eq!(aabb.min, Point3::new(-1.0, -1.0, -1.0));
/// assert!(aabb.contains(&Point3::origin()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point3<f32>,
    /// Maximum corner.
    pub max: Point3<f32>,
}

impl Aabb {
    /// Creates a box from two corners, reordering them if necessary.
    #[must_use]
    pub fn new(a: Point3<f32>, b: Point3<f32>) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Creates a box centered at a point with the given half-extents.
    #[must_use]
    pub fn from_center(center: Point3<f32>, half_extents: Vector3<f32>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Full size along each axis.
    #[must_use]
    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Half-extents along each axis.
    #[must_use]
    pub fn half_extents(&self) -> Vector3<f32> {
        self.size() * 0.5
    }

    /// Checks if a point is inside. Points on the boundary count as inside.
    #[must_use]
    pub fn contains(&self, point: &Point3<f32>) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Checks if this box overlaps another (touching counts).
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Returns a copy grown by `margin` on every side.
    #[must_use]
    pub fn padded(&self, margin: f32) -> Self {
        let pad = Vector3::repeat(margin);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// The eight corners, min-Z face first.
    #[must_use]
    pub fn corners(&self) -> [Point3<f32>; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Point3::new(lo.x, lo.y, lo.z),
            Point3::new(hi.x, lo.y, lo.z),
            Point3::new(lo.x, hi.y, lo.z),
            Point3::new(hi.x, hi.y, lo.z),
            Point3::new(lo.x, lo.y, hi.z),
            Point3::new(hi.x, lo.y, hi.z),
            Point3::new(lo.x, hi.y, hi.z),
            Point3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// Squared distance from a point to the box (zero inside).
    #[must_use]
    pub fn distance_squared(&self, point: &Point3<f32>) -> f32 {
        let clamped = Point3::new(
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
            point.z.clamp(self.min.z, self.max.z),
        );
        (point - clamped).norm_squared()
    }

    /// Radius of the smallest origin-centered sphere containing the box.
    ///
    /// This is the conservative bound used for obstacles whose local frame
    /// origin is not at the box center.
    #[must_use]
    pub fn origin_bounding_radius(&self) -> f32 {
        let far = Vector3::new(
            self.min.x.abs().max(self.max.x.abs()),
            self.min.y.abs().max(self.max.y.abs()),
            self.min.z.abs().max(self.max.z.abs()),
        );
        far.norm()
    }

    /// World-space bounds of this local box under a rigid transform.
    #[must_use]
    pub fn transformed(&self, transform: &Isometry3<f32>) -> Self {
        let mut min = Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY);
        let mut max = Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY);
        for corner in self.corners() {
            let world = transform.transform_point(&corner);
            min = min.inf(&world);
            max = max.sup(&world);
        }
        Self { min, max }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Point3::origin(), Point3::origin())
    }
}
