//! Sphere contact primitives shared by the grids and the simulator.
//!
//! All tests here are boundary-exclusive: a sphere whose surface exactly
//! touches a box is *not* in contact.

use nalgebra::{Isometry3, Point3};
use smallvec::SmallVec;

use crate::aabb::Aabb;

/// Indices collected by [`batch_sphere_oriented_box_contact_test`].
pub type ContactHits = SmallVec<[usize; 8]>;

/// Tests a sphere against an axis-aligned box.
///
/// Returns true iff the distance from `center` to the box is strictly less
/// than `radius`.
///
/// # Example
///
/// ```
/// use batch_spatial::{Aabb, sphere_box_contact_test};
/// use nalgebra::Point3;
///
/// let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
/// assert!(sphere_box_contact_test(&Point3::new(1.5, 0.5, 0.5), 0.6, &aabb));
/// assert!(!sphere_box_contact_test(&Point3::new(1.5, 0.5, 0.5), 0.4, &aabb));
/// ```
#[must_use]
pub fn sphere_box_contact_test(center: &Point3<f32>, radius: f32, aabb: &Aabb) -> bool {
    aabb.distance_squared(center) < radius * radius
}

/// Maps a world-space point into the local frame of `transform`.
#[must_use]
pub fn inverse_transform_point(transform: &Isometry3<f32>, point: &Point3<f32>) -> Point3<f32> {
    transform.inverse_transform_point(point)
}

/// Tests `N` sphere/oriented-box pairs given as parallel arrays.
///
/// Pair `i` is the sphere at `sphere_positions[i]` (world space, squared
/// radius `sphere_radius_sq`) against the box `box_ranges[i]` expressed in the
/// local frame `box_transforms[i]`. Only the indices of pairs in contact are
/// returned, in ascending order, and collection stops once `max_collected`
/// hits have been found.
///
/// The fixed batch size lets callers gather candidate pairs from several
/// obstacles and spheres and pay the dispatch cost once per batch.
#[must_use]
pub fn batch_sphere_oriented_box_contact_test<const N: usize>(
    box_transforms: &[&Isometry3<f32>; N],
    sphere_positions: &[&Point3<f32>; N],
    sphere_radius_sq: f32,
    box_ranges: &[&Aabb; N],
    max_collected: usize,
) -> ContactHits {
    let mut hits = ContactHits::new();
    if max_collected == 0 {
        return hits;
    }
    for i in 0..N {
        let local = box_transforms[i].inverse_transform_point(sphere_positions[i]);
        if box_ranges[i].distance_squared(&local) < sphere_radius_sq {
            hits.push(i);
            if hits.len() == max_collected {
                break;
            }
        }
    }
    hits
}
