//! Shared scenes for unit tests.

#![allow(clippy::unwrap_used)]

use batch_spatial::{Aabb, ColumnGridSet, ColumnGridSource};
use batch_types::EpisodeGenerationParams;
use nalgebra::{Point3, Vector3};

use crate::collection::{Collection, FreeObjectEntry, RobotEntry, RobotLinkEntry, Sphere};
use crate::episode::FixedObject;
use crate::robot_model::RobotModel;

pub(crate) const RADII: [f32; 2] = [0.015, 0.05];

/// A 6 x 4 m room with a floor at y = 0 and a ceiling at y = 2.5.
pub(crate) fn shelf_room(name: &str) -> FixedObject {
    let grids = RADII
        .iter()
        .map(|&r| {
            let mut grid = ColumnGridSource::new(-1.0, -2.0, 60, 40, 0.1, r).unwrap();
            grid.fill_uniform(r, 2.5 - r);
            grid
        })
        .collect();
    FixedObject::new(name, ColumnGridSet::from_grids(grids))
}

pub(crate) fn arm_entry() -> RobotEntry {
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

pub(crate) fn shelf_collection() -> Collection {
    let can = Aabb::new(Point3::new(-0.04, -0.04, 0.0), Point3::new(0.04, 0.04, 0.12));
    Collection::new(RADII.to_vec())
        .with_free_object(FreeObjectEntry::generated("can", can, "uprightCylinder"))
        .with_free_object(FreeObjectEntry::new(
            "ball",
            Aabb::from_center(Point3::origin(), Vector3::repeat(0.05)),
            vec![Sphere::new(Point3::origin(), 0.05)],
        ))
        .with_robot(arm_entry())
}

pub(crate) fn shelf_params() -> EpisodeGenerationParams {
    EpisodeGenerationParams::default()
        .with_num_episodes(4)
        .with_target_num_spawns(8)
        .with_seed(7)
}

/// Two-link arm with half-meter links, spheres applied from [`arm_entry`].
pub(crate) fn arm() -> RobotModel {
    let mut model = RobotModel::n_link_arm("arm", 2, 0.5);
    model.update_from_collection(&shelf_collection()).unwrap();
    model
}
