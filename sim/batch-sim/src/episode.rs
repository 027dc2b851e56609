//! Episode descriptions and procedural episode generation.
//!
//! An [`EpisodeSet`] is immutable during simulation apart from collection hot
//! reloads. It owns the stages ([`FixedObject`]), the free-object templates,
//! and a flat list of spawn records that episodes reference by contiguous
//! range.

use std::f32::consts::{FRAC_PI_2, TAU};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use batch_spatial::{Aabb, CollisionBroadphaseGrid, ColumnGridSet, SpatialError};
use batch_types::EpisodeGenerationParams;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collection::Collection;
use crate::error::{BatchError, BatchResult};
use crate::placement::PlacementHelper;

/// Attempts at drawing a spawn position outside the robot exclusion box.
const MAX_EXCLUSION_RETRIES: usize = 1000;

/// A stage: static geometry represented by its column grids.
#[derive(Debug, Clone)]
pub struct FixedObject {
    /// Stage name.
    pub name: String,
    /// One grid per radius class.
    pub column_grids: Arc<ColumnGridSet>,
}

impl FixedObject {
    /// Creates a stage.
    #[must_use]
    pub fn new(name: impl Into<String>, column_grids: ColumnGridSet) -> Self {
        Self {
            name: name.into(),
            column_grids: Arc::new(column_grids),
        }
    }

    /// Loads a stage's grids from `{base}.{i}.columngrid` files.
    ///
    /// # Errors
    ///
    /// Propagates grid loading errors.
    pub fn load(
        name: impl Into<String>,
        base: impl AsRef<Path>,
        num_radii: usize,
    ) -> BatchResult<Self> {
        Ok(Self::new(name, ColumnGridSet::load(base, num_radii)?))
    }

    /// Horizontal extent `(min_x, min_z, max_x, max_z)` of the first grid.
    ///
    /// # Errors
    ///
    /// Fails if the stage has no grids.
    pub fn extent(&self) -> BatchResult<(f32, f32, f32, f32)> {
        let grid = self.column_grids.grid(0)?;
        Ok((grid.min_x(), grid.min_z(), grid.max_x(), grid.max_z()))
    }
}

/// A free-object collision sphere in the object's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeObjectSphere {
    /// Center in the object frame.
    pub origin: Point3<f32>,
    /// Radius class.
    pub radius_idx: usize,
    /// Radius.
    pub radius: f32,
}

impl FreeObjectSphere {
    /// Creates a sphere.
    #[must_use]
    pub const fn new(origin: Point3<f32>, radius_idx: usize, radius: f32) -> Self {
        Self {
            origin,
            radius_idx,
            radius,
        }
    }
}

/// A movable object template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeObject {
    /// Template name.
    pub name: String,
    /// Local-frame bounds.
    pub aabb: Aabb,
    /// Local-frame collision spheres.
    pub collision_spheres: Vec<FreeObjectSphere>,
    /// Candidate start rotations.
    pub start_rotations: Vec<UnitQuaternion<f32>>,
}

impl FreeObject {
    /// Creates a template with `num_rotations` evenly spaced yaws.
    ///
    /// Object frames are Z-up, so every rotation first turns local +Z onto
    /// world +Y and then yaws about Y.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(name: impl Into<String>, aabb: Aabb, num_rotations: usize) -> Self {
        let base = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -FRAC_PI_2);
        let start_rotations = (0..num_rotations)
            .map(|i| {
                let yaw = i as f32 * TAU / num_rotations as f32;
                UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw) * base
            })
            .collect();
        Self {
            name: name.into(),
            aabb,
            collision_spheres: Vec::new(),
            start_rotations,
        }
    }

    /// Index of the start rotation closest to `rotation`.
    #[must_use]
    pub fn nearest_start_rotation(&self, rotation: &UnitQuaternion<f32>) -> usize {
        self.start_rotations
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.angle_to(rotation).total_cmp(&b.angle_to(rotation)))
            .map_or(0, |(i, _)| i)
    }
}

/// One free object placed in an episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeObjectSpawn {
    /// Template index.
    pub free_obj_index: usize,
    /// Index into the template's start rotations.
    pub start_rotation_index: usize,
    /// World position.
    pub start_pos: Point3<f32>,
}

/// One episode: a stage plus a run of spawns and the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Stage index.
    pub stage_fixed_obj_index: usize,
    /// First spawn in the set's spawn list.
    pub first_free_object_spawn_index: usize,
    /// Number of spawns.
    pub num_free_object_spawns: usize,
    /// Spawn (relative to this episode) the robot should pick up.
    pub target_obj_index: usize,
    /// Where the target should go.
    pub goal_pos: Point3<f32>,
    /// Goal orientation of the target.
    pub goal_rotation: UnitQuaternion<f32>,
    /// Robot base start position.
    pub robot_start_pos: Point3<f32>,
    /// Robot base yaw about +Y.
    pub robot_start_yaw: f32,
}

impl Episode {
    /// Robot root transform at the start of the episode.
    #[must_use]
    pub fn robot_start_transform(&self) -> Isometry3<f32> {
        Isometry3::from_parts(
            Translation3::from(self.robot_start_pos.coords),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), self.robot_start_yaw),
        )
    }
}

/// Broadphase grid sizing shared by generation and live episodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BroadphaseSizing {
    /// Largest collision sphere radius in the collection.
    pub max_obstacle_radius: f32,
    /// Byte budget of the cell table.
    pub max_bytes: usize,
    /// Largest cell size.
    pub max_grid_spacing: f32,
}

impl Default for BroadphaseSizing {
    fn default() -> Self {
        Self {
            max_obstacle_radius: 0.0,
            max_bytes: 1000 * 1024,
            max_grid_spacing: 0.5,
        }
    }
}

impl BroadphaseSizing {
    /// Creates an empty broadphase grid covering `stage`.
    ///
    /// # Errors
    ///
    /// Fails if the stage has no grids or the budget cannot be met.
    pub fn build(&self, stage: &FixedObject) -> BatchResult<CollisionBroadphaseGrid> {
        let (min_x, min_z, max_x, max_z) = stage.extent()?;
        Ok(CollisionBroadphaseGrid::new(
            self.max_obstacle_radius,
            min_x,
            min_z,
            max_x,
            max_z,
            self.max_bytes,
            self.max_grid_spacing,
        )?)
    }
}

/// Stages, free-object templates, spawns and episodes.
#[derive(Debug, Clone)]
pub struct EpisodeSet {
    fixed_objects: Vec<FixedObject>,
    free_objects: Vec<FreeObject>,
    free_object_spawns: Vec<FreeObjectSpawn>,
    episodes: Vec<Episode>,
    max_free_objects: usize,
    num_failed_placements: usize,
    broadphase_sizing: BroadphaseSizing,
}

/// On-disk form: stages are stored by name and re-attached on load.
#[derive(Serialize, Deserialize)]
struct SavedEpisodeSet {
    stage_names: Vec<String>,
    free_objects: Vec<FreeObject>,
    free_object_spawns: Vec<FreeObjectSpawn>,
    episodes: Vec<Episode>,
    max_free_objects: usize,
    num_failed_placements: usize,
    broadphase_sizing: BroadphaseSizing,
}

impl EpisodeSet {
    /// Assembles a hand-authored set.
    ///
    /// `max_free_objects` is derived from the episodes.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidEpisodeSet`] if the parts are
    /// inconsistent.
    pub fn from_parts(
        fixed_objects: Vec<FixedObject>,
        free_objects: Vec<FreeObject>,
        free_object_spawns: Vec<FreeObjectSpawn>,
        episodes: Vec<Episode>,
        broadphase_sizing: BroadphaseSizing,
    ) -> BatchResult<Self> {
        let max_free_objects = episodes
            .iter()
            .map(|e| e.num_free_object_spawns)
            .max()
            .unwrap_or(0);
        let set = Self {
            fixed_objects,
            free_objects,
            free_object_spawns,
            episodes,
            max_free_objects,
            num_failed_placements: 0,
            broadphase_sizing,
        };
        set.validate()?;
        Ok(set)
    }

    /// Stages.
    #[must_use]
    pub fn fixed_objects(&self) -> &[FixedObject] {
        &self.fixed_objects
    }

    /// Free-object templates.
    #[must_use]
    pub fn free_objects(&self) -> &[FreeObject] {
        &self.free_objects
    }

    /// All spawns of all episodes.
    #[must_use]
    pub fn free_object_spawns(&self) -> &[FreeObjectSpawn] {
        &self.free_object_spawns
    }

    /// All episodes.
    #[must_use]
    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    /// Number of episodes.
    #[must_use]
    pub fn num_episodes(&self) -> usize {
        self.episodes.len()
    }

    /// Largest spawn count of any episode.
    #[must_use]
    pub const fn max_free_objects(&self) -> usize {
        self.max_free_objects
    }

    /// Placements rejected during generation.
    #[must_use]
    pub const fn num_failed_placements(&self) -> usize {
        self.num_failed_placements
    }

    /// Broadphase sizing for live episodes.
    #[must_use]
    pub const fn broadphase_sizing(&self) -> &BroadphaseSizing {
        &self.broadphase_sizing
    }

    /// An episode by index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn episode(&self, index: usize) -> &Episode {
        assert!(
            index < self.episodes.len(),
            "episode index {index} out of range for {} episodes",
            self.episodes.len()
        );
        &self.episodes[index]
    }

    /// The stage of an episode.
    #[must_use]
    pub fn stage(&self, episode: &Episode) -> &FixedObject {
        &self.fixed_objects[episode.stage_fixed_obj_index]
    }

    /// The spawns of an episode.
    #[must_use]
    pub fn spawns(&self, episode: &Episode) -> &[FreeObjectSpawn] {
        let first = episode.first_free_object_spawn_index;
        &self.free_object_spawns[first..first + episode.num_free_object_spawns]
    }

    /// A free-object template by index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn free_object(&self, index: usize) -> &FreeObject {
        assert!(
            index < self.free_objects.len(),
            "free object index {index} out of range for {} templates",
            self.free_objects.len()
        );
        &self.free_objects[index]
    }

    /// World pose of a spawn at the start of its episode.
    #[must_use]
    pub fn spawn_transform(&self, spawn: &FreeObjectSpawn) -> Isometry3<f32> {
        let rotation = self.free_object(spawn.free_obj_index).start_rotations[spawn.start_rotation_index];
        Isometry3::from_parts(Translation3::from(spawn.start_pos.coords), rotation)
    }

    /// Checks that every stage has a column grid for each of `num_radii`
    /// radius classes.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::MissingRadiusClass`] naming the first radius
    /// index a stage lacks.
    pub fn check_radius_classes(&self, num_radii: usize) -> BatchResult<()> {
        check_stage_radius_classes(&self.fixed_objects, num_radii)
    }

    /// Applies the collection's boxes and collision spheres to the templates.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::HotReloadMismatch`] if the collection names a
    /// free object the set does not have, or any sphere resolution error.
    pub fn update_from_collection(&mut self, collection: &Collection) -> BatchResult<()> {
        for entry in &collection.free_objects {
            let Some(free_object) = self.free_objects.iter_mut().find(|f| f.name == entry.name)
            else {
                return Err(BatchError::HotReloadMismatch {
                    name: entry.name.clone(),
                });
            };
            let spheres = entry
                .resolve_collision_spheres()?
                .into_iter()
                .map(|sphere| {
                    Ok(FreeObjectSphere::new(
                        sphere.origin,
                        collection.collision_radius_index(sphere.radius)?,
                        sphere.radius,
                    ))
                })
                .collect::<BatchResult<Vec<_>>>()?;
            free_object.aabb = entry.collision_box.aabb();
            free_object.collision_spheres = spheres;
        }
        self.broadphase_sizing.max_obstacle_radius = collection.max_collision_radius();
        Ok(())
    }

    /// Checks the structural invariants of the set.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidEpisodeSet`] describing the first
    /// violation.
    pub fn validate(&self) -> BatchResult<()> {
        let mut max_spawns = 0;
        for (i, episode) in self.episodes.iter().enumerate() {
            if episode.stage_fixed_obj_index >= self.fixed_objects.len() {
                return Err(BatchError::invalid_episode_set(format!(
                    "episode {i} references stage {} of {}",
                    episode.stage_fixed_obj_index,
                    self.fixed_objects.len()
                )));
            }
            let end = episode.first_free_object_spawn_index + episode.num_free_object_spawns;
            if end > self.free_object_spawns.len() {
                return Err(BatchError::invalid_episode_set(format!(
                    "episode {i} spawns end at {end} past {}",
                    self.free_object_spawns.len()
                )));
            }
            if episode.num_free_object_spawns > 0
                && episode.target_obj_index >= episode.num_free_object_spawns
            {
                return Err(BatchError::invalid_episode_set(format!(
                    "episode {i} target {} out of {} spawns",
                    episode.target_obj_index, episode.num_free_object_spawns
                )));
            }
            max_spawns = max_spawns.max(episode.num_free_object_spawns);
        }
        for (i, spawn) in self.free_object_spawns.iter().enumerate() {
            let Some(free_object) = self.free_objects.get(spawn.free_obj_index) else {
                return Err(BatchError::invalid_episode_set(format!(
                    "spawn {i} references free object {} of {}",
                    spawn.free_obj_index,
                    self.free_objects.len()
                )));
            };
            if spawn.start_rotation_index >= free_object.start_rotations.len() {
                return Err(BatchError::invalid_episode_set(format!(
                    "spawn {i} references start rotation {} of {}",
                    spawn.start_rotation_index,
                    free_object.start_rotations.len()
                )));
            }
        }
        if max_spawns != self.max_free_objects {
            return Err(BatchError::invalid_episode_set(format!(
                "max_free_objects is {} but the largest episode has {max_spawns} spawns",
                self.max_free_objects
            )));
        }
        Ok(())
    }

    /// Writes the set as JSON. Stage grids are referenced by name only.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Io`] or [`BatchError::Json`].
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> BatchResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(&self.to_saved())?;
        fs::write(path, text).map_err(|e| BatchError::io(path, e))
    }

    /// Serializes the set to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Json`].
    pub fn to_json_string(&self) -> BatchResult<String> {
        Ok(serde_json::to_string(&self.to_saved())?)
    }

    /// Loads a set saved with [`save_json`](Self::save_json), attaching
    /// `stages` by name.
    ///
    /// # Errors
    ///
    /// Fails on I/O or JSON errors, a stage name missing from `stages`, or a
    /// set that violates its invariants.
    pub fn load_json<P: AsRef<Path>>(path: P, stages: &[FixedObject]) -> BatchResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| BatchError::io(path, e))?;
        let saved: SavedEpisodeSet = serde_json::from_str(&text)?;
        let fixed_objects = saved
            .stage_names
            .iter()
            .map(|name| {
                stages
                    .iter()
                    .find(|stage| &stage.name == name)
                    .cloned()
                    .ok_or_else(|| BatchError::MissingStage { name: name.clone() })
            })
            .collect::<BatchResult<Vec<_>>>()?;
        let set = Self {
            fixed_objects,
            free_objects: saved.free_objects,
            free_object_spawns: saved.free_object_spawns,
            episodes: saved.episodes,
            max_free_objects: saved.max_free_objects,
            num_failed_placements: saved.num_failed_placements,
            broadphase_sizing: saved.broadphase_sizing,
        };
        set.validate()?;
        info!(
            path = %path.display(),
            episodes = set.episodes.len(),
            spawns = set.free_object_spawns.len(),
            "Loaded episode set"
        );
        Ok(set)
    }

    fn to_saved(&self) -> SavedEpisodeSet {
        SavedEpisodeSet {
            stage_names: self.fixed_objects.iter().map(|s| s.name.clone()).collect(),
            free_objects: self.free_objects.clone(),
            free_object_spawns: self.free_object_spawns.clone(),
            episodes: self.episodes.clone(),
            max_free_objects: self.max_free_objects,
            num_failed_placements: self.num_failed_placements,
            broadphase_sizing: self.broadphase_sizing,
        }
    }
}

fn check_stage_radius_classes(stages: &[FixedObject], num_radii: usize) -> BatchResult<()> {
    for stage in stages {
        let num_grids = stage.column_grids.num_grids();
        if num_grids < num_radii.max(1) {
            return Err(SpatialError::MissingRadiusClass {
                radius_idx: num_grids,
                num_grids,
            }
            .into());
        }
    }
    Ok(())
}

/// Generates episodes by randomly placing free objects on the stages.
///
/// Episodes are spread evenly over `stages`. Every free object in
/// `collection` becomes a template; spawns draw from
/// `params.selected_free_objects` (all templates when empty). Output depends
/// only on the inputs and `params.seed`.
///
/// # Errors
///
/// Fails on invalid parameters, no stages, stages without a grid for every
/// radius class, unknown selected names, collection errors, a broadphase
/// budget that cannot be met, or a spawn range that lies inside the robot
/// exclusion box.
pub fn generate_benchmark_episode_set(
    params: &EpisodeGenerationParams,
    stages: Vec<FixedObject>,
    collection: &Collection,
) -> BatchResult<EpisodeSet> {
    params.validate()?;
    if stages.is_empty() {
        return Err(BatchError::NoStages);
    }
    check_stage_radius_classes(&stages, collection.collision_radius_working_set.len())?;

    let mut set = EpisodeSet {
        fixed_objects: stages,
        free_objects: collection
            .free_objects
            .iter()
            .map(|entry| FreeObject::new(&entry.name, entry.collision_box.aabb(), params.num_start_rotations))
            .collect(),
        free_object_spawns: Vec::new(),
        episodes: Vec::with_capacity(params.num_episodes),
        max_free_objects: 0,
        num_failed_placements: 0,
        broadphase_sizing: BroadphaseSizing {
            max_obstacle_radius: collection.max_collision_radius(),
            max_bytes: params.broadphase_max_bytes,
            max_grid_spacing: params.broadphase_max_grid_spacing,
        },
    };
    set.update_from_collection(collection)?;

    let selected = select_free_objects(&set.free_objects, &params.selected_free_objects)?;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let num_stages = set.fixed_objects.len();
    for i in 0..params.num_episodes {
        let stage_index = i * num_stages / params.num_episodes;
        add_episode(&mut set, params, stage_index, &selected, &mut rng)?;
    }

    info!(
        episodes = set.episodes.len(),
        spawns = set.free_object_spawns.len(),
        max_free_objects = set.max_free_objects,
        failed_placements = set.num_failed_placements,
        "Generated episode set"
    );
    Ok(set)
}

fn select_free_objects(free_objects: &[FreeObject], names: &[String]) -> BatchResult<Vec<usize>> {
    if names.is_empty() {
        return Ok((0..free_objects.len()).collect());
    }
    names
        .iter()
        .map(|name| {
            free_objects
                .iter()
                .position(|f| &f.name == name)
                .ok_or_else(|| BatchError::UnknownFreeObject { name: name.clone() })
        })
        .collect()
}

fn random_point(rng: &mut StdRng, min: &Point3<f32>, max: &Point3<f32>) -> Point3<f32> {
    Point3::new(
        rng.gen_range(min.x..=max.x),
        rng.gen_range(min.y..=max.y),
        rng.gen_range(min.z..=max.z),
    )
}

fn random_spawn_position(rng: &mut StdRng, params: &EpisodeGenerationParams) -> BatchResult<Point3<f32>> {
    for _ in 0..MAX_EXCLUSION_RETRIES {
        let position = random_point(rng, &params.spawn_range_min, &params.spawn_range_max);
        if !params.in_robot_exclusion(&position) {
            return Ok(position);
        }
    }
    Err(BatchError::invalid_episode_set(
        "no spawn position found outside the robot exclusion box",
    ))
}

fn add_episode(
    set: &mut EpisodeSet,
    params: &EpisodeGenerationParams,
    stage_index: usize,
    selected: &[usize],
    rng: &mut StdRng,
) -> BatchResult<()> {
    let stage = set.fixed_objects[stage_index].clone();
    let mut broadphase = set.broadphase_sizing.build(&stage)?;
    let first_spawn = set.free_object_spawns.len();
    let mut num_spawns = 0;
    let mut num_failed = 0;

    if !selected.is_empty() {
        for _ in 0..params.num_spawn_attempts {
            if num_spawns == params.target_num_spawns {
                break;
            }
            let free_obj_index = selected[rng.gen_range(0..selected.len())];
            let free_object = &set.free_objects[free_obj_index];
            let rotation_index = rng.gen_range(0..free_object.start_rotations.len());
            let position = random_spawn_position(rng, params)?;

            let mut transform = Isometry3::from_parts(
                Translation3::from(position.coords),
                free_object.start_rotations[rotation_index],
            );
            let placed = PlacementHelper::new(&stage.column_grids, &broadphase, rng)
                .with_max_failed_placements(params.max_failed_placements)
                .with_perturb_distance(params.perturb_distance)
                .with_settling(params.settle_step, params.max_settle_distance)
                .place(&mut transform, free_object);
            let start_pos = Point3::from(transform.translation.vector);
            if !placed || !params.in_spawn_range(&start_pos) {
                num_failed += 1;
                continue;
            }

            set.free_object_spawns.push(FreeObjectSpawn {
                free_obj_index,
                start_rotation_index: free_object.nearest_start_rotation(&transform.rotation),
                start_pos,
            });
            num_spawns += 1;
            broadphase.insert_obstacle(&start_pos, &transform.rotation, &free_object.aabb);
        }
    }

    let target_obj_index = if num_spawns > 0 {
        rng.gen_range(0..num_spawns)
    } else {
        0
    };
    let goal_rotation = set
        .free_object_spawns
        .get(first_spawn + target_obj_index)
        .filter(|_| num_spawns > 0)
        .map_or_else(UnitQuaternion::identity, |spawn| {
            set.free_objects[spawn.free_obj_index].start_rotations[spawn.start_rotation_index]
        });
    let goal_pos = random_point(rng, &params.spawn_range_min, &params.spawn_range_max);

    debug!(
        episode = set.episodes.len(),
        stage = stage_index,
        spawns = num_spawns,
        failed = num_failed,
        "Generated episode"
    );

    set.max_free_objects = set.max_free_objects.max(num_spawns);
    set.num_failed_placements += num_failed;
    set.episodes.push(Episode {
        stage_fixed_obj_index: stage_index,
        first_free_object_spawn_index: first_spawn,
        num_free_object_spawns: num_spawns,
        target_obj_index,
        goal_pos,
        goal_rotation,
        robot_start_pos: params.robot_start_pos,
        robot_start_yaw: params.robot_start_yaw,
    });
    Ok(())
}
