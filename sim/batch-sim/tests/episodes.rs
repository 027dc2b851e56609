//! Episode generation, persistence and instantiation.

#![allow(clippy::unwrap_used)]

mod common;

use batch_sim::{
    BatchError, BatchedSimulator, EpisodeInstanceSet, EpisodeSet, SimulatorAssets,
    generate_benchmark_episode_set,
};
use batch_spatial::{ColumnGridSet, SpatialError};
use batch_types::{BatchedSimulatorConfig, EpisodeSource};
use common::{arm, collection, params, room};

fn generate() -> EpisodeSet {
    generate_benchmark_episode_set(&params(), vec![room("a"), room("b")], &collection()).unwrap()
}

#[test]
fn generation_is_deterministic() {
    let first = generate().to_json_string().unwrap();
    let second = generate().to_json_string().unwrap();
    assert_eq!(first, second);

    let reseeded =
        generate_benchmark_episode_set(&params().with_seed(12), vec![room("a"), room("b")], &collection())
            .unwrap();
    assert_ne!(first, reseeded.to_json_string().unwrap());
}

#[test]
fn spawns_are_collision_free_at_start() {
    let set = generate();
    let instances = EpisodeInstanceSet::new(&set, &(0..set.num_episodes()).collect::<Vec<_>>()).unwrap();
    for env in 0..set.num_episodes() {
        let instance = instances.get(env);
        let episode = set.episode(instance.episode_index());
        let stage = set.stage(episode);
        for (spawn, pose) in set.spawns(episode).iter().zip(instance.free_object_poses()) {
            let template = set.free_object(spawn.free_obj_index);
            for sphere in &template.collision_spheres {
                let center = pose * sphere.origin;
                let (hit, _) = stage.column_grids.contact_test(
                    sphere.radius_idx,
                    &center,
                    batch_spatial::QueryCache::NONE,
                );
                assert!(!hit, "spawn of {} touches the stage", template.name);
            }
        }
    }
}

#[test]
fn saved_set_drives_a_simulator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes.json");
    let set = generate();
    set.save_json(&path).unwrap();

    let loaded = EpisodeSet::load_json(&path, &[room("a"), room("b")]).unwrap();
    assert_eq!(loaded.num_episodes(), set.num_episodes());
    assert_eq!(loaded.free_object_spawns(), set.free_object_spawns());
    assert_eq!(loaded.episodes(), set.episodes());

    let config = BatchedSimulatorConfig::new(3)
        .synchronous()
        .with_episode_source(EpisodeSource::File(path));
    let assets = SimulatorAssets::new(vec![room("a"), room("b")], collection(), arm());
    let sim = BatchedSimulator::new(config, assets).unwrap();
    assert_eq!(sim.get_num_episodes(), set.num_episodes());
    assert_eq!(sim.get_environment_states()[2].episode_idx, 2);
}

#[test]
fn loading_without_the_stage_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes.json");
    generate().save_json(&path).unwrap();

    let err = EpisodeSet::load_json(&path, &[room("a")]).unwrap_err();
    assert!(matches!(err, BatchError::MissingStage { ref name } if name == "b"));
}

/// `room(name)` with only the small-radius grid.
fn single_grid_room(name: &str) -> batch_sim::FixedObject {
    let mut stage = room(name);
    let grid = stage.column_grids.grid(0).unwrap().clone();
    stage.column_grids = std::sync::Arc::new(ColumnGridSet::from_grids(vec![grid]));
    stage
}

fn is_missing_radius_class(err: &BatchError) -> bool {
    matches!(
        err,
        BatchError::Spatial(SpatialError::MissingRadiusClass {
            radius_idx: 1,
            num_grids: 1
        })
    )
}

#[test]
fn stages_without_every_radius_class_are_rejected_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes.json");
    generate().save_json(&path).unwrap();
    let stages = || vec![single_grid_room("a"), single_grid_room("b")];

    let config = BatchedSimulatorConfig::new(2)
        .synchronous()
        .with_episode_source(EpisodeSource::File(path.clone()));
    let err = BatchedSimulator::new(config, SimulatorAssets::new(stages(), collection(), arm()))
        .err()
        .unwrap();
    assert!(is_missing_radius_class(&err), "{err}");

    let prebuilt = EpisodeSet::load_json(&path, &stages()).unwrap();
    let assets = SimulatorAssets::new(stages(), collection(), arm()).with_episode_set(prebuilt);
    let err = BatchedSimulator::new(BatchedSimulatorConfig::new(2).synchronous(), assets)
        .err()
        .unwrap();
    assert!(is_missing_radius_class(&err), "{err}");
}

#[test]
fn missing_episode_file_is_an_io_error() {
    let config = BatchedSimulatorConfig::new(1)
        .synchronous()
        .with_episode_source(EpisodeSource::File("/nonexistent/episodes.json".into()));
    let assets = SimulatorAssets::new(vec![room("a")], collection(), arm());
    let err = BatchedSimulator::new(config, assets).err().unwrap();
    assert!(matches!(err, BatchError::Io { .. }));
}
