//! Live per-environment episode state.

use batch_spatial::{CollisionBroadphaseGrid, ObstacleHandle};
use nalgebra::{Isometry3, Point3};

use crate::episode::EpisodeSet;
use crate::error::BatchResult;

/// The episode currently running in one environment.
///
/// Spawn `i` of the episode is broadphase obstacle `obstacle_handles[i]`
/// unless the robot holds it.
#[derive(Debug, Clone)]
pub struct EpisodeInstance {
    episode_index: usize,
    stage_index: usize,
    broadphase: CollisionBroadphaseGrid,
    obstacle_handles: Vec<ObstacleHandle>,
    free_object_poses: Vec<Isometry3<f32>>,
    step_index: usize,
}

impl EpisodeInstance {
    fn new(set: &EpisodeSet, episode_index: usize) -> BatchResult<Self> {
        let episode = set.episode(episode_index);
        let broadphase = set.broadphase_sizing().build(set.stage(episode))?;
        let mut instance = Self {
            episode_index,
            stage_index: episode.stage_fixed_obj_index,
            broadphase,
            obstacle_handles: Vec::with_capacity(set.max_free_objects()),
            free_object_poses: Vec::with_capacity(set.max_free_objects()),
            step_index: 0,
        };
        instance.populate(set);
        Ok(instance)
    }

    fn populate(&mut self, set: &EpisodeSet) {
        let episode = set.episode(self.episode_index);
        self.broadphase.clear();
        self.obstacle_handles.clear();
        self.free_object_poses.clear();
        for spawn in set.spawns(episode) {
            let pose = set.spawn_transform(spawn);
            let aabb = set.free_object(spawn.free_obj_index).aabb;
            let handle = self.broadphase.insert_obstacle(
                &Point3::from(pose.translation.vector),
                &pose.rotation,
                &aabb,
            );
            self.obstacle_handles.push(handle);
            self.free_object_poses.push(pose);
        }
        self.step_index = 0;
    }

    /// Episode index in the set.
    #[must_use]
    pub const fn episode_index(&self) -> usize {
        self.episode_index
    }

    /// Stage index in the set.
    #[must_use]
    pub const fn stage_index(&self) -> usize {
        self.stage_index
    }

    /// Steps taken since the last reset.
    #[must_use]
    pub const fn step_index(&self) -> usize {
        self.step_index
    }

    pub(crate) fn advance_step(&mut self) {
        self.step_index += 1;
    }

    /// Broadphase grid holding every spawn not held by the robot.
    #[must_use]
    pub const fn broadphase(&self) -> &CollisionBroadphaseGrid {
        &self.broadphase
    }

    pub(crate) fn broadphase_mut(&mut self) -> &mut CollisionBroadphaseGrid {
        &mut self.broadphase
    }

    /// Number of spawns in the running episode.
    #[must_use]
    pub fn num_free_objects(&self) -> usize {
        self.free_object_poses.len()
    }

    /// Obstacle handle of a spawn.
    #[must_use]
    pub fn obstacle_handle(&self, spawn: usize) -> ObstacleHandle {
        self.obstacle_handles[spawn]
    }

    /// Spawn index of an obstacle handle.
    #[must_use]
    pub fn spawn_of(&self, handle: ObstacleHandle) -> Option<usize> {
        self.obstacle_handles.iter().position(|&h| h == handle)
    }

    /// Current world poses of the spawns.
    #[must_use]
    pub fn free_object_poses(&self) -> &[Isometry3<f32>] {
        &self.free_object_poses
    }

    pub(crate) fn set_free_object_pose(&mut self, spawn: usize, pose: Isometry3<f32>) {
        self.free_object_poses[spawn] = pose;
    }
}

/// One [`EpisodeInstance`] per environment.
#[derive(Debug, Clone)]
pub struct EpisodeInstanceSet {
    instances: Vec<EpisodeInstance>,
}

impl EpisodeInstanceSet {
    /// Starts environment `i` on episode `episodes[i]`.
    ///
    /// # Errors
    ///
    /// Fails if a broadphase grid cannot be built for a stage.
    ///
    /// # Panics
    ///
    /// Panics if an episode index is out of range.
    pub fn new(set: &EpisodeSet, episodes: &[usize]) -> BatchResult<Self> {
        let instances = episodes
            .iter()
            .map(|&episode| EpisodeInstance::new(set, episode))
            .collect::<BatchResult<Vec<_>>>()?;
        Ok(Self { instances })
    }

    /// Number of environments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether there are no environments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// The instance of one environment.
    ///
    /// # Panics
    ///
    /// Panics if `env` is out of range.
    #[must_use]
    pub fn get(&self, env: usize) -> &EpisodeInstance {
        assert!(
            env < self.instances.len(),
            "environment {env} out of range for {} environments",
            self.instances.len()
        );
        &self.instances[env]
    }

    pub(crate) fn get_mut(&mut self, env: usize) -> &mut EpisodeInstance {
        assert!(
            env < self.instances.len(),
            "environment {env} out of range for {} environments",
            self.instances.len()
        );
        &mut self.instances[env]
    }

    /// Restarts environment `env` on `episode_index`.
    ///
    /// The broadphase grid is reused when the stage does not change.
    ///
    /// # Errors
    ///
    /// Fails if a broadphase grid cannot be built for a new stage.
    ///
    /// # Panics
    ///
    /// Panics if `env` or `episode_index` is out of range.
    pub fn reset_env(&mut self, set: &EpisodeSet, env: usize, episode_index: usize) -> BatchResult<()> {
        let stage_index = set.episode(episode_index).stage_fixed_obj_index;
        let instance = self.get_mut(env);
        if stage_index == instance.stage_index {
            instance.episode_index = episode_index;
            instance.populate(set);
        } else {
            *instance = EpisodeInstance::new(set, episode_index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_fixtures::{shelf_collection, shelf_params, shelf_room};
    use crate::episode::generate_benchmark_episode_set;

    fn episode_set() -> EpisodeSet {
        generate_benchmark_episode_set(
            &shelf_params(),
            vec![shelf_room("a"), shelf_room("b")],
            &shelf_collection(),
        )
        .unwrap()
    }

    #[test]
    fn test_instances_mirror_spawns() {
        let set = episode_set();
        let instances = EpisodeInstanceSet::new(&set, &[0, 3]).unwrap();
        assert_eq!(instances.len(), 2);

        let instance = instances.get(1);
        let episode = set.episode(3);
        assert_eq!(instance.stage_index(), 1);
        assert_eq!(instance.num_free_objects(), episode.num_free_object_spawns);
        assert_eq!(instance.broadphase().len(), episode.num_free_object_spawns);
        for (i, spawn) in set.spawns(episode).iter().enumerate() {
            assert_eq!(instance.free_object_poses()[i], set.spawn_transform(spawn));
            assert_eq!(instance.spawn_of(instance.obstacle_handle(i)), Some(i));
        }
    }

    #[test]
    fn test_reset_restores_episode_state() {
        let set = episode_set();
        let mut instances = EpisodeInstanceSet::new(&set, &[0]).unwrap();
        {
            let instance = instances.get_mut(0);
            let handle = instance.obstacle_handle(0);
            instance.broadphase_mut().remove_obstacle(handle);
            instance.set_free_object_pose(0, Isometry3::identity());
            instance.advance_step();
        }

        // Same stage: grid reused.
        instances.reset_env(&set, 0, 1).unwrap();
        let instance = instances.get(0);
        assert_eq!(instance.episode_index(), 1);
        assert_eq!(instance.step_index(), 0);
        assert_eq!(instance.broadphase().len(), set.episode(1).num_free_object_spawns);

        // Different stage: grid rebuilt.
        instances.reset_env(&set, 0, 2).unwrap();
        assert_eq!(instances.get(0).stage_index(), 1);
    }

    #[test]
    #[should_panic(expected = "environment 1 out of range")]
    fn test_env_out_of_range() {
        let set = episode_set();
        let instances = EpisodeInstanceSet::new(&set, &[0]).unwrap();
        let _ = instances.get(1);
    }
}
