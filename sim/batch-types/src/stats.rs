//! Aggregate counters reported by the simulator.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Counters accumulated across environments since the last report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatRecord {
    /// Environment steps taken.
    pub num_steps: u64,
    /// Episodes started.
    pub num_episodes: u64,
    /// Environment steps in which at least one substep collided.
    pub num_steps_in_collision: u64,
    /// Grip requests.
    pub num_grip_attempts: u64,
    /// Grip requests that picked up an object.
    pub num_grips: u64,
    /// Successful drops.
    pub num_drops: u64,
    /// Drops rejected because the release pose was in contact.
    pub num_failed_drops: u64,
    /// Spawn attempts abandoned during episode generation.
    pub num_failed_placements: u64,
}

impl StatRecord {
    /// Adds another record into this one.
    pub fn accumulate(&mut self, other: &Self) {
        self.num_steps += other.num_steps;
        self.num_episodes += other.num_episodes;
        self.num_steps_in_collision += other.num_steps_in_collision;
        self.num_grip_attempts += other.num_grip_attempts;
        self.num_grips += other.num_grips;
        self.num_drops += other.num_drops;
        self.num_failed_drops += other.num_failed_drops;
        self.num_failed_placements += other.num_failed_placements;
    }

    /// Returns the current counts and zeroes the record.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Fraction of steps that collided.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn collision_fraction(&self) -> f64 {
        if self.num_steps == 0 {
            0.0
        } else {
            self.num_steps_in_collision as f64 / self.num_steps as f64
        }
    }
}

impl fmt::Display for StatRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steps: {}, episodes: {}, in collision: {} ({:.1}%), grip attempts: {}, grips: {}, drops: {}, failed drops: {}, failed placements: {}",
            self.num_steps,
            self.num_episodes,
            self.num_steps_in_collision,
            self.collision_fraction() * 100.0,
            self.num_grip_attempts,
            self.num_grips,
            self.num_drops,
            self.num_failed_drops,
            self.num_failed_placements,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_and_take() {
        let mut total = StatRecord::default();
        let step = StatRecord {
            num_steps: 4,
            num_steps_in_collision: 1,
            num_grips: 1,
            ..Default::default()
        };
        total.accumulate(&step);
        total.accumulate(&step);
        assert_eq!(total.num_steps, 8);
        assert_eq!(total.num_grips, 2);

        let taken = total.take();
        assert_eq!(taken.num_steps_in_collision, 2);
        assert_eq!(total, StatRecord::default());
    }

    #[test]
    fn test_display() {
        let record = StatRecord {
            num_steps: 10,
            num_steps_in_collision: 5,
            num_failed_drops: 2,
            ..Default::default()
        };
        let text = record.to_string();
        assert!(text.contains("steps: 10"));
        assert!(text.contains("50.0%"));
        assert!(text.contains("failed drops: 2"));
    }
}
