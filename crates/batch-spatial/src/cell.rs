//! Horizontal cell coordinates shared by the column grid and the broadphase grid.

use nalgebra::Point3;

/// A discrete cell coordinate on the horizontal (X, Z) plane.
///
/// Both grids in this crate partition the ground plane only; the vertical
/// axis (Y) is handled per cell. Coordinates are `i32` so that points left of
/// or behind the grid origin map to negative indices rather than wrapping.
///
/// # Example
///
/// ```
/// use batch_spatial::CellCoord;
///
/// let cell = CellCoord::new(3, 4);
/// assert_eq!(cell.linear_index(10, 10), Some(34));
/// assert_eq!(CellCoord::new(-1, 0).linear_index(10, 10), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellCoord {
    /// Cell index along X.
    pub x: i32,
    /// Cell index along Z.
    pub z: i32,
}

impl CellCoord {
    /// Creates a new cell coordinate.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Maps a world point to the cell containing it.
    ///
    /// `inv_spacing` is the reciprocal of the cell size. Points exactly on a
    /// cell's lower edge belong to that cell.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_world(point: &Point3<f32>, min_x: f32, min_z: f32, inv_spacing: f32) -> Self {
        Self {
            x: ((point.x - min_x) * inv_spacing).floor() as i32,
            z: ((point.z - min_z) * inv_spacing).floor() as i32,
        }
    }

    /// Returns whether the cell lies inside `[0, dim_x) × [0, dim_z)`.
    #[must_use]
    pub const fn in_bounds(self, dim_x: i32, dim_z: i32) -> bool {
        self.x >= 0 && self.x < dim_x && self.z >= 0 && self.z < dim_z
    }

    /// Row-major linear index (X outer, Z inner), or `None` outside the grid.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn linear_index(self, dim_x: i32, dim_z: i32) -> Option<usize> {
        if self.in_bounds(dim_x, dim_z) {
            Some(self.x as usize * dim_z as usize + self.z as usize)
        } else {
            None
        }
    }

    /// Clamps the coordinate into `[0, dim_x) × [0, dim_z)`.
    #[must_use]
    pub fn clamped(self, dim_x: i32, dim_z: i32) -> Self {
        Self {
            x: self.x.clamp(0, (dim_x - 1).max(0)),
            z: self.z.clamp(0, (dim_z - 1).max(0)),
        }
    }
}

impl From<(i32, i32)> for CellCoord {
    fn from((x, z): (i32, i32)) -> Self {
        Self::new(x, z)
    }
}
