//! One column grid per collision-sphere radius class.

use std::path::{Path, PathBuf};

use nalgebra::Point3;
use tracing::info;

use crate::column_grid::{ColumnGridSource, QueryCache};
use crate::error::{SpatialError, SpatialResult};

/// Column grids for a stage, indexed by radius class.
///
/// Robot and free-object collision spheres carry a radius index into the
/// collection's radius working set; each index has its own grid because the
/// sphere radius is baked into the layer spans.
///
/// # Example
///
/// ```
/// use batch_spatial::{ColumnGridSet, ColumnGridSource, QueryCache};
/// use nalgebra::Point3;
///
/// let mut small = ColumnGridSource::new(0.0, 0.0, 2, 2, 1.0, 0.015).unwrap();
/// small.fill_uniform(0.015, 3.0);
/// let mut medium = ColumnGridSource::new(0.0, 0.0, 2, 2, 1.0, 0.05).unwrap();
/// medium.fill_uniform(0.05, 3.0);
///
/// let set = ColumnGridSet::from_grids(vec![small, medium]);
/// let point = Point3::new(0.5, 0.03, 0.5);
/// assert!(!set.contact_test(0, &point, QueryCache::NONE).0);
/// assert!(set.contact_test(1, &point, QueryCache::NONE).0);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnGridSet {
    grids: Vec<ColumnGridSource>,
}

impl ColumnGridSet {
    /// Wraps already-built grids; index `i` serves radius class `i`.
    #[must_use]
    pub const fn from_grids(grids: Vec<ColumnGridSource>) -> Self {
        Self { grids }
    }

    /// Path of the grid file for one radius class: `{base}.{radius_idx}.columngrid`.
    #[must_use]
    pub fn grid_path(base: &Path, radius_idx: usize) -> PathBuf {
        let mut name = base.as_os_str().to_owned();
        name.push(format!(".{radius_idx}.columngrid"));
        PathBuf::from(name)
    }

    /// Loads `num_radii` grids named after `base`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::GridFileNotFound`] for the first missing radius
    /// class, or any load error of the individual grids.
    pub fn load<P: AsRef<Path>>(base: P, num_radii: usize) -> SpatialResult<Self> {
        let base = base.as_ref();
        let grids = (0..num_radii)
            .map(|radius_idx| ColumnGridSource::load(Self::grid_path(base, radius_idx)))
            .collect::<SpatialResult<Vec<_>>>()?;
        info!(base = %base.display(), num_radii, "Loaded column grid set");
        Ok(Self { grids })
    }

    /// Saves every grid next to `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, base: P) -> SpatialResult<()> {
        let base = base.as_ref();
        for (radius_idx, grid) in self.grids.iter().enumerate() {
            grid.save(Self::grid_path(base, radius_idx))?;
        }
        Ok(())
    }

    /// Number of radius classes.
    #[must_use]
    pub fn num_grids(&self) -> usize {
        self.grids.len()
    }

    /// Grid for a radius class.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::MissingRadiusClass`] if the index has no grid.
    pub fn grid(&self, radius_idx: usize) -> SpatialResult<&ColumnGridSource> {
        self.grids
            .get(radius_idx)
            .ok_or(SpatialError::MissingRadiusClass {
                radius_idx,
                num_grids: self.grids.len(),
            })
    }

    /// Iterates over the grids in radius-class order.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnGridSource> {
        self.grids.iter()
    }

    /// Contact test against the grid for `radius_idx`.
    ///
    /// # Panics
    ///
    /// Panics if `radius_idx` has no grid. Radius indices are validated when
    /// the collection is applied, so a bad index here is an internal bug.
    #[must_use]
    pub fn contact_test(
        &self,
        radius_idx: usize,
        point: &Point3<f32>,
        cache: QueryCache,
    ) -> (bool, QueryCache) {
        assert!(
            radius_idx < self.grids.len(),
            "radius index {radius_idx} out of range for {} column grids",
            self.grids.len()
        );
        self.grids[radius_idx].contact_test(point, cache)
    }
}
