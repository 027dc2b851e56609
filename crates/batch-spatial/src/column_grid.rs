//! Column grid: vertical free-space intervals over a horizontal cell grid.
//!
//! A [`ColumnGridSource`] encodes the free space of a static stage for one
//! fixed query-sphere radius. The ground plane is divided into square cells;
//! each cell stores a sorted list of [`Layer`]s, the vertical spans (along Y)
//! in which a sphere center can sit without touching the stage. The sphere
//! radius is baked into the spans when the grid is built, so a query only has
//! to locate the cell and check one interval.
//!
//! # File format
//!
//! Little-endian, in order:
//!
//! | Field | Type |
//! |-------|------|
//! | `min_x`, `min_z` | `f32` |
//! | `dim_x`, `dim_z` | `i32` |
//! | `grid_spacing`, `sphere_radius` | `f32` |
//! | per cell (X outer, Z inner): `layer_count` | `i32` |
//! | then `layer_count` × (`free_min`, `free_max`) | `f32` pairs |

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use nalgebra::Point3;
use smallvec::SmallVec;
use tracing::debug;

use crate::cell::CellCoord;
use crate::error::{SpatialError, SpatialResult};

/// Upper bound on cells accepted from a file, to reject corrupt headers
/// before allocating.
const MAX_CELLS: usize = 1 << 26;

/// One vertical free-space interval in a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Layer {
    /// Lowest free sphere-center height.
    pub free_min: f32,
    /// Highest free sphere-center height.
    pub free_max: f32,
}

impl Layer {
    /// Creates a layer.
    #[must_use]
    pub const fn new(free_min: f32, free_max: f32) -> Self {
        Self { free_min, free_max }
    }

    /// Whether `y` lies strictly inside the interval.
    #[must_use]
    pub fn contains(&self, y: f32) -> bool {
        y > self.free_min && y < self.free_max
    }
}

/// Per-query cache hint: the layer index used by the previous query.
///
/// Callers keep one value per query stream (e.g. per robot collision sphere)
/// and feed the returned value into the next query. Any value is safe to pass;
/// [`QueryCache::NONE`] or an index past the cell's layer count just forces a
/// full search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryCache(pub i16);

impl QueryCache {
    /// No cached layer.
    pub const NONE: Self = Self(-1);

    /// Cache pointing at `layer`, or [`QueryCache::NONE`] if it does not fit.
    #[must_use]
    pub fn from_layer(layer: usize) -> Self {
        i16::try_from(layer).map_or(Self::NONE, Self)
    }

    /// The cached layer index, if any.
    #[must_use]
    pub fn layer_index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::NONE
    }
}

/// Free-space column grid for one query-sphere radius.
///
/// # Example
///
/// ```
/// use batch_spatial::{ColumnGridSource, QueryCache};
/// use nalgebra::Point3;
///
/// let mut grid = ColumnGridSource::new(0.0, 0.0, 4, 4, 1.0, 0.1).unwrap();
/// grid.append_column(1, 2, 0.1, 2.0);
///
/// let (hit, cache) = grid.contact_test(&Point3::new(1.5, 1.0, 2.5), QueryCache::NONE);
/// assert!(!hit);
/// assert_eq!(cache.layer_index(), Some(0));
///
/// // Below the floor layer
/// let (hit, _) = grid.contact_test(&Point3::new(1.5, 0.05, 2.5), cache);
/// assert!(hit);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnGridSource {
    min_x: f32,
    min_z: f32,
    dim_x: i32,
    dim_z: i32,
    grid_spacing: f32,
    inv_grid_spacing: f32,
    sphere_radius: f32,
    /// Row-major (X outer, Z inner) per-cell layer lists.
    columns: Vec<SmallVec<[Layer; 2]>>,
}

impl ColumnGridSource {
    /// Creates an empty (fully occupied) grid.
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension is not positive, the spacing is not
    /// positive and finite, or the radius is negative or not finite.
    pub fn new(
        min_x: f32,
        min_z: f32,
        dim_x: i32,
        dim_z: i32,
        grid_spacing: f32,
        sphere_radius: f32,
    ) -> SpatialResult<Self> {
        let num_cells = validate_header(dim_x, dim_z, grid_spacing, sphere_radius)?;
        Ok(Self {
            min_x,
            min_z,
            dim_x,
            dim_z,
            grid_spacing,
            inv_grid_spacing: 1.0 / grid_spacing,
            sphere_radius,
            columns: vec![SmallVec::new(); num_cells],
        })
    }

    /// Grid origin X.
    #[must_use]
    pub const fn min_x(&self) -> f32 {
        self.min_x
    }

    /// Grid origin Z.
    #[must_use]
    pub const fn min_z(&self) -> f32 {
        self.min_z
    }

    /// Far X edge of the grid.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn max_x(&self) -> f32 {
        self.min_x + self.dim_x as f32 * self.grid_spacing
    }

    /// Far Z edge of the grid.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn max_z(&self) -> f32 {
        self.min_z + self.dim_z as f32 * self.grid_spacing
    }

    /// Cell count along X.
    #[must_use]
    pub const fn dim_x(&self) -> i32 {
        self.dim_x
    }

    /// Cell count along Z.
    #[must_use]
    pub const fn dim_z(&self) -> i32 {
        self.dim_z
    }

    /// Cell size.
    #[must_use]
    pub const fn grid_spacing(&self) -> f32 {
        self.grid_spacing
    }

    /// Reciprocal of the cell size.
    #[must_use]
    pub const fn inv_grid_spacing(&self) -> f32 {
        self.inv_grid_spacing
    }

    /// Query-sphere radius baked into the layers.
    #[must_use]
    pub const fn sphere_radius(&self) -> f32 {
        self.sphere_radius
    }

    /// Cell containing a world point (may be out of bounds).
    #[must_use]
    pub fn cell_of(&self, point: &Point3<f32>) -> CellCoord {
        CellCoord::from_world(point, self.min_x, self.min_z, self.inv_grid_spacing)
    }

    /// Layers of a cell, bottom to top.
    ///
    /// # Panics
    ///
    /// Panics if the cell is outside the grid.
    #[must_use]
    pub fn layers(&self, cell_x: i32, cell_z: i32) -> &[Layer] {
        &self.columns[self.checked_index(cell_x, cell_z)]
    }

    /// Number of layers in a cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell is outside the grid.
    #[must_use]
    pub fn num_layers(&self, cell_x: i32, cell_z: i32) -> usize {
        self.layers(cell_x, cell_z).len()
    }

    /// Total layers across all cells.
    #[must_use]
    pub fn total_layers(&self) -> usize {
        self.columns.iter().map(SmallVec::len).sum()
    }

    /// Appends a free layer on top of a cell's existing layers.
    ///
    /// Layers must be appended bottom to top and must not overlap. This is
    /// only checked in debug builds; the build pipeline that produces grids
    /// is expected to emit them in order.
    ///
    /// # Panics
    ///
    /// Panics if the cell is outside the grid.
    pub fn append_column(&mut self, cell_x: i32, cell_z: i32, free_min: f32, free_max: f32) {
        let index = self.checked_index(cell_x, cell_z);
        let column = &mut self.columns[index];
        debug_assert!(free_min <= free_max, "inverted layer [{free_min}, {free_max}]");
        debug_assert!(
            column.last().is_none_or(|top| top.free_max <= free_min),
            "layer [{free_min}, {free_max}] appended below existing layers in cell ({cell_x}, {cell_z})"
        );
        column.push(Layer::new(free_min, free_max));
    }

    /// Appends the same layer to every cell.
    pub fn fill_uniform(&mut self, free_min: f32, free_max: f32) {
        for cell_x in 0..self.dim_x {
            for cell_z in 0..self.dim_z {
                self.append_column(cell_x, cell_z, free_min, free_max);
            }
        }
    }

    /// Tests a sphere of [`sphere_radius`](Self::sphere_radius) centered at
    /// `point` against the stage.
    ///
    /// Returns `(in_contact, cache)`. Points outside the grid's horizontal
    /// extent and points in cells with no layers are always in contact. The
    /// returned cache names the layer the query settled on, the last layer
    /// whose `free_min` is at or below the point (layer 0 if the point is
    /// below every layer), whether or not the point was free.
    #[must_use]
    pub fn contact_test(&self, point: &Point3<f32>, cache: QueryCache) -> (bool, QueryCache) {
        let Some(index) = self.cell_of(point).linear_index(self.dim_x, self.dim_z) else {
            return (true, cache);
        };
        let layers = &self.columns[index];
        if layers.is_empty() {
            return (true, QueryCache::NONE);
        }
        let y = point.y;

        if let Some(cached) = cache.layer_index()
            && let Some(layer) = layers.get(cached)
            && layer.contains(y)
        {
            return (false, cache);
        }

        let layer_index = layers.partition_point(|layer| layer.free_min <= y).saturating_sub(1);
        let in_contact = !layers[layer_index].contains(y);
        (in_contact, QueryCache::from_layer(layer_index))
    }

    /// Writes the grid in the binary column grid format.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn write_to<W: Write>(&self, mut writer: W) -> SpatialResult<()> {
        writer.write_all(&self.min_x.to_le_bytes())?;
        writer.write_all(&self.min_z.to_le_bytes())?;
        writer.write_all(&self.dim_x.to_le_bytes())?;
        writer.write_all(&self.dim_z.to_le_bytes())?;
        writer.write_all(&self.grid_spacing.to_le_bytes())?;
        writer.write_all(&self.sphere_radius.to_le_bytes())?;
        for column in &self.columns {
            writer.write_all(&(column.len() as i32).to_le_bytes())?;
            for layer in column {
                writer.write_all(&layer.free_min.to_le_bytes())?;
                writer.write_all(&layer.free_max.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Reads a grid in the binary column grid format.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid, a layer count is negative,
    /// or the input is truncated.
    pub fn read_from<R: Read>(reader: R) -> SpatialResult<Self> {
        let mut input = LeReader::new(reader);
        let min_x = input.read_f32()?;
        let min_z = input.read_f32()?;
        let dim_x = input.read_i32()?;
        let dim_z = input.read_i32()?;
        let grid_spacing = input.read_f32()?;
        let sphere_radius = input.read_f32()?;

        let mut grid = Self::new(min_x, min_z, dim_x, dim_z, grid_spacing, sphere_radius)?;
        for cell_x in 0..dim_x {
            for cell_z in 0..dim_z {
                let count = input.read_i32()?;
                let count = usize::try_from(count).map_err(|_| SpatialError::InvalidLayerCount {
                    cell_x,
                    cell_z,
                    count,
                })?;
                let index = grid.checked_index(cell_x, cell_z);
                let column = &mut grid.columns[index];
                column.reserve(count.min(64));
                for _ in 0..count {
                    let free_min = input.read_f32()?;
                    let free_max = input.read_f32()?;
                    column.push(Layer::new(free_min, free_max));
                }
            }
        }
        Ok(grid)
    }

    /// Saves the grid to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SpatialResult<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a grid from a file.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::GridFileNotFound`] if the file does not exist,
    /// or any error from [`read_from`](Self::read_from).
    pub fn load<P: AsRef<Path>>(path: P) -> SpatialResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => SpatialError::GridFileNotFound {
                path: path.to_path_buf(),
            },
            _ => SpatialError::Io(err),
        })?;
        let grid = Self::read_from(BufReader::new(file))?;
        debug!(
            path = %path.display(),
            dim_x = grid.dim_x,
            dim_z = grid.dim_z,
            layers = grid.total_layers(),
            "Loaded column grid"
        );
        Ok(grid)
    }

    fn checked_index(&self, cell_x: i32, cell_z: i32) -> usize {
        let cell = CellCoord::new(cell_x, cell_z);
        match cell.linear_index(self.dim_x, self.dim_z) {
            Some(index) => index,
            None => panic!(
                "cell ({cell_x}, {cell_z}) outside column grid {}x{}",
                self.dim_x, self.dim_z
            ),
        }
    }
}

fn validate_header(
    dim_x: i32,
    dim_z: i32,
    grid_spacing: f32,
    sphere_radius: f32,
) -> SpatialResult<usize> {
    let invalid_dims = || SpatialError::InvalidDimensions { dim_x, dim_z };
    let (Ok(x), Ok(z)) = (usize::try_from(dim_x), usize::try_from(dim_z)) else {
        return Err(invalid_dims());
    };
    let num_cells = x.checked_mul(z).ok_or_else(invalid_dims)?;
    if num_cells == 0 || num_cells > MAX_CELLS {
        return Err(invalid_dims());
    }
    if !grid_spacing.is_finite() || grid_spacing <= 0.0 {
        return Err(SpatialError::InvalidSpacing(grid_spacing));
    }
    if !sphere_radius.is_finite() || sphere_radius < 0.0 {
        return Err(SpatialError::InvalidRadius(sphere_radius));
    }
    Ok(num_cells)
}

/// Little-endian reader that tracks its byte offset for truncation errors.
struct LeReader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> LeReader<R> {
    const fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    fn read_bytes(&mut self) -> SpatialResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                SpatialError::UnexpectedEof {
                    position: self.position,
                }
            } else {
                SpatialError::Io(err)
            }
        })?;
        self.position += 4;
        Ok(buf)
    }

    fn read_f32(&mut self) -> SpatialResult<f32> {
        self.read_bytes().map(f32::from_le_bytes)
    }

    fn read_i32(&mut self) -> SpatialResult<i32> {
        self.read_bytes().map(i32::from_le_bytes)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]
mod tests {
    use super::*;

    const EPS: f32 = 0.001;

    fn hundred_grid() -> ColumnGridSource {
        ColumnGridSource::new(0.0, 0.0, 100, 100, 1.0, 1.0).unwrap()
    }

    fn query(grid: &ColumnGridSource, x: f32, y: f32, z: f32, cache: &mut QueryCache) -> bool {
        let (hit, next) = grid.contact_test(&Point3::new(x, y, z), *cache);
        *cache = next;
        hit
    }

    #[test]
    fn test_empty_grid_is_occupied() {
        let grid = hundred_grid();
        let mut cache = QueryCache(0);
        assert!(query(&grid, 0.5, 0.5, 0.5, &mut cache));
    }

    #[test]
    fn test_single_layer_boundaries() {
        let mut grid = hundred_grid();
        grid.append_column(0, 0, 1.0, 2.0);
        let radius = grid.sphere_radius();
        let mut cache = QueryCache(0);

        assert!(query(&grid, 0.5, 1.0 - EPS, 0.5, &mut cache));
        assert_eq!(cache, QueryCache(0));
        assert!(query(&grid, 0.5, 1.0 - radius * 2.0, 0.5, &mut cache));
        assert!(query(&grid, 0.5, 2.0 + EPS, 0.5, &mut cache));
        assert!(query(&grid, 0.5, 2.0 + radius * 2.0, 0.5, &mut cache));
        assert!(query(&grid, 0.5, 1.0, 0.5, &mut cache));
        assert!(query(&grid, 0.5, 2.0, 0.5, &mut cache));

        assert!(!query(&grid, 0.5, 1.5, 0.5, &mut cache));
        assert_eq!(cache, QueryCache(0));
    }

    #[test]
    fn test_out_of_bounds_is_occupied() {
        let mut grid = hundred_grid();
        grid.fill_uniform(-10.0, 10.0);
        let mut cache = QueryCache::NONE;
        assert!(query(&grid, -EPS, 1.5, 0.5, &mut cache));
        assert!(query(&grid, 100.0 + EPS, 1.5, 0.5, &mut cache));
        assert!(query(&grid, 100.0, 1.5, 0.5, &mut cache));
        assert!(query(&grid, 0.5, 1.5, -EPS, &mut cache));
        assert!(query(&grid, 0.5, 1.5, 100.0 + EPS, &mut cache));
        assert!(!query(&grid, 99.9, 1.5, 99.9, &mut cache));
    }

    #[test]
    fn test_multi_layer_cache_stabilizes() {
        let mut grid = hundred_grid();
        grid.append_column(0, 0, 1.0, 2.0);
        grid.append_column(0, 0, 3.0, 4.0);
        grid.append_column(0, 0, 5.0, 6.0);

        for start in [-1, 0, 1, 2, 3] {
            let mut cache = QueryCache(start);
            assert!(query(&grid, 0.5, 2.5, 0.5, &mut cache), "gap, cache {start}");
            assert_eq!(cache, QueryCache(0));
        }
        for (y, layer) in [(1.5, 0), (3.5, 1), (5.5, 2)] {
            for start in [-1, 0, 1, 2, 3, i16::MAX] {
                let mut cache = QueryCache(start);
                assert!(!query(&grid, 0.5, y, 0.5, &mut cache), "y {y}, cache {start}");
                assert_eq!(cache, QueryCache(layer));
                assert!(!query(&grid, 0.5, y, 0.5, &mut cache));
                assert_eq!(cache, QueryCache(layer));
            }
        }
        let mut cache = QueryCache(2);
        assert!(query(&grid, 0.5, 0.0, 0.5, &mut cache));
        assert_eq!(cache, QueryCache(0));
        assert!(query(&grid, 0.5, 7.0, 0.5, &mut cache));
        assert_eq!(cache, QueryCache(2));
    }

    #[test]
    fn test_corner_cells_are_independent() {
        let mut grid = hundred_grid();
        grid.append_column(99, 0, 7.0, 8.0);
        grid.append_column(0, 99, 9.0, 10.0);
        grid.append_column(99, 99, 11.0, 12.0);
        let mut cache = QueryCache(0);

        assert!(!query(&grid, 99.5, 7.5, 0.5, &mut cache));
        assert!(query(&grid, 99.5, 9.5, 0.5, &mut cache));
        assert!(query(&grid, 99.5, 11.5, 0.5, &mut cache));

        assert!(query(&grid, 0.5, 7.5, 99.5, &mut cache));
        assert!(!query(&grid, 0.5, 9.5, 99.5, &mut cache));
        assert!(query(&grid, 0.5, 11.5, 99.5, &mut cache));

        assert!(query(&grid, 99.5, 7.5, 99.5, &mut cache));
        assert!(query(&grid, 99.5, 9.5, 99.5, &mut cache));
        assert!(!query(&grid, 99.5, 11.5, 99.5, &mut cache));
    }

    fn counted_grid() -> ColumnGridSource {
        let mut grid = ColumnGridSource::new(1.0, 2.0, 3, 4, 5.0, 6.0).unwrap();
        let mut counter = 0;
        for cell_x in 0..grid.dim_x() {
            for cell_z in 0..grid.dim_z() {
                let num_layers = counter % 10;
                counter += 1;
                for _ in 0..num_layers {
                    let a = counter as f32;
                    let b = (counter + 1) as f32;
                    counter += 2;
                    grid.append_column(cell_x, cell_z, a, b);
                }
            }
        }
        grid
    }

    #[test]
    fn test_save_load_roundtrip() {
        let grid = counted_grid();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp.columngrid");
        grid.save(&path).unwrap();

        let loaded = ColumnGridSource::load(&path).unwrap();
        assert_eq!(loaded.min_x(), 1.0);
        assert_eq!(loaded.min_z(), 2.0);
        assert_eq!(loaded.dim_x(), 3);
        assert_eq!(loaded.dim_z(), 4);
        assert_eq!(loaded.grid_spacing(), 5.0);
        assert_eq!(loaded.inv_grid_spacing(), grid.inv_grid_spacing());
        assert_eq!(loaded.sphere_radius(), 6.0);
        for cell_x in 0..3 {
            for cell_z in 0..4 {
                assert_eq!(loaded.layers(cell_x, cell_z), grid.layers(cell_x, cell_z));
            }
        }
        assert_eq!(loaded, grid);
    }

    #[test]
    fn test_header_layout() {
        let mut grid = ColumnGridSource::new(1.0, 2.0, 1, 2, 0.5, 0.25).unwrap();
        grid.append_column(0, 1, 3.0, 4.0);
        let mut bytes = Vec::new();
        grid.write_to(&mut bytes).unwrap();

        // header (24) + cell 0 count (4) + cell 1 count (4) + one pair (8)
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[8..12], &1i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2i32.to_le_bytes());
        assert_eq!(&bytes[24..28], &0i32.to_le_bytes());
        assert_eq!(&bytes[28..32], &1i32.to_le_bytes());
        assert_eq!(&bytes[32..36], &3.0f32.to_le_bytes());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let grid = counted_grid();
        let mut bytes = Vec::new();
        grid.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);

        let err = ColumnGridSource::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, SpatialError::UnexpectedEof { .. }));

        let err = ColumnGridSource::read_from(&bytes[..10]).unwrap_err();
        assert!(matches!(err, SpatialError::UnexpectedEof { position: 8 }));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut bytes = Vec::new();
        for value in [0.0f32, 0.0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&0.1f32.to_le_bytes());
        let err = ColumnGridSource::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            SpatialError::InvalidDimensions { dim_x: 0, dim_z: 4 }
        ));

        assert!(matches!(
            ColumnGridSource::new(0.0, 0.0, 2, 2, -1.0, 0.1),
            Err(SpatialError::InvalidSpacing(_))
        ));
        assert!(matches!(
            ColumnGridSource::new(0.0, 0.0, 2, 2, 1.0, f32::NAN),
            Err(SpatialError::InvalidRadius(_))
        ));
    }

    #[test]
    fn test_negative_layer_count_rejected() {
        let grid = ColumnGridSource::new(0.0, 0.0, 1, 1, 1.0, 0.1).unwrap();
        let mut bytes = Vec::new();
        grid.write_to(&mut bytes).unwrap();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&(-2i32).to_le_bytes());
        let err = ColumnGridSource::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            SpatialError::InvalidLayerCount { count: -2, .. }
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ColumnGridSource::load(dir.path().join("nope.columngrid")).unwrap_err();
        assert!(matches!(err, SpatialError::GridFileNotFound { .. }));
    }

    #[test]
    #[should_panic(expected = "outside column grid")]
    fn test_append_out_of_range_panics() {
        let mut grid = hundred_grid();
        grid.append_column(100, 0, 0.0, 1.0);
    }

    #[test]
    fn test_query_cache_conversions() {
        assert_eq!(QueryCache::from_layer(3).layer_index(), Some(3));
        assert_eq!(QueryCache::NONE.layer_index(), None);
        assert_eq!(QueryCache::from_layer(usize::MAX), QueryCache::NONE);
    }
}
