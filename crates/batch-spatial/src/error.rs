//! Error types for spatial operations.

use std::path::PathBuf;

/// Result type for spatial operations.
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Errors that can occur while building, loading or saving spatial grids.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SpatialError {
    /// The cell size must be positive and finite.
    #[error("grid spacing must be positive and finite, got {0}")]
    InvalidSpacing(f32),

    /// The grid dimensions are invalid.
    #[error("invalid grid dimensions: {dim_x}x{dim_z}")]
    InvalidDimensions {
        /// Cell count along X.
        dim_x: i32,
        /// Cell count along Z.
        dim_z: i32,
    },

    /// The query sphere radius is negative or not finite.
    #[error("sphere radius must be non-negative and finite, got {0}")]
    InvalidRadius(f32),

    /// A cell record declared a negative layer count.
    #[error("cell ({cell_x}, {cell_z}) has invalid layer count {count}")]
    InvalidLayerCount {
        /// Cell X index.
        cell_x: i32,
        /// Cell Z index.
        cell_z: i32,
        /// The layer count read from the file.
        count: i32,
    },

    /// The input ended before the declared content was read.
    #[error("unexpected end of column grid data at byte {position}")]
    UnexpectedEof {
        /// Byte offset at which the input ran out.
        position: u64,
    },

    /// A column grid file for a radius class is missing.
    #[error("column grid file not found: {path}")]
    GridFileNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// A radius class has no column grid.
    #[error("no column grid for radius index {radius_idx} (set has {num_grids})")]
    MissingRadiusClass {
        /// The requested radius index.
        radius_idx: usize,
        /// Number of grids in the set.
        num_grids: usize,
    },

    /// The broadphase grid cannot fit its byte budget.
    #[error(
        "broadphase grid needs {required} bytes at spacing {spacing}, budget is {budget} bytes"
    )]
    BudgetExceeded {
        /// Bytes required at the largest allowed spacing.
        required: usize,
        /// Configured byte budget.
        budget: usize,
        /// The spacing that was tried last.
        spacing: f32,
    },

    /// The broadphase extent is empty or inverted.
    #[error("invalid broadphase extent: x [{min_x}, {max_x}], z [{min_z}, {max_z}]")]
    InvalidExtent {
        /// Minimum X.
        min_x: f32,
        /// Minimum Z.
        min_z: f32,
        /// Maximum X.
        max_x: f32,
        /// Maximum Z.
        max_z: f32,
    },

    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SpatialError::InvalidDimensions { dim_x: 0, dim_z: 4 };
        assert!(err.to_string().contains("0x4"));

        let err = SpatialError::InvalidLayerCount {
            cell_x: 2,
            cell_z: 3,
            count: -7,
        };
        assert!(err.to_string().contains("-7"));

        let err = SpatialError::BudgetExceeded {
            required: 2048,
            budget: 1024,
            spacing: 0.5,
        };
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("1024"));
    }
}
