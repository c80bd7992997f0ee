//! In-memory implementations of the collaborator traits.

use crate::error::EnvError;
use crate::oracle::{PoseOracle, TerrainOracle};
use crate::types::{BlockId, CameraPose};
use std::collections::BTreeMap;

/// Camera poses indexed by block.
///
/// This is the "real" pose oracle used once the flight log has been parsed
/// and aligned with the video frames.
#[derive(Debug, Clone, Default)]
pub struct PoseTable {
    poses: BTreeMap<BlockId, CameraPose>,
}

impl PoseTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the pose for `block`, replacing any previous one.
    pub fn insert(&mut self, block: BlockId, pose: CameraPose) {
        self.poses.insert(block, pose);
    }

    /// Number of blocks with a pose.
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Iterates poses in block order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &CameraPose)> {
        self.poses.iter().map(|(b, p)| (*b, p))
    }
}

impl FromIterator<(BlockId, CameraPose)> for PoseTable {
    fn from_iter<I: IntoIterator<Item = (BlockId, CameraPose)>>(iter: I) -> Self {
        Self {
            poses: iter.into_iter().collect(),
        }
    }
}

impl PoseOracle for PoseTable {
    fn pose_at(&self, block: BlockId) -> Option<CameraPose> {
        self.poses.get(&block).copied()
    }
}

/// Terrain with the same elevation everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatTerrain {
    pub elevation: f64,
}

impl FlatTerrain {
    pub fn new(elevation: f64) -> Self {
        Self { elevation }
    }
}

impl TerrainOracle for FlatTerrain {
    fn elevation(&self, _easting: f64, _northing: f64) -> Option<f64> {
        Some(self.elevation)
    }
}

/// Regular elevation raster with bilinear interpolation.
///
/// Row 0 is the southern edge; `origin` is the south-west corner sample.
/// Lookups outside the raster, or touching a NaN sample, return `None`.
#[derive(Debug, Clone)]
pub struct GridTerrain {
    origin_easting: f64,
    origin_northing: f64,
    spacing: f64,
    cols: usize,
    rows: usize,
    heights: Vec<f64>,
}

impl GridTerrain {
    /// Creates a raster from row-major samples (`rows * cols` values).
    pub fn new(
        origin_easting: f64,
        origin_northing: f64,
        spacing: f64,
        cols: usize,
        rows: usize,
        heights: Vec<f64>,
    ) -> Result<Self, EnvError> {
        if !(spacing > 0.0) {
            return Err(EnvError::invalid(format!("grid spacing must be positive, got {spacing}")));
        }
        if cols < 2 || rows < 2 {
            return Err(EnvError::invalid(format!("grid must be at least 2x2, got {cols}x{rows}")));
        }
        if heights.len() != cols * rows {
            return Err(EnvError::invalid(format!(
                "expected {} samples for {}x{} grid, got {}",
                cols * rows,
                cols,
                rows,
                heights.len()
            )));
        }
        Ok(Self {
            origin_easting,
            origin_northing,
            spacing,
            cols,
            rows,
            heights,
        })
    }

    /// Creates a raster by sampling `f(easting, northing)` at every grid node.
    pub fn from_fn(
        origin_easting: f64,
        origin_northing: f64,
        spacing: f64,
        cols: usize,
        rows: usize,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Self, EnvError> {
        let mut heights = Vec::with_capacity(cols * rows);
        for r in 0..rows {
            for c in 0..cols {
                heights.push(f(
                    origin_easting + c as f64 * spacing,
                    origin_northing + r as f64 * spacing,
                ));
            }
        }
        Self::new(origin_easting, origin_northing, spacing, cols, rows, heights)
    }

    /// Extent as `(min_easting, min_northing, max_easting, max_northing)`.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        (
            self.origin_easting,
            self.origin_northing,
            self.origin_easting + (self.cols - 1) as f64 * self.spacing,
            self.origin_northing + (self.rows - 1) as f64 * self.spacing,
        )
    }

    #[inline]
    fn sample(&self, col: usize, row: usize) -> f64 {
        self.heights[row * self.cols + col]
    }
}

impl TerrainOracle for GridTerrain {
    fn elevation(&self, easting: f64, northing: f64) -> Option<f64> {
        let fx = (easting - self.origin_easting) / self.spacing;
        let fy = (northing - self.origin_northing) / self.spacing;
        if !fx.is_finite() || !fy.is_finite() {
            return None;
        }
        let max_x = (self.cols - 1) as f64;
        let max_y = (self.rows - 1) as f64;
        if fx < 0.0 || fy < 0.0 || fx > max_x || fy > max_y {
            return None;
        }

        // Clamp so the far edge interpolates inside the last cell
        let c0 = (fx.floor() as usize).min(self.cols - 2);
        let r0 = (fy.floor() as usize).min(self.rows - 2);
        let tx = fx - c0 as f64;
        let ty = fy - r0 as f64;

        let h00 = self.sample(c0, r0);
        let h10 = self.sample(c0 + 1, r0);
        let h01 = self.sample(c0, r0 + 1);
        let h11 = self.sample(c0 + 1, r0 + 1);

        let south = h00 + (h10 - h00) * tx;
        let north = h01 + (h11 - h01) * tx;
        let h = south + (north - south) * ty;

        if h.is_nan() {
            None
        } else {
            Some(h)
        }
    }

    fn grid_spacing(&self) -> f64 {
        self.spacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pose_table_lookup() {
        let table: PoseTable = (0..3)
            .map(|i| (BlockId(i), CameraPose::nadir(i as f64, 0.0, 100.0, 0.0)))
            .collect();

        assert_eq!(table.len(), 3);
        assert_eq!(table.pose_at(BlockId(2)).unwrap().easting, 2.0);
        assert!(table.pose_at(BlockId(3)).is_none());
        assert!(matches!(
            table.require_pose(BlockId(9)),
            Err(EnvError::MissingPose(BlockId(9)))
        ));
    }

    #[test]
    fn test_flat_terrain() {
        let terrain = FlatTerrain::new(50.0);
        assert_eq!(terrain.elevation(-1e6, 1e6), Some(50.0));
        assert_eq!(terrain.grid_spacing(), 1.0);
    }

    #[test]
    fn test_grid_terrain_bilinear() {
        // Plane: h = 10 + 0.5 * easting + 0.25 * northing
        let plane = |e: f64, n: f64| 10.0 + 0.5 * e + 0.25 * n;
        let grid = GridTerrain::from_fn(0.0, 0.0, 2.0, 11, 11, plane).unwrap();

        // Bilinear interpolation is exact on a plane
        assert_relative_eq!(grid.elevation(3.3, 7.1).unwrap(), 10.0 + 1.65 + 1.775, epsilon = 1e-9);
        assert_relative_eq!(grid.elevation(20.0, 20.0).unwrap(), 25.0, epsilon = 1e-9);
        assert_eq!(grid.grid_spacing(), 2.0);
    }

    #[test]
    fn test_grid_terrain_outside_extent() {
        let grid = GridTerrain::from_fn(100.0, 200.0, 1.0, 5, 5, |_, _| 0.0).unwrap();
        assert_eq!(grid.extent(), (100.0, 200.0, 104.0, 204.0));
        assert!(grid.elevation(99.9, 201.0).is_none());
        assert!(grid.elevation(101.0, 204.1).is_none());
        assert!(grid.elevation(f64::NAN, 201.0).is_none());
    }

    #[test]
    fn test_grid_terrain_nan_sample_is_no_data() {
        let mut heights = vec![1.0; 9];
        heights[4] = f64::NAN;
        let grid = GridTerrain::new(0.0, 0.0, 1.0, 3, 3, heights).unwrap();
        assert!(grid.elevation(1.0, 1.0).is_none());
        assert!(grid.elevation(0.0, 0.0).is_none()); // cell touches the NaN node
    }

    #[test]
    fn test_grid_terrain_rejects_bad_shapes() {
        assert!(GridTerrain::new(0.0, 0.0, 1.0, 3, 3, vec![0.0; 8]).is_err());
        assert!(GridTerrain::new(0.0, 0.0, 0.0, 3, 3, vec![0.0; 9]).is_err());
        assert!(GridTerrain::new(0.0, 0.0, 1.0, 1, 3, vec![0.0; 3]).is_err());
    }
}
