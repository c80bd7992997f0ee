//! Collaborator traits consumed by the SkyTrack core.

use crate::error::EnvError;
use crate::types::{BlockId, CameraPose, RawDetection};

/// Flight-path oracle: the drone camera pose for each processed block.
///
/// # Implementations
///
/// - **In-memory**: `PoseTable` - poses precomputed by the flight log parser
/// - **Simulation**: flight paths generated by `skytrack_sim`
///
/// Lookups must be cheap and non-blocking; implementations backed by disk or
/// network must prefetch outside the per-frame loop.
pub trait PoseOracle: Send + Sync {
    /// Returns the camera pose at `block`, or `None` if the flight log has no
    /// data for that frame.
    fn pose_at(&self, block: BlockId) -> Option<CameraPose>;

    /// Like [`PoseOracle::pose_at`] but reports a missing pose as an error.
    fn require_pose(&self, block: BlockId) -> Result<CameraPose, EnvError> {
        self.pose_at(block).ok_or(EnvError::MissingPose(block))
    }
}

/// Terrain oracle: elevation model (DEM/DSM) lookups.
///
/// Shared read-only between all objects of a run.
pub trait TerrainOracle: Send + Sync {
    /// Returns the ground elevation at `(easting, northing)`, or `None` when
    /// the model has no data there.
    fn elevation(&self, easting: f64, northing: f64) -> Option<f64>;

    /// Horizontal resolution of the model in metres.
    ///
    /// Used as the step size when marching rays over the terrain.
    fn grid_spacing(&self) -> f64 {
        1.0
    }
}

/// Per-frame feature detector (thermal threshold clustering or YOLO).
///
/// Frame decoding happens inside the implementation; the core only sees the
/// resulting candidate boxes.
pub trait FeatureDetector {
    /// Analyses the frame for `block` and returns its candidate blobs.
    fn detect(&mut self, block: BlockId) -> Result<Vec<RawDetection>, EnvError>;
}

impl<T: PoseOracle + ?Sized> PoseOracle for &T {
    fn pose_at(&self, block: BlockId) -> Option<CameraPose> {
        (**self).pose_at(block)
    }
}

impl<T: TerrainOracle + ?Sized> TerrainOracle for &T {
    fn elevation(&self, easting: f64, northing: f64) -> Option<f64> {
        (**self).elevation(easting, northing)
    }

    fn grid_spacing(&self) -> f64 {
        (**self).grid_spacing()
    }
}
