//! Error types for the SkyTrack collaborator interfaces.

use crate::types::BlockId;
use thiserror::Error;

/// Errors raised by the external collaborators (pose, terrain, detector).
#[derive(Debug, Error)]
pub enum EnvError {
    /// No camera pose is known for the requested block
    #[error("No camera pose for block {0}")]
    MissingPose(BlockId),

    /// The terrain model has no data at the requested location
    #[error("No terrain data at ({easting:.1}, {northing:.1})")]
    NoTerrainData { easting: f64, northing: f64 },

    /// The detector failed to analyse a frame
    #[error("Detector error: {0}")]
    DetectorError(String),

    /// A terrain raster or pose table was malformed
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl EnvError {
    /// Creates a detector error.
    pub fn detector(msg: impl Into<String>) -> Self {
        Self::DetectorError(msg.into())
    }

    /// Creates an invalid-data error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}
