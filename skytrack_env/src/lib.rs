//! SkyTrack Collaborator Interfaces
//!
//! This crate defines the boundary between the SkyTrack tracking core and
//! the systems it depends on but does not implement:
//! - **Flight path**: the drone camera pose for every frame (`PoseOracle`)
//! - **Terrain**: elevation model lookups (`TerrainOracle`)
//! - **Detection**: per-frame candidate blobs (`FeatureDetector`)
//!
//! The core only ever borrows these read-only, so the same tracking code
//! runs against parsed flight logs, real DEM rasters, or the synthetic
//! worlds of `skytrack_sim`.
//!
//! # Example
//!
//! ```
//! use skytrack_env::{BlockId, CameraPose, FlatTerrain, PoseOracle, PoseTable, TerrainOracle};
//!
//! let mut poses = PoseTable::new();
//! poses.insert(BlockId(0), CameraPose::nadir(0.0, 0.0, 150.0, 0.0));
//!
//! let terrain = FlatTerrain::new(50.0);
//! let pose = poses.pose_at(BlockId(0)).unwrap();
//! assert_eq!(pose.altitude - terrain.elevation(0.0, 0.0).unwrap(), 100.0);
//! ```

mod error;
mod memory_impl;
mod oracle;
mod types;

pub use error::EnvError;
pub use memory_impl::{FlatTerrain, GridTerrain, PoseTable};
pub use oracle::{FeatureDetector, PoseOracle, TerrainOracle};
pub use types::{BlockId, CameraPose, HotPixel, PixelBox, RawDetection};
