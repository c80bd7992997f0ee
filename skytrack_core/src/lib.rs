//! SkyTrack Core - Multi-View Object Triangulation & Lifetime Tracking
//!
//! Turns per-frame thermal detections from a drone camera into persistent,
//! located objects:
//! 1. **Association**: features are claimed frame by frame by the objects
//!    whose predicted boxes they overlap, with a short persistence window
//!    bridging missed detections
//! 2. **Location**: rays from several drone positions are triangulated into
//!    a ground point and height; single views fall back to line of sight
//!    against the terrain model
//! 3. **Significance**: pixel count, density, duration and elevation decide
//!    which objects are worth reporting
//!
//! Collaborators (flight log, terrain model, detector) are reached through
//! the traits of `skytrack_env`.

pub mod camera;
pub mod config;
pub mod feature;
pub mod line_of_sight;
pub mod object;
pub mod significance;
pub mod summary;
pub mod tracker;
pub mod triangulation;
pub mod validation;

// Re-export key types for convenience
pub use camera::CameraIntrinsics;
pub use config::{ConfigError, DetectorKind, DetectorSettings, InputKind, TrackerConfig};
pub use feature::{Feature, FeatureArena, FeatureId, FeatureKind};
pub use line_of_sight::{GroundHit, LineOfSightError};
pub use object::{Object, ObjectId};
pub use summary::ObjectSummary;
pub use tracker::{BlockOutcome, ObjectTracker};
pub use triangulation::{RefinementStatus, TriangulationError, TriangulationResult};
pub use validation::{ValidationReport, ValidationSession};
