//! SkyTrack Deterministic Simulation Harness
//!
//! Plays every collaborator the tracker depends on, so whole surveys can be
//! replayed bit-for-bit from a single 64-bit seed:
//! - **Flight path**: parametric hover, transect and orbit flights sampled
//!   into a `PoseTable`
//! - **Terrain**: flat, sloped and hilly `GridTerrain` rasters
//! - **Detection**: a synthetic thermal detector that projects ground-truth
//!   animals into the camera, with seeded jitter and dropouts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌───────────────────────────┐     ┌────────────────────┐   │
//! │  │          Oracle           │     │   ObjectTracker    │   │
//! │  │  animals · flight · DEM   │────►│  (skytrack_core)   │   │
//! │  │  synthetic detector       │     └─────────┬──────────┘   │
//! │  └─────────────┬─────────────┘               │ summaries    │
//! │                │ ground truth      ┌─────────▼──────────┐   │
//! │                └──────────────────►│ ValidationSession  │   │
//! │                                    └────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use skytrack_sim::{ScenarioId, ScenarioRunner};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Transect);
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;
pub mod terrain;

pub use error::SimError;
pub use exporter::{AnimalPosition, ObjectState, SimEvent, SimExport, SimFrame};
pub use oracle::{Animal, FlightPlan, Oracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, DEFAULT_BLOCKS};
pub use scenarios::{AcceptanceCriteria, ScenarioId, ScenarioSetup};
