//! JSON exporter for offline inspection of a run.
//!
//! Records, block by block, where the drone and the animals were and what
//! the tracker believed, then the final object summaries.

use crate::error::SimError;
use crate::oracle::Oracle;
use serde::{Deserialize, Serialize};
use skytrack_core::{BlockOutcome, ObjectSummary, ObjectTracker};
use skytrack_env::{BlockId, CameraPose, PixelBox, PoseOracle};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single block of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    pub block: BlockId,

    /// Simulation time in seconds
    pub time_sec: f64,

    pub drone: Option<CameraPose>,

    /// Ground truth animal positions
    pub ground_truth: Vec<AnimalPosition>,

    /// Tracker state for every object created so far
    pub objects: Vec<ObjectState>,

    /// Lifecycle events (objects created, deactivated)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    /// Snapshot after `outcome` has been applied to `tracker`.
    pub fn capture(oracle: &Oracle, tracker: &ObjectTracker, outcome: &BlockOutcome) -> Self {
        let block = outcome.block;
        let time_sec = oracle.time_at(block);

        let ground_truth = oracle
            .animals()
            .iter()
            .map(|animal| {
                let position = animal.position_at(time_sec);
                AnimalPosition {
                    id: animal.id,
                    easting: position.x,
                    northing: position.y,
                    in_view: oracle.in_view(animal, block),
                }
            })
            .collect();

        let objects = tracker
            .objects()
            .iter()
            .map(|object| {
                let last = tracker.features().get(object.last_feature_id());
                ObjectState {
                    name: object.name.clone(),
                    active: object.being_tracked,
                    significant: object.significant,
                    location: object.location.map(|l| [l.x, l.y]),
                    height_m: object.height_m,
                    pixel_box: (last.block_id == block).then_some(last.pixel_box),
                }
            })
            .collect();

        let mut events = Vec::new();
        for id in &outcome.created {
            events.push(SimEvent::info(format!("created {id}")));
        }
        for id in &outcome.deactivated {
            events.push(SimEvent::info(format!("deactivated {id}")));
        }

        Self {
            block,
            time_sec,
            drone: oracle.poses().pose_at(block),
            ground_truth,
            objects,
            events,
        }
    }
}

/// Position of an animal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimalPosition {
    pub id: u32,
    pub easting: f64,
    pub northing: f64,
    pub in_view: bool,
}

/// Tracker view of one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectState {
    pub name: String,
    pub active: bool,
    pub significant: bool,
    pub location: Option<[f64; 2]>,
    pub height_m: Option<f64>,

    /// Box of the feature claimed this block (real or placeholder)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_box: Option<PixelBox>,
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: String) -> Self {
        Self {
            message,
            level: Some("info".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Reported objects at the end of the run
    pub summaries: Vec<ObjectSummary>,

    /// Final results
    pub passed: bool,

    /// Mean location error over found animals, if any were found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_avg_error: Option<f64>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            summaries: Vec::new(),
            passed: false,
            final_avg_error: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(
        &mut self,
        passed: bool,
        summaries: Vec<ObjectSummary>,
        avg_error: Option<f64>,
    ) {
        self.passed = passed;
        self.summaries = summaries;
        self.final_avg_error = avg_error;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
