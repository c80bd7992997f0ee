//! Survey scenarios for the simulation harness.
//!
//! Each scenario fixes a terrain, a flight, a set of animals and detector
//! imperfections, plus the accuracy it must reach to pass.

use crate::oracle::{Animal, FlightPlan};
use crate::terrain::{TerrainKind, SURVEY_CENTER};
use serde::{Deserialize, Serialize};
use skytrack_core::DetectorKind;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// SKY-001: Hovering drone, no baseline, line-of-sight fallback
    Hover,

    /// SKY-002: Straight crabbing pass over flat ground
    Transect,

    /// SKY-003: Orbit with an oblique camera
    Orbit,

    /// SKY-004: Pass over rolling hills
    Hillside,

    // ═══════════════════════════════════════════════════
    // STRESS SCENARIOS
    // ═══════════════════════════════════════════════════
    /// SKY-005: Frequent missed detections and heavier jitter
    Dropout,

    /// SKY-006: Six walking animals close together
    Herd,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Hover,
            ScenarioId::Transect,
            ScenarioId::Orbit,
            ScenarioId::Hillside,
            // Stress
            ScenarioId::Dropout,
            ScenarioId::Herd,
        ]
    }

    /// Returns standard scenarios (clean detections).
    pub fn standard() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Hover,
            ScenarioId::Transect,
            ScenarioId::Orbit,
            ScenarioId::Hillside,
        ]
    }

    /// Returns stress scenarios only.
    pub fn stress() -> Vec<ScenarioId> {
        vec![ScenarioId::Dropout, ScenarioId::Herd]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Hover => "hover",
            ScenarioId::Transect => "transect",
            ScenarioId::Orbit => "orbit",
            ScenarioId::Hillside => "hillside",
            ScenarioId::Dropout => "dropout",
            ScenarioId::Herd => "herd",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Hover => "Drone hovers at 100 m; animals located by line of sight only",
            ScenarioId::Transect => "5 m/s diagonal pass at 100 m over flat ground, three animals",
            ScenarioId::Orbit => "30 m orbit with the camera pitched 70° down at the centre",
            ScenarioId::Hillside => "6 m/s pass over rolling hills, animals on the slopes",
            ScenarioId::Dropout => "Transect with 20% missed detections and 0.5 px jitter",
            ScenarioId::Herd => "Six walking animals 6 m apart, YOLO one-feature-per-block",
        }
    }

    /// Returns true if this is a stress scenario.
    pub fn is_stress(&self) -> bool {
        matches!(self, ScenarioId::Dropout | ScenarioId::Herd)
    }

    /// Builds the scenario's world description.
    pub fn setup(&self) -> ScenarioSetup {
        let (ce, cn) = SURVEY_CENTER;
        let transect = FlightPlan::Transect {
            start_easting: ce - 20.0,
            start_northing: cn - 20.0,
            heading_deg: 45.0,
            speed_mps: 5.0,
            altitude_m: 150.0,
            yaw_deg: 0.0,
        };
        let transect_animals = vec![
            Animal::new("deer", ce, cn),
            Animal::new("deer", ce + 12.0, cn - 10.0),
            Animal::new("boar", ce - 15.0, cn + 8.0).with_size(0.5, 1.4, 0.7),
        ];

        match self {
            ScenarioId::Hover => ScenarioSetup {
                terrain: TerrainKind::Flat,
                flight: FlightPlan::Hover {
                    easting: ce,
                    northing: cn,
                    altitude_m: 150.0,
                    drift_m: 0.3,
                },
                animals: vec![
                    Animal::new("deer", ce + 10.0, cn + 5.0),
                    Animal::new("deer", ce - 10.0, cn - 8.0),
                    Animal::new("boar", ce + 3.0, cn - 12.0).with_size(0.5, 1.4, 0.7),
                ],
                pixel_noise_px: 0.3,
                miss_rate: 0.0,
                detector: DetectorKind::Comb,
                criteria: AcceptanceCriteria::new(1.5, 100.0, 0.0),
            },
            ScenarioId::Transect => ScenarioSetup {
                terrain: TerrainKind::Flat,
                flight: transect,
                animals: transect_animals,
                pixel_noise_px: 0.3,
                miss_rate: 0.0,
                detector: DetectorKind::Comb,
                criteria: AcceptanceCriteria::new(1.0, 100.0, 0.0),
            },
            ScenarioId::Orbit => ScenarioSetup {
                terrain: TerrainKind::Flat,
                flight: FlightPlan::Orbit {
                    center_easting: ce,
                    center_northing: cn,
                    radius_m: 30.0,
                    altitude_m: 130.0,
                    deg_per_s: 12.0,
                    pitch_deg: -70.0,
                },
                animals: vec![
                    Animal::new("deer", ce, cn),
                    Animal::new("deer", ce + 6.0, cn - 3.0),
                    Animal::new("boar", ce - 4.0, cn + 4.0).with_size(0.5, 1.4, 0.7),
                ],
                pixel_noise_px: 0.3,
                miss_rate: 0.0,
                detector: DetectorKind::Comb,
                criteria: AcceptanceCriteria::new(1.0, 100.0, 0.0),
            },
            ScenarioId::Hillside => ScenarioSetup {
                terrain: TerrainKind::Hills,
                flight: FlightPlan::Transect {
                    start_easting: ce - 25.0,
                    start_northing: cn - 25.0,
                    heading_deg: 45.0,
                    speed_mps: 6.0,
                    altitude_m: 185.0,
                    yaw_deg: 0.0,
                },
                animals: vec![
                    Animal::new("elk", ce + 5.0, cn - 5.0).with_size(1.1, 2.2, 1.0),
                    Animal::new("elk", ce - 10.0, cn + 10.0).with_size(1.1, 2.2, 1.0),
                    Animal::new("elk", ce + 15.0, cn + 12.0).with_size(1.1, 2.2, 1.0),
                ],
                pixel_noise_px: 0.3,
                miss_rate: 0.0,
                detector: DetectorKind::Comb,
                criteria: AcceptanceCriteria::new(1.5, 100.0, 0.0),
            },
            ScenarioId::Dropout => ScenarioSetup {
                terrain: TerrainKind::Flat,
                flight: transect,
                animals: transect_animals,
                pixel_noise_px: 0.5,
                miss_rate: 0.2,
                detector: DetectorKind::Comb,
                criteria: AcceptanceCriteria::new(1.5, 100.0, 0.0),
            },
            ScenarioId::Herd => {
                // Walking perpendicular to the flight line
                let offsets = [
                    (-5.0, -4.0),
                    (1.0, -4.0),
                    (7.0, -4.0),
                    (-5.0, 2.0),
                    (1.0, 2.0),
                    (7.0, 2.0),
                ];
                let animals = offsets
                    .into_iter()
                    .map(|(de, dn)| {
                        Animal::new("deer", ce + de, cn + dn).with_velocity(0.1, -0.1)
                    })
                    .collect();
                ScenarioSetup {
                    terrain: TerrainKind::Flat,
                    flight: transect,
                    animals,
                    pixel_noise_px: 0.3,
                    miss_rate: 0.05,
                    detector: DetectorKind::Yolo,
                    criteria: AcceptanceCriteria::new(2.0, 80.0, 20.0),
                }
            }
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hover" | "static" | "sky-001" => Ok(ScenarioId::Hover),
            "transect" | "line" | "sky-002" => Ok(ScenarioId::Transect),
            "orbit" | "circle" | "sky-003" => Ok(ScenarioId::Orbit),
            "hillside" | "hills" | "sky-004" => Ok(ScenarioId::Hillside),
            // Stress
            "dropout" | "misses" | "sky-005" => Ok(ScenarioId::Dropout),
            "herd" | "group" | "sky-006" => Ok(ScenarioId::Herd),
            // Groups
            "stress" => Err("Use --scenario all to include stress scenarios".to_string()),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

// ============================================================================
// SETUP
// ============================================================================

/// Everything needed to build a scenario's oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSetup {
    pub terrain: TerrainKind,
    pub flight: FlightPlan,
    pub animals: Vec<Animal>,

    /// Per-axis standard deviation of blob centre jitter
    pub pixel_noise_px: f64,

    /// Probability of missing a visible animal in one frame
    pub miss_rate: f64,

    /// Detector the blobs are attributed to
    pub detector: DetectorKind,

    pub criteria: AcceptanceCriteria,
}

/// Pass thresholds on the validation report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriteria {
    /// Largest allowed mean location error (metres)
    pub max_avg_error_m: f64,

    /// Smallest allowed share of animals found (percent)
    pub min_coverage_pct: f64,

    /// Largest allowed share of ghost objects (percent)
    pub max_ghost_rate_pct: f64,
}

impl AcceptanceCriteria {
    pub fn new(max_avg_error_m: f64, min_coverage_pct: f64, max_ghost_rate_pct: f64) -> Self {
        Self {
            max_avg_error_m,
            min_coverage_pct,
            max_ghost_rate_pct,
        }
    }
}
