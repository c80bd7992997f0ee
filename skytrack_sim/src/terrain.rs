//! Synthetic terrain models.
//!
//! Every scenario flies over a 400 m square raster centred on
//! (1000 E, 2000 N). Animals stand on the raster itself, so the tracker and
//! the ground truth agree on the ground level exactly.

use serde::{Deserialize, Serialize};
use skytrack_env::{EnvError, GridTerrain};

/// Centre of the simulated survey area (easting, northing)
pub const SURVEY_CENTER: (f64, f64) = (1000.0, 2000.0);

/// Ground elevation at the survey centre for every terrain kind
pub const BASE_ELEVATION_M: f64 = 50.0;

const GRID_SPACING_M: f64 = 2.0;
const GRID_SAMPLES: usize = 201;

/// Shape of the synthetic ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainKind {
    /// Level ground
    Flat,
    /// Plane rising 10% towards the east
    Slope,
    /// Rolling hills on a gentle northward tilt
    Hills,
}

impl TerrainKind {
    /// Analytic elevation at `(easting, northing)`.
    pub fn elevation(&self, easting: f64, northing: f64) -> f64 {
        let de = easting - SURVEY_CENTER.0;
        let dn = northing - SURVEY_CENTER.1;
        match self {
            TerrainKind::Flat => BASE_ELEVATION_M,
            TerrainKind::Slope => BASE_ELEVATION_M + 0.1 * de,
            TerrainKind::Hills => {
                BASE_ELEVATION_M + 12.0 * (de / 45.0).sin() * (dn / 60.0).cos() + 0.05 * dn
            }
        }
    }
}

/// Samples `kind` into a raster covering the survey area.
pub fn build_terrain(kind: TerrainKind) -> Result<GridTerrain, EnvError> {
    let half = (GRID_SAMPLES - 1) as f64 * GRID_SPACING_M / 2.0;
    GridTerrain::from_fn(
        SURVEY_CENTER.0 - half,
        SURVEY_CENTER.1 - half,
        GRID_SPACING_M,
        GRID_SAMPLES,
        GRID_SAMPLES,
        |e, n| kind.elevation(e, n),
    )
}
