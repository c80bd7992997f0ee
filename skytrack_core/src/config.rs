//! Tracker configuration.
//!
//! Every threshold the tracker, significance heuristic, triangulation solver
//! and line-of-sight estimator consult lives here. The struct is threaded
//! explicitly through the tracker; nothing reads global state.

use serde::{Deserialize, Serialize};

// ============================================================================
// ENUMS
// ============================================================================

/// Kind of source footage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Video: features persist across frames, duration gate applies
    Video,

    /// Single still images: no persistence window, duration gate bypassed
    Image,
}

/// Which detector produced a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Thermal threshold clustering ("comb")
    Comb,

    /// YOLO neural detector
    Yolo,
}

impl DetectorKind {
    /// Letter used as the prefix of object names.
    pub fn prefix(&self) -> char {
        match self {
            DetectorKind::Comb => 'C',
            DetectorKind::Yolo => 'Y',
        }
    }
}

/// Detector-specific tracking behaviour.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// When set, an object claims at most one feature per block and refuses
    /// further candidates. When clear, a second overlapping feature in the
    /// same block is consumed into the first.
    pub one_feature_per_block: bool,
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the ObjectTracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Source footage kind (default: Video)
    pub input: InputKind,

    /// Duration of one block in milliseconds (default: 33.3 = 30 fps)
    pub frame_duration_ms: f64,

    /// Minimum hot pixels for a feature to be significant (default: 8)
    pub feature_min_pixels: u32,

    /// Minimum overlap percentage for a feature to match an expected box (default: 5%)
    pub feature_min_overlap_perc: f64,

    /// Object pixel tier base: ok/good/great at 1x/2x/4x (default: 10)
    pub object_min_pixels: u32,

    /// Upper bound on hot pixels for an object (default: 1000, None = no cap)
    pub object_max_pixels: Option<u32>,

    /// Minimum of the object's largest per-feature hot pixel count (default: 8)
    pub object_min_max_heat_pixels: u32,

    /// Minimum ratio of hot pixels to the inscribed-ellipse area (default: 0.3)
    pub object_min_hot_density: f64,

    /// Duration tier base in milliseconds: ok/good/great at 1x/2x/4x (default: 500)
    pub object_min_duration_ms: f64,

    /// Consecutive unreal blocks tolerated before tracking stops (default: 5)
    pub object_max_unreal_blocks: u32,

    /// Camera must look at least this far below the horizon (default: 15°)
    pub min_camera_down_deg: f64,

    /// Minimum drone height above ground for line of sight (default: 10 m)
    pub min_drone_height_m: f64,

    /// Minimum spread of camera positions for triangulation (default: 1 m)
    pub min_baseline_m: f64,

    /// Triangulated points closer than this to a camera are rejected (default: 1 m)
    pub min_range_m: f64,

    /// Line-of-sight ray march limit (default: 2000 m)
    pub los_max_range_m: f64,

    /// Run bounded Levenberg-Marquardt after the linear solve (default: false)
    pub refine: bool,

    /// Refinement box half-width around the linear solution (default: 20 m)
    pub refine_bound_m: f64,

    /// Refinement iteration limit (default: 50)
    pub refine_max_iterations: u32,

    /// Thermal clustering detector settings
    pub comb: DetectorSettings,

    /// YOLO detector settings (default: one feature per block)
    pub yolo: DetectorSettings,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            input: InputKind::Video,
            frame_duration_ms: 33.3,
            feature_min_pixels: 8,
            feature_min_overlap_perc: 5.0,
            object_min_pixels: 10,
            object_max_pixels: Some(1000),
            object_min_max_heat_pixels: 8,
            object_min_hot_density: 0.3,
            object_min_duration_ms: 500.0,
            object_max_unreal_blocks: 5,
            min_camera_down_deg: 15.0,
            min_drone_height_m: 10.0,
            min_baseline_m: 1.0,
            min_range_m: 1.0,
            los_max_range_m: 2000.0,
            refine: false,
            refine_bound_m: 20.0,
            refine_max_iterations: 50,
            comb: DetectorSettings {
                one_feature_per_block: false,
            },
            yolo: DetectorSettings {
                one_feature_per_block: true,
            },
        }
    }
}

impl TrackerConfig {
    /// Settings for the given detector.
    pub fn detector(&self, kind: DetectorKind) -> &DetectorSettings {
        match kind {
            DetectorKind::Comb => &self.comb,
            DetectorKind::Yolo => &self.yolo,
        }
    }

    /// Returns true for video input.
    #[inline]
    pub fn is_video(&self) -> bool {
        self.input == InputKind::Video
    }

    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every threshold is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
            }
        }

        positive("frame_duration_ms", self.frame_duration_ms)?;
        positive("los_max_range_m", self.los_max_range_m)?;
        positive("refine_bound_m", self.refine_bound_m)?;

        if !(0.0..=100.0).contains(&self.feature_min_overlap_perc) {
            return Err(ConfigError::invalid(
                "feature_min_overlap_perc",
                format!("must be within 0..=100, got {}", self.feature_min_overlap_perc),
            ));
        }
        if !(0.0..90.0).contains(&self.min_camera_down_deg) {
            return Err(ConfigError::invalid(
                "min_camera_down_deg",
                format!("must be within 0..90, got {}", self.min_camera_down_deg),
            ));
        }
        if let Some(cap) = self.object_max_pixels {
            if cap <= self.object_min_pixels {
                return Err(ConfigError::invalid(
                    "object_max_pixels",
                    format!("cap {cap} must exceed object_min_pixels {}", self.object_min_pixels),
                ));
            }
        }
        for (field, value) in [
            ("object_min_hot_density", self.object_min_hot_density),
            ("object_min_duration_ms", self.object_min_duration_ms),
            ("min_drone_height_m", self.min_drone_height_m),
            ("min_baseline_m", self.min_baseline_m),
            ("min_range_m", self.min_range_m),
        ] {
            if !(value >= 0.0) {
                return Err(ConfigError::invalid(
                    field,
                    format!("must not be negative, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised while building or loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates an invalid-value error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
