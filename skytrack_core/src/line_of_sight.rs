//! Single-view location fallback.
//!
//! When an object cannot be triangulated, each usable sighting is located by
//! following its camera ray down to the terrain.

use crate::camera::{camera_down_angle, camera_position, ray_direction, CameraIntrinsics};
use crate::config::TrackerConfig;
use nalgebra::{Vector2, Vector3};
use skytrack_env::{CameraPose, TerrainOracle};

/// Halvings of the bracketing step once the ray has crossed the ground.
const BISECTION_ITERATIONS: u32 = 40;

/// Where a ray meets the terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundHit {
    /// (easting, northing, elevation)
    pub point: Vector3<f64>,

    /// Height of `point` above the terrain there. Never negative.
    pub height_m: f64,

    /// Distance from the camera along the ray
    pub range_m: f64,
}

impl GroundHit {
    #[inline]
    pub fn location(&self) -> Vector2<f64> {
        Vector2::new(self.point.x, self.point.y)
    }
}

/// Reasons a ray cannot be followed to the ground.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LineOfSightError {
    #[error("Camera looks {down_deg:.1}° below the horizon, minimum is {min_deg}°")]
    NearHorizon { down_deg: f64, min_deg: f64 },

    #[error("Drone is {height_m:.1} m above ground, minimum is {min_m} m")]
    TooLow { height_m: f64, min_m: f64 },

    #[error("No terrain data at ({easting:.1}, {northing:.1})")]
    NoTerrainData { easting: f64, northing: f64 },

    #[error("Terrain grid spacing {spacing_m} m cannot be marched")]
    BadGridSpacing { spacing_m: f64 },

    #[error("Ray does not reach the ground within {max_range_m} m")]
    NoIntersection { max_range_m: f64 },
}

/// Follows the ray through `(pixel_x, pixel_y)` to the terrain.
///
/// The ray is marched in steps no longer than the terrain grid spacing and
/// the first crossing is refined by bisection. The returned point is the
/// last one found above ground.
pub fn line_of_sight<T: TerrainOracle>(
    pixel_x: f64,
    pixel_y: f64,
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    terrain: &T,
    config: &TrackerConfig,
) -> Result<GroundHit, LineOfSightError> {
    let down_deg = camera_down_angle(pose);
    if down_deg < config.min_camera_down_deg {
        return Err(LineOfSightError::NearHorizon {
            down_deg,
            min_deg: config.min_camera_down_deg,
        });
    }

    let ground_below = terrain
        .elevation(pose.easting, pose.northing)
        .ok_or(LineOfSightError::NoTerrainData {
            easting: pose.easting,
            northing: pose.northing,
        })?;
    let drone_height = pose.altitude - ground_below;
    if drone_height < config.min_drone_height_m {
        return Err(LineOfSightError::TooLow {
            height_m: drone_height,
            min_m: config.min_drone_height_m,
        });
    }

    let origin = camera_position(pose);
    let ray = ray_direction(pixel_x, pixel_y, pose, intrinsics);
    let clearance = |t: f64| -> Result<f64, LineOfSightError> {
        let p = origin + ray * t;
        terrain
            .elevation(p.x, p.y)
            .map(|ground| p.z - ground)
            .ok_or(LineOfSightError::NoTerrainData {
                easting: p.x,
                northing: p.y,
            })
    };

    let spacing = terrain.grid_spacing();
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(LineOfSightError::BadGridSpacing { spacing_m: spacing });
    }
    let step = spacing.min(config.los_max_range_m);
    let mut above = 0.0;
    let mut below = None;
    let mut t = 0.0;
    while t < config.los_max_range_m {
        t = (t + step).min(config.los_max_range_m);
        if clearance(t)? <= 0.0 {
            below = Some(t);
            break;
        }
        above = t;
    }
    let Some(mut below) = below else {
        return Err(LineOfSightError::NoIntersection {
            max_range_m: config.los_max_range_m,
        });
    };

    for _ in 0..BISECTION_ITERATIONS {
        let mid = 0.5 * (above + below);
        if clearance(mid)? > 0.0 {
            above = mid;
        } else {
            below = mid;
        }
    }

    let point = origin + ray * above;
    Ok(GroundHit {
        point,
        height_m: clearance(above)?.max(0.0),
        range_m: above,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use skytrack_env::{FlatTerrain, GridTerrain};

    fn center_pixel() -> (f64, f64) {
        CameraIntrinsics::dji_m2ea_thermal().principal_point()
    }

    fn cast(
        pose: &CameraPose,
        terrain: &impl TerrainOracle,
        config: &TrackerConfig,
    ) -> Result<GroundHit, LineOfSightError> {
        let (cx, cy) = center_pixel();
        line_of_sight(cx, cy, pose, &CameraIntrinsics::dji_m2ea_thermal(), terrain, config)
    }

    #[test]
    fn test_nadir_over_flat_terrain() {
        let pose = CameraPose::nadir(300.0, 400.0, 150.0, 45.0);
        let hit = cast(&pose, &FlatTerrain::new(50.0), &TrackerConfig::default()).unwrap();

        assert_relative_eq!(hit.point, Vector3::new(300.0, 400.0, 50.0), epsilon = 1e-6);
        assert_relative_eq!(hit.range_m, 100.0, epsilon = 1e-6);
        assert!(hit.height_m >= 0.0 && hit.height_m < 1e-6);
    }

    #[test]
    fn test_oblique_over_flat_terrain() {
        let mut pose = CameraPose::nadir(0.0, 0.0, 150.0, 0.0);
        pose.pitch_deg = -45.0;
        let hit = cast(&pose, &FlatTerrain::new(50.0), &TrackerConfig::default()).unwrap();

        // 100 m drop at 45° lands 100 m north
        assert_relative_eq!(hit.location(), Vector2::new(0.0, 100.0), epsilon = 1e-6);
        assert_relative_eq!(hit.range_m, 100.0 * 2f64.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_oblique_over_rising_terrain() {
        // Ground rises 1 m per 10 m northwards
        let terrain = GridTerrain::from_fn(0.0, 0.0, 5.0, 60, 100, |_, n| 50.0 + 0.1 * n).unwrap();
        let mut pose = CameraPose::nadir(100.0, 100.0, 200.0, 0.0);
        pose.pitch_deg = -45.0;

        // 200 - s = 50 + 0.1 (100 + s)  →  s = 140 / 1.1
        let s = 140.0 / 1.1;
        let hit = cast(&pose, &terrain, &TrackerConfig::default()).unwrap();
        assert_relative_eq!(hit.point.y, 100.0 + s, epsilon = 1e-6);
        assert_relative_eq!(hit.point.z, 200.0 - s, epsilon = 1e-6);
    }

    #[test]
    fn test_preconditions() {
        let config = TrackerConfig::default();
        let flat = FlatTerrain::new(50.0);

        let mut shallow = CameraPose::nadir(0.0, 0.0, 150.0, 0.0);
        shallow.pitch_deg = -10.0;
        assert!(matches!(
            cast(&shallow, &flat, &config),
            Err(LineOfSightError::NearHorizon { .. })
        ));

        let low = CameraPose::nadir(0.0, 0.0, 55.0, 0.0);
        assert_eq!(
            cast(&low, &flat, &config),
            Err(LineOfSightError::TooLow {
                height_m: 5.0,
                min_m: 10.0
            })
        );
    }

    #[test]
    fn test_missing_terrain_and_no_intersection() {
        let terrain = GridTerrain::from_fn(0.0, 0.0, 10.0, 10, 10, |_, _| 0.0).unwrap();
        let outside = CameraPose::nadir(500.0, 500.0, 100.0, 0.0);
        assert!(matches!(
            cast(&outside, &terrain, &TrackerConfig::default()),
            Err(LineOfSightError::NoTerrainData { .. })
        ));

        // 16° down from 100 m needs ~363 m of ray
        let config = TrackerConfig {
            los_max_range_m: 200.0,
            ..Default::default()
        };
        let mut pose = CameraPose::nadir(0.0, 0.0, 150.0, 0.0);
        pose.pitch_deg = -16.0;
        assert_eq!(
            cast(&pose, &FlatTerrain::new(50.0), &config),
            Err(LineOfSightError::NoIntersection { max_range_m: 200.0 })
        );
    }

    #[test]
    fn test_ray_leaving_raster_mid_march() {
        // 100 m square at sea level; the ray crosses the northern edge 50 m up
        let terrain = GridTerrain::from_fn(0.0, 0.0, 5.0, 21, 21, |_, _| 0.0).unwrap();
        let mut pose = CameraPose::nadir(50.0, 50.0, 100.0, 0.0);
        pose.pitch_deg = -45.0;

        match cast(&pose, &terrain, &TrackerConfig::default()) {
            Err(LineOfSightError::NoTerrainData { northing, .. }) => assert!(northing > 100.0),
            other => panic!("expected NoTerrainData, got {other:?}"),
        }
    }

    struct Degenerate(f64);

    impl TerrainOracle for Degenerate {
        fn elevation(&self, _easting: f64, _northing: f64) -> Option<f64> {
            Some(0.0)
        }

        fn grid_spacing(&self) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_unusable_grid_spacing_is_rejected() {
        let pose = CameraPose::nadir(0.0, 0.0, 100.0, 0.0);
        let config = TrackerConfig::default();
        for spacing in [0.0, -2.0, f64::NAN] {
            assert!(matches!(
                cast(&pose, &Degenerate(spacing), &config),
                Err(LineOfSightError::BadGridSpacing { .. })
            ));
        }
    }
}
