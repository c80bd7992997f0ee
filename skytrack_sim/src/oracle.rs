//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated survey:
//! - True positions of all animals (constant-velocity kinematics)
//! - The drone flight path, precomputed into a `PoseTable`
//! - The terrain raster
//! - Synthetic thermal frames: it implements `FeatureDetector` by projecting
//!   each animal into the camera and painting a blob, with seeded pixel
//!   jitter and random missed detections

use crate::error::SimError;
use nalgebra::{Vector2, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use skytrack_core::camera::{camera_position, project};
use skytrack_core::CameraIntrinsics;
use skytrack_env::{
    BlockId, CameraPose, EnvError, FeatureDetector, GridTerrain, HotPixel, PixelBox, PoseOracle,
    PoseTable, RawDetection, TerrainOracle,
};

/// Blobs are never painted smaller than this many pixels per side.
const MIN_BLOB_SIDE_PX: i32 = 3;

/// Heat at the rim and at the centre of a painted blob.
const RIM_HEAT: f64 = 140.0;
const CORE_HEAT: f64 = 240.0;

// ============================================================================
// ANIMALS
// ============================================================================

/// A ground truth animal in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    /// Unique animal ID (assigned by the oracle, starting at 1)
    pub id: u32,

    /// Species label, e.g. "deer"
    pub label: String,

    /// Ground position (easting, northing) at time zero
    pub start: Vector2<f64>,

    /// Ground velocity in m/s
    pub velocity: Vector2<f64>,

    /// Height of the body centre above the ground
    pub body_height_m: f64,

    /// Body length along the image x axis
    pub length_m: f64,

    /// Body width along the image y axis
    pub width_m: f64,
}

impl Animal {
    /// A stationary, deer-sized animal at `(easting, northing)`.
    pub fn new(label: &str, easting: f64, northing: f64) -> Self {
        Self {
            id: 0,
            label: label.to_string(),
            start: Vector2::new(easting, northing),
            velocity: Vector2::zeros(),
            body_height_m: 0.8,
            length_m: 1.6,
            width_m: 0.8,
        }
    }

    pub fn with_velocity(mut self, east_mps: f64, north_mps: f64) -> Self {
        self.velocity = Vector2::new(east_mps, north_mps);
        self
    }

    pub fn with_size(mut self, body_height_m: f64, length_m: f64, width_m: f64) -> Self {
        self.body_height_m = body_height_m;
        self.length_m = length_m;
        self.width_m = width_m;
        self
    }

    /// Ground position after `time_s` seconds.
    pub fn position_at(&self, time_s: f64) -> Vector2<f64> {
        self.start + self.velocity * time_s
    }
}

// ============================================================================
// FLIGHT PATHS
// ============================================================================

/// Parametric drone flight.
///
/// Altitudes are above the datum, not above ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlightPlan {
    /// Holds station looking straight down, drifting on a small circle
    Hover {
        easting: f64,
        northing: f64,
        altitude_m: f64,
        drift_m: f64,
    },

    /// Straight line at constant speed with a nadir camera.
    ///
    /// `yaw_deg` is independent of `heading_deg`: crabbing sideways moves
    /// the scene diagonally through the image.
    Transect {
        start_easting: f64,
        start_northing: f64,
        heading_deg: f64,
        speed_mps: f64,
        altitude_m: f64,
        yaw_deg: f64,
    },

    /// Counter-clockwise circle with the camera pitched at the centre.
    /// Starts due south of the centre.
    Orbit {
        center_easting: f64,
        center_northing: f64,
        radius_m: f64,
        altitude_m: f64,
        deg_per_s: f64,
        pitch_deg: f64,
    },
}

impl FlightPlan {
    /// Camera pose `time_s` seconds into the flight.
    pub fn pose_at(&self, time_s: f64) -> CameraPose {
        match *self {
            FlightPlan::Hover {
                easting,
                northing,
                altitude_m,
                drift_m,
            } => {
                let phase = std::f64::consts::TAU * time_s / 8.0;
                CameraPose::nadir(
                    easting + drift_m * phase.sin(),
                    northing + drift_m * (phase.cos() - 1.0),
                    altitude_m,
                    0.0,
                )
            }
            FlightPlan::Transect {
                start_easting,
                start_northing,
                heading_deg,
                speed_mps,
                altitude_m,
                yaw_deg,
            } => {
                let distance = speed_mps * time_s;
                let heading = heading_deg.to_radians();
                CameraPose::nadir(
                    start_easting + distance * heading.sin(),
                    start_northing + distance * heading.cos(),
                    altitude_m,
                    yaw_deg,
                )
            }
            FlightPlan::Orbit {
                center_easting,
                center_northing,
                radius_m,
                altitude_m,
                deg_per_s,
                pitch_deg,
            } => {
                let theta = (-90.0 + deg_per_s * time_s).to_radians();
                let easting = center_easting + radius_m * theta.cos();
                let northing = center_northing + radius_m * theta.sin();
                // Compass yaw towards the centre
                let yaw_deg = (center_easting - easting)
                    .atan2(center_northing - northing)
                    .to_degrees();
                CameraPose {
                    easting,
                    northing,
                    altitude: altitude_m,
                    roll_deg: 0.0,
                    pitch_deg,
                    yaw_deg,
                }
            }
        }
    }

    /// Samples one pose per block.
    pub fn fly(&self, blocks: u32, frame_duration_s: f64) -> PoseTable {
        (0..blocks)
            .map(|b| (BlockId(b), self.pose_at(b as f64 * frame_duration_s)))
            .collect()
    }
}

// ============================================================================
// ORACLE
// ============================================================================

/// The Oracle - maintains ground truth and generates thermal detections.
pub struct Oracle {
    /// Seed the physics RNG was created from
    physics_seed: u64,

    /// RNG for detector noise and dropouts
    physics_rng: ChaCha8Rng,

    intrinsics: CameraIntrinsics,
    terrain: GridTerrain,
    poses: PoseTable,

    /// All ground truth animals, in id order
    animals: Vec<Animal>,

    /// Seconds between consecutive blocks
    frame_duration_s: f64,

    /// Per-axis jitter of blob centres (pixels)
    pixel_noise: Option<Normal<f64>>,

    /// Probability that a visible animal is not detected in a frame
    miss_rate: f64,
}

impl Oracle {
    /// Creates an oracle with no animals, no pixel noise and no misses.
    pub fn new(
        physics_seed: u64,
        intrinsics: CameraIntrinsics,
        terrain: GridTerrain,
        poses: PoseTable,
        frame_duration_s: f64,
    ) -> Self {
        Self {
            physics_seed,
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            intrinsics,
            terrain,
            poses,
            animals: Vec::new(),
            frame_duration_s,
            pixel_noise: None,
            miss_rate: 0.0,
        }
    }

    /// Sets the standard deviation of the blob centre jitter.
    pub fn set_pixel_noise(&mut self, std_dev_px: f64) -> Result<(), SimError> {
        if !(std_dev_px.is_finite() && std_dev_px >= 0.0) {
            return Err(SimError::invalid(format!(
                "pixel noise must be a finite, non-negative deviation, got {std_dev_px}"
            )));
        }
        let noise = Normal::new(0.0, std_dev_px)
            .map_err(|e| SimError::invalid(format!("pixel noise {std_dev_px}: {e}")))?;
        self.pixel_noise = Some(noise);
        Ok(())
    }

    /// Sets the probability of missing a visible animal in a frame.
    pub fn set_miss_rate(&mut self, miss_rate: f64) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&miss_rate) {
            return Err(SimError::invalid(format!(
                "miss rate must be within 0..=1, got {miss_rate}"
            )));
        }
        self.miss_rate = miss_rate;
        Ok(())
    }

    /// Adds an animal and returns its ID.
    pub fn spawn_animal(&mut self, mut animal: Animal) -> u32 {
        let id = self.animals.len() as u32 + 1;
        animal.id = id;
        self.animals.push(animal);
        id
    }

    pub fn physics_seed(&self) -> u64 {
        self.physics_seed
    }

    pub fn animals(&self) -> &[Animal] {
        &self.animals
    }

    pub fn poses(&self) -> &PoseTable {
        &self.poses
    }

    pub fn terrain(&self) -> &GridTerrain {
        &self.terrain
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Simulation time of `block` in seconds.
    pub fn time_at(&self, block: BlockId) -> f64 {
        block.0 as f64 * self.frame_duration_s
    }

    /// World position of the animal's body centre at `block`.
    ///
    /// Returns `None` when the animal has walked off the terrain raster.
    pub fn body_point(&self, animal: &Animal, block: BlockId) -> Option<Vector3<f64>> {
        let ground = animal.position_at(self.time_at(block));
        let elevation = self.terrain.elevation(ground.x, ground.y)?;
        Some(Vector3::new(ground.x, ground.y, elevation + animal.body_height_m))
    }

    /// Noise-free blob the animal would produce at `block`.
    ///
    /// `None` when the animal is behind the camera or entirely outside the
    /// frame.
    pub fn render(&self, animal: &Animal, block: BlockId) -> Option<RawDetection> {
        let pose = self.poses.pose_at(block)?;
        self.render_with_offset(animal, block, &pose, Vector2::zeros())
    }

    /// True when the animal shows up in the frame for `block`.
    pub fn in_view(&self, animal: &Animal, block: BlockId) -> bool {
        self.render(animal, block).is_some()
    }

    fn render_with_offset(
        &self,
        animal: &Animal,
        block: BlockId,
        pose: &CameraPose,
        offset: Vector2<f64>,
    ) -> Option<RawDetection> {
        let point = self.body_point(animal, block)?;
        let pixel = project(&point, pose, &self.intrinsics)? + offset;

        let range = (point - camera_position(pose)).norm();
        let gsd = self.intrinsics.ground_sample_distance(range);
        let width = ((animal.length_m / gsd).round() as i32).max(MIN_BLOB_SIDE_PX);
        let height = ((animal.width_m / gsd).round() as i32).max(MIN_BLOB_SIDE_PX);

        let full = PixelBox::from_center(pixel.x, pixel.y, width, height);
        let (cx, cy) = full.center();
        let (rx, ry) = (width as f64 / 2.0, height as f64 / 2.0);

        let clipped = PixelBox::new(
            full.left.max(0),
            full.top.max(0),
            full.right.min(self.intrinsics.image_width_px as i32),
            full.bottom.min(self.intrinsics.image_height_px as i32),
        );
        if clipped.width() <= 0 || clipped.height() <= 0 {
            return None;
        }

        // Hot pixels fill the ellipse inscribed in the unclipped box,
        // hottest at the centre
        let mut hot_pixels = Vec::new();
        for y in clipped.top..clipped.bottom {
            for x in clipped.left..clipped.right {
                let dx = (x as f64 + 0.5 - cx) / rx;
                let dy = (y as f64 + 0.5 - cy) / ry;
                let r2 = dx * dx + dy * dy;
                if r2 <= 1.0 {
                    let heat = RIM_HEAT + (CORE_HEAT - RIM_HEAT) * (1.0 - r2);
                    hot_pixels.push(HotPixel { x, y, heat: heat as u8 });
                }
            }
        }
        if hot_pixels.is_empty() {
            return None;
        }

        Some(RawDetection::new(clipped, hot_pixels))
    }
}

impl FeatureDetector for Oracle {
    /// Renders every animal with jitter and dropouts.
    ///
    /// The RNG draws the same amount per animal whether or not it is
    /// visible, so changing one animal never reshuffles the others.
    fn detect(&mut self, block: BlockId) -> Result<Vec<RawDetection>, EnvError> {
        let pose = self.poses.require_pose(block)?;

        let mut draws = Vec::with_capacity(self.animals.len());
        for _ in &self.animals {
            let missed = self.physics_rng.gen_bool(self.miss_rate);
            let offset = match &self.pixel_noise {
                Some(noise) => Vector2::new(
                    noise.sample(&mut self.physics_rng),
                    noise.sample(&mut self.physics_rng),
                ),
                None => Vector2::zeros(),
            };
            draws.push((missed, offset));
        }

        let detections = self
            .animals
            .iter()
            .zip(draws)
            .filter(|(_, (missed, _))| !missed)
            .filter_map(|(animal, (_, offset))| {
                self.render_with_offset(animal, block, &pose, offset)
            })
            .collect();
        Ok(detections)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::{build_terrain, TerrainKind};

    fn hover_oracle(seed: u64) -> Oracle {
        let plan = FlightPlan::Hover {
            easting: 1000.0,
            northing: 2000.0,
            altitude_m: 150.0,
            drift_m: 0.0,
        };
        Oracle::new(
            seed,
            CameraIntrinsics::dji_m2ea_thermal(),
            build_terrain(TerrainKind::Flat).unwrap(),
            plan.fly(10, 1.0 / 30.0),
            1.0 / 30.0,
        )
    }

    #[test]
    fn test_spawn_assigns_ids() {
        let mut oracle = hover_oracle(1);
        assert_eq!(oracle.spawn_animal(Animal::new("deer", 1000.0, 2000.0)), 1);
        assert_eq!(oracle.spawn_animal(Animal::new("fox", 1005.0, 2000.0)), 2);
        assert_eq!(oracle.animals()[1].label, "fox");
    }

    #[test]
    fn test_animal_kinematics() {
        let deer = Animal::new("deer", 10.0, 20.0).with_velocity(1.0, -0.5);
        assert_eq!(deer.position_at(4.0), Vector2::new(14.0, 18.0));
    }

    #[test]
    fn test_transect_heading_and_yaw() {
        let plan = FlightPlan::Transect {
            start_easting: 0.0,
            start_northing: 0.0,
            heading_deg: 90.0,
            speed_mps: 5.0,
            altitude_m: 100.0,
            yaw_deg: 0.0,
        };
        let pose = plan.pose_at(2.0);
        assert!((pose.easting - 10.0).abs() < 1e-9);
        assert!(pose.northing.abs() < 1e-9);
        assert_eq!(pose.yaw_deg, 0.0);
        assert_eq!(plan.fly(7, 0.5).len(), 7);
    }

    #[test]
    fn test_orbit_faces_center() {
        let plan = FlightPlan::Orbit {
            center_easting: 0.0,
            center_northing: 0.0,
            radius_m: 30.0,
            altitude_m: 80.0,
            deg_per_s: 10.0,
            pitch_deg: -70.0,
        };
        let start = plan.pose_at(0.0);
        assert!(start.easting.abs() < 1e-9);
        assert!((start.northing + 30.0).abs() < 1e-9);
        assert!(start.yaw_deg.abs() < 1e-9);

        // A quarter turn later the drone is east of the centre facing west
        let later = plan.pose_at(9.0);
        assert!((later.easting - 30.0).abs() < 1e-9);
        assert!((later.yaw_deg.abs() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_renders_animal_under_drone() {
        let mut oracle = hover_oracle(1);
        oracle.spawn_animal(Animal::new("deer", 1000.0, 2000.0));

        let det = oracle.render(&oracle.animals()[0], BlockId(0)).unwrap();
        let (cx, cy) = det.pixel_box.center();
        assert!((cx - 320.0).abs() <= 1.0);
        assert!((cy - 256.0).abs() <= 1.0);

        // 1.6 m x 0.8 m at ~99 m range is roughly 12 x 6 pixels
        assert_eq!(det.pixel_box.width(), 12);
        assert_eq!(det.pixel_box.height(), 6);
        let area = det.pixel_box.area() as f64;
        assert!(det.hot_pixels.len() as f64 > 0.6 * area);
        assert!(det.hot_pixels.iter().all(|p| det.pixel_box.contains(p.x, p.y)));
    }

    #[test]
    fn test_out_of_frame_animal_is_not_rendered() {
        let mut oracle = hover_oracle(1);
        oracle.spawn_animal(Animal::new("deer", 1150.0, 2000.0));
        assert!(!oracle.in_view(&oracle.animals()[0], BlockId(0)));
        assert!(oracle.detect(BlockId(0)).unwrap().is_empty());
    }

    #[test]
    fn test_detect_is_deterministic_per_seed() {
        let run = |seed| {
            let mut oracle = hover_oracle(seed);
            oracle.set_pixel_noise(0.8).unwrap();
            oracle.set_miss_rate(0.3).unwrap();
            oracle.spawn_animal(Animal::new("deer", 1000.0, 2000.0));
            oracle.spawn_animal(Animal::new("deer", 1010.0, 1995.0));
            (0..10).map(|b| oracle.detect(BlockId(b)).unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_full_miss_rate_detects_nothing() {
        let mut oracle = hover_oracle(3);
        oracle.set_miss_rate(1.0).unwrap();
        oracle.spawn_animal(Animal::new("deer", 1000.0, 2000.0));
        assert!(oracle.detect(BlockId(0)).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let mut oracle = hover_oracle(1);
        assert!(oracle.set_miss_rate(1.5).is_err());
        assert!(oracle.set_pixel_noise(-1.0).is_err());
        assert!(oracle.set_pixel_noise(f64::NAN).is_err());
        assert!(oracle.set_pixel_noise(0.0).is_ok());
        assert!(matches!(oracle.detect(BlockId(99)), Err(EnvError::MissingPose(BlockId(99)))));
    }
}
