//! Pinhole camera model.
//!
//! Converts between image pixels and world rays for a drone-mounted camera.
//!
//! World frame: x = easting, y = northing, z = up (metres).
//!
//! Camera body frame at the neutral (nadir) attitude: x = forward (drone
//! heading), y = left, z = up, optical axis along -z. A pixel back-projected
//! through K⁻¹ gives `(u, v, 1)` with u to the right and v down the image;
//! in body axes that is `(-v, -u, -1)`, so image-up points along the heading.
//!
//! The attitude rotation is composed as Rz(yaw) · Ry(pitch + 90°) · Rx(roll)
//! (compass yaw clockwise from north, positive pitch = nose up, positive roll
//! = right side down). The +90° makes pitch -90° the neutral, straight-down
//! attitude. [`world_to_camera`] returns the inverse R of that composition,
//! and rays are rotated back into the world with Rᵀ.

use crate::config::ConfigError;
use nalgebra::{Matrix3, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use skytrack_env::CameraPose;

/// Maps between back-projected image axes `(u, v, 1)` and nadir body axes.
///
/// It is its own inverse.
#[inline]
fn image_to_body() -> Matrix3<f64> {
    Matrix3::new(
        0.0, -1.0, 0.0, //
        -1.0, 0.0, 0.0, //
        0.0, 0.0, -1.0,
    )
}

/// Points closer than this in front of the lens do not project.
const MIN_PROJECTION_DEPTH: f64 = 1e-9;

// ============================================================================
// INTRINSICS
// ============================================================================

/// Per-run camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in millimetres
    pub focal_length_mm: f64,

    /// Sensor width in millimetres
    pub sensor_width_mm: f64,

    /// Sensor height in millimetres
    pub sensor_height_mm: f64,

    /// Image width in pixels
    pub image_width_px: u32,

    /// Image height in pixels
    pub image_height_px: u32,
}

impl CameraIntrinsics {
    /// Creates intrinsics, rejecting non-positive focal length or dimensions.
    pub fn new(
        focal_length_mm: f64,
        sensor_width_mm: f64,
        sensor_height_mm: f64,
        image_width_px: u32,
        image_height_px: u32,
    ) -> Result<Self, ConfigError> {
        let intrinsics = Self {
            focal_length_mm,
            sensor_width_mm,
            sensor_height_mm,
            image_width_px,
            image_height_px,
        };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// DJI Mavic 2 Enterprise Advanced thermal camera (640×512, 12µm pitch).
    pub fn dji_m2ea_thermal() -> Self {
        Self {
            focal_length_mm: 9.1,
            sensor_width_mm: 7.68,
            sensor_height_mm: 6.144,
            image_width_px: 640,
            image_height_px: 512,
        }
    }

    /// K is only well defined for a positive focal length and image/sensor size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("focal_length_mm", self.focal_length_mm),
            ("sensor_width_mm", self.sensor_width_mm),
            ("sensor_height_mm", self.sensor_height_mm),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::invalid(field, format!("must be positive, got {value}")));
            }
        }
        if self.image_width_px == 0 || self.image_height_px == 0 {
            return Err(ConfigError::invalid(
                "image_size",
                format!("must be positive, got {}x{}", self.image_width_px, self.image_height_px),
            ));
        }
        Ok(())
    }

    /// Focal length in pixels along x.
    #[inline]
    pub fn fx(&self) -> f64 {
        self.focal_length_mm * self.image_width_px as f64 / self.sensor_width_mm
    }

    /// Focal length in pixels along y.
    #[inline]
    pub fn fy(&self) -> f64 {
        self.focal_length_mm * self.image_height_px as f64 / self.sensor_height_mm
    }

    /// Principal point (image centre).
    #[inline]
    pub fn principal_point(&self) -> (f64, f64) {
        (self.image_width_px as f64 / 2.0, self.image_height_px as f64 / 2.0)
    }

    /// The 3×3 projection matrix K.
    pub fn k(&self) -> Matrix3<f64> {
        let (cx, cy) = self.principal_point();
        Matrix3::new(
            self.fx(), 0.0, cx, //
            0.0, self.fy(), cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// K⁻¹, in closed form.
    pub fn k_inverse(&self) -> Matrix3<f64> {
        let (cx, cy) = self.principal_point();
        let (fx, fy) = (self.fx(), self.fy());
        Matrix3::new(
            1.0 / fx, 0.0, -cx / fx, //
            0.0, 1.0 / fy, -cy / fy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Ground footprint of one pixel, in metres, at `range_m` from the lens.
    pub fn ground_sample_distance(&self, range_m: f64) -> f64 {
        range_m * self.sensor_width_mm / (self.focal_length_mm * self.image_width_px as f64)
    }
}

// ============================================================================
// EXTRINSICS
// ============================================================================

/// Rotation R taking world vectors into camera body axes.
pub fn world_to_camera(pose: &CameraPose) -> Rotation3<f64> {
    // Compass yaw is clockwise from north; the math angle about +z is
    // counter-clockwise from east.
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), (90.0 - pose.yaw_deg).to_radians());
    // Rotation about the left axis: positive angles pitch the nose down.
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), -(pose.pitch_deg + 90.0).to_radians());
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), pose.roll_deg.to_radians());

    let camera_to_world = rz * ry * rx;
    camera_to_world.inverse()
}

/// Camera position as a world vector.
#[inline]
pub fn camera_position(pose: &CameraPose) -> Vector3<f64> {
    Vector3::new(pose.easting, pose.northing, pose.altitude)
}

/// Unit ray direction in world coordinates through pixel `(pixel_x, pixel_y)`.
pub fn ray_direction(
    pixel_x: f64,
    pixel_y: f64,
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
) -> Vector3<f64> {
    let image_ray = intrinsics.k_inverse() * Vector3::new(pixel_x, pixel_y, 1.0);
    let body_ray = image_to_body() * image_ray;
    let r = world_to_camera(pose);
    (r.transpose() * body_ray).normalize()
}

/// Projects a world point into the image.
///
/// Returns `None` when the point is behind (or on) the lens plane.
pub fn project(
    point: &Vector3<f64>,
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
) -> Option<Vector2<f64>> {
    let body = world_to_camera(pose) * (point - camera_position(pose));
    let image_ray = image_to_body() * body;
    if image_ray.z <= MIN_PROJECTION_DEPTH {
        return None;
    }
    let pixel = intrinsics.k() * (image_ray / image_ray.z);
    Some(Vector2::new(pixel.x, pixel.y))
}

/// Angle of the optical axis below the horizon, in degrees.
///
/// 90 = straight down, 0 = horizon, negative = looking up.
pub fn camera_down_angle(pose: &CameraPose) -> f64 {
    let axis = world_to_camera(pose).transpose() * (image_to_body() * Vector3::z());
    (-axis.z).clamp(-1.0, 1.0).asin().to_degrees()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::dji_m2ea_thermal()
    }

    #[test]
    fn test_intrinsics_validation() {
        assert!(CameraIntrinsics::new(9.1, 7.68, 6.144, 640, 512).is_ok());
        assert!(CameraIntrinsics::new(0.0, 7.68, 6.144, 640, 512).is_err());
        assert!(CameraIntrinsics::new(9.1, -1.0, 6.144, 640, 512).is_err());
        assert!(CameraIntrinsics::new(9.1, 7.68, 6.144, 0, 512).is_err());
    }

    #[test]
    fn test_k_times_k_inverse_is_identity() {
        let i = intrinsics();
        let product = i.k() * i.k_inverse();
        assert_relative_eq!(product, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_nadir_center_ray_points_down() {
        let pose = CameraPose::nadir(0.0, 0.0, 100.0, 37.0);
        let (cx, cy) = intrinsics().principal_point();
        let ray = ray_direction(cx, cy, &pose, &intrinsics());
        assert_relative_eq!(ray, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-12);
        assert_relative_eq!(camera_down_angle(&pose), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_nadir_image_axes_follow_heading() {
        let i = intrinsics();
        let (cx, cy) = i.principal_point();

        // Heading north: image top is north, image right is east
        let north = CameraPose::nadir(0.0, 0.0, 100.0, 0.0);
        let up = ray_direction(cx, 0.0, &north, &i);
        assert!(up.y > 0.0 && up.x.abs() < 1e-9);
        let right = ray_direction(i.image_width_px as f64, cy, &north, &i);
        assert!(right.x > 0.0 && right.y.abs() < 1e-9);

        // Heading east: image top is east
        let east = CameraPose::nadir(0.0, 0.0, 100.0, 90.0);
        let up = ray_direction(cx, 0.0, &east, &i);
        assert!(up.x > 0.0 && up.y.abs() < 1e-9);
    }

    #[test]
    fn test_pitch_controls_down_angle() {
        let mut pose = CameraPose::nadir(0.0, 0.0, 100.0, 0.0);
        pose.pitch_deg = -30.0;
        assert_relative_eq!(camera_down_angle(&pose), 30.0, epsilon = 1e-9);

        // Forward-looking camera heading north looks north
        let (cx, cy) = intrinsics().principal_point();
        let ray = ray_direction(cx, cy, &pose, &intrinsics());
        assert!(ray.y > 0.0);
        assert!(ray.z < 0.0);

        pose.pitch_deg = 0.0;
        assert_relative_eq!(camera_down_angle(&pose), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_roll_tilts_sideways() {
        let mut pose = CameraPose::nadir(0.0, 0.0, 100.0, 0.0);
        pose.roll_deg = 10.0;
        let (cx, cy) = intrinsics().principal_point();
        let ray = ray_direction(cx, cy, &pose, &intrinsics());
        // Roll keeps the optical axis in the east-up plane
        assert!(ray.y.abs() < 1e-9);
        assert_relative_eq!(camera_down_angle(&pose), 80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_project_inverts_ray_direction() {
        let i = intrinsics();
        let pose = CameraPose {
            easting: 1000.0,
            northing: 2000.0,
            altitude: 150.0,
            roll_deg: 3.0,
            pitch_deg: -70.0,
            yaw_deg: 212.0,
        };

        for &(px, py) in &[(10.0, 20.0), (320.0, 256.0), (600.5, 480.25)] {
            let ray = ray_direction(px, py, &pose, &i);
            let point = camera_position(&pose) + ray * 87.0;
            let pixel = project(&point, &pose, &i).unwrap();
            assert_relative_eq!(pixel.x, px, epsilon = 1e-6);
            assert_relative_eq!(pixel.y, py, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_project_behind_camera() {
        let pose = CameraPose::nadir(0.0, 0.0, 100.0, 0.0);
        assert!(project(&Vector3::new(0.0, 0.0, 150.0), &pose, &intrinsics()).is_none());
    }

    #[test]
    fn test_ground_sample_distance() {
        let i = intrinsics();
        // 100 m range: 100 * 7.68 / (9.1 * 640) ≈ 0.132 m/px
        assert_relative_eq!(i.ground_sample_distance(100.0), 0.13187, epsilon = 1e-4);
    }
}
