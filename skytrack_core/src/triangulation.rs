//! Multi-view triangulation.
//!
//! Each observation contributes one ray from the drone through the blob
//! centre. The object point X and the distance λᵢ along every ray are
//! solved jointly from
//!
//! ```text
//! X - λᵢ·rayᵢ = camᵢ        (3 equations per observation)
//! ```
//!
//! as the least squares solution `(AᵀA)⁻¹AᵀC`. An optional bounded
//! Levenberg-Marquardt pass then minimises pixel reprojection error.

use crate::camera::{camera_down_angle, camera_position, project, ray_direction, CameraIntrinsics};
use crate::config::TrackerConfig;
use crate::feature::{FeatureArena, FeatureId};
use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3};
use skytrack_env::{CameraPose, PoseOracle, TerrainOracle};
use tracing::{debug, trace};

/// Smallest acceptable λ_min/λ_max of AᵀA.
const MIN_RECIPROCAL_CONDITION: f64 = 1e-12;

/// Blob centres closer than this (in either axis) to the previous selected
/// centre add no parallax.
const MIN_DISTINCT_SHIFT_PX: f64 = 2.0;

// === Refinement tuning ===
const LM_INITIAL_DAMPING: f64 = 1e-3;
const LM_MAX_DAMPING: f64 = 1e12;
const LM_MIN_STEP_M: f64 = 1e-6;
const JACOBIAN_STEP_M: f64 = 1e-4;

// ============================================================================
// TYPES
// ============================================================================

/// One feature usable for triangulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub feature_id: FeatureId,

    /// Blob centre in pixels
    pub pixel: Vector2<f64>,

    pub pose: CameraPose,
}

/// Outcome of the optional nonlinear refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementStatus {
    /// Step or cost change fell below tolerance
    Converged,

    /// Iteration limit reached first
    MaxIterations,

    /// The point left the cameras' field of view or the cost became non-finite
    Diverged,
}

/// A well-posed multi-view solution.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangulationResult {
    /// (easting, northing, absolute elevation)
    pub point: Vector3<f64>,

    /// Height above terrain; `None` where the terrain has no data
    pub height_m: Option<f64>,

    /// Per-observation point `camᵢ + λᵢ·rayᵢ` and its height above terrain
    pub feature_points: Vec<(FeatureId, Vector3<f64>, Option<f64>)>,

    /// Distance λᵢ from each camera along its ray
    pub ranges_m: Vec<f64>,

    /// RMS perpendicular distance from `point` to the rays
    pub rms_ray_residual_m: f64,

    /// Set when refinement ran
    pub refinement: Option<RefinementStatus>,
}

impl TriangulationResult {
    /// Mean camera-to-point distance.
    pub fn mean_range_m(&self) -> f64 {
        self.ranges_m.iter().sum::<f64>() / self.ranges_m.len() as f64
    }
}

/// Reasons a multi-view solve is refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TriangulationError {
    #[error("Need at least 2 observations, got {0}")]
    TooFewObservations(usize),

    #[error("Camera baseline {baseline_m:.3} m is below the minimum {min_m} m")]
    BaselineTooShort { baseline_m: f64, min_m: f64 },

    #[error("Rays are near parallel (reciprocal condition {0:e})")]
    IllConditioned(f64),

    #[error("Solution is not finite")]
    NonFinite,

    #[error("Point lies {range_m:.3} m along ray {index}, not in front of the camera")]
    BehindCamera { index: usize, range_m: f64 },
}

// ============================================================================
// SELECTION
// ============================================================================

/// Picks the features of an object that can take part in a solve.
///
/// A feature is selected if it is Real and significant, clear of the image
/// border, has a pose looking far enough down, and its centre moved at least
/// two pixels in both axes from the previously selected centre. Real
/// features that are not selected lose any stale location.
pub fn select_observations<P: PoseOracle>(
    feature_ids: &[FeatureId],
    arena: &mut FeatureArena,
    poses: &P,
    intrinsics: &CameraIntrinsics,
    config: &TrackerConfig,
) -> Vec<Observation> {
    let mut selected = Vec::new();
    let mut comparison: Option<(f64, f64)> = None;

    for &id in feature_ids {
        let feature = arena.get_mut(id);
        if !feature.is_real() {
            continue;
        }

        let pose = poses
            .pose_at(feature.block_id)
            .filter(|pose| camera_down_angle(pose) >= config.min_camera_down_deg);
        let (x, y) = feature.center();
        let distinct = comparison.map_or(true, |(cx, cy)| {
            (x - cx).abs() >= MIN_DISTINCT_SHIFT_PX && (y - cy).abs() >= MIN_DISTINCT_SHIFT_PX
        });

        match pose {
            Some(pose)
                if feature.significant && !feature.touches_border(intrinsics) && distinct =>
            {
                comparison = Some((x, y));
                selected.push(Observation {
                    feature_id: id,
                    pixel: Vector2::new(x, y),
                    pose,
                });
            }
            _ => feature.clear_location(),
        }
    }
    selected
}

// ============================================================================
// SOLVER
// ============================================================================

/// Solves for the point seen by all `observations`.
pub fn triangulate<T: TerrainOracle>(
    observations: &[Observation],
    intrinsics: &CameraIntrinsics,
    terrain: &T,
    config: &TrackerConfig,
) -> Result<TriangulationResult, TriangulationError> {
    let m = observations.len();
    if m < 2 {
        return Err(TriangulationError::TooFewObservations(m));
    }

    let cameras: Vec<Vector3<f64>> =
        observations.iter().map(|o| camera_position(&o.pose)).collect();
    let rays: Vec<Vector3<f64>> = observations
        .iter()
        .map(|o| ray_direction(o.pixel.x, o.pixel.y, &o.pose, intrinsics))
        .collect();

    let baseline_m = max_pairwise_distance(&cameras);
    if baseline_m < config.min_baseline_m {
        return Err(TriangulationError::BaselineTooShort {
            baseline_m,
            min_m: config.min_baseline_m,
        });
    }

    // Unknowns: [x, y, z, λ₀ .. λₘ₋₁]
    let mut a = DMatrix::<f64>::zeros(3 * m, 3 + m);
    let mut c = DVector::<f64>::zeros(3 * m);
    for (i, (cam, ray)) in cameras.iter().zip(&rays).enumerate() {
        a.fixed_view_mut::<3, 3>(3 * i, 0).copy_from(&Matrix3::identity());
        a.fixed_view_mut::<3, 1>(3 * i, 3 + i).copy_from(&(-ray));
        c.fixed_rows_mut::<3>(3 * i).copy_from(cam);
    }

    let ata = a.transpose() * &a;
    let eigenvalues = ata.clone().symmetric_eigen().eigenvalues;
    let largest = eigenvalues.max();
    let rcond = if largest > 0.0 { eigenvalues.min() / largest } else { 0.0 };
    if !(rcond >= MIN_RECIPROCAL_CONDITION) {
        return Err(TriangulationError::IllConditioned(rcond));
    }
    let ata_inv = ata.try_inverse().ok_or(TriangulationError::IllConditioned(rcond))?;
    let ans = ata_inv * a.transpose() * c;

    if ans.iter().any(|v| !v.is_finite()) {
        return Err(TriangulationError::NonFinite);
    }
    for i in 0..m {
        let range_m = ans[3 + i];
        if range_m <= config.min_range_m {
            return Err(TriangulationError::BehindCamera { index: i, range_m });
        }
    }

    let linear = Vector3::new(ans[0], ans[1], ans[2]);
    let (point, refinement) = if config.refine {
        let (refined, status) = refine(&linear, observations, intrinsics, config);
        debug!(?status, shift_m = (refined - linear).norm(), "Refined triangulated point");
        if status == RefinementStatus::Converged {
            (refined, Some(status))
        } else {
            (linear, Some(status))
        }
    } else {
        (linear, None)
    };

    // λᵢ of the final point: its projection onto each ray
    let ranges_m: Vec<f64> = match refinement {
        Some(RefinementStatus::Converged) => cameras
            .iter()
            .zip(&rays)
            .map(|(cam, ray)| (point - cam).dot(ray))
            .collect(),
        _ => (0..m).map(|i| ans[3 + i]).collect(),
    };

    let height_above = |p: &Vector3<f64>| terrain.elevation(p.x, p.y).map(|ground| p.z - ground);
    let feature_points = observations
        .iter()
        .enumerate()
        .map(|(i, o)| {
            let p = cameras[i] + rays[i] * ranges_m[i];
            (o.feature_id, p, height_above(&p))
        })
        .collect();

    let rms_ray_residual_m = (cameras
        .iter()
        .zip(&rays)
        .map(|(cam, ray)| {
            let offset = point - cam;
            (offset - ray * offset.dot(ray)).norm_squared()
        })
        .sum::<f64>()
        / m as f64)
        .sqrt();

    trace!(
        observations = m,
        baseline_m,
        rcond,
        rms_ray_residual_m,
        "Triangulated ({:.2}, {:.2}, {:.2})",
        point.x,
        point.y,
        point.z
    );

    Ok(TriangulationResult {
        point,
        height_m: height_above(&point),
        feature_points,
        ranges_m,
        rms_ray_residual_m,
        refinement,
    })
}

/// Writes a solution back into the observed features.
///
/// Heights are only overwritten where the terrain had data.
pub fn apply_to_features(result: &TriangulationResult, arena: &mut FeatureArena) {
    for (id, point, height_m) in &result.feature_points {
        let feature = arena.get_mut(*id);
        feature.location = Some(Vector2::new(point.x, point.y));
        if height_m.is_some() {
            feature.height_m = *height_m;
        }
    }
}

fn max_pairwise_distance(points: &[Vector3<f64>]) -> f64 {
    let mut max = 0.0f64;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            max = max.max((a - b).norm());
        }
    }
    max
}

// ============================================================================
// REFINEMENT
// ============================================================================

/// Pixel reprojection residuals of `point`; `None` if any camera cannot see it.
fn residuals(
    point: &Vector3<f64>,
    observations: &[Observation],
    intrinsics: &CameraIntrinsics,
) -> Option<DVector<f64>> {
    let mut r = DVector::zeros(2 * observations.len());
    for (i, o) in observations.iter().enumerate() {
        let pixel = project(point, &o.pose, intrinsics)?;
        r[2 * i] = pixel.x - o.pixel.x;
        r[2 * i + 1] = pixel.y - o.pixel.y;
    }
    r.iter().all(|v| v.is_finite()).then_some(r)
}

/// Bounded Levenberg-Marquardt over the point, starting from `start`.
///
/// Every coordinate stays within `refine_bound_m` of `start`. Only steps that
/// reduce the cost are taken, so the result never reprojects worse than the
/// start.
fn refine(
    start: &Vector3<f64>,
    observations: &[Observation],
    intrinsics: &CameraIntrinsics,
    config: &TrackerConfig,
) -> (Vector3<f64>, RefinementStatus) {
    let bound = config.refine_bound_m;
    let clamp = |p: Vector3<f64>| {
        Vector3::new(
            p.x.clamp(start.x - bound, start.x + bound),
            p.y.clamp(start.y - bound, start.y + bound),
            p.z.clamp(start.z - bound, start.z + bound),
        )
    };

    let mut x = *start;
    let mut r = match residuals(&x, observations, intrinsics) {
        Some(r) => r,
        None => return (x, RefinementStatus::Diverged),
    };
    let mut cost = r.norm_squared();
    let mut damping = LM_INITIAL_DAMPING;

    for _ in 0..config.refine_max_iterations {
        // Central-difference Jacobian, 2M x 3
        let mut jacobian = DMatrix::<f64>::zeros(r.len(), 3);
        for k in 0..3 {
            let mut delta = Vector3::zeros();
            delta[k] = JACOBIAN_STEP_M;
            let (Some(plus), Some(minus)) = (
                residuals(&(x + delta), observations, intrinsics),
                residuals(&(x - delta), observations, intrinsics),
            ) else {
                return (x, RefinementStatus::Diverged);
            };
            jacobian.set_column(k, &((plus - minus) / (2.0 * JACOBIAN_STEP_M)));
        }

        let jtj = jacobian.transpose() * &jacobian;
        let gradient = jacobian.transpose() * &r;
        let mut damped = jtj.clone();
        for k in 0..3 {
            damped[(k, k)] += damping * jtj[(k, k)].max(1e-12);
        }
        let Some(step) = damped.lu().solve(&(-gradient)) else {
            damping *= 10.0;
            continue;
        };
        let step = Vector3::new(step[0], step[1], step[2]);
        if !step.iter().all(|v| v.is_finite()) {
            return (x, RefinementStatus::Diverged);
        }
        if step.norm() < LM_MIN_STEP_M {
            return (x, RefinementStatus::Converged);
        }

        let candidate = clamp(x + step);
        match residuals(&candidate, observations, intrinsics) {
            Some(candidate_r) if candidate_r.norm_squared() < cost => {
                x = candidate;
                r = candidate_r;
                cost = r.norm_squared();
                damping = (damping / 10.0).max(1e-12);
            }
            _ => {
                damping *= 10.0;
                if damping > LM_MAX_DAMPING {
                    // No step reduces the cost: stationary point
                    return (x, RefinementStatus::Converged);
                }
            }
        }
    }
    (x, RefinementStatus::MaxIterations)
}

// ============================================================================
// TESTS
// ============================================================================
