//! Significance heuristic: is a tracked blob a genuine animal or noise?
//!
//! Four gates are scored in tiers:
//! - **Pixels**: enough hot pixels, but not implausibly many
//! - **Density**: hot pixels fill the inscribed ellipse of the box
//! - **Duration**: seen for long enough (video only)
//! - **Elevation**: stands above the ground
//!
//! An object is significant when
//! `pixels_ok && density_ok && (image || (duration_ok && (elevation_good || pixels_good)))`.

use crate::config::TrackerConfig;
use serde::{Deserialize, Serialize};

/// Area of an ellipse inscribed in a w×h rectangle is π/4·w·h ≈ 0.785·w·h.
const INSCRIBED_ELLIPSE_RATIO: f64 = 0.785;

/// Height thresholds for the elevation tiers, in metres.
const ELEVATION_TIERS_M: [f64; 3] = [0.0, 2.0, 4.0];

/// Graded result of one gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Fail = 0,
    Ok = 1,
    Good = 2,
    Great = 3,
}

impl Tier {
    #[inline]
    pub fn is_ok(self) -> bool {
        self >= Tier::Ok
    }

    #[inline]
    pub fn is_good(self) -> bool {
        self >= Tier::Good
    }

    fn digit(self) -> char {
        char::from(b'0' + self as u8)
    }

    /// Tier for `value` against 1×/2×/4× of `base` (inclusive).
    fn at_least(value: f64, base: f64) -> Tier {
        if value >= 4.0 * base {
            Tier::Great
        } else if value >= 2.0 * base {
            Tier::Good
        } else if value >= base {
            Tier::Ok
        } else {
            Tier::Fail
        }
    }

    /// Tier for `value` strictly above each of `thresholds`.
    fn above(value: f64, thresholds: [f64; 3]) -> Tier {
        if value > thresholds[2] {
            Tier::Great
        } else if value > thresholds[1] {
            Tier::Good
        } else if value > thresholds[0] {
            Tier::Ok
        } else {
            Tier::Fail
        }
    }
}

/// What the heuristic looks at, gathered from an object after a real update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignificanceInputs {
    /// Largest hot pixel count of any real feature
    pub max_hot_pixels: u32,

    /// Hot pixels of the latest real feature
    pub last_hot_pixels: u32,

    /// Box area of the latest real feature
    pub last_box_area: i64,

    /// Number of real features so far
    pub real_feature_count: u32,

    /// Current height estimate
    pub height_m: Option<f64>,
}

/// Outcome of the heuristic with the tier reached on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignificanceVerdict {
    pub significant: bool,
    pub pixels: Tier,
    pub density_ok: bool,

    /// `None` when the gate is bypassed (image input)
    pub duration: Option<Tier>,

    /// `None` when the height is unknown
    pub elevation: Option<Tier>,
}

impl SignificanceVerdict {
    /// Compact diagnostic string, e.g. `P2D1T3E0`.
    ///
    /// Digits are tiers (0 = fail .. 3 = great); `T-` means the duration gate
    /// was bypassed and `E?` that the height is unknown.
    pub fn attributes(&self) -> String {
        format!(
            "P{}D{}T{}E{}",
            self.pixels.digit(),
            if self.density_ok { '1' } else { '0' },
            self.duration.map_or('-', Tier::digit),
            self.elevation.map_or('?', Tier::digit),
        )
    }
}

/// Scores an object.
pub fn calculate_significant(
    inputs: &SignificanceInputs,
    config: &TrackerConfig,
) -> SignificanceVerdict {
    // Pixels
    let count = inputs.max_hot_pixels;
    let under_cap = config.object_max_pixels.map_or(true, |cap| count <= cap);
    let pixels = if count >= config.object_min_max_heat_pixels
        && under_cap
        && count > config.object_min_pixels
    {
        // Strictly above the minimum is already "ok"
        Tier::at_least(count as f64, config.object_min_pixels as f64).max(Tier::Ok)
    } else {
        Tier::Fail
    };

    // Density
    let ellipse_area = INSCRIBED_ELLIPSE_RATIO * inputs.last_box_area as f64;
    let density_ok = ellipse_area > 0.0
        && inputs.last_hot_pixels as f64 / ellipse_area >= config.object_min_hot_density;

    // Duration
    let duration = config.is_video().then(|| {
        let seen_ms = inputs.real_feature_count as f64 * config.frame_duration_ms;
        Tier::at_least(seen_ms, config.object_min_duration_ms)
    });

    // Elevation
    let elevation = inputs.height_m.map(|h| Tier::above(h, ELEVATION_TIERS_M));

    let elevation_good = elevation.map_or(false, Tier::is_good);
    let significant = pixels.is_ok()
        && density_ok
        && match duration {
            None => true,
            Some(d) => d.is_ok() && (elevation_good || pixels.is_good()),
        };

    SignificanceVerdict {
        significant,
        pixels,
        density_ok,
        duration,
        elevation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputKind;

    fn inputs() -> SignificanceInputs {
        SignificanceInputs {
            max_hot_pixels: 25,
            last_hot_pixels: 25,
            last_box_area: 36,
            real_feature_count: 31,
            height_m: Some(0.5),
        }
    }

    #[test]
    fn test_significant_video_object() {
        let v = calculate_significant(&inputs(), &TrackerConfig::default());
        // 25 px > 2×10 → good; 31 × 33.3 ms > 1 s → good; 0.5 m → ok
        assert_eq!(v.pixels, Tier::Good);
        assert!(v.density_ok);
        assert_eq!(v.duration, Some(Tier::Good));
        assert_eq!(v.elevation, Some(Tier::Ok));
        assert!(v.significant);
        assert_eq!(v.attributes(), "P2D1T2E1");
    }

    #[test]
    fn test_short_sighting_is_not_significant() {
        let mut i = inputs();
        i.real_feature_count = 3;
        let v = calculate_significant(&i, &TrackerConfig::default());
        assert_eq!(v.duration, Some(Tier::Fail));
        assert!(!v.significant);
    }

    #[test]
    fn test_image_input_bypasses_duration() {
        let config = TrackerConfig {
            input: InputKind::Image,
            ..Default::default()
        };
        let mut i = inputs();
        i.real_feature_count = 1;
        i.height_m = None;
        let v = calculate_significant(&i, &config);
        assert!(v.significant);
        assert_eq!(v.attributes(), "P2D1T-E?");
    }

    #[test]
    fn test_ok_pixels_need_good_elevation() {
        let mut i = inputs();
        i.max_hot_pixels = 15; // ok but not good
        i.last_hot_pixels = 15;
        i.last_box_area = 20;
        let config = TrackerConfig::default();

        assert!(!calculate_significant(&i, &config).significant);

        i.height_m = Some(2.5);
        let v = calculate_significant(&i, &config);
        assert_eq!(v.elevation, Some(Tier::Good));
        assert!(v.significant);
    }

    #[test]
    fn test_pixel_cap_and_floor() {
        let config = TrackerConfig {
            object_max_pixels: Some(100),
            ..Default::default()
        };
        let mut i = inputs();
        i.max_hot_pixels = 101;
        assert_eq!(calculate_significant(&i, &config).pixels, Tier::Fail);

        i.max_hot_pixels = 10; // not strictly above object_min_pixels
        assert_eq!(calculate_significant(&i, &config).pixels, Tier::Fail);

        i.max_hot_pixels = 41;
        assert_eq!(calculate_significant(&i, &config).pixels, Tier::Great);
    }

    #[test]
    fn test_sparse_blob_fails_density() {
        let mut i = inputs();
        i.last_box_area = 400; // 25 / (0.785 × 400) ≈ 0.08
        let v = calculate_significant(&i, &TrackerConfig::default());
        assert!(!v.density_ok);
        assert!(!v.significant);

        i.last_box_area = 0;
        assert!(!calculate_significant(&i, &TrackerConfig::default()).density_ok);
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(Tier::at_least(500.0, 500.0), Tier::Ok);
        assert_eq!(Tier::at_least(999.0, 500.0), Tier::Ok);
        assert_eq!(Tier::at_least(1000.0, 500.0), Tier::Good);
        assert_eq!(Tier::at_least(2000.0, 500.0), Tier::Great);
        assert_eq!(Tier::above(0.0, ELEVATION_TIERS_M), Tier::Fail);
        assert_eq!(Tier::above(4.0, ELEVATION_TIERS_M), Tier::Good);
        assert_eq!(Tier::above(4.1, ELEVATION_TIERS_M), Tier::Great);
    }
}
