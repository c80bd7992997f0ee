//! Objects: physical entities tracked across blocks.
//!
//! An object owns an ordered list of feature ids (the arena owns the
//! features themselves). It caches aggregates over its real features and
//! decides, from its own history, where its next feature should appear.

use crate::camera::CameraIntrinsics;
use crate::config::{DetectorKind, TrackerConfig};
use crate::feature::{Feature, FeatureArena, FeatureId, FeatureKind};
use crate::significance::{calculate_significant, SignificanceInputs};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use skytrack_env::{BlockId, PixelBox};

/// Extra margin around the expected box after a real sighting, for drone jitter.
const JITTER_MARGIN_PX: i32 = 5;

/// Identifier of an object. Ids start at 1 and are never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "O{}", self.0)
    }
}

/// A tracked entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    // === Identity ===
    pub id: ObjectId,

    /// Display name: detector prefix + id, e.g. `C12`
    pub name: String,

    pub detector: DetectorKind,

    /// Claimed features in claim order (= block order)
    feature_ids: Vec<FeatureId>,

    // === Tracking state ===
    first_real_feature: FeatureId,
    last_real_feature: FeatureId,
    pub first_real_block: BlockId,
    pub last_real_block: BlockId,

    /// Unreal placeholders appended since the last real feature
    pub unreal_run: u32,

    pub real_feature_count: u32,

    /// False once the persistence window has expired (terminal)
    pub being_tracked: bool,

    // === Aggregates over real features ===
    pub max_real_width_px: i32,
    pub max_real_height_px: i32,
    pub max_real_hot_pixels: u32,
    pub max_real_heat_sum: u64,
    pub max_heat: u8,

    // === Estimates ===
    /// Best ground location (easting, northing)
    pub location: Option<Vector2<f64>>,

    /// Mean horizontal distance of feature locations from `location`
    pub location_error_m: Option<f64>,

    pub height_m: Option<f64>,

    /// Mean absolute deviation of feature heights from `height_m`
    pub height_error_m: Option<f64>,

    /// Estimated body area in cm²
    pub size_cm2: Option<f64>,

    // === Significance ===
    pub significant: bool,

    /// Tier string from the last evaluation (see `SignificanceVerdict::attributes`)
    pub attributes: String,

    /// Blocks in which the object was significant. Never decreases.
    pub num_sig_blocks: u32,
}

impl Object {
    /// Creates an object from its first feature and claims it.
    ///
    /// # Panics
    /// If `first` is not a Real feature or is already owned.
    pub fn new(id: ObjectId, first: &mut Feature) -> Self {
        assert!(
            first.is_real(),
            "object {} must start from a real feature, got {:?} feature {}",
            id,
            first.kind,
            first.id
        );
        let mut object = Self {
            id,
            name: format!("{}{}", first.detector.prefix(), id.0),
            detector: first.detector,
            feature_ids: Vec::new(),
            first_real_feature: first.id,
            last_real_feature: first.id,
            first_real_block: first.block_id,
            last_real_block: first.block_id,
            unreal_run: 0,
            real_feature_count: 0,
            being_tracked: true,
            max_real_width_px: 0,
            max_real_height_px: 0,
            max_real_hot_pixels: 0,
            max_real_heat_sum: 0,
            max_heat: 0,
            location: None,
            location_error_m: None,
            height_m: None,
            height_error_m: None,
            size_cm2: None,
            significant: false,
            attributes: String::new(),
            num_sig_blocks: 0,
        };
        object.claim_real(first);
        object
    }

    /// Claimed features in order.
    pub fn feature_ids(&self) -> &[FeatureId] {
        &self.feature_ids
    }

    /// Most recently claimed feature (real or unreal).
    pub fn last_feature_id(&self) -> FeatureId {
        // An object is never empty: `new` claims the first feature.
        self.feature_ids[self.feature_ids.len() - 1]
    }

    pub fn last_real_feature_id(&self) -> FeatureId {
        self.last_real_feature
    }

    /// Real feature claimed in `block`, if any.
    pub fn real_claimed_in(&self, block: BlockId) -> Option<FeatureId> {
        (self.last_real_block == block).then_some(self.last_real_feature)
    }

    // ========================================================================
    // CLAIMS
    // ========================================================================

    /// Appends a Real feature and folds it into the aggregates.
    pub fn claim_real(&mut self, feature: &mut Feature) {
        assert!(
            feature.is_real(),
            "object {} can only claim real features here, got {:?}",
            self.id,
            feature.kind
        );
        feature.claim(self.id);
        self.feature_ids.push(feature.id);

        self.last_real_feature = feature.id;
        self.last_real_block = feature.block_id;
        self.unreal_run = 0;
        self.real_feature_count += 1;
        self.absorb_real_stats(feature);
    }

    /// Appends an Unreal placeholder.
    pub fn claim_unreal(&mut self, feature: &mut Feature) {
        assert_eq!(
            feature.kind,
            FeatureKind::Unreal,
            "object {} placeholder {} must be unreal",
            self.id,
            feature.id
        );
        feature.claim(self.id);
        self.feature_ids.push(feature.id);
        self.unreal_run += 1;
    }

    /// Refreshes the real aggregates after `feature` grew by consuming another.
    pub fn absorb_real_stats(&mut self, feature: &Feature) {
        self.max_real_width_px = self.max_real_width_px.max(feature.pixel_box.width());
        self.max_real_height_px = self.max_real_height_px.max(feature.pixel_box.height());
        self.max_real_hot_pixels = self.max_real_hot_pixels.max(feature.heat.pixel_count);
        self.max_real_heat_sum = self.max_real_heat_sum.max(feature.heat.sum_heat);
        self.max_heat = self.max_heat.max(feature.heat.max_heat);
    }

    // ========================================================================
    // PREDICTION
    // ========================================================================

    /// Pixel velocity per block, from the first to the last real feature.
    ///
    /// `None` until there are two real features.
    pub fn pixel_velocity(&self, arena: &FeatureArena) -> Option<(f64, f64)> {
        let blocks = self.last_real_block.blocks_since(self.first_real_block);
        if self.real_feature_count < 2 || blocks <= 0 {
            return None;
        }
        let (fx, fy) = arena.get(self.first_real_feature).center();
        let (lx, ly) = arena.get(self.last_real_feature).center();
        Some(((lx - fx) / blocks as f64, (ly - fy) / blocks as f64))
    }

    /// Where the last feature's box moves to one block later.
    ///
    /// Used as the box of Unreal placeholders.
    pub fn predicted_box(&self, arena: &FeatureArena) -> PixelBox {
        let last = arena.get(self.last_feature_id()).pixel_box;
        match self.pixel_velocity(arena) {
            Some((vx, vy)) => last.translate(vx, vy),
            None => last,
        }
    }

    /// Search box for this object's feature in the next block.
    ///
    /// With a velocity estimate the predicted box grows to the largest real
    /// box seen, to tolerate partial occlusion. After a real sighting it
    /// grows a further few pixels on each side, to tolerate drone jitter.
    pub fn expected_location_this_block(&self, arena: &FeatureArena) -> PixelBox {
        let mut expected = self.predicted_box(arena);
        if self.pixel_velocity(arena).is_some() {
            let (cx, cy) = expected.center();
            expected = PixelBox::from_center(
                cx,
                cy,
                expected.width().max(self.max_real_width_px),
                expected.height().max(self.max_real_height_px),
            );
        }
        if arena.get(self.last_feature_id()).is_real() {
            expected = expected.inflate(JITTER_MARGIN_PX);
        }
        expected
    }

    /// Can this object take `feature`, given the box it is expected in?
    pub fn can_claim(
        &self,
        feature: &Feature,
        expected: &PixelBox,
        config: &TrackerConfig,
    ) -> bool {
        self.being_tracked
            && feature.is_real()
            && feature.object_id().is_none()
            && (feature.significant || self.significant)
            && feature.significant_overlap(expected, config.feature_min_overlap_perc)
    }

    // ========================================================================
    // LIFETIME
    // ========================================================================

    /// True when missing `block` should end tracking.
    ///
    /// Video tolerates a gap of `object_max_unreal_blocks` block ids since the
    /// last real sighting, once at least one placeholder bridges it. Image
    /// input stops at the first miss.
    pub fn persistence_expired(&self, block: BlockId, config: &TrackerConfig) -> bool {
        if !config.is_video() {
            return true;
        }
        let gap = block.blocks_since(self.last_real_block);
        self.unreal_run > 0 && gap > i64::from(config.object_max_unreal_blocks)
    }

    /// Stops tracking. Terminal.
    pub fn deactivate(&mut self) {
        self.being_tracked = false;
    }

    // ========================================================================
    // AGGREGATES
    // ========================================================================

    /// Re-evaluates significance after a real update.
    pub fn calculate_significant(&mut self, arena: &FeatureArena, config: &TrackerConfig) {
        let last = arena.get(self.last_real_feature);
        let verdict = calculate_significant(
            &SignificanceInputs {
                max_hot_pixels: self.max_real_hot_pixels,
                last_hot_pixels: last.heat.pixel_count,
                last_box_area: last.pixel_box.area(),
                real_feature_count: self.real_feature_count,
                height_m: self.height_m,
            },
            config,
        );
        self.significant = verdict.significant;
        self.attributes = verdict.attributes();
        if verdict.significant {
            self.num_sig_blocks += 1;
        }
    }

    /// Adopts a triangulated point (easting, northing, absolute elevation).
    ///
    /// Errors are the dispersion of the per-feature estimates around it.
    pub fn set_triangulated(
        &mut self,
        point: &Vector3<f64>,
        height_m: Option<f64>,
        arena: &FeatureArena,
    ) {
        let location = Vector2::new(point.x, point.y);
        self.location = Some(location);
        // No terrain under the point keeps the last known height
        if height_m.is_some() {
            self.height_m = height_m;
        }
        self.update_errors(arena);
    }

    /// Sets the location to the centroid of the feature locations.
    ///
    /// Leaves the previous estimates untouched when no feature is located.
    pub fn locate_from_features(&mut self, arena: &FeatureArena) {
        let located: Vec<&Feature> = located_features(&self.feature_ids, arena).collect();
        if located.is_empty() {
            return;
        }
        let n = located.len() as f64;
        let centroid = located
            .iter()
            .filter_map(|f| f.location)
            .fold(Vector2::<f64>::zeros(), |acc, l| acc + l)
            / n;
        self.location = Some(centroid);

        let heights: Vec<f64> = located.iter().filter_map(|f| f.height_m).collect();
        if !heights.is_empty() {
            self.height_m = Some(heights.iter().sum::<f64>() / heights.len() as f64);
        }
        self.update_errors(arena);
    }

    fn update_errors(&mut self, arena: &FeatureArena) {
        if let Some(location) = self.location {
            let distances: Vec<f64> = located_features(&self.feature_ids, arena)
                .filter_map(|f| f.location)
                .map(|l| (l - location).norm())
                .collect();
            self.location_error_m = mean(&distances);
        }
        if let Some(height) = self.height_m {
            let deviations: Vec<f64> = located_features(&self.feature_ids, arena)
                .filter_map(|f| f.height_m)
                .map(|h| (h - height).abs())
                .collect();
            self.height_error_m = mean(&deviations);
        }
    }

    /// Estimates body area from the largest real blob seen at `range_m`.
    pub fn update_size(&mut self, intrinsics: &CameraIntrinsics, range_m: f64) {
        if range_m > 0.0 && self.max_real_hot_pixels > 0 {
            let gsd = intrinsics.ground_sample_distance(range_m);
            self.size_cm2 = Some(self.max_real_hot_pixels as f64 * gsd * gsd * 10_000.0);
        }
    }
}

/// Real features of an object that carry a location.
fn located_features<'a>(
    ids: &'a [FeatureId],
    arena: &'a FeatureArena,
) -> impl Iterator<Item = &'a Feature> + 'a {
    ids.iter()
        .map(move |id| arena.get(*id))
        .filter(|f| f.is_real() && f.location.is_some())
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

// ============================================================================
// TESTS
// ============================================================================
