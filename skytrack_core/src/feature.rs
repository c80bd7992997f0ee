//! Features: single-frame detections and their heat statistics.
//!
//! A feature is one blob in one block. It starts unowned, may be claimed by
//! exactly one object, and may later be absorbed into another feature of the
//! same block. All features of a run live in a [`FeatureArena`], which also
//! hands out their ids.

use crate::camera::CameraIntrinsics;
use crate::config::{DetectorKind, TrackerConfig};
use crate::object::ObjectId;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use skytrack_env::{BlockId, HotPixel, PixelBox, RawDetection};

// ============================================================================
// IDENTITY
// ============================================================================

/// Identifier of a feature. Ids start at 1 and are never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureId(pub u32);

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Feature type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Has detected pixels in this block
    Real,

    /// Placeholder carried forward while an object is briefly not detected
    Unreal,

    /// Was real, but its pixels were absorbed into another feature of the same block
    Consumed,
}

// ============================================================================
// HEAT STATISTICS
// ============================================================================

/// Min/max/sum/count of hot pixel intensities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeatStats {
    pub min_heat: u8,
    pub max_heat: u8,
    pub sum_heat: u64,
    pub pixel_count: u32,
}

impl HeatStats {
    /// Aggregates the given samples.
    pub fn from_pixels(pixels: &[HotPixel]) -> Self {
        pixels.iter().fold(Self::default(), |mut stats, p| {
            if stats.pixel_count == 0 {
                stats.min_heat = p.heat;
                stats.max_heat = p.heat;
            } else {
                stats.min_heat = stats.min_heat.min(p.heat);
                stats.max_heat = stats.max_heat.max(p.heat);
            }
            stats.sum_heat += p.heat as u64;
            stats.pixel_count += 1;
            stats
        })
    }

    /// Combines two sets of statistics as if their pixels had been pooled.
    pub fn merge(&self, other: &HeatStats) -> HeatStats {
        if self.pixel_count == 0 {
            return *other;
        }
        if other.pixel_count == 0 {
            return *self;
        }
        HeatStats {
            min_heat: self.min_heat.min(other.min_heat),
            max_heat: self.max_heat.max(other.max_heat),
            sum_heat: self.sum_heat + other.sum_heat,
            pixel_count: self.pixel_count + other.pixel_count,
        }
    }

    /// Mean intensity, or 0 for no pixels.
    pub fn mean_heat(&self) -> f64 {
        if self.pixel_count == 0 {
            0.0
        } else {
            self.sum_heat as f64 / self.pixel_count as f64
        }
    }
}

// ============================================================================
// FEATURE
// ============================================================================

/// One detected (or placeholder) blob in one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,

    /// Owning block
    pub block_id: BlockId,

    pub kind: FeatureKind,

    pub detector: DetectorKind,

    /// Bounding box in image pixels
    pub pixel_box: PixelBox,

    /// Hot pixel statistics (meaningful for Real features only)
    pub heat: HeatStats,

    /// Enough hot pixels to be a plausible animal on its own
    pub significant: bool,

    /// Cleared once the feature has been consumed
    pub tracked: bool,

    /// Owning object, set exactly once
    object_id: Option<ObjectId>,

    /// Ground location (easting, northing), once computed
    pub location: Option<Vector2<f64>>,

    /// Height above ground in metres, once computed
    pub height_m: Option<f64>,
}

impl Feature {
    /// Creates a Real feature from detector output.
    pub fn real(
        id: FeatureId,
        block_id: BlockId,
        detector: DetectorKind,
        pixel_box: PixelBox,
        hot_pixels: &[HotPixel],
        config: &TrackerConfig,
    ) -> Self {
        let heat = HeatStats::from_pixels(hot_pixels);
        Self {
            id,
            block_id,
            kind: FeatureKind::Real,
            detector,
            pixel_box,
            heat,
            significant: heat.pixel_count >= config.feature_min_pixels,
            tracked: true,
            object_id: None,
            location: None,
            height_m: None,
        }
    }

    /// Creates an Unreal placeholder at the box where the object is expected.
    pub fn unreal(
        id: FeatureId,
        block_id: BlockId,
        detector: DetectorKind,
        pixel_box: PixelBox,
    ) -> Self {
        Self {
            id,
            block_id,
            kind: FeatureKind::Unreal,
            detector,
            pixel_box,
            heat: HeatStats::default(),
            significant: false,
            tracked: true,
            object_id: None,
            location: None,
            height_m: None,
        }
    }

    #[inline]
    pub fn is_real(&self) -> bool {
        self.kind == FeatureKind::Real
    }

    /// Owning object, if claimed.
    #[inline]
    pub fn object_id(&self) -> Option<ObjectId> {
        self.object_id
    }

    /// Centre of the pixel box.
    #[inline]
    pub fn center(&self) -> (f64, f64) {
        self.pixel_box.center()
    }

    /// Returns true if the box touches the image edge (blob possibly cut off).
    pub fn touches_border(&self, intrinsics: &CameraIntrinsics) -> bool {
        self.pixel_box
            .touches_border(intrinsics.image_width_px, intrinsics.image_height_px)
    }

    /// Records ownership by `object_id`.
    ///
    /// # Panics
    /// If the feature is already owned. A second claim means the tracker
    /// handed one feature to two objects.
    pub fn claim(&mut self, object_id: ObjectId) {
        assert!(
            self.object_id.is_none(),
            "feature {} already owned by {:?}, cannot be claimed by {}",
            self.id,
            self.object_id,
            object_id
        );
        self.object_id = Some(object_id);
    }

    /// Absorbs `other` into this feature.
    ///
    /// The box grows to the union of both boxes and the heat statistics are
    /// pooled. `other` becomes Consumed, stops being tracked and loses its
    /// owner.
    ///
    /// # Panics
    /// If the two features belong to different blocks.
    pub fn consume(&mut self, other: &mut Feature) {
        assert_eq!(
            self.block_id, other.block_id,
            "feature {} cannot consume {} from another block",
            self.id, other.id
        );
        assert_ne!(self.id, other.id, "feature {} cannot consume itself", self.id);

        self.pixel_box = self.pixel_box.union(&other.pixel_box);
        self.heat = self.heat.merge(&other.heat);
        self.significant = self.significant || other.significant;

        other.kind = FeatureKind::Consumed;
        other.tracked = false;
        other.object_id = None;
        other.clear_location();
    }

    /// Returns true if `candidate` overlaps this feature's box by more than
    /// `min_overlap_percent` of either box's own area.
    ///
    /// This is deliberately not IoU: a small box lying entirely inside a
    /// large one overlaps 100% of its own area.
    pub fn significant_overlap(&self, candidate: &PixelBox, min_overlap_percent: f64) -> bool {
        let shared = self.pixel_box.intersection_area(candidate);
        if shared == 0 {
            return false;
        }
        let threshold = min_overlap_percent / 100.0;
        let ratio = |area: i64| area > 0 && shared as f64 / area as f64 > threshold;
        ratio(self.pixel_box.area()) || ratio(candidate.area())
    }

    /// Forgets any computed location and height.
    pub fn clear_location(&mut self) {
        self.location = None;
        self.height_m = None;
    }
}

// ============================================================================
// ARENA
// ============================================================================

/// Dense storage for all features of a run.
///
/// The arena is the only place features live; objects refer to them by id.
#[derive(Debug, Default)]
pub struct FeatureArena {
    features: Vec<Feature>,
}

impl FeatureArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next feature will receive.
    fn next_id(&self) -> FeatureId {
        FeatureId(self.features.len() as u32 + 1)
    }

    #[inline]
    fn index(id: FeatureId) -> usize {
        assert!(id.0 > 0, "feature id 0 is reserved");
        (id.0 - 1) as usize
    }

    /// Adds a Real feature built from a detection.
    pub fn push_real(
        &mut self,
        block_id: BlockId,
        detector: DetectorKind,
        detection: &RawDetection,
        config: &TrackerConfig,
    ) -> FeatureId {
        let id = self.next_id();
        self.features.push(Feature::real(
            id,
            block_id,
            detector,
            detection.pixel_box,
            &detection.hot_pixels,
            config,
        ));
        id
    }

    /// Adds an Unreal placeholder.
    pub fn push_unreal(
        &mut self,
        block_id: BlockId,
        detector: DetectorKind,
        pixel_box: PixelBox,
    ) -> FeatureId {
        let id = self.next_id();
        self.features.push(Feature::unreal(id, block_id, detector, pixel_box));
        id
    }

    /// # Panics
    /// If the id was not issued by this arena.
    pub fn get(&self, id: FeatureId) -> &Feature {
        &self.features[Self::index(id)]
    }

    /// # Panics
    /// If the id was not issued by this arena.
    pub fn get_mut(&mut self, id: FeatureId) -> &mut Feature {
        &mut self.features[Self::index(id)]
    }

    /// Mutable access to two distinct features at once.
    pub fn pair_mut(&mut self, a: FeatureId, b: FeatureId) -> (&mut Feature, &mut Feature) {
        let (ia, ib) = (Self::index(a), Self::index(b));
        assert_ne!(ia, ib, "pair_mut needs two distinct features");
        if ia < ib {
            let (lo, hi) = self.features.split_at_mut(ib);
            (&mut lo[ia], &mut hi[0])
        } else {
            let (lo, hi) = self.features.split_at_mut(ia);
            (&mut hi[0], &mut lo[ib])
        }
    }

    /// Features of one block, in id order.
    pub fn in_block(&self, block_id: BlockId) -> impl Iterator<Item = &Feature> {
        // Features are appended block by block, so scan back from the end.
        let start = self
            .features
            .iter()
            .rposition(|f| f.block_id < block_id)
            .map_or(0, |i| i + 1);
        self.features[start..].iter().filter(move |f| f.block_id == block_id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }
}

// ============================================================================
// TESTS
// ============================================================================
