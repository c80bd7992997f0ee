//! The object tracker.
//!
//! Consumes one block of detections at a time and maintains the set of
//! objects seen so far. Each block runs in two phases:
//!
//! 1. **Claims**: live objects claim overlapping features, unclaimed
//!    significant features start new objects, and objects that claimed
//!    nothing either carry a placeholder forward or stop tracking.
//! 2. **Aggregates**: objects that gained a real feature recompute their
//!    location, height, size and significance.
//!
//! All claims settle before any aggregate is touched, so the state between
//! two calls to [`ObjectTracker::process_block`] is always consistent.

use crate::camera::{camera_position, CameraIntrinsics};
use crate::config::{ConfigError, DetectorKind, TrackerConfig};
use crate::feature::{FeatureArena, FeatureId};
use crate::line_of_sight::line_of_sight;
use crate::object::{Object, ObjectId};
use crate::summary::{summarize, ObjectSummary};
use crate::triangulation::{apply_to_features, select_observations, triangulate};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use skytrack_env::{BlockId, PoseOracle, RawDetection, TerrainOracle};
use tracing::{debug, trace};

// ============================================================================
// BLOCK OUTCOME
// ============================================================================

/// What happened during one block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockOutcome {
    pub block: BlockId,

    /// Real features created from the detections
    pub features: usize,

    /// Features claimed by existing objects
    pub claimed: usize,

    /// Features absorbed into an earlier feature of the same block
    pub consumed: usize,

    /// Candidate claims refused by one-feature-per-block detectors
    pub refused: usize,

    /// Placeholders appended for objects that were not seen
    pub unreal: usize,

    pub created: Vec<ObjectId>,
    pub deactivated: Vec<ObjectId>,

    /// Objects located by multi-view triangulation this block
    pub triangulated: usize,

    /// Objects located by line of sight this block
    pub line_of_sight: usize,
}

// ============================================================================
// TRACKER
// ============================================================================

/// Frame-sequential multi-object tracker.
pub struct ObjectTracker {
    // === Configuration ===
    config: TrackerConfig,
    intrinsics: CameraIntrinsics,

    // === Storage ===
    /// Every feature of the run
    features: FeatureArena,

    /// Every object of the run, indexed by `ObjectId - 1`
    objects: Vec<Object>,

    /// Most recently processed block
    last_block: Option<BlockId>,
}

impl ObjectTracker {
    /// Creates a tracker after validating both configurations.
    pub fn new(config: TrackerConfig, intrinsics: CameraIntrinsics) -> Result<Self, ConfigError> {
        config.validate()?;
        intrinsics.validate()?;
        Ok(Self {
            config,
            intrinsics,
            features: FeatureArena::new(),
            objects: Vec::new(),
            last_block: None,
        })
    }

    /// Creates a tracker with default thresholds.
    pub fn with_defaults(intrinsics: CameraIntrinsics) -> Result<Self, ConfigError> {
        Self::new(TrackerConfig::default(), intrinsics)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn features(&self) -> &FeatureArena {
        &self.features
    }

    /// All objects, in creation order.
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get((id.0 as usize).checked_sub(1)?)
    }

    /// Objects still being tracked.
    pub fn active_objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter().filter(|o| o.being_tracked)
    }

    pub fn last_block(&self) -> Option<BlockId> {
        self.last_block
    }

    /// Objects that were significant in at least one block.
    pub fn summaries(&self) -> Vec<ObjectSummary> {
        summarize(&self.objects)
    }

    // ========================================================================
    // BLOCK PROCESSING
    // ========================================================================

    /// Processes the detections of one block.
    ///
    /// # Panics
    /// If `block` is not later than the previously processed block.
    pub fn process_block<P: PoseOracle, T: TerrainOracle>(
        &mut self,
        block: BlockId,
        detector: DetectorKind,
        detections: &[RawDetection],
        poses: &P,
        terrain: &T,
    ) -> BlockOutcome {
        if let Some(last) = self.last_block {
            assert!(block > last, "block {} processed after block {}", block, last);
        }
        self.last_block = Some(block);

        let mut outcome = BlockOutcome {
            block,
            features: detections.len(),
            ..Default::default()
        };

        let new_features: Vec<FeatureId> = detections
            .iter()
            .map(|d| self.features.push_real(block, detector, d, &self.config))
            .collect();

        // Phase 1: claims
        let existing = self.objects.len();
        self.claim_features(block, &new_features, &mut outcome);
        self.create_objects(&new_features, &mut outcome);
        self.handle_misses(block, existing, &mut outcome);

        // Phase 2: aggregates
        for index in 0..self.objects.len() {
            if self.objects[index].real_claimed_in(block).is_some() {
                self.update_aggregates(index, poses, terrain, &mut outcome);
            }
        }

        trace!(
            %block,
            features = outcome.features,
            claimed = outcome.claimed,
            consumed = outcome.consumed,
            created = outcome.created.len(),
            deactivated = outcome.deactivated.len(),
            "Block processed"
        );
        outcome
    }

    /// Live objects claim the block's features. Objects are visited in
    /// creation order and each tries every feature in detection order.
    fn claim_features(
        &mut self,
        block: BlockId,
        new_features: &[FeatureId],
        outcome: &mut BlockOutcome,
    ) {
        let config = &self.config;
        for object in self.objects.iter_mut().filter(|o| o.being_tracked) {
            let expected = object.expected_location_this_block(&self.features);

            for &id in new_features {
                let feature = self.features.get(id);
                if !object.can_claim(feature, &expected, config) {
                    continue;
                }
                let one_per_block = config.detector(feature.detector).one_feature_per_block;

                match object.real_claimed_in(block) {
                    None => {
                        object.claim_real(self.features.get_mut(id));
                        outcome.claimed += 1;
                        trace!(object = %object.name, feature = %id, "Claimed");
                    }
                    Some(_) if one_per_block => {
                        outcome.refused += 1;
                        trace!(object = %object.name, feature = %id, "Refused second feature");
                    }
                    Some(earlier) => {
                        let (keeper, absorbed) = self.features.pair_mut(earlier, id);
                        keeper.consume(absorbed);
                        object.absorb_real_stats(keeper);
                        outcome.consumed += 1;
                        trace!(object = %object.name, feature = %id, into = %earlier, "Consumed");
                    }
                }
            }
        }
    }

    /// Unclaimed significant features start new objects.
    fn create_objects(&mut self, new_features: &[FeatureId], outcome: &mut BlockOutcome) {
        for &id in new_features {
            let feature = self.features.get_mut(id);
            if !feature.is_real() || !feature.significant || feature.object_id().is_some() {
                continue;
            }
            let object_id = ObjectId(self.objects.len() as u32 + 1);
            let object = Object::new(object_id, feature);
            debug!(
                object = %object.name,
                feature = %id,
                block = %feature.block_id,
                "Created object"
            );
            outcome.created.push(object_id);
            self.objects.push(object);
        }
    }

    /// Objects that existed before this block and were not seen in it.
    fn handle_misses(&mut self, block: BlockId, existing: usize, outcome: &mut BlockOutcome) {
        for object in self.objects[..existing].iter_mut() {
            if !object.being_tracked || object.real_claimed_in(block).is_some() {
                continue;
            }
            if object.persistence_expired(block, &self.config) {
                object.deactivate();
                outcome.deactivated.push(object.id);
                debug!(
                    object = %object.name,
                    %block,
                    last_seen = %object.last_real_block,
                    "Stopped tracking"
                );
            } else {
                let predicted = object.predicted_box(&self.features);
                let placeholder = self.features.push_unreal(block, object.detector, predicted);
                object.claim_unreal(self.features.get_mut(placeholder));
                outcome.unreal += 1;
            }
        }
    }

    // ========================================================================
    // AGGREGATES
    // ========================================================================

    fn update_aggregates<P: PoseOracle, T: TerrainOracle>(
        &mut self,
        index: usize,
        poses: &P,
        terrain: &T,
        outcome: &mut BlockOutcome,
    ) {
        let object = &mut self.objects[index];
        let observations = select_observations(
            object.feature_ids(),
            &mut self.features,
            poses,
            &self.intrinsics,
            &self.config,
        );

        match triangulate(&observations, &self.intrinsics, terrain, &self.config) {
            Ok(result) => {
                apply_to_features(&result, &mut self.features);
                object.set_triangulated(&result.point, result.height_m, &self.features);
                object.update_size(&self.intrinsics, result.mean_range_m());
                outcome.triangulated += 1;
            }
            Err(err) => {
                trace!(object = %object.name, %err, "Triangulation refused, using line of sight");
                let located = locate_by_line_of_sight(
                    object,
                    &mut self.features,
                    poses,
                    terrain,
                    &self.intrinsics,
                    &self.config,
                );
                if located {
                    outcome.line_of_sight += 1;
                }
                if let Some(range_m) = range_to_object(object, &self.features, poses, terrain) {
                    object.update_size(&self.intrinsics, range_m);
                }
            }
        }

        let was_significant = object.significant;
        object.calculate_significant(&self.features, &self.config);
        if object.significant != was_significant {
            debug!(
                object = %object.name,
                significant = object.significant,
                attributes = %object.attributes,
                "Significance changed"
            );
        }
    }
}

/// Locates each usable real feature without a location by line of sight,
/// then places the object at their centroid.
///
/// Returns true if any feature has a location afterwards.
fn locate_by_line_of_sight<P: PoseOracle, T: TerrainOracle>(
    object: &mut Object,
    features: &mut FeatureArena,
    poses: &P,
    terrain: &T,
    intrinsics: &CameraIntrinsics,
    config: &TrackerConfig,
) -> bool {
    for &id in object.feature_ids() {
        let feature = features.get_mut(id);
        if !feature.is_real() || feature.location.is_some() || feature.touches_border(intrinsics) {
            continue;
        }
        let Some(pose) = poses.pose_at(feature.block_id) else {
            continue;
        };
        let (x, y) = feature.center();
        match line_of_sight(x, y, &pose, intrinsics, terrain, config) {
            Ok(hit) => {
                feature.location = Some(hit.location());
                feature.height_m = Some(hit.height_m);
            }
            Err(err) => trace!(feature = %id, %err, "No line of sight"),
        }
    }

    let located = object
        .feature_ids()
        .iter()
        .any(|id| features.get(*id).location.is_some());
    if located {
        object.locate_from_features(features);
    } else {
        debug!(object = %object.name, "Object could not be located");
    }
    located
}

/// Distance from the camera of the latest real sighting to the object.
fn range_to_object<P: PoseOracle, T: TerrainOracle>(
    object: &Object,
    features: &FeatureArena,
    poses: &P,
    terrain: &T,
) -> Option<f64> {
    let location = object.location?;
    let ground = terrain.elevation(location.x, location.y)?;
    let pose = poses.pose_at(features.get(object.last_real_feature_id()).block_id)?;
    let point = Vector3::new(location.x, location.y, ground + object.height_m.unwrap_or(0.0));
    Some((point - camera_position(&pose)).norm())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputKind;
    use crate::feature::FeatureKind;
    use crate::camera::project;
    use skytrack_env::{CameraPose, FlatTerrain, GridTerrain, HotPixel, PixelBox, PoseTable};

    fn blob(cx: f64, cy: f64, size: i32) -> RawDetection {
        let pixel_box = PixelBox::from_center(cx, cy, size, size);
        let mut hot = Vec::new();
        for y in pixel_box.top..pixel_box.bottom {
            for x in pixel_box.left..pixel_box.right {
                hot.push(HotPixel { x, y, heat: 230 });
            }
        }
        RawDetection::new(pixel_box, hot)
    }

    fn poses(blocks: u32) -> PoseTable {
        (0..blocks)
            .map(|b| (BlockId(b), CameraPose::nadir(1000.0, 2000.0, 150.0, 0.0)))
            .collect()
    }

    fn tracker(config: TrackerConfig) -> ObjectTracker {
        ObjectTracker::new(config, CameraIntrinsics::dji_m2ea_thermal()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = TrackerConfig {
            frame_duration_ms: -1.0,
            ..Default::default()
        };
        assert!(ObjectTracker::new(config, CameraIntrinsics::dji_m2ea_thermal()).is_err());
    }

    #[test]
    fn test_one_object_follows_moving_blob() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(3);
        let terrain = FlatTerrain::new(50.0);

        let centres = [(100.0, 100.0), (110.0, 102.0), (120.0, 104.0)];
        for (b, (cx, cy)) in centres.into_iter().enumerate() {
            let outcome = t.process_block(
                BlockId(b as u32),
                DetectorKind::Comb,
                &[blob(cx, cy, 10)],
                &poses,
                &terrain,
            );
            assert_eq!(outcome.created.len(), usize::from(b == 0));
            assert_eq!(outcome.claimed, usize::from(b > 0));
        }

        assert_eq!(t.objects().len(), 1);
        let object = &t.objects()[0];
        assert_eq!(object.real_feature_count, 3);
        assert!(object.location.is_some());
        assert!(object.being_tracked);
    }

    #[test]
    fn test_feature_is_claimed_at_most_once() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(2);
        let terrain = FlatTerrain::new(50.0);

        // Two objects side by side whose expected boxes both cover the middle blob
        t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[blob(100.0, 100.0, 10), blob(112.0, 100.0, 10)],
            &poses,
            &terrain,
        );
        assert_eq!(t.objects().len(), 2);

        t.process_block(
            BlockId(1),
            DetectorKind::Comb,
            &[blob(106.0, 100.0, 10)],
            &poses,
            &terrain,
        );

        let owners: Vec<_> = t
            .objects()
            .iter()
            .filter(|o| o.real_claimed_in(BlockId(1)).is_some())
            .map(|o| o.id)
            .collect();
        assert_eq!(owners, vec![ObjectId(1)]);
        let middle = t.features().in_block(BlockId(1)).find(|f| f.is_real()).unwrap();
        assert_eq!(middle.object_id(), Some(ObjectId(1)));
    }

    #[test]
    fn test_comb_consumes_second_feature() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(2);
        let terrain = FlatTerrain::new(50.0);

        t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[blob(100.0, 100.0, 12)],
            &poses,
            &terrain,
        );
        let outcome = t.process_block(
            BlockId(1),
            DetectorKind::Comb,
            &[blob(97.0, 100.0, 6), blob(104.0, 100.0, 6)],
            &poses,
            &terrain,
        );

        assert_eq!(outcome.claimed, 1);
        assert_eq!(outcome.consumed, 1);
        assert!(outcome.created.is_empty());

        let block_features: Vec<_> = t.features().in_block(BlockId(1)).collect();
        assert_eq!(block_features[1].kind, FeatureKind::Consumed);
        assert_eq!(block_features[0].pixel_box, PixelBox::new(94, 97, 107, 103));
        assert_eq!(block_features[0].heat.pixel_count, 72);
    }

    #[test]
    fn test_yolo_refuses_second_feature() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(2);
        let terrain = FlatTerrain::new(50.0);

        t.process_block(
            BlockId(0),
            DetectorKind::Yolo,
            &[blob(100.0, 100.0, 12)],
            &poses,
            &terrain,
        );
        let outcome = t.process_block(
            BlockId(1),
            DetectorKind::Yolo,
            &[blob(97.0, 100.0, 6), blob(104.0, 100.0, 6)],
            &poses,
            &terrain,
        );

        assert_eq!(outcome.claimed, 1);
        assert_eq!(outcome.refused, 1);
        assert_eq!(outcome.consumed, 0);
        // The refused feature is significant and unowned, so it starts its own object
        assert_eq!(outcome.created, vec![ObjectId(2)]);
        assert_eq!(t.objects()[1].name, "Y2");
    }

    #[test]
    fn test_persistence_window_in_video() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(10);
        let terrain = FlatTerrain::new(50.0);

        t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[blob(100.0, 100.0, 10)],
            &poses,
            &terrain,
        );

        // Five missed blocks are bridged by placeholders
        for b in 1..=5 {
            let outcome = t.process_block(BlockId(b), DetectorKind::Comb, &[], &poses, &terrain);
            assert_eq!(outcome.unreal, 1);
            assert!(t.objects()[0].being_tracked);
        }

        // The sixth stops tracking
        let outcome = t.process_block(BlockId(6), DetectorKind::Comb, &[], &poses, &terrain);
        assert_eq!(outcome.deactivated, vec![ObjectId(1)]);
        assert!(!t.objects()[0].being_tracked);
        assert_eq!(t.objects()[0].feature_ids().len(), 6);

        // An inactive object claims nothing: the blob becomes a new object
        let outcome = t.process_block(
            BlockId(7),
            DetectorKind::Comb,
            &[blob(100.0, 100.0, 10)],
            &poses,
            &terrain,
        );
        assert_eq!(outcome.created, vec![ObjectId(2)]);
    }

    #[test]
    fn test_persistence_measured_in_block_ids() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(20);
        let terrain = FlatTerrain::new(50.0);

        t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[blob(100.0, 100.0, 10)],
            &poses,
            &terrain,
        );

        // Skipped ids: the first miss is still bridged by a placeholder
        let outcome = t.process_block(BlockId(10), DetectorKind::Comb, &[], &poses, &terrain);
        assert_eq!(outcome.unreal, 1);

        // The gap already exceeds the window, so the next miss ends tracking
        let outcome = t.process_block(BlockId(11), DetectorKind::Comb, &[], &poses, &terrain);
        assert_eq!(outcome.deactivated, vec![ObjectId(1)]);
    }

    #[test]
    fn test_reacquired_after_gap() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(5);
        let terrain = FlatTerrain::new(50.0);

        t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[blob(100.0, 100.0, 10)],
            &poses,
            &terrain,
        );
        t.process_block(BlockId(1), DetectorKind::Comb, &[], &poses, &terrain);
        t.process_block(BlockId(2), DetectorKind::Comb, &[], &poses, &terrain);
        let outcome = t.process_block(
            BlockId(3),
            DetectorKind::Comb,
            &[blob(101.0, 101.0, 10)],
            &poses,
            &terrain,
        );

        assert_eq!(outcome.claimed, 1);
        assert!(outcome.created.is_empty());
        assert_eq!(t.objects()[0].unreal_run, 0);
    }

    #[test]
    fn test_image_input_deactivates_on_first_miss() {
        let config = TrackerConfig {
            input: InputKind::Image,
            ..Default::default()
        };
        let mut t = tracker(config);
        let poses = poses(2);
        let terrain = FlatTerrain::new(50.0);

        t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[blob(100.0, 100.0, 10)],
            &poses,
            &terrain,
        );
        let outcome = t.process_block(BlockId(1), DetectorKind::Comb, &[], &poses, &terrain);

        assert_eq!(outcome.unreal, 0);
        assert_eq!(outcome.deactivated, vec![ObjectId(1)]);
    }

    #[test]
    fn test_insignificant_blob_does_not_start_object() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(1);
        let terrain = FlatTerrain::new(50.0);

        // 2×2 = 4 hot pixels, below feature_min_pixels
        let outcome = t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[blob(100.0, 100.0, 2)],
            &poses,
            &terrain,
        );
        assert!(outcome.created.is_empty());
        assert_eq!(t.features().len(), 1);
    }

    #[test]
    fn test_num_sig_blocks_never_decreases() {
        let config = TrackerConfig {
            input: InputKind::Image,
            ..Default::default()
        };
        let mut t = tracker(config);
        let poses = poses(40);
        let terrain = FlatTerrain::new(50.0);

        let mut previous = 0;
        for b in 0..40u32 {
            // Alternate dense and sparse sightings so significance flips
            let detection = if b % 2 == 0 {
                blob(100.0 + b as f64, 100.0, 8)
            } else {
                let mut sparse = blob(100.0 + b as f64, 100.0, 8);
                sparse.hot_pixels.truncate(9);
                sparse
            };
            t.process_block(
                BlockId(b),
                DetectorKind::Comb,
                &[detection],
                &poses,
                &terrain,
            );
            let current = t.objects()[0].num_sig_blocks;
            assert!(current >= previous);
            previous = current;
        }
        assert!(previous > 0);
        assert_eq!(t.summaries().len(), 1);
    }

    /// A raster far from the survey area: every lookup there has no data.
    fn distant_terrain() -> GridTerrain {
        GridTerrain::from_fn(0.0, 0.0, 10.0, 3, 3, |_, _| 50.0).unwrap()
    }

    #[test]
    fn test_line_of_sight_without_terrain_keeps_estimates() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(2);

        t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[blob(330.0, 250.0, 10)],
            &poses,
            &FlatTerrain::new(50.0),
        );
        let location = t.objects()[0].location;
        let height = t.objects()[0].height_m;
        assert!(location.is_some() && height.is_some());

        t.process_block(
            BlockId(1),
            DetectorKind::Comb,
            &[blob(330.0, 250.0, 10)],
            &poses,
            &distant_terrain(),
        );
        let object = &t.objects()[0];
        assert_eq!(object.real_feature_count, 2);
        assert_eq!(object.location, location);
        assert_eq!(object.height_m, height);
    }

    #[test]
    fn test_triangulation_without_terrain_keeps_height() {
        let mut t = tracker(TrackerConfig::default());
        let intrinsics = CameraIntrinsics::dji_m2ea_thermal();
        let target = Vector3::new(1000.0, 2000.0, 51.0);
        // Diagonal drift so the blob shifts in both axes
        let poses: PoseTable = (0..3)
            .map(|b| {
                let d = b as f64;
                (BlockId(b), CameraPose::nadir(1000.0 + d, 2000.0 + d, 150.0, 0.0))
            })
            .collect();
        let sighting = |b: u32| {
            let pixel = project(&target, &poses.pose_at(BlockId(b)).unwrap(), &intrinsics).unwrap();
            blob(pixel.x, pixel.y, 10)
        };
        let flat = FlatTerrain::new(50.0);

        t.process_block(
            BlockId(0),
            DetectorKind::Comb,
            &[sighting(0)],
            &poses,
            &flat,
        );
        let outcome = t.process_block(
            BlockId(1),
            DetectorKind::Comb,
            &[sighting(1)],
            &poses,
            &flat,
        );
        assert_eq!(outcome.triangulated, 1);
        let height = t.objects()[0].height_m;
        assert!(height.is_some());

        let outcome = t.process_block(
            BlockId(2),
            DetectorKind::Comb,
            &[sighting(2)],
            &poses,
            &distant_terrain(),
        );
        assert_eq!(outcome.triangulated, 1);
        let object = &t.objects()[0];
        assert_eq!(object.real_feature_count, 3);
        assert_eq!(object.height_m, height);
        let location = object.location.unwrap();
        assert!((location - target.xy()).norm() < 1.0);
    }

    #[test]
    #[should_panic(expected = "processed after block")]
    fn test_blocks_must_advance() {
        let mut t = tracker(TrackerConfig::default());
        let poses = poses(3);
        let terrain = FlatTerrain::new(50.0);
        t.process_block(BlockId(2), DetectorKind::Comb, &[], &poses, &terrain);
        t.process_block(BlockId(1), DetectorKind::Comb, &[], &poses, &terrain);
    }
}
