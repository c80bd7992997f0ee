//! End-to-end runs of the tracker over small synthetic flights.

use nalgebra::Vector3;
use skytrack_core::camera::project;
use skytrack_core::line_of_sight::line_of_sight;
use skytrack_core::{
    CameraIntrinsics, DetectorKind, ObjectTracker, TrackerConfig, ValidationSession,
};
use skytrack_env::{
    BlockId, CameraPose, FlatTerrain, HotPixel, PixelBox, PoseOracle, PoseTable, RawDetection,
};

fn blob(cx: f64, cy: f64, size: i32) -> RawDetection {
    let pixel_box = PixelBox::from_center(cx, cy, size, size);
    let mut hot = Vec::new();
    for y in pixel_box.top..pixel_box.bottom {
        for x in pixel_box.left..pixel_box.right {
            hot.push(HotPixel { x, y, heat: 210 });
        }
    }
    RawDetection::new(pixel_box, hot)
}

#[test]
fn test_three_frames_from_a_hovering_drone() {
    let intrinsics = CameraIntrinsics::dji_m2ea_thermal();
    let terrain = FlatTerrain::new(50.0);
    let pose = CameraPose::nadir(1000.0, 2000.0, 150.0, 0.0);
    let poses: PoseTable = (0..3).map(|b| (BlockId(b), pose)).collect();
    let mut tracker = ObjectTracker::new(TrackerConfig::default(), intrinsics).unwrap();

    let centres = [(100.0, 100.0), (110.0, 102.0), (120.0, 104.0)];
    for (b, (cx, cy)) in centres.into_iter().enumerate() {
        let outcome = tracker.process_block(
            BlockId(b as u32),
            DetectorKind::Comb,
            &[blob(cx, cy, 10)],
            &poses,
            &terrain,
        );
        // Constant pose gives no baseline: every block falls back to line of sight
        assert_eq!(outcome.triangulated, 0);
        assert_eq!(outcome.line_of_sight, 1);
    }

    assert_eq!(tracker.objects().len(), 1);
    let object = &tracker.objects()[0];
    assert_eq!(object.real_feature_count, 3);

    // One claim per frame
    for b in 0..3 {
        let claimed: Vec<_> = tracker
            .features()
            .in_block(BlockId(b))
            .filter(|f| f.object_id() == Some(object.id))
            .collect();
        assert_eq!(claimed.len(), 1);
    }

    let location = object.location.expect("object located");
    assert!(object.location_error_m.unwrap() < 1.0);

    // The centroid sits under the middle sighting
    let middle =
        line_of_sight(110.0, 102.0, &pose, &intrinsics, &terrain, tracker.config()).unwrap();
    assert!((location - middle.location()).norm() < 1.0);

    let height = object.height_m.unwrap();
    assert!((0.0..0.5).contains(&height));
    assert!(object.size_cm2.unwrap() > 0.0);
}

#[test]
fn test_diagonal_pass_triangulates_animal() {
    let intrinsics = CameraIntrinsics::dji_m2ea_thermal();
    let terrain = FlatTerrain::new(50.0);
    let animal = Vector3::new(1000.0, 2050.0, 51.0);
    let blocks = 20u32;

    // Drone passes diagonally over the animal, 1 m east and 1 m north per frame
    let poses: PoseTable = (0..blocks)
        .map(|b| {
            let step = b as f64;
            (BlockId(b), CameraPose::nadir(990.0 + step, 2040.0 + step, 150.0, 0.0))
        })
        .collect();

    let mut tracker = ObjectTracker::new(TrackerConfig::default(), intrinsics).unwrap();
    let mut triangulated = 0;
    for b in 0..blocks {
        let pose = poses.pose_at(BlockId(b)).unwrap();
        let pixel = project(&animal, &pose, &intrinsics).unwrap();
        let outcome = tracker.process_block(
            BlockId(b),
            DetectorKind::Comb,
            &[blob(pixel.x, pixel.y, 6)],
            &poses,
            &terrain,
        );
        triangulated += outcome.triangulated;
    }

    assert_eq!(tracker.objects().len(), 1);
    assert!(triangulated > 0);

    let object = &tracker.objects()[0];
    let location = object.location.unwrap();
    assert!((location.x - animal.x).abs() < 0.5);
    assert!((location.y - animal.y).abs() < 0.5);
    assert!((object.height_m.unwrap() - 1.0).abs() < 0.5);

    // Seen for long enough to be reported
    let summaries = tracker.summaries();
    assert_eq!(summaries.len(), 1);

    let mut session = ValidationSession::new();
    session.record_ground_truth(1, [animal.x, animal.y], 1.0, "deer");
    let report = session.evaluate(&summaries);
    assert_eq!(report.global_metrics.animals_found, 1);
    assert_eq!(report.global_metrics.ghost_objects, 0);
}
