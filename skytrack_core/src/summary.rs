//! Per-run report of significant objects.

use crate::object::Object;
use serde::{Deserialize, Serialize};
use skytrack_env::BlockId;

/// Reportable view of one object. Unknown values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub name: String,

    /// `[easting, northing]`
    pub location: Option<[f64; 2]>,
    pub location_error_m: Option<f64>,
    pub height_m: Option<f64>,
    pub height_error_m: Option<f64>,
    pub size_cm2: Option<f64>,
    pub first_block: BlockId,
    pub last_block: BlockId,
    pub num_sig_blocks: u32,
    pub attributes: String,
}

impl ObjectSummary {
    pub fn from_object(object: &Object) -> Self {
        Self {
            name: object.name.clone(),
            location: object.location.map(|l| [l.x, l.y]),
            location_error_m: object.location_error_m,
            height_m: object.height_m,
            height_error_m: object.height_error_m,
            size_cm2: object.size_cm2,
            first_block: object.first_real_block,
            last_block: object.last_real_block,
            num_sig_blocks: object.num_sig_blocks,
            attributes: object.attributes.clone(),
        }
    }
}

/// Summaries of every object that was significant in at least one block,
/// in creation order. Objects that later became insignificant or inactive
/// are kept.
pub fn summarize<'a>(objects: impl IntoIterator<Item = &'a Object>) -> Vec<ObjectSummary> {
    objects
        .into_iter()
        .filter(|o| o.num_sig_blocks > 0)
        .map(ObjectSummary::from_object)
        .collect()
}

/// Pretty-printed JSON array of summaries.
pub fn to_json(summaries: &[ObjectSummary]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorKind, TrackerConfig};
    use crate::feature::FeatureArena;
    use crate::object::ObjectId;
    use nalgebra::Vector2;
    use skytrack_env::{PixelBox, RawDetection};

    fn object(id: u32, arena: &mut FeatureArena) -> Object {
        let det = RawDetection::new(PixelBox::new(0, 0, 4, 4), vec![]);
        let f = arena.push_real(BlockId(id), DetectorKind::Yolo, &det, &TrackerConfig::default());
        Object::new(ObjectId(id), arena.get_mut(f))
    }

    #[test]
    fn test_retains_once_significant_objects() {
        let mut arena = FeatureArena::new();
        let mut never = object(1, &mut arena);
        never.significant = false;

        let mut once = object(2, &mut arena);
        once.num_sig_blocks = 3;
        once.significant = false;
        once.deactivate();

        let summaries = summarize([&never, &once]);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "Y2");
        assert_eq!(summaries[0].num_sig_blocks, 3);
    }

    #[test]
    fn test_unknown_values_serialize_as_null() {
        let mut arena = FeatureArena::new();
        let mut o = object(1, &mut arena);
        o.num_sig_blocks = 1;
        o.location = Some(Vector2::new(10.5, 20.0));

        let json = to_json(&summarize([&o])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["location"], serde_json::json!([10.5, 20.0]));
        assert!(value[0]["height_m"].is_null());
        assert!(value[0]["size_cm2"].is_null());
        assert_eq!(value[0]["first_block"], 1);
    }
}
