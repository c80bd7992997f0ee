//! Validation Module - Ground Truth Comparison
//! ===========================================
//!
//! Scores a run's object summaries against the animals that were really
//! there, for the simulation harness and integration tests.
//!
//! Key metrics:
//! - Location error (mean, RMSE, max)
//! - Height error
//! - Coverage (how many animals were found)
//! - Ghost rate (objects with no animal nearby)
//! - Duplicates (several objects for one animal)
//!
//! Usage:
//! ```
//! use skytrack_core::validation::ValidationSession;
//!
//! let mut session = ValidationSession::new();
//! session.record_ground_truth(1, [500.0, 800.0], 1.2, "deer");
//!
//! let report = session.evaluate(&[]);
//! assert_eq!(report.global_metrics.animals_found, 0);
//! ```

use crate::summary::ObjectSummary;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// GROUND TRUTH ENTRY
// =============================================================================

/// One animal that was really in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthEntry {
    pub animal_id: u32,

    /// (easting, northing) in metres
    pub location: Vector2<f64>,

    /// Body height above ground in metres
    pub height_m: f64,

    pub label: String,
}

// =============================================================================
// VALIDATION METRICS
// =============================================================================

/// Per-animal validation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimalMetrics {
    /// Names of the objects associated with this animal
    pub matched_objects: Vec<String>,
    /// Horizontal error of the closest associated object
    pub location_error_m: Option<f64>,
    /// Height error of the closest associated object, if it has a height
    pub height_error_m: Option<f64>,
}

impl AnimalMetrics {
    pub fn found(&self) -> bool {
        !self.matched_objects.is_empty()
    }
}

/// Global validation metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    /// Animals in the ground truth
    pub total_animals: usize,
    /// Object summaries evaluated
    pub total_objects: usize,
    /// Animals with at least one associated object
    pub animals_found: usize,
    /// Objects with a location but no animal within the threshold
    pub ghost_objects: usize,
    /// Objects associated with an animal that already had one
    pub duplicate_objects: usize,
    /// Objects that never got a location
    pub unlocated_objects: usize,
    /// Per-animal best location errors
    pub location_errors: Vec<f64>,
    /// Per-animal best height errors
    pub height_errors: Vec<f64>,
}

impl GlobalMetrics {
    /// Average location error over found animals
    pub fn avg_error(&self) -> f64 {
        mean(&self.location_errors)
    }

    /// Root mean square location error over found animals
    pub fn rmse(&self) -> f64 {
        if self.location_errors.is_empty() {
            0.0
        } else {
            let sum_sq: f64 = self.location_errors.iter().map(|e| e * e).sum();
            (sum_sq / self.location_errors.len() as f64).sqrt()
        }
    }

    pub fn max_error(&self) -> f64 {
        self.location_errors.iter().copied().fold(0.0, f64::max)
    }

    pub fn avg_height_error(&self) -> f64 {
        mean(&self.height_errors)
    }

    /// Percentage of ground-truth animals found
    pub fn coverage(&self) -> f64 {
        if self.total_animals > 0 {
            self.animals_found as f64 / self.total_animals as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Percentage of objects that match no animal
    pub fn ghost_rate(&self) -> f64 {
        if self.total_objects > 0 {
            self.ghost_objects as f64 / self.total_objects as f64 * 100.0
        } else {
            0.0
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// =============================================================================
// VALIDATION SESSION
// =============================================================================

/// Collects ground truth, then scores object summaries against it.
#[derive(Debug, Clone)]
pub struct ValidationSession {
    /// Ground truth keyed by animal id
    ground_truth: BTreeMap<u32, GroundTruthEntry>,
    /// Association threshold (metres): objects within this distance match an animal
    association_threshold: f64,
}

impl ValidationSession {
    /// Create a new validation session with default settings
    pub fn new() -> Self {
        Self::with_threshold(5.0)
    }

    /// Create a validation session with custom association threshold
    pub fn with_threshold(threshold_meters: f64) -> Self {
        Self {
            ground_truth: BTreeMap::new(),
            association_threshold: threshold_meters,
        }
    }

    /// Record an animal
    pub fn record_ground_truth(
        &mut self,
        animal_id: u32,
        location: [f64; 2],
        height_m: f64,
        label: &str,
    ) {
        self.ground_truth.insert(
            animal_id,
            GroundTruthEntry {
                animal_id,
                location: Vector2::new(location[0], location[1]),
                height_m,
                label: label.to_string(),
            },
        );
    }

    pub fn ground_truth(&self) -> impl Iterator<Item = &GroundTruthEntry> {
        self.ground_truth.values()
    }

    /// Associates each located object with its nearest animal and scores the result
    pub fn evaluate(&self, summaries: &[ObjectSummary]) -> ValidationReport {
        let mut per_animal: BTreeMap<u32, AnimalMetrics> =
            self.ground_truth.keys().map(|id| (*id, AnimalMetrics::default())).collect();
        let mut global = GlobalMetrics {
            total_animals: self.ground_truth.len(),
            total_objects: summaries.len(),
            ..Default::default()
        };

        for summary in summaries {
            let Some([e, n]) = summary.location else {
                global.unlocated_objects += 1;
                continue;
            };
            let location = Vector2::new(e, n);

            let nearest = self
                .ground_truth
                .values()
                .map(|gt| (gt, (gt.location - location).norm()))
                .filter(|(_, d)| *d <= self.association_threshold)
                .min_by(|a, b| a.1.total_cmp(&b.1));

            let Some((gt, distance)) = nearest else {
                global.ghost_objects += 1;
                continue;
            };

            let metrics = per_animal.entry(gt.animal_id).or_default();
            if metrics.found() {
                global.duplicate_objects += 1;
            }
            metrics.matched_objects.push(summary.name.clone());
            if metrics.location_error_m.map_or(true, |best| distance < best) {
                metrics.location_error_m = Some(distance);
                metrics.height_error_m = summary.height_m.map(|h| (h - gt.height_m).abs());
            }
        }

        for metrics in per_animal.values().filter(|m| m.found()) {
            global.animals_found += 1;
            global.location_errors.extend(metrics.location_error_m);
            global.height_errors.extend(metrics.height_error_m);
        }

        ValidationReport {
            global_metrics: global,
            per_animal_metrics: per_animal,
            association_threshold: self.association_threshold,
        }
    }
}

impl Default for ValidationSession {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// VALIDATION REPORT
// =============================================================================

/// Final validation report with all metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub global_metrics: GlobalMetrics,
    pub per_animal_metrics: BTreeMap<u32, AnimalMetrics>,
    pub association_threshold: f64,
}

impl ValidationReport {
    /// Print formatted report to console
    pub fn print(&self) {
        let g = &self.global_metrics;
        println!();
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║               SKYTRACK VALIDATION REPORT                     ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Animals (GT):          {:>10}                            ║", g.total_animals);
        println!("║ Objects:               {:>10}                            ║", g.total_objects);
        println!("║ Animals Found:         {:>10}                            ║", g.animals_found);
        println!(
            "║ Ghosts / Duplicates:   {:>4} / {:<4}                         ║",
            g.ghost_objects, g.duplicate_objects
        );
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Average Error:         {:>10.3} m                          ║", g.avg_error());
        println!("║ Max Error:             {:>10.3} m                          ║", g.max_error());
        println!(
            "║ Avg Height Error:      {:>10.3} m                          ║",
            g.avg_height_error()
        );
        println!("║ Coverage:              {:>10.1}%                           ║", g.coverage());
        println!("║ Ghost Rate:            {:>10.1}%                           ║", g.ghost_rate());
        println!("╚══════════════════════════════════════════════════════════════╝");

        if !self.per_animal_metrics.is_empty() {
            println!();
            println!("  Animal    Objects          Error (m)");
            println!("─────────────────────────────────────────────");
            for (id, metrics) in &self.per_animal_metrics {
                let error = metrics
                    .location_error_m
                    .map_or_else(|| "-".to_string(), |e| format!("{e:.3}"));
                println!("  {:>6}    {:<16} {:>9}", id, metrics.matched_objects.join(","), error);
            }
        }
    }

    /// Check if validation passes acceptance criteria
    pub fn passes_criteria(
        &self,
        max_avg_error: f64,
        min_coverage: f64,
        max_ghost_rate: f64,
    ) -> bool {
        self.global_metrics.avg_error() <= max_avg_error
            && self.global_metrics.coverage() >= min_coverage
            && self.global_metrics.ghost_rate() <= max_ghost_rate
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use skytrack_env::BlockId;

    fn summary(name: &str, location: Option<[f64; 2]>, height_m: Option<f64>) -> ObjectSummary {
        ObjectSummary {
            name: name.to_string(),
            location,
            location_error_m: None,
            height_m,
            height_error_m: None,
            size_cm2: None,
            first_block: BlockId(0),
            last_block: BlockId(10),
            num_sig_blocks: 5,
            attributes: "P3D1T3E1".to_string(),
        }
    }

    #[test]
    fn test_matches_nearest_animal() {
        let mut session = ValidationSession::new();
        session.record_ground_truth(1, [0.0, 0.0], 1.0, "deer");
        session.record_ground_truth(2, [50.0, 0.0], 0.5, "fox");

        let report = session.evaluate(&[
            summary("C1", Some([0.3, 0.4]), Some(1.5)),
            summary("C2", Some([51.0, 0.0]), None),
        ]);

        let g = &report.global_metrics;
        assert_eq!(g.animals_found, 2);
        assert_eq!(g.ghost_objects, 0);
        assert!((g.avg_error() - 0.75).abs() < 1e-12);
        assert!((g.max_error() - 1.0).abs() < 1e-12);
        assert_eq!(report.per_animal_metrics[&1].height_error_m, Some(0.5));
        assert_eq!(report.per_animal_metrics[&2].height_error_m, None);
        assert!(report.passes_criteria(1.0, 100.0, 0.0));
    }

    #[test]
    fn test_ghosts_duplicates_and_unlocated() {
        let mut session = ValidationSession::with_threshold(2.0);
        session.record_ground_truth(1, [0.0, 0.0], 1.0, "deer");
        session.record_ground_truth(2, [100.0, 100.0], 1.0, "deer");

        let report = session.evaluate(&[
            summary("C1", Some([1.0, 0.0]), None),
            summary("C2", Some([0.5, 0.0]), None),
            summary("C3", Some([30.0, 30.0]), None),
            summary("C4", None, None),
        ]);

        let g = &report.global_metrics;
        assert_eq!(g.total_objects, 4);
        assert_eq!(g.animals_found, 1);
        assert_eq!(g.duplicate_objects, 1);
        assert_eq!(g.ghost_objects, 1);
        assert_eq!(g.unlocated_objects, 1);
        assert_eq!(g.coverage(), 50.0);
        assert_eq!(g.ghost_rate(), 25.0);
        // Best of the two matches counts
        assert_eq!(report.per_animal_metrics[&1].location_error_m, Some(0.5));
        assert_eq!(report.per_animal_metrics[&1].matched_objects, vec!["C1", "C2"]);
        assert!(!report.passes_criteria(1.0, 100.0, 10.0));
    }
}
