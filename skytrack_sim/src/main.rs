//! SkyTrack Simulator CLI
//!
//! Fly synthetic surveys through the tracker and score them against ground
//! truth.

use clap::Parser;
use skytrack_core::{summary, CameraIntrinsics, TrackerConfig};
use skytrack_sim::{ScenarioId, ScenarioResult, ScenarioRunner, SimError, DEFAULT_BLOCKS};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// SkyTrack deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "skytrack-sim")]
#[command(about = "Run deterministic survey simulations for SkyTrack", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (hover, transect, orbit, hillside, dropout, herd, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Blocks (video frames) to fly per scenario
    #[arg(short, long, default_value_t = DEFAULT_BLOCKS)]
    blocks: u32,

    /// Tracker configuration JSON; missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera intrinsics JSON (default: DJI M2EA thermal)
    #[arg(long)]
    intrinsics: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Print the validation report and object summaries of every run
    #[arg(long)]
    report: bool,

    /// Export per-block tracker state to a JSON file (single scenario only)
    #[arg(long)]
    export: Option<PathBuf>,
}

fn load_config(path: &Path) -> Result<TrackerConfig, SimError> {
    let json = std::fs::read_to_string(path)?;
    Ok(TrackerConfig::from_json(&json)?)
}

fn load_intrinsics(path: &Path) -> Result<CameraIntrinsics, SimError> {
    let json = std::fs::read_to_string(path)?;
    let intrinsics: CameraIntrinsics = serde_json::from_str(&json)?;
    intrinsics.validate()?;
    Ok(intrinsics)
}

fn build_runner(args: &Args, seed: u64) -> Result<ScenarioRunner, SimError> {
    let mut runner = ScenarioRunner::new(seed).with_blocks(args.blocks);
    if let Some(path) = &args.config {
        runner = runner.with_config(load_config(path)?);
    }
    if let Some(path) = &args.intrinsics {
        runner = runner.with_intrinsics(load_intrinsics(path)?);
    }
    Ok(runner)
}

fn report_result(args: &Args, result: &ScenarioResult) {
    if args.json {
        return;
    }
    if result.passed {
        info!("✓ {} (seed={}) PASSED", result.scenario.name(), result.seed);
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
    if args.report {
        if let Some(report) = &result.report {
            report.print();
        }
        match summary::to_json(&result.summaries) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize object summaries: {}", e),
        }
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("SkyTrack Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: hover, transect, orbit, hillside, dropout, herd, all");
            std::process::exit(2);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(2);
        }

        let runner = build_runner(&args, base_seed).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        });
        let (result, export) = runner.run_with_export(scenarios[0]);
        report_result(&args, &result);

        match export.write_to_file(export_path) {
            Ok(()) => info!("Exported {} frames to {}", export.frames.len(), export_path.display()),
            Err(e) => {
                error!("Failed to write export: {}", e);
                std::process::exit(2);
            }
        }

        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    // Run simulations
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let runner = build_runner(&args, seed).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        });

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            report_result(&args, &result);

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                let metrics = r.report.as_ref().map(|report| {
                    let g = &report.global_metrics;
                    serde_json::json!({
                        "animals": g.total_animals,
                        "found": g.animals_found,
                        "ghosts": g.ghost_objects,
                        "duplicates": g.duplicate_objects,
                        "avg_error_m": g.avg_error(),
                        "rmse_m": g.rmse(),
                        "avg_height_error_m": g.avg_height_error(),
                    })
                });
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "blocks": r.total_blocks,
                    "time_secs": r.final_time_secs,
                    "failure_reason": r.failure_reason,
                    "validation": metrics,
                    "objects": r.summaries,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(2);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
