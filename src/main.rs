// src/main.rs
//! Outbreak Engine
//!
//! Runs a batch of epidemic simulations under memory-aware admission control
//! and writes per-run outputs plus a batch report.

use anyhow::Result;
use outbreak_engine::batch::{Batch, REPORT_FILE};
use outbreak_engine::observability::init_tracing;
use outbreak_engine::utils::config::EngineConfig;
use tracing::{info, warn};

fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting Outbreak Engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = EngineConfig::load()?;
    info!(
        runs = config.simulation.runs,
        ticks = config.simulation.ticks,
        max_concurrent = config.scheduler.max_concurrent,
        base_dir = %config.output.base_dir.display(),
        "configuration loaded"
    );

    // Destinations are created here; a bad output path stops us before any run
    let batch = Batch::prepare(&config)?;
    let batch_dir = batch.dir().to_path_buf();

    let report = batch.run()?;
    let failed = report.scheduler.summary.failed;
    if failed > 0 {
        warn!(failed, "some runs failed; their errors are in the report");
    }

    print!("{}", report.scheduler.render());
    println!("report: {}", batch_dir.join(REPORT_FILE).display());
    Ok(())
}
