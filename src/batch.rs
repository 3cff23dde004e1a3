// src/batch.rs
//! Batch of simulation runs
//!
//! Lays out one output directory per run under a fresh batch directory,
//! registers one [`SimulationWorker`] per run with an [`ExecutionScheduler`],
//! runs them and writes `report.json` next to the run directories.
//!
//! ```text
//! {base_dir}/{batch ulid}/
//! ├── report.json
//! ├── run-001/{summary.csv, agents.sqlite}
//! └── run-002/{summary.csv, agents.sqlite}
//! ```

use crate::export::coordinator::ExportCoordinator;
use crate::model::{AgentSelector, ContactUpdater, Population, SummarySelector};
use crate::runtime::scheduler::{ExecutionScheduler, SchedulerReport};
use crate::runtime::simulation::SimulationWorker;
use crate::runtime::worker::ManagedWorker;
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span};
use ulid::Ulid;

pub const REPORT_FILE: &str = "report.json";

/// Everything written to `report.json`
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: String,
    pub created_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    pub config: EngineConfig,
    pub scheduler: SchedulerReport,
}

/// Runs registered with a scheduler, ready to execute
pub struct Batch {
    id: Ulid,
    dir: PathBuf,
    config: EngineConfig,
    scheduler: ExecutionScheduler,
}

impl Batch {
    /// Create every run directory and destination
    ///
    /// Any destination that cannot be created aborts the batch here, before
    /// a single worker starts.
    pub fn prepare(config: &EngineConfig) -> Result<Self> {
        Self::prepare_with(config, ExecutionScheduler::new(config.scheduler.clone()))
    }

    /// Like [`prepare`](Self::prepare) with a caller-supplied scheduler
    pub fn prepare_with(config: &EngineConfig, scheduler: ExecutionScheduler) -> Result<Self> {
        config.validate()?;
        let id = Ulid::new();
        let dir = config.output.base_dir.join(id.to_string());
        let _span = info_span!("batch", id = %id).entered();

        let mut seeds = StdRng::seed_from_u64(config.simulation.seed);
        for run in 1..=config.simulation.runs {
            let name = format!("run-{:03}", run);
            let run_dir = dir.join(&name);

            let exports = ExportCoordinator::<Population>::builder(&run_dir, &config.output)
                .csv("summary", SummarySelector)?
                .table("agents", AgentSelector)?
                .build();

            let seed: u64 = seeds.gen();
            let mut rng = StdRng::seed_from_u64(seed);
            let population = Population::seeded(run as u32, &config.simulation, &mut rng);
            let updater = ContactUpdater::new(&config.simulation, seed);
            let task = SimulationWorker::new(
                population,
                updater,
                Arc::new(exports),
                config.simulation.ticks,
            );

            // earlier runs first when memory is scarce
            let priority = (config.simulation.runs - run) as u32;
            scheduler.register(ManagedWorker::new(name, task), priority)?;
        }

        info!(
            runs = config.simulation.runs,
            dir = %dir.display(),
            "batch prepared"
        );
        Ok(Self {
            id,
            dir,
            config: config.clone(),
            scheduler,
        })
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Execute every run and write `report.json`
    ///
    /// Failed runs are recorded in the report; only I/O errors writing the
    /// report itself are returned.
    pub fn run(self) -> Result<BatchReport> {
        let scheduler = self.scheduler.run_all()?;
        let report = BatchReport {
            batch: self.id.to_string(),
            created_at: Utc::now(),
            output_dir: self.dir.clone(),
            config: self.config,
            scheduler,
        };
        write_report(&self.dir, &report)?;
        Ok(report)
    }
}

fn write_report(dir: &Path, report: &BatchReport) -> Result<()> {
    fs::create_dir_all(dir)?;
    let file = File::create(dir.join(REPORT_FILE))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .map_err(|e| EngineError::Io(e.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(base_dir: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.output.base_dir = base_dir.to_path_buf();
        config.scheduler.max_concurrent = 2;
        config.scheduler.sample_interval_ms = 5;
        config.simulation.runs = 3;
        config.simulation.ticks = 5;
        config.simulation.population = 200;
        config.simulation.initial_infected = 2;
        config
    }

    #[test]
    fn test_prepare_creates_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let batch = Batch::prepare(&small_config(dir.path())).unwrap();

        for run in ["run-001", "run-002", "run-003"] {
            assert!(batch.dir().join(run).join("summary.csv").is_file());
            assert!(batch.dir().join(run).join("agents.sqlite").is_file());
        }
        let report = batch.run().unwrap();
        assert_eq!(report.scheduler.summary.completed, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.simulation.transmission_probability = 2.0;
        assert!(matches!(
            Batch::prepare(&config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_unwritable_base_dir_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, "").unwrap();

        let config = small_config(&file);
        assert!(matches!(
            Batch::prepare(&config),
            Err(EngineError::Setup(_))
        ));
    }
}
