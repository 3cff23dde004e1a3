// src/export/coordinator.rs
//! Per-run export coordination
//!
//! An [`ExportCoordinator`] owns one sink per declared output kind under a
//! run directory and fans each model snapshot out to all of them. Every
//! destination is created when the output is declared, so a bad path fails
//! before any worker starts producing.
//!
//! ```text
//! run-003/
//! ├── summary.csv      (line sink, one row per tick)
//! └── agents.sqlite    (table sink, one row per agent)
//! ```

use crate::export::line_file;
use crate::export::sink::{RecordSink, SinkSummary};
use crate::export::table_store;
use crate::runtime::simulation::{Selector, Stage};
use crate::utils::config::OutputConfig;
use crate::utils::errors::{SetupError, SinkError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, trace, warn};

/// Who releases the outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputScope {
    /// Outputs belong to one run; its worker releases them on shutdown
    #[default]
    PerRun,
    /// Outputs are shared by several workers and released by the owner
    Shared,
}

/// Type-erased selector and sink pair
trait Output<M>: Send + Sync {
    fn kind(&self) -> &str;
    fn export(&self, model: &M, stage: Stage) -> Result<usize, SinkError>;
    fn close(&self);
    fn join(&self) -> Result<SinkSummary, SinkError>;
    fn report(&self) -> String;
    fn records_written(&self) -> u64;
}

struct Bound<S, K> {
    kind: String,
    selector: S,
    sink: K,
    parallel_threshold: usize,
}

impl<M, S, K> Output<M> for Bound<S, K>
where
    S: Selector<M>,
    K: RecordSink<S::Record>,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    fn export(&self, model: &M, stage: Stage) -> Result<usize, SinkError> {
        let records = self
            .selector
            .records_for_bulk(model, stage, self.parallel_threshold);
        if records.is_empty() {
            return Ok(0);
        }
        self.sink.submit_records(records)
    }

    fn close(&self) {
        self.sink.close()
    }

    fn join(&self) -> Result<SinkSummary, SinkError> {
        self.sink.join()
    }

    fn report(&self) -> String {
        self.sink.report()
    }

    fn records_written(&self) -> u64 {
        self.sink.records_written()
    }
}

/// Sinks for one run directory
pub struct ExportCoordinator<M> {
    run_dir: PathBuf,
    scope: OutputScope,
    outputs: Vec<Box<dyn Output<M>>>,
    summaries: Mutex<Option<Vec<Result<SinkSummary, SinkError>>>>,
}

impl<M: 'static> ExportCoordinator<M> {
    pub fn builder(run_dir: impl Into<PathBuf>, config: &OutputConfig) -> ExportCoordinatorBuilder<M> {
        ExportCoordinatorBuilder {
            run_dir: run_dir.into(),
            config: config.clone(),
            scope: OutputScope::PerRun,
            outputs: Vec::new(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn scope(&self) -> OutputScope {
        self.scope
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.outputs.iter().map(|o| o.kind()).collect()
    }

    /// Hand the records selected for `stage` to every output
    ///
    /// An output whose sink already failed is skipped; its error is visible
    /// in [`reports`](Self::reports) and [`finish`](Self::finish). Exporting
    /// after release is an error.
    pub fn export(&self, model: &M, stage: Stage) -> Result<usize, SinkError> {
        let mut total = 0;
        for output in &self.outputs {
            match output.export(model, stage) {
                Ok(count) => total += count,
                Err(SinkError::Failed { sink, .. }) => {
                    trace!(%sink, %stage, "skipping failed output");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Called by a worker on shutdown; finishes per-run outputs only
    pub fn release(&self) {
        if self.scope == OutputScope::PerRun {
            self.finish();
        }
    }

    /// Close every sink, wait for it to drain, and collect the results
    ///
    /// Idempotent; later calls return the first result.
    pub fn finish(&self) -> Vec<Result<SinkSummary, SinkError>> {
        let mut summaries = self.summaries.lock();
        if let Some(done) = summaries.as_ref() {
            return done.clone();
        }

        // close all first so the consumers drain concurrently
        for output in &self.outputs {
            output.close();
        }
        let results: Vec<_> = self.outputs.iter().map(|o| o.join()).collect();

        for (output, result) in self.outputs.iter().zip(&results) {
            match result {
                Ok(summary) => info!(
                    output = output.kind(),
                    records = summary.records_written,
                    "output finished"
                ),
                Err(e) => warn!(output = output.kind(), "output failed: {}", e),
            }
        }
        *summaries = Some(results.clone());
        results
    }

    pub fn is_released(&self) -> bool {
        self.summaries.lock().is_some()
    }

    /// `"<kind>: <sink report> (<n> records)"` per output
    pub fn reports(&self) -> Vec<String> {
        self.outputs
            .iter()
            .map(|o| format!("{}: {} ({} records)", o.kind(), o.report(), o.records_written()))
            .collect()
    }
}

/// Declares the outputs of an [`ExportCoordinator`]
pub struct ExportCoordinatorBuilder<M> {
    run_dir: PathBuf,
    config: OutputConfig,
    scope: OutputScope,
    outputs: Vec<Box<dyn Output<M>>>,
}

impl<M: 'static> ExportCoordinatorBuilder<M> {
    pub fn scope(mut self, scope: OutputScope) -> Self {
        self.scope = scope;
        self
    }

    /// Add `{run_dir}/{kind}.csv`, created now
    pub fn csv<S>(mut self, kind: &str, selector: S) -> Result<Self, SetupError>
    where
        S: Selector<M> + 'static,
        S::Record: Sync,
    {
        let path = self.run_dir.join(format!("{}.csv", kind));
        let sink = line_file::setup::<S::Record>(&path, self.config.line_buffer_hint)?
            .with_parallel_threshold(self.config.parallel_export_threshold);
        self.push(kind, selector, sink);
        Ok(self)
    }

    /// Add `{run_dir}/{kind}.sqlite` with table `kind`, created now
    pub fn table<S>(mut self, kind: &str, selector: S) -> Result<Self, SetupError>
    where
        S: Selector<M> + 'static,
    {
        let path = self.run_dir.join(format!("{}.sqlite", kind));
        let sink = table_store::setup::<S::Record>(&path, kind, self.config.table_buffer_hint)?;
        self.push(kind, selector, sink);
        Ok(self)
    }

    fn push<S, K>(&mut self, kind: &str, selector: S, sink: K)
    where
        S: Selector<M> + 'static,
        K: RecordSink<S::Record> + 'static,
    {
        self.outputs.push(Box::new(Bound {
            kind: kind.to_string(),
            selector,
            sink,
            parallel_threshold: self.config.parallel_export_threshold,
        }));
    }

    pub fn build(self) -> ExportCoordinator<M> {
        ExportCoordinator {
            run_dir: self.run_dir,
            scope: self.scope,
            outputs: self.outputs,
            summaries: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::record::testing::Row;
    use rusqlite::Connection;
    use std::fs;

    struct Snapshot {
        step: u32,
        agents: u32,
    }

    /// One row per snapshot
    struct Totals;

    impl Selector<Snapshot> for Totals {
        type Record = Row;

        fn records_for(&self, model: &Snapshot, stage: Stage) -> Vec<Row> {
            vec![Row {
                producer: model.step,
                seq: model.agents,
                label: stage.to_string(),
            }]
        }
    }

    /// One row per agent, at baseline and finish only
    struct PerAgent;

    impl Selector<Snapshot> for PerAgent {
        type Record = Row;

        fn records_for(&self, model: &Snapshot, stage: Stage) -> Vec<Row> {
            match stage {
                Stage::Baseline | Stage::Finish => {
                    (0..model.agents).map(|a| Row::new(model.step, a)).collect()
                }
                _ => Vec::new(),
            }
        }
    }

    fn both_outputs(dir: &Path) -> ExportCoordinator<Snapshot> {
        ExportCoordinator::builder(dir, &OutputConfig::default())
            .csv("totals", Totals)
            .unwrap()
            .table("agents", PerAgent)
            .unwrap()
            .build()
    }

    #[test]
    fn test_fans_out_to_every_output() {
        let dir = tempfile::tempdir().unwrap();
        let exports = both_outputs(dir.path());
        assert_eq!(exports.kinds(), vec!["totals", "agents"]);

        let mut snapshot = Snapshot { step: 0, agents: 50 };
        assert_eq!(exports.export(&snapshot, Stage::Baseline).unwrap(), 51);
        snapshot.step = 1;
        assert_eq!(exports.export(&snapshot, Stage::Update).unwrap(), 1);
        assert_eq!(exports.export(&snapshot, Stage::Finish).unwrap(), 51);

        let results = exports.finish();
        let written: Vec<u64> = results
            .iter()
            .map(|r| r.as_ref().unwrap().records_written)
            .collect();
        assert_eq!(written, vec![3, 100]);

        let csv = fs::read_to_string(dir.path().join("totals.csv")).unwrap();
        assert_eq!(csv.lines().count(), 4);
        let conn = Connection::open(dir.path().join("agents.sqlite")).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 100);
    }

    #[test]
    fn test_finish_is_idempotent_and_blocks_exports() {
        let dir = tempfile::tempdir().unwrap();
        let exports = both_outputs(dir.path());
        let snapshot = Snapshot { step: 0, agents: 1 };
        exports.export(&snapshot, Stage::Start).unwrap();

        let first = exports.finish();
        let second = exports.finish();
        assert_eq!(first, second);
        assert!(exports.is_released());
        assert!(matches!(
            exports.export(&snapshot, Stage::Update),
            Err(SinkError::Closed { .. })
        ));
        assert!(exports.reports().iter().all(|r| r.contains(": closed")));
    }

    #[test]
    fn test_shared_scope_ignores_release() {
        let dir = tempfile::tempdir().unwrap();
        let exports = ExportCoordinator::<Snapshot>::builder(dir.path(), &OutputConfig::default())
            .scope(OutputScope::Shared)
            .csv("totals", Totals)
            .unwrap()
            .build();

        exports.release();
        assert!(!exports.is_released());
        exports.finish();
        assert!(exports.is_released());
    }

    #[test]
    fn test_failed_output_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let exports = both_outputs(dir.path());

        Connection::open(dir.path().join("agents.sqlite"))
            .unwrap()
            .execute("DROP TABLE agents", [])
            .unwrap();

        let snapshot = Snapshot { step: 0, agents: 5 };
        exports.export(&snapshot, Stage::Baseline).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !exports.reports()[1].contains("failed") {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        // the failed output is skipped, the healthy one keeps accepting
        assert_eq!(exports.export(&snapshot, Stage::Finish).unwrap(), 1);

        let results = exports.finish();
        assert_eq!(results[0].as_ref().unwrap().records_written, 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_bad_run_dir_fails_at_build() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "").unwrap();

        let result = ExportCoordinator::<Snapshot>::builder(&file, &OutputConfig::default())
            .csv("totals", Totals);
        let err = result.err().unwrap();
        assert!(err.path.starts_with(&file));
    }
}
