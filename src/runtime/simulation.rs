// src/runtime/simulation.rs
//! Simulation worker
//!
//! A [`WorkerTask`] that alternates between exporting a snapshot of the
//! domain model and advancing it one tick. The model, how it advances and
//! which records it yields are all supplied by the caller.

use crate::export::coordinator::ExportCoordinator;
use crate::export::record::Record;
use crate::runtime::worker::WorkerTask;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle point at which records are selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Before anything has run
    Baseline,
    /// Setup done, first tick not yet taken
    Start,
    /// Once per tick, before the model advances
    Update,
    /// After the final tick of a run that completed normally
    Finish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Baseline => "baseline",
            Stage::Start => "start",
            Stage::Update => "update",
            Stage::Finish => "finish",
        };
        f.write_str(label)
    }
}

/// Advances a model by one tick in place
pub trait Updater<M>: Send {
    fn advance(&mut self, model: &mut M) -> anyhow::Result<()>;
}

impl<M, F> Updater<M> for F
where
    F: FnMut(&mut M) -> anyhow::Result<()> + Send,
{
    fn advance(&mut self, model: &mut M) -> anyhow::Result<()> {
        self(model)
    }
}

/// Maps a model snapshot to the records of one output
pub trait Selector<M>: Send + Sync {
    type Record: Record;

    fn records_for(&self, model: &M, stage: Stage) -> Vec<Self::Record>;

    /// Like [`records_for`](Self::records_for), free to build the records on
    /// several threads once the model holds at least `threshold` items
    fn records_for_bulk(&self, model: &M, stage: Stage, _threshold: usize) -> Vec<Self::Record> {
        self.records_for(model, stage)
    }
}

/// Worker task driving one simulation run
pub struct SimulationWorker<M> {
    model: M,
    updater: Box<dyn Updater<M>>,
    exports: Arc<ExportCoordinator<M>>,
    tick: u64,
    tick_limit: u64,
}

impl<M: Send + 'static> SimulationWorker<M> {
    pub fn new(
        model: M,
        updater: impl Updater<M> + 'static,
        exports: Arc<ExportCoordinator<M>>,
        tick_limit: u64,
    ) -> Self {
        Self {
            model,
            updater: Box::new(updater),
            exports,
            tick: 0,
            tick_limit,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: Send + 'static> WorkerTask for SimulationWorker<M> {
    fn setup(&mut self) -> anyhow::Result<()> {
        self.exports.export(&self.model, Stage::Baseline)?;
        self.exports.export(&self.model, Stage::Start)?;
        Ok(())
    }

    fn do_loop(&mut self) -> anyhow::Result<()> {
        self.exports.export(&self.model, Stage::Update)?;
        self.updater.advance(&mut self.model)?;
        self.tick += 1;
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.tick >= self.tick_limit
    }

    fn shutdown(&mut self, completed_normally: bool) {
        if completed_normally {
            if let Err(e) = self.exports.export(&self.model, Stage::Finish) {
                debug!("finish export rejected: {}", e);
            }
        }
        self.exports.release();
    }

    fn status(&self) -> String {
        let outputs = self.exports.reports();
        if outputs.is_empty() {
            format!("tick {}/{}", self.tick, self.tick_limit)
        } else {
            format!("tick {}/{}; {}", self.tick, self.tick_limit, outputs.join("; "))
        }
    }
}
