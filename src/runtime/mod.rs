// src/runtime/mod.rs
//! Run execution runtime
//!
//! - **Collection**: append-only, finalize-once storage for parallel phases
//! - **Worker**: cooperative lifecycle for one task on one OS thread
//! - **Memory**: memory sampling and pressure classification
//! - **Scheduler**: admission control over many workers
//! - **Simulation**: worker task that exports and advances a model
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        ExecutionScheduler (caller thread)     │
//! │   memory probe ─► pause / resume decisions    │
//! └──────────────────────────────────────────────┘
//!        │ start/pause/unpause/halt     ▲ handle / notify_execution_complete
//!        ▼                              │
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │ Managed    │ │ Managed    │ │ Managed    │  one OS thread each
//! │ Worker     │ │ Worker     │ │ Worker     │
//! └────────────┘ └────────────┘ └────────────┘
//! ```

pub mod collection;
pub mod memory;
pub mod scheduler;
pub mod simulation;
pub mod worker;

pub use collection::AppendOnlyCollection;
pub use memory::{MemoryPolicy, MemoryPressure, MemoryProbe, MemorySample, SystemMemoryProbe};
pub use scheduler::{ExecutionScheduler, Outcome, SchedulerReport, WorkerReport};
pub use simulation::{Selector, SimulationWorker, Stage, Updater};
pub use worker::{ManagedWorker, WorkerId, WorkerObserver, WorkerOutcome, WorkerState, WorkerTask};
