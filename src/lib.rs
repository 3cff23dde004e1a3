// src/lib.rs
//! Outbreak Engine Library
//!
//! Concurrent execution core for batches of agent-based epidemic
//! simulations: many independent runs on OS threads, admission-controlled by
//! available memory, each streaming its outputs through write-behind sinks.
//!
//! # Architecture
//!
//! - **runtime**: worker lifecycle, memory-aware scheduler, simulation worker,
//!   append-only collection
//! - **export**: record schemas, asynchronous sinks, CSV and SQLite backends
//! - **model**: reference SIR contact model
//! - **batch**: run directories, worker registration and `report.json`
//! - **observability**: tracing subscriber setup
//! - **utils**: configuration and error types
//!
//! No async runtime is involved: workers, sink consumers and the scheduler's
//! control loop are plain threads.

pub mod batch;
pub mod export;
pub mod model;
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use batch::{Batch, BatchReport};
pub use export::{AsyncSink, ExportCoordinator, Record};
pub use runtime::{AppendOnlyCollection, ExecutionScheduler, ManagedWorker, SimulationWorker};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
