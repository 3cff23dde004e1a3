// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::{EngineConfig, OutputConfig, SchedulerConfig, SimulationConfig};
pub use errors::{
    ClosedCollectionError, ConfigError, EngineError, Result, SetupError, SinkError, WorkerFailure,
};
