// src/utils/errors.rs
//! Error taxonomy for the execution core
//!
//! Failures are recovered at the smallest enclosing scope (one worker, one
//! sink) and surfaced through status and report calls. Only setup and
//! configuration errors ever reach the caller of `run_all` or `main`.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("worker failed: {0}")]
    Worker(#[from] WorkerFailure),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid worker state: {0}")]
    InvalidState(String),

    #[error("scheduler is already running")]
    SchedulerBusy,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A destination could not be created or opened.
///
/// Raised before any worker produces records, so a misconfigured output
/// aborts its owner instead of silently dropping data later.
#[derive(Debug, Error)]
#[error("cannot create destination {}: {reason}", path.display())]
pub struct SetupError {
    pub path: PathBuf,
    pub reason: String,
}

impl SetupError {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// `append` was called on a finalized collection.
///
/// Carries the rejected value back to the caller, like a channel `SendError`.
#[derive(Error)]
#[error("collection closed")]
pub struct ClosedCollectionError<T>(pub T);

impl<T> ClosedCollectionError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::fmt::Debug for ClosedCollectionError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClosedCollectionError(..)")
    }
}

/// Why a worker stopped without completing normally
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
pub enum WorkerFailure {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("loop error at tick {tick}: {message}")]
    Loop { tick: u64, message: String },

    #[error("panicked at tick {tick}: {message}")]
    Panic { tick: u64, message: String },

    #[error("did not terminate within {0:?}")]
    JoinTimeout(std::time::Duration),
}

/// Write-behind sink failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink '{sink}' is closed")]
    Closed { sink: String },

    #[error("sink '{sink}' failed: {message}")]
    Failed { sink: String, message: String },

    #[error("write to '{sink}' failed: {message}")]
    Write { sink: String, message: String },

    #[error("consumer thread for '{sink}' panicked")]
    ConsumerPanicked { sink: String },
}

impl SinkError {
    pub fn write(sink: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Write {
            sink: sink.into(),
            message: err.to_string(),
        }
    }
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
