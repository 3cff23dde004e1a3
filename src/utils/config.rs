// src/utils/config.rs
//! Engine configuration
//!
//! Plain data consumed by the execution core. Values come from an optional
//! `outbreak.{yaml,toml,json}` file in the working directory, overridden by
//! `OUTBREAK__<SECTION>__<KEY>` environment variables, e.g.
//! `OUTBREAK__SCHEDULER__MAX_CONCURRENT=8`.

use crate::runtime::memory::MemoryPolicy;
use crate::utils::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub output: OutputConfig,
    pub simulation: SimulationConfig,
}

impl EngineConfig {
    /// Load from `outbreak.*` plus environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("outbreak")
    }

    /// Load from the given file stem (extension resolved by the `config` crate)
    pub fn load_from(stem: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(stem).required(false))
            .add_source(
                config::Environment::with_prefix("OUTBREAK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.output.validate()?;
        self.simulation.validate()
    }
}

/// Admission control and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running workers
    pub max_concurrent: usize,

    /// Pause workers while free memory is below this fraction
    pub min_free_memory_fraction: f64,

    /// Extra headroom above the threshold before paused workers resume
    pub resume_margin: f64,

    /// Treat this as the process memory ceiling instead of system memory
    pub memory_limit_mb: Option<u64>,

    /// Memory sampling period
    pub sample_interval_ms: u64,

    /// Deadline for a whole run; unfinished workers are halted once it passes
    pub run_timeout_secs: Option<u64>,

    /// Bounded wait for each halted worker to terminate after the deadline
    pub join_timeout_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            min_free_memory_fraction: 0.1,
            resume_margin: 0.05,
            memory_limit_mb: None,
            sample_interval_ms: 250,
            run_timeout_secs: None,
            join_timeout_secs: None,
        }
    }
}

impl SchedulerConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_secs.map(Duration::from_secs)
    }

    pub fn memory_policy(&self) -> MemoryPolicy {
        MemoryPolicy {
            min_free_fraction: self.min_free_memory_fraction,
            resume_margin: self.resume_margin,
            memory_limit_mb: self.memory_limit_mb,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent must be at least 1".into(),
            ));
        }
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.sample_interval_ms must be positive".into(),
            ));
        }
        if self.join_timeout_secs.is_some() && self.run_timeout_secs.is_none() {
            return Err(ConfigError::Invalid(
                "scheduler.join_timeout_secs only applies with scheduler.run_timeout_secs".into(),
            ));
        }
        self.memory_policy()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("scheduler: {}", e)))
    }
}

/// Output destinations and write-behind buffering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory; each batch gets its own subdirectory
    pub base_dir: PathBuf,

    /// Buffer size hint for line-oriented files, in bytes
    pub line_buffer_hint: usize,

    /// Initial batch capacity hint for table stores, in rows
    pub table_buffer_hint: usize,

    /// Batches and agent snapshots at least this large are built on parallel threads
    pub parallel_export_threshold: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("output"),
            line_buffer_hint: 64 * 1024,
            table_buffer_hint: 1024,
            parallel_export_threshold: 4096,
        }
    }
}

impl OutputConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line_buffer_hint == 0 || self.table_buffer_hint == 0 {
            return Err(ConfigError::Invalid(
                "output buffer hints must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters for the batch of runs launched by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub runs: usize,
    pub ticks: u64,
    pub population: usize,
    pub contacts_per_tick: usize,
    pub transmission_probability: f64,
    pub recovery_probability: f64,
    pub initial_infected: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            runs: 4,
            ticks: 100,
            population: 10_000,
            contacts_per_tick: 4,
            transmission_probability: 0.05,
            recovery_probability: 0.1,
            initial_infected: 10,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probability = 0.0..=1.0;
        if !probability.contains(&self.transmission_probability)
            || !probability.contains(&self.recovery_probability)
        {
            return Err(ConfigError::Invalid(
                "simulation probabilities must lie in [0, 1]".into(),
            ));
        }
        if self.initial_infected > self.population {
            return Err(ConfigError::Invalid(
                "simulation.initial_infected exceeds population".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.scheduler.max_concurrent >= 1);
        assert_eq!(config.scheduler.sample_interval(), Duration::from_millis(250));
        assert!(config.scheduler.join_timeout().is_none());
    }

    #[test]
    fn test_validation() {
        let zero_concurrency = SchedulerConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(zero_concurrency.validate().is_err());

        let bad_fraction = SchedulerConfig {
            min_free_memory_fraction: 1.5,
            ..Default::default()
        };
        assert!(bad_fraction.validate().is_err());

        let orphan_join_timeout = SchedulerConfig {
            join_timeout_secs: Some(5),
            ..Default::default()
        };
        assert!(orphan_join_timeout.validate().is_err());
        let bounded = SchedulerConfig {
            run_timeout_secs: Some(60),
            ..orphan_join_timeout
        };
        assert!(bounded.validate().is_ok());

        let bad_seeding = SimulationConfig {
            population: 5,
            initial_infected: 10,
            ..Default::default()
        };
        assert!(bad_seeding.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "[scheduler]\nmax_concurrent = 3\n\n[simulation]\nruns = 7\nticks = 12\n",
        )
        .unwrap();

        let stem = dir.path().join("engine");
        let config = EngineConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.scheduler.max_concurrent, 3);
        assert_eq!(config.simulation.runs, 7);
        assert_eq!(config.simulation.ticks, 12);
        // untouched sections keep their defaults
        assert_eq!(config.output.line_buffer_hint, 64 * 1024);
    }
}
