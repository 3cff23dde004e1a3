// src/runtime/memory.rs
//! Memory sampling for admission control
//!
//! The scheduler asks a [`MemoryProbe`] for a [`MemorySample`] on every
//! control tick and lets a [`MemoryPolicy`] classify it:
//! - `Critical`: free memory below the threshold, pause a worker
//! - `Steady`: inside the resume margin, leave things alone
//! - `Healthy`: enough headroom to resume paused workers

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// A single memory reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Resident set size of this process, when the platform reports it
    pub process_bytes: Option<u64>,

    /// Memory the OS considers available for new allocations
    pub available_bytes: u64,

    /// Total physical memory
    pub total_bytes: u64,
}

/// Memory pressure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    Critical,
    Steady,
    Healthy,
}

/// Thresholds applied to memory samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    /// Free fraction below which workers are paused
    pub min_free_fraction: f64,

    /// Additional free fraction required before resuming
    pub resume_margin: f64,

    /// Process ceiling in megabytes; free memory is measured against it
    pub memory_limit_mb: Option<u64>,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            min_free_fraction: 0.1,
            resume_margin: 0.05,
            memory_limit_mb: None,
        }
    }
}

impl MemoryPolicy {
    /// Validate thresholds
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..1.0).contains(&self.min_free_fraction) {
            return Err("min_free_fraction must be in [0, 1)".to_string());
        }
        if !(0.0..1.0).contains(&self.resume_margin) {
            return Err("resume_margin must be in [0, 1)".to_string());
        }
        if self.min_free_fraction + self.resume_margin > 1.0 {
            return Err("min_free_fraction + resume_margin cannot exceed 1".to_string());
        }
        if let Some(limit) = self.memory_limit_mb {
            if limit == 0 {
                return Err("memory_limit_mb cannot be 0".to_string());
            }
        }
        Ok(())
    }

    /// Fraction of memory still free, in `[0, 1]`
    ///
    /// With a process ceiling the fraction is `(limit - rss) / limit`,
    /// otherwise it is the system's available share.
    pub fn free_fraction(&self, sample: &MemorySample) -> f64 {
        let fraction = match (self.memory_limit_mb, sample.process_bytes) {
            (Some(limit_mb), Some(used)) => {
                let limit = limit_mb.saturating_mul(BYTES_PER_MB);
                limit.saturating_sub(used) as f64 / limit as f64
            }
            _ if sample.total_bytes == 0 => 1.0,
            _ => sample.available_bytes as f64 / sample.total_bytes as f64,
        };
        fraction.clamp(0.0, 1.0)
    }

    /// Classify a sample
    pub fn assess(&self, sample: &MemorySample) -> MemoryPressure {
        let free = self.free_fraction(sample);
        if free < self.min_free_fraction {
            MemoryPressure::Critical
        } else if free < self.min_free_fraction + self.resume_margin {
            MemoryPressure::Steady
        } else {
            MemoryPressure::Healthy
        }
    }
}

/// Source of memory readings
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySample;
}

/// Probe backed by `sysinfo`
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&self) -> MemorySample {
        let mut system = self.system.lock();
        system.refresh_memory();

        let process_bytes = self.pid.and_then(|pid| {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                false,
                ProcessRefreshKind::nothing().with_memory(),
            );
            system.process(pid).map(|process| process.memory())
        });

        MemorySample {
            process_bytes,
            available_bytes: system.available_memory(),
            total_bytes: system.total_memory(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Probe whose free fraction is set by the test, in thousandths
    pub struct ScriptedProbe {
        free_permille: AtomicU64,
    }

    impl ScriptedProbe {
        pub fn new(free_fraction: f64) -> Self {
            let probe = Self {
                free_permille: AtomicU64::new(0),
            };
            probe.set_free_fraction(free_fraction);
            probe
        }

        pub fn set_free_fraction(&self, fraction: f64) {
            self.free_permille
                .store((fraction * 1000.0).round() as u64, Ordering::SeqCst);
        }
    }

    impl MemoryProbe for ScriptedProbe {
        fn sample(&self) -> MemorySample {
            MemorySample {
                process_bytes: None,
                available_bytes: self.free_permille.load(Ordering::SeqCst),
                total_bytes: 1000,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_sample(available: u64, total: u64) -> MemorySample {
        MemorySample {
            process_bytes: Some(0),
            available_bytes: available,
            total_bytes: total,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = MemoryPolicy::default();
        assert!(policy.validate().is_ok());
        assert!(policy.memory_limit_mb.is_none());
    }

    #[test]
    fn test_validation() {
        let invalid_fraction = MemoryPolicy {
            min_free_fraction: 1.0,
            ..Default::default()
        };
        assert!(invalid_fraction.validate().is_err());

        let invalid_limit = MemoryPolicy {
            memory_limit_mb: Some(0),
            ..Default::default()
        };
        assert!(invalid_limit.validate().is_err());

        let overlapping = MemoryPolicy {
            min_free_fraction: 0.8,
            resume_margin: 0.3,
            memory_limit_mb: None,
        };
        assert!(overlapping.validate().is_err());
    }

    #[test]
    fn test_assess_system_memory() {
        let policy = MemoryPolicy::default();
        assert_eq!(policy.assess(&system_sample(50, 1000)), MemoryPressure::Critical);
        assert_eq!(policy.assess(&system_sample(120, 1000)), MemoryPressure::Steady);
        assert_eq!(policy.assess(&system_sample(600, 1000)), MemoryPressure::Healthy);
    }

    #[test]
    fn test_process_limit_overrides_system_memory() {
        let policy = MemoryPolicy {
            memory_limit_mb: Some(100),
            ..Default::default()
        };
        let sample = MemorySample {
            process_bytes: Some(95 * BYTES_PER_MB),
            available_bytes: 900,
            total_bytes: 1000,
        };
        assert!((policy.free_fraction(&sample) - 0.05).abs() < 1e-9);
        assert_eq!(policy.assess(&sample), MemoryPressure::Critical);

        // Over the ceiling clamps to zero
        let over = MemorySample {
            process_bytes: Some(200 * BYTES_PER_MB),
            ..sample
        };
        assert_eq!(policy.free_fraction(&over), 0.0);
    }

    #[test]
    fn test_empty_sample_is_healthy() {
        let policy = MemoryPolicy::default();
        assert_eq!(policy.assess(&system_sample(0, 0)), MemoryPressure::Healthy);
    }

    #[test]
    fn test_system_sampler_reports_memory() {
        let probe = SystemMemoryProbe::new();
        let sample = probe.sample();
        assert!(sample.total_bytes >= sample.available_bytes);
    }
}
