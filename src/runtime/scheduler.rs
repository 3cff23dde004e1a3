// src/runtime/scheduler.rs
//! Memory-aware execution scheduler
//!
//! Owns a registry of [`ManagedWorker`]s, one per simulation run, and keeps
//! as many of them running as memory and the concurrency limit allow.
//!
//! # Control loop
//!
//! ```text
//! run_all()
//! ├─ pre-pause workers beyond max_concurrent (lowest priority first)
//! ├─ start every worker
//! ├─ loop until all TERMINATED or the run deadline passes
//! │    ├─ wait: worker event or sample_interval timer
//! │    ├─ sample memory
//! │    ├─ Critical → pause one running worker (never the last one);
//! │    │             with none running, resume one
//! │    └─ Healthy  → resume paused workers up to max_concurrent
//! ├─ deadline passed → halt every unfinished worker
//! └─ join, bounded by join_timeout once halted
//! ```
//!
//! Workers report failures and completion through [`WorkerObserver`]; one
//! worker's failure never touches another worker.

use crate::runtime::memory::{MemoryPolicy, MemoryPressure, MemoryProbe, SystemMemoryProbe};
use crate::runtime::worker::{ManagedWorker, WorkerId, WorkerObserver, WorkerState};
use crate::utils::config::SchedulerConfig;
use crate::utils::errors::{EngineError, Result, WorkerFailure};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Events sent from worker threads to the control loop
#[derive(Debug)]
enum WorkerEvent {
    Failed(WorkerId),
    Finished(WorkerId),
}

fn log_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::Failed(worker) => debug!(%worker, "failure event"),
        WorkerEvent::Finished(worker) => debug!(%worker, "completion event"),
    }
}

/// Per-worker bookkeeping updated from worker threads
#[derive(Debug, Clone, Default)]
struct Ledger {
    failure: Option<WorkerFailure>,
    completed_normally: Option<bool>,
    finished_at: Option<DateTime<Utc>>,
}

/// Observer half of the scheduler, shared with every worker thread
struct SchedulerCore {
    ledger: DashMap<WorkerId, Ledger>,
    failed: AtomicUsize,
    finished: AtomicUsize,
    events: Sender<WorkerEvent>,
}

impl WorkerObserver for SchedulerCore {
    fn handle(&self, worker: WorkerId, failure: &WorkerFailure) {
        error!(%worker, %failure, "worker failure isolated");
        self.ledger.entry(worker).or_default().failure = Some(failure.clone());
        self.failed.fetch_add(1, Ordering::AcqRel);
        let _ = self.events.send(WorkerEvent::Failed(worker));
    }

    fn notify_execution_complete(&self, worker: WorkerId, completed_normally: bool) {
        {
            let mut entry = self.ledger.entry(worker).or_default();
            entry.completed_normally = Some(completed_normally);
            entry.finished_at = Some(Utc::now());
        }
        self.finished.fetch_add(1, Ordering::AcqRel);
        let _ = self.events.send(WorkerEvent::Finished(worker));
    }
}

struct Registration {
    worker: Arc<ManagedWorker>,
    priority: u32,
    order: usize,
    paused_by_scheduler: bool,
    started_at: Option<DateTime<Utc>>,
}

/// Admission-controlled runner for many workers
pub struct ExecutionScheduler {
    config: SchedulerConfig,
    policy: MemoryPolicy,
    probe: Box<dyn MemoryProbe>,
    registry: DashMap<WorkerId, Registration>,
    core: Arc<SchedulerCore>,
    events: Receiver<WorkerEvent>,
    running: AtomicBool,
    pauses: AtomicU64,
    resumes: AtomicU64,
}

impl ExecutionScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_probe(config, Box::new(SystemMemoryProbe::new()))
    }

    /// Use a custom memory source
    pub fn with_probe(config: SchedulerConfig, probe: Box<dyn MemoryProbe>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            policy: config.memory_policy(),
            config,
            probe,
            registry: DashMap::new(),
            core: Arc::new(SchedulerCore {
                ledger: DashMap::new(),
                failed: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                events: sender,
            }),
            events: receiver,
            running: AtomicBool::new(false),
            pauses: AtomicU64::new(0),
            resumes: AtomicU64::new(0),
        }
    }

    /// Add a worker; higher priority runs first and is paused last
    pub fn register(&self, worker: ManagedWorker, priority: u32) -> Result<WorkerId> {
        if worker.state() != WorkerState::Created {
            return Err(EngineError::InvalidState(format!(
                "{} registered after start",
                worker.id()
            )));
        }
        let id = worker.id();
        worker.set_observer(self.core.clone());
        let order = self.registry.len();
        self.registry.insert(
            id,
            Registration {
                worker: Arc::new(worker),
                priority,
                order,
                paused_by_scheduler: false,
                started_at: None,
            },
        );
        self.core.ledger.insert(id, Ledger::default());
        debug!(worker = %id, priority, "worker registered");
        Ok(id)
    }

    pub fn worker(&self, id: WorkerId) -> Option<Arc<ManagedWorker>> {
        self.registry.get(&id).map(|r| Arc::clone(&r.worker))
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Record a failure against `worker`
    pub fn handle(&self, failure: &WorkerFailure, worker: WorkerId) {
        self.core.handle(worker, failure);
    }

    /// Record that `worker` has shut down
    pub fn notify_execution_complete(&self, worker: WorkerId, completed_normally: bool) {
        self.core.notify_execution_complete(worker, completed_normally);
    }

    /// Start every worker and drive admission control until all terminate
    pub fn run_all(&self) -> Result<SchedulerReport> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::SchedulerBusy);
        }

        let started_at = Utc::now();
        info!(
            workers = self.registry.len(),
            max_concurrent = self.config.max_concurrent,
            "starting execution"
        );

        self.start_workers();

        let interval = self.config.sample_interval();
        let deadline = self.config.run_timeout().map(|timeout| Instant::now() + timeout);
        let mut halted = false;
        while !self.all_terminated() {
            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        self.halt_unfinished();
                        halted = true;
                        break;
                    }
                    remaining.min(interval)
                }
                None => interval,
            };
            match self.events.recv_timeout(wait) {
                Ok(event) => log_event(&event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("worker event channel disconnected");
                }
            }
            // collapse bursts of completions into one rebalance
            while let Ok(event) = self.events.try_recv() {
                log_event(&event);
            }
            self.rebalance();
        }

        self.join_workers(halted);
        let report = self.build_report(started_at);
        info!(%report, "execution finished");
        self.running.store(false, Ordering::Release);
        Ok(report)
    }

    /// Aggregate status line
    pub fn report(&self) -> String {
        self.summary().to_string()
    }

    fn ordered_by_priority(&self) -> Vec<(WorkerId, u32, usize)> {
        let mut ordered: Vec<_> = self
            .registry
            .iter()
            .map(|r| (*r.key(), r.priority, r.order))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ordered
    }

    fn start_workers(&self) {
        for (rank, (id, _, _)) in self.ordered_by_priority().into_iter().enumerate() {
            let Some(mut registration) = self.registry.get_mut(&id) else {
                continue;
            };
            if rank >= self.config.max_concurrent {
                registration.worker.pause();
                registration.paused_by_scheduler = true;
            }
            match registration.worker.start() {
                Ok(()) => registration.started_at = Some(Utc::now()),
                Err(e) => warn!(worker = %id, "worker not started: {}", e),
            }
        }
    }

    fn halt_unfinished(&self) {
        for r in self.registry.iter() {
            if !r.worker.is_terminated() {
                warn!(worker = %r.key(), state = %r.worker.state(), "run deadline passed, halting worker");
                r.worker.halt();
            }
        }
    }

    fn all_terminated(&self) -> bool {
        self.registry.iter().all(|r| r.worker.is_terminated())
    }

    fn rebalance(&self) {
        let sample = self.probe.sample();
        let pressure = self.policy.assess(&sample);

        let mut running = Vec::new();
        let mut paused = Vec::new();
        for r in self.registry.iter() {
            if r.worker.is_terminated() {
                continue;
            }
            let rank = (r.priority, r.order, *r.key());
            if r.paused_by_scheduler {
                paused.push(rank);
            } else {
                running.push(rank);
            }
        }

        match pressure {
            MemoryPressure::Critical if running.is_empty() => {
                if !paused.is_empty() {
                    warn!(
                        free = self.policy.free_fraction(&sample),
                        "memory critical with nothing running, resuming one worker"
                    );
                }
                self.resume_paused(paused, 1);
            }
            MemoryPressure::Critical => {
                if running.len() == 1 {
                    debug!("memory critical but only one worker left running");
                    return;
                }
                // lowest priority, most recently started
                if let Some(&(_, _, id)) = running
                    .iter()
                    .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
                {
                    if let Some(mut registration) = self.registry.get_mut(&id) {
                        registration.worker.pause();
                        registration.paused_by_scheduler = true;
                        self.pauses.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            worker = %id,
                            free = self.policy.free_fraction(&sample),
                            "memory pressure, pausing worker"
                        );
                    }
                }
            }
            MemoryPressure::Steady if !running.is_empty() => {}
            MemoryPressure::Steady | MemoryPressure::Healthy => {
                let capacity = self.config.max_concurrent.saturating_sub(running.len());
                let budget = if pressure == MemoryPressure::Steady {
                    capacity.min(1)
                } else {
                    capacity
                };
                self.resume_paused(paused, budget);
            }
        }
    }

    /// Resume up to `budget` paused workers, highest priority and earliest
    /// registered first
    fn resume_paused(&self, mut paused: Vec<(u32, usize, WorkerId)>, budget: usize) {
        paused.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        for &(_, _, id) in paused.iter().take(budget) {
            if let Some(mut registration) = self.registry.get_mut(&id) {
                registration.worker.unpause();
                registration.paused_by_scheduler = false;
                self.resumes.fetch_add(1, Ordering::Relaxed);
                debug!(worker = %id, "resuming worker");
            }
        }
    }

    fn join_workers(&self, halted: bool) {
        let workers: Vec<Arc<ManagedWorker>> = self
            .registry
            .iter()
            .map(|r| Arc::clone(&r.worker))
            .collect();

        let timeout = if halted { self.config.join_timeout() } else { None };
        for worker in workers {
            let joined = match timeout {
                Some(timeout) => worker.join_timeout(timeout),
                None => worker.join(),
            };
            match joined {
                Ok(_) => {}
                Err(EngineError::Worker(failure)) => self.core.handle(worker.id(), &failure),
                Err(e) => warn!(worker = %worker.id(), "join failed: {}", e),
            }
        }
    }

    fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.registry.len(),
            ..Default::default()
        };
        for r in self.registry.iter() {
            let ledger = self
                .core
                .ledger
                .get(r.key())
                .map(|l| l.value().clone())
                .unwrap_or_default();
            match (ledger.completed_normally, ledger.failure.is_some()) {
                (_, true) => summary.failed += 1,
                (Some(true), false) => summary.completed += 1,
                (Some(false), false) => summary.halted += 1,
                (None, false) => match r.worker.state() {
                    WorkerState::Paused => summary.paused += 1,
                    WorkerState::Created => {}
                    _ => summary.running += 1,
                },
            }
        }
        summary
    }

    fn build_report(&self, started_at: DateTime<Utc>) -> SchedulerReport {
        let mut workers: Vec<WorkerReport> = self
            .registry
            .iter()
            .map(|r| {
                let ledger = self
                    .core
                    .ledger
                    .get(r.key())
                    .map(|l| l.value().clone())
                    .unwrap_or_default();
                let outcome = match (&ledger.failure, ledger.completed_normally) {
                    (Some(_), _) => Outcome::Failed,
                    (None, Some(true)) => Outcome::Completed,
                    (None, _) => Outcome::Halted,
                };
                WorkerReport {
                    id: *r.key(),
                    name: r.worker.name().to_string(),
                    priority: r.priority,
                    outcome,
                    ticks: r.worker.ticks(),
                    detail: r.worker.detail(),
                    failure: ledger.failure.as_ref().map(|f| f.to_string()),
                    started_at: r.started_at,
                    finished_at: ledger.finished_at,
                }
            })
            .collect();
        workers.sort_by_key(|w| w.id);

        SchedulerReport {
            summary: self.summary(),
            pauses: self.pauses.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            started_at,
            finished_at: Utc::now(),
            workers,
        }
    }
}

/// Aggregate counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub halted: usize,
    pub paused: usize,
    pub running: usize,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} complete, {} failed, {} paused",
            self.completed, self.total, self.failed, self.paused
        )
    }
}

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
    Halted,
}

/// Final per-worker line of the report
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub id: WorkerId,
    pub name: String,
    pub priority: u32,
    pub outcome: Outcome,
    pub ticks: u64,
    pub detail: String,
    pub failure: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of [`ExecutionScheduler::run_all`]
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerReport {
    pub summary: ReportSummary,
    pub pauses: u64,
    pub resumes: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workers: Vec<WorkerReport>,
}

impl SchedulerReport {
    pub fn failed(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| w.outcome == Outcome::Failed)
    }
}

impl fmt::Display for SchedulerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)
    }
}

impl SchedulerReport {
    /// Multi-line report with one line per worker
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} ({} pauses, {} resumes)\n",
            self.summary, self.pauses, self.resumes
        );
        for worker in &self.workers {
            out.push_str(&format!(
                "  {} [{}] {:?} after {} ticks",
                worker.id, worker.name, worker.outcome, worker.ticks
            ));
            if let Some(failure) = &worker.failure {
                out.push_str(&format!(" - {}", failure));
            }
            if !worker.detail.is_empty() {
                out.push_str(&format!(" ({})", worker.detail));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::memory::testing::ScriptedProbe;
    use crate::runtime::worker::testing::ScriptedTask;
    use std::time::Duration;

    fn config(max_concurrent: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            sample_interval_ms: 5,
            run_timeout_secs: Some(60),
            join_timeout_secs: Some(10),
            ..Default::default()
        }
    }

    fn healthy_scheduler(max_concurrent: usize) -> ExecutionScheduler {
        ExecutionScheduler::with_probe(config(max_concurrent), Box::new(ScriptedProbe::new(0.9)))
    }

    #[test]
    fn test_all_workers_complete() {
        let scheduler = healthy_scheduler(4);
        let mut loops = Vec::new();
        for i in 0..4 {
            let task = ScriptedTask::new(5);
            loops.push(Arc::clone(&task.loops));
            scheduler
                .register(ManagedWorker::new(format!("run-{}", i), task), 1)
                .unwrap();
        }

        let report = scheduler.run_all().unwrap();
        assert!(report.to_string().starts_with("4/4 complete, 0 failed"));
        assert_eq!(report.summary.completed, 4);
        assert!(loops.iter().all(|l| l.load(Ordering::SeqCst) == 5));
        assert_eq!(scheduler.report(), "4/4 complete, 0 failed, 0 paused");
    }

    #[test]
    fn test_failure_is_isolated() {
        let scheduler = healthy_scheduler(4);
        let mut ids = Vec::new();
        let mut loops = Vec::new();
        let mut shutdowns = Vec::new();
        for i in 0..4 {
            let mut task = ScriptedTask::new(5).with_delay(Duration::from_millis(1));
            if i == 2 {
                task.fail_at = Some(1);
            }
            loops.push(Arc::clone(&task.loops));
            shutdowns.push(Arc::clone(&task.shutdowns));
            ids.push(
                scheduler
                    .register(ManagedWorker::new(format!("run-{}", i + 1), task), 1)
                    .unwrap(),
            );
        }

        let report = scheduler.run_all().unwrap();
        assert_eq!(report.summary.completed, 3);
        assert_eq!(report.summary.failed, 1);
        assert!(report.to_string().starts_with("3/4 complete, 1 failed"));

        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, ids[2]);
        assert_eq!(*shutdowns[2].lock(), vec![false]);

        for i in [0, 1, 3] {
            assert_eq!(loops[i].load(Ordering::SeqCst), 5);
            assert_eq!(*shutdowns[i].lock(), vec![true]);
        }
    }

    #[test]
    fn test_concurrency_limit_queues_workers() {
        let scheduler = healthy_scheduler(2);
        for i in 0..5 {
            let task = ScriptedTask::new(10).with_delay(Duration::from_millis(1));
            scheduler
                .register(ManagedWorker::new(format!("run-{}", i), task), i as u32)
                .unwrap();
        }

        let report = scheduler.run_all().unwrap();
        assert_eq!(report.summary.completed, 5);
        // three workers started paused and were resumed later
        assert!(report.resumes >= 3);
    }

    #[test]
    fn test_memory_pressure_pauses_then_recovers() {
        let probe = Arc::new(ScriptedProbe::new(0.01));
        struct SharedProbe(Arc<ScriptedProbe>);
        impl MemoryProbe for SharedProbe {
            fn sample(&self) -> crate::runtime::memory::MemorySample {
                self.0.sample()
            }
        }

        let scheduler =
            ExecutionScheduler::with_probe(config(4), Box::new(SharedProbe(Arc::clone(&probe))));
        let mut workers = Vec::new();
        for i in 0..4 {
            let task = ScriptedTask::new(60).with_delay(Duration::from_millis(2));
            workers.push(
                scheduler
                    .register(ManagedWorker::new(format!("run-{}", i), task), 1)
                    .unwrap(),
            );
        }

        let scheduler = Arc::new(scheduler);
        let runner = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.run_all())
        };

        // let the control loop shed load, then release the pressure
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while scheduler.pauses.load(Ordering::Relaxed) < 3 {
            assert!(std::time::Instant::now() < deadline, "scheduler never paused");
            std::thread::sleep(Duration::from_millis(1));
        }
        let paused = workers
            .iter()
            .filter(|id| scheduler.worker(**id).unwrap().state() == WorkerState::Paused)
            .count();
        assert!(paused <= 3);
        probe.set_free_fraction(0.9);

        let report = runner.join().unwrap().unwrap();
        assert_eq!(report.summary.completed, 4);
        assert_eq!(report.pauses, 3);
        assert!(report.resumes >= 3);
    }

    #[test]
    fn test_critical_memory_still_finishes_queued_workers() {
        let scheduler = ExecutionScheduler::with_probe(config(1), Box::new(ScriptedProbe::new(0.01)));
        for i in 0..2 {
            scheduler
                .register(ManagedWorker::new(format!("run-{}", i), ScriptedTask::new(3)), 0)
                .unwrap();
        }

        let (done, finished) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let _ = done.send(scheduler.run_all());
        });
        let report = finished
            .recv_timeout(Duration::from_secs(10))
            .expect("run_all returned")
            .unwrap();
        assert_eq!(report.summary.completed, 2);
        assert_eq!(report.summary.paused, 0);
        assert!(report.resumes >= 1);
        assert_eq!(report.pauses, 0);
    }

    #[test]
    fn test_run_deadline_halts_unfinished_workers() {
        let scheduler = ExecutionScheduler::with_probe(
            SchedulerConfig {
                run_timeout_secs: Some(1),
                join_timeout_secs: Some(5),
                ..config(2)
            },
            Box::new(ScriptedProbe::new(0.9)),
        );
        let quick = ScriptedTask::new(3);
        let endless = ScriptedTask::new(u64::MAX).with_delay(Duration::from_millis(5));
        let endless_shutdowns = Arc::clone(&endless.shutdowns);
        scheduler.register(ManagedWorker::new("quick", quick), 0).unwrap();
        scheduler.register(ManagedWorker::new("endless", endless), 0).unwrap();

        let started = std::time::Instant::now();
        let report = scheduler.run_all().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(report.summary.completed, 1);
        assert_eq!(report.summary.halted, 1);
        assert_eq!(report.summary.failed, 0);
        let endless = report.workers.iter().find(|w| w.name == "endless").unwrap();
        assert_eq!(endless.outcome, Outcome::Halted);
        assert_eq!(*endless_shutdowns.lock(), vec![false]);
    }

    #[test]
    fn test_stuck_worker_times_out_after_deadline() {
        let scheduler = ExecutionScheduler::with_probe(
            SchedulerConfig {
                run_timeout_secs: Some(1),
                join_timeout_secs: Some(1),
                ..config(1)
            },
            Box::new(ScriptedProbe::new(0.9)),
        );
        let stuck = ScriptedTask::new(2).with_delay(Duration::from_secs(4));
        scheduler.register(ManagedWorker::new("stuck", stuck), 0).unwrap();

        let started = std::time::Instant::now();
        let report = scheduler.run_all().unwrap();
        assert!(started.elapsed() < Duration::from_millis(3500));

        assert_eq!(report.summary.failed, 1);
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed[0].name, "stuck");
        assert!(failed[0]
            .failure
            .as_deref()
            .unwrap()
            .contains("did not terminate within"));
    }

    #[test]
    fn test_register_after_start_rejected() {
        let scheduler = healthy_scheduler(1);
        let worker = ManagedWorker::new("early", ScriptedTask::new(1));
        worker.start().unwrap();
        assert!(scheduler.register(worker, 0).is_err());
    }

    #[test]
    fn test_empty_scheduler() {
        let scheduler = healthy_scheduler(1);
        let report = scheduler.run_all().unwrap();
        assert_eq!(report.to_string(), "0/0 complete, 0 failed, 0 paused");
    }

    #[test]
    fn test_render_lists_each_worker() {
        let scheduler = healthy_scheduler(2);
        let mut task = ScriptedTask::new(3);
        task.fail_at = Some(0);
        scheduler.register(ManagedWorker::new("bad", task), 0).unwrap();
        scheduler
            .register(ManagedWorker::new("good", ScriptedTask::new(3)), 0)
            .unwrap();

        let rendered = scheduler.run_all().unwrap().render();
        assert!(rendered.starts_with("1/2 complete, 1 failed"));
        assert!(rendered.contains("[bad] Failed"));
        assert!(rendered.contains("injected failure"));
        assert!(rendered.contains("[good] Completed after 3 ticks (tick 3/3)"));
    }
}
