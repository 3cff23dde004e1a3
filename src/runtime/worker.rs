// src/runtime/worker.rs
//! Cooperative worker lifecycle
//!
//! A [`ManagedWorker`] runs a [`WorkerTask`] on its own OS thread and drives
//! it through a fixed state machine:
//!
//! ```text
//! CREATED ──start──► RUNNING ◄──unpause── PAUSED
//!                       │  └────pause─────►  │
//!                       │                    │
//!                 halt / failure           halt
//!                       ▼                    ▼
//!                    HALTING ──shutdown──► TERMINATED
//!                       ▲
//! RUNNING ──is_complete──┘ (shutdown(true))
//! ```
//!
//! Pause and halt are requests honoured at the loop boundary, between two
//! `do_loop` calls, and once more before `setup`: a worker paused before it
//! starts does no work at all until resumed. `shutdown` runs exactly once on
//! the way to TERMINATED.
//! Errors and panics escaping a task hook are caught on the worker thread and
//! reported to the [`WorkerObserver`]; they never unwind into other threads.

use crate::utils::errors::{EngineError, Result, WorkerFailure};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique worker identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Created,
    Running,
    Paused,
    Halting,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Created => "CREATED",
            WorkerState::Running => "RUNNING",
            WorkerState::Paused => "PAUSED",
            WorkerState::Halting => "HALTING",
            WorkerState::Terminated => "TERMINATED",
        };
        f.write_str(label)
    }
}

/// Unit of cooperative work driven by a [`ManagedWorker`]
///
/// `do_loop` must return promptly; pause and halt requests are only observed
/// between calls.
pub trait WorkerTask: Send + 'static {
    /// Called once on the worker thread before the first tick
    fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// One unit of work
    fn do_loop(&mut self) -> anyhow::Result<()>;

    /// Checked after every `do_loop`
    fn is_complete(&self) -> bool;

    /// Called exactly once on the way to TERMINATED
    fn shutdown(&mut self, _completed_normally: bool) {}

    /// Task-specific status detail
    fn status(&self) -> String {
        String::new()
    }
}

/// Receives failure and completion reports from workers
pub trait WorkerObserver: Send + Sync {
    fn handle(&self, worker: WorkerId, failure: &WorkerFailure);

    fn notify_execution_complete(&self, worker: WorkerId, completed_normally: bool);
}

/// Observer used when a worker runs outside a scheduler
struct LoggingObserver;

impl WorkerObserver for LoggingObserver {
    fn handle(&self, worker: WorkerId, failure: &WorkerFailure) {
        error!(%worker, %failure, "worker failed");
    }

    fn notify_execution_complete(&self, worker: WorkerId, completed_normally: bool) {
        debug!(%worker, completed_normally, "worker finished");
    }
}

/// Final result of a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerOutcome {
    pub completed_normally: bool,
    pub ticks: u64,
    pub failure: Option<WorkerFailure>,
}

struct Control {
    state: WorkerState,
    halt_requested: bool,
    pause_requested: bool,
}

struct Shared {
    control: Mutex<Control>,
    signal: Condvar,
    ticks: AtomicU64,
    detail: Mutex<String>,
    outcome: Mutex<Option<WorkerOutcome>>,
}

impl Shared {
    /// Block at the loop boundary while paused; false once halted
    fn await_turn(&self) -> bool {
        let mut control = self.control.lock();
        loop {
            if control.halt_requested {
                control.state = WorkerState::Halting;
                return false;
            }
            if control.pause_requested {
                if control.state != WorkerState::Paused {
                    control.state = WorkerState::Paused;
                    debug!("paused at loop boundary");
                    self.signal.notify_all();
                }
                self.signal.wait(&mut control);
                continue;
            }
            if control.state == WorkerState::Paused {
                debug!("resumed");
            }
            control.state = WorkerState::Running;
            return true;
        }
    }

    fn terminate(&self, outcome: WorkerOutcome) {
        *self.outcome.lock() = Some(outcome);
        let mut control = self.control.lock();
        control.state = WorkerState::Terminated;
        self.signal.notify_all();
    }
}

/// A task plus the thread and state machine that drive it
pub struct ManagedWorker {
    id: WorkerId,
    name: String,
    shared: Arc<Shared>,
    task: Mutex<Option<Box<dyn WorkerTask>>>,
    observer: Mutex<Option<Arc<dyn WorkerObserver>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ManagedWorker {
    pub fn new(name: impl Into<String>, task: impl WorkerTask) -> Self {
        Self {
            id: WorkerId::next(),
            name: name.into(),
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    state: WorkerState::Created,
                    halt_requested: false,
                    pause_requested: false,
                }),
                signal: Condvar::new(),
                ticks: AtomicU64::new(0),
                detail: Mutex::new(String::new()),
                outcome: Mutex::new(None),
            }),
            task: Mutex::new(Some(Box::new(task))),
            observer: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route failure and completion reports to `observer`; must precede `start`
    pub fn set_observer(&self, observer: Arc<dyn WorkerObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn observer(&self) -> Arc<dyn WorkerObserver> {
        self.observer
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::new(LoggingObserver))
    }

    /// Spawn the worker thread; CREATED → RUNNING
    pub fn start(&self) -> Result<()> {
        let mut task_slot = self.task.lock();
        {
            let mut control = self.shared.control.lock();
            if control.state != WorkerState::Created {
                return Err(EngineError::InvalidState(format!(
                    "{} cannot start from {}",
                    self.id, control.state
                )));
            }
            control.state = WorkerState::Running;
        }
        let task = task_slot
            .take()
            .ok_or_else(|| EngineError::InvalidState(format!("{} has no task", self.id)))?;

        let id = self.id;
        let name = self.name.clone();
        let shared = Arc::clone(&self.shared);
        let observer = self.observer();

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(id, name, shared, task, observer));

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                info!(worker = %self.id, name = %self.name, "worker started");
                Ok(())
            }
            Err(e) => {
                error!(worker = %self.id, "failed to spawn worker thread: {}", e);
                let failure = WorkerFailure::Setup(format!("thread spawn failed: {}", e));
                let observer = self.observer();
                observer.handle(self.id, &failure);
                observer.notify_execution_complete(self.id, false);
                self.shared.terminate(WorkerOutcome {
                    completed_normally: false,
                    ticks: 0,
                    failure: Some(failure),
                });
                Err(e.into())
            }
        }
    }

    /// Request a pause at the next loop boundary
    ///
    /// A pause requested before `start` holds the worker right after setup.
    pub fn pause(&self) {
        let mut control = self.shared.control.lock();
        if control.state != WorkerState::Terminated {
            control.pause_requested = true;
        }
    }

    pub fn unpause(&self) {
        let mut control = self.shared.control.lock();
        control.pause_requested = false;
        self.shared.signal.notify_all();
    }

    /// Request termination; wakes a paused worker so it can shut down
    ///
    /// A worker that was never started terminates immediately without
    /// running `setup` or `shutdown`.
    pub fn halt(&self) {
        let mut control = self.shared.control.lock();
        match control.state {
            WorkerState::Created => {
                control.halt_requested = true;
                *self.shared.outcome.lock() = Some(WorkerOutcome {
                    completed_normally: false,
                    ticks: 0,
                    failure: None,
                });
                control.state = WorkerState::Terminated;
                self.shared.signal.notify_all();
                drop(control);

                debug!(worker = %self.id, "halted before start");
                self.task.lock().take();
                self.observer().notify_execution_complete(self.id, false);
            }
            WorkerState::Running | WorkerState::Paused => {
                control.halt_requested = true;
                control.state = WorkerState::Halting;
                self.shared.signal.notify_all();
            }
            WorkerState::Halting | WorkerState::Terminated => {}
        }
    }

    pub fn state(&self) -> WorkerState {
        self.shared.control.lock().state
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == WorkerState::Terminated
    }

    /// Completed `do_loop` calls
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Current state plus task detail
    pub fn status(&self) -> String {
        let state = self.state();
        let detail = self.shared.detail.lock();
        if detail.is_empty() {
            state.to_string()
        } else {
            format!("{}: {}", state, detail)
        }
    }

    /// Task detail as last reported by the worker thread
    pub fn detail(&self) -> String {
        self.shared.detail.lock().clone()
    }

    pub fn outcome(&self) -> Option<WorkerOutcome> {
        self.shared.outcome.lock().clone()
    }

    /// Block until TERMINATED
    pub fn join(&self) -> Result<WorkerOutcome> {
        {
            let mut control = self.shared.control.lock();
            if control.state == WorkerState::Created {
                return Err(EngineError::InvalidState(format!(
                    "{} was never started",
                    self.id
                )));
            }
            while control.state != WorkerState::Terminated {
                self.shared.signal.wait(&mut control);
            }
        }
        self.reap()
    }

    /// Block until TERMINATED or `timeout` elapses
    pub fn join_timeout(&self, timeout: Duration) -> Result<WorkerOutcome> {
        let deadline = Instant::now() + timeout;
        {
            let mut control = self.shared.control.lock();
            if control.state == WorkerState::Created {
                return Err(EngineError::InvalidState(format!(
                    "{} was never started",
                    self.id
                )));
            }
            while control.state != WorkerState::Terminated {
                if self
                    .shared
                    .signal
                    .wait_until(&mut control, deadline)
                    .timed_out()
                    && control.state != WorkerState::Terminated
                {
                    warn!(worker = %self.id, ?timeout, "worker did not terminate in time");
                    return Err(WorkerFailure::JoinTimeout(timeout).into());
                }
            }
        }
        self.reap()
    }

    fn reap(&self) -> Result<WorkerOutcome> {
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!(worker = %self.id, "worker thread exited abnormally");
            }
        }
        self.outcome().ok_or_else(|| {
            EngineError::InvalidState(format!("{} terminated without an outcome", self.id))
        })
    }
}

impl fmt::Debug for ManagedWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedWorker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

enum HookError {
    Failed(String),
    Panicked(String),
}

fn guarded<T>(hook: impl FnOnce() -> anyhow::Result<T>) -> std::result::Result<T, HookError> {
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(HookError::Failed(format!("{:#}", e))),
        Err(payload) => Err(HookError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run(
    id: WorkerId,
    name: String,
    shared: Arc<Shared>,
    mut task: Box<dyn WorkerTask>,
    observer: Arc<dyn WorkerObserver>,
) {
    let span = info_span!("worker", id = %id, name = %name);
    let _entered = span.enter();

    let mut completed = false;
    let admitted = shared.await_turn();
    let mut failure = if admitted {
        match guarded(|| task.setup()) {
            Ok(()) => None,
            Err(HookError::Failed(message)) | Err(HookError::Panicked(message)) => {
                Some(WorkerFailure::Setup(message))
            }
        }
    } else {
        debug!("halted before setup");
        None
    };

    if admitted && failure.is_none() {
        while shared.await_turn() {
            let tick = shared.ticks.load(Ordering::Acquire);
            match guarded(|| task.do_loop()) {
                Ok(()) => {}
                Err(HookError::Failed(message)) => {
                    failure = Some(WorkerFailure::Loop { tick, message });
                    break;
                }
                Err(HookError::Panicked(message)) => {
                    failure = Some(WorkerFailure::Panic { tick, message });
                    break;
                }
            }
            shared.ticks.fetch_add(1, Ordering::AcqRel);
            *shared.detail.lock() = task.status();

            if task.is_complete() {
                completed = true;
                break;
            }
        }
    }

    if let Some(failure) = &failure {
        error!(%failure, "worker failed");
        observer.handle(id, failure);
    }
    {
        let mut control = shared.control.lock();
        control.halt_requested |= !completed;
        control.state = WorkerState::Halting;
    }

    if guarded(|| {
        task.shutdown(completed);
        Ok(())
    })
    .is_err()
    {
        error!("shutdown hook panicked");
    }
    *shared.detail.lock() = task.status();

    let ticks = shared.ticks.load(Ordering::Acquire);
    info!(ticks, completed_normally = completed, "worker terminated");
    observer.notify_execution_complete(id, completed);
    shared.terminate(WorkerOutcome {
        completed_normally: completed,
        ticks,
        failure,
    });
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Counts loops and records shutdown calls; optionally fails at a tick
    pub struct ScriptedTask {
        pub loops: Arc<AtomicU64>,
        pub setups: Arc<AtomicU64>,
        pub shutdowns: Arc<Mutex<Vec<bool>>>,
        pub limit: u64,
        pub fail_at: Option<u64>,
        pub panic_at: Option<u64>,
        pub fail_setup: bool,
        pub tick_delay: Duration,
    }

    impl ScriptedTask {
        pub fn new(limit: u64) -> Self {
            Self {
                loops: Arc::new(AtomicU64::new(0)),
                setups: Arc::new(AtomicU64::new(0)),
                shutdowns: Arc::new(Mutex::new(Vec::new())),
                limit,
                fail_at: None,
                panic_at: None,
                fail_setup: false,
                tick_delay: Duration::ZERO,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.tick_delay = delay;
            self
        }
    }

    impl WorkerTask for ScriptedTask {
        fn setup(&mut self) -> anyhow::Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.fail_setup {
                anyhow::bail!("destination unavailable");
            }
            Ok(())
        }

        fn do_loop(&mut self) -> anyhow::Result<()> {
            let tick = self.loops.fetch_add(1, Ordering::SeqCst);
            if !self.tick_delay.is_zero() {
                thread::sleep(self.tick_delay);
            }
            if self.fail_at == Some(tick) {
                anyhow::bail!("injected failure");
            }
            if self.panic_at == Some(tick) {
                panic!("injected panic");
            }
            Ok(())
        }

        fn is_complete(&self) -> bool {
            self.loops.load(Ordering::SeqCst) >= self.limit
        }

        fn shutdown(&mut self, completed_normally: bool) {
            self.shutdowns.lock().push(completed_normally);
        }

        fn status(&self) -> String {
            format!("tick {}/{}", self.loops.load(Ordering::SeqCst), self.limit)
        }
    }

    /// Observer recording every call it receives
    #[derive(Default)]
    pub struct RecordingObserver {
        pub failures: Mutex<Vec<(WorkerId, WorkerFailure)>>,
        pub completions: Mutex<Vec<(WorkerId, bool)>>,
    }

    impl WorkerObserver for RecordingObserver {
        fn handle(&self, worker: WorkerId, failure: &WorkerFailure) {
            self.failures.lock().push((worker, failure.clone()));
        }

        fn notify_execution_complete(&self, worker: WorkerId, completed_normally: bool) {
            self.completions.lock().push((worker, completed_normally));
        }
    }

    pub fn wait_for_state(worker: &ManagedWorker, state: WorkerState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.state() != state {
            assert!(Instant::now() < deadline, "timed out waiting for {}", state);
            thread::sleep(Duration::from_millis(1));
        }
    }
}
