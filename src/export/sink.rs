// src/export/sink.rs
//! Write-behind sink with a single consumer thread
//!
//! Producers on any thread push into a lock-free queue; one consumer thread
//! owns the [`Destination`] and drains the queue into it. The destination is
//! a single-writer resource, so its write path needs no locking.
//!
//! # Consumer loop
//!
//! ```text
//! loop
//!  ├─ queue empty, not stopping → mark waiting, block on wake signal
//!  ├─ drain whole queue → destination.write_batch
//!  ├─ flush requested → destination.flush
//!  └─ stopping and queue empty → destination.close, exit
//! ```
//!
//! A write error or a panic inside the destination ends the consumer: the
//! sink is marked failed, the remaining queue is discarded and later
//! submissions are rejected. The error is visible through
//! [`AsyncSink::report`] and [`AsyncSink::join`].

use crate::runtime::worker::panic_message;
use crate::utils::errors::SinkError;
use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span};

/// Default upper bound on records handed to the destination in one call
pub const DEFAULT_BATCH_LIMIT: usize = 8192;

/// Exclusive writer behind an [`AsyncSink`]
pub trait Destination<T>: Send + 'static {
    fn write_batch(&mut self, batch: Vec<T>) -> anyhow::Result<()>;

    /// Push buffered bytes to the underlying resource
    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release the resource; called at most once
    fn close(&mut self) -> anyhow::Result<()>;

    /// Human-readable location, e.g. a file path
    fn describe(&self) -> String;
}

/// Final accounting for a sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkSummary {
    pub name: String,
    pub destination: String,
    pub records_written: u64,
    pub batches: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Open,
    Failed(String),
    Closed,
}

struct Signal {
    phase: Phase,
    stopping: bool,
    waiting: bool,
    flush_requested: bool,
}

struct Inner<T> {
    name: String,
    destination: String,
    queue: SegQueue<T>,
    batch_limit: usize,
    signal: Mutex<Signal>,
    wake: Condvar,
    submitted: AtomicU64,
    written: AtomicU64,
    batches: AtomicU64,
}

impl<T> Inner<T> {
    fn rejection(&self, phase: &Phase) -> SinkError {
        match phase {
            Phase::Failed(message) => SinkError::Failed {
                sink: self.name.clone(),
                message: message.clone(),
            },
            _ => SinkError::Closed {
                sink: self.name.clone(),
            },
        }
    }
}

/// Asynchronous write-behind sink
pub struct AsyncSink<T> {
    inner: Arc<Inner<T>>,
    consumer: Mutex<Option<JoinHandle<Result<SinkSummary, SinkError>>>>,
    outcome: Mutex<Option<Result<SinkSummary, SinkError>>>,
}

impl<T: Send + 'static> AsyncSink<T> {
    /// Spawn the consumer thread for `destination`
    pub fn start(name: impl Into<String>, destination: impl Destination<T>) -> std::io::Result<Self> {
        Self::with_batch_limit(name, destination, DEFAULT_BATCH_LIMIT)
    }

    /// Like [`start`](Self::start), capping each `write_batch` call at
    /// `batch_limit` records
    pub fn with_batch_limit(
        name: impl Into<String>,
        destination: impl Destination<T>,
        batch_limit: usize,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let inner = Arc::new(Inner {
            destination: destination.describe(),
            name: name.clone(),
            queue: SegQueue::new(),
            batch_limit: batch_limit.max(1),
            signal: Mutex::new(Signal {
                phase: Phase::Open,
                stopping: false,
                waiting: false,
                flush_requested: false,
            }),
            wake: Condvar::new(),
            submitted: AtomicU64::new(0),
            written: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        });

        let consumer = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name(format!("sink-{}", name))
                .spawn(move || consume(inner, destination))?
        };

        debug!(sink = %name, "sink consumer started");
        Ok(Self {
            inner,
            consumer: Mutex::new(Some(consumer)),
            outcome: Mutex::new(None),
        })
    }
}

impl<T> AsyncSink<T> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue one record and wake the consumer if it is idle
    pub fn submit(&self, record: T) -> Result<(), SinkError> {
        let signal = self.inner.signal.lock();
        if signal.stopping || signal.phase != Phase::Open {
            return Err(self.inner.rejection(&signal.phase));
        }
        self.inner.queue.push(record);
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        if signal.waiting {
            self.inner.wake.notify_one();
        }
        Ok(())
    }

    /// Enqueue a batch under a single wake-up
    pub fn submit_all(&self, records: impl IntoIterator<Item = T>) -> Result<usize, SinkError> {
        let signal = self.inner.signal.lock();
        if signal.stopping || signal.phase != Phase::Open {
            return Err(self.inner.rejection(&signal.phase));
        }
        let mut count = 0;
        for record in records {
            self.inner.queue.push(record);
            count += 1;
        }
        self.inner.submitted.fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 && signal.waiting {
            self.inner.wake.notify_one();
        }
        Ok(count)
    }

    /// Ask the consumer to flush the destination after its next drain
    ///
    /// Advisory only; returns without waiting and promises nothing beyond
    /// the destination's in-process buffers.
    pub fn flush(&self) {
        let mut signal = self.inner.signal.lock();
        if signal.phase == Phase::Open {
            signal.flush_requested = true;
            self.inner.wake.notify_one();
        }
    }

    /// Stop accepting records; the consumer drains what is queued and
    /// closes the destination. Idempotent.
    pub fn close(&self) {
        let mut signal = self.inner.signal.lock();
        if !signal.stopping {
            signal.stopping = true;
            self.inner.wake.notify_one();
            debug!(sink = %self.inner.name, "sink closing");
        }
    }

    /// True iff the queue is empty and the consumer is blocked waiting
    pub fn is_waiting(&self) -> bool {
        let signal = self.inner.signal.lock();
        signal.waiting && self.inner.queue.is_empty()
    }

    /// Block until the consumer thread has terminated
    ///
    /// Does not close the sink; call [`close`](Self::close) first or from
    /// another thread. Later calls return the stored outcome.
    pub fn join(&self) -> Result<SinkSummary, SinkError> {
        let mut outcome = self.outcome.lock();
        if let Some(result) = outcome.as_ref() {
            return result.clone();
        }
        let handle = self.consumer.lock().take();
        let result = match handle {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                error!(sink = %self.inner.name, "sink consumer panicked");
                Err(SinkError::ConsumerPanicked {
                    sink: self.inner.name.clone(),
                })
            }),
            None => Err(SinkError::ConsumerPanicked {
                sink: self.inner.name.clone(),
            }),
        };
        *outcome = Some(result.clone());
        result
    }

    /// `"waiting"`, `"writing"`, `"failed: <reason>"` or `"closed"`
    pub fn report(&self) -> String {
        let signal = self.inner.signal.lock();
        match &signal.phase {
            Phase::Failed(message) => format!("failed: {}", message),
            Phase::Closed => "closed".to_string(),
            Phase::Open if signal.waiting && self.inner.queue.is_empty() => "waiting".to_string(),
            Phase::Open => "writing".to_string(),
        }
    }

    pub fn records_written(&self) -> u64 {
        self.inner.written.load(Ordering::Acquire)
    }

    pub fn records_submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    /// Records accepted but not yet written
    pub fn backlog(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.inner.signal.lock().phase, Phase::Failed(_))
    }
}

impl<T> Drop for AsyncSink<T> {
    fn drop(&mut self) {
        self.close();
        if let Err(e) = self.join() {
            debug!(sink = %self.inner.name, "sink dropped with error: {}", e);
        }
    }
}

fn consume<T, D: Destination<T>>(
    inner: Arc<Inner<T>>,
    mut destination: D,
) -> Result<SinkSummary, SinkError> {
    let span = info_span!("sink", name = %inner.name);
    let _entered = span.enter();
    let started = Instant::now();

    loop {
        let (stopping, flush_requested) = {
            let mut signal = inner.signal.lock();
            while inner.queue.is_empty() && !signal.stopping && !signal.flush_requested {
                signal.waiting = true;
                // timed wait re-checks the queue if a wake-up is ever missed
                inner.wake.wait_for(&mut signal, Duration::from_millis(100));
                signal.waiting = false;
            }
            (
                signal.stopping,
                std::mem::take(&mut signal.flush_requested),
            )
        };

        let drained = drain(&inner, &mut destination).and_then(|()| {
            if flush_requested {
                guarded(&inner.name, || destination.flush())
            } else {
                Ok(())
            }
        });
        if let Err(e) = drained {
            return Err(fail(&inner, &mut destination, e));
        }

        if stopping {
            // producers are rejected once stopping is set, so an empty queue
            // seen under the lock stays empty
            let signal = inner.signal.lock();
            if !inner.queue.is_empty() {
                continue;
            }
            drop(signal);

            if let Err(e) = guarded(&inner.name, || destination.close()) {
                inner.signal.lock().phase = Phase::Failed(e.to_string());
                error!("closing destination failed: {}", e);
                return Err(e);
            }
            inner.signal.lock().phase = Phase::Closed;

            let summary = SinkSummary {
                name: inner.name.clone(),
                destination: inner.destination.clone(),
                records_written: inner.written.load(Ordering::Acquire),
                batches: inner.batches.load(Ordering::Relaxed),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            info!(
                records = summary.records_written,
                batches = summary.batches,
                destination = %summary.destination,
                "sink closed"
            );
            return Ok(summary);
        }
    }
}

fn drain<T, D: Destination<T>>(inner: &Inner<T>, destination: &mut D) -> Result<(), SinkError> {
    loop {
        let mut batch = Vec::with_capacity(inner.queue.len().min(inner.batch_limit));
        while batch.len() < inner.batch_limit {
            match inner.queue.pop() {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len() as u64;
        guarded(&inner.name, || destination.write_batch(batch))?;
        inner.written.fetch_add(count, Ordering::AcqRel);
        inner.batches.fetch_add(1, Ordering::Relaxed);
    }
}

fn fail<T, D: Destination<T>>(inner: &Inner<T>, destination: &mut D, err: SinkError) -> SinkError {
    let discarded = {
        let mut signal = inner.signal.lock();
        signal.phase = Phase::Failed(err.to_string());
        signal.stopping = true;
        let mut discarded = 0usize;
        while inner.queue.pop().is_some() {
            discarded += 1;
        }
        discarded
    };
    error!(discarded, "sink failed: {}", err);

    if let Err(e) = guarded(&inner.name, || destination.close()) {
        debug!("close after failure: {}", e);
    }
    err
}

/// Run a destination call, turning errors and panics into a write failure
fn guarded<R>(sink: &str, call: impl FnOnce() -> anyhow::Result<R>) -> Result<R, SinkError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SinkError::write(sink, format!("{:#}", e))),
        Err(payload) => Err(SinkError::write(
            sink,
            format!("destination panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

/// Typed sink accepting whole batches of records
///
/// Lets export code target either backend without knowing how records are
/// encoded.
pub trait RecordSink<R>: Send + Sync {
    fn name(&self) -> &str;

    fn submit_records(&self, records: Vec<R>) -> Result<usize, SinkError>;

    fn flush(&self);

    fn close(&self);

    fn join(&self) -> Result<SinkSummary, SinkError>;

    fn report(&self) -> String;

    fn records_written(&self) -> u64;
}
