// src/export/line_file.rs
//! Line-oriented CSV backend
//!
//! Records are formatted by the producer, so the consumer thread only copies
//! bytes into a buffered file. Batches at or above the parallel threshold are
//! formatted on scoped threads before submission.

use crate::export::record::{self, Record};
use crate::export::sink::{AsyncSink, Destination, RecordSink, SinkSummary};
use crate::runtime::collection::parallel_map;
use crate::utils::errors::{SetupError, SinkError};
use anyhow::Context;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Buffered file owned by the consumer thread
struct LineFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl Destination<String> for LineFile {
    fn write_batch(&mut self, batch: Vec<String>) -> anyhow::Result<()> {
        let writer = self.writer.as_mut().context("file already closed")?;
        for line in batch {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("flushing {}", self.path.display()))?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Create `path` fresh, write the header of `R` and start the consumer
///
/// Any existing file at `path` is removed first; missing parent directories
/// are created.
pub fn setup<R: Record + Sync>(
    path: impl AsRef<Path>,
    buffer_hint: usize,
) -> Result<LineSink<R>, SetupError> {
    let path = path.as_ref();
    replace_destination(path)?;

    let file = File::create(path).map_err(|e| SetupError::new(path, e))?;
    let mut writer = BufWriter::with_capacity(buffer_hint.max(1), file);
    writer
        .write_all(record::header::<R>().as_bytes())
        .and_then(|()| writer.write_all(b"\n"))
        .map_err(|e| SetupError::new(path, e))?;

    let name = sink_name(path);
    let destination = LineFile {
        path: path.to_path_buf(),
        writer: Some(writer),
    };
    let sink = AsyncSink::start(name, destination).map_err(|e| SetupError::new(path, e))?;
    debug!(path = %path.display(), "line sink ready");

    Ok(LineSink {
        sink,
        parallel_threshold: usize::MAX,
        _record: PhantomData,
    })
}

/// Remove a stale destination and make sure its directory exists
pub(crate) fn replace_destination(path: &Path) -> Result<(), SetupError> {
    if path.is_dir() {
        return Err(SetupError::new(path, "destination is a directory"));
    }
    if path.exists() {
        fs::remove_file(path).map_err(|e| SetupError::new(path, e))?;
        debug!(path = %path.display(), "removed stale destination");
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SetupError::new(path, e))?;
    }
    Ok(())
}

pub(crate) fn sink_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// CSV sink for records of type `R`
pub struct LineSink<R> {
    sink: AsyncSink<String>,
    parallel_threshold: usize,
    _record: PhantomData<fn(&R)>,
}

impl<R: Record + Sync> LineSink<R> {
    /// Format batches of at least `threshold` records in parallel
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    pub fn submit(&self, record: &R) -> Result<(), SinkError> {
        self.sink.submit(record::to_line(record))
    }

    /// Format and enqueue a batch, keeping its order
    pub fn submit_all(&self, records: &[R]) -> Result<usize, SinkError> {
        if records.len() >= self.parallel_threshold {
            self.sink.submit_all(parallel_map(records, record::to_line))
        } else {
            self.sink.submit_all(records.iter().map(record::to_line))
        }
    }

    /// The underlying untyped sink
    pub fn inner(&self) -> &AsyncSink<String> {
        &self.sink
    }
}

impl<R: Record + Sync> RecordSink<R> for LineSink<R> {
    fn name(&self) -> &str {
        self.sink.name()
    }

    fn submit_records(&self, records: Vec<R>) -> Result<usize, SinkError> {
        self.submit_all(&records)
    }

    fn flush(&self) {
        self.sink.flush()
    }

    fn close(&self) {
        self.sink.close()
    }

    fn join(&self) -> Result<SinkSummary, SinkError> {
        self.sink.join()
    }

    fn report(&self) -> String {
        self.sink.report()
    }

    fn records_written(&self) -> u64 {
        self.sink.records_written()
    }
}
