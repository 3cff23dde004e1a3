// src/export/table_store.rs
//! SQLite table backend
//!
//! The consumer thread owns the connection. Each drain cycle opens a
//! transaction and a prepared insert, writes one row per record, commits and
//! drops both; nothing is held open between cycles.

use crate::export::line_file::{replace_destination, sink_name};
use crate::export::record::{self, Record};
use crate::export::sink::{AsyncSink, Destination, RecordSink, SinkSummary};
use crate::utils::errors::{SetupError, SinkError};
use anyhow::Context;
use rusqlite::{params_from_iter, Connection};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

struct TableStore<R> {
    path: PathBuf,
    table: String,
    insert: String,
    conn: Option<Connection>,
    _record: PhantomData<fn(R)>,
}

impl<R: Record> Destination<R> for TableStore<R> {
    fn write_batch(&mut self, batch: Vec<R>) -> anyhow::Result<()> {
        let conn = self.conn.as_mut().context("database already closed")?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(&self.insert)?;
            for row in &batch {
                let values = record::values(row)
                    .into_iter()
                    .map(rusqlite::types::Value::from);
                insert
                    .execute(params_from_iter(values))
                    .with_context(|| format!("insert into {}", self.table))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}#{}", self.path.display(), self.table)
    }
}

/// Create a fresh database at `path` with a table for `R`
///
/// `batch_hint` caps the rows committed per transaction.
pub fn setup<R: Record>(
    path: impl AsRef<Path>,
    table: &str,
    batch_hint: usize,
) -> Result<TableSink<R>, SetupError> {
    let path = path.as_ref();
    replace_destination(path)?;

    let conn = Connection::open(path).map_err(|e| SetupError::new(path, e))?;
    conn.execute(&record::create_table_sql::<R>(table), [])
        .map_err(|e| SetupError::new(path, e))?;

    let destination = TableStore::<R> {
        path: path.to_path_buf(),
        table: table.to_string(),
        insert: record::insert_sql::<R>(table),
        conn: Some(conn),
        _record: PhantomData,
    };
    let sink = AsyncSink::with_batch_limit(sink_name(path), destination, batch_hint)
        .map_err(|e| SetupError::new(path, e))?;
    debug!(path = %path.display(), table, "table sink ready");

    Ok(TableSink { sink })
}

/// Table sink for records of type `R`
pub struct TableSink<R> {
    sink: AsyncSink<R>,
}

impl<R: Record> TableSink<R> {
    pub fn submit(&self, record: R) -> Result<(), SinkError> {
        self.sink.submit(record)
    }

    pub fn submit_all(&self, records: impl IntoIterator<Item = R>) -> Result<usize, SinkError> {
        self.sink.submit_all(records)
    }

    pub fn inner(&self) -> &AsyncSink<R> {
        &self.sink
    }
}

impl<R: Record> RecordSink<R> for TableSink<R> {
    fn name(&self) -> &str {
        self.sink.name()
    }

    fn submit_records(&self, records: Vec<R>) -> Result<usize, SinkError> {
        self.sink.submit_all(records)
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
