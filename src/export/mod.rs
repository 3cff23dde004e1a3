// src/export/mod.rs
//! Record export
//!
//! - **Record**: statically declared column layouts
//! - **Sink**: write-behind queue drained by one consumer thread
//! - **Line file**: CSV backend, records formatted by producers
//! - **Table store**: SQLite backend, one transaction per drain cycle
//! - **Coordinator**: one sink per output kind under a run directory
//!
//! # Architecture
//!
//! ```text
//!  worker threads            consumer threads         destinations
//! ┌──────────────┐  submit  ┌────────────────┐
//! │ Simulation   │ ───────► │ AsyncSink      │ ────► run-001/summary.csv
//! │ Worker (run1)│ ───┐     └────────────────┘
//! └──────────────┘    │     ┌────────────────┐
//!                     └───► │ AsyncSink      │ ────► run-001/agents.sqlite
//!                           └────────────────┘
//! ```

pub mod coordinator;
pub mod line_file;
pub mod record;
pub mod sink;
pub mod table_store;

pub use coordinator::{ExportCoordinator, ExportCoordinatorBuilder, OutputScope};
pub use line_file::LineSink;
pub use record::{ColumnType, Field, Record, Value};
pub use sink::{AsyncSink, Destination, RecordSink, SinkSummary};
pub use table_store::TableSink;
