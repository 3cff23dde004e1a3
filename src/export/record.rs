// src/export/record.rs
//! Statically declared record schemas
//!
//! Each exported type lists its columns once, as an ordered slice of
//! [`Field`]s. CSV headers and lines, `CREATE TABLE` and `INSERT` statements
//! are all derived from that slice.
//!
//! ```ignore
//! impl Record for Summary {
//!     const SCHEMA: &'static [Field<Self>] = &[
//!         Field { name: "tick", column: ColumnType::Integer, read: |s| Value::Int(s.tick as i64) },
//!         Field { name: "infected", column: ColumnType::Integer, read: |s| Value::Int(s.infected as i64) },
//!     ];
//! }
//! ```

use std::fmt::Write as _;

/// Storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl Value {
    fn write_csv(&self, out: &mut String) {
        match self {
            Value::Int(v) => {
                let _ = write!(out, "{}", v);
            }
            Value::Float(v) => {
                let _ = write!(out, "{}", v);
            }
            Value::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            Value::Text(v) => push_quoted(out, v),
            Value::Null => {}
        }
    }
}

impl From<Value> for rusqlite::types::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(v) => rusqlite::types::Value::Integer(v),
            Value::Float(v) => rusqlite::types::Value::Real(v),
            Value::Text(v) => rusqlite::types::Value::Text(v),
            Value::Bool(v) => rusqlite::types::Value::Integer(i64::from(v)),
            Value::Null => rusqlite::types::Value::Null,
        }
    }
}

/// Column name, type and accessor
pub struct Field<R> {
    pub name: &'static str,
    pub column: ColumnType,
    pub read: fn(&R) -> Value,
}

/// A type with a fixed, ordered column layout
pub trait Record: Sized + Send + 'static {
    const SCHEMA: &'static [Field<Self>];
}

/// Comma-separated column names
pub fn header<R: Record>() -> String {
    let mut out = String::new();
    for (i, field) in R::SCHEMA.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_quoted(&mut out, field.name);
    }
    out
}

/// One CSV line, without the trailing newline
pub fn to_line<R: Record>(record: &R) -> String {
    let mut out = String::with_capacity(R::SCHEMA.len() * 8);
    for (i, field) in R::SCHEMA.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        (field.read)(record).write_csv(&mut out);
    }
    out
}

/// Cell values in column order
pub fn values<R: Record>(record: &R) -> Vec<Value> {
    R::SCHEMA.iter().map(|field| (field.read)(record)).collect()
}

pub fn create_table_sql<R: Record>(table: &str) -> String {
    let columns: Vec<String> = R::SCHEMA
        .iter()
        .map(|field| format!("{} {}", quote_ident(field.name), field.column.sql()))
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote_ident(table),
        columns.join(", ")
    )
}

pub fn insert_sql<R: Record>(table: &str) -> String {
    let columns: Vec<String> = R::SCHEMA.iter().map(|f| quote_ident(f.name)).collect();
    let placeholders: Vec<String> = (1..=R::SCHEMA.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// RFC 4180 quoting: only when the text needs it
fn push_quoted(out: &mut String, text: &str) {
    if text.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&text.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(text);
    }
}
