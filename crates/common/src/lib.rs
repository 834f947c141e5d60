#[cfg(test)]
mod tests;

pub mod pretty;

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use types::Value;

/// Identifier for a transaction. Monotonic; assigned by the facade from the
/// last committed id recorded in the database header.
pub type TxnId = u64;

/// A 1-based page number within the database file.
///
/// Page 0 is never a valid reference and doubles as the "no page" marker in
/// on-disk pointers (tree roots, sibling links, parent links).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    pub const NONE: PageId = PageId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Positional row representation backed by `types::Value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Rectangular result set carrying column labels and rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Canonical error type shared across database subsystems.
///
/// The variants mirror how failures surface to a caller: `Parse` for SQL the
/// front end rejects, `Schema` for name/type problems, `Constraint` for
/// violated row constraints, `Resource` for exhausted capacities, `Corruption`
/// for on-disk state that fails validation, and `Io` for the filesystem.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("parse: {0}")]
    Parse(String),
    #[error("schema: {0}")]
    Schema(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("resource exhausted: {0}")]
    Resource(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for an open database.
///
/// The page size is a compile-time constant of the file format, so the only
/// tunables are in-memory.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder().cache_pages(128).build();
/// assert_eq!(config.cache_pages, 128);
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct Config {
    /// Number of pages the cache keeps resident.
    #[builder(default = 64)]
    pub cache_pages: usize,
    /// Style used when rendering result tables.
    #[builder(default)]
    pub table_style: pretty::TableStyleKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_pages: 64,
            table_style: pretty::TableStyleKind::default(),
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, PageId, RecordBatch, Row, TxnId};
    pub use types::{SqlType, Value};
}
