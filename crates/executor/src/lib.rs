//! Statement execution over the storage core.
//!
//! SELECT statements run through a small pull-based operator pipeline: a
//! tree scan or primary-key lookup at the bottom, then filter, then either
//! an aggregate fold or sort and limit. The scan-filter inner loop exists
//! exactly once; every aggregate is a reduction over that same pipeline.
//! DML entry points drive the B+Tree and row pages directly and report
//! affected-row counts.
//!
//! Everything reaches disk through the shared [`PageCache`]; after any
//! mutation that can move a table's data root, the refreshed root is
//! written back to the schema record before the statement finishes.

mod aggregate;
mod builder;
mod dml;
mod filter;
mod limit;
mod scan;
mod sort;

#[cfg(test)]
mod tests;

pub use aggregate::AggregateExec;
pub use builder::build_select;
pub use dml::{delete, insert, update};
pub use filter::FilterExec;
pub use limit::LimitExec;
pub use scan::{PkLookupExec, ScanExec};
pub use sort::{SORT_ROW_CAP, SortExec};

use buffer::PageCache;
use catalog::{Catalog, TableSchema};
use common::{DbResult, PageId, RecordBatch, Row};
use expr::{CompareOp, Predicate};
use parser::SelectStmt;
use storage::{ROW_HEADER_BYTES, codec};
use types::Value;

/// Pull-based operator interface: initialize in `open`, produce rows from
/// `next`, release state in `close`.
pub trait Executor {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;

    /// Fetch the next row, or `None` when exhausted.
    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>>;

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;

    /// Column labels of the rows this operator produces.
    fn schema(&self) -> &[String];
}

/// Shared state handed to every operator: the page cache, which is the sole
/// path to pages, and through it the catalog.
pub struct ExecutionContext<'a> {
    pub cache: &'a PageCache,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(cache: &'a PageCache) -> Self {
        Self { cache }
    }

    pub fn catalog(&self) -> Catalog<'a> {
        Catalog::new(self.cache)
    }

    /// Load and decode the row stored on `page`.
    pub fn fetch_row(&self, page: PageId) -> DbResult<Row> {
        let guard = self.cache.get_page(page)?;
        let values = codec::decode_row(&guard.read()[ROW_HEADER_BYTES..])?;
        Ok(Row::new(values))
    }

    /// Serialize a row onto a freshly allocated page and return the page.
    pub fn write_new_row(&self, values: &[Value]) -> DbResult<PageId> {
        let bytes = codec::encode_row(values)?;
        let guard = self.cache.allocate_page()?;
        guard.write()[ROW_HEADER_BYTES..ROW_HEADER_BYTES + bytes.len()].copy_from_slice(&bytes);
        Ok(guard.page())
    }

    /// Rewrite the row on an existing page in place.
    pub fn write_row(&self, page: PageId, values: &[Value]) -> DbResult<()> {
        let bytes = codec::encode_row(values)?;
        let guard = self.cache.get_page(page)?;
        self.cache.mark_dirty(&guard)?;
        let mut data = guard.write();
        data.fill(0);
        data[ROW_HEADER_BYTES..ROW_HEADER_BYTES + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }
}

/// Execute a SELECT and collect the result rows.
pub fn select(ctx: &mut ExecutionContext, stmt: &SelectStmt) -> DbResult<RecordBatch> {
    let (_, schema) = ctx.catalog().require(&stmt.table)?;
    let mut executor = build_select(stmt, &schema)?;

    executor.open(ctx)?;
    let mut rows = Vec::new();
    while let Some(row) = executor.next(ctx)? {
        rows.push(row);
    }
    executor.close(ctx)?;

    Ok(RecordBatch {
        columns: executor.schema().to_vec(),
        rows,
    })
}

/// When the WHERE clause is `pk = <integer>` on the table's INTEGER PRIMARY
/// KEY, the comparison can be answered by a direct tree search.
pub(crate) fn pk_eq_key(selection: Option<&Predicate>, schema: &TableSchema) -> Option<i32> {
    let pred = selection?;
    if !schema.has_int_pk() {
        return None;
    }
    let pk_name = &schema.columns[schema.pk_column as usize].name;
    if pred.op == CompareOp::Eq && pred.column.eq_ignore_ascii_case(pk_name) {
        if let Value::Int(key) = pred.value {
            return Some(key);
        }
    }
    None
}
