//! Table access operators: full scan and primary-key point lookup.

use crate::{ExecutionContext, Executor};
use btree::{BTree, Cursor};
use common::{DbResult, PageId, Row};

/// Full-table scan: a forward cursor over the data tree, fetching and
/// decoding each row page.
pub struct ScanExec {
    root: PageId,
    columns: Vec<String>,
    cursor: Option<Cursor>,
}

impl ScanExec {
    pub fn new(root: PageId, columns: Vec<String>) -> Self {
        Self {
            root,
            columns,
            cursor: None,
        }
    }
}

impl Executor for ScanExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.cursor = Some(BTree::open(ctx.cache, self.root).cursor_first()?);
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        match cursor.next_entry(ctx.cache)? {
            Some((_, row_page)) => Ok(Some(ctx.fetch_row(row_page)?)),
            None => Ok(None),
        }
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.cursor = None;
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.columns
    }
}

/// Point lookup for `WHERE pk = constant`: at most one row, straight from
/// a tree search.
pub struct PkLookupExec {
    root: PageId,
    key: i32,
    columns: Vec<String>,
    done: bool,
}

impl PkLookupExec {
    pub fn new(root: PageId, key: i32, columns: Vec<String>) -> Self {
        Self {
            root,
            key,
            columns,
            done: false,
        }
    }
}

impl Executor for PkLookupExec {
    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.done = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        match BTree::open(ctx.cache, self.root).search(self.key)? {
            Some(row_page) => Ok(Some(ctx.fetch_row(row_page)?)),
            None => Ok(None),
        }
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.columns
    }
}
