//! Filter operator: passes through rows matching the WHERE predicate.

use crate::{ExecutionContext, Executor};
use common::{DbResult, Row};
use expr::ResolvedPredicate;

pub struct FilterExec {
    input: Box<dyn Executor>,
    predicate: ResolvedPredicate,
}

impl FilterExec {
    pub fn new(input: Box<dyn Executor>, predicate: ResolvedPredicate) -> Self {
        Self { input, predicate }
    }
}

impl Executor for FilterExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        while let Some(row) = self.input.next(ctx)? {
            if self.predicate.matches(&row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}
