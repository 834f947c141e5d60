//! Limit operator: stops after N rows.

use crate::{ExecutionContext, Executor};
use common::{DbResult, Row};

pub struct LimitExec {
    input: Box<dyn Executor>,
    limit: u64,
    produced: u64,
}

impl LimitExec {
    pub fn new(input: Box<dyn Executor>, limit: u64) -> Self {
        Self {
            input,
            limit,
            produced: 0,
        }
    }
}

impl Executor for LimitExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.produced = 0;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.produced >= self.limit {
            return Ok(None);
        }
        match self.input.next(ctx)? {
            Some(row) => {
                self.produced += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}
