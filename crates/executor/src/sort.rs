//! Sort operator: materializes its input and yields rows in order.

use crate::{ExecutionContext, Executor};
use common::{DbError, DbResult, Row};
use parser::SortDirection;
use std::cmp::Ordering;
use types::Value;

/// Upper bound on rows buffered for ORDER BY.
pub const SORT_ROW_CAP: usize = 10_000;

/// Blocking operator: consumes the whole input on the first `next` call,
/// sorts it stably by one column, then streams the result.
pub struct SortExec {
    input: Box<dyn Executor>,
    column_idx: usize,
    direction: SortDirection,
    sorted: Option<Vec<Row>>,
    at: usize,
}

impl SortExec {
    pub fn new(input: Box<dyn Executor>, column_idx: usize, direction: SortDirection) -> Self {
        Self {
            input,
            column_idx,
            direction,
            sorted: None,
            at: 0,
        }
    }

    fn materialize(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let mut rows = Vec::new();
        while let Some(row) = self.input.next(ctx)? {
            if rows.len() >= SORT_ROW_CAP {
                return Err(DbError::Resource(format!(
                    "ORDER BY buffers at most {SORT_ROW_CAP} rows"
                )));
            }
            rows.push(row);
        }

        let column_idx = self.column_idx;
        let direction = self.direction;
        rows.sort_by(|a, b| {
            let ord = compare_cells(a.values.get(column_idx), b.values.get(column_idx));
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        self.sorted = Some(rows);
        self.at = 0;
        Ok(())
    }
}

impl Executor for SortExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.sorted = None;
        self.at = 0;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.sorted.is_none() {
            self.materialize(ctx)?;
        }
        let Some(rows) = self.sorted.as_ref() else {
            return Ok(None);
        };
        if self.at < rows.len() {
            let row = rows[self.at].clone();
            self.at += 1;
            Ok(Some(row))
        } else {
            Ok(None)
        }
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.sorted = None;
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}

/// Total order for sorting: NULL first, then by value within a type,
/// byte-wise for text and blob. Mixed types order by type rank so the sort
/// is total even on loosely typed rows.
fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match a.cmp_same_type(b) {
        Some(ord) => ord,
        None => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
    }
}
