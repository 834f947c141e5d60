//! Aggregate operator: one fold over the scan-filter pipeline.

use crate::{ExecutionContext, Executor};
use common::{DbError, DbResult, Row};
use parser::Aggregate;
use types::{SqlType, Value};

#[derive(Clone, Copy)]
enum AggKind {
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Consumes its whole input and produces a single-row, single-column
/// result. NULL cells are skipped; `COUNT(*)` counts rows regardless.
/// SUM, AVG, MIN, and MAX require an INTEGER column and yield NULL over an
/// empty input; AVG is integer division by the non-null count.
pub struct AggregateExec {
    input: Box<dyn Executor>,
    kind: AggKind,
    column_idx: Option<usize>,
    label: Vec<String>,
    done: bool,
}

impl AggregateExec {
    /// Resolve the aggregated column and check its type.
    pub fn try_new(
        input: Box<dyn Executor>,
        aggregate: &Aggregate,
        columns: &[String],
        types: &[SqlType],
    ) -> DbResult<Self> {
        let column_idx = match aggregate.column() {
            Some(name) => {
                let idx = columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(name))
                    .ok_or_else(|| DbError::Schema(format!("unknown column '{name}'")))?;
                Some(idx)
            }
            None => None,
        };

        let kind = match aggregate {
            Aggregate::CountStar => AggKind::CountStar,
            Aggregate::Count(_) => AggKind::Count,
            Aggregate::Sum(_) => AggKind::Sum,
            Aggregate::Avg(_) => AggKind::Avg,
            Aggregate::Min(_) => AggKind::Min,
            Aggregate::Max(_) => AggKind::Max,
        };

        if let Some(idx) = column_idx {
            if matches!(kind, AggKind::Sum | AggKind::Avg | AggKind::Min | AggKind::Max)
                && types[idx] != SqlType::Int
            {
                return Err(DbError::Schema(format!(
                    "{} requires an INTEGER column",
                    aggregate.label()
                )));
            }
        }

        Ok(Self {
            input,
            kind,
            column_idx,
            label: vec![aggregate.label()],
            done: false,
        })
    }

    fn fold(&mut self, ctx: &mut ExecutionContext) -> DbResult<Value> {
        let mut rows: u64 = 0;
        let mut non_null: u64 = 0;
        let mut sum: i64 = 0;
        let mut min: Option<i32> = None;
        let mut max: Option<i32> = None;

        while let Some(row) = self.input.next(ctx)? {
            rows += 1;
            let Some(idx) = self.column_idx else {
                continue;
            };
            let Some(cell) = row.values.get(idx) else {
                continue;
            };
            let Some(v) = cell.as_int() else {
                // NULLs are skipped. Non-integer cells cannot appear here:
                // the column type was checked at build time.
                continue;
            };
            non_null += 1;
            sum += i64::from(v);
            min = Some(min.map_or(v, |m| m.min(v)));
            max = Some(max.map_or(v, |m| m.max(v)));
        }

        Ok(match self.kind {
            AggKind::CountStar => Value::Int(int_result(rows as i64)?),
            AggKind::Count => Value::Int(int_result(non_null as i64)?),
            AggKind::Sum if non_null == 0 => Value::Null,
            AggKind::Sum => Value::Int(int_result(sum)?),
            AggKind::Avg if non_null == 0 => Value::Null,
            AggKind::Avg => Value::Int(int_result(sum / non_null as i64)?),
            AggKind::Min => min.map(Value::Int).unwrap_or(Value::Null),
            AggKind::Max => max.map(Value::Int).unwrap_or(Value::Null),
        })
    }
}

fn int_result(v: i64) -> DbResult<i32> {
    i32::try_from(v).map_err(|_| {
        DbError::Resource(format!("aggregate result {v} does not fit a 32-bit integer"))
    })
}

impl Executor for AggregateExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.done = false;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let value = self.fold(ctx)?;
        Ok(Some(Row::new(vec![value])))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        &self.label
    }
}
