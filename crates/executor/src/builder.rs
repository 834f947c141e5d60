//! Assemble the operator pipeline for one SELECT statement.

use crate::{
    AggregateExec, Executor, FilterExec, LimitExec, PkLookupExec, ScanExec, SortExec, pk_eq_key,
};
use catalog::TableSchema;
use common::{DbError, DbResult};
use parser::{Projection, SelectStmt};

/// Plans are one statement deep: scan-or-lookup, filter, then aggregation
/// or sort and limit.
pub fn build_select(stmt: &SelectStmt, schema: &TableSchema) -> DbResult<Box<dyn Executor>> {
    let columns = schema.column_names();
    let types = schema.column_types();

    // An equality comparison on the INTEGER PRIMARY KEY is answered by a
    // point lookup, consuming the predicate.
    let mut selection = stmt.selection.as_ref();
    let mut pipeline: Box<dyn Executor> = match pk_eq_key(selection, schema) {
        Some(key) => {
            selection = None;
            Box::new(PkLookupExec::new(schema.root_page, key, columns.clone()))
        }
        None => Box::new(ScanExec::new(schema.root_page, columns.clone())),
    };

    if let Some(predicate) = selection {
        pipeline = Box::new(FilterExec::new(
            pipeline,
            predicate.resolve(&columns, &types)?,
        ));
    }

    match &stmt.projection {
        Projection::All => {
            if let Some(order) = &stmt.order_by {
                let column_idx = columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(&order.column))
                    .ok_or_else(|| {
                        DbError::Schema(format!("unknown column '{}'", order.column))
                    })?;
                pipeline = Box::new(SortExec::new(pipeline, column_idx, order.direction));
            }
        }
        Projection::Aggregate(aggregate) => {
            if stmt.order_by.is_some() {
                return Err(DbError::Schema(
                    "ORDER BY cannot be combined with an aggregate".into(),
                ));
            }
            pipeline = Box::new(AggregateExec::try_new(
                pipeline, aggregate, &columns, &types,
            )?);
        }
    }

    if let Some(limit) = stmt.limit {
        pipeline = Box::new(LimitExec::new(pipeline, limit));
    }

    Ok(pipeline)
}
