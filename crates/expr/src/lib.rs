//! WHERE predicates: a single `column OP literal` comparison.


use common::{DbError, DbResult, Row};
use std::cmp::Ordering;
use types::{SqlType, Value};

/// Comparison operators accepted in a WHERE clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Unresolved predicate as parsed: the column is still a name.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    /// Bind the column name to an ordinal and type-check the literal
    /// against the column's declared type.
    pub fn resolve(&self, columns: &[String], types: &[SqlType]) -> DbResult<ResolvedPredicate> {
        let column_idx = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&self.column))
            .ok_or_else(|| DbError::Schema(format!("unknown column '{}'", self.column)))?;

        if !self.value.matches_type(types[column_idx]) {
            return Err(DbError::Schema(format!(
                "cannot compare column '{}' of type {} with {}",
                self.column,
                types[column_idx],
                common::pretty::format_value(&self.value)
            )));
        }

        Ok(ResolvedPredicate {
            column_idx,
            op: self.op,
            value: self.value.clone(),
        })
    }
}

/// Predicate bound to a column ordinal, ready to evaluate per row.
#[derive(Clone, Debug)]
pub struct ResolvedPredicate {
    pub column_idx: usize,
    pub op: CompareOp,
    pub value: Value,
}

impl ResolvedPredicate {
    /// Comparisons are same-type and byte-wise for text and blob values.
    /// A NULL on either side never matches.
    pub fn matches(&self, row: &Row) -> bool {
        let Some(cell) = row.values.get(self.column_idx) else {
            return false;
        };
        match cell.cmp_same_type(&self.value) {
            Some(ord) => self.op.matches(ord),
            None => false,
        }
    }
}
