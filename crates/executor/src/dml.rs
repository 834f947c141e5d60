//! DML entry points: insert, update, delete.
//!
//! These drive the core directly rather than running through the operator
//! pipeline, because they need the `(key, row page)` pairs the cursors
//! produce, not decoded rows alone. Each reports the affected-row count.

use crate::{ExecutionContext, pk_eq_key};
use btree::BTree;
use catalog::TableSchema;
use common::{DbError, DbResult};
use expr::Predicate;
use types::Value;

/// Insert one row. The key is the INTEGER PRIMARY KEY value, or the next
/// implicit rowid for tables without one. Duplicate keys are a constraint
/// violation and leave the stored row untouched.
pub fn insert(ctx: &mut ExecutionContext, table: &str, values: &[Value]) -> DbResult<u64> {
    let catalog = ctx.catalog();
    let (schema_page, mut schema) = catalog.require(table)?;

    check_arity_and_types(&schema, values)?;

    let key = if schema.has_int_pk() {
        match &values[schema.pk_column as usize] {
            Value::Int(key) => *key,
            Value::Null => {
                return Err(DbError::Constraint(format!(
                    "PRIMARY KEY of '{table}' may not be NULL"
                )));
            }
            _ => unreachable!("type check admits only integers into the key column"),
        }
    } else {
        let key = schema.next_rowid;
        schema.next_rowid = key.checked_add(1).ok_or_else(|| {
            DbError::Resource(format!("rowid counter of '{table}' exhausted"))
        })?;
        key
    };

    let mut tree = BTree::open(ctx.cache, schema.root_page);
    if schema.has_int_pk() && tree.search(key)?.is_some() {
        return Err(DbError::Constraint(format!(
            "duplicate primary key {key} in '{table}'"
        )));
    }

    let row_page = ctx.write_new_row(values)?;
    tree.insert(key, row_page)?;

    schema.root_page = tree.root_page;
    schema.row_count += 1;
    catalog.update(schema_page, &schema)?;
    Ok(1)
}

/// Update one column of every matching row, rewriting row pages in place.
/// The data tree is untouched, so a single pass is safe.
pub fn update(
    ctx: &mut ExecutionContext,
    table: &str,
    column: &str,
    value: &Value,
    selection: Option<&Predicate>,
) -> DbResult<u64> {
    let catalog = ctx.catalog();
    let (_, schema) = catalog.require(table)?;

    let column_idx = schema
        .column_index(column)
        .ok_or_else(|| DbError::Schema(format!("unknown column '{column}' in '{table}'")))?;
    if schema.pk_column == column_idx as i32 {
        return Err(DbError::Constraint(format!(
            "PRIMARY KEY column '{column}' cannot be updated"
        )));
    }
    if !value.matches_type(schema.columns[column_idx].ty) {
        return Err(DbError::Schema(format!(
            "type mismatch for column '{column}' in '{table}'"
        )));
    }

    let columns = schema.column_names();
    let types = schema.column_types();
    let tree = BTree::open(ctx.cache, schema.root_page);

    // PK-direct update: search instead of scanning.
    if let Some(key) = pk_eq_key(selection, &schema) {
        let Some(row_page) = tree.search(key)? else {
            return Ok(0);
        };
        let mut row = ctx.fetch_row(row_page)?;
        row.values[column_idx] = value.clone();
        ctx.write_row(row_page, &row.values)?;
        return Ok(1);
    }

    let resolved = selection
        .map(|p| p.resolve(&columns, &types))
        .transpose()?;

    let mut count = 0u64;
    let mut cursor = tree.cursor_first()?;
    while let Some((_, row_page)) = cursor.next_entry(ctx.cache)? {
        let mut row = ctx.fetch_row(row_page)?;
        if let Some(predicate) = &resolved {
            if !predicate.matches(&row) {
                continue;
            }
        }
        row.values[column_idx] = value.clone();
        ctx.write_row(row_page, &row.values)?;
        count += 1;
    }
    Ok(count)
}

/// Delete every matching row: collect the keys first, then delete, because
/// the cursor is not stable while the tree is mutated. Row pages leak.
pub fn delete(ctx: &mut ExecutionContext, table: &str, selection: Option<&Predicate>) -> DbResult<u64> {
    let catalog = ctx.catalog();
    let (schema_page, mut schema) = catalog.require(table)?;

    let columns = schema.column_names();
    let types = schema.column_types();
    let resolved = selection
        .map(|p| p.resolve(&columns, &types))
        .transpose()?;

    let mut tree = BTree::open(ctx.cache, schema.root_page);

    let mut victims = Vec::new();
    let mut cursor = tree.cursor_first()?;
    while let Some((key, row_page)) = cursor.next_entry(ctx.cache)? {
        let matched = match &resolved {
            Some(predicate) => {
                let row = ctx.fetch_row(row_page)?;
                predicate.matches(&row)
            }
            None => true,
        };
        if matched {
            victims.push(key);
        }
    }

    for key in &victims {
        tree.delete(*key)?;
    }

    if !victims.is_empty() {
        schema.root_page = tree.root_page;
        // The hint may be skewed after crash loss; never underflow it.
        schema.row_count = schema.row_count.saturating_sub(victims.len() as u64);
        catalog.update(schema_page, &schema)?;
    }
    Ok(victims.len() as u64)
}

fn check_arity_and_types(schema: &TableSchema, values: &[Value]) -> DbResult<()> {
    if values.len() != schema.columns.len() {
        return Err(DbError::Schema(format!(
            "table '{}' expects {} values, got {}",
            schema.name,
            schema.columns.len(),
            values.len()
        )));
    }
    for (value, column) in values.iter().zip(&schema.columns) {
        if !value.matches_type(column.ty) {
            return Err(DbError::Schema(format!(
                "type mismatch for column '{}' in '{}'",
                column.name, schema.name
            )));
        }
    }
    Ok(())
}
