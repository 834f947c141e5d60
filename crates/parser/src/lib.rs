//! SQL front end: maps `sqlparser` output onto the restricted statement AST.
//!
//! The accepted surface is deliberately small: CREATE/DROP TABLE, positional
//! single-row INSERT, SELECT of `*` or one aggregate with an optional
//! single-comparison WHERE, single-column ORDER BY and LIMIT, single-column
//! UPDATE, and DELETE. Anything beyond that parses at the SQL level but is
//! rejected here with a `Parse` error naming the construct. Keywords are
//! case-insensitive, string literals use `''` to escape a quote, and `--`
//! comments run to end of line, all courtesy of the tokenizer.

mod ast;

pub use ast::*;

use common::{DbError, DbResult};
use expr::{CompareOp, Predicate};
use sqlparser::ast as sqlast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use types::Value;

/// Parse SQL text into statements. Errors carry the tokenizer's location.
pub fn parse_sql(sql: &str) -> DbResult<Vec<Statement>> {
    let dialect = GenericDialect {};
    let stmts = SqlParser::parse_sql(&dialect, sql)
        .map_err(|e| DbError::Parse(format!("{e}")))?;

    stmts.into_iter().map(map_statement).collect()
}

fn map_statement(stmt: sqlast::Statement) -> DbResult<Statement> {
    use sqlast::Statement as SqlStatement;

    match stmt {
        SqlStatement::CreateTable {
            name,
            columns,
            constraints,
            ..
        } => {
            let table = normalize_object_name(&name)?;
            let table_pk = extract_table_level_pk(&constraints)?;

            let mut mapped_columns: Vec<ColumnSpec> = columns
                .into_iter()
                .map(|col| {
                    let primary_key = col.options.iter().any(|opt| {
                        matches!(
                            opt.option,
                            sqlast::ColumnOption::Unique {
                                is_primary: true,
                                ..
                            }
                        )
                    });
                    ColumnSpec {
                        name: normalize_ident(&col.name),
                        ty: col.data_type.to_string().to_uppercase(),
                        primary_key,
                    }
                })
                .collect();

            if let Some(pk_name) = table_pk {
                if mapped_columns.iter().any(|c| c.primary_key) {
                    return Err(DbError::Parse(
                        "PRIMARY KEY defined both inline and at table level".into(),
                    ));
                }
                let column = mapped_columns
                    .iter_mut()
                    .find(|c| c.name == pk_name)
                    .ok_or_else(|| {
                        DbError::Parse(format!("PRIMARY KEY names unknown column '{pk_name}'"))
                    })?;
                column.primary_key = true;
            }

            Ok(Statement::CreateTable {
                name: table,
                columns: mapped_columns,
            })
        }
        SqlStatement::Drop {
            object_type, names, ..
        } => match object_type {
            sqlast::ObjectType::Table => Ok(Statement::DropTable {
                name: first_name(names)?,
            }),
            other => Err(DbError::Parse(format!("unsupported DROP type: {other}"))),
        },
        SqlStatement::Insert {
            table_name, source, ..
        } => {
            let table = normalize_object_name(&table_name)?;
            let source = source.ok_or_else(|| DbError::Parse("INSERT source missing".into()))?;
            let values = extract_values(*source)?;
            Ok(Statement::Insert { table, values })
        }
        SqlStatement::Query(query) => map_select(*query),
        SqlStatement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            let table = table_name_from_with_joins(&table)?;
            if assignments.len() != 1 {
                return Err(DbError::Parse(
                    "UPDATE supports exactly one assignment".into(),
                ));
            }
            let assignment = assignments.into_iter().next().unwrap();
            let ident = assignment
                .id
                .last()
                .ok_or_else(|| DbError::Parse("invalid assignment target".into()))?;
            let selection = selection.map(map_predicate).transpose()?;
            Ok(Statement::Update {
                table,
                column: normalize_ident(ident),
                value: map_literal(assignment.value)?,
                selection,
            })
        }
        SqlStatement::Delete {
            from, selection, ..
        } => {
            if from.is_empty() {
                return Err(DbError::Parse("DELETE requires FROM source".into()));
            }
            if from.len() > 1 {
                return Err(DbError::Parse("multi-table DELETE not supported".into()));
            }
            let table = table_name_from_with_joins(&from[0])?;
            let selection = selection.map(map_predicate).transpose()?;
            Ok(Statement::Delete { table, selection })
        }
        _ => Err(DbError::Parse("unsupported statement".into())),
    }
}

fn map_select(query: sqlast::Query) -> DbResult<Statement> {
    use sqlast::SetExpr;

    let select = match *query.body {
        SetExpr::Select(select) => select,
        SetExpr::Values(_) => {
            return Err(DbError::Parse("standalone VALUES not supported".into()));
        }
        _ => return Err(DbError::Parse("SET operations not supported".into())),
    };

    let sqlast::Select {
        projection,
        from,
        selection,
        ..
    } = *select;

    if from.is_empty() {
        return Err(DbError::Parse("SELECT requires FROM clause".into()));
    }
    if from.len() > 1 {
        return Err(DbError::Parse("joins not supported".into()));
    }
    let table = table_name_from_with_joins(&from[0])?;

    let projection = map_projection(projection)?;
    let selection = selection.map(map_predicate).transpose()?;

    let mut order_by_iter = query.order_by.into_iter();
    let order_by = order_by_iter.next().map(map_order_by_expr).transpose()?;
    if order_by_iter.next().is_some() {
        return Err(DbError::Parse("ORDER BY supports a single column".into()));
    }

    if query.offset.is_some() {
        return Err(DbError::Parse("OFFSET not supported".into()));
    }

    let limit = query
        .limit
        .map(|expr| match expr {
            sqlast::Expr::Value(sqlast::Value::Number(n, _)) => n
                .parse::<u64>()
                .map_err(|_| DbError::Parse(format!("invalid LIMIT value: {n}"))),
            _ => Err(DbError::Parse(
                "LIMIT must be a non-negative integer".into(),
            )),
        })
        .transpose()?;

    Ok(Statement::Select(SelectStmt {
        projection,
        table,
        selection,
        order_by,
        limit,
    }))
}

/// The projection is either a lone `*` or a single aggregate call.
fn map_projection(items: Vec<sqlast::SelectItem>) -> DbResult<Projection> {
    if items.len() != 1 {
        return Err(DbError::Parse(
            "SELECT list must be * or a single aggregate".into(),
        ));
    }
    match items.into_iter().next().unwrap() {
        sqlast::SelectItem::Wildcard(_) => Ok(Projection::All),
        sqlast::SelectItem::UnnamedExpr(sqlast::Expr::Function(func)) => {
            Ok(Projection::Aggregate(map_aggregate(func)?))
        }
        other => Err(DbError::Parse(format!(
            "unsupported select item: {other}"
        ))),
    }
}

fn map_aggregate(func: sqlast::Function) -> DbResult<Aggregate> {
    let name = normalize_object_name(&func.name)?;
    if func.distinct {
        return Err(DbError::Parse("DISTINCT aggregates not supported".into()));
    }
    if func.args.len() != 1 {
        return Err(DbError::Parse(format!(
            "{} takes exactly one argument",
            name.to_uppercase()
        )));
    }

    let arg = func.args.into_iter().next().unwrap();
    let column = match arg {
        sqlast::FunctionArg::Unnamed(sqlast::FunctionArgExpr::Wildcard) => None,
        sqlast::FunctionArg::Unnamed(sqlast::FunctionArgExpr::Expr(expr)) => {
            Some(column_name(expr)?)
        }
        other => {
            return Err(DbError::Parse(format!(
                "unsupported aggregate argument: {other}"
            )));
        }
    };

    match (name.as_str(), column) {
        ("count", None) => Ok(Aggregate::CountStar),
        ("count", Some(col)) => Ok(Aggregate::Count(col)),
        ("sum", Some(col)) => Ok(Aggregate::Sum(col)),
        ("avg", Some(col)) => Ok(Aggregate::Avg(col)),
        ("min", Some(col)) => Ok(Aggregate::Min(col)),
        ("max", Some(col)) => Ok(Aggregate::Max(col)),
        (_, None) => Err(DbError::Parse(format!(
            "{} requires a column argument",
            name.to_uppercase()
        ))),
        _ => Err(DbError::Parse(format!("unsupported function '{name}'"))),
    }
}

fn map_order_by_expr(expr: sqlast::OrderByExpr) -> DbResult<OrderBy> {
    let column = column_name(expr.expr)?;
    let direction = match expr.asc {
        Some(false) => SortDirection::Desc,
        // Default direction is ascending.
        _ => SortDirection::Asc,
    };
    Ok(OrderBy { column, direction })
}

/// A WHERE clause is one `column OP literal` comparison.
fn map_predicate(expr: sqlast::Expr) -> DbResult<Predicate> {
    match expr {
        sqlast::Expr::Nested(inner) => map_predicate(*inner),
        sqlast::Expr::BinaryOp { left, op, right } => {
            let column = column_name(*left)?;
            let op = map_compare_op(op)?;
            let value = map_literal(*right)?;
            Ok(Predicate::new(column, op, value))
        }
        other => Err(DbError::Parse(format!(
            "WHERE must be a single comparison, got: {other}"
        ))),
    }
}

fn map_compare_op(op: sqlast::BinaryOperator) -> DbResult<CompareOp> {
    use sqlast::BinaryOperator as SqlBinary;

    Ok(match op {
        SqlBinary::Eq => CompareOp::Eq,
        SqlBinary::NotEq => CompareOp::Ne,
        SqlBinary::Lt => CompareOp::Lt,
        SqlBinary::LtEq => CompareOp::Le,
        SqlBinary::Gt => CompareOp::Gt,
        SqlBinary::GtEq => CompareOp::Ge,
        other => return Err(DbError::Parse(format!("unsupported operator: {other}"))),
    })
}

fn extract_values(query: sqlast::Query) -> DbResult<Vec<Value>> {
    match *query.body {
        sqlast::SetExpr::Values(values) => {
            let mut rows = values.rows.into_iter();
            let row = rows
                .next()
                .ok_or_else(|| DbError::Parse("INSERT requires at least one row".into()))?;
            if rows.next().is_some() {
                return Err(DbError::Parse("multi-row INSERT not supported".into()));
            }
            row.into_iter().map(map_literal).collect()
        }
        _ => Err(DbError::Parse("INSERT expects VALUES list".into())),
    }
}

/// Literals only: integers (optionally negated), single-quoted strings,
/// `x'..'` blobs, and NULL.
fn map_literal(expr: sqlast::Expr) -> DbResult<Value> {
    match expr {
        sqlast::Expr::Value(value) => map_value(value),
        sqlast::Expr::UnaryOp {
            op: sqlast::UnaryOperator::Minus,
            expr,
        } => match map_literal(*expr)? {
            Value::Int(v) => Ok(Value::Int(
                v.checked_neg()
                    .ok_or_else(|| DbError::Parse("integer literal out of range".into()))?,
            )),
            _ => Err(DbError::Parse("unary minus requires an integer".into())),
        },
        sqlast::Expr::Nested(inner) => map_literal(*inner),
        other => Err(DbError::Parse(format!(
            "expected a literal value, got: {other}"
        ))),
    }
}

fn map_value(value: sqlast::Value) -> DbResult<Value> {
    use sqlast::Value as SqlValue;

    match value {
        SqlValue::Number(num, _) => {
            let parsed = num
                .parse::<i32>()
                .map_err(|_| DbError::Parse(format!("invalid integer literal: {num}")))?;
            Ok(Value::Int(parsed))
        }
        SqlValue::SingleQuotedString(s) => Ok(Value::Text(s)),
        SqlValue::HexStringLiteral(hex) => Ok(Value::Blob(decode_hex(&hex)?)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(DbError::Parse(format!("unsupported literal: {other}"))),
    }
}

fn decode_hex(hex: &str) -> DbResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(DbError::Parse("blob literal has odd length".into()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| DbError::Parse(format!("invalid blob literal: {hex}")))
        })
        .collect()
}

fn column_name(expr: sqlast::Expr) -> DbResult<String> {
    match expr {
        sqlast::Expr::Identifier(ident) => Ok(normalize_ident(&ident)),
        sqlast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(normalize_ident)
            .ok_or_else(|| DbError::Parse("invalid identifier".into())),
        other => Err(DbError::Parse(format!("expected a column name: {other}"))),
    }
}

fn normalize_ident(ident: &sqlast::Ident) -> String {
    ident.value.to_lowercase()
}

fn normalize_object_name(name: &sqlast::ObjectName) -> DbResult<String> {
    name.0
        .first()
        .map(|ident| ident.value.to_lowercase())
        .ok_or_else(|| DbError::Parse("invalid object name".into()))
}

fn first_name(mut names: Vec<sqlast::ObjectName>) -> DbResult<String> {
    if names.is_empty() {
        return Err(DbError::Parse("DROP requires a target".into()));
    }
    normalize_object_name(&names.remove(0))
}

fn table_name_from_with_joins(table: &sqlast::TableWithJoins) -> DbResult<String> {
    if !table.joins.is_empty() {
        return Err(DbError::Parse("joins not supported".into()));
    }
    match &table.relation {
        sqlast::TableFactor::Table { name, .. } => normalize_object_name(name),
        _ => Err(DbError::Parse("unsupported table factor".into())),
    }
}

/// A table-level `PRIMARY KEY (col)` constraint; composite keys are
/// rejected.
fn extract_table_level_pk(constraints: &[sqlast::TableConstraint]) -> DbResult<Option<String>> {
    use sqlast::TableConstraint;

    for constraint in constraints {
        if let TableConstraint::Unique {
            columns,
            is_primary,
            ..
        } = constraint
        {
            if !*is_primary {
                continue;
            }
            if columns.len() != 1 {
                return Err(DbError::Parse(
                    "composite PRIMARY KEY not supported".into(),
                ));
            }
            return Ok(Some(normalize_ident(&columns[0])));
        }
    }
    Ok(None)
}
