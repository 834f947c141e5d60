use super::*;
use buffer::PageCache;
use catalog::{Catalog, ColumnDef};
use expr::{CompareOp, Predicate};
use parser::{Aggregate, OrderBy, Projection, SortDirection};
use pretty_assertions::assert_eq;
use storage::Pager;
use tempfile::{TempDir, tempdir};
use types::SqlType;
use types::Value::{Blob, Int, Null, Text};
use wal::Wal;

fn open_cache(dir: &TempDir) -> PageCache {
    let pager = Pager::open(&dir.path().join("db.minisql")).unwrap();
    let wal = Wal::open(dir.path().join("db.minisql.wal")).unwrap();
    let cache = PageCache::new(pager, wal, 32);
    cache.recover().unwrap();
    cache.begin_txn(1).unwrap();
    cache
}

/// `t (id INTEGER PRIMARY KEY, n TEXT, p INTEGER)`
fn create_test_table(cache: &PageCache) {
    let mut schema = catalog::TableSchema::try_new(
        "t",
        vec![
            ColumnDef::new("id", SqlType::Int, true),
            ColumnDef::new("n", SqlType::Text, false),
            ColumnDef::new("p", SqlType::Int, false),
        ],
    )
    .unwrap();
    let tree = btree::BTree::create(cache).unwrap();
    schema.root_page = tree.root_page;
    Catalog::new(cache).create_table(schema).unwrap();
}

fn select_stmt(
    projection: Projection,
    selection: Option<Predicate>,
    order_by: Option<OrderBy>,
    limit: Option<u64>,
) -> parser::SelectStmt {
    parser::SelectStmt {
        projection,
        table: "t".into(),
        selection,
        order_by,
        limit,
    }
}

fn run_select(ctx: &mut ExecutionContext, stmt: &parser::SelectStmt) -> Vec<Vec<types::Value>> {
    select(ctx, stmt)
        .unwrap()
        .rows
        .into_iter()
        .map(|r| r.values)
        .collect()
}

#[test]
fn scan_of_empty_table_yields_nothing() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    let stmt = select_stmt(Projection::All, None, None, None);
    let batch = select(&mut ctx, &stmt).unwrap();
    assert_eq!(batch.columns, vec!["id", "n", "p"]);
    assert!(batch.rows.is_empty());
}

#[test]
fn insert_then_scan_in_key_order() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    for (id, n) in [(2, "b"), (1, "a"), (3, "c")] {
        insert(&mut ctx, "t", &[Int(id), Text(n.into()), Null]).unwrap();
    }

    let rows = run_select(&mut ctx, &select_stmt(Projection::All, None, None, None));
    assert_eq!(
        rows,
        vec![
            vec![Int(1), Text("a".into()), Null],
            vec![Int(2), Text("b".into()), Null],
            vec![Int(3), Text("c".into()), Null],
        ]
    );
}

#[test]
fn where_filters_rows() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    for id in 1..=9 {
        insert(&mut ctx, "t", &[Int(id), Text("x".into()), Int(id * 10)]).unwrap();
    }

    let stmt = select_stmt(
        Projection::All,
        Some(Predicate::new("p", CompareOp::Gt, Int(60))),
        None,
        None,
    );
    let rows = run_select(&mut ctx, &stmt);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], Int(7));
}

#[test]
fn pk_equality_uses_point_lookup() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    for id in 1..=100 {
        insert(&mut ctx, "t", &[Int(id), Text(format!("row{id}")), Null]).unwrap();
    }

    let (_, schema) = ctx.catalog().require("t").unwrap();
    let stmt = select_stmt(
        Projection::All,
        Some(Predicate::new("id", CompareOp::Eq, Int(42))),
        None,
        None,
    );
    // The builder must pick the point-lookup operator for this shape.
    assert_eq!(pk_eq_key(stmt.selection.as_ref(), &schema), Some(42));

    let rows = run_select(&mut ctx, &stmt);
    assert_eq!(rows, vec![vec![Int(42), Text("row42".into()), Null]]);

    // Missing key: empty result, not an error.
    let stmt = select_stmt(
        Projection::All,
        Some(Predicate::new("id", CompareOp::Eq, Int(4242))),
        None,
        None,
    );
    assert!(run_select(&mut ctx, &stmt).is_empty());
}

#[test]
fn order_by_desc_with_limit() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    for (id, n) in [(1, "a"), (2, "b"), (3, "c")] {
        insert(&mut ctx, "t", &[Int(id), Text(n.into()), Null]).unwrap();
    }

    let stmt = select_stmt(
        Projection::All,
        None,
        Some(OrderBy {
            column: "id".into(),
            direction: SortDirection::Desc,
        }),
        Some(2),
    );
    let rows = run_select(&mut ctx, &stmt);
    assert_eq!(
        rows,
        vec![
            vec![Int(3), Text("c".into()), Null],
            vec![Int(2), Text("b".into()), Null],
        ]
    );
}

#[test]
fn aggregates_skip_nulls_and_divide_by_non_null_count() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    // p ∈ {10, 20, 30, NULL, 40}
    for (id, p) in [(1, Int(10)), (2, Int(20)), (3, Int(30)), (4, Null), (5, Int(40))] {
        insert(&mut ctx, "t", &[Int(id), Text("x".into()), p]).unwrap();
    }

    let agg = |a: Aggregate| select_stmt(Projection::Aggregate(a), None, None, None);

    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::Sum("p".into()))),
        vec![vec![Int(100)]]
    );
    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::Avg("p".into()))),
        vec![vec![Int(25)]]
    );
    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::CountStar)),
        vec![vec![Int(5)]]
    );
    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::Count("p".into()))),
        vec![vec![Int(4)]]
    );
    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::Min("p".into()))),
        vec![vec![Int(10)]]
    );
    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::Max("p".into()))),
        vec![vec![Int(40)]]
    );
}

#[test]
fn aggregates_over_empty_input() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    let agg = |a: Aggregate| select_stmt(Projection::Aggregate(a), None, None, None);
    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::CountStar)),
        vec![vec![Int(0)]]
    );
    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::Sum("p".into()))),
        vec![vec![Null]]
    );
    assert_eq!(
        run_select(&mut ctx, &agg(Aggregate::Min("p".into()))),
        vec![vec![Null]]
    );
}

#[test]
fn arithmetic_aggregates_require_integer_columns() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    let stmt = select_stmt(
        Projection::Aggregate(Aggregate::Sum("n".into())),
        None,
        None,
        None,
    );
    assert!(matches!(
        select(&mut ctx, &stmt),
        Err(common::DbError::Schema(_))
    ));
}

#[test]
fn duplicate_primary_key_preserves_original_row() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    insert(&mut ctx, "t", &[Int(1), Text("original".into()), Null]).unwrap();
    let err = insert(&mut ctx, "t", &[Int(1), Text("dup".into()), Null]).unwrap_err();
    assert!(matches!(err, common::DbError::Constraint(_)));

    let stmt = select_stmt(
        Projection::All,
        Some(Predicate::new("id", CompareOp::Eq, Int(1))),
        None,
        None,
    );
    let rows = run_select(&mut ctx, &stmt);
    assert_eq!(rows, vec![vec![Int(1), Text("original".into()), Null]]);

    let (_, schema) = ctx.catalog().require("t").unwrap();
    assert_eq!(schema.row_count, 1);
}

#[test]
fn insert_validation() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    // Wrong arity.
    assert!(matches!(
        insert(&mut ctx, "t", &[Int(1)]),
        Err(common::DbError::Schema(_))
    ));
    // Wrong type.
    assert!(matches!(
        insert(&mut ctx, "t", &[Text("x".into()), Text("y".into()), Null]),
        Err(common::DbError::Schema(_))
    ));
    // NULL primary key.
    assert!(matches!(
        insert(&mut ctx, "t", &[Null, Text("y".into()), Null]),
        Err(common::DbError::Constraint(_))
    ));
    // Unknown table.
    assert!(matches!(
        insert(&mut ctx, "missing", &[Int(1)]),
        Err(common::DbError::Schema(_))
    ));
}

#[test]
fn update_rewrites_matching_rows() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    for id in 1..=5 {
        insert(&mut ctx, "t", &[Int(id), Text("old".into()), Int(id)]).unwrap();
    }

    let pred = Predicate::new("p", CompareOp::Ge, Int(4));
    let count = update(&mut ctx, "t", "n", &Text("new".into()), Some(&pred)).unwrap();
    assert_eq!(count, 2);

    let rows = run_select(&mut ctx, &select_stmt(Projection::All, None, None, None));
    assert_eq!(rows[0][1], Text("old".into()));
    assert_eq!(rows[3][1], Text("new".into()));
    assert_eq!(rows[4][1], Text("new".into()));
}

#[test]
fn update_by_primary_key_is_direct() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    for id in 1..=5 {
        insert(&mut ctx, "t", &[Int(id), Text("old".into()), Null]).unwrap();
    }

    let pred = Predicate::new("id", CompareOp::Eq, Int(3));
    assert_eq!(
        update(&mut ctx, "t", "n", &Text("new".into()), Some(&pred)).unwrap(),
        1
    );

    // No match: zero rows, no error.
    let pred = Predicate::new("id", CompareOp::Eq, Int(99));
    assert_eq!(
        update(&mut ctx, "t", "n", &Text("new".into()), Some(&pred)).unwrap(),
        0
    );
}

#[test]
fn update_rejects_primary_key_column() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    insert(&mut ctx, "t", &[Int(1), Text("a".into()), Null]).unwrap();
    assert!(matches!(
        update(&mut ctx, "t", "id", &Int(9), None),
        Err(common::DbError::Constraint(_))
    ));
}

#[test]
fn delete_collects_then_deletes() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    for id in [5, 3, 7, 1, 9, 4, 6, 8, 2] {
        insert(&mut ctx, "t", &[Int(id), Text("x".into()), Null]).unwrap();
    }

    let pred = Predicate::new("id", CompareOp::Lt, Int(5));
    assert_eq!(delete(&mut ctx, "t", Some(&pred)).unwrap(), 4);

    let rows = run_select(&mut ctx, &select_stmt(Projection::All, None, None, None));
    let ids: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(ids, vec![Int(5), Int(6), Int(7), Int(8), Int(9)]);

    let (_, schema) = ctx.catalog().require("t").unwrap();
    assert_eq!(schema.row_count, 5);

    // Unconditional delete empties the table.
    assert_eq!(delete(&mut ctx, "t", None).unwrap(), 5);
    assert!(run_select(&mut ctx, &select_stmt(Projection::All, None, None, None)).is_empty());
}

#[test]
fn implicit_rowid_tables_autoincrement_from_one() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    let mut schema = catalog::TableSchema::try_new(
        "log",
        vec![ColumnDef::new("msg", SqlType::Text, false)],
    )
    .unwrap();
    let tree = btree::BTree::create(&cache).unwrap();
    schema.root_page = tree.root_page;
    Catalog::new(&cache).create_table(schema).unwrap();

    let mut ctx = ExecutionContext::new(&cache);
    for msg in ["first", "second", "third"] {
        insert(&mut ctx, "log", &[Text(msg.into())]).unwrap();
    }

    let (_, schema) = ctx.catalog().require("log").unwrap();
    assert_eq!(schema.next_rowid, 4);
    assert_eq!(schema.row_count, 3);

    // Scan order follows rowid assignment order.
    let stmt = parser::SelectStmt {
        projection: Projection::All,
        table: "log".into(),
        selection: None,
        order_by: None,
        limit: None,
    };
    let rows = run_select(&mut ctx, &stmt);
    assert_eq!(
        rows,
        vec![
            vec![Text("first".into())],
            vec![Text("second".into())],
            vec![Text("third".into())],
        ]
    );
}

#[test]
fn blob_round_trip_through_a_table() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    create_test_table(&cache);
    let mut ctx = ExecutionContext::new(&cache);

    // Large text payload, close to the page bound.
    let big = "y".repeat(3000);
    insert(&mut ctx, "t", &[Int(1), Text(big.clone()), Null]).unwrap();
    let rows = run_select(&mut ctx, &select_stmt(Projection::All, None, None, None));
    assert_eq!(rows[0][1], Text(big));

    // A row that no longer fits after mutation is rejected.
    let too_big = "z".repeat(5000);
    let err = update(&mut ctx, "t", "n", &Text(too_big), None).unwrap_err();
    assert!(matches!(err, common::DbError::Resource(_)));
}

#[test]
fn blob_values_store_and_compare() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    let mut schema = catalog::TableSchema::try_new(
        "bin",
        vec![
            ColumnDef::new("id", SqlType::Int, true),
            ColumnDef::new("body", SqlType::Blob, false),
        ],
    )
    .unwrap();
    let tree = btree::BTree::create(&cache).unwrap();
    schema.root_page = tree.root_page;
    Catalog::new(&cache).create_table(schema).unwrap();

    let mut ctx = ExecutionContext::new(&cache);
    insert(&mut ctx, "bin", &[Int(1), Blob(vec![1, 2, 3])]).unwrap();
    insert(&mut ctx, "bin", &[Int(2), Blob(vec![9])]).unwrap();

    let stmt = parser::SelectStmt {
        projection: Projection::All,
        table: "bin".into(),
        selection: Some(Predicate::new("body", CompareOp::Eq, Blob(vec![1, 2, 3]))),
        order_by: None,
        limit: None,
    };
    let rows = run_select(&mut ctx, &stmt);
    assert_eq!(rows, vec![vec![Int(1), Blob(vec![1, 2, 3])]]);
}
