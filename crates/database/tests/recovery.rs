//! Crash, abort, and recovery behavior: a transaction torn by process death
//! is rolled back on the next open, committed work survives, and recovery
//! is idempotent.

use buffer::PageCache;
use common::Config;
use database::{Database, QueryResult, wal_path};
use executor::ExecutionContext;
use expr::{CompareOp, Predicate};
use std::fs;
use std::path::{Path, PathBuf};
use storage::{PAGE_SIZE, Pager};
use tempfile::tempdir;
use types::Value::{Int, Text};
use wal::Wal;

fn open_db(path: &Path) -> Database {
    Database::open(path, &Config::default()).unwrap()
}

/// Open the storage stack without running recovery, the way a test
/// simulates work that dies before commit.
fn raw_cache(path: &Path) -> PageCache {
    let pager = Pager::open(path).unwrap();
    let wal = Wal::open(wal_path(path)).unwrap();
    PageCache::new(pager, wal, 64)
}

fn query_rows(db: &mut Database, sql: &str) -> Vec<Vec<types::Value>> {
    match db.execute(sql).unwrap().remove(0) {
        QueryResult::Rows { rows, .. } => rows.into_iter().map(|r| r.values).collect(),
        other => panic!("{sql} did not return rows: {other:?}"),
    }
}

fn count_star(db: &mut Database, table: &str) -> i32 {
    let rows = query_rows(db, &format!("SELECT COUNT(*) FROM {table}"));
    rows[0][0].as_int().unwrap()
}

/// The live prefix of the database file: every allocated page, header
/// included.
fn live_bytes(path: &Path) -> Vec<u8> {
    let high_water = {
        let pager = Pager::open(path).unwrap();
        let header = *pager.header();
        header.page_high_water as usize
    };
    let mut bytes = fs::read(path).unwrap();
    bytes.truncate(high_water * PAGE_SIZE);
    bytes
}

#[test]
fn committed_transactions_survive_a_crash_before_the_next_one() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.minisql");

    {
        let mut db = open_db(&path);
        db.execute("CREATE TABLE t (n TEXT)").unwrap();
        for i in 0..500 {
            db.execute(&format!("INSERT INTO t VALUES ('row{i}')"))
                .unwrap();
        }
    }

    // A further transaction performs two inserts, reaches disk via an
    // explicit flush, and dies without committing: the WAL stays valid.
    {
        let cache = raw_cache(&path);
        cache.recover().unwrap();
        let txn_id = cache.header().last_txn_id + 1;
        cache.begin_txn(txn_id).unwrap();
        let mut ctx = ExecutionContext::new(&cache);
        executor::insert(&mut ctx, "t", &[Text("torn-1".into())]).unwrap();
        executor::insert(&mut ctx, "t", &[Text("torn-2".into())]).unwrap();
        cache.flush().unwrap();
    }

    let mut db = open_db(&path);
    assert_eq!(count_star(&mut db, "t"), 500);

    // The rowid counter was rolled back with the schema page: the next
    // insert lands at 501, and the count follows.
    let schema = db
        .tables()
        .unwrap()
        .into_iter()
        .find(|s| s.name == "t")
        .unwrap();
    assert_eq!(schema.next_rowid, 501);

    db.execute("INSERT INTO t VALUES ('after-crash')").unwrap();
    assert_eq!(count_star(&mut db, "t"), 501);
}

#[test]
fn update_then_abort_restores_the_row() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.minisql");

    {
        let mut db = open_db(&path);
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, n TEXT)")
            .unwrap();
        db.execute("INSERT INTO t VALUES (42, 'before')").unwrap();
    }

    {
        let cache = raw_cache(&path);
        cache.recover().unwrap();
        let txn_id = cache.header().last_txn_id + 1;
        cache.begin_txn(txn_id).unwrap();
        let mut ctx = ExecutionContext::new(&cache);
        let pred = Predicate::new("id", CompareOp::Eq, Int(42));
        let affected =
            executor::update(&mut ctx, "t", "n", &Text("x".into()), Some(&pred)).unwrap();
        assert_eq!(affected, 1);
        cache.abort_txn().unwrap();
    }

    let mut db = open_db(&path);
    assert_eq!(
        query_rows(&mut db, "SELECT * FROM t WHERE id = 42"),
        vec![vec![Int(42), Text("before".into())]]
    );
}

#[test]
fn abort_leaves_live_pages_bit_identical() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.minisql");

    {
        let mut db = open_db(&path);
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, n TEXT)")
            .unwrap();
        for id in 1..=300 {
            db.execute(&format!("INSERT INTO t VALUES ({id}, 'row{id}')"))
                .unwrap();
        }
    }

    let before = live_bytes(&path);

    {
        let cache = raw_cache(&path);
        cache.recover().unwrap();
        let txn_id = cache.header().last_txn_id + 1;
        cache.begin_txn(txn_id).unwrap();
        let mut ctx = ExecutionContext::new(&cache);
        // A mix of tree growth, in-place rewrites, and deletions.
        for id in 301..=400 {
            executor::insert(&mut ctx, "t", &[Int(id), Text("new".into())]).unwrap();
        }
        executor::update(&mut ctx, "t", "n", &Text("mutated".into()), None).unwrap();
        executor::delete(
            &mut ctx,
            "t",
            Some(&Predicate::new("id", CompareOp::Le, Int(100))),
        )
        .unwrap();
        cache.flush().unwrap();
        cache.abort_txn().unwrap();
    }

    let after = live_bytes(&path);
    assert_eq!(before.len(), after.len());
    assert!(before == after, "live pages differ after abort");

    let mut db = open_db(&path);
    assert_eq!(count_star(&mut db, "t"), 300);
}

#[test]
fn recovery_is_idempotent_over_repeated_crashes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.minisql");

    {
        let mut db = open_db(&path);
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, n TEXT)")
            .unwrap();
        for id in 1..=100 {
            db.execute(&format!("INSERT INTO t VALUES ({id}, 'row{id}')"))
                .unwrap();
        }
    }

    // Tear a transaction.
    {
        let cache = raw_cache(&path);
        cache.recover().unwrap();
        let txn_id = cache.header().last_txn_id + 1;
        cache.begin_txn(txn_id).unwrap();
        let mut ctx = ExecutionContext::new(&cache);
        executor::delete(&mut ctx, "t", None).unwrap();
        cache.flush().unwrap();
    }

    // Duplicate the crashed state, then recover one copy once and the
    // other twice (as if the process died again mid-recovery rerun).
    let twice_path: PathBuf = dir.path().join("twice.minisql");
    fs::copy(&path, &twice_path).unwrap();
    fs::copy(wal_path(&path), wal_path(&twice_path)).unwrap();

    raw_cache(&path).recover().unwrap();
    let twice = raw_cache(&twice_path);
    twice.recover().unwrap();
    twice.recover().unwrap();
    drop(twice);

    assert_eq!(live_bytes(&path), live_bytes(&twice_path));

    let mut db = open_db(&path);
    assert_eq!(count_star(&mut db, "t"), 100);
    let mut db2 = open_db(&twice_path);
    assert_eq!(count_star(&mut db2, "t"), 100);
}

#[test]
fn torn_transaction_with_splits_rolls_back_cleanly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.minisql");

    {
        let mut db = open_db(&path);
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        db.execute("INSERT INTO t VALUES (1)").unwrap();
    }

    // Enough inserts to split leaves and grow the tree, then die.
    {
        let cache = raw_cache(&path);
        cache.recover().unwrap();
        let txn_id = cache.header().last_txn_id + 1;
        cache.begin_txn(txn_id).unwrap();
        let mut ctx = ExecutionContext::new(&cache);
        for id in 2..=600 {
            executor::insert(&mut ctx, "t", &[Int(id)]).unwrap();
        }
        cache.flush().unwrap();
    }

    let mut db = open_db(&path);
    assert_eq!(count_star(&mut db, "t"), 1);
    // The rolled-back root still resolves correctly and accepts writes.
    db.execute("INSERT INTO t VALUES (2)").unwrap();
    assert_eq!(count_star(&mut db, "t"), 2);
}

#[test]
fn clean_reopen_performs_no_rollback() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.minisql");

    {
        let mut db = open_db(&path);
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        db.execute("INSERT INTO t VALUES (7)").unwrap();
    }

    assert_eq!(fs::metadata(wal_path(&path)).unwrap().len(), 0);
    let before = live_bytes(&path);

    let mut db = open_db(&path);
    assert_eq!(count_star(&mut db, "t"), 1);
    drop(db);

    assert_eq!(before, live_bytes(&path));
}
