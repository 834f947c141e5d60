//! Shared fixtures for integration tests: a database in a temp directory
//! plus small helpers for driving it with SQL and unwrapping results.

use common::Config;
use database::{Database, QueryResult};
use std::path::PathBuf;
use tempfile::TempDir;
use types::Value;

/// A database opened in its own temporary directory. The directory lives as
/// long as the fixture, so the database can be closed and reopened to
/// exercise recovery.
pub struct TestDb {
    pub db: Database,
    dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let db = Database::open(db_path_in(&dir), &Config::default()).expect("open database");
        Self { db, dir }
    }

    /// Close the database and open the same file again.
    pub fn reopen(self) -> Self {
        let TestDb { db, dir } = self;
        drop(db);
        let db = Database::open(db_path_in(&dir), &Config::default()).expect("reopen database");
        Self { db, dir }
    }

    /// Path of the database file inside the fixture directory.
    pub fn path(&self) -> PathBuf {
        db_path_in(&self.dir)
    }

    /// Execute SQL, panicking on error.
    pub fn exec(&mut self, sql: &str) -> Vec<QueryResult> {
        self.db
            .execute(sql)
            .unwrap_or_else(|e| panic!("{sql} failed: {e}"))
    }

    /// Execute a single SELECT and return its rows as plain value vectors.
    pub fn rows(&mut self, sql: &str) -> Vec<Vec<Value>> {
        match self.exec(sql).remove(0) {
            QueryResult::Rows { rows, .. } => rows.into_iter().map(|r| r.values).collect(),
            other => panic!("{sql} did not return rows: {other:?}"),
        }
    }

    /// Execute a single DML statement and return the affected-row count.
    pub fn count(&mut self, sql: &str) -> u64 {
        match self.exec(sql).remove(0) {
            QueryResult::Count { affected } => affected,
            other => panic!("{sql} did not return a count: {other:?}"),
        }
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

fn db_path_in(dir: &TempDir) -> PathBuf {
    dir.path().join("db.minisql")
}
