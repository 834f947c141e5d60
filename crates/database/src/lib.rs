//! Embedding facade: one database file, one WAL beside it, SQL in,
//! results out.
//!
//! Opening runs recovery before anything else touches the file. Every
//! statement then executes inside an implicit transaction: begun before the
//! statement runs, committed on success, aborted on any error. Read-only
//! statements skip the write-ahead machinery entirely.

use buffer::PageCache;
use catalog::{Catalog, ColumnDef, TableSchema};
use common::{Config, DbError, DbResult, Row};
use executor::ExecutionContext;
use parser::{ColumnSpec, Statement, parse_sql};
use std::path::{Path, PathBuf};
use storage::Pager;
use types::SqlType;
use wal::Wal;

/// Result of one executed statement.
#[derive(Debug)]
pub enum QueryResult {
    /// Query returned rows.
    Rows {
        columns: Vec<String>,
        rows: Vec<Row>,
    },
    /// DML affected N rows.
    Count { affected: u64 },
    /// DDL or other statement with no result.
    Empty,
}

/// An open single-file database.
pub struct Database {
    cache: PageCache,
}

impl Database {
    /// Open or create the database at `path`. The undo log lives in a
    /// sibling file with a `.wal` suffix. If the log records an unfinished
    /// transaction from a previous process, it is rolled back here, before
    /// the first statement can observe anything.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> DbResult<Self> {
        let path = path.as_ref();
        let pager = Pager::open(path)?;
        let wal = Wal::open(wal_path(path))?;
        let cache = PageCache::new(pager, wal, config.cache_pages);
        cache.recover()?;
        Ok(Self { cache })
    }

    /// Parse and execute a batch of semicolon-separated statements,
    /// returning one result per statement. Execution stops at the first
    /// failing statement; its transaction has already been rolled back.
    pub fn execute(&mut self, sql: &str) -> DbResult<Vec<QueryResult>> {
        let statements = parse_sql(sql)?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.execute_statement(statement)?);
        }
        Ok(results)
    }

    /// All table schemas currently in the catalog.
    pub fn tables(&self) -> DbResult<Vec<TableSchema>> {
        Catalog::new(&self.cache).tables()
    }

    /// The page cache, exposed for integration tests that assert on
    /// residual state (dirty pages, log emptiness).
    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    fn execute_statement(&mut self, statement: Statement) -> DbResult<QueryResult> {
        if !statement.is_write() {
            return self.run_statement(statement);
        }

        let txn_id = self.cache.header().last_txn_id + 1;
        self.cache.begin_txn(txn_id)?;
        match self.run_statement(statement) {
            Ok(result) => {
                self.cache.commit_txn()?;
                Ok(result)
            }
            Err(err) => {
                self.cache.abort_txn()?;
                Err(err)
            }
        }
    }

    fn run_statement(&mut self, statement: Statement) -> DbResult<QueryResult> {
        let mut ctx = ExecutionContext::new(&self.cache);
        match statement {
            Statement::CreateTable { name, columns } => {
                self.create_table(&name, columns)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropTable { name } => {
                Catalog::new(&self.cache).drop_table(&name)?;
                Ok(QueryResult::Empty)
            }
            Statement::Insert { table, values } => {
                let affected = executor::insert(&mut ctx, &table, &values)?;
                Ok(QueryResult::Count { affected })
            }
            Statement::Select(select) => {
                let batch = executor::select(&mut ctx, &select)?;
                Ok(QueryResult::Rows {
                    columns: batch.columns,
                    rows: batch.rows,
                })
            }
            Statement::Update {
                table,
                column,
                value,
                selection,
            } => {
                let affected =
                    executor::update(&mut ctx, &table, &column, &value, selection.as_ref())?;
                Ok(QueryResult::Count { affected })
            }
            Statement::Delete { table, selection } => {
                let affected = executor::delete(&mut ctx, &table, selection.as_ref())?;
                Ok(QueryResult::Count { affected })
            }
        }
    }

    fn create_table(&self, name: &str, columns: Vec<ColumnSpec>) -> DbResult<()> {
        let catalog = Catalog::new(&self.cache);
        if catalog.get(name)?.is_some() {
            return Err(DbError::Schema(format!("table '{name}' already exists")));
        }

        let defs = columns
            .into_iter()
            .map(|spec| {
                Ok(ColumnDef::new(
                    spec.name,
                    map_sql_type(&spec.ty)?,
                    spec.primary_key,
                ))
            })
            .collect::<DbResult<Vec<_>>>()?;

        let mut schema = TableSchema::try_new(name, defs)?;
        let tree = btree::BTree::create(&self.cache)?;
        schema.root_page = tree.root_page;
        catalog.create_table(schema)?;
        Ok(())
    }
}

/// The log sits beside the database file: `foo.db` → `foo.db.wal`.
pub fn wal_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push(".wal");
    PathBuf::from(os)
}

fn map_sql_type(raw: &str) -> DbResult<SqlType> {
    match raw.trim().to_uppercase().as_str() {
        "INT" | "INTEGER" => Ok(SqlType::Int),
        "TEXT" => Ok(SqlType::Text),
        "BLOB" => Ok(SqlType::Blob),
        other => Err(DbError::Schema(format!("unsupported SQL type '{other}'"))),
    }
}
