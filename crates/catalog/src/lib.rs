//! Catalog: the name → schema mapping, stored inside the database file.
//!
//! A dedicated B+Tree (its root lives in the database header) maps a
//! deterministic 32-bit hash of each table name to the page holding that
//! table's serialized schema record. The schema record carries everything
//! the executor needs: column definitions, the primary-key column, the data
//! tree's current root page, the implicit-rowid counter, and a row-count
//! hint. Whenever a mutation can move a table's data root, the caller must
//! write the refreshed schema back through [`Catalog::update`].


use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use btree::{BTree, Key};
use buffer::PageCache;
use common::{DbError, DbResult, PageId};
use serde::{Deserialize, Serialize};
use storage::{PAGE_SIZE, ROW_HEADER_BYTES};
use types::SqlType;

/// Hard cap on columns per table; a serialized row tags each column.
pub const MAX_COLUMNS: usize = 32;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// The catalog key for a table name: a stable hash, reinterpreted as the
/// signed key type the tree stores. Stability across restarts matters here,
/// which rules out the seeded hashers used for in-memory maps.
pub fn table_name_key(name: &str) -> Key {
    crc32fast::hash(name.as_bytes()) as Key
}

/// One column of a table definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: SqlType,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: SqlType, primary_key: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key,
        }
    }
}

/// Serialized per-table schema record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Ordinal of the INTEGER PRIMARY KEY column, or -1 when rows are keyed
    /// by the implicit rowid.
    pub pk_column: i32,
    /// Root page of the table's data tree. Refreshed after any mutation
    /// that may split or collapse the tree.
    pub root_page: PageId,
    /// Next implicit rowid; rowids start at 1.
    pub next_rowid: i32,
    /// Live-row hint, kept in step with inserts and deletes.
    pub row_count: u64,
}

impl TableSchema {
    /// Validate a table definition: 1..=32 columns, unique names, at most
    /// one PRIMARY KEY, and that key must be INTEGER.
    pub fn try_new(name: impl Into<String>, columns: Vec<ColumnDef>) -> DbResult<Self> {
        let name = name.into();
        if columns.is_empty() {
            return Err(DbError::Schema(format!(
                "table '{name}' must have at least one column"
            )));
        }
        if columns.len() > MAX_COLUMNS {
            return Err(DbError::Schema(format!(
                "table '{name}' has {} columns, maximum is {MAX_COLUMNS}",
                columns.len()
            )));
        }

        let mut pk_column = -1i32;
        for (ordinal, column) in columns.iter().enumerate() {
            if columns[..ordinal]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(DbError::Schema(format!(
                    "duplicate column '{}' in table '{name}'",
                    column.name
                )));
            }
            if column.primary_key {
                if pk_column >= 0 {
                    return Err(DbError::Schema(format!(
                        "table '{name}' declares more than one PRIMARY KEY"
                    )));
                }
                if column.ty != SqlType::Int {
                    return Err(DbError::Schema(format!(
                        "PRIMARY KEY column '{}' must be INTEGER",
                        column.name
                    )));
                }
                pk_column = ordinal as i32;
            }
        }

        Ok(Self {
            name,
            columns,
            pk_column,
            root_page: PageId::NONE,
            next_rowid: 1,
            row_count: 0,
        })
    }

    pub fn has_int_pk(&self) -> bool {
        self.pk_column >= 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_types(&self) -> Vec<SqlType> {
        self.columns.iter().map(|c| c.ty).collect()
    }
}

/// View over the catalog tree. Stateless: the authoritative root page is
/// re-read from the header on every operation, so handles can be built
/// freely per statement.
#[derive(Debug)]
pub struct Catalog<'c> {
    cache: &'c PageCache,
}

impl<'c> Catalog<'c> {
    pub fn new(cache: &'c PageCache) -> Self {
        Self { cache }
    }

    /// Register a new table and write its schema page. Returns the schema
    /// page number. The catalog tree is created lazily on first use.
    pub fn create_table(&self, schema: TableSchema) -> DbResult<PageId> {
        let key = table_name_key(&schema.name);

        let mut tree = match self.tree() {
            Some(tree) => tree,
            None => {
                let tree = BTree::create(self.cache)?;
                self.cache
                    .update_header(|h| h.catalog_root = tree.root_page)?;
                tree
            }
        };

        if let Some(existing_page) = tree.search(key)? {
            let existing = self.load_schema(existing_page)?;
            if existing.name == schema.name {
                return Err(DbError::Schema(format!(
                    "table '{}' already exists",
                    schema.name
                )));
            }
            return Err(DbError::Schema(format!(
                "table name '{}' collides with '{}' in the catalog",
                schema.name, existing.name
            )));
        }

        let guard = self.cache.allocate_page()?;
        write_schema(&mut guard.write(), &schema)?;
        let page = guard.page();
        drop(guard);

        tree.insert(key, page)?;
        self.sync_root(&tree)?;
        Ok(page)
    }

    /// Look up a table by name. A hash hit whose stored name differs is
    /// treated as absent.
    pub fn get(&self, name: &str) -> DbResult<Option<(PageId, TableSchema)>> {
        let Some(tree) = self.tree() else {
            return Ok(None);
        };
        let Some(page) = tree.search(table_name_key(name))? else {
            return Ok(None);
        };
        let schema = self.load_schema(page)?;
        if schema.name != name {
            return Ok(None);
        }
        Ok(Some((page, schema)))
    }

    pub fn require(&self, name: &str) -> DbResult<(PageId, TableSchema)> {
        self.get(name)?
            .ok_or_else(|| DbError::Schema(format!("unknown table '{name}'")))
    }

    /// Rewrite a table's schema page in place.
    pub fn update(&self, page: PageId, schema: &TableSchema) -> DbResult<()> {
        let guard = self.cache.get_page(page)?;
        self.cache.mark_dirty(&guard)?;
        write_schema(&mut guard.write(), schema)
    }

    /// Remove a table's catalog entry. The schema page and the table's data
    /// pages leak; there is no free list.
    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        let (_, schema) = self.require(name)?;
        let mut tree = self
            .tree()
            .ok_or_else(|| DbError::Corruption("catalog root vanished".into()))?;
        tree.delete(table_name_key(&schema.name))?;
        self.sync_root(&tree)
    }

    /// All registered tables, in catalog-key order.
    pub fn tables(&self) -> DbResult<Vec<TableSchema>> {
        let Some(tree) = self.tree() else {
            return Ok(Vec::new());
        };
        let mut cursor = tree.cursor_first()?;
        let mut out = Vec::new();
        while let Some((_, page)) = cursor.next_entry(self.cache)? {
            out.push(self.load_schema(page)?);
        }
        Ok(out)
    }

    fn tree(&self) -> Option<BTree<'c>> {
        let root = self.cache.header().catalog_root;
        if root.is_none() {
            None
        } else {
            Some(BTree::open(self.cache, root))
        }
    }

    /// Persist a root move of the catalog tree into the header.
    fn sync_root(&self, tree: &BTree) -> DbResult<()> {
        if self.cache.header().catalog_root != tree.root_page {
            self.cache
                .update_header(|h| h.catalog_root = tree.root_page)?;
        }
        Ok(())
    }

    fn load_schema(&self, page: PageId) -> DbResult<TableSchema> {
        let guard = self.cache.get_page(page)?;
        let data = guard.read();
        let (schema, _) = decode_from_slice(&data[ROW_HEADER_BYTES..], bincode_config())
            .map_err(|e| DbError::Corruption(format!("undecodable schema record: {e}")))?;
        Ok(schema)
    }
}

fn write_schema(buf: &mut storage::PageBuf, schema: &TableSchema) -> DbResult<()> {
    let bytes = encode_to_vec(schema, bincode_config())
        .map_err(|e| DbError::Resource(format!("schema record encoding failed: {e}")))?;
    if bytes.len() > PAGE_SIZE - ROW_HEADER_BYTES {
        return Err(DbError::Resource(format!(
            "schema record of {} bytes does not fit a page",
            bytes.len()
        )));
    }
    buf.fill(0);
    buf[ROW_HEADER_BYTES..ROW_HEADER_BYTES + bytes.len()].copy_from_slice(&bytes);
    Ok(())
}
