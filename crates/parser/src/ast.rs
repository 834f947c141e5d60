use expr::Predicate;
use types::Value;

/// One parsed SQL statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    CreateTable {
        name: String,
        columns: Vec<ColumnSpec>,
    },
    DropTable {
        name: String,
    },
    Insert {
        table: String,
        values: Vec<Value>,
    },
    Select(SelectStmt),
    Update {
        table: String,
        column: String,
        value: Value,
        selection: Option<Predicate>,
    },
    Delete {
        table: String,
        selection: Option<Predicate>,
    },
}

impl Statement {
    /// Whether executing this statement can mutate the database.
    pub fn is_write(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }
}

/// A SELECT: scan-or-lookup plus filter, optional sort, optional limit.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectStmt {
    pub projection: Projection,
    pub table: String,
    pub selection: Option<Predicate>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
}

/// A column definition as written; the type is kept as raw uppercase text
/// and resolved against the supported types at execution time.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: String,
    pub primary_key: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// `SELECT *`
    All,
    /// A single aggregate over the scanned rows.
    Aggregate(Aggregate),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Aggregate {
    CountStar,
    Count(String),
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl Aggregate {
    /// The aggregated column, if the aggregate takes one.
    pub fn column(&self) -> Option<&str> {
        match self {
            Aggregate::CountStar => None,
            Aggregate::Count(c)
            | Aggregate::Sum(c)
            | Aggregate::Avg(c)
            | Aggregate::Min(c)
            | Aggregate::Max(c) => Some(c),
        }
    }

    /// Result column label, e.g. `COUNT(*)` or `SUM(price)`.
    pub fn label(&self) -> String {
        match self {
            Aggregate::CountStar => "COUNT(*)".into(),
            Aggregate::Count(c) => format!("COUNT({c})"),
            Aggregate::Sum(c) => format!("SUM({c})"),
            Aggregate::Avg(c) => format!("AVG({c})"),
            Aggregate::Min(c) => format!("MIN({c})"),
            Aggregate::Max(c) => format!("MAX({c})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}
