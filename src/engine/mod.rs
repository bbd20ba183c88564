//! Relational engine interface.

mod sqlite;

pub use sqlite::SqliteEngine;

use async_trait::async_trait;

use crate::error::Result;
use crate::schema::SemanticType;
use crate::value::{ResultSet, Value};

/// A column of a table created through [`Engine::create_table`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Key and foreign-key constraints reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableConstraint {
    PrimaryKey(Vec<String>),
    Unique(Vec<String>),
    ForeignKey {
        columns: Vec<String>,
        target: String,
        target_columns: Vec<String>,
    },
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Run a query and collect its rows.
    async fn execute(&self, sql: &str) -> Result<ResultSet>;

    /// Run a batch of statements that return no rows.
    async fn run(&self, sql: &str) -> Result<()>;

    async fn create_table(&self, name: &str, columns: &[ColumnDef]) -> Result<()>;

    /// Materialize `query` into a new table.
    async fn create_table_as(&self, name: &str, query: &str) -> Result<()>;

    async fn drop_table(&self, name: &str) -> Result<()>;

    /// Create or replace a view.
    async fn create_view(&self, name: &str, query: &str) -> Result<()>;

    async fn insert_rows(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<()>;

    /// Columns of `table` in declaration order. Empty when the table does
    /// not exist.
    async fn columns(&self, table: &str) -> Result<Vec<(String, SemanticType)>>;

    async fn constraints(&self, table: &str) -> Result<Vec<TableConstraint>>;
}
