use async_trait::async_trait;

use crate::database::error::DataError;
use crate::database::models::column::{ColumnInfo, ColumnSpec};
use crate::filter::{Filter, Predicate};
use crate::types::Record;

/// Storage seam behind the table executor.
///
/// Rows handed to a store are already validated and coerced to the column
/// types; stores only execute. Every call is its own unit of work: it either
/// commits in full or leaves the table untouched. An empty predicate matches
/// every row.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Columns in definition order, `None` when the table does not exist
    async fn columns(&self, table: &str) -> Result<Option<Vec<ColumnInfo>>, DataError>;

    /// Create a table and seed it with `rows`. Fails with `Conflict` when it exists.
    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[Record],
    ) -> Result<u64, DataError>;

    async fn drop_table(&self, table: &str) -> Result<(), DataError>;

    /// Append rows. Columns a row omits take their default (serial or null).
    async fn insert(&self, table: &str, columns: &[ColumnInfo], rows: &[Record]) -> Result<u64, DataError>;

    async fn select(&self, filter: &Filter) -> Result<Vec<Record>, DataError>;

    async fn update(
        &self,
        table: &str,
        columns: &[ColumnInfo],
        values: &Record,
        predicate: &Predicate,
    ) -> Result<u64, DataError>;

    async fn delete(&self, table: &str, predicate: &Predicate) -> Result<u64, DataError>;

    async fn count(&self, table: &str) -> Result<u64, DataError>;

    async fn health_check(&self) -> Result<(), DataError>;

    /// Short backend name for logs and the health endpoint
    fn backend(&self) -> &'static str;
}
