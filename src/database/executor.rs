use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::database::error::DataError;
use crate::database::models::column::{ColumnInfo, ColumnSpec, ColumnType};
use crate::database::store::TableStore;
use crate::filter::{Combinator, Filter, FilterData, FilterExpr, FilterWhere, Predicate};
use crate::types::Record;

/// Which rows a mutation targets. Every row must be asked for explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All,
    Matching { filters: Vec<FilterExpr>, combinator: Combinator },
}

impl Selection {
    pub fn matching(filters: Vec<FilterExpr>, combinator: Combinator) -> Self {
        Selection::Matching { filters, combinator }
    }

    pub fn one(filter: FilterExpr) -> Self {
        Self::matching(vec![filter], Combinator::And)
    }
}

/// Validates table operations against live column metadata, then hands them to the store
#[derive(Clone)]
pub struct TableExecutor {
    store: Arc<dyn TableStore>,
    max_limit: Option<u64>,
    log_filters: bool,
}

impl TableExecutor {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store, max_limit: None, log_filters: false }
    }

    pub fn with_max_limit(mut self, max_limit: Option<u64>) -> Self {
        self.max_limit = max_limit;
        self
    }

    /// Log every planned read at debug level
    pub fn with_filter_logging(mut self, enabled: bool) -> Self {
        self.log_filters = enabled;
        self
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    pub async fn exists(&self, table: &str) -> Result<bool, DataError> {
        Filter::validate_table_name(table)?;
        Ok(self.store.columns(table).await?.is_some())
    }

    /// Live columns of `table`, in definition order
    pub async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DataError> {
        Filter::validate_table_name(table)?;
        self.store
            .columns(table)
            .await?
            .ok_or_else(|| DataError::dataset_not_found(table))
    }

    /// Provision an empty table from explicit column definitions
    pub async fn create_table(&self, table: &str, specs: &[ColumnSpec]) -> Result<(), DataError> {
        Self::validate_specs(table, specs)?;
        if self.exists(table).await? {
            return Err(DataError::conflict(format!("Dataset {} already exists", table)));
        }
        self.store.create_table(table, specs, &[]).await?;
        info!("Created table {} with {} columns", table, specs.len());
        Ok(())
    }

    /// Create a table whose columns are inferred from `rows`, seeded with them
    pub async fn create(&self, table: &str, rows: &[Record]) -> Result<u64, DataError> {
        Filter::validate_table_name(table)?;
        let specs = infer_columns(rows)?;
        Self::validate_specs(table, &specs)?;
        if self.exists(table).await? {
            return Err(DataError::conflict(format!("Dataset {} already exists", table)));
        }

        let infos: Vec<ColumnInfo> = specs.iter().map(ColumnSpec::info).collect();
        let coerced = coerce_rows(&infos, rows)?;
        let inserted = self.store.create_table(table, &specs, &coerced).await?;
        info!("Created dataset {} with {} rows", table, inserted);
        Ok(inserted)
    }

    pub async fn insert(&self, table: &str, rows: &[Record]) -> Result<u64, DataError> {
        let columns = self.columns(table).await?;
        let coerced = coerce_rows(&columns, rows)?;
        if coerced.is_empty() {
            return Ok(0);
        }
        let inserted = self.store.insert(table, &columns, &coerced).await?;
        debug!("Inserted {} rows into {}", inserted, table);
        Ok(inserted)
    }

    pub async fn read(&self, table: &str, data: FilterData) -> Result<Vec<Record>, DataError> {
        let columns = self.columns(table).await?;
        let filter = Filter::plan(table, data, &columns, self.max_limit)?;
        if self.log_filters {
            debug!(table, "Planned read: {}", filter.to_sql().query);
        }
        self.store.select(&filter).await
    }

    /// Set `values` on the selected rows. Returns the number of rows changed.
    pub async fn update(&self, table: &str, selection: Selection, values: &Record) -> Result<u64, DataError> {
        if values.is_empty() {
            return Err(DataError::validation("No values given to update"));
        }
        Self::reject_empty_selection(&selection, "update")?;

        let columns = self.columns(table).await?;
        let predicate = Self::predicate(&selection, &columns)?;
        let coerced = coerce_row(&columns, values, None)?;
        let updated = self.store.update(table, &columns, &coerced, &predicate).await?;
        debug!("Updated {} rows in {}", updated, table);
        Ok(updated)
    }

    /// Remove the selected rows, keeping the table
    pub async fn delete(&self, table: &str, selection: Selection) -> Result<u64, DataError> {
        Self::reject_empty_selection(&selection, "delete")?;
        let columns = self.columns(table).await?;
        let predicate = Self::predicate(&selection, &columns)?;
        let deleted = self.store.delete(table, &predicate).await?;
        debug!("Deleted {} rows from {}", deleted, table);
        Ok(deleted)
    }

    /// Remove the table itself
    pub async fn drop(&self, table: &str) -> Result<(), DataError> {
        self.columns(table).await?;
        self.store.drop_table(table).await?;
        info!("Dropped dataset {}", table);
        Ok(())
    }

    pub async fn count(&self, table: &str) -> Result<u64, DataError> {
        self.columns(table).await?;
        self.store.count(table).await
    }

    fn reject_empty_selection(selection: &Selection, operation: &str) -> Result<(), DataError> {
        match selection {
            Selection::Matching { filters, .. } if filters.is_empty() => Err(DataError::validation(format!(
                "Refusing to {} with an empty where list; select all rows explicitly instead",
                operation
            ))),
            _ => Ok(()),
        }
    }

    fn predicate(selection: &Selection, columns: &[ColumnInfo]) -> Result<Predicate, DataError> {
        match selection {
            Selection::All => Ok(Predicate::default()),
            Selection::Matching { filters, combinator } => {
                Ok(FilterWhere::translate(filters, *combinator, columns)?)
            }
        }
    }

    fn validate_specs(table: &str, specs: &[ColumnSpec]) -> Result<(), DataError> {
        Filter::validate_table_name(table)?;
        if specs.is_empty() {
            return Err(DataError::validation(format!("Dataset {} needs at least one column", table)));
        }
        for (i, spec) in specs.iter().enumerate() {
            Filter::validate_column_name(&spec.name)?;
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(DataError::validation(format!("Duplicate column {}", spec.name)));
            }
        }
        Ok(())
    }
}

/// Derive column types from the values present. Integers mixed with floats widen;
/// any other mix is an error. Columns holding only nulls become text.
fn infer_columns(rows: &[Record]) -> Result<Vec<ColumnSpec>, DataError> {
    if rows.is_empty() {
        return Err(DataError::validation("Cannot create a dataset from zero rows"));
    }

    let mut observed: Vec<(String, Option<ColumnType>)> = Vec::new();
    for row in rows {
        for (name, value) in row {
            let seen = ColumnType::infer(value);
            match observed.iter_mut().find(|(n, _)| n == name) {
                None => observed.push((name.clone(), seen)),
                Some((_, current)) => {
                    *current = match (*current, seen) {
                        (None, t) | (t, None) => t,
                        (Some(a), Some(b)) => Some(a.widen(b).ok_or_else(|| {
                            DataError::validation(format!(
                                "Column {} mixes {} and {} values",
                                name,
                                a.sql_type(),
                                b.sql_type()
                            ))
                        })?),
                    }
                }
            }
        }
    }

    Ok(observed
        .into_iter()
        .map(|(name, t)| ColumnSpec::new(name, t.unwrap_or(ColumnType::Text)))
        .collect())
}

fn coerce_rows(columns: &[ColumnInfo], rows: &[Record]) -> Result<Vec<Record>, DataError> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| coerce_row(columns, row, Some(i)))
        .collect()
}

/// Check every key names a column and convert each value to that column's type
fn coerce_row(columns: &[ColumnInfo], row: &Record, index: Option<usize>) -> Result<Record, DataError> {
    let at = |msg: String| match index {
        Some(i) => DataError::validation(format!("Row {}: {}", i, msg)),
        None => DataError::validation(msg),
    };

    let mut coerced = Record::new();
    for (key, value) in row {
        let column = columns
            .iter()
            .find(|c| &c.name == key)
            .ok_or_else(|| at(format!("unknown column {}", key)))?;
        let value: Value = column
            .column_type
            .coerce(value)
            .map_err(|msg| at(format!("column {}: {}", key, msg)))?;
        if value.is_null() && !column.nullable {
            return Err(at(format!("column {} cannot be null", key)));
        }
        coerced.insert(key.clone(), value);
    }
    Ok(coerced)
}
