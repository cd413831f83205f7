use serde_json::Value;

use crate::database::models::column::{ColumnInfo, ColumnSpec};
use crate::filter::types::SqlResult;
use crate::filter::{Filter, FilterWhere, Predicate};
use crate::types::Record;

/// PostgreSQL caps bind parameters per statement at 65535
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Builds the write statements for dynamic tables. Reads go through [`Filter::to_sql`].
pub struct QueryBuilder;

impl QueryBuilder {
    pub fn create_table(table: &str, columns: &[ColumnSpec]) -> String {
        let defs: Vec<String> = columns.iter().map(ColumnSpec::to_ddl).collect();
        format!("CREATE TABLE {} ({})", Filter::quote_identifier(table), defs.join(", "))
    }

    pub fn drop_table(table: &str) -> String {
        format!("DROP TABLE {}", Filter::quote_identifier(table))
    }

    pub fn count(table: &str) -> String {
        format!("SELECT COUNT(*) AS count FROM {}", Filter::quote_identifier(table))
    }

    /// Columns touched by a batch, in table order
    pub fn insert_columns<'a>(columns: &'a [ColumnInfo], rows: &[Record]) -> Vec<&'a ColumnInfo> {
        columns
            .iter()
            .filter(|c| rows.iter().any(|row| row.contains_key(&c.name)))
            .collect()
    }

    /// Multi-row INSERT. Values a row omits render as DEFAULT, nulls as NULL.
    pub fn insert(table: &str, columns: &[&ColumnInfo], rows: &[Record]) -> SqlResult {
        let table = Filter::quote_identifier(table);
        if columns.is_empty() {
            return SqlResult {
                query: format!("INSERT INTO {} DEFAULT VALUES", table),
                params: vec![],
            };
        }

        let mut params = Vec::new();
        let tuples: Vec<String> = rows
            .iter()
            .map(|row| {
                let slots: Vec<String> = columns
                    .iter()
                    .map(|column| match row.get(&column.name) {
                        None => "DEFAULT".to_string(),
                        Some(Value::Null) => "NULL".to_string(),
                        Some(value) => {
                            params.push(value.clone());
                            column.placeholder(params.len())
                        }
                    })
                    .collect();
                format!("({})", slots.join(", "))
            })
            .collect();

        let names: Vec<String> = columns.iter().map(|c| Filter::quote_identifier(&c.name)).collect();
        SqlResult {
            query: format!("INSERT INTO {} ({}) VALUES {}", table, names.join(", "), tuples.join(", ")),
            params,
        }
    }

    pub fn update(table: &str, columns: &[ColumnInfo], values: &Record, predicate: &Predicate) -> SqlResult {
        let mut params = Vec::new();
        let assignments: Vec<String> = columns
            .iter()
            .filter_map(|column| values.get(&column.name).map(|value| (column, value)))
            .map(|(column, value)| {
                let slot = if value.is_null() {
                    "NULL".to_string()
                } else {
                    params.push(value.clone());
                    column.placeholder(params.len())
                };
                format!("{} = {}", Filter::quote_identifier(&column.name), slot)
            })
            .collect();

        let mut query = format!(
            "UPDATE {} SET {}",
            Filter::quote_identifier(table),
            assignments.join(", ")
        );
        let (where_clause, where_params) = FilterWhere::generate(predicate, params.len());
        if !where_clause.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&where_clause);
        }
        params.extend(where_params);
        SqlResult { query, params }
    }

    pub fn delete(table: &str, predicate: &Predicate) -> SqlResult {
        let mut query = format!("DELETE FROM {}", Filter::quote_identifier(table));
        let (where_clause, params) = FilterWhere::generate(predicate, 0);
        if !where_clause.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&where_clause);
        }
        SqlResult { query, params }
    }
}
