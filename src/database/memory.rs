//! In-process table store.
//!
//! Evaluates the same validated plans as the SQL backend, with PostgreSQL
//! semantics where they are observable: three-valued comparisons against
//! null, LIKE wildcards, NULLS LAST ascending, aggregates skipping nulls.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::database::error::DataError;
use crate::database::models::column::{parse_timestamp, ColumnInfo, ColumnSpec, ColumnType};
use crate::database::store::TableStore;
use crate::filter::{
    Aggregate, AggregateFunc, Combinator, Condition, Filter, FilterOp, Predicate, SortDirection,
};
use crate::types::Record;

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<ColumnSpec>,
    rows: Vec<Record>,
    next_serial: i64,
}

impl MemoryTable {
    fn new(columns: &[ColumnSpec]) -> Self {
        Self { columns: columns.to_vec(), rows: vec![], next_serial: 1 }
    }

    /// Complete a row with defaults for the columns it omits
    fn fill(&mut self, row: &Record) -> Record {
        let mut full = Record::new();
        for column in &self.columns {
            let value = match row.get(&column.name) {
                Some(value) => value.clone(),
                None if column.serial => {
                    let id = self.next_serial;
                    self.next_serial += 1;
                    Value::from(id)
                }
                None => Value::Null,
            };
            full.insert(column.name.clone(), value);
        }
        full
    }

    fn check_unique(&self, table: &str, rows: &[Record]) -> Result<(), DataError> {
        for column in self.columns.iter().filter(|c| c.unique || c.primary_key) {
            let mut seen: Vec<&Value> = Vec::new();
            for value in rows.iter().filter_map(|r| r.get(&column.name)).filter(|v| !v.is_null()) {
                if seen.contains(&value) {
                    return Err(DataError::conflict(format!(
                        "duplicate key value violates unique constraint on {}.{}",
                        table, column.name
                    )));
                }
                seen.push(value);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn columns(&self, table: &str) -> Result<Option<Vec<ColumnInfo>>, DataError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|t| t.columns.iter().map(ColumnSpec::info).collect()))
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[Record],
    ) -> Result<u64, DataError> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(table) {
            return Err(DataError::conflict(format!("relation \"{}\" already exists", table)));
        }
        let mut created = MemoryTable::new(columns);
        let filled: Vec<Record> = rows.iter().map(|row| created.fill(row)).collect();
        created.check_unique(table, &filled)?;
        created.rows = filled;
        tables.insert(table.to_string(), created);
        Ok(rows.len() as u64)
    }

    async fn drop_table(&self, table: &str) -> Result<(), DataError> {
        let mut tables = self.tables.write().await;
        tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| DataError::dataset_not_found(table))
    }

    async fn insert(&self, table: &str, _columns: &[ColumnInfo], rows: &[Record]) -> Result<u64, DataError> {
        let mut tables = self.tables.write().await;
        let target = tables.get_mut(table).ok_or_else(|| DataError::dataset_not_found(table))?;

        // Stage on a copy so a failed batch leaves the table untouched
        let mut staged = target.clone();
        for row in rows {
            let filled = staged.fill(row);
            staged.rows.push(filled);
        }
        staged.check_unique(table, &staged.rows)?;
        *target = staged;
        Ok(rows.len() as u64)
    }

    async fn select(&self, filter: &Filter) -> Result<Vec<Record>, DataError> {
        let tables = self.tables.read().await;
        let source = tables
            .get(filter.table_name())
            .ok_or_else(|| DataError::dataset_not_found(filter.table_name()))?;

        let matched: Vec<Record> = source
            .rows
            .iter()
            .filter(|row| matches(filter.predicate(), row))
            .cloned()
            .collect();

        let mut output = if filter.is_aggregated() {
            aggregate(&matched, filter)
        } else {
            matched
        };

        if !filter.order().is_empty() {
            output.sort_by(|a, b| {
                for info in filter.order() {
                    let null = Value::Null;
                    let left = a.get(&info.column).unwrap_or(&null);
                    let right = b.get(&info.column).unwrap_or(&null);
                    let ordering = match info.sort {
                        SortDirection::Asc => order_values(left, right),
                        SortDirection::Desc => order_values(left, right).reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = filter.offset().unwrap_or(0) as usize;
        let limit = filter.limit().map(|l| l as usize).unwrap_or(usize::MAX);
        let window = output.into_iter().skip(offset).take(limit);

        Ok(match (filter.is_aggregated(), filter.select_columns()) {
            (false, Some(select)) => window.map(|row| project(&row, select)).collect(),
            _ => window.collect(),
        })
    }

    async fn update(
        &self,
        table: &str,
        _columns: &[ColumnInfo],
        values: &Record,
        predicate: &Predicate,
    ) -> Result<u64, DataError> {
        let mut tables = self.tables.write().await;
        let target = tables.get_mut(table).ok_or_else(|| DataError::dataset_not_found(table))?;

        let mut staged = target.rows.clone();
        let mut updated = 0;
        for row in staged.iter_mut().filter(|row| matches(predicate, row)) {
            for (key, value) in values {
                row.insert(key.clone(), value.clone());
            }
            updated += 1;
        }
        target.check_unique(table, &staged)?;
        target.rows = staged;
        Ok(updated)
    }

    async fn delete(&self, table: &str, predicate: &Predicate) -> Result<u64, DataError> {
        let mut tables = self.tables.write().await;
        let target = tables.get_mut(table).ok_or_else(|| DataError::dataset_not_found(table))?;
        let before = target.rows.len();
        target.rows.retain(|row| !matches(predicate, row));
        Ok((before - target.rows.len()) as u64)
    }

    async fn count(&self, table: &str) -> Result<u64, DataError> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| DataError::dataset_not_found(table))
    }

    async fn health_check(&self) -> Result<(), DataError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

fn matches(predicate: &Predicate, row: &Record) -> bool {
    if predicate.is_empty() {
        return true;
    }
    let mut results = predicate.conditions().iter().map(|c| evaluate(c, row));
    match predicate.combinator() {
        Combinator::And => results.all(|r| r),
        Combinator::Or => results.any(|r| r),
    }
}

/// Evaluate one condition; an unknown (null) outcome counts as false
fn evaluate(condition: &Condition, row: &Record) -> bool {
    let null = Value::Null;
    let cell = row.get(&condition.column.name).unwrap_or(&null);
    let value = &condition.value;
    let ordering = || compare(cell, value);

    match condition.op {
        FilterOp::Eq if value.is_null() => cell.is_null(),
        FilterOp::Ne if value.is_null() => !cell.is_null(),
        FilterOp::Eq => ordering() == Some(Ordering::Equal),
        FilterOp::Ne => matches!(ordering(), Some(o) if o != Ordering::Equal),
        FilterOp::Lt => ordering() == Some(Ordering::Less),
        FilterOp::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Gt => ordering() == Some(Ordering::Greater),
        FilterOp::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::In | FilterOp::NotIn => {
            let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
            let negate = condition.op == FilterOp::NotIn;
            if items.is_empty() {
                return negate;
            }
            if cell.is_null() {
                return false;
            }
            let found = items.iter().any(|item| compare(cell, item) == Some(Ordering::Equal));
            // A null item leaves a non-match unknown, so NOT IN never holds
            match (negate, found) {
                (false, found) => found,
                (true, true) => false,
                (true, false) => !items.iter().any(Value::is_null),
            }
        }
        op => {
            let Some(text) = as_text(cell, &condition.column) else {
                return false;
            };
            let needle = value.as_str().unwrap_or_default();
            match op {
                FilterOp::Like => like(&text, needle, false),
                FilterOp::ILike => like(&text, needle, true),
                FilterOp::NotLike => !like(&text, needle, false),
                FilterOp::NotILike => !like(&text, needle, true),
                FilterOp::Contains => like(&text, &format!("%{}%", needle), false),
                FilterOp::StartsWith => like(&text, &format!("{}%", needle), false),
                FilterOp::EndsWith => like(&text, &format!("%{}", needle), false),
                _ => false,
            }
        }
    }
}

/// Text rendering used by pattern operators, mirroring CAST(... AS TEXT)
/// in a UTC session
fn as_text(value: &Value, column: &ColumnInfo) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if column.column_type == ColumnType::Timestamp => {
            Some(parse_timestamp(s).map_or_else(|| s.clone(), |dt| pg_timestamp_text(dt, &column.data_type)))
        }
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_f64() => n.as_f64().map(pg_float_text),
        other => Some(other.to_string()),
    }
}

fn pg_float_text(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn pg_timestamp_text(dt: DateTime<Utc>, data_type: &str) -> String {
    if data_type.eq_ignore_ascii_case("date") {
        return dt.format("%Y-%m-%d").to_string();
    }
    let mut text = dt.format("%Y-%m-%d %H:%M:%S").to_string();
    let micros = dt.timestamp_subsec_micros();
    if micros > 0 {
        let fraction = format!("{:06}", micros);
        text.push('.');
        text.push_str(fraction.trim_end_matches('0'));
    }
    if data_type.to_ascii_lowercase().contains("with time zone") {
        text.push_str("+00");
    }
    text
}

/// SQL LIKE: `%` any run, `_` one character, backslash escapes
fn like(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (text, pattern): (Vec<char>, Vec<char>) = if case_insensitive {
        (text.to_lowercase().chars().collect(), pattern.to_lowercase().chars().collect())
    } else {
        (text.chars().collect(), pattern.chars().collect())
    };

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '%' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '_' => {
                    t += 1;
                    p += 1;
                    continue;
                }
                '\\' if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                    t += 1;
                    p += 2;
                    continue;
                }
                c if c != '\\' && c == text[t] => {
                    t += 1;
                    p += 1;
                    continue;
                }
                _ => {}
            }
        }
        match backtrack {
            Some((star, matched)) => {
                p = star + 1;
                t = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

/// Ascending sort order with nulls last
fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => compare(a, b).unwrap_or(Ordering::Equal),
    }
}

fn project(row: &Record, select: &[String]) -> Record {
    select
        .iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn aggregate(rows: &[Record], filter: &Filter) -> Vec<Record> {
    let group_by = filter.group_by();
    let mut groups: Vec<(Vec<Value>, Vec<&Record>)> = Vec::new();
    if group_by.is_empty() {
        // Aggregating without grouping always yields exactly one row
        groups.push((vec![], rows.iter().collect()));
    } else {
        for row in rows {
            let key: Vec<Value> = group_by
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }
    }

    let selected = filter.select_columns().unwrap_or(group_by);
    groups
        .into_iter()
        .map(|(key, members)| {
            let mut out = Record::new();
            for column in selected {
                let value = group_by
                    .iter()
                    .position(|g| g == column)
                    .and_then(|i| key.get(i).cloned())
                    .unwrap_or(Value::Null);
                out.insert(column.clone(), value);
            }
            for agg in filter.aggregates() {
                out.insert(agg.alias(), aggregate_value(agg, &members));
            }
            out
        })
        .collect()
}

fn aggregate_value(agg: &Aggregate, members: &[&Record]) -> Value {
    if agg.column == "*" {
        return Value::from(members.len() as u64);
    }
    let values: Vec<&Value> = members
        .iter()
        .filter_map(|r| r.get(&agg.column))
        .filter(|v| !v.is_null())
        .collect();

    match agg.func {
        AggregateFunc::Count => Value::from(values.len() as u64),
        AggregateFunc::Sum => {
            if values.is_empty() {
                return Value::Null;
            }
            let ints: Option<Vec<i64>> = values.iter().map(|v| v.as_i64()).collect();
            if let Some(total) = ints.and_then(|ints| ints.into_iter().try_fold(0i64, i64::checked_add)) {
                return Value::from(total);
            }
            float_or_null(values.iter().filter_map(|v| v.as_f64()).sum())
        }
        AggregateFunc::Avg => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                return Value::Null;
            }
            float_or_null(nums.iter().sum::<f64>() / nums.len() as f64)
        }
        AggregateFunc::Min | AggregateFunc::Max => {
            let want = if agg.func == AggregateFunc::Min { Ordering::Less } else { Ordering::Greater };
            values
                .into_iter()
                .fold(None::<&Value>, |best, v| match best {
                    Some(b) if compare(v, b) != Some(want) => Some(b),
                    _ => Some(v),
                })
                .cloned()
                .unwrap_or(Value::Null)
        }
    }
}

fn float_or_null(f: f64) -> Value {
    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterData, FilterExpr};
    use serde_json::json;

    fn specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::serial_key("id"),
            ColumnSpec::new("river", ColumnType::Text),
            ColumnSpec::new("province", ColumnType::Text),
            ColumnSpec::new("length_km", ColumnType::Float),
        ]
    }

    fn rows() -> Vec<Record> {
        json!([
            {"river": "Don", "province": "ON", "length_km": 38.0},
            {"river": "Humber", "province": "ON", "length_km": 100.0},
            {"river": "Fraser", "province": "BC", "length_km": 1375.0},
            {"river": "Unnamed", "province": "BC", "length_km": null},
        ])
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("rivers", &specs(), &rows()).await.unwrap();
        store
    }

    async fn select(store: &MemoryStore, data: FilterData) -> Vec<Record> {
        let columns = store.columns("rivers").await.unwrap().unwrap();
        let filter = Filter::plan("rivers", data, &columns, None).unwrap();
        store.select(&filter).await.unwrap()
    }

    #[test]
    fn like_wildcards() {
        assert!(like("Humber", "H%r", false));
        assert!(like("Humber", "_umber", false));
        assert!(!like("Humber", "h%", false));
        assert!(like("Humber", "h%", true));
        assert!(like("100%", "100\\%", false));
        assert!(!like("1000", "100\\%", false));
        assert!(like("", "%", false));
    }

    #[tokio::test]
    async fn assigns_serial_ids() {
        let store = store().await;
        let all = select(&store, FilterData::default().with_order("id", SortDirection::Asc)).await;
        let ids: Vec<i64> = all.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn comparisons_skip_nulls() {
        let store = store().await;
        let found = select(
            &store,
            FilterData::default().with_where(FilterExpr::new("length_km", FilterOp::Ne, 38)),
        )
        .await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn sorts_nulls_last_ascending_first_descending() {
        let store = store().await;
        let asc = select(&store, FilterData::default().with_order("length_km", SortDirection::Asc)).await;
        assert_eq!(asc.last().unwrap()["river"], json!("Unnamed"));
        let desc = select(&store, FilterData::default().with_order("length_km", SortDirection::Desc)).await;
        assert_eq!(desc.first().unwrap()["river"], json!("Unnamed"));
    }

    #[tokio::test]
    async fn groups_and_aggregates() {
        let store = store().await;
        let data = FilterData::default()
            .with_group_by(["province"])
            .with_aggregate("length_km", AggregateFunc::Count)
            .with_aggregate("length_km", AggregateFunc::Max)
            .with_aggregate("*", AggregateFunc::Count)
            .with_order("province", SortDirection::Asc);
        let groups = select(&store, data).await;
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0]["province"], json!("BC"));
        assert_eq!(groups[0]["count_length_km"], json!(1));
        assert_eq!(groups[0]["count"], json!(2));
        assert_eq!(groups[0]["max_length_km"], json!(1375.0));
    }

    #[tokio::test]
    async fn aggregate_over_no_rows_yields_one_row() {
        let store = store().await;
        let data = FilterData::default()
            .with_where(FilterExpr::new("river", FilterOp::Eq, "Thames"))
            .with_aggregate("*", AggregateFunc::Count)
            .with_aggregate("length_km", AggregateFunc::Sum);
        let result = select(&store, data).await;
        assert_eq!(result, vec![json!({"count": 0, "sum_length_km": null}).as_object().cloned().unwrap()]);
    }

    #[tokio::test]
    async fn limit_applies_after_ordering() {
        let store = store().await;
        let data = FilterData::default()
            .with_select(["river"])
            .with_order("length_km", SortDirection::Desc)
            .with_offset(1)
            .with_limit(2);
        let result = select(&store, data).await;
        let names: Vec<&str> = result.iter().map(|r| r["river"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Fraser", "Humber"]);
        assert_eq!(result[0].len(), 1);
    }

    #[tokio::test]
    async fn null_in_set_follows_sql() {
        let store = store().await;
        let with_null = json!([38, null]);
        let found = select(
            &store,
            FilterData::default().with_where(FilterExpr::new("length_km", FilterOp::In, with_null.clone())),
        )
        .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["river"], json!("Don"));

        let found = select(
            &store,
            FilterData::default().with_where(FilterExpr::new("length_km", FilterOp::NotIn, with_null)),
        )
        .await;
        assert!(found.is_empty());

        let found = select(
            &store,
            FilterData::default().with_where(FilterExpr::new("length_km", FilterOp::NotIn, json!([38]))),
        )
        .await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn patterns_see_database_text_forms() {
        let store = MemoryStore::new();
        let specs = vec![
            ColumnSpec::new("length_km", ColumnType::Float),
            ColumnSpec::new("surveyed", ColumnType::Timestamp),
        ];
        let row = json!({"length_km": 38.0, "surveyed": "2021-01-01T00:00:00.000000Z"});
        store.create_table("surveys", &specs, &[row.as_object().cloned().unwrap()]).await.unwrap();
        let columns = store.columns("surveys").await.unwrap().unwrap();

        for expr in [
            FilterExpr::new("length_km", FilterOp::Like, "38"),
            FilterExpr::new("surveyed", FilterOp::StartsWith, "2021-01-01 00:00:00"),
            FilterExpr::new("surveyed", FilterOp::EndsWith, "+00"),
        ] {
            let filter = Filter::plan("surveys", FilterData::default().with_where(expr.clone()), &columns, None)
                .unwrap();
            assert_eq!(store.select(&filter).await.unwrap().len(), 1, "{:?}", expr);
        }
    }

    #[test]
    fn timestamp_text_trims_fraction() {
        let dt = parse_timestamp("2021-06-01T10:00:00.500000Z").unwrap();
        assert_eq!(pg_timestamp_text(dt, "timestamp with time zone"), "2021-06-01 10:00:00.5+00");
        assert_eq!(pg_timestamp_text(dt, "timestamp without time zone"), "2021-06-01 10:00:00.5");
        assert_eq!(pg_float_text(2.5), "2.5");
    }

    #[tokio::test]
    async fn failed_batch_leaves_table_untouched() {
        let store = MemoryStore::new();
        let specs = vec![ColumnSpec::serial_key("id"), ColumnSpec::new("name", ColumnType::Text).unique()];
        store.create_table("named", &specs, &[]).await.unwrap();
        let columns = store.columns("named").await.unwrap().unwrap();
        let batch: Vec<Record> = vec![
            json!({"name": "a"}).as_object().cloned().unwrap(),
            json!({"name": "a"}).as_object().cloned().unwrap(),
        ];
        let err = store.insert("named", &columns, &batch).await.unwrap_err();
        assert!(matches!(err, DataError::Conflict(_)));
        assert_eq!(store.count("named").await.unwrap(), 0);
    }
}
