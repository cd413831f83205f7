use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::{FilterWhere, Predicate};
use super::types::{Aggregate, AggregateFunc, FilterData, FilterOrderInfo, SqlResult};
use crate::database::models::column::{ColumnInfo, ColumnType};

/// Longest identifier PostgreSQL keeps without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

/// A read query validated against the live columns of one table.
///
/// Stages always apply in the same order: predicate, grouping/aggregation,
/// ordering, offset, limit. The limit therefore bounds the final output.
#[derive(Debug, Clone)]
pub struct Filter {
    table_name: String,
    select_columns: Option<Vec<String>>,
    predicate: Predicate,
    group_by: Vec<String>,
    aggregates: Vec<Aggregate>,
    order: Vec<FilterOrderInfo>,
    limit: Option<u64>,
    offset: Option<u64>,
    /// Live columns the plan was validated against
    columns: Vec<ColumnInfo>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        Self::validate_table_name(&table_name)?;
        Ok(Self {
            table_name,
            select_columns: None,
            predicate: Predicate::default(),
            group_by: vec![],
            aggregates: vec![],
            order: vec![],
            limit: None,
            offset: None,
            columns: vec![],
        })
    }

    /// Validate a read request against `columns` and build the query plan
    pub fn plan(
        table_name: &str,
        data: FilterData,
        columns: &[ColumnInfo],
        max_limit: Option<u64>,
    ) -> Result<Self, FilterError> {
        let mut filter = Self::new(table_name)?;
        let find = |name: &str| columns.iter().find(|c| c.name == name);

        let select = match data.select {
            Some(select) if select.iter().any(|c| c == "*") => None,
            Some(select) => {
                for column in &select {
                    find(column.as_str()).ok_or_else(|| FilterError::UnknownColumn(column.clone()))?;
                }
                Some(select)
            }
            None => None,
        };

        filter.predicate = FilterWhere::translate(&data.where_clause, data.combinator, columns)?;

        for column in &data.group_by {
            find(column.as_str()).ok_or_else(|| FilterError::UnknownColumn(column.clone()))?;
        }
        for aggregate in &data.aggregate {
            if aggregate.column == "*" {
                if aggregate.func != AggregateFunc::Count {
                    return Err(FilterError::InvalidAggregate(format!(
                        "{}(*) is not supported",
                        aggregate.func.as_str()
                    )));
                }
                continue;
            }
            let column = find(aggregate.column.as_str())
                .ok_or_else(|| FilterError::UnknownColumn(aggregate.column.clone()))?;
            let numeric = matches!(column.column_type, ColumnType::Integer | ColumnType::Float);
            if matches!(aggregate.func, AggregateFunc::Sum | AggregateFunc::Avg) && !numeric {
                return Err(FilterError::InvalidAggregate(format!(
                    "{} requires a numeric column, {} is {}",
                    aggregate.func.as_str(),
                    column.name,
                    column.data_type
                )));
            }
        }

        let aggregated = !data.group_by.is_empty() || !data.aggregate.is_empty();
        filter.select_columns = if aggregated {
            let selected = match select {
                Some(cols) => {
                    if let Some(stray) = cols.iter().find(|c| !data.group_by.contains(c)) {
                        return Err(FilterError::InvalidAggregate(format!(
                            "column {} must appear in group-by or be aggregated",
                            stray
                        )));
                    }
                    cols
                }
                None => data.group_by.clone(),
            };
            if selected.is_empty() && data.aggregate.is_empty() {
                return Err(FilterError::InvalidAggregate("query selects no columns".to_string()));
            }
            Some(selected)
        } else {
            if matches!(&select, Some(cols) if cols.is_empty()) {
                return Err(FilterError::InvalidColumn(
                    "an empty selection requires group-by or aggregate".to_string(),
                ));
            }
            select
        };

        for info in &data.order {
            let known = if aggregated {
                data.group_by.contains(&info.column)
                    || data.aggregate.iter().any(|a| a.alias() == info.column)
            } else {
                find(info.column.as_str()).is_some()
            };
            if !known {
                return Err(FilterError::InvalidOrder(format!(
                    "cannot order by {}",
                    info.column
                )));
            }
        }

        filter.columns = columns.to_vec();
        filter.group_by = data.group_by;
        filter.aggregates = data.aggregate;
        filter.order = data.order;

        if let Some(limit) = data.limit {
            if limit < 0 {
                return Err(FilterError::InvalidLimit("Limit must be non-negative".to_string()));
            }
            let limit = limit as u64;
            filter.limit = Some(match max_limit {
                Some(max) if limit > max => {
                    tracing::warn!("Limit {} exceeds max {}, capping to max", limit, max);
                    max
                }
                _ => limit,
            });
        }
        if let Some(offset) = data.offset {
            if offset < 0 {
                return Err(FilterError::InvalidOffset("Offset must be non-negative".to_string()));
            }
            filter.offset = Some(offset as u64);
        }

        Ok(filter)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// `None` means every column
    pub fn select_columns(&self) -> Option<&[String]> {
        self.select_columns.as_deref()
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    pub fn aggregates(&self) -> &[Aggregate] {
        &self.aggregates
    }

    pub fn order(&self) -> &[FilterOrderInfo] {
        &self.order
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_aggregated(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregates.is_empty()
    }

    pub fn to_sql(&self) -> SqlResult {
        let select_clause = self.build_select_clause();
        let (where_clause, params) = FilterWhere::generate(&self.predicate, 0);
        let group_clause = if self.group_by.is_empty() {
            String::new()
        } else {
            format!(
                "GROUP BY {}",
                self.group_by.iter().map(|c| Self::quote_identifier(c)).collect::<Vec<_>>().join(", ")
            )
        };
        let order_clause = FilterOrder::generate(&self.order);
        let limit_clause = self.build_limit_clause();

        let query = [
            format!("SELECT {}", select_clause),
            format!("FROM {}", Self::quote_identifier(&self.table_name)),
            if where_clause.is_empty() { String::new() } else { format!("WHERE {}", where_clause) },
            group_clause,
            order_clause,
            limit_clause,
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        SqlResult { query, params }
    }

    /// Quote an SQL identifier, doubling embedded quotes
    pub fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    pub fn validate_table_name(name: &str) -> Result<(), FilterError> {
        Self::check_identifier(name).map_err(FilterError::InvalidTableName)
    }

    pub fn validate_column_name(name: &str) -> Result<(), FilterError> {
        Self::check_identifier(name).map_err(FilterError::InvalidColumn)
    }

    fn check_identifier(name: &str) -> Result<(), String> {
        let mut chars = name.chars();
        let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        if !first_ok
            || name.len() > MAX_IDENTIFIER_LEN
            || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(format!("Invalid identifier format: '{}'", name));
        }
        Ok(())
    }

    fn build_select_clause(&self) -> String {
        let mut parts: Vec<String> = match &self.select_columns {
            None if !self.columns.iter().any(ColumnInfo::reads_as_text) => return "*".to_string(),
            None => self.columns.iter().map(|c| self.output_column(&c.name)).collect(),
            Some(cols) => cols.iter().map(|c| self.output_column(c)).collect(),
        };
        for aggregate in &self.aggregates {
            let target = if aggregate.column == "*" {
                "*".to_string()
            } else {
                Self::quote_identifier(&aggregate.column)
            };
            let mut expr = format!("{}({})", aggregate.func.to_sql(), target);
            if self.is_text_read(&aggregate.column) {
                expr = format!("CAST({} AS TEXT)", expr);
            }
            parts.push(format!("{} AS {}", expr, Self::quote_identifier(&aggregate.alias())));
        }
        parts.join(", ")
    }

    fn is_text_read(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name && c.reads_as_text())
    }

    fn output_column(&self, name: &str) -> String {
        let quoted = Self::quote_identifier(name);
        if self.is_text_read(name) {
            format!("CAST({} AS TEXT) AS {}", quoted, quoted)
        } else {
            quoted
        }
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}
