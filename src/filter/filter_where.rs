use serde_json::Value;

use super::error::FilterError;
use super::types::{Combinator, FilterExpr, FilterOp};
use super::Filter;
use crate::database::models::column::ColumnInfo;

/// One validated condition, bound to the column it tests
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: ColumnInfo,
    pub op: FilterOp,
    /// Already coerced: the column's type for comparisons and sets, text for patterns
    pub value: Value,
}

/// Translated filter set. Empty means "every row".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    conditions: Vec<Condition>,
    combinator: Combinator,
}

impl Predicate {
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    /// Validate a filter set against the known columns of a table. Pure: performs no I/O.
    pub fn translate(
        filters: &[FilterExpr],
        combinator: Combinator,
        columns: &[ColumnInfo],
    ) -> Result<Predicate, FilterError> {
        let conditions = filters
            .iter()
            .map(|expr| Self::translate_one(expr, columns))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Predicate { conditions, combinator })
    }

    fn translate_one(expr: &FilterExpr, columns: &[ColumnInfo]) -> Result<Condition, FilterError> {
        let column = columns
            .iter()
            .find(|c| c.name == expr.column)
            .ok_or_else(|| FilterError::UnknownColumn(expr.column.clone()))?;

        let coerce = |value: &Value| {
            column
                .column_type
                .coerce(value)
                .map_err(|msg| FilterError::InvalidOperatorData(format!("{}: {}", column.name, msg)))
        };

        let value = if expr.op.is_set() {
            let items = expr.value.as_array().ok_or_else(|| {
                FilterError::InvalidOperatorData(format!("{} requires a sequence of values", expr.op))
            })?;
            let coerced = items
                .iter()
                .map(|item| {
                    if item.is_array() || item.is_object() {
                        return Err(FilterError::InvalidOperatorData(format!(
                            "{} values must be scalars",
                            expr.op
                        )));
                    }
                    coerce(item)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Value::Array(coerced)
        } else if expr.op.is_pattern() {
            match &expr.value {
                Value::String(_) => expr.value.clone(),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                _ => {
                    return Err(FilterError::InvalidOperatorData(format!(
                        "{} requires a text pattern",
                        expr.op
                    )))
                }
            }
        } else {
            match &expr.value {
                Value::Array(_) | Value::Object(_) => {
                    return Err(FilterError::InvalidOperatorData(format!(
                        "{} requires a scalar value",
                        expr.op
                    )))
                }
                Value::Null if !matches!(expr.op, FilterOp::Eq | FilterOp::Ne) => {
                    return Err(FilterError::InvalidOperatorData(format!(
                        "{} cannot compare against null",
                        expr.op
                    )))
                }
                other => coerce(other)?,
            }
        };

        Ok(Condition {
            column: column.clone(),
            op: expr.op,
            value,
        })
    }

    /// Render a predicate as a parameterised WHERE body (without the keyword)
    pub fn generate(predicate: &Predicate, starting_param_index: usize) -> (String, Vec<Value>) {
        let mut filter_where = Self::new(starting_param_index);
        let parts: Vec<String> = predicate
            .conditions
            .iter()
            .map(|condition| filter_where.build_sql_condition(condition))
            .collect();
        (parts.join(predicate.combinator.to_sql()), filter_where.param_values)
    }

    fn build_sql_condition(&mut self, condition: &Condition) -> String {
        let quoted_column = Filter::quote_identifier(&condition.column.name);
        let as_text = format!("CAST({} AS TEXT)", quoted_column);
        let data = condition.value.clone();

        match condition.op {
            FilterOp::Eq if data.is_null() => format!("{} IS NULL", quoted_column),
            FilterOp::Ne if data.is_null() => format!("{} IS NOT NULL", quoted_column),
            FilterOp::Eq => format!("{} = {}", quoted_column, self.typed_param(condition, data)),
            FilterOp::Ne => format!("{} <> {}", quoted_column, self.typed_param(condition, data)),
            FilterOp::Lt => format!("{} < {}", quoted_column, self.typed_param(condition, data)),
            FilterOp::Lte => format!("{} <= {}", quoted_column, self.typed_param(condition, data)),
            FilterOp::Gt => format!("{} > {}", quoted_column, self.typed_param(condition, data)),
            FilterOp::Gte => format!("{} >= {}", quoted_column, self.typed_param(condition, data)),
            FilterOp::Like => format!("{} LIKE {}", as_text, self.param(data)),
            FilterOp::ILike => format!("{} ILIKE {}", as_text, self.param(data)),
            FilterOp::NotLike => format!("{} NOT LIKE {}", as_text, self.param(data)),
            FilterOp::NotILike => format!("{} NOT ILIKE {}", as_text, self.param(data)),
            FilterOp::Contains => format!("{} LIKE '%' || {} || '%'", as_text, self.param(data)),
            FilterOp::StartsWith => format!("{} LIKE {} || '%'", as_text, self.param(data)),
            FilterOp::EndsWith => format!("{} LIKE '%' || {}", as_text, self.param(data)),
            FilterOp::In | FilterOp::NotIn => {
                let values = match data {
                    Value::Array(values) => values,
                    other => vec![other],
                };
                let negate = condition.op == FilterOp::NotIn;
                if values.is_empty() {
                    return if negate { "1=1".to_string() } else { "1=0".to_string() };
                }
                let params: Vec<String> = values
                    .into_iter()
                    .map(|v| self.typed_param(condition, v))
                    .collect();
                let keyword = if negate { "NOT IN" } else { "IN" };
                format!("{} {} ({})", quoted_column, keyword, params.join(", "))
            }
        }
    }

    fn typed_param(&mut self, condition: &Condition, value: Value) -> String {
        // A bound null would carry a declared type the column may not accept
        if value.is_null() {
            return "NULL".to_string();
        }
        self.param_values.push(value);
        self.param_index += 1;
        condition.column.placeholder(self.param_index)
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", "bigint", false),
            ColumnInfo::new("name", "text", true),
            ColumnInfo::new("updated_at", "timestamp with time zone", true),
        ]
    }

    fn translate(filters: &[FilterExpr], combinator: Combinator) -> Result<Predicate, FilterError> {
        FilterWhere::translate(filters, combinator, &columns())
    }

    #[test]
    fn unknown_column_is_rejected() {
        let err = translate(&[FilterExpr::new("missing", FilterOp::Eq, 1)], Combinator::And)
            .unwrap_err();
        assert_eq!(err, FilterError::UnknownColumn("missing".to_string()));
    }

    #[test]
    fn set_operator_requires_sequence() {
        let err = translate(&[FilterExpr::new("id", FilterOp::In, 3)], Combinator::And).unwrap_err();
        assert!(matches!(err, FilterError::InvalidOperatorData(_)));
    }

    #[test]
    fn scalar_operator_rejects_sequence() {
        let err = translate(&[FilterExpr::new("id", FilterOp::Gt, json!([1, 2]))], Combinator::And)
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidOperatorData(_)));
    }

    #[test]
    fn values_are_coerced_to_column_type() {
        let predicate = translate(
            &["id > 3".parse().unwrap(), "id IN 4,5".parse().unwrap()],
            Combinator::And,
        )
        .unwrap();
        assert_eq!(predicate.conditions()[0].value, json!(3));
        assert_eq!(predicate.conditions()[1].value, json!([4, 5]));

        let err = translate(&["id > three".parse().unwrap()], Combinator::And).unwrap_err();
        assert!(matches!(err, FilterError::InvalidOperatorData(_)));
    }

    #[test]
    fn generates_sql_with_single_combinator() {
        let predicate = translate(
            &[
                FilterExpr::new("id", FilterOp::Gte, 2),
                FilterExpr::new("name", FilterOp::Contains, "riv"),
            ],
            Combinator::Or,
        )
        .unwrap();
        let (sql, params) = FilterWhere::generate(&predicate, 0);
        assert_eq!(sql, "\"id\" >= $1 OR CAST(\"name\" AS TEXT) LIKE '%' || $2 || '%'");
        assert_eq!(params, vec![json!(2), json!("riv")]);
    }

    #[test]
    fn null_equality_becomes_is_null() {
        let predicate = translate(&[FilterExpr::new("name", FilterOp::Eq, Value::Null)], Combinator::And)
            .unwrap();
        let (sql, params) = FilterWhere::generate(&predicate, 0);
        assert_eq!(sql, "\"name\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn timestamps_are_cast_and_params_offset() {
        let predicate = translate(
            &[FilterExpr::new("updated_at", FilterOp::Gt, "2021-01-01")],
            Combinator::And,
        )
        .unwrap();
        let (sql, params) = FilterWhere::generate(&predicate, 2);
        assert_eq!(sql, "\"updated_at\" > CAST($3 AS timestamp with time zone)");
        assert_eq!(params, vec![json!("2021-01-01T00:00:00.000000Z")]);
    }

    #[test]
    fn null_set_items_render_as_sql_null() {
        let predicate = translate(&[FilterExpr::new("id", FilterOp::NotIn, json!([1, null]))], Combinator::And)
            .unwrap();
        let (sql, params) = FilterWhere::generate(&predicate, 0);
        assert_eq!(sql, "\"id\" NOT IN ($1, NULL)");
        assert_eq!(params, vec![json!(1)]);
    }

    #[test]
    fn non_text_database_types_are_cast() {
        let columns = vec![ColumnInfo::new("gauge_id", "uuid", false)];
        let predicate = FilterWhere::translate(
            &[FilterExpr::new("gauge_id", FilterOp::In, json!(["9b2f0c1e-51c4-4a7e-9a61-0f4d2f5d6c11"]))],
            Combinator::And,
            &columns,
        )
        .unwrap();
        let (sql, _) = FilterWhere::generate(&predicate, 0);
        assert_eq!(sql, "\"gauge_id\" IN (CAST($1 AS uuid))");
    }

    #[test]
    fn empty_sets() {
        let predicate = translate(
            &[
                FilterExpr::new("id", FilterOp::In, json!([])),
                FilterExpr::new("id", FilterOp::NotIn, json!([])),
            ],
            Combinator::And,
        )
        .unwrap();
        let (sql, _) = FilterWhere::generate(&predicate, 0);
        assert_eq!(sql, "1=0 AND 1=1");
    }
}
