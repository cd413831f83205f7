//! Conversion between JSON values and PostgreSQL rows for tables whose
//! shape is only known at runtime.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::types::BigDecimal;
use sqlx::{Column, Row, TypeInfo};
use uuid::Uuid;

use crate::database::error::DataError;
use crate::database::models::column::format_timestamp;
use crate::types::Record;

pub type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, PgArguments>;

/// Bind one JSON parameter. Objects and arrays travel as JSONB.
pub fn bind_param<'q>(q: PgQuery<'q>, v: &'q Value) -> PgQuery<'q> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}

pub fn bind_all<'q>(mut q: PgQuery<'q>, params: &'q [Value]) -> PgQuery<'q> {
    for p in params {
        q = bind_param(q, p);
    }
    q
}

/// Convert a row into a JSON map keyed by column name. Reads cast types with
/// no decoder here to text, so a failure is a real upstream error.
pub fn row_to_record(row: &PgRow) -> Result<Record, DataError> {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, i, column.type_info().name()).map_err(|e| {
            tracing::error!("Could not decode column {} of type {}: {}", column.name(), column.type_info().name(), e);
            DataError::Upstream(e)
        })?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

fn decode_column(row: &PgRow, i: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let decoded: Result<Option<Value>, sqlx::Error> = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(i).map(|v| v.map(Value::from)),
        "INT4" => row.try_get::<Option<i32>, _>(i).map(|v| v.map(Value::from)),
        "INT8" => row.try_get::<Option<i64>, _>(i).map(|v| v.map(Value::from)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)
            .map(|v| v.map(|f| float_value(f as f64))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(i).map(|v| v.map(float_value)),
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(i)
            .map(|v| v.map(|d| numeric_value(&d))),
        "BOOL" => row.try_get::<Option<bool>, _>(i).map(|v| v.map(Value::Bool)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)
            .map(|v| v.map(|dt| Value::String(format_timestamp(dt)))),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(i)
            .map(|v| v.map(|dt| Value::String(format_timestamp(dt.and_utc())))),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(i)
            .map(|v| v.map(|d| Value::String(d.to_string()))),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(i)
            .map(|v| v.map(|u| Value::String(u.to_string()))),
        _ => row.try_get::<Option<String>, _>(i).map(|v| v.map(Value::String)),
    };

    Ok(decoded?.unwrap_or(Value::Null))
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn numeric_value(d: &BigDecimal) -> Value {
    let text = d.to_string();
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    text.parse::<f64>().map(float_value).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn numeric_prefers_integers() {
        assert_eq!(numeric_value(&BigDecimal::from_str("42").unwrap()), Value::from(42));
        assert_eq!(numeric_value(&BigDecimal::from_str("2.5").unwrap()), Value::from(2.5));
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(float_value(f64::NAN), Value::Null);
    }
}
