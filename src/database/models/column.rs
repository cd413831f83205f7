use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::filter::Filter;

/// Logical type of a column, as far as value coercion is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Timestamp,
    Json,
}

impl ColumnType {
    /// Map an `information_schema.columns.data_type` value
    pub fn from_sql_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" => ColumnType::Integer,
            "real" | "double precision" | "numeric" | "decimal" | "float4" | "float8" => {
                ColumnType::Float
            }
            "boolean" | "bool" => ColumnType::Boolean,
            "json" | "jsonb" => ColumnType::Json,
            t if t.starts_with("timestamp") || t == "date" => ColumnType::Timestamp,
            _ => ColumnType::Text,
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "bigint",
            ColumnType::Float => "double precision",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp with time zone",
            ColumnType::Json => "jsonb",
        }
    }

    /// Type suggested by a JSON value; `None` for null
    pub fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnType::Integer),
            Value::Number(_) => Some(ColumnType::Float),
            Value::String(_) => Some(ColumnType::Text),
            Value::Array(_) | Value::Object(_) => Some(ColumnType::Json),
        }
    }

    /// Common type of two observed types, integers widen to floats
    pub fn widen(self, other: ColumnType) -> Option<ColumnType> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ColumnType::Integer, ColumnType::Float) | (ColumnType::Float, ColumnType::Integer) => {
                Some(ColumnType::Float)
            }
            _ => None,
        }
    }

    /// Convert a value into the representation stored for this type
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            ColumnType::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(format!("{} is not an integer", n)),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("'{}' is not an integer", s)),
                other => Err(format!("{} is not an integer", other)),
            },
            ColumnType::Float => match value {
                Value::Number(n) => n
                    .as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("{} is not a number", n)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{}' is not a number", s)),
                other => Err(format!("{} is not a number", other)),
            },
            ColumnType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" | "yes" => Ok(Value::Bool(true)),
                    "false" | "f" | "0" | "no" => Ok(Value::Bool(false)),
                    _ => Err(format!("'{}' is not a boolean", s)),
                },
                other => Err(format!("{} is not a boolean", other)),
            },
            ColumnType::Text => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(format!("{} is not text", other)),
            },
            ColumnType::Timestamp => match value {
                Value::String(s) => normalize_timestamp(s)
                    .map(Value::String)
                    .ok_or_else(|| format!("'{}' is not a timestamp", s)),
                other => Err(format!("{} is not a timestamp", other)),
            },
            ColumnType::Json => match value {
                Value::Array(_) | Value::Object(_) => Ok(value.clone()),
                other => Err(format!("{} is not a JSON object or array", other)),
            },
        }
    }
}

/// Render a timestamp the way every store returns it: UTC, microseconds
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn normalize_timestamp(s: &str) -> Option<String> {
    parse_timestamp(s).map(format_timestamp)
}

/// A column of a live table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
    /// Database type name, e.g. `timestamp with time zone`
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            column_type: ColumnType::from_sql_type(&data_type),
            data_type,
            nullable,
        }
    }

    /// Bind placeholder for a value destined for this column. Timestamps and
    /// types without a JSON counterpart (uuid, inet, enums, arrays) travel as
    /// text and are cast server side.
    pub fn placeholder(&self, index: usize) -> String {
        if self.column_type == ColumnType::Timestamp || self.reads_as_text() {
            format!("CAST(${} AS {})", index, self.data_type)
        } else {
            format!("${}", index)
        }
    }

    /// Handled as text but stored as some other database type
    pub fn reads_as_text(&self) -> bool {
        self.column_type == ColumnType::Text && !is_text_type(&self.data_type)
    }
}

fn is_text_type(data_type: &str) -> bool {
    let t = data_type.to_ascii_lowercase();
    matches!(t.as_str(), "text" | "varchar" | "bpchar" | "char" | "name") || t.starts_with("character")
}

/// Column definition used when provisioning a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    /// Auto-incrementing integer key
    #[serde(default)]
    pub serial: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            unique: false,
            serial: false,
        }
    }

    pub fn serial_key(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            serial: true,
            ..Self::new(name, ColumnType::Integer)
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn to_ddl(&self) -> String {
        let name = Filter::quote_identifier(&self.name);
        if self.serial {
            return format!("{} BIGSERIAL PRIMARY KEY", name);
        }
        let mut ddl = format!("{} {}", name, self.column_type.sql_type().to_uppercase());
        if self.primary_key {
            ddl.push_str(" PRIMARY KEY");
        } else if self.unique {
            ddl.push_str(" UNIQUE");
        }
        ddl
    }

    pub fn info(&self) -> ColumnInfo {
        ColumnInfo {
            name: self.name.clone(),
            column_type: self.column_type,
            data_type: self.column_type.sql_type().to_string(),
            nullable: !self.primary_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_information_schema_types() {
        assert_eq!(ColumnType::from_sql_type("bigint"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql_type("double precision"), ColumnType::Float);
        assert_eq!(ColumnType::from_sql_type("timestamp without time zone"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_sql_type("character varying"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql_type("jsonb"), ColumnType::Json);
    }

    #[test]
    fn coerces_text_input_to_column_type() {
        assert_eq!(ColumnType::Integer.coerce(&json!("42")).unwrap(), json!(42));
        assert_eq!(ColumnType::Integer.coerce(&json!(3.0)).unwrap(), json!(3));
        assert_eq!(ColumnType::Float.coerce(&json!("2.5")).unwrap(), json!(2.5));
        assert_eq!(ColumnType::Boolean.coerce(&json!("TRUE")).unwrap(), json!(true));
        assert_eq!(ColumnType::Text.coerce(&json!(7)).unwrap(), json!("7"));
        assert!(ColumnType::Integer.coerce(&json!("seven")).is_err());
        assert!(ColumnType::Json.coerce(&json!("scalar")).is_err());
        assert_eq!(ColumnType::Integer.coerce(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn normalizes_timestamps_to_utc_micros() {
        assert_eq!(
            normalize_timestamp("2021-06-01T12:00:00+02:00").as_deref(),
            Some("2021-06-01T10:00:00.000000Z")
        );
        assert_eq!(
            normalize_timestamp("2021-06-01").as_deref(),
            Some("2021-06-01T00:00:00.000000Z")
        );
        assert!(normalize_timestamp("yesterday").is_none());
    }

    #[test]
    fn widens_numeric_types_only() {
        assert_eq!(ColumnType::Integer.widen(ColumnType::Float), Some(ColumnType::Float));
        assert_eq!(ColumnType::Text.widen(ColumnType::Integer), None);
    }

    #[test]
    fn casts_parameters_for_non_text_types() {
        assert_eq!(ColumnInfo::new("name", "text", true).placeholder(1), "$1");
        assert_eq!(ColumnInfo::new("code", "character varying", true).placeholder(2), "$2");
        assert_eq!(ColumnInfo::new("n", "bigint", true).placeholder(3), "$3");
        assert_eq!(ColumnInfo::new("id", "uuid", false).placeholder(1), "CAST($1 AS uuid)");
        assert_eq!(
            ColumnInfo::new("tags", "pg_catalog._int4", true).placeholder(4),
            "CAST($4 AS pg_catalog._int4)"
        );
        assert!(ColumnInfo::new("span", "interval", true).reads_as_text());
        assert!(!ColumnInfo::new("name", "text", true).reads_as_text());
        assert!(!ColumnInfo::new("seen", "date", true).reads_as_text());
    }

    #[test]
    fn renders_ddl() {
        assert_eq!(ColumnSpec::serial_key("id").to_ddl(), "\"id\" BIGSERIAL PRIMARY KEY");
        assert_eq!(
            ColumnSpec::new("dataset", ColumnType::Text).unique().to_ddl(),
            "\"dataset\" TEXT UNIQUE"
        );
    }
}
