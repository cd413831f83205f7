use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::FilterError;

const WHERE_FORMAT_HINT: &str =
    "should be in the form of \"column operator value\" e.g. \"col < 3\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")] Eq,
    #[serde(rename = "!=")] Ne,
    #[serde(rename = "<")] Lt,
    #[serde(rename = "<=")] Lte,
    #[serde(rename = ">")] Gt,
    #[serde(rename = ">=")] Gte,

    #[serde(rename = "LIKE")] Like,
    #[serde(rename = "ILIKE")] ILike,
    #[serde(rename = "NOTLIKE")] NotLike,
    #[serde(rename = "NOTILIKE")] NotILike,
    #[serde(rename = "CONTAINS")] Contains,
    #[serde(rename = "STARTSWITH")] StartsWith,
    #[serde(rename = "ENDSWITH")] EndsWith,

    #[serde(rename = "IN")] In,
    #[serde(rename = "NOTIN")] NotIn,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Like => "LIKE",
            FilterOp::ILike => "ILIKE",
            FilterOp::NotLike => "NOTLIKE",
            FilterOp::NotILike => "NOTILIKE",
            FilterOp::Contains => "CONTAINS",
            FilterOp::StartsWith => "STARTSWITH",
            FilterOp::EndsWith => "ENDSWITH",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOTIN",
        }
    }

    /// Operators that take a sequence of values
    pub fn is_set(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    /// Operators that compare the textual form of a column against a pattern
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            FilterOp::Like
                | FilterOp::ILike
                | FilterOp::NotLike
                | FilterOp::NotILike
                | FilterOp::Contains
                | FilterOp::StartsWith
                | FilterOp::EndsWith
        )
    }
}

impl FromStr for FilterOp {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "=" | "==" => FilterOp::Eq,
            "!=" | "<>" => FilterOp::Ne,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Lte,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Gte,
            "LIKE" => FilterOp::Like,
            "ILIKE" => FilterOp::ILike,
            "NOTLIKE" => FilterOp::NotLike,
            "NOTILIKE" => FilterOp::NotILike,
            "CONTAINS" => FilterOp::Contains,
            "STARTSWITH" => FilterOp::StartsWith,
            "ENDSWITH" => FilterOp::EndsWith,
            "IN" => FilterOp::In,
            "NOTIN" => FilterOp::NotIn,
            _ => return Err(FilterError::UnsupportedOperator(s.to_string())),
        })
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean joining every expression of a filter set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    pub fn to_sql(&self) -> &'static str {
        match self {
            Combinator::And => " AND ",
            Combinator::Or => " OR ",
        }
    }
}

impl FromStr for Combinator {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Combinator::And),
            "OR" => Ok(Combinator::Or),
            other => Err(FilterError::InvalidWhereClause(format!(
                "combinator must be AND or OR, got {}",
                other
            ))),
        }
    }
}

/// One `column operator value` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FilterExpr {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self { column: column.into(), op, value: value.into() }
    }
}

impl FromStr for FilterExpr {
    type Err = FilterError;

    /// Parses the textual form `column operator value`. Tokens are split the way a
    /// shell would, so `title = 'Rivers of Canada'` is three tokens. Set operators
    /// take a comma separated value: `id IN 1,2,3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = split_words(s)?;
        if tokens.len() != 3 {
            return Err(FilterError::InvalidWhereClause(format!(
                "'{}' {}",
                s, WHERE_FORMAT_HINT
            )));
        }
        let mut tokens = tokens.into_iter();
        let column = tokens.next().unwrap_or_default();
        let op: FilterOp = tokens.next().unwrap_or_default().parse()?;
        let raw = tokens.next().unwrap_or_default();

        let value = if op.is_set() {
            Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| Value::String(v.to_string()))
                    .collect(),
            )
        } else {
            Value::String(raw)
        };

        Ok(Self { column, op, value })
    }
}

/// Shell-style word splitting: whitespace separates words, single quotes are
/// literal, double quotes honour backslash escapes.
fn split_words(input: &str) -> Result<Vec<String>, FilterError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated(input)),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(unterminated(input)),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated(input)),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            ch => {
                in_word = true;
                current.push(ch);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unterminated(input: &str) -> FilterError {
    FilterError::InvalidWhereClause(format!("unterminated quote in '{}'", input))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else {
            Err(FilterError::InvalidOrder(format!("sort must be asc or desc, got {}", s)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOrderInfo {
    pub column: String,
    #[serde(default)]
    pub sort: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
        }
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
        }
    }
}

impl FromStr for AggregateFunc {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "count" => AggregateFunc::Count,
            "sum" => AggregateFunc::Sum,
            "avg" | "mean" => AggregateFunc::Avg,
            "min" => AggregateFunc::Min,
            "max" => AggregateFunc::Max,
            _ => return Err(FilterError::InvalidAggregate(format!("unsupported function {}", s))),
        })
    }
}

/// An aggregate function applied to one column, `*` only for count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub column: String,
    pub func: AggregateFunc,
}

impl Aggregate {
    pub fn new(column: impl Into<String>, func: AggregateFunc) -> Self {
        Self { column: column.into(), func }
    }

    /// Output column name, e.g. `sum_population` or `count` for `count(*)`
    pub fn alias(&self) -> String {
        if self.column == "*" {
            self.func.as_str().to_string()
        } else {
            format!("{}_{}", self.func.as_str(), self.column)
        }
    }
}

/// A read request as it arrives from callers, before validation against a table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterData {
    /// `None` selects every column, an empty list selects only grouped/aggregated output
    pub select: Option<Vec<String>>,
    #[serde(rename = "where", default)]
    pub where_clause: Vec<FilterExpr>,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregate: Vec<Aggregate>,
    #[serde(default)]
    pub order: Vec<FilterOrderInfo>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl FilterData {
    pub fn with_where(mut self, expr: FilterExpr) -> Self {
        self.where_clause.push(expr);
        self
    }

    pub fn with_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_aggregate(mut self, column: impl Into<String>, func: AggregateFunc) -> Self {
        self.aggregate.push(Aggregate::new(column, func));
        self
    }

    pub fn with_order(mut self, column: impl Into<String>, sort: SortDirection) -> Self {
        self.order.push(FilterOrderInfo { column: column.into(), sort });
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}
