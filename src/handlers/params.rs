use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;
use crate::filter::{Combinator, FilterData, FilterExpr, FilterOrder};

/// Query string pairs in arrival order. Keys may repeat: `?select=a&select=b`.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for QueryParams {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::parse(parts.uri.query().unwrap_or_default()))
    }
}

impl QueryParams {
    pub fn parse(query: &str) -> Self {
        let pairs = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn all(&self, key: &str) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn required(&self, key: &str) -> Result<&str, ApiError> {
        match self.first(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ApiError::bad_request(format!("Missing query parameter {}", key))),
        }
    }

    /// Boolean switch, false when absent
    pub fn flag(&self, key: &str) -> Result<bool, ApiError> {
        match self.first(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
            Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
            Some(v) => Err(ApiError::bad_request(format!("{} must be true or false, got {}", key, v))),
        }
    }

    pub fn number(&self, key: &str) -> Result<Option<i64>, ApiError> {
        self.first(key)
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|_| ApiError::bad_request(format!("{} must be an integer, got {}", key, v)))
            })
            .transpose()
    }

    /// Each `where` value parsed as `column operator value`
    pub fn filters(&self) -> Result<Vec<FilterExpr>, ApiError> {
        self.all("where")
            .iter()
            .map(|raw| raw.parse::<FilterExpr>().map_err(ApiError::from))
            .collect()
    }

    pub fn combinator(&self) -> Result<Combinator, ApiError> {
        match self.first("where-boolean") {
            Some(raw) => Ok(raw.parse()?),
            None => Ok(Combinator::default()),
        }
    }

    /// A read request from the query string. Aggregation keys are only honoured
    /// when `aggregates` is set; other routes ignore them.
    pub fn filter_data(&self, aggregates: bool) -> Result<FilterData, ApiError> {
        let select = self.all("select");
        let mut data = FilterData {
            select: if select.is_empty() || select.iter().any(|c| c == "*") {
                None
            } else if select.iter().all(|c| c == "None") {
                // Only grouped and aggregated output
                Some(vec![])
            } else {
                Some(select)
            },
            where_clause: self.filters()?,
            combinator: self.combinator()?,
            order: FilterOrder::from_lists(&self.all("order-by"), &self.all("order-by-sort"))?,
            limit: self.number("limit")?,
            offset: self.number("offset")?,
            ..Default::default()
        };

        if aggregates {
            data.group_by = self.all("group-by");
            let columns = self.all("aggregate");
            let funcs = self.all("aggregate-func");
            if columns.len() != funcs.len() {
                return Err(ApiError::bad_request(format!(
                    "{} aggregate columns given with {} aggregate functions",
                    columns.len(),
                    funcs.len()
                )));
            }
            for (column, func) in columns.into_iter().zip(funcs) {
                data = data.with_aggregate(column, func.parse()?);
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AggregateFunc, FilterOp, SortDirection};
    use serde_json::json;

    #[test]
    fn parses_repeated_keys_and_encoding() {
        let params = QueryParams::parse("select=a&select=b&where=name%20%3D%20%27St.%20Lawrence%27");
        assert_eq!(params.all("select"), vec!["a", "b"]);
        let filters = params.filters().unwrap();
        assert_eq!(filters, vec![FilterExpr::new("name", FilterOp::Eq, json!("St. Lawrence"))]);
    }

    #[test]
    fn builds_filter_data() {
        let params = QueryParams::parse(
            "select=*&where=len+>+100&where=name+IN+a,b&where-boolean=or\
             &group-by=basin&aggregate=len&aggregate-func=sum\
             &order-by=basin&order-by-sort=desc&limit=5&offset=2",
        );
        let data = params.filter_data(true).unwrap();
        assert_eq!(data.select, None);
        assert_eq!(data.where_clause.len(), 2);
        assert_eq!(data.where_clause[1].value, json!(["a", "b"]));
        assert_eq!(data.combinator, Combinator::Or);
        assert_eq!(data.group_by, vec!["basin"]);
        assert_eq!(data.aggregate[0].func, AggregateFunc::Sum);
        assert_eq!(data.order[0].sort, SortDirection::Desc);
        assert_eq!((data.limit, data.offset), (Some(5), Some(2)));

        let plain = params.filter_data(false).unwrap();
        assert!(plain.group_by.is_empty() && plain.aggregate.is_empty());
    }

    #[test]
    fn select_none_means_aggregates_only() {
        let params = QueryParams::parse("select=None&aggregate=len&aggregate-func=max");
        let data = params.filter_data(true).unwrap();
        assert_eq!(data.select, Some(vec![]));
    }

    #[test]
    fn rejects_malformed_parameters() {
        for query in [
            "aggregate=len",
            "aggregate=len&aggregate-func=median",
            "where=len",
            "where=len+~+3",
            "where-boolean=xor",
            "limit=ten",
            "order-by-sort=asc",
        ] {
            let err = QueryParams::parse(query).filter_data(true).unwrap_err();
            assert!(
                matches!(err, ApiError::BadRequest(_) | ApiError::ValidationError(_)),
                "{} gave {:?}",
                query,
                err
            );
        }
    }

    #[test]
    fn flags() {
        let params = QueryParams::parse("delete_all=true&match-all=0&bad=maybe");
        assert!(params.flag("delete_all").unwrap());
        assert!(!params.flag("match-all").unwrap());
        assert!(!params.flag("missing").unwrap());
        assert!(params.flag("bad").is_err());
    }
}
