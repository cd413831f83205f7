use thiserror::Error;

use crate::filter::FilterError;

/// Failure kinds of the data layer. Transport-specific status mapping lives with the routes.
#[derive(Debug, Error)]
pub enum DataError {
    /// Malformed filter, column, operator or row shape
    #[error("Validation error: {0}")]
    Validation(String),

    /// Table or metadata row absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate create
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Restricted dataset, insufficient privilege
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// The underlying store failed
    #[error("Database error: {0}")]
    Upstream(sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    pub fn validation(message: impl Into<String>) -> Self {
        DataError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        DataError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DataError::Conflict(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        DataError::Authorization(message.into())
    }

    pub fn dataset_not_found(table: &str) -> Self {
        DataError::NotFound(format!("Dataset {} not found", table))
    }
}

impl From<FilterError> for DataError {
    fn from(err: FilterError) -> Self {
        DataError::Validation(err.to_string())
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // unique_violation, duplicate_table
            if matches!(db.code().as_deref(), Some("23505") | Some("42P07")) {
                return DataError::Conflict(db.message().to_string());
            }
        }
        DataError::Upstream(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_errors_are_validation() {
        let err: DataError = FilterError::UnsupportedOperator("~".to_string()).into();
        assert!(matches!(err, DataError::Validation(msg) if msg.contains("~")));
    }

    #[test]
    fn driver_errors_are_upstream() {
        let err: DataError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DataError::Upstream(sqlx::Error::PoolTimedOut)));
    }
}
