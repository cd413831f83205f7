use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::database::{ColumnInfo, DataError, Selection, TableExecutor};
use crate::filter::{FilterData, FilterExpr, FilterOp};
use crate::types::{Caller, Record};

/// Whether callers without privilege may read restricted tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    #[default]
    Deny,
    Allow,
}

/// Tables that only superusers may write (and, by default, read)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Restrictions {
    tables: Vec<String>,
    read_policy: ReadPolicy,
}

impl Restrictions {
    pub fn new(tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            read_policy: ReadPolicy::Deny,
        }
    }

    pub fn with_read_policy(mut self, read_policy: ReadPolicy) -> Self {
        self.read_policy = read_policy;
        self
    }

    pub fn is_restricted(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }

    pub fn check_write(&self, table: &str, caller: Option<&Caller>) -> Result<(), DataError> {
        if self.is_restricted(table) && !Caller::is_privileged(caller) {
            warn!("Denied write to restricted dataset {}", table);
            return Err(DataError::authorization(format!("Dataset {} is restricted", table)));
        }
        Ok(())
    }

    pub fn check_read(&self, table: &str, caller: Option<&Caller>) -> Result<(), DataError> {
        if self.read_policy == ReadPolicy::Allow {
            return Ok(());
        }
        if self.is_restricted(table) && !Caller::is_privileged(caller) {
            warn!("Denied read of restricted dataset {}", table);
            return Err(DataError::authorization(format!("Dataset {} is restricted", table)));
        }
        Ok(())
    }
}

/// Dataset operations guarded by a restriction list. Checks run before any I/O.
#[derive(Clone)]
pub struct DatasetService {
    executor: TableExecutor,
    restrictions: Restrictions,
}

impl DatasetService {
    pub fn new(executor: TableExecutor, restrictions: Restrictions) -> Self {
        Self { executor, restrictions }
    }

    pub async fn create(&self, caller: Option<&Caller>, dataset: &str, rows: &[Record]) -> Result<u64, DataError> {
        self.restrictions.check_write(dataset, caller)?;
        self.executor.create(dataset, rows).await
    }

    pub async fn insert(&self, caller: Option<&Caller>, dataset: &str, rows: &[Record]) -> Result<u64, DataError> {
        self.restrictions.check_write(dataset, caller)?;
        self.executor.insert(dataset, rows).await
    }

    pub async fn query(
        &self,
        caller: Option<&Caller>,
        dataset: &str,
        data: FilterData,
    ) -> Result<Vec<Record>, DataError> {
        self.restrictions.check_read(dataset, caller)?;
        self.executor.read(dataset, data).await
    }

    /// Rows whose `id_column` equals `id`
    pub async fn get_by_id(
        &self,
        caller: Option<&Caller>,
        dataset: &str,
        id_column: &str,
        id: &str,
    ) -> Result<Vec<Record>, DataError> {
        self.restrictions.check_read(dataset, caller)?;
        let data = FilterData::default().with_where(FilterExpr::new(id_column, FilterOp::Eq, Value::from(id)));
        self.executor.read(dataset, data).await
    }

    pub async fn columns(&self, caller: Option<&Caller>, dataset: &str) -> Result<Vec<ColumnInfo>, DataError> {
        self.restrictions.check_read(dataset, caller)?;
        self.executor.columns(dataset).await
    }

    pub async fn rows(&self, caller: Option<&Caller>, dataset: &str) -> Result<u64, DataError> {
        self.restrictions.check_read(dataset, caller)?;
        self.executor.count(dataset).await
    }

    pub async fn update(
        &self,
        caller: Option<&Caller>,
        dataset: &str,
        selection: Selection,
        values: &Record,
    ) -> Result<u64, DataError> {
        self.restrictions.check_write(dataset, caller)?;
        self.executor.update(dataset, selection, values).await
    }

    pub async fn delete(&self, caller: Option<&Caller>, dataset: &str, selection: Selection) -> Result<u64, DataError> {
        self.restrictions.check_write(dataset, caller)?;
        self.executor.delete(dataset, selection).await
    }

    pub async fn drop(&self, caller: Option<&Caller>, dataset: &str) -> Result<(), DataError> {
        self.restrictions.check_write(dataset, caller)?;
        self.executor.drop(dataset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_executor, records, superuser, user};
    use serde_json::json;

    async fn service(restrictions: Restrictions) -> DatasetService {
        let executor = memory_executor();
        for table in ["data", "rivers"] {
            executor
                .create(table, &records(json!([{"id": "1", "name": table}])))
                .await
                .unwrap();
        }
        DatasetService::new(executor, restrictions)
    }

    #[tokio::test]
    async fn restricted_writes_need_superuser() {
        let service = service(Restrictions::new(["data", "user"])).await;
        let rows = records(json!([{"id": "2", "name": "x"}]));

        for caller in [None, Some(user())] {
            let err = service.insert(caller.as_ref(), "data", &rows).await.unwrap_err();
            assert!(matches!(err, DataError::Authorization(_)));
            let err = service.drop(caller.as_ref(), "data").await.unwrap_err();
            assert!(matches!(err, DataError::Authorization(_)));
            let err = service.create(caller.as_ref(), "user", &rows).await.unwrap_err();
            assert!(matches!(err, DataError::Authorization(_)));
        }
        assert_eq!(service.insert(Some(&superuser()), "data", &rows).await.unwrap(), 1);
        assert_eq!(service.insert(None, "rivers", &rows).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn restricted_reads_follow_policy() {
        let denying = service(Restrictions::new(["data"])).await;
        let err = denying.query(Some(&user()), "data", FilterData::default()).await.unwrap_err();
        assert!(matches!(err, DataError::Authorization(_)));
        assert!(denying.query(Some(&superuser()), "data", FilterData::default()).await.is_ok());
        assert!(denying.rows(None, "rivers").await.is_ok());

        let allowing = service(Restrictions::new(["data"]).with_read_policy(ReadPolicy::Allow)).await;
        assert_eq!(allowing.rows(None, "data").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_by_id_coerces_identifier() {
        let service = service(Restrictions::default()).await;
        let found = service.get_by_id(None, "rivers", "id", "1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["name"], json!("rivers"));
        assert!(service.get_by_id(None, "rivers", "id", "9").await.unwrap().is_empty());
    }
}
