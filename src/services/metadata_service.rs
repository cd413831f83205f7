use chrono::{Duration, SubsecRound, Utc};
use serde_json::Value;
use tracing::info;

use crate::config::{DeletePolicy, MetadataConfig};
use crate::database::models::column::{format_timestamp, parse_timestamp};
use crate::database::{ColumnSpec, ColumnType, DataError, Selection, TableExecutor};
use crate::filter::{FilterData, FilterExpr, FilterOp};
use crate::types::Record;

/// Descriptive text columns every metadata table carries
pub const DESCRIPTIVE_COLUMNS: [&str; 5] = ["title", "description", "tags", "source", "created_by"];

/// Keeps one descriptive record per dataset in the metadata table
#[derive(Clone)]
pub struct MetadataService {
    executor: TableExecutor,
    config: MetadataConfig,
}

impl MetadataService {
    /// Creates the metadata table when it is missing
    pub async fn init(executor: TableExecutor, config: MetadataConfig) -> Result<Self, DataError> {
        let service = Self { executor, config };
        if !service.executor.exists(&service.config.table).await? {
            match service.executor.create_table(&service.config.table, &service.column_specs()).await {
                Ok(()) => info!("Created metadata table {}", service.config.table),
                // Lost a race with another instance
                Err(DataError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(service)
    }

    pub fn column_specs(&self) -> Vec<ColumnSpec> {
        let mut specs = vec![
            ColumnSpec::serial_key("id"),
            ColumnSpec::new(&self.config.name_column, ColumnType::Text).unique(),
        ];
        specs.extend(DESCRIPTIVE_COLUMNS.iter().map(|c| ColumnSpec::new(*c, ColumnType::Text)));
        specs.push(ColumnSpec::new(&self.config.created_column, ColumnType::Timestamp));
        specs.push(ColumnSpec::new(&self.config.update_column, ColumnType::Timestamp));
        specs
    }

    pub async fn create(&self, dataset: &str, fields: Record) -> Result<Record, DataError> {
        self.reject_managed_fields(&fields)?;
        if self.find(dataset).await?.is_some() {
            return Err(DataError::conflict(format!("Metadata for {} already exists", dataset)));
        }

        let now = Value::String(format_timestamp(Utc::now().trunc_subsecs(6)));
        let mut record = fields;
        record.insert(self.config.name_column.clone(), Value::from(dataset));
        record.insert(self.config.created_column.clone(), now.clone());
        record.insert(self.config.update_column.clone(), now);
        self.executor.insert(&self.config.table, &[record]).await?;
        self.get(dataset).await
    }

    pub async fn get(&self, dataset: &str) -> Result<Record, DataError> {
        self.find(dataset)
            .await?
            .ok_or_else(|| DataError::not_found(format!("No metadata for dataset {}", dataset)))
    }

    /// Metadata records matching a filter request
    pub async fn search(&self, data: FilterData) -> Result<Vec<Record>, DataError> {
        self.executor.read(&self.config.table, data).await
    }

    /// Merge `fields` into the record and advance its update time
    pub async fn update(&self, dataset: &str, fields: Record) -> Result<Record, DataError> {
        self.reject_managed_fields(&fields)?;
        let current = self.get(dataset).await?;
        let mut values = fields;
        values.insert(self.config.update_column.clone(), self.next_update(&current));
        self.executor.update(&self.config.table, self.selection(dataset), &values).await?;
        self.get(dataset).await
    }

    /// Advance the update time after a data write. `false` when there is no record.
    pub async fn touch(&self, dataset: &str) -> Result<bool, DataError> {
        let Some(current) = self.find(dataset).await? else {
            return Ok(false);
        };
        let mut values = Record::new();
        values.insert(self.config.update_column.clone(), self.next_update(&current));
        let updated = self.executor.update(&self.config.table, self.selection(dataset), &values).await?;
        Ok(updated > 0)
    }

    /// Returns whether a record was removed
    pub async fn delete(&self, dataset: &str) -> Result<bool, DataError> {
        let deleted = self.executor.delete(&self.config.table, self.selection(dataset)).await?;
        if deleted == 0 && self.config.delete_policy == DeletePolicy::Strict {
            return Err(DataError::not_found(format!("No metadata for dataset {}", dataset)));
        }
        Ok(deleted > 0)
    }

    async fn find(&self, dataset: &str) -> Result<Option<Record>, DataError> {
        let data = FilterData::default().with_where(self.name_filter(dataset)).with_limit(1);
        Ok(self.executor.read(&self.config.table, data).await?.into_iter().next())
    }

    fn name_filter(&self, dataset: &str) -> FilterExpr {
        FilterExpr::new(&self.config.name_column, FilterOp::Eq, dataset)
    }

    fn selection(&self, dataset: &str) -> Selection {
        Selection::one(self.name_filter(dataset))
    }

    /// Now, or one microsecond past the stored time when the clock has not moved on
    fn next_update(&self, current: &Record) -> Value {
        let now = Utc::now().trunc_subsecs(6);
        let previous = current
            .get(&self.config.update_column)
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        let next = match previous {
            Some(prev) if prev >= now => prev + Duration::microseconds(1),
            _ => now,
        };
        Value::String(format_timestamp(next))
    }

    fn reject_managed_fields(&self, fields: &Record) -> Result<(), DataError> {
        let managed = [
            "id",
            self.config.name_column.as_str(),
            self.config.created_column.as_str(),
            self.config.update_column.as_str(),
        ];
        match fields.keys().find(|k| managed.contains(&k.as_str())) {
            Some(key) => Err(DataError::validation(format!("Field {} is maintained by the server", key))),
            None => Ok(()),
        }
    }
}
