use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

use crate::database::dynamic::{bind_all, row_to_record};
use crate::database::error::DataError;
use crate::database::models::column::{ColumnInfo, ColumnSpec};
use crate::database::query_builder::{QueryBuilder, MAX_BIND_PARAMS};
use crate::database::store::TableStore;
use crate::filter::types::SqlResult;
use crate::filter::{Filter, Predicate};
use crate::types::Record;

/// Table store backed by a PostgreSQL pool. Each write runs in its own transaction,
/// which rolls back when dropped before commit.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    log_queries: bool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, log_queries: false }
    }

    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    fn log(&self, sql: &SqlResult) {
        if self.log_queries {
            debug!(params = sql.params.len(), "SQL: {}", sql.query);
        }
    }

    async fn execute(&self, conn: &mut PgConnection, sql: &SqlResult) -> Result<u64, DataError> {
        self.log(sql);
        let result = bind_all(sqlx::query(&sql.query), &sql.params).execute(conn).await?;
        Ok(result.rows_affected())
    }

    async fn insert_rows(
        &self,
        conn: &mut PgConnection,
        table: &str,
        columns: &[ColumnInfo],
        rows: &[Record],
    ) -> Result<u64, DataError> {
        let touched = QueryBuilder::insert_columns(columns, rows);
        if touched.is_empty() {
            let mut inserted = 0;
            for _ in rows {
                inserted += self.execute(&mut *conn, &QueryBuilder::insert(table, &[], &[])).await?;
            }
            return Ok(inserted);
        }

        let batch_size = (MAX_BIND_PARAMS / touched.len()).max(1);
        let mut inserted = 0;
        for batch in rows.chunks(batch_size) {
            let sql = QueryBuilder::insert(table, &touched, batch);
            inserted += self.execute(&mut *conn, &sql).await?;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl TableStore for PgStore {
    async fn columns(&self, table: &str) -> Result<Option<Vec<ColumnInfo>>, DataError> {
        let rows = sqlx::query(
            "SELECT column_name::text AS column_name, \
             CASE WHEN data_type IN ('USER-DEFINED', 'ARRAY') \
                  THEN format('%I.%I', udt_schema, udt_name) \
                  ELSE data_type::text END AS data_type, \
             is_nullable::text AS is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        let columns = rows
            .iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("data_type")?;
                let nullable: String = row.try_get("is_nullable")?;
                Ok(ColumnInfo::new(name, data_type, nullable == "YES"))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(Some(columns))
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[Record],
    ) -> Result<u64, DataError> {
        let mut tx = self.pool.begin().await?;
        let ddl = SqlResult {
            query: QueryBuilder::create_table(table, columns),
            params: vec![],
        };
        self.execute(&mut tx, &ddl).await?;

        let infos: Vec<ColumnInfo> = columns.iter().map(ColumnSpec::info).collect();
        let inserted = self.insert_rows(&mut tx, table, &infos, rows).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn drop_table(&self, table: &str) -> Result<(), DataError> {
        let mut conn = self.pool.acquire().await?;
        let sql = SqlResult { query: QueryBuilder::drop_table(table), params: vec![] };
        self.execute(&mut conn, &sql).await?;
        Ok(())
    }

    async fn insert(&self, table: &str, columns: &[ColumnInfo], rows: &[Record]) -> Result<u64, DataError> {
        let mut tx = self.pool.begin().await?;
        let inserted = self.insert_rows(&mut tx, table, columns, rows).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn select(&self, filter: &Filter) -> Result<Vec<Record>, DataError> {
        let sql = filter.to_sql();
        self.log(&sql);

        let mut conn = self.pool.acquire().await?;
        let mut stream = bind_all(sqlx::query(&sql.query), &sql.params).fetch(&mut *conn);
        let mut records = Vec::new();
        while let Some(row) = stream.try_next().await? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn update(
        &self,
        table: &str,
        columns: &[ColumnInfo],
        values: &Record,
        predicate: &Predicate,
    ) -> Result<u64, DataError> {
        let sql = QueryBuilder::update(table, columns, values, predicate);
        let mut tx = self.pool.begin().await?;
        let updated = self.execute(&mut tx, &sql).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete(&self, table: &str, predicate: &Predicate) -> Result<u64, DataError> {
        let sql = QueryBuilder::delete(table, predicate);
        let mut tx = self.pool.begin().await?;
        let deleted = self.execute(&mut tx, &sql).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn count(&self, table: &str) -> Result<u64, DataError> {
        let row = sqlx::query(&QueryBuilder::count(table)).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn health_check(&self) -> Result<(), DataError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
