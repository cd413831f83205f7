use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::metadata::MetadataFields;
use super::params::QueryParams;
use crate::app::AppState;
use crate::config::Route;
use crate::database::{DataError, Selection};
use crate::error::ApiError;
use crate::middleware::{require_access, ApiResponse, ApiResult, CurrentCaller};
use crate::types::Record;

/// Body of `POST /data?dataset=NAME`
#[derive(Debug, Deserialize)]
pub struct DataCreate {
    #[serde(flatten)]
    pub metadata: MetadataFields,
    pub data: Vec<Record>,
}

/// POST /data?dataset=NAME - create a dataset from rows and record its metadata
pub async fn create(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    params: QueryParams,
    Json(body): Json<DataCreate>,
) -> ApiResult<Record> {
    require_access(&state, Route::Create, caller.as_ref())?;
    let dataset = params.required("dataset")?;

    state.datasets(Route::Create).create(caller.as_ref(), dataset, &body.data).await?;

    let mut fields = body.metadata.into_record();
    if let Some(caller) = &caller {
        fields.insert("created_by".to_string(), Value::from(caller.email.as_str()));
    }
    match state.metadata().create(dataset, fields).await {
        Ok(record) => {
            info!("Created dataset {} with {} rows", dataset, body.data.len());
            Ok(ApiResponse::created(record))
        }
        Err(err) => {
            // Leave no dataset behind without its metadata
            if let Err(drop_err) = state.executor().drop(dataset).await {
                warn!("Failed to drop {} after metadata error: {}", dataset, drop_err);
            }
            Err(err.into())
        }
    }
}

/// GET /data/:dataset - filtered, aggregated and sorted read
pub async fn query(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(dataset): Path<String>,
    params: QueryParams,
) -> ApiResult<Vec<Record>> {
    require_access(&state, Route::Query, caller.as_ref())?;
    let data = params.filter_data(true)?;
    let rows = state.datasets(Route::Query).query(caller.as_ref(), &dataset, data).await?;
    Ok(ApiResponse::success(rows))
}

/// PUT /data/:dataset?where=... - set the body's columns on matching rows.
/// `match-all=true` updates every row and cannot be combined with `where`.
pub async fn update(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(dataset): Path<String>,
    params: QueryParams,
    Json(values): Json<Record>,
) -> ApiResult<Value> {
    require_access(&state, Route::Update, caller.as_ref())?;
    let filters = params.filters()?;
    let selection = if params.flag("match-all")? {
        if !filters.is_empty() {
            return Err(ApiError::bad_request("match-all cannot be combined with where"));
        }
        Selection::All
    } else {
        Selection::matching(filters, params.combinator()?)
    };

    let updated = state
        .datasets(Route::Update)
        .update(caller.as_ref(), &dataset, selection, &values)
        .await?;
    state.metadata().touch(&dataset).await?;
    Ok(ApiResponse::success(json!({ "updated": updated })))
}

/// DELETE /data/:dataset - remove matching rows, every row without `where`,
/// or the whole dataset and its metadata with `delete_all=true`
pub async fn delete(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(dataset): Path<String>,
    params: QueryParams,
) -> ApiResult<Value> {
    require_access(&state, Route::Delete, caller.as_ref())?;
    let service = state.datasets(Route::Delete);

    if params.flag("delete_all")? {
        service.drop(caller.as_ref(), &dataset).await?;
        // The drop has already happened, so a missing record is only logged
        match state.metadata().delete(&dataset).await {
            Ok(_) => {}
            Err(DataError::NotFound(_)) => warn!("Dropped dataset {} had no metadata", dataset),
            Err(e) => return Err(e.into()),
        }
        info!("Dropped dataset {}", dataset);
        return Ok(ApiResponse::success(json!({ "dropped": dataset })));
    }

    let filters = params.filters()?;
    let selection = if filters.is_empty() {
        Selection::All
    } else {
        Selection::matching(filters, params.combinator()?)
    };
    let deleted = service.delete(caller.as_ref(), &dataset, selection).await?;
    state.metadata().touch(&dataset).await?;
    Ok(ApiResponse::success(json!({ "deleted": deleted })))
}

/// PUT /data/:dataset/insert - append rows
pub async fn insert(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(dataset): Path<String>,
    Json(rows): Json<Vec<Record>>,
) -> ApiResult<Value> {
    require_access(&state, Route::Insert, caller.as_ref())?;
    let inserted = state.datasets(Route::Insert).insert(caller.as_ref(), &dataset, &rows).await?;
    state.metadata().touch(&dataset).await?;
    Ok(ApiResponse::success(json!({ "inserted": inserted })))
}

/// GET /data/:dataset/id/:id?id_column=id
pub async fn get_by_id(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path((dataset, id)): Path<(String, String)>,
    params: QueryParams,
) -> ApiResult<Vec<Record>> {
    require_access(&state, Route::Id, caller.as_ref())?;
    let id_column = params.first("id_column").unwrap_or("id");
    let rows = state
        .datasets(Route::Id)
        .get_by_id(caller.as_ref(), &dataset, id_column, &id)
        .await?;
    Ok(ApiResponse::success(rows))
}

/// GET /data/:dataset/columns - column names in table order
pub async fn columns(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(dataset): Path<String>,
) -> ApiResult<Vec<String>> {
    require_access(&state, Route::Columns, caller.as_ref())?;
    let columns = state.datasets(Route::Columns).columns(caller.as_ref(), &dataset).await?;
    Ok(ApiResponse::success(columns.into_iter().map(|c| c.name).collect()))
}

/// GET /data/:dataset/rows - row count
pub async fn rows(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(dataset): Path<String>,
) -> ApiResult<u64> {
    require_access(&state, Route::Rows, caller.as_ref())?;
    let count = state.datasets(Route::Rows).rows(caller.as_ref(), &dataset).await?;
    Ok(ApiResponse::success(count))
}
