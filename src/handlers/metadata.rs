use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params::QueryParams;
use crate::app::AppState;
use crate::config::Route;
use crate::middleware::{require_access, ApiResponse, ApiResult, CurrentCaller};
use crate::types::Record;

/// Client-editable metadata. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl MetadataFields {
    pub fn into_record(self) -> Record {
        let mut record = Record::new();
        let fields = [
            ("title", self.title),
            ("description", self.description),
            ("source", self.source),
            ("tags", self.tags),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                record.insert(key.to_string(), Value::String(value));
            }
        }
        record
    }
}

/// GET /data - search dataset metadata
pub async fn search(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    params: QueryParams,
) -> ApiResult<Vec<Record>> {
    require_access(&state, Route::Search, caller.as_ref())?;
    let data = params.filter_data(false)?;
    Ok(ApiResponse::success(state.metadata().search(data).await?))
}

/// GET /data/:dataset/metadata
pub async fn get(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(dataset): Path<String>,
) -> ApiResult<Record> {
    require_access(&state, Route::Metadata, caller.as_ref())?;
    Ok(ApiResponse::success(state.metadata().get(&dataset).await?))
}

/// PUT /data/:dataset/metadata
pub async fn update(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(dataset): Path<String>,
    Json(fields): Json<MetadataFields>,
) -> ApiResult<Record> {
    require_access(&state, Route::MetadataUpdate, caller.as_ref())?;
    let record = state.metadata().update(&dataset, fields.into_record()).await?;
    Ok(ApiResponse::success(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_present_fields_are_written() {
        let fields: MetadataFields = serde_json::from_value(json!({"title": "Rivers", "tags": null})).unwrap();
        let record = fields.into_record();
        assert_eq!(Value::Object(record), json!({"title": "Rivers"}));
    }
}
