use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, MethodRouter},
    Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::config::{AppConfig, Route, RouteSettings, SecurityConfig};
use crate::database::{DataError, TableExecutor, TableStore};
use crate::handlers::{data, metadata};
use crate::middleware::{identity_middleware, ApiResponse, ApiResult};
use crate::services::{DatasetService, MetadataService};

/// Shared state of the HTTP layer
#[derive(Clone)]
pub struct AppState {
    executor: TableExecutor,
    metadata: Arc<MetadataService>,
    routes: Arc<RouteSettings>,
    jwt_secret: Option<Arc<str>>,
}

impl AppState {
    /// Wire services over `store`, creating the metadata table if needed
    pub async fn new(store: Arc<dyn TableStore>, config: &AppConfig) -> Result<Self, DataError> {
        let executor = TableExecutor::new(store)
            .with_max_limit(config.filter.max_limit)
            .with_filter_logging(config.filter.debug_logging);
        let metadata = MetadataService::init(executor.clone(), config.metadata.clone()).await?;
        Ok(Self {
            executor,
            metadata: Arc::new(metadata),
            routes: Arc::new(config.routes.clone()),
            jwt_secret: config.security.jwt_secret.as_deref().map(Arc::from),
        })
    }

    pub fn executor(&self) -> &TableExecutor {
        &self.executor
    }

    pub fn metadata(&self) -> &MetadataService {
        &self.metadata
    }

    pub fn routes(&self) -> &RouteSettings {
        &self.routes
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.jwt_secret.as_deref()
    }

    /// Dataset operations under the restrictions configured for `route`
    pub fn datasets(&self, route: Route) -> DatasetService {
        DatasetService::new(self.executor.clone(), self.routes.restrictions(route))
    }
}

/// Build the application router: data routes under the configured prefix plus `/health`
pub fn router(state: AppState, config: &AppConfig) -> Router {
    let settings = state.routes().clone();
    let enabled = |route: Route| settings.is_enabled(route);

    let mut collection = MethodRouter::<AppState>::new();
    if enabled(Route::Search) {
        collection = collection.get(metadata::search);
    }
    if enabled(Route::Create) {
        collection = collection.post(data::create);
    }

    let mut dataset = MethodRouter::<AppState>::new();
    if enabled(Route::Query) {
        dataset = dataset.get(data::query);
    }
    if enabled(Route::Update) {
        dataset = dataset.put(data::update);
    }
    if enabled(Route::Delete) {
        dataset = dataset.delete(data::delete);
    }

    let mut dataset_metadata = MethodRouter::<AppState>::new();
    if enabled(Route::Metadata) {
        dataset_metadata = dataset_metadata.get(metadata::get);
    }
    if enabled(Route::MetadataUpdate) {
        dataset_metadata = dataset_metadata.put(metadata::update);
    }

    let prefix = config.server.prefix.trim_end_matches('/');
    let mut app = Router::new()
        .route(&format!("{}/", prefix), collection.clone())
        .route(&format!("{}/:dataset", prefix), dataset)
        .route(&format!("{}/:dataset/metadata", prefix), dataset_metadata);
    if !prefix.is_empty() {
        app = app.route(prefix, collection);
    }
    if enabled(Route::Insert) {
        app = app.route(&format!("{}/:dataset/insert", prefix), axum::routing::put(data::insert));
    }
    if enabled(Route::Id) {
        app = app.route(&format!("{}/:dataset/id/:id", prefix), get(data::get_by_id));
    }
    if enabled(Route::Columns) {
        app = app.route(&format!("{}/:dataset/columns", prefix), get(data::columns));
    }
    if enabled(Route::Rows) {
        app = app.route(&format!("{}/:dataset/rows", prefix), get(data::rows));
    }

    let mut app = app
        .route("/health", get(health))
        .layer(from_fn_with_state(state.clone(), identity_middleware))
        .layer(TraceLayer::new_for_http());
    if let Some(cors) = cors_layer(&config.security) {
        app = app.layer(cors);
    }

    info!("Data routes mounted at {}", if prefix.is_empty() { "/" } else { prefix });
    app.with_state(state)
}

fn cors_layer(security: &SecurityConfig) -> Option<CorsLayer> {
    if !security.enable_cors {
        return None;
    }
    if security.cors_origins.is_empty() || security.cors_origins.iter().any(|o| o == "*") {
        return Some(CorsLayer::permissive());
    }
    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

async fn health(State(state): State<AppState>) -> ApiResult<Value> {
    state.executor().store().health_check().await?;
    Ok(ApiResponse::success(json!({
        "status": "ok",
        "store": state.executor().store().backend()
    })))
}
