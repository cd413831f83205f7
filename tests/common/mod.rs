#![allow(dead_code)]

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use msdss_data_api::auth::{generate_jwt, Claims};
use msdss_data_api::database::DatabaseManager;
use msdss_data_api::{router, AppConfig, AppState};

pub const JWT_SECRET: &str = "integration-test-secret";

pub struct TestServer {
    pub base_url: String,
    pub client: Client,
}

impl TestServer {
    /// Serve a fresh in-memory store on an ephemeral port
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(configure: impl FnOnce(&mut AppConfig)) -> Result<Self> {
        let mut config = AppConfig::development();
        config.database.url = "memory://".to_string();
        configure(&mut config);

        let store = DatabaseManager::connect(&config.database).await?;
        let state = AppState::new(store, &config).await?;
        let app = router(state, &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.context("failed to bind test listener")?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });

        Ok(Self {
            base_url: format!("http://{}", addr),
            client: Client::new(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create a dataset through the API, asserting 201
    pub async fn create_dataset(&self, dataset: &str, rows: Value) -> Result<Value> {
        let request = self.client.post(self.url("/data"));
        Self::send_create(request, dataset, rows).await
    }

    pub async fn create_dataset_as(&self, dataset: &str, rows: Value, token: &str) -> Result<Value> {
        let request = self.client.post(self.url("/data")).bearer_auth(token);
        Self::send_create(request, dataset, rows).await
    }

    async fn send_create(request: RequestBuilder, dataset: &str, rows: Value) -> Result<Value> {
        let res = request
            .query(&[("dataset", dataset)])
            .json(&json!({ "title": format!("{} title", dataset), "data": rows }))
            .send()
            .await?;
        expect_data(res, StatusCode::CREATED).await
    }
}

/// Assert the status and a success envelope, returning `data`
pub async fn expect_data(res: Response, status: StatusCode) -> Result<Value> {
    let actual = res.status();
    let body = res.json::<Value>().await?;
    assert_eq!(actual, status, "unexpected status, body: {}", body);
    assert_eq!(body["success"], json!(true), "missing success flag: {}", body);
    Ok(body["data"].clone())
}

/// Assert the status and an error envelope, returning its code
pub async fn expect_error(res: Response, status: StatusCode) -> Result<String> {
    let actual = res.status();
    let body = res.json::<Value>().await?;
    assert_eq!(actual, status, "unexpected status, body: {}", body);
    assert_eq!(body["error"], json!(true), "missing error flag: {}", body);
    Ok(body["code"].as_str().unwrap_or_default().to_string())
}

pub fn token(email: &str, superuser: bool) -> String {
    generate_jwt(&Claims::new(email, superuser, 1), JWT_SECRET).expect("token")
}

pub fn rivers() -> Value {
    json!([
        {"id": 1, "name": "St. Lawrence", "basin": "atlantic", "length_km": 3058},
        {"id": 2, "name": "Mackenzie", "basin": "arctic", "length_km": 1738},
        {"id": 3, "name": "Fraser", "basin": "pacific", "length_km": 1375},
        {"id": 4, "name": "Yukon", "basin": "pacific", "length_km": 3185},
        {"id": 5, "name": "Nelson", "basin": "arctic", "length_km": 644}
    ])
}
