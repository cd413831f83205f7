mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use common::{expect_data, expect_error, rivers, TestServer};

#[tokio::test]
async fn metadata_get_and_update() -> Result<()> {
    let server = TestServer::spawn().await?;
    let created = server.create_dataset("rivers", rivers()).await?;
    assert_eq!(created["created_at"], created["updated_at"]);
    assert_eq!(created["created_by"], json!(null));

    let res = server
        .client
        .put(server.url("/data/rivers/metadata"))
        .json(&json!({"description": "Major Canadian rivers", "tags": "hydrology"}))
        .send()
        .await?;
    let updated = expect_data(res, StatusCode::OK).await?;
    assert_eq!(updated["title"], json!("rivers title"));
    assert_eq!(updated["description"], json!("Major Canadian rivers"));
    assert_eq!(updated["created_at"], created["created_at"]);
    assert!(updated["updated_at"].as_str() > created["updated_at"].as_str());

    let res = server.client.get(server.url("/data/rivers/metadata")).send().await?;
    assert_eq!(expect_data(res, StatusCode::OK).await?, updated);
    Ok(())
}

#[tokio::test]
async fn metadata_for_missing_dataset() -> Result<()> {
    let server = TestServer::spawn().await?;

    let res = server.client.get(server.url("/data/lakes/metadata")).send().await?;
    assert_eq!(expect_error(res, StatusCode::NOT_FOUND).await?, "NOT_FOUND");

    let res = server
        .client
        .put(server.url("/data/lakes/metadata"))
        .json(&json!({"title": "Lakes"}))
        .send()
        .await?;
    expect_error(res, StatusCode::NOT_FOUND).await?;
    Ok(())
}

#[tokio::test]
async fn search_by_name_column() -> Result<()> {
    let server = TestServer::spawn_with(|config| config.metadata.name_column = "name".to_string()).await?;
    server.create_dataset("rivers", rivers()).await?;
    server.create_dataset("lakes", json!([{"name": "Erie"}])).await?;

    let res = server
        .client
        .get(server.url("/data"))
        .query(&[("where", "name = rivers")])
        .send()
        .await?;
    let found = expect_data(res, StatusCode::OK).await?;
    assert_eq!(found.as_array().map(Vec::len), Some(1));
    assert_eq!(found[0]["name"], json!("rivers"));

    let res = server
        .client
        .get(server.url("/data"))
        .query(&[("select", "name"), ("order-by", "name"), ("order-by-sort", "desc")])
        .send()
        .await?;
    assert_eq!(expect_data(res, StatusCode::OK).await?, json!([{"name": "rivers"}, {"name": "lakes"}]));
    Ok(())
}

#[tokio::test]
async fn search_ignores_aggregation_parameters() -> Result<()> {
    let server = TestServer::spawn().await?;
    server.create_dataset("rivers", rivers()).await?;

    let res = server
        .client
        .get(server.url("/data"))
        .query(&[("select", "dataset"), ("group-by", "title")])
        .send()
        .await?;
    assert_eq!(expect_data(res, StatusCode::OK).await?, json!([{"dataset": "rivers"}]));
    Ok(())
}
