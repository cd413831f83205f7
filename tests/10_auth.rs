mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use common::{expect_data, expect_error, rivers, token, TestServer, JWT_SECRET};
use msdss_data_api::config::RouteSettings;

async fn secured() -> Result<TestServer> {
    TestServer::spawn_with(|config| config.security.jwt_secret = Some(JWT_SECRET.to_string())).await
}

#[tokio::test]
async fn routes_need_a_caller_once_identity_is_enabled() -> Result<()> {
    let server = secured().await?;

    let res = server.client.get(server.url("/data")).send().await?;
    assert_eq!(expect_error(res, StatusCode::UNAUTHORIZED).await?, "UNAUTHORIZED");

    let res = server.client.get(server.url("/data")).bearer_auth("not-a-jwt").send().await?;
    expect_error(res, StatusCode::UNAUTHORIZED).await?;

    let res = server
        .client
        .get(server.url("/data"))
        .header("Authorization", "Basic abc")
        .send()
        .await?;
    expect_error(res, StatusCode::UNAUTHORIZED).await?;

    let res = server
        .client
        .get(server.url("/data"))
        .bearer_auth(token("analyst@example.com", false))
        .send()
        .await?;
    assert_eq!(expect_data(res, StatusCode::OK).await?, json!([]));

    // Health stays open
    let res = server.client.get(server.url("/health")).send().await?;
    expect_data(res, StatusCode::OK).await?;
    Ok(())
}

#[tokio::test]
async fn writes_need_a_superuser() -> Result<()> {
    let server = secured().await?;
    let analyst = token("analyst@example.com", false);
    let admin = token("admin@example.com", true);
    let body = json!({ "title": "Rivers", "data": rivers() });

    let res = server
        .client
        .post(server.url("/data"))
        .query(&[("dataset", "rivers")])
        .bearer_auth(&analyst)
        .json(&body)
        .send()
        .await?;
    assert_eq!(expect_error(res, StatusCode::FORBIDDEN).await?, "FORBIDDEN");

    let res = server
        .client
        .post(server.url("/data"))
        .query(&[("dataset", "rivers")])
        .bearer_auth(&admin)
        .json(&body)
        .send()
        .await?;
    let metadata = expect_data(res, StatusCode::CREATED).await?;
    assert_eq!(metadata["created_by"], json!("admin@example.com"));

    let res = server.client.get(server.url("/data/rivers/rows")).bearer_auth(&analyst).send().await?;
    assert_eq!(expect_data(res, StatusCode::OK).await?, json!(5));
    Ok(())
}

#[tokio::test]
async fn restricted_tables_are_superuser_only() -> Result<()> {
    let server = secured().await?;
    let analyst = token("analyst@example.com", false);
    let admin = token("admin@example.com", true);

    // The metadata table itself is restricted by default
    let res = server.client.get(server.url("/data/data")).bearer_auth(&analyst).send().await?;
    expect_error(res, StatusCode::FORBIDDEN).await?;
    let res = server.client.get(server.url("/data/data")).bearer_auth(&admin).send().await?;
    expect_data(res, StatusCode::OK).await?;
    Ok(())
}

#[tokio::test]
async fn restrictions_apply_without_identity() -> Result<()> {
    let server = TestServer::spawn().await?;

    let res = server
        .client
        .post(server.url("/data"))
        .query(&[("dataset", "user")])
        .json(&json!({ "data": [{"email": "a@example.com"}] }))
        .send()
        .await?;
    expect_error(res, StatusCode::FORBIDDEN).await?;
    Ok(())
}

#[tokio::test]
async fn route_settings_disable_and_open_routes() -> Result<()> {
    let server = TestServer::spawn_with(|config| {
        config.security.jwt_secret = Some(JWT_SECRET.to_string());
        let overrides = RouteSettings::parse_overrides("delete:\n  enable: false\nsearch:\n  access: public\n")
            .expect("valid overrides");
        config.routes.apply_overrides(overrides);
    })
    .await?;
    let admin = token("admin@example.com", true);
    server.create_dataset_as("rivers", rivers(), &admin).await?;

    let res = server.client.delete(server.url("/data/rivers")).bearer_auth(&admin).send().await?;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    let res = server.client.get(server.url("/data")).send().await?;
    let found = expect_data(res, StatusCode::OK).await?;
    assert_eq!(found[0]["dataset"], json!("rivers"));
    Ok(())
}
