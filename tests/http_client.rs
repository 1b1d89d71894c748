//! HttpTrackerClient against a wiremock server: auth header, error mapping.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rulesd::client::{ApiError, CallMethod, HttpTrackerClient, TrackerApi};

async fn client(server: &MockServer) -> HttpTrackerClient {
    HttpTrackerClient::new(server.uri(), Duration::from_secs(2)).expect("client builds")
}

#[tokio::test]
async fn get_time_entry_sends_token_and_parses_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workspaces/ws1/time-entries/te1"))
        .and(header("X-Addon-Token", "tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "te1",
            "description": "Team meeting"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server).await;
    let entry = api.get_time_entry("ws1", "te1", "tok-123").await.unwrap();
    assert_eq!(entry["description"], "Team meeting");
}

#[tokio::test]
async fn list_endpoints_paginate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workspaces/ws1/tags"))
        .and(query_param("page", "2"))
        .and(query_param("page-size", "200"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "t1", "name": "Urgent"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server).await;
    let tags = api.list_tags("ws1", 2, "tok").await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0]["name"], "Urgent");
}

#[tokio::test]
async fn create_tag_posts_the_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workspaces/ws1/tags"))
        .and(body_json(json!({"name": "meetings"})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"id": "t-9", "name": "meetings"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server).await;
    let created = api.create_tag("ws1", "meetings", "tok").await.unwrap();
    assert_eq!(created["id"], "t-9");
}

#[tokio::test]
async fn rate_limit_surfaces_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workspaces/ws1/time-entries/te1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .mount(&server)
        .await;

    let api = client(&server).await;
    let err = api.get_time_entry("ws1", "te1", "tok").await.unwrap_err();
    match err {
        ApiError::RateLimited { retry_after_ms } => {
            assert_eq!(retry_after_ms, Some(2_000));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_distinct_from_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workspaces/ws1/time-entries/boom"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workspaces/ws1/time-entries/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let api = client(&server).await;

    match api.get_time_entry("ws1", "boom", "tok").await.unwrap_err() {
        ApiError::Server { status, .. } => assert_eq!(status, 502),
        other => panic!("expected Server, got {other:?}"),
    }
    match api.get_time_entry("ws1", "gone", "tok").await.unwrap_err() {
        ApiError::Rejected { status, .. } => assert_eq!(status, 404),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn generic_call_uses_the_raw_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workspaces/ws1/time-entries/te1/duplicate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server).await;
    let body = api
        .call(
            CallMethod::Post,
            "/workspaces/ws1/time-entries/te1/duplicate",
            Some(&json!({})),
            "tok",
        )
        .await
        .unwrap();
    assert_eq!(body, "{}");
}
