//! HTTP control surface, driven through the router without a listener.

mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chat_router::common::ChatId;
use chat_router::domains::agents::FlowSettings;
use chat_router::kernel::{MockReplyAgent, StreamHub};
use chat_router::server::{build_app, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::common::{wait_until, RouterHarness};

async fn app() -> (RouterHarness, Router) {
    let h = RouterHarness::start(
        vec![("gpt", MockReplyAgent::new("gpt").always_silent())],
        FlowSettings::default(),
    )
    .await;
    let app = build_app(AppState::new(h.orchestrator.clone(), StreamHub::new()));
    (h, app)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_broker_and_pause_state() {
    let (_h, app) = app().await;

    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["broker"], "memory");
    assert_eq!(body["isPaused"], false);
}

#[tokio::test]
async fn program_endpoints_drive_flow_control() {
    let (h, app) = app().await;

    let (status, body) = send(&app, Method::POST, "/api/program/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isPaused"], true);
    assert_eq!(body["isAutoPause"], false);

    let (_, body) = send(&app, Method::POST, "/api/program/delay", Some(json!({ "delayMs": 250 }))).await;
    assert_eq!(body["delayMs"], 250);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/program/auto-pause",
        Some(json!({ "enabled": true, "threshold": 4 })),
    )
    .await;
    assert_eq!(body["autoPauseEnabled"], true);
    assert_eq!(body["autoPauseThreshold"], 4);

    let (status, body) = send(&app, Method::POST, "/api/program/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resumed"], 0);
    assert_eq!(body["status"]["isPaused"], false);

    let (_, body) = send(&app, Method::GET, "/api/program/status", None).await;
    assert_eq!(body["isPaused"], false);
    assert_eq!(body["delayMs"], 250);
    assert!(!h.orchestrator.flow().is_paused());
}

#[tokio::test]
async fn chats_can_be_created_and_messaged() {
    let (h, app) = app().await;

    let (status, chat) = send(
        &app,
        Method::POST,
        "/api/chats",
        Some(json!({ "memberIds": ["gpt"], "name": "standup" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(chat["name"], "standup");
    let chat_id = chat["id"].as_str().unwrap().to_string();
    let members: Vec<&str> = chat["memberIds"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(members.contains(&"gpt"));
    assert!(members.contains(&"user"));

    let (status, message) = send(
        &app,
        Method::POST,
        &format!("/api/chats/{}/messages", chat_id),
        Some(json!({ "text": "good morning" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["senderId"], "user");
    assert_eq!(message["type"], "MEMBER");
    assert_eq!(message["content"]["text"], "good morning");

    wait_until("gpt saw the message", || h.agent("gpt").call_count() == 1).await;

    let (status, history) = send(&app, Method::GET, &format!("/api/chats/{}/messages", chat_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 2);

    let (_, chats) = send(&app, Method::GET, "/api/chats", None).await;
    assert_eq!(chats.as_array().unwrap().len(), 1);

    let (_, members) = send(&app, Method::GET, "/api/chats/members", None).await;
    assert_eq!(members.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn members_can_be_removed_over_http() {
    let (h, app) = app().await;
    let chat_id = h.create_chat(&["gpt"], None).await;

    let (status, chat) = send(
        &app,
        Method::DELETE,
        &format!("/api/chats/{}/members/gpt", chat_id),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(chat["memberIds"], json!(["user"]));
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let (h, app) = app().await;
    let chat_id = h.create_chat(&["gpt"], None).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/chats/{}/messages", chat_id),
        Some(json!({ "text": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/chats/{}/members", chat_id),
        Some(json!({ "memberId": "nobody" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, &format!("/api/chats/{}/messages", ChatId::new()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/api/streams/everything", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
