#![cfg(feature = "server")]

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt; // for oneshot

use common::{FakeLoader, Harness};
use torchts::{
    generate::single_session_id,
    server::{routes, state::AppState},
    SessionTracker,
};

fn app(h: &Harness) -> Router {
    routes::create_router(AppState::new(Arc::clone(&h.generator)))
}

async fn post(app: &Router, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone().oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header<'a>(response: &'a axum::response::Response, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let response = get(&app(&h), "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_generate_single_headers() {
    let h = Harness::new(FakeLoader::new(2, 10), 400);
    let response =
        post(&app(&h), "/generate", json!({"text": "Hello. World.", "voice": "a_test"})).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "audio/wav");
    assert_eq!(header(&response, "x-total-chunks"), "1");
    assert_eq!(header(&response, "x-current-chunk"), "0");
    assert_eq!(header(&response, "x-session-id"), single_session_id("a_test", "Hello. World."));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..4], b"RIFF");
}

#[tokio::test]
async fn test_generate_chunk_out_of_range() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let response = post(
        &app(&h),
        "/generate",
        json!({"text": "Hello. World.", "voice": "a_test", "chunk_id": 1}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("Invalid chunk ID"));
}

#[tokio::test]
async fn test_generate_multi_headers() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let response = post(
        &app(&h),
        "/generate_multi",
        json!({
            "text": "1 Hello there >>> 2 Good day",
            "speakers": {"1": "a_voice", "2": "b_voice"}
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-mode"), "multi");
    assert_eq!(header(&response, "x-segment-count"), "2");
}

#[tokio::test]
async fn test_cancelled_generation_returns_499() {
    let text = "Long enough to be stopped.";
    let sessions = Arc::new(SessionTracker::new());
    let hook = {
        let sessions = Arc::clone(&sessions);
        let id = single_session_id("a_test", text);
        Arc::new(move |_: usize| {
            sessions.end(&id);
        })
    };
    let h = Harness::with_sessions(FakeLoader::new(2, 10).with_hook(hook), 400, sessions);

    let response = post(&app(&h), "/generate", json!({"text": text, "voice": "a_test"})).await;
    assert_eq!(response.status().as_u16(), 499);
    assert_eq!(json_body(response).await["error"], "Client cancelled request");
}

#[tokio::test]
async fn test_internal_errors_are_generic() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let response =
        post(&app(&h), "/generate", json!({"text": "Now explode.", "voice": "a_test"})).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "Audio generation failed");
}

#[tokio::test]
async fn test_load_failure_is_service_unavailable() {
    let h = Harness::new(FakeLoader::new(1, 10).failing(), 400);
    let response = post(&app(&h), "/generate", json!({"text": "Hi.", "voice": "a_test"})).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_stop_generation_messages() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let app = app(&h);
    h.sessions.begin("s1");

    let body = json_body(post(&app, "/stop-generation", json!({"session_id": "s1"})).await).await;
    assert_eq!(body["message"], "Generation stopped successfully");
    assert_eq!(body["session_id"], "s1");

    let body = json_body(post(&app, "/stop-generation", json!({"session_id": "s1"})).await).await;
    assert_eq!(body["message"], "No active generation found for this session");
}

#[tokio::test]
async fn test_model_lifecycle_endpoints() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let app = app(&h);

    let status = json_body(get(&app, "/model/status").await).await;
    assert_eq!(status["model_loaded"], false);
    assert_eq!(status["time_since_last_activity"], Value::Null);
    assert_eq!(status["device"], "cpu");

    post(&app, "/generate", json!({"text": "Hi.", "voice": "a_test"})).await;
    let status = json_body(get(&app, "/model/status").await).await;
    assert_eq!(status["model_loaded"], true);
    assert_eq!(status["available_languages"].as_array().unwrap().len(), 9);

    let response = post(&app, "/model/unload", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(get(&app, "/model/status").await).await;
    assert_eq!(status["model_loaded"], false);
}

#[tokio::test]
async fn test_timeout_update_validation() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let app = app(&h);

    let response = post(&app, "/model/timeout", json!({"timeout": 30})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post(&app, "/model/timeout", json!({"timeout": 120})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(get(&app, "/model/status").await).await;
    assert_eq!(status["unload_timeout"], 120);
}
