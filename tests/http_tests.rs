// Integration tests for the HTTP control API
//
// Requests go through the full router with tower's `oneshot`; sessions talk
// to the loopback agent where a live connection is needed.

mod common;

use agent_voice_session::{
    create_router, AppState, AudioSource, PlaybackTarget, SessionConfig, SessionFactory,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::MockAgent;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(base_url: &str) -> (Router, AppState) {
    let template = SessionConfig::default().with_base_url(base_url);
    let factory = SessionFactory::new(
        template,
        AudioSource::File("/nonexistent/input.wav".into()),
        PlaybackTarget::Discard,
    );
    let state = AppState::new(factory);
    (create_router(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_check() {
    let (app, _state) = app("http://localhost:8000");

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_create_session_without_connecting() {
    let (app, state) = app("http://localhost:8000");

    let (status, body) = call(
        &app,
        "POST",
        "/sessions",
        Some(json!({"session_id": "abc", "connect": false})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["session_id"], "abc");
    assert_eq!(body["connection"], "disconnected");

    let (status, body) = call(&app, "GET", "/sessions/abc/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "abc");
    assert_eq!(body["mode"], "text");
    assert_eq!(body["capture"], "stopped");

    let (status, body) = call(&app, "GET", "/sessions/abc/transcript", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    state.close_all().await;
}

#[tokio::test]
async fn test_duplicate_session_is_rejected() {
    let (app, state) = app("http://localhost:8000");
    let request = json!({"session_id": "dup", "connect": false});

    let (status, _) = call(&app, "POST", "/sessions", Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(&app, "POST", "/sessions", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("dup"));

    state.close_all().await;
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (app, _state) = app("http://localhost:8000");

    for (method, uri, body) in [
        ("GET", "/sessions/missing/status", None),
        ("GET", "/sessions/missing/transcript", None),
        ("POST", "/sessions/missing/text", Some(json!({"text": "hi"}))),
        ("POST", "/sessions/missing/interrupt", None),
        ("DELETE", "/sessions/missing", None),
    ] {
        let (status, _) = call(&app, method, uri, body).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_text_while_disconnected_reports_not_sent() {
    let (app, state) = app("http://localhost:8000");
    call(&app, "POST", "/sessions", Some(json!({"session_id": "off", "connect": false}))).await;

    let (status, body) = call(&app, "POST", "/sessions/off/text", Some(json!({"text": "Find me red t-shirts"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"sent": false}));

    let (_, transcript) = call(&app, "GET", "/sessions/off/transcript", None).await;
    assert_eq!(transcript, json!([]));

    let (status, _) = call(&app, "POST", "/sessions/off/text", Some(json!({"text": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    state.close_all().await;
}

#[tokio::test]
async fn test_conversation_over_http() {
    let mut agent = MockAgent::start().await;
    let (app, _state) = app(&agent.base_url);

    let (status, body) = call(&app, "POST", "/sessions", Some(json!({"session_id": "live"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["connection"], "open");
    let mut conn = agent.next_connection().await;
    assert_eq!(conn.path, "/ws/live?is_audio=false");

    let (_, body) = call(&app, "POST", "/sessions/live/text", Some(json!({"text": "hello agent"}))).await;
    assert_eq!(body, json!({"sent": true}));
    assert_eq!(conn.recv_json().await["data"], "hello agent");

    let (_, body) = call(&app, "POST", "/sessions/live/interrupt", None).await;
    assert_eq!(body, json!({"sent": true}));
    assert_eq!(conn.recv_json().await["action"], "interrupt");

    let (_, transcript) = call(&app, "GET", "/sessions/live/transcript", None).await;
    assert_eq!(transcript[0]["content"], "hello agent");
    assert_eq!(transcript[0]["role"], "user");

    let (status, body) = call(&app, "POST", "/sessions/live/mode", Some(json!({"mode": "audio"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connection"], "open");
    assert_eq!(body["status"]["mode"], "audio");
    let audio_conn = agent.next_connection().await;
    assert_eq!(audio_conn.path, "/ws/live?is_audio=true");

    let (status, body) = call(&app, "DELETE", "/sessions/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connection"], "disconnected");
    assert_eq!(body["messages"], 1);

    let (status, _) = call(&app, "GET", "/sessions/live/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_audio_start_failure_is_reported() {
    let (app, state) = app("http://localhost:8000");
    call(&app, "POST", "/sessions", Some(json!({"session_id": "mic", "connect": false}))).await;

    let (status, body) = call(&app, "POST", "/sessions/mic/audio/start", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("input.wav"));

    let (_, status_body) = call(&app, "GET", "/sessions/mic/status", None).await;
    assert_eq!(status_body["last_error"]["kind"], "device");
    assert_eq!(status_body["capture"], "stopped");

    let (status, _) = call(&app, "POST", "/sessions/mic/audio/stop", None).await;
    assert_eq!(status, StatusCode::OK);

    state.close_all().await;
}
