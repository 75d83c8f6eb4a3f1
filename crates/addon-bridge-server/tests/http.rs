//! HTTP surface tests. The addon is played by the echo peer over a real
//! WebSocket against a server bound to an ephemeral port.

use addon_bridge_server::peer::run_echo_peer;
use addon_bridge_server::{AppState, ServerConfig, SharedState, router};
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn state_with_timeout(secs: u64) -> SharedState {
    Arc::new(AppState::new(ServerConfig {
        request_timeout_secs: secs,
        ..ServerConfig::default()
    }))
}

async fn serve(state: &SharedState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start the echo peer and wait until the bridge has attached it.
async fn connect_peer(state: &SharedState, addr: SocketAddr) -> tokio::task::JoinHandle<()> {
    let url = format!("ws://{addr}/ws");
    let peer = tokio::spawn(async move {
        let _ = run_echo_peer(&url).await;
    });
    for _ in 0..200 {
        if state.broker.is_connected() {
            return peer;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("echo peer never connected");
}

async fn call(state: &SharedState, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn json_query(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_query(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
    let boundary = "bridge-test-boundary";
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/query/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn index_page() {
    let state = state_with_timeout(120);
    let response = router(state)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_is_degraded_without_addon() {
    let state = state_with_timeout(120);
    let (status, body) = call(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "degraded",
            "addon_connected": false,
            "pending_requests": 0,
            "request_timeout_secs": 120
        })
    );
}

#[tokio::test]
async fn health_reports_waiting_requests() {
    let state = state_with_timeout(30);
    let addr = serve(&state).await;
    let _peer = connect_peer(&state, addr).await;

    let caller = {
        let state = state.clone();
        tokio::spawn(async move { call(&state, json_query(json!({"prompt": "!silent"}))).await })
    };
    for _ in 0..200 {
        if state.broker.status().pending == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (_, body) = call(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["pending_requests"], 1);
    assert_eq!(body["request_timeout_secs"], 30);
    assert!(body["oldest_pending_ms"].is_u64());
    caller.abort();
}

#[tokio::test]
async fn malformed_json_query_is_unprocessable() {
    let state = state_with_timeout(120);

    let (status, body) = call(&state, json_query(json!({"image": "x"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "error");
    assert!(body["detail"].as_str().unwrap().contains("prompt"));

    let request = Request::builder()
        .method("POST")
        .uri("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = call(&state, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn query_without_addon_is_unavailable() {
    let state = state_with_timeout(120);

    let (status, body) = call(&state, json_query(json!({"prompt": "hi"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");

    let (status, _) = call(&state, multipart_query(&[("prompt", None, "hi")])).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(state.broker.status().pending, 0);
}

#[tokio::test]
async fn query_round_trip_through_addon() {
    let state = state_with_timeout(120);
    let addr = serve(&state).await;
    let _peer = connect_peer(&state, addr).await;

    let (status, body) = call(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = call(
        &state,
        json_query(json!({"prompt": "hello", "startNewChat": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["response"], "echo: hello");
    assert_eq!(body["request_id"].as_str().map(str::len), Some(32));
    assert!(body.get("generatedImage").is_none());
    assert_eq!(state.broker.status().pending, 0);
}

#[tokio::test]
async fn remote_error_is_bad_request() {
    let state = state_with_timeout(120);
    let addr = serve(&state).await;
    let _peer = connect_peer(&state, addr).await;

    let (status, body) = call(&state, json_query(json!({"prompt": "!error rate limited"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"status": "error", "detail": "rate limited"}));
}

#[tokio::test]
async fn upload_is_base64_encoded() {
    let state = state_with_timeout(120);
    let addr = serve(&state).await;
    let _peer = connect_peer(&state, addr).await;

    let request = multipart_query(&[
        ("prompt", None, "what is this"),
        ("image", Some("pixel.png"), "hi"),
        ("useTemporaryChat", None, "false"),
    ]);
    let (status, body) = call(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "echo: what is this");
    assert_eq!(body["generatedImage"]["base64"], "aGk=");
}

#[tokio::test]
async fn upload_without_prompt_is_rejected() {
    let state = state_with_timeout(120);
    let addr = serve(&state).await;
    let _peer = connect_peer(&state, addr).await;

    let (status, body) = call(&state, multipart_query(&[("startNewChat", None, "true")])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "error");

    let garbled = Request::builder()
        .method("POST")
        .uri("/query/upload")
        .header(
            header::CONTENT_TYPE,
            "multipart/form-data; boundary=bridge-test-boundary",
        )
        .body(Body::from("--bridge-test-boundary\r\nno headers here"))
        .unwrap();
    let (status, body) = call(&state, garbled).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "error");
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn silent_addon_times_out() {
    let state = state_with_timeout(1);
    let addr = serve(&state).await;
    let _peer = connect_peer(&state, addr).await;

    let (status, body) = call(&state, json_query(json!({"prompt": "!silent"}))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["status"], "error");
    assert_eq!(state.broker.status().pending, 0);
}

#[tokio::test]
async fn addon_hangup_cancels_request() {
    let state = state_with_timeout(30);
    let addr = serve(&state).await;
    let peer = connect_peer(&state, addr).await;

    let (status, _) = call(&state, json_query(json!({"prompt": "!hangup"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let _ = peer.await;
    assert_eq!(state.broker.status().pending, 0);
}
