//! Integration tests for `HttpTransport` against a local axum server.
//!
//! These exercise the real HTTP path: JSON bodies on the wire, status
//! classification of real responses, and retries across connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adcanvas_client::api::NewChatMessage;
use adcanvas_client::{ClientError, HttpTransport, PersistenceApi, RetryPolicy};
use adcanvas_core::ChatMessage;
use assert_matches::assert_matches;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct ServerState {
    /// Requests to fail with 503 before answering normally.
    failures_left: Arc<AtomicU32>,
    hits: Arc<AtomicU32>,
    last_body: Arc<tokio::sync::Mutex<Option<Value>>>,
}

async fn list_messages(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if project_id == "00000000-0000-0000-0000-000000000000" {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Project not found" })));
    }
    let left = state.failures_left.load(Ordering::SeqCst);
    if left > 0 {
        state.failures_left.store(left - 1, Ordering::SeqCst);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Database unavailable" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "messages": [{
                "id": "6f1c2a1e-3d4b-4c5d-8e9f-0a1b2c3d4e5f",
                "role": "user",
                "content": "hello",
                "message_type": "text",
                "image_urls": null,
                "created_at": "2024-05-01T12:00:00.000Z"
            }]
        })),
    )
}

async fn create_message(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock().await = Some(body.clone());
    (
        StatusCode::CREATED,
        Json(json!({
            "message": {
                "id": "0b7c6a1e-3d4b-4c5d-8e9f-0a1b2c3d4e5f",
                "role": body["role"],
                "content": body["content"],
                "message_type": body["message_type"],
                "image_urls": body["image_urls"],
                "created_at": "2024-05-01T12:00:01.000Z"
            }
        })),
    )
}

async fn spawn_server(state: ServerState) -> SocketAddr {
    let app = Router::new()
        .route(
            "/api/projects/{project_id}/chat",
            get(list_messages).post(create_message),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn api_for(addr: SocketAddr, retry: RetryPolicy) -> PersistenceApi {
    let transport = HttpTransport::new(format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    PersistenceApi::new(Arc::new(transport), retry)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(10),
    }
}

// ---------------------------------------------------------------------------
// Test: rows decode from a real HTTP response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_messages_decodes_rows() {
    let state = ServerState::default();
    let addr = spawn_server(state.clone()).await;

    let rows = api_for(addr, fast_retry())
        .list_messages(uuid::Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "hello");
    assert_eq!(rows[0].image_urls, None);
}

// ---------------------------------------------------------------------------
// Test: POST body reaches the server in the endpoint's shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_message_sends_json_body() {
    let state = ServerState::default();
    let addr = spawn_server(state.clone()).await;

    let row = api_for(addr, fast_retry())
        .create_message(
            uuid::Uuid::new_v4(),
            &NewChatMessage::from(&ChatMessage::user_text("hello")),
        )
        .await
        .unwrap();

    assert_eq!(row.content, "hello");
    assert_eq!(
        state.last_body.lock().await.clone().unwrap(),
        json!({
            "role": "user",
            "content": "hello",
            "image_urls": [],
            "message_type": "text",
        })
    );
}

// ---------------------------------------------------------------------------
// Test: 503 responses are retried until the server recovers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_unavailable_is_retried() {
    let state = ServerState::default();
    state.failures_left.store(2, Ordering::SeqCst);
    let addr = spawn_server(state.clone()).await;

    let rows = api_for(addr, fast_retry())
        .list_messages(uuid::Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Test: 404 fails immediately with the server's message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_found_fails_without_retry() {
    let state = ServerState::default();
    let addr = spawn_server(state.clone()).await;

    let err = api_for(addr, fast_retry())
        .list_messages(uuid::Uuid::nil())
        .await
        .unwrap_err();

    assert_matches!(err, ClientError::Api { status: 404, ref message } if message == "Project not found");
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: an unreachable server is a retryable network error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_refused_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = api_for(addr, RetryPolicy::none())
        .list_messages(uuid::Uuid::new_v4())
        .await
        .unwrap_err();

    assert_matches!(err, ClientError::Network(_));
    assert!(err.is_retryable());
}
