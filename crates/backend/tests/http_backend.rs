//! Integration tests for `HttpBackend` against an in-process mock of the
//! generation backend.

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use madsea_backend::api::{AutosaveHook, GenerationBackend, HttpBackend};
use madsea_backend::error::{CatalogError, PollError, SubmissionError};
use madsea_backend::messages::{AutosaveRequest, GenerateRequest, RANDOM_SEED};
use madsea_core::job::{JobHandle, JobState};

/// Bodies received by the mock server.
#[derive(Clone, Default)]
struct Received {
    bodies: Arc<Mutex<Vec<Value>>>,
}

/// Serve `app` on an ephemeral port and return a client pointed at it.
async fn spawn(app: Router) -> HttpBackend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    HttpBackend::new(format!("http://{addr}/api/"))
}

fn request() -> GenerateRequest {
    GenerateRequest {
        client_id: "client-1".into(),
        project_id: Some("p1".into()),
        episode_id: None,
        style: Some("noir".into()),
        strength: Some(0.7),
        seed: RANDOM_SEED,
        scenes: vec![],
    }
}

// ---------------------------------------------------------------------------
// Test: POST /generate returns the task id and receives the request body
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_accepted_returns_task_id() {
    let received = Received::default();
    let app = Router::new()
        .route(
            "/api/generate",
            post(
                |State(rx): State<Received>, Json(body): Json<Value>| async move {
                    rx.bodies.lock().unwrap().push(body);
                    Json(json!({ "taskId": "t1" }))
                },
            ),
        )
        .with_state(received.clone());
    let backend = spawn(app).await;

    let handle = backend.submit(&request()).await.unwrap();

    assert_eq!(handle, JobHandle::new("t1"));
    let bodies = received.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["clientId"], "client-1");
    assert_eq!(bodies[0]["style"], "noir");
    assert_eq!(bodies[0]["seed"], -1);
}

// ---------------------------------------------------------------------------
// Test: an error body is a rejection even on HTTP 200
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_error_body_is_rejection() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async { Json(json!({ "success": false, "error": "No style selected" })) }),
    );
    let backend = spawn(app).await;

    let err = backend.submit(&request()).await.unwrap_err();
    assert_matches!(err, SubmissionError::BackendRejected(reason) if reason == "No style selected");
}

// ---------------------------------------------------------------------------
// Test: a bare 5xx is a transport failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_server_error_is_transport() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let backend = spawn(app).await;

    let err = backend.submit(&request()).await.unwrap_err();
    assert_matches!(err, SubmissionError::Transport(msg) if msg.contains("502"));
}

// ---------------------------------------------------------------------------
// Test: unreachable backend is a transport failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_unreachable_is_transport() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = HttpBackend::new(format!("http://{addr}/api"));
    let err = backend.submit(&request()).await.unwrap_err();
    assert_matches!(err, SubmissionError::Transport(_));
}

// ---------------------------------------------------------------------------
// Test: GET /tasks/{task_id}/status is parsed into a snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_is_parsed() {
    let app = Router::new().route(
        "/api/tasks/{task_id}/status",
        get(|Path(task_id): Path<String>| async move {
            assert_eq!(task_id, "t1");
            Json(json!({
                "status": "completed",
                "progress": 100,
                "completedScenes": 2,
                "results": [
                    { "sceneId": "1", "imageUrl": "/outputs/1.png" },
                    { "sceneId": "2" }
                ]
            }))
        }),
    );
    let backend = spawn(app).await;

    let snapshot = backend.fetch_status(&JobHandle::new("t1")).await.unwrap();
    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(snapshot.progress_percent, 100);
    assert_eq!(snapshot.completed_scenes, 2);
    assert_eq!(snapshot.image_for("1"), Some("/outputs/1.png"));
    assert_eq!(snapshot.image_for("2"), None);
}

// ---------------------------------------------------------------------------
// Test: status endpoint errors map to PollError variants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_not_found_is_http_error() {
    let app = Router::new().route(
        "/api/tasks/{task_id}/status",
        get(|| async { (StatusCode::NOT_FOUND, "Task not found") }),
    );
    let backend = spawn(app).await;

    let err = backend.fetch_status(&JobHandle::new("gone")).await.unwrap_err();
    assert_matches!(err, PollError::Http { status: 404, body } if body == "Task not found");
}

#[tokio::test]
async fn status_failure_body_is_read_on_error_status() {
    let app = Router::new().route(
        "/api/tasks/{task_id}/status",
        get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "failed", "error": "CUDA out of memory" })),
            )
        }),
    );
    let backend = spawn(app).await;

    let snapshot = backend.fetch_status(&JobHandle::new("t1")).await.unwrap();
    assert_eq!(snapshot.state, JobState::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("CUDA out of memory"));
}

#[tokio::test]
async fn status_task_id_reaches_route_unsplit() {
    let app = Router::new().route(
        "/api/tasks/{task_id}/status",
        get(|Path(task_id): Path<String>| async move {
            Json(json!({ "status": "running", "progress": 10, "error": task_id }))
        }),
    );
    let backend = spawn(app).await;

    let snapshot = backend
        .fetch_status(&JobHandle::new("batch/7?x"))
        .await
        .unwrap();
    assert_eq!(snapshot.error.as_deref(), Some("batch/7?x"));
}

#[tokio::test]
async fn status_malformed_body_is_decode_error() {
    let app = Router::new().route(
        "/api/tasks/{task_id}/status",
        get(|| async { Json(json!({ "status": "exploded" })) }),
    );
    let backend = spawn(app).await;

    let err = backend.fetch_status(&JobHandle::new("t1")).await.unwrap_err();
    assert_matches!(err, PollError::Decode(_));
}

// ---------------------------------------------------------------------------
// Test: POST /autosave sends the trigger and ignores the body
// ---------------------------------------------------------------------------

#[tokio::test]
async fn autosave_posts_request() {
    let received = Received::default();
    let app = Router::new()
        .route(
            "/api/autosave",
            post(
                |State(rx): State<Received>, Json(body): Json<Value>| async move {
                    rx.bodies.lock().unwrap().push(body);
                    "saved"
                },
            ),
        )
        .with_state(received.clone());
    let backend = spawn(app).await;

    let req = AutosaveRequest::generation_complete(
        Some("p1".into()),
        "Generated 3 scenes",
        vec!["1".into(), "2".into(), "3".into()],
    );
    backend.autosave(&req).await.unwrap();

    let bodies = received.bodies.lock().unwrap();
    assert_eq!(bodies[0]["trigger"], "generation_complete");
    assert_eq!(bodies[0]["changes"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn autosave_failure_is_reported() {
    let app = Router::new().route(
        "/api/autosave",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "disk full") }),
    );
    let backend = spawn(app).await;

    let req = AutosaveRequest::generation_complete(None, "x", vec![]);
    let err = backend.autosave(&req).await.unwrap_err();
    assert!(err.to_string().contains("disk full"));
}

// ---------------------------------------------------------------------------
// Test: catalogs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn catalogs_are_fetched() {
    let app = Router::new()
        .route(
            "/api/styles",
            get(|| async {
                Json(json!([
                    { "id": "noir", "displayName": "Noir", "isCustom": false },
                    { "id": "ombre", "displayName": "Ombre Chinoise", "isCustom": true }
                ]))
            }),
        )
        .route(
            "/api/lora_models",
            get(|| async { Json(json!([{ "name": "ink_v2" }])) }),
        );
    let backend = spawn(app).await;

    let styles = backend.styles().await.unwrap();
    assert_eq!(styles.len(), 2);
    assert!(styles[1].is_custom);

    let loras = backend.lora_models().await.unwrap();
    assert_eq!(loras[0].id, "ink_v2");
}

#[tokio::test]
async fn catalog_error_status() {
    let app = Router::new().route(
        "/api/styles",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
    );
    let backend = spawn(app).await;

    let err = backend.styles().await.unwrap_err();
    assert_matches!(err, CatalogError::Http { status: 503, .. });
}
