mod common;

use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::eventually;
use jobtail::api::{build_router, AppState};
use jobtail::config::EngineConfig;
use jobtail::process::{ProcessState, ProcessTable};

fn app(table: &ProcessTable, log_dir: &Path) -> Router {
    build_router(AppState::new(
        table.clone(),
        log_dir.to_path_buf(),
        EngineConfig::default(),
    ))
}

async fn send(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, Body::from(body.to_string())).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn create(app: &Router, commands: Value) -> String {
    let (status, body) = send_json(
        app,
        "POST",
        "/api/v1/procs",
        json!({"name": "job", "commands": commands}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["pid"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_service() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&ProcessTable::new(), dir.path());
    let (status, body) = send(&app, "GET", "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("healthy"));
    assert!(body.contains("jobtail"));
}

#[tokio::test(flavor = "multi_thread")]
async fn create_start_and_read_output() {
    let dir = tempfile::tempdir().unwrap();
    let table = ProcessTable::new();
    let app = app(&table, dir.path());

    let pid = create(&app, json!([["echo", "hello"], ["sh", "-c", "echo world >&2"]])).await;
    let (status, body) =
        send_json(&app, "POST", &format!("/api/v1/procs/{pid}/start"), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "ok");

    let process = table.find(&pid).unwrap();
    assert!(eventually(Duration::from_secs(10), || {
        process.state() == ProcessState::Finished
    }));

    let (status, output) = send(&app, "GET", &format!("/api/v1/procs/{pid}/log"), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(output, b"hello\nworld\n");

    let (status, body) = send_json(&app, "GET", &format!("/api/v1/procs/{pid}"), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["proc"]["state"], "finished");
    assert_eq!(body["proc"]["finished"], true);

    assert!(dir.path().join(&pid).join("1").exists());
    assert!(dir.path().join(&pid).join("2").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&ProcessTable::new(), dir.path());
    let pid = create(&app, json!([["true"]])).await;
    let uri = format!("/api/v1/procs/{pid}/start");

    let (status, _) = send(&app, "POST", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, "POST", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["type"], "already_started");
}

#[tokio::test]
async fn unknown_prefixes_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&ProcessTable::new(), dir.path());
    create(&app, json!([["true"]])).await;
    create(&app, json!([["true"]])).await;

    let (status, body) = send_json(&app, "GET", "/api/v1/procs/zzzz", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found");

    let (status, body) = send_json(&app, "DELETE", "/api/v1/procs/nothing", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn list_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let table = ProcessTable::new();
    let app = app(&table, dir.path());
    let pid = create(&app, json!([["true"]])).await;

    let (status, body) = send_json(&app, "GET", "/api/v1/procs", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["procs"][&pid]["state"], "created");

    let prefix = &pid[..6];
    let (status, _) = send(&app, "DELETE", &format!("/api/v1/procs/{prefix}"), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(table.is_empty());
}

#[tokio::test]
async fn malformed_spec_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&ProcessTable::new(), dir.path());
    let (status, body) = send(&app, "POST", "/api/v1/procs", Body::from("{nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["type"], "bad_request");

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/v1/procs",
        json!({"name": "empty", "commands": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn input_reaches_a_running_command() {
    let dir = tempfile::tempdir().unwrap();
    let table = ProcessTable::new();
    let app = app(&table, dir.path());
    let pid = create(&app, json!([["head", "-n", "1"]])).await;

    let (status, _) = send(&app, "POST", &format!("/api/v1/procs/{pid}/input"), Body::from("x")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(&app, "POST", &format!("/api/v1/procs/{pid}/start"), Body::empty()).await;
    let process = table.find(&pid).unwrap();
    let path = process.log_path(dir.path(), 1);
    assert!(eventually(Duration::from_secs(5), || path.exists()));

    // The command may not be attached yet right after the log appears.
    let mut delivered = false;
    for _ in 0..50 {
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/procs/{pid}/input"),
            Body::from("typed\n"),
        )
        .await;
        if status == StatusCode::OK {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered);
    assert!(eventually(Duration::from_secs(10), || {
        process.state() == ProcessState::Finished
    }));
    assert_eq!(process.output(), b"typed\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn tail_streams_a_command_log() {
    let dir = tempfile::tempdir().unwrap();
    let table = ProcessTable::new();
    let app = app(&table, dir.path());
    let pid = create(
        &app,
        json!([["sh", "-c", "echo a; sleep 0.2; echo b; echo c >&2"]]),
    )
    .await;

    let (status, _) = send(&app, "GET", &format!("/api/v1/procs/{pid}/log/1"), Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app, "POST", &format!("/api/v1/procs/{pid}/start"), Body::empty()).await;
    let path = table.find(&pid).unwrap().log_path(dir.path(), 1);
    assert!(eventually(Duration::from_secs(5), || path.exists()));

    let (status, stdout) = send(&app, "GET", &format!("/api/v1/procs/{pid}/log/1"), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stdout, b"a\nb\n");

    let (status, stderr) = send(
        &app,
        "GET",
        &format!("/api/v1/procs/{pid}/log/1?stream=stderr"),
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stderr, b"c\n");

    let (status, _) = send(&app, "GET", &format!("/api/v1/procs/{pid}/log/2"), Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
