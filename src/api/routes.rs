use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::error::ApiError;
use crate::api::stream::LogStream;
use crate::api::types::{
    CreateResponse, HealthStatus, ListResponse, MessageResponse, ShowResponse, TailQuery,
};
use crate::config::EngineConfig;
use crate::log::{ReplayMode, StreamTag};
use crate::process::{Process, ProcessSpec, ProcessTable};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub table: ProcessTable,
    pub log_dir: PathBuf,
    pub engine: EngineConfig,
}

impl AppState {
    pub fn new(table: ProcessTable, log_dir: PathBuf, engine: EngineConfig) -> Self {
        Self {
            table,
            log_dir,
            engine,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/procs", get(list_procs).post(create_proc))
        .route("/api/v1/procs/{pid}", get(show_proc).delete(remove_proc))
        .route("/api/v1/procs/{pid}/start", post(start_proc))
        .route("/api/v1/procs/{pid}/log", get(show_output))
        .route("/api/v1/procs/{pid}/log/{index}", get(tail_log))
        .route("/api/v1/procs/{pid}/input", post(write_input))
        .with_state(state)
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
    })
}

async fn list_procs(State(state): State<AppState>) -> Json<ListResponse> {
    let processes: BTreeMap<_, _> = state
        .table
        .list()
        .iter()
        .map(|p| (p.id().to_string(), p.view()))
        .collect();
    Json(ListResponse {
        message: "ok".to_string(),
        processes,
    })
}

async fn create_proc(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CreateResponse>, ApiError> {
    let spec: ProcessSpec = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid process spec: {e}")))?;
    if spec.commands.is_empty() {
        return Err(ApiError::BadRequest("process has no commands".to_string()));
    }
    let process = state.table.insert(spec)?;
    tracing::info!(id = process.id(), name = %process.spec().name, "process created");
    Ok(Json(CreateResponse {
        message: "ok".to_string(),
        pid: process.id().to_string(),
    }))
}

async fn show_proc(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<ShowResponse>, ApiError> {
    let process = state.table.find(&pid)?;
    Ok(Json(ShowResponse {
        message: "ok".to_string(),
        process: process.view(),
    }))
}

async fn remove_proc(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let process = state.table.remove(&pid)?;
    tracing::info!(id = process.id(), "process removed");
    Ok(Json(MessageResponse::ok()))
}

/// Claims the process and runs it on the blocking pool; returns at once.
async fn start_proc(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let process = state.table.find(&pid)?;
    process.claim()?;
    tokio::task::spawn_blocking(move || run_claimed(process, state.log_dir, state.engine));
    Ok(Json(MessageResponse::ok()))
}

fn run_claimed(process: Arc<Process>, log_dir: PathBuf, engine: EngineConfig) {
    match process.execute(&log_dir, &engine) {
        Ok(()) => tracing::info!(id = process.id(), "process finished"),
        Err(err) => tracing::warn!(id = process.id(), error = %err, "process failed"),
    }
}

async fn show_output(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Response, ApiError> {
    let process = state.table.find(&pid)?;
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], process.output()).into_response())
}

/// Streams one command's log as it is written; ends with the command.
async fn tail_log(
    State(state): State<AppState>,
    Path((pid, index)): Path<(String, usize)>,
    Query(query): Query<TailQuery>,
) -> Result<Response, ApiError> {
    let process = state.table.find(&pid)?;
    if index == 0 || index > process.command_count() {
        return Err(ApiError::NotFound(format!(
            "process {} has no command {}",
            process.id(),
            index
        )));
    }
    let tag = match query.stream.as_deref() {
        None => StreamTag::Stdout,
        Some(name) => name
            .parse::<StreamTag>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };
    let path = process.log_path(&state.log_dir, index);
    if !path.exists() {
        return Err(ApiError::NotFound(format!(
            "command {} of process {} has not started",
            index,
            process.id()
        )));
    }

    let options = state.engine.replay_options(ReplayMode::Follow);
    let stream = LogStream::follow(&path, tag, options)?;
    Ok((
        [(CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn write_input(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let process = state.table.find(&pid)?;
    process
        .write_input(&body)
        .map_err(|e| ApiError::NotRunning(e.to_string()))?;
    Ok(Json(MessageResponse::ok()))
}
