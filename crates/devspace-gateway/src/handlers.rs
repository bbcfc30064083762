//! HTTP handlers.

use std::collections::BTreeMap;

use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::AppState;
use crate::archive::{self, ArchiveLimits};
use crate::error::GatewayError;
use crate::protocol::ServerEvent;
use crate::runner::Dispatch;
use crate::terminal::TerminalState;
use crate::tree::TreeNode;

type JsonBody<T> = WithRejection<Json<T>, GatewayError>;
type QueryParams<T> = WithRejection<Query<T>, GatewayError>;

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFileRequest {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub old_path: String,
    pub new_path: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProjectRequest {
    pub file_tree: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub status: &'static str,
    pub root: String,
    pub terminal: TerminalState,
}

#[derive(Debug, Serialize)]
pub struct TreeResponse {
    pub tree: TreeNode,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Accepted,
    NoRunner,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub ok: bool,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        status: "ok",
        root: state.workspace.root().display().to_string(),
        terminal: state.terminal.state(),
    })
}

/// GET /files
pub async fn get_tree(State(state): State<AppState>) -> Result<Json<TreeResponse>, GatewayError> {
    let tree = state.workspace.snapshot().await?;
    Ok(Json(TreeResponse { tree }))
}

/// GET /files/content?path=
pub async fn get_content(
    State(state): State<AppState>,
    WithRejection(Query(query), _): QueryParams<PathQuery>,
) -> Result<Json<ContentResponse>, GatewayError> {
    let content = state.workspace.read_file(&query.path).await?;
    Ok(Json(ContentResponse { content }))
}

/// POST /files/create-file
pub async fn create_file(
    State(state): State<AppState>,
    WithRejection(Json(req), _): JsonBody<CreateFileRequest>,
) -> Result<Json<OkResponse>, GatewayError> {
    state.workspace.create_file(&req.path, &req.content).await?;
    Ok(OkResponse::ok())
}

/// POST /files/create-folder
pub async fn create_folder(
    State(state): State<AppState>,
    WithRejection(Json(req), _): JsonBody<PathRequest>,
) -> Result<Json<OkResponse>, GatewayError> {
    state.workspace.create_folder(&req.path).await?;
    Ok(OkResponse::ok())
}

/// POST /files/write
pub async fn write_file(
    State(state): State<AppState>,
    WithRejection(Json(req), _): JsonBody<WriteRequest>,
) -> Result<Json<OkResponse>, GatewayError> {
    state.workspace.write_file(&req.path, &req.content).await?;
    Ok(OkResponse::ok())
}

/// POST /files/rename
pub async fn rename(
    State(state): State<AppState>,
    WithRejection(Json(req), _): JsonBody<RenameRequest>,
) -> Result<Json<OkResponse>, GatewayError> {
    state
        .workspace
        .rename(&req.old_path, &req.new_path, req.overwrite)
        .await?;
    Ok(OkResponse::ok())
}

/// POST /files/delete
pub async fn delete(
    State(state): State<AppState>,
    WithRejection(Json(req), _): JsonBody<PathRequest>,
) -> Result<Json<OkResponse>, GatewayError> {
    state.workspace.delete(&req.path).await?;
    Ok(OkResponse::ok())
}

/// POST /files/upload-project
pub async fn upload_project(
    State(state): State<AppState>,
    WithRejection(Json(req), _): JsonBody<UploadProjectRequest>,
) -> Result<Json<OkResponse>, GatewayError> {
    state.workspace.upload_project(&req.file_tree).await?;
    Ok(OkResponse::ok())
}

/// GET /files/download-folder?path= - Stream a folder as a zip archive
pub async fn download_folder(
    State(state): State<AppState>,
    WithRejection(Query(query), _): QueryParams<PathQuery>,
) -> Result<Response, GatewayError> {
    let resolver = state.workspace.resolver();
    let dir = resolver.resolve(&query.path).await?;

    let metadata = fs::metadata(&dir)
        .await
        .map_err(|err| GatewayError::from_io(err, &query.path))?;
    if !metadata.is_dir() {
        return Err(GatewayError::NotADirectory(query.path));
    }

    let zip_name = if resolver.is_root(&dir) {
        "workspace.zip".to_string()
    } else {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "folder".to_string());
        format!("{name}.zip")
    };
    let safe_zip_name = zip_name.replace('"', "'");

    debug!("Downloading directory as zip: {}", dir.display());
    let limits = ArchiveLimits::from_config(&state.config);
    let (zip_file, zip_size) = archive::zip_directory(dir, limits).await?;
    let body = Body::from_stream(ReaderStream::new(zip_file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, zip_size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", safe_zip_name),
            ),
        ],
        body,
    )
        .into_response())
}

/// POST /run
pub async fn run(
    State(state): State<AppState>,
    WithRejection(Json(req), _): JsonBody<PathRequest>,
) -> Result<Json<RunResponse>, GatewayError> {
    let response = match state.runner.dispatch(&req.path).await? {
        Dispatch::Accepted { command } => {
            state.hub.publish(ServerEvent::RunAccepted {
                path: req.path,
                command: command.clone(),
            });
            RunResponse {
                ok: true,
                status: RunStatus::Accepted,
                command: Some(command),
            }
        }
        Dispatch::NoRunner { .. } => RunResponse {
            ok: true,
            status: RunStatus::NoRunner,
            command: None,
        },
    };
    Ok(Json(response))
}
