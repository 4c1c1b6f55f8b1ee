//! HTTP server: rooms over WebSocket, health, metrics, project inspection
//!
//! Routes:
//! - `GET /ws/:room` - WebSocket room endpoint
//! - `GET /healthz`
//! - `GET /metrics` - Prometheus text format
//! - `GET /api/projects` - project slugs
//! - `GET /api/projects/:slug/versions` - project record and version list
//! - `GET /api/projects/:slug/download` - zip of the live site
//! - `GET /sites/:slug/*path` - live site preview

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use super::rate_limit::RoomLimiters;
use super::rooms::RoomHub;
use super::ws::ws_handler;
use crate::metrics;
use crate::storage::{normalize_path, project_path, FileStorage, StorageError};
use crate::studio::Studio;
use crate::tools::ENTRY_FILE;
use crate::versioning::{CodeVersion, Project, VersionError};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub studio: Arc<Studio>,
    pub hub: Arc<RoomHub>,
    pub limiters: Arc<RoomLimiters>,
}

impl AppState {
    pub fn new(studio: Arc<Studio>, hub: Arc<RoomHub>, limiters: RoomLimiters) -> Self {
        Self {
            studio,
            hub,
            limiters: Arc::new(limiters),
        }
    }
}

type ApiError = (StatusCode, String);

fn storage_error(e: StorageError) -> ApiError {
    match e {
        StorageError::NotFound(path) => (StatusCode::NOT_FOUND, format!("Not found: {}", path)),
        StorageError::InvalidPath(path) => (StatusCode::BAD_REQUEST, format!("Invalid path: {}", path)),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

fn version_error(e: VersionError) -> ApiError {
    match e {
        VersionError::ProjectNotFound(slug) => (StatusCode::NOT_FOUND, format!("Project not found: {}", slug)),
        VersionError::Storage(e) => storage_error(e),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/ws/:room", get(ws_handler))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/:slug/versions", get(project_versions))
        .route("/api/projects/:slug/download", get(download_project))
        .route("/sites/:slug", get(site_index))
        .route("/sites/:slug/*path", get(site_file))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    active_builds: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        active_builds: state.studio.active_builds(),
    })
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let folders = state
        .studio
        .services()
        .storage
        .list_folders("")
        .await
        .map_err(storage_error)?;
    Ok(Json(folders))
}

#[derive(Serialize)]
struct VersionListing {
    project: Project,
    versions: Vec<CodeVersion>,
}

async fn project_versions(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<VersionListing>, ApiError> {
    let versions = &state.studio.services().versions;
    let project = versions.project(&slug).await.map_err(version_error)?;
    let list = versions.versions(&slug).await.map_err(version_error)?;
    Ok(Json(VersionListing {
        project,
        versions: list,
    }))
}

async fn download_project(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let storage = &state.studio.services().storage;
    let prefix = normalize_path(&slug).map_err(storage_error)?;
    if !storage.exists(&project_path(&slug, ENTRY_FILE).map_err(storage_error)?).await {
        return Err((StatusCode::NOT_FOUND, format!("Project not found: {}", slug)));
    }
    let stream = storage.create_zip_stream(&prefix).await.map_err(storage_error)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.zip\"", slug),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()).as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

async fn serve_site_file(state: &AppState, slug: &str, path: &str) -> Result<Response, ApiError> {
    let relative = normalize_path(path).map_err(storage_error)?;
    if relative == "versions" || relative.starts_with("versions/") {
        return Err((StatusCode::NOT_FOUND, "Not found".to_string()));
    }
    let full = project_path(slug, &relative).map_err(storage_error)?;
    let content = state
        .studio
        .services()
        .storage
        .read_file(&full)
        .await
        .map_err(storage_error)?;
    Ok(([(header::CONTENT_TYPE, content_type(path))], content).into_response())
}

async fn site_index(State(state): State<AppState>, Path(slug): Path<String>) -> Result<Response, ApiError> {
    serve_site_file(&state, &slug, ENTRY_FILE).await
}

async fn site_file(
    State(state): State<AppState>,
    Path((slug, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let path = if path.is_empty() || path.ends_with('/') {
        format!("{}{}", path, ENTRY_FILE)
    } else {
        path
    };
    serve_site_file(&state, &slug, &path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("css/SITE.CSS"), "text/css; charset=utf-8");
        assert_eq!(content_type("logo.png"), "application/octet-stream");
        assert_eq!(content_type("README"), "application/octet-stream");
    }

    #[test]
    fn test_error_mapping() {
        let (status, _) = version_error(VersionError::ProjectNotFound("x".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = storage_error(StorageError::InvalidPath("../x".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
