//! Read-only HTTP surface over published instances.
//!
//! `GET /instances/{instance}` returns the manifest, `GET /download/{instance}/{*path}`
//! streams one file of the extracted tree.
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use crate::config::Config;
use crate::error::IngestError;
use crate::manifest::{Manifest, ManifestStore};
use crate::path_safety::{validate_instance_name, validate_path};

pub const INSTANCE_NOT_FOUND: &str = "Instancia no encontrada";
pub const FILE_NOT_FOUND: &str = "Archivo no encontrado";
pub const ROUTE_NOT_FOUND: &str = "Ruta no encontrada";
pub const INTERNAL_ERROR: &str = "Error interno del servidor";

struct AppState {
    config: Arc<Config>,
    store: ManifestStore,
}

/// Error half of every handler. Rendered as `{ "error": "..." }`.
#[derive(Debug)]
pub enum AppError {
    NotFound(&'static str),
    Internal(IngestError),
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        AppError::Internal(e)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            AppError::Internal(e) => {
                error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": INTERNAL_ERROR })))
                    .into_response()
            }
        }
    }
}

pub fn router(config: Arc<Config>) -> Router {
    let store = ManifestStore::new(config.extracted_dir());
    let state = Arc::new(AppState { config, store });
    Router::new()
        .route("/instances/{instance}", get(get_instance))
        .route("/download/{instance}/{*path}", get(download_file))
        .fallback(fallback)
        .with_state(state)
}

pub async fn serve(listener: TcpListener, config: Arc<Config>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, base_url = %config.base_url, "serving instances");
    }
    axum::serve(listener, router(config)).await
}

async fn get_instance(
    State(state): State<Arc<AppState>>,
    UrlPath(instance): UrlPath<String>,
) -> Result<Json<Manifest>, AppError> {
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.load(&instance)).await? {
        Ok(m) => Ok(Json(m)),
        Err(e) if e.is_not_found() => Err(AppError::NotFound(INSTANCE_NOT_FOUND)),
        Err(e) => Err(e.into()),
    }
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    UrlPath((instance, path)): UrlPath<(String, String)>,
) -> Result<Response, AppError> {
    if validate_instance_name(&instance).is_err() {
        return Err(AppError::NotFound(FILE_NOT_FOUND));
    }
    let root = state.config.instance_dir(&instance);
    let full = validate_path(&root, Path::new(&path))
        .map_err(|_| AppError::NotFound(FILE_NOT_FOUND))?;

    let file = match tokio::fs::File::open(&full).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(FILE_NOT_FOUND))
        }
        Err(e) => return Err(IngestError::io(&full, e).into()),
    };
    let meta = file.metadata().await.map_err(|e| IngestError::io(&full, e))?;
    if !meta.is_file() {
        return Err(AppError::NotFound(FILE_NOT_FOUND));
    }

    let mut res = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
    headers.insert(header::CONTENT_DISPOSITION, disposition(&full));
    Ok(res)
}

async fn fallback() -> AppError {
    AppError::NotFound(ROUTE_NOT_FOUND)
}

fn disposition(path: &Path) -> HeaderValue {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', "_"))
        .unwrap_or_default();
    HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
