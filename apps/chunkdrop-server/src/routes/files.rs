//! File listing and download routes
//!
//! Stored files are listed and served under their transformed names when
//! name obfuscation is on; download bodies are always transformed.

use std::io;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Serialize;

use crate::codec::encode_reader;
use crate::error::{AppError, Result};
use crate::security::SecurityEventKind;
use crate::state::AppState;
use crate::storage::sanitize;

/// One entry of `GET /files`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub size_kb: f64,
}

/// GET /files
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileEntry>>> {
    let obfuscate = state.config().security.obfuscate_names;

    let entries = state
        .uploads()
        .list()
        .await?
        .into_iter()
        .map(|file| FileEntry {
            name: if obfuscate {
                state.codec().transform_name(&file.name)
            } else {
                file.name
            },
            size: file.size,
            size_kb: kilobytes(file.size),
        })
        .collect();

    Ok(Json(entries))
}

/// GET /download/:name
///
/// `name` is reversed through the name transform when it decodes as one,
/// otherwise taken as-is, then sanitized.
pub async fn download_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(segment): Path<String>,
) -> Result<Response> {
    let requested = if state.config().security.obfuscate_names {
        state
            .codec()
            .reverse_name(&segment)
            .unwrap_or_else(|_| segment.clone())
    } else {
        segment.clone()
    };
    let name = sanitize(&requested);

    let path = match state.uploads().resolve(&name).await {
        Ok(path) => path,
        Err(e) => {
            if e.is_violation() {
                state
                    .security()
                    .record(
                        SecurityEventKind::PathTraversalAttempt,
                        &format!("Attempted path traversal in download: {} ({})", segment, e),
                        Some(addr.ip()),
                    )
                    .await;
            }
            return Err(e.into());
        }
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(AppError::NotFound(name)),
        Err(e) => return Err(e.into()),
    };
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(AppError::NotFound(name));
    }

    tracing::info!(file_name = %name, size = metadata.len(), "Serving download");

    let body = Body::from_stream(encode_reader(file, state.codec().clone()));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_DISPOSITION, content_disposition(&name))
        .body(body)
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// `attachment` disposition for `{name}.enc`.
///
/// Names that are not plain visible ASCII get a substituted `filename` and
/// the exact name as an RFC 5987 `filename*`.
fn content_disposition(name: &str) -> String {
    let file_name = format!("{}.enc", name);
    if file_name.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return format!("attachment; filename=\"{}\"", file_name);
    }

    let fallback: String = file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(&file_name)
    )
}

/// Size in KiB, one decimal
fn kilobytes(size: u64) -> f64 {
    (size as f64 / 1024.0 * 10.0).round() / 10.0
}
