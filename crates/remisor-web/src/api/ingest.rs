use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::Field},
    http::StatusCode,
    routing::{get, post},
};
use remisor_core::source::safe_file_name;
use remisor_core::{IngestError, IngestOutput, RawSource};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(ingest_batch))
        .route("/single", post(ingest_single))
        .route("/status", get(status))
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub loaded: Vec<IngestOutput>,
    pub errors: Vec<String>,
    pub messages: Vec<String>,
    pub total_rows: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Tables still to be uploaded
    pub missing: Vec<String>,
    pub ready: bool,
}

type ApiError = (StatusCode, String);

fn ingest_error(error: &IngestError) -> ApiError {
    let status = match error {
        IngestError::Validation(_) => StatusCode::BAD_REQUEST,
        IngestError::Transform { .. } | IngestError::Load { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}

static STAGED: AtomicU64 = AtomicU64::new(0);

/// Spooled upload files; whatever ingestion did not move away is removed on drop
#[derive(Default)]
struct StagedFiles(Vec<PathBuf>);

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "discarded staged upload"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not discard staged upload"),
            }
        }
    }
}

fn bad_request(e: impl ToString) -> ApiError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn internal(e: &std::io::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn staging_path(dir: &Path, filename: &str) -> PathBuf {
    let n = STAGED.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(
        ".{}-{n}-{}.part",
        std::process::id(),
        safe_file_name(filename)
    ))
}

/// Stream one part to `path` chunk by chunk
async fn spool(field: &mut Field<'_>, path: &Path) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(path).await.map_err(|e| internal(&e))?;
    let mut written = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(bad_request)? {
        file.write_all(&chunk).await.map_err(|e| internal(&e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| internal(&e))?;

    Ok(written)
}

/// Every file part of the form, spooled under `dir`; parts without a file name are ignored
async fn read_uploads(
    dir: &Path,
    mut multipart: Multipart,
) -> Result<(Vec<RawSource>, StagedFiles), ApiError> {
    let mut staged = StagedFiles::default();
    let mut uploads = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(bad_request)? {
        let Some(filename) = field.file_name().filter(|n| !n.is_empty()).map(str::to_string)
        else {
            continue;
        };

        let path = staging_path(dir, &filename);
        staged.0.push(path.clone());
        let bytes = spool(&mut field, &path).await?;

        tracing::debug!(file = %filename, bytes, "upload received");
        uploads.push(RawSource::staged(filename, path));
    }

    if uploads.is_empty() {
        return Err(bad_request("No files were selected"));
    }
    Ok((uploads, staged))
}

async fn ingest_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let config = state.pipeline.config();
    config.ensure_dirs().map_err(|e| internal(&e))?;
    let (uploads, _staged) = read_uploads(&config.upload_dir, multipart).await?;

    let result = state
        .pipeline
        .ingest_batch(uploads)
        .await
        .map_err(|e| ingest_error(&e))?;

    let messages = result.messages();
    let total_rows = result.total_rows();
    let errors = result.failed.iter().map(|(_, e)| e.to_string()).collect();

    Ok(Json(IngestResponse {
        loaded: result.successful,
        errors,
        messages,
        total_rows,
    }))
}

async fn ingest_single(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let config = state.pipeline.config();
    config.ensure_dirs().map_err(|e| internal(&e))?;
    let (mut uploads, _staged) = read_uploads(&config.upload_dir, multipart).await?;
    if uploads.len() != 1 {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Expected exactly one file, got {}", uploads.len()),
        ));
    }
    let Some(upload) = uploads.pop() else {
        return Err((StatusCode::BAD_REQUEST, "No files were selected".to_string()));
    };

    let output = state
        .pipeline
        .ingest_single(upload)
        .await
        .map_err(|e| ingest_error(&e))?;

    let message = format!(
        "'{}' cleaned and loaded into {} ({} rows)",
        output.filename, output.table, output.load.rows_loaded
    );

    Ok(Json(IngestResponse {
        total_rows: output.load.rows_loaded,
        loaded: vec![output],
        errors: Vec::new(),
        messages: vec![message],
    }))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let missing: Vec<String> = state
        .pipeline
        .missing_sources()
        .await
        .map_err(|e| ingest_error(&e))?
        .into_iter()
        .map(|k| k.as_str().to_string())
        .collect();

    Ok(Json(StatusResponse {
        ready: missing.is_empty(),
        missing,
    }))
}
