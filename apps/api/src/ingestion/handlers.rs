use std::io::Write;
use std::path::Path as FsPath;

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::errors::AppError;
use crate::ingestion::pipeline::{ConfirmRequest, ConfirmResponse};
use crate::ingestion::run::{AnalysisRun, RunState};
use crate::state::AppState;

/// Failed runs are returned with the status matching their failure kind.
fn run_response(run: AnalysisRun) -> (StatusCode, Json<AnalysisRun>) {
    let status = match (&run.state, &run.failure) {
        (RunState::Failed, Some(failure)) => failure.kind.http_status(),
        _ => StatusCode::OK,
    };
    (status, Json(run))
}

/// POST /api/v1/consultants/:id/cv
pub async fn handle_upload_cv(
    State(state): State<AppState>,
    Path(consultant_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AnalysisRun>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;

        let spool = spool_upload(&file_name, bytes.to_vec()).await?;
        let run = state
            .pipeline
            .analyze(consultant_id, &file_name, spool.path())
            .await?;
        return Ok(run_response(run));
    }

    Err(AppError::Validation(
        "Multipart body must contain a 'file' field".to_string(),
    ))
}

/// Writes the upload to a temp file off the async executor.
/// The extension is kept: the extractor dispatches on it.
async fn spool_upload(file_name: &str, bytes: Vec<u8>) -> Result<NamedTempFile, AppError> {
    let suffix = FsPath::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let spooled = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut spool = tempfile::Builder::new()
            .prefix("cv-")
            .suffix(&suffix)
            .tempfile()?;
        spool.write_all(&bytes)?;
        spool.flush()?;
        Ok(spool)
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    spooled.map_err(|e| AppError::Internal(e.into()))
}

/// GET /api/v1/runs/:run_id
pub async fn handle_get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<AnalysisRun>, AppError> {
    Ok(Json(state.pipeline.get(run_id).await?))
}

/// POST /api/v1/runs/:run_id/reanalyze
pub async fn handle_reanalyze(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<(StatusCode, Json<AnalysisRun>), AppError> {
    let run = state.pipeline.reanalyze(run_id).await?;
    Ok(run_response(run))
}

/// POST /api/v1/runs/:run_id/confirm
pub async fn handle_confirm(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let Json(req) =
        payload.map_err(|e| AppError::Validation(format!("Invalid confirm body: {}", e.body_text())))?;
    Ok(Json(state.pipeline.confirm(run_id, req).await?))
}

/// POST /api/v1/runs/:run_id/discard
pub async fn handle_discard(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<AnalysisRun>, AppError> {
    Ok(Json(state.pipeline.discard(run_id).await?))
}
