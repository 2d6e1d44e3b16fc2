use crate::handlers::language::language_for_filename;
use crate::models::error::{api_error, ApiError};
use crate::models::{FileContentResponse, SaveFileRequest, SaveFileResponse};
use crate::routes::AppState;
use crate::services::StagedFile;
use crate::ws::HubError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Validate the id and resolve it in the file registry.
pub(crate) async fn lookup_file(
    state: &AppState,
    fileid: &str,
) -> Result<Arc<StagedFile>, ApiError> {
    if fileid.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "fileid is required"));
    }
    if Uuid::parse_str(fileid).is_err() {
        return Err(api_error(StatusCode::BAD_REQUEST, "invalid fileid format"));
    }
    state
        .files
        .get(fileid)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "file not found"))
}

/// `GET /api/file/{id}`: current file contents plus room metadata.
pub async fn get_file(
    State(state): State<AppState>,
    Path(fileid): Path<String>,
) -> Result<Json<FileContentResponse>, ApiError> {
    let file = lookup_file(&state, &fileid).await?;
    let content = file.read_content().await.map_err(|e| {
        error!(fileid = %fileid, err = %e, "failed to read file");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file")
    })?;
    let filename = file.filename().await.unwrap_or_default();

    Ok(Json(FileContentResponse {
        fileid: fileid.clone(),
        content: String::from_utf8_lossy(&content).into_owned(),
        language: language_for_filename(&filename).to_string(),
        roomexists: state.hubs.exists_hub(&fileid).await,
        filename,
    }))
}

/// `PUT /api/file/{id}`: write the new contents locally, then round-trip the
/// save through the editing hub so the originating client confirms it.
pub async fn save_file(
    State(state): State<AppState>,
    Path(fileid): Path<String>,
    Json(save_req): Json<SaveFileRequest>,
) -> Result<Json<SaveFileResponse>, ApiError> {
    let file = lookup_file(&state, &fileid).await?;
    let hub = state
        .hubs
        .get_hub(&fileid)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "editing hub not found"))?;

    info!(fileid = %fileid, content_length = save_req.content.len(), "saving file");
    file.write_content(save_req.content.as_bytes())
        .await
        .map_err(|e| {
            error!(fileid = %fileid, err = %e, "failed to write file");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save file")
        })?;

    hub.notify_session_save(&save_req.content)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match hub.wait_save_result().await {
        Ok(()) => Ok(Json(SaveFileResponse {
            message: "file saved successfully".to_string(),
        })),
        Err(HubError::SaveRejected(reason)) => {
            error!(fileid = %fileid, reason = %reason, "client rejected save");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, reason))
        }
        Err(e) => {
            error!(fileid = %fileid, err = %e, "save confirmation failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
