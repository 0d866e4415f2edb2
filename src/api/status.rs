use axum::extract::{Query, State};
use axum::Json;

use crate::errors::ApiError;
use crate::models::{StatusParams, StatusResponse};
use crate::state::{resolve_repo_path, AppState};

/// GET /status?repo_path=… - Repo index statistics.
///
/// Uses `try_read` so it never blocks behind a running index; when the
/// write lock is held it reports `healthy=false, reason="indexing"`.
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusResponse>, ApiError> {
    let repo_path = resolve_repo_path(&params.repo_path)?;
    let repo = state.repo_state(&repo_path).map_err(ApiError::from)?;

    let (healthy, reason) = match repo.rw.try_read() {
        Ok(_guard) => (true, None),
        Err(_) => (false, Some("indexing")),
    };

    let (indexed_files, indexed_chunks, last_indexed_at) =
        repo.metadata.status().map_err(ApiError::from)?;

    Ok(Json(StatusResponse {
        status: "ok",
        repo_path: repo_path.display().to_string(),
        indexed_files,
        indexed_chunks,
        model: state.backend.model_id().to_string(),
        healthy,
        reason,
        last_indexed_at,
    }))
}
