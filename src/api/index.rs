use axum::extract::State;
use axum::Json;

use crate::chunking::ChunkBuilder;
use crate::errors::ApiError;
use crate::indexer::Indexer;
use crate::models::{IndexRequest, IndexResponse};
use crate::state::{resolve_repo_path, AppState};

/// POST /index - Incrementally (re)index a repository.
///
/// Takes the repo's write gate with `try_lock` so a second concurrent index
/// on the same repo fails fast with BUSY, then holds the write half of the
/// readers–writer lock for the whole run. The run itself is spawned so a
/// client disconnect never leaves a half-finished index behind.
pub async fn index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ApiError> {
    let repo_path = resolve_repo_path(&req.repo_path)?;
    let repo = state.repo_state(&repo_path).map_err(ApiError::from)?;
    let repo_display = repo_path.display().to_string();

    let indexer = Indexer::new(
        ChunkBuilder::new(state.config.chunk_min_tokens, state.config.chunk_max_tokens),
        state.summarizer.clone(),
    );

    let rebuild = req.rebuild;
    let busy_display = repo_display.clone();
    let task = tokio::spawn(async move {
        let Ok(_gate) = repo.write_gate.try_lock() else {
            return Err(ApiError::busy(&busy_display));
        };
        let _write = repo.rw.write().await;
        indexer.index(&repo, rebuild).await.map_err(ApiError::from)
    });
    let stats = task
        .await
        .map_err(|err| ApiError::internal(format!("Index task failed: {err}")))??;

    Ok(Json(IndexResponse {
        status: "ok",
        repo_path: repo_display,
        files_scanned: stats.files_scanned,
        files_indexed: stats.files_indexed,
        files_deleted: stats.files_deleted,
        chunks_indexed: stats.chunks_indexed,
        duration_ms: stats.duration_ms,
    }))
}
