use axum::extract::State;
use axum::Json;

use crate::errors::ApiError;
use crate::models::{QueryRequest, QueryResponse, QueryResult};
use crate::query::QueryEngine;
use crate::state::{resolve_repo_path, AppState};

/// POST /query - Answer a natural-language question with ranked jump
/// targets. Holds the repo's read lock; any number of queries may run
/// concurrently. The pipeline is spawned so a client disconnect only
/// abandons the response, keeping the caches consistent.
pub async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let repo_path = resolve_repo_path(&req.repo_path)?;
    let repo = state.repo_state(&repo_path).map_err(ApiError::from)?;

    let engine = QueryEngine::new(
        state.config.clone(),
        state.http_client.clone(),
        state.llm.clone(),
        state.rewriter.clone(),
    );

    let query_text = req.query.clone();
    let top_k = req.top_k;
    let task = tokio::spawn(async move {
        let _read = repo.rw.read().await;
        engine.query(&repo, &query_text, top_k).await
    });
    let outcome = task
        .await
        .map_err(|err| ApiError::internal(format!("Query task failed: {err}")))??;

    tracing::info!(
        "Query repo={} top_k={} results={} used_llm={} duration_ms={}",
        repo_path.display(),
        req.top_k,
        outcome.matches.len(),
        outcome.used_llm,
        outcome.duration_ms,
    );

    Ok(Json(QueryResponse {
        status: "ok",
        repo_path: repo_path.display().to_string(),
        query: req.query,
        results: outcome.matches.iter().map(QueryResult::from).collect(),
        duration_ms: outcome.duration_ms,
        selection: outcome.selection,
        selection_source: outcome.selection_source,
        used_llm: Some(outcome.used_llm),
        llm_model: outcome.llm_model,
        llm_latency_ms: outcome.llm_latency_ms,
        rewritten_query: outcome.rewritten_query,
    }))
}
