//! Shared daemon state.
//!
//! `AppState` holds the read-only config snapshot and the process-wide
//! handles (HTTP client, embedding backend, LLM provider). Per-repository
//! services are created lazily on first touch and cached in a map keyed by
//! the canonical repo path; each entry carries the repo's stores and the
//! locks that serialize index runs against queries.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, DATA_DIR_NAME};
use crate::errors::ApiError;
use crate::llm::embeddings::{backend_from_config, EmbeddingBackend, EmbeddingService};
use crate::llm::provider::LlmProvider;
use crate::llm::rewrite::QueryRewriter;
use crate::llm::summarize::ChunkSummarizer;
use crate::metadata::MetadataStore;
use crate::search::vector::VectorStore;

/// Per-repository services plus the readers–writer lock discipline:
/// `/index` holds `write_gate` (fail-fast) and then the `rw` write half for
/// its whole duration; `/query` takes the read half; `/status` try-reads.
pub struct RepoState {
    pub repo_path: PathBuf,
    pub write_gate: tokio::sync::Mutex<()>,
    pub rw: tokio::sync::RwLock<()>,
    pub metadata: Arc<MetadataStore>,
    pub vectors: Arc<VectorStore>,
    pub embeddings: Arc<EmbeddingService>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: reqwest::Client,
    pub backend: Arc<dyn EmbeddingBackend>,
    pub llm: Arc<LlmProvider>,
    pub rewriter: Option<Arc<QueryRewriter>>,
    pub summarizer: Option<Arc<ChunkSummarizer>>,
    repos: Arc<RwLock<HashMap<PathBuf, Arc<RepoState>>>>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        let backend = backend_from_config(&config.embedding, &http_client)?;
        let llm = Arc::new(LlmProvider::from_config(&config.llm, &http_client));

        let rewriter = (config.llm.enable_rewrite && llm.is_enabled()).then(|| {
            Arc::new(QueryRewriter::new(
                llm.clone(),
                config.llm.rewrite_model(),
                config.llm.rewrite_cache_size,
            ))
        });
        let summarizer = (config.llm.summarize_on_index && llm.is_enabled()).then(|| {
            Arc::new(ChunkSummarizer::new(
                llm.clone(),
                config.llm.summary_model(),
                config.llm.summary_max_chars,
            ))
        });

        Ok(Self {
            config: Arc::new(config),
            http_client,
            backend,
            llm,
            rewriter,
            summarizer,
            repos: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Get or lazily create the services for a canonical repo path.
    pub fn repo_state(&self, repo_path: &Path) -> Result<Arc<RepoState>> {
        if let Some(existing) = self.repos.read().get(repo_path) {
            return Ok(existing.clone());
        }

        let data_root = repo_path.join(DATA_DIR_NAME);
        let metadata = Arc::new(MetadataStore::open(&data_root.join("metadata.db"))?);
        let vectors = Arc::new(VectorStore::open(
            &data_root.join("vectors"),
            &VectorStore::collection_name(repo_path),
        )?);
        let embeddings = Arc::new(EmbeddingService::new(self.backend.clone(), metadata.clone()));

        let state = Arc::new(RepoState {
            repo_path: repo_path.to_path_buf(),
            write_gate: tokio::sync::Mutex::new(()),
            rw: tokio::sync::RwLock::new(()),
            metadata,
            vectors,
            embeddings,
        });

        // A racing creator may have won; keep whichever landed first.
        let mut repos = self.repos.write();
        let entry = repos
            .entry(repo_path.to_path_buf())
            .or_insert_with(|| state.clone());
        Ok(entry.clone())
    }
}

/// Canonicalize a client-supplied repo path and require an existing
/// directory.
pub fn resolve_repo_path(raw: &str) -> Result<PathBuf, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::invalid_repo(raw));
    }
    let canonical = std::fs::canonicalize(trimmed).map_err(|_| ApiError::invalid_repo(trimmed))?;
    if !canonical.is_dir() {
        return Err(ApiError::invalid_repo(trimmed));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_state() -> AppState {
        AppState::new(Config::default()).unwrap()
    }

    #[test]
    fn test_resolve_rejects_missing_path() {
        let err = resolve_repo_path("/definitely/not/a/real/path").unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::InvalidRepo);
    }

    #[test]
    fn test_resolve_rejects_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = resolve_repo_path(&file.to_string_lossy()).unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::InvalidRepo);
    }

    #[test]
    fn test_resolve_accepts_directory() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_repo_path(&dir.path().to_string_lossy()).unwrap();
        assert!(resolved.is_dir());
    }

    #[test]
    fn test_repo_state_is_cached_per_path() {
        let state = app_state();
        let dir = tempfile::tempdir().unwrap();
        let repo = resolve_repo_path(&dir.path().to_string_lossy()).unwrap();

        let first = state.repo_state(&repo).unwrap();
        let second = state.repo_state(&repo).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(repo.join(DATA_DIR_NAME).exists());
    }

    #[test]
    fn test_llm_disabled_by_default() {
        let state = app_state();
        assert!(!state.llm.is_enabled());
        assert!(state.rewriter.is_none());
        assert!(state.summarizer.is_none());
    }
}
