//! Integration tests for the indexing and query pipeline.
//!
//! These exercise the full flow (walk → parse → chunk → enrich → embed →
//! upsert → query → score → select) against a demo repository generated
//! into a temp dir, using the deterministic hash embedding backend so no
//! model or network is needed. The LLM collaborator stays disabled; its
//! gating logic is covered at the unit level.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use xtrc::chunking::ChunkBuilder;
use xtrc::config::Config;
use xtrc::errors::ErrorCode;
use xtrc::indexer::Indexer;
use xtrc::llm::embeddings::{EmbeddingBackend, EmbeddingService, HashEmbedder};
use xtrc::llm::provider::LlmProvider;
use xtrc::metadata::MetadataStore;
use xtrc::models::{ChunkKind, SelectionSource};
use xtrc::query::QueryEngine;
use xtrc::search::vector::VectorStore;
use xtrc::state::RepoState;

const SCORE_JS: &str = r#"const scores = new Map();

function getUserScore(userId) {
  const entry = scores.get(userId);
  if (!entry) {
    return { userId, value: 0, samples: 0 };
  }
  return { userId, value: entry.value, samples: entry.samples };
}

function average(values) {
  if (!values.length) {
    return 0;
  }
  const total = values.reduce((acc, value) => acc + value, 0);
  return total / values.length;
}

function recomputeUserScore(userId, samples) {
  const value = average(samples);
  scores.set(userId, { value, samples: samples.length });
  return { userId, value };
}

module.exports = { getUserScore, average, recomputeUserScore };
"#;

const SERVER_JS: &str = r#"const express = require('express');
const { getUserScore, recomputeUserScore } = require('./score');

const app = express();
app.use(express.json());

app.get('/leaderboard', (req, res) => {
  const limit = Number(req.query.limit) || 10;
  res.json({ entries: [], limit });
});

app.post('/users/:userId/score/recompute', (req, res) => {
  const samples = req.body.samples || [];
  const result = recomputeUserScore(req.params.userId, samples);
  res.status(201).json(result);
});

app.listen(8080);
"#;

fn write_demo_app(root: &Path) {
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("src/score.js"), SCORE_JS).unwrap();
    std::fs::write(root.join("src/server.js"), SERVER_JS).unwrap();
}

fn make_repo() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("demo_app");
    std::fs::create_dir_all(&root).unwrap();
    write_demo_app(&root);
    let canonical = std::fs::canonicalize(&root).unwrap();
    (dir, canonical)
}

/// Backend wrapper recording every text actually sent to the model, to
/// observe cache behavior.
struct RecordingBackend {
    inner: HashEmbedder,
    texts: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn new(dimension: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
            texts: Mutex::new(Vec::new()),
        }
    }

    fn embedded_texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl EmbeddingBackend for RecordingBackend {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.texts.lock().extend(texts.iter().cloned());
        self.inner.embed(texts).await
    }
}

fn repo_state_with_backend(root: &Path, backend: Arc<dyn EmbeddingBackend>) -> Arc<RepoState> {
    let data = root.join(".xtrc");
    let metadata = Arc::new(MetadataStore::open(&data.join("metadata.db")).unwrap());
    let vectors = Arc::new(
        VectorStore::open(&data.join("vectors"), &VectorStore::collection_name(root)).unwrap(),
    );
    let embeddings = Arc::new(EmbeddingService::new(backend, metadata.clone()));
    Arc::new(RepoState {
        repo_path: root.to_path_buf(),
        write_gate: tokio::sync::Mutex::new(()),
        rw: tokio::sync::RwLock::new(()),
        metadata,
        vectors,
        embeddings,
    })
}

fn repo_state(root: &Path) -> Arc<RepoState> {
    repo_state_with_backend(root, Arc::new(HashEmbedder::new(256)))
}

fn indexer() -> Indexer {
    // The demo functions are small; a lower minimum keeps each one its own
    // chunk the way real-sized functions would be under the defaults.
    Indexer::new(ChunkBuilder::new(40, 800), None)
}

fn engine() -> QueryEngine {
    QueryEngine::new(
        Arc::new(Config::default()),
        reqwest::Client::new(),
        Arc::new(LlmProvider::Disabled),
        None,
    )
}

// ── end-to-end scenarios ────────────────────────────────

#[tokio::test]
async fn test_symbol_match_query_finds_get_user_score() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    let outcome = engine().query(&repo, "get user score", 3).await.unwrap();
    assert!(!outcome.matches.is_empty());

    let top = &outcome.matches[0];
    assert_eq!(top.payload.path, "src/score.js");
    assert_eq!(top.payload.symbol, "getUserScore");
    assert_eq!(top.symbol_score, 1.0);
    assert!(top.keyword_score >= 0.66, "keyword_score={}", top.keyword_score);
}

#[tokio::test]
async fn test_intent_and_route_query_finds_recompute_route() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    let outcome = engine()
        .query(&repo, "create new user score", 3)
        .await
        .unwrap();
    let top = &outcome.matches[0];

    assert_eq!(top.payload.path, "src/server.js");
    assert_eq!(top.payload.kind, ChunkKind::Route);
    assert_eq!(top.payload.http_method.as_deref(), Some("POST"));
    assert!(top
        .matched_intents
        .contains(&"create_resource".to_string()));
    assert_eq!(top.structural_score, 1.0);
}

#[tokio::test]
async fn test_selection_defaults_to_heuristic_top_result() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    let outcome = engine().query(&repo, "score calculation", 5).await.unwrap();
    assert!(!outcome.used_llm);
    assert_eq!(outcome.selection_source, Some(SelectionSource::Heuristic));

    let selection = outcome.selection.unwrap();
    let top = &outcome.matches[0];
    assert_eq!(selection.file, top.payload.path);
    assert_eq!(selection.line, top.payload.start_line);
    assert_eq!(selection.reason, "highest hybrid score");
}

#[tokio::test]
async fn test_incremental_reindex_only_touches_changed_file() {
    let (_dir, root) = make_repo();
    let backend = Arc::new(RecordingBackend::new(64));
    let repo = repo_state_with_backend(&root, backend.clone());

    let first = indexer().index(&repo, false).await.unwrap();
    assert_eq!(first.files_scanned, 2);
    assert_eq!(first.files_indexed, 2);
    let embedded_before = backend.embedded_texts().len();
    assert!(embedded_before > 0);

    // Rename `average` to `mean` in score.js only.
    let modified = SCORE_JS.replace("average", "mean");
    std::fs::write(root.join("src/score.js"), modified).unwrap();

    let second = indexer().index(&repo, false).await.unwrap();
    assert_eq!(second.files_indexed, 1);
    assert_eq!(second.files_deleted, 0);

    let new_texts = &backend.embedded_texts()[embedded_before..];
    assert!(!new_texts.is_empty());
    assert!(
        new_texts.iter().all(|text| !text.contains("src/server.js")),
        "server.js chunks must not be re-embedded"
    );
}

#[tokio::test]
async fn test_deleting_a_file_removes_its_chunks() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    std::fs::remove_file(root.join("src/score.js")).unwrap();
    let stats = indexer().index(&repo, false).await.unwrap();
    assert_eq!(stats.files_deleted, 1);

    // No chunks for the deleted file remain in either store.
    assert!(repo
        .metadata
        .chunk_ids_for_file("src/score.js")
        .unwrap()
        .is_empty());
    let mut metadata_ids = repo.metadata.all_chunk_ids().unwrap();
    let mut vector_ids = repo.vectors.chunk_ids();
    metadata_ids.sort();
    vector_ids.sort();
    assert_eq!(metadata_ids, vector_ids);

    let outcome = engine().query(&repo, "getUserScore", 5).await.unwrap();
    assert!(outcome
        .matches
        .iter()
        .all(|m| m.payload.path != "src/score.js"));
}

#[tokio::test]
async fn test_reindex_without_changes_is_a_noop() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);

    let first = indexer().index(&repo, false).await.unwrap();
    assert!(first.chunks_indexed > 0);

    let second = indexer().index(&repo, false).await.unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_deleted, 0);
    assert_eq!(second.chunks_indexed, 0);
    assert_eq!(second.files_scanned, first.files_scanned);
}

#[tokio::test]
async fn test_rebuild_produces_same_chunk_counts() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);

    let rebuilt = indexer().index(&repo, true).await.unwrap();
    let (_, chunks_after_rebuild, _) = repo.metadata.status().unwrap();
    assert_eq!(rebuilt.chunks_indexed, chunks_after_rebuild);

    let incremental = indexer().index(&repo, false).await.unwrap();
    assert_eq!(incremental.chunks_indexed, 0);
    let (_, chunks_after_incremental, _) = repo.metadata.status().unwrap();
    assert_eq!(chunks_after_rebuild, chunks_after_incremental);
}

#[tokio::test]
async fn test_rebuild_reuses_embedding_cache() {
    let (_dir, root) = make_repo();
    let backend = Arc::new(RecordingBackend::new(64));
    let repo = repo_state_with_backend(&root, backend.clone());

    indexer().index(&repo, false).await.unwrap();
    let calls_after_first = backend.embedded_texts().len();

    indexer().index(&repo, true).await.unwrap();
    assert_eq!(
        backend.embedded_texts().len(),
        calls_after_first,
        "unchanged chunks must resolve from the embedding cache on rebuild"
    );
}

#[tokio::test]
async fn test_metadata_and_vector_store_stay_in_sync() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    let mut metadata_ids = repo.metadata.all_chunk_ids().unwrap();
    let mut vector_ids = repo.vectors.chunk_ids();
    metadata_ids.sort();
    vector_ids.sort();
    assert_eq!(metadata_ids, vector_ids);
}

#[tokio::test]
async fn test_results_sorted_and_scores_bounded() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    let outcome = engine().query(&repo, "recompute user score", 10).await.unwrap();
    assert!(!outcome.matches.is_empty());

    for pair in outcome.matches.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for m in &outcome.matches {
        assert!((0.0..=1.0).contains(&m.score));
        assert!(!m.explanation.is_empty());
        assert_eq!(m.explanation.contains("vector="), m.vector_score > 0.0);
        assert_eq!(m.explanation.contains("keyword="), m.keyword_score > 0.0);
        assert_eq!(m.explanation.contains("symbol="), m.symbol_score > 0.0);
        assert_eq!(m.explanation.contains("intent="), m.intent_score > 0.0);
        assert_eq!(
            m.explanation.contains("structural="),
            m.structural_score > 0.0
        );
    }
}

#[tokio::test]
async fn test_llm_gating_with_zero_threshold_never_calls_llm() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    // use_llm is on but the threshold is 0.0: no vector score can fall
    // below it, so the LLM path is never taken and the selection stays
    // heuristic. (The provider being absent would otherwise surface as a
    // degraded-path warning, not a heuristic selection.)
    let mut config = Config::default();
    config.llm.enabled = true;
    config.llm.threshold = 0.0;
    let engine = QueryEngine::new(
        Arc::new(config),
        reqwest::Client::new(),
        Arc::new(LlmProvider::Disabled),
        None,
    );

    let outcome = engine.query(&repo, "score calculation", 5).await.unwrap();
    assert!(!outcome.used_llm);
    assert_eq!(outcome.selection_source, Some(SelectionSource::Heuristic));
    assert!(outcome.llm_latency_ms.is_none());
}

// ── boundary behaviors ──────────────────────────────────

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    let err = engine().query(&repo, "   ", 5).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidRequest);
}

#[tokio::test]
async fn test_query_before_index_returns_not_indexed() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);

    let err = engine().query(&repo, "anything", 5).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotIndexed);
}

#[tokio::test]
async fn test_top_k_zero_returns_empty_results_and_null_selection() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();

    let outcome = engine().query(&repo, "user score", 0).await.unwrap();
    assert!(outcome.matches.is_empty());
    assert!(outcome.selection.is_none());
    assert!(outcome.selection_source.is_none());
}

#[tokio::test]
async fn test_oversized_file_is_skipped_entirely() {
    let (_dir, root) = make_repo();
    let huge = format!(
        "function generatedTable() {{\n  return [\n{}  ];\n}}\n",
        "    'x',\n".repeat(200_000)
    );
    std::fs::write(root.join("src/generated.js"), huge).unwrap();

    let repo = repo_state(&root);
    let stats = indexer().index(&repo, false).await.unwrap();
    assert_eq!(stats.files_scanned, 2);

    let outcome = engine().query(&repo, "generated table", 10).await.unwrap();
    assert!(outcome
        .matches
        .iter()
        .all(|m| m.payload.path != "src/generated.js"));
}

#[tokio::test]
async fn test_gitignored_files_are_not_indexed() {
    let (_dir, root) = make_repo();
    std::fs::write(root.join(".gitignore"), "src/ignored.js\n").unwrap();
    std::fs::write(
        root.join("src/ignored.js"),
        "function secretIgnoredHelper() { return 1; }\n",
    )
    .unwrap();

    let repo = repo_state(&root);
    let stats = indexer().index(&repo, false).await.unwrap();
    assert_eq!(stats.files_scanned, 2);

    let outcome = engine().query(&repo, "secret ignored helper", 10).await.unwrap();
    assert!(outcome
        .matches
        .iter()
        .all(|m| m.payload.path != "src/ignored.js"));
}

// ── model swap (dimension change) ───────────────────────

#[tokio::test]
async fn test_model_swap_without_rebuild_errors_on_query() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();
    drop(repo);

    // A new daemon session with a different embedding dimension.
    let repo = repo_state_with_backend(&root, Arc::new(HashEmbedder::new(64)));
    let err = engine().query(&repo, "user score", 5).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::IndexDimensionMismatch);
}

#[tokio::test]
async fn test_model_swap_reindex_recreates_collection() {
    let (_dir, root) = make_repo();
    let repo = repo_state(&root);
    indexer().index(&repo, false).await.unwrap();
    assert_eq!(repo.vectors.dimension(), Some(256));
    drop(repo);

    let repo = repo_state_with_backend(&root, Arc::new(HashEmbedder::new(64)));
    let stats = indexer().index(&repo, false).await.unwrap();
    assert_eq!(repo.vectors.dimension(), Some(64));
    assert!(stats.chunks_indexed > 0);
    assert_eq!(stats.files_indexed, 2);

    let outcome = engine().query(&repo, "get user score", 3).await.unwrap();
    assert!(!outcome.matches.is_empty());
}
