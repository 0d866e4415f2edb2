//! Index orchestration: walk → diff → parse → chunk → enrich → summarize →
//! embed → upsert → transactional metadata commit.
//!
//! Incremental by file content hash: unchanged files are skipped entirely,
//! deleted files have their chunks removed from both stores, and a model
//! dimension change silently recreates the collection and forces a full
//! pass. Any hard failure removes this run's partial vector writes and
//! leaves the previous metadata snapshot intact.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::chunking::{sha256_hex, ChunkBuilder};
use crate::llm::summarize::ChunkSummarizer;
use crate::metadata::{FileRecord, IndexCommit};
use crate::models::{ChunkPayload, IndexStats};
use crate::parser::parse_symbols;
use crate::state::RepoState;
use crate::walker::{walk_source_files, WalkedFile};

/// Points flushed to the vector store per upsert call.
const UPSERT_BATCH_SIZE: usize = 64;

struct ChangedFile {
    file: WalkedFile,
    content: String,
    content_hash: String,
}

pub struct Indexer {
    chunk_builder: ChunkBuilder,
    summarizer: Option<Arc<ChunkSummarizer>>,
}

impl Indexer {
    pub fn new(chunk_builder: ChunkBuilder, summarizer: Option<Arc<ChunkSummarizer>>) -> Self {
        Self {
            chunk_builder,
            summarizer,
        }
    }

    /// Run one index pass. The caller holds the repo's write lock.
    pub async fn index(&self, repo: &RepoState, rebuild: bool) -> Result<IndexStats> {
        let mut upserted: Vec<String> = Vec::new();
        match self.index_inner(repo, rebuild, &mut upserted).await {
            Ok(stats) => Ok(stats),
            Err(err) => {
                // Remove this run's partial vector writes before the lock is
                // released; the metadata transaction never committed.
                if !upserted.is_empty() {
                    if let Err(cleanup) = repo.vectors.delete(&upserted) {
                        tracing::warn!("Failed to roll back partial vector writes: {cleanup:#}");
                    }
                }
                Err(err)
            }
        }
    }

    async fn index_inner(
        &self,
        repo: &RepoState,
        rebuild: bool,
        upserted: &mut Vec<String>,
    ) -> Result<IndexStats> {
        let started = Instant::now();
        let repo_path = repo.repo_path.clone();
        let repo_id = repo_path.to_string_lossy().to_string();
        let dimension = repo.embeddings.dimension();

        tracing::info!(
            "Index start repo={} rebuild={rebuild} model={}",
            repo_path.display(),
            repo.embeddings.model_id()
        );

        if rebuild {
            repo.vectors.reset(dimension)?;
            repo.metadata.clear_index()?;
        } else {
            let recreated = repo.vectors.ensure_dimension(dimension)?;
            let model_changed = repo
                .metadata
                .model_id()?
                .map(|stored| stored != repo.embeddings.model_id())
                .unwrap_or(false);
            if recreated || model_changed {
                if model_changed {
                    repo.vectors.reset(dimension)?;
                }
                // The collection was missing or incompatible; stored file
                // hashes no longer describe any indexed vectors.
                repo.metadata.clear_index()?;
            }
        }

        let walk_root = repo_path.clone();
        let files = tokio::task::spawn_blocking(move || walk_source_files(&walk_root))
            .await
            .context("Walk task failed")?;
        let files_scanned = files.len();

        let known_hashes = repo.metadata.file_hashes()?;
        let mut seen_paths: HashSet<String> = HashSet::new();
        let mut changed: Vec<ChangedFile> = Vec::new();

        for file in files {
            seen_paths.insert(file.relative_path.clone());
            let content = match std::fs::read_to_string(&file.path) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!("Skipping unreadable file {}: {err}", file.path.display());
                    continue;
                }
            };
            let content_hash = sha256_hex(content.as_bytes());
            if known_hashes.get(&file.relative_path) == Some(&content_hash) {
                continue;
            }
            changed.push(ChangedFile {
                file,
                content,
                content_hash,
            });
        }

        let mut deleted_files: Vec<String> = known_hashes
            .keys()
            .filter(|path| !seen_paths.contains(*path))
            .cloned()
            .collect();
        deleted_files.sort();

        let mut commit = IndexCommit {
            model_id: repo.embeddings.model_id().to_string(),
            ..Default::default()
        };

        for path in &deleted_files {
            let chunk_ids = repo.metadata.chunk_ids_for_file(path)?;
            repo.vectors.delete(&chunk_ids)?;
            commit.delete_chunk_ids.extend(chunk_ids);
            commit.delete_files.push(path.clone());
        }

        let files_indexed = changed.len();
        let mut chunks_indexed = 0usize;
        let mut pending_points: Vec<(String, Vec<f32>, ChunkPayload)> = Vec::new();

        for entry in changed {
            let relative_path = entry.file.relative_path.clone();

            let old_chunk_ids = repo.metadata.chunk_ids_for_file(&relative_path)?;
            if !old_chunk_ids.is_empty() {
                repo.vectors.delete(&old_chunk_ids)?;
                commit.delete_chunk_ids.extend(old_chunk_ids);
            }

            let symbols = parse_symbols(&entry.file.language, &entry.content);
            let mut chunks = self.chunk_builder.build_chunks(
                &repo_id,
                &relative_path,
                &entry.file.language,
                &entry.content,
                &symbols,
            );

            if let Some(summarizer) = &self.summarizer {
                summarizer.summarize_chunks(&repo.metadata, &mut chunks).await;
            }

            if !chunks.is_empty() {
                let texts: Vec<String> =
                    chunks.iter().map(|chunk| chunk.embedding_text()).collect();
                let vectors = repo.embeddings.embed_documents(&texts).await?;
                for (chunk, vector) in chunks.iter().zip(vectors) {
                    pending_points.push((
                        chunk.chunk_id.clone(),
                        vector,
                        ChunkPayload::from(chunk),
                    ));
                }
                chunks_indexed += chunks.len();
                commit.upsert_chunks.extend(chunks);
            }

            commit.upsert_files.push(FileRecord {
                path: relative_path,
                content_hash: entry.content_hash,
                language: entry.file.language,
                size_bytes: entry.file.size_bytes,
            });

            while pending_points.len() >= UPSERT_BATCH_SIZE {
                let batch: Vec<_> = pending_points.drain(..UPSERT_BATCH_SIZE).collect();
                upsert_with_retry(repo, batch, upserted)?;
            }
        }

        if !pending_points.is_empty() {
            upsert_with_retry(repo, pending_points, upserted)?;
        }

        repo.metadata.commit_index_run(commit)?;

        // Orphan sweep: any vector point without a metadata chunk (e.g. left
        // behind by a crashed run) is dropped now that the commit landed.
        let metadata_ids: HashSet<String> = repo.metadata.all_chunk_ids()?.into_iter().collect();
        let orphans: Vec<String> = repo
            .vectors
            .chunk_ids()
            .into_iter()
            .filter(|chunk_id| !metadata_ids.contains(chunk_id))
            .collect();
        if !orphans.is_empty() {
            tracing::warn!("Removing {} orphaned vector points", orphans.len());
            repo.vectors.delete(&orphans)?;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Index finished repo={} scanned={files_scanned} indexed={files_indexed} deleted={} chunks={chunks_indexed} duration_ms={duration_ms}",
            repo_path.display(),
            deleted_files.len(),
        );

        Ok(IndexStats {
            files_scanned,
            files_indexed,
            files_deleted: deleted_files.len(),
            chunks_indexed,
            duration_ms,
        })
    }
}

/// One retry on transient vector-store failures; a second failure aborts
/// the run.
fn upsert_with_retry(
    repo: &RepoState,
    batch: Vec<(String, Vec<f32>, ChunkPayload)>,
    upserted: &mut Vec<String>,
) -> Result<()> {
    let ids: Vec<String> = batch.iter().map(|(id, _, _)| id.clone()).collect();
    if let Err(err) = repo.vectors.upsert(batch.clone()) {
        tracing::warn!("Vector upsert failed, retrying once: {err:#}");
        repo.vectors
            .upsert(batch)
            .context("Vector upsert failed twice")?;
    }
    upserted.extend(ids);
    Ok(())
}
