//! Per-repository vector collection: an in-memory map of unit-norm
//! embeddings with payloads, persisted as a single JSON file and searched
//! by cosine similarity.
//!
//! The collection dimension is fixed at creation; `ensure_dimension` drops
//! and recreates the collection when the active embedding model disagrees,
//! so stale vectors from an older model never survive a model swap.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::ChunkPayload;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    dimension: Option<usize>,
    points: BTreeMap<String, StoredPoint>,
}

/// A scored search hit with its payload.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

pub struct VectorStore {
    persist_path: PathBuf,
    inner: RwLock<Collection>,
}

impl VectorStore {
    /// Derive the collection name for a canonical repository path.
    pub fn collection_name(repo_path: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(repo_path.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("xtrc_{}", &digest[..16])
    }

    /// Open (or lazily create) the collection for a repo inside `vector_dir`.
    pub fn open(vector_dir: &Path, collection: &str) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)
            .with_context(|| format!("Failed to create {}", vector_dir.display()))?;
        let persist_path = vector_dir.join(format!("{collection}.json"));

        let collection = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .with_context(|| format!("Failed to read {}", persist_path.display()))?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            Collection::default()
        };

        Ok(Self {
            persist_path,
            inner: RwLock::new(collection),
        })
    }

    /// A collection counts as existing once it has received any write.
    pub fn exists(&self) -> bool {
        self.inner.read().dimension.is_some()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.inner.read().dimension
    }

    pub fn count(&self) -> usize {
        self.inner.read().points.len()
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.inner.read().points.keys().cloned().collect()
    }

    /// Create the collection at `dim`, dropping any existing points with a
    /// different dimension. Returns true when the collection was (re)created.
    pub fn ensure_dimension(&self, dim: usize) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.dimension {
            Some(existing) if existing == dim => Ok(false),
            Some(existing) => {
                tracing::warn!(
                    "Vector collection dimension {existing} != model dimension {dim}; recreating"
                );
                inner.points.clear();
                inner.dimension = Some(dim);
                self.persist(&inner)?;
                Ok(true)
            }
            None => {
                inner.dimension = Some(dim);
                self.persist(&inner)?;
                Ok(true)
            }
        }
    }

    /// Drop every point and reset the dimension.
    pub fn reset(&self, dim: usize) -> Result<()> {
        let mut inner = self.inner.write();
        inner.points.clear();
        inner.dimension = Some(dim);
        self.persist(&inner)
    }

    /// Idempotent on chunk id: the latest vector and payload win.
    pub fn upsert(&self, points: Vec<(String, Vec<f32>, ChunkPayload)>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write();
        for (chunk_id, vector, payload) in points {
            if let Some(dim) = inner.dimension {
                if vector.len() != dim {
                    anyhow::bail!(
                        "Vector dimension {} does not match collection dimension {dim}",
                        vector.len()
                    );
                }
            } else {
                inner.dimension = Some(vector.len());
            }
            inner.points.insert(chunk_id, StoredPoint { vector, payload });
        }
        self.persist(&inner)
    }

    pub fn delete(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write();
        for chunk_id in chunk_ids {
            inner.points.remove(chunk_id);
        }
        self.persist(&inner)
    }

    /// Cosine search over all points, descending similarity. The caller is
    /// responsible for rejecting dimension mismatches before searching.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        let inner = self.inner.read();
        let mut scored: Vec<VectorHit> = inner
            .points
            .iter()
            .map(|(chunk_id, point)| VectorHit {
                chunk_id: chunk_id.clone(),
                score: cosine_similarity(query, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        scored
    }

    /// Atomic write via temp file + rename.
    fn persist(&self, collection: &Collection) -> Result<()> {
        let data = serde_json::to_string(collection)?;
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.persist_path)
            .with_context(|| format!("Failed to persist {}", self.persist_path.display()))?;
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
