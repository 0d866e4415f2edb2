//! Embedding backends and the caching embedding service.
//!
//! A backend maps text to a fixed-dimension vector: Ollama and
//! OpenAI-compatible HTTP providers for real models, plus a deterministic
//! local feature-hashing backend that needs no network and serves as the
//! offline default. The service in front adds model-aware role prefixes,
//! L2 normalization, and a two-tier cache (in-memory map + the metadata
//! store's `embedding_cache` table) keyed by `sha256(model_id ∥ role ∥ text)`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::chunking::sha256_hex;
use crate::chunking::tokenizer::normalize_terms;
use crate::config::EmbeddingConfig;
use crate::metadata::MetadataStore;

/// Maximum characters sent per text to an embedding API. Dense content can
/// tokenize at ~2.3 tokens/char; this stays safely under an 8k context.
const MAX_EMBED_CHARS: usize = 3_000;

/// Texts per provider call.
const EMBED_BATCH_SIZE: usize = 64;

/// Task type for asymmetric embedding models. Models like BGE, E5 and
/// nomic-embed-text were trained with different prefixes for queries vs
/// documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    /// Indexing: text being stored for later retrieval.
    SearchDocument,
    /// Querying: text used to search against stored documents.
    SearchQuery,
}

impl EmbedTask {
    /// Role tag used in cache keys.
    pub fn role(&self) -> &'static str {
        match self {
            EmbedTask::SearchDocument => "doc",
            EmbedTask::SearchQuery => "query",
        }
    }

    /// Return the instruction prefix for the given embedding model.
    pub fn prefix_for_model(&self, model_name: &str) -> &'static str {
        let lower = model_name.to_lowercase();
        if lower.contains("bge") {
            match self {
                EmbedTask::SearchDocument => "",
                EmbedTask::SearchQuery => {
                    "Represent this sentence for searching relevant passages: "
                }
            }
        } else if lower.contains("nomic") {
            match self {
                EmbedTask::SearchDocument => "search_document: ",
                EmbedTask::SearchQuery => "search_query: ",
            }
        } else if lower.contains("e5") {
            match self {
                EmbedTask::SearchDocument => "passage: ",
                EmbedTask::SearchQuery => "query: ",
            }
        } else {
            ""
        }
    }
}

/// A pure embedding function plus its identity.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Salts the cache; includes model name and dimension so upgrades force
    /// regeneration without explicit invalidation.
    fn model_id(&self) -> &str;
    fn dimension(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the configured backend.
pub fn backend_from_config(
    config: &EmbeddingConfig,
    client: &reqwest::Client,
) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder {
            client: client.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            model_id: format!("ollama:{}@{}", config.model, config.dimension),
            dimension: config.dimension,
        })),
        "openai" => Ok(Arc::new(OpenAiEmbedder {
            client: client.clone(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            model_id: format!("openai:{}@{}", config.model, config.dimension),
            dimension: config.dimension,
        })),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        other => anyhow::bail!("Unknown embedding provider: {other}"),
    }
}

// ─── Ollama ──────────────────────────────────────────────

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    model_id: String,
    dimension: usize,
}

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to silently truncate inputs that exceed the model context.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let req = OllamaEmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
            truncate: true,
        };

        let resp = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to call Ollama embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embed API returned {status}: {body}");
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama embed response")?;
        Ok(body.embeddings)
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    model_id: String,
    dimension: usize,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let req = OpenAiEmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .context("Failed to call OpenAI embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embed API returned {status}: {body}");
        }

        let body: OpenAiEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse OpenAI embed response")?;
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ─── Local feature hashing ───────────────────────────────

/// Deterministic bag-of-terms feature hashing. Term overlap between two
/// texts translates directly into cosine similarity, which is enough for
/// offline use and keeps the full pipeline runnable without any model.
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(8);
        Self {
            model_id: format!("hash:fnv1a@{dimension}"),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for term in normalize_terms(text) {
                    let bucket = (fnv1a(term.as_bytes()) % self.dimension as u64) as usize;
                    vector[bucket] += 1.0;
                }
                vector
            })
            .collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

// ─── Caching service ─────────────────────────────────────

/// Embedding front-end bound to one repository's metadata store.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    metadata: Arc<MetadataStore>,
    memory: Mutex<HashMap<String, Vec<f32>>>,
}

impl EmbeddingService {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, metadata: Arc<MetadataStore>) -> Self {
        Self {
            backend,
            metadata,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts, EmbedTask::SearchDocument).await
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let mut vectors = self.embed(&texts, EmbedTask::SearchQuery).await?;
        vectors.pop().context("No embedding returned for query")
    }

    async fn embed(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = texts
            .iter()
            .map(|text| cache_key(self.backend.model_id(), task, text))
            .collect();

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();
        {
            let memory = self.memory.lock();
            for (idx, key) in keys.iter().enumerate() {
                match memory.get(key) {
                    Some(vector) => vectors[idx] = Some(vector.clone()),
                    None => missing.push(idx),
                }
            }
        }

        if !missing.is_empty() {
            let lookup: Vec<String> = missing.iter().map(|&idx| keys[idx].clone()).collect();
            let persisted = self.metadata.cached_embeddings(&lookup)?;
            let mut unresolved: Vec<usize> = Vec::new();
            {
                let mut memory = self.memory.lock();
                for &idx in &missing {
                    match persisted.get(&keys[idx]) {
                        Some(vector) if vector.len() == self.dimension() => {
                            memory.insert(keys[idx].clone(), vector.clone());
                            vectors[idx] = Some(vector.clone());
                        }
                        _ => unresolved.push(idx),
                    }
                }
            }

            if !unresolved.is_empty() {
                let prefix = task.prefix_for_model(self.backend.model_id());
                let prepared: Vec<String> = unresolved
                    .iter()
                    .map(|&idx| {
                        let body = truncate_for_embedding(
                            &texts[idx],
                            MAX_EMBED_CHARS.saturating_sub(prefix.len()),
                        );
                        format!("{prefix}{body}")
                    })
                    .collect();

                let mut fresh: Vec<Vec<f32>> = Vec::with_capacity(prepared.len());
                for batch in prepared.chunks(EMBED_BATCH_SIZE) {
                    fresh.extend(self.backend.embed(batch).await?);
                }
                if fresh.len() != unresolved.len() {
                    anyhow::bail!(
                        "Embedding backend returned {} vectors for {} inputs",
                        fresh.len(),
                        unresolved.len()
                    );
                }

                let mut to_persist = HashMap::new();
                let mut memory = self.memory.lock();
                for (&idx, mut vector) in unresolved.iter().zip(fresh) {
                    l2_normalize(&mut vector);
                    memory.insert(keys[idx].clone(), vector.clone());
                    to_persist.insert(keys[idx].clone(), vector.clone());
                    vectors[idx] = Some(vector);
                }
                drop(memory);
                self.metadata.store_embeddings(&to_persist)?;
            }
        }

        vectors
            .into_iter()
            .map(|vector| vector.context("Embedding resolution failed"))
            .collect()
    }
}

pub fn cache_key(model_id: &str, task: EmbedTask, text: &str) -> String {
    sha256_hex(format!("{model_id}\u{0}{}\u{0}{text}", task.role()).as_bytes())
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Truncate to at most `max_bytes`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── prefixes ────────────────────────────────────────

    #[test]
    fn test_bge_query_prefix() {
        let prefix = EmbedTask::SearchQuery.prefix_for_model("BAAI/bge-base-en-v1.5");
        assert!(prefix.starts_with("Represent this sentence"));
        assert_eq!(EmbedTask::SearchDocument.prefix_for_model("BAAI/bge-base-en-v1.5"), "");
    }

    #[test]
    fn test_nomic_prefixes() {
        assert_eq!(
            EmbedTask::SearchDocument.prefix_for_model("nomic-embed-text"),
            "search_document: "
        );
        assert_eq!(
            EmbedTask::SearchQuery.prefix_for_model("nomic-embed-text"),
            "search_query: "
        );
    }

    #[test]
    fn test_e5_prefixes() {
        assert_eq!(EmbedTask::SearchDocument.prefix_for_model("e5-large-v2"), "passage: ");
        assert_eq!(EmbedTask::SearchQuery.prefix_for_model("e5-large-v2"), "query: ");
    }

    #[test]
    fn test_unknown_model_no_prefix() {
        assert_eq!(EmbedTask::SearchQuery.prefix_for_model("all-minilm-l6-v2"), "");
    }

    // ── cache keys ──────────────────────────────────────

    #[test]
    fn test_cache_key_varies_by_role_and_model() {
        let doc = cache_key("m1", EmbedTask::SearchDocument, "text");
        let query = cache_key("m1", EmbedTask::SearchQuery, "text");
        let other_model = cache_key("m2", EmbedTask::SearchDocument, "text");
        assert_ne!(doc, query);
        assert_ne!(doc, other_model);
        assert_eq!(doc, cache_key("m1", EmbedTask::SearchDocument, "text"));
    }

    // ── hash backend ────────────────────────────────────

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let backend = HashEmbedder::new(64);
        let a = backend.embed(&["get user score".to_string()]).await.unwrap();
        let b = backend.embed(&["get user score".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedder_term_overlap_drives_similarity() {
        let backend = HashEmbedder::new(128);
        let vectors = backend
            .embed(&[
                "getUserScore user score".to_string(),
                "get user score".to_string(),
                "unrelated database migration".to_string(),
            ])
            .await
            .unwrap();
        let sim = |a: &[f32], b: &[f32]| {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            dot / (na * nb)
        };
        assert!(sim(&vectors[0], &vectors[1]) > sim(&vectors[0], &vectors[2]));
    }

    // ── normalization ───────────────────────────────────

    #[test]
    fn test_l2_normalize_unit_length() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_stays_zero() {
        let mut v = vec![0.0f32, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_truncate_respects_utf8_boundary() {
        let text = "é".repeat(100);
        let result = truncate_for_embedding(&text, 151);
        assert!(result.len() <= 151);
        assert!(result.len() % 2 == 0);
    }

    // ── caching service ─────────────────────────────────

    struct CountingBackend {
        inner: HashEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed(texts).await
        }
    }

    #[tokio::test]
    async fn test_service_caches_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(MetadataStore::open(&dir.path().join("m.db")).unwrap());
        let backend = Arc::new(CountingBackend {
            inner: HashEmbedder::new(32),
            calls: AtomicUsize::new(0),
        });
        let service = EmbeddingService::new(backend.clone(), metadata.clone());

        let texts = vec!["first text".to_string(), "second text".to_string()];
        service.embed_documents(&texts).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

        // Second call resolves entirely from cache.
        service.embed_documents(&texts).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

        // A fresh service over the same metadata store hits the persistent tier.
        let backend2 = Arc::new(CountingBackend {
            inner: HashEmbedder::new(32),
            calls: AtomicUsize::new(0),
        });
        let service2 = EmbeddingService::new(backend2.clone(), metadata);
        service2.embed_documents(&texts).await.unwrap();
        assert_eq!(backend2.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_returns_unit_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(MetadataStore::open(&dir.path().join("m.db")).unwrap());
        let service = EmbeddingService::new(Arc::new(HashEmbedder::new(32)), metadata);
        let vector = service.embed_query("get user score").await.unwrap();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_query_and_document_roles_cached_separately() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(MetadataStore::open(&dir.path().join("m.db")).unwrap());
        let backend = Arc::new(CountingBackend {
            inner: HashEmbedder::new(32),
            calls: AtomicUsize::new(0),
        });
        let service = EmbeddingService::new(backend.clone(), metadata);

        service
            .embed_documents(&["same text".to_string()])
            .await
            .unwrap();
        service.embed_query("same text").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
