//! Durable per-repository metadata: file hashes, chunk records, embedding
//! and summary caches, and run metadata. One sqlite file per repo under
//! `<repo>/.xtrc/metadata.db`.
//!
//! All mutations belonging to one index run are applied in a single
//! transaction by `commit_index_run`; a failed run leaves the previous
//! snapshot intact. The caches are append-only and written outside that
//! transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;

use crate::models::CodeChunk;

/// Bumped when the storage format changes; an older version on disk forces
/// a reset (one-shot rebuild).
pub const SCHEMA_VERSION: i64 = 1;

/// A walked file as recorded in the `files` table.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub language: String,
    pub size_bytes: u64,
}

/// Everything one index run writes, committed atomically.
#[derive(Debug, Default)]
pub struct IndexCommit {
    pub upsert_files: Vec<FileRecord>,
    pub delete_files: Vec<String>,
    pub upsert_chunks: Vec<CodeChunk>,
    pub delete_chunk_ids: Vec<String>,
    pub model_id: String,
}

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open metadata store {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                file_path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                language TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                last_indexed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                language TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                tokens INTEGER NOT NULL,
                description TEXT NOT NULL,
                summary TEXT,
                intent_tags TEXT NOT NULL DEFAULT '[]',
                keywords TEXT NOT NULL DEFAULT '[]',
                http_method TEXT,
                resource TEXT,
                route_path TEXT,
                text TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks (file_path);

            CREATE TABLE IF NOT EXISTS embedding_cache (
                cache_key TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                vector BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS summary_cache (
                summary_key TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                summary TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .ok();
        match stored.and_then(|v| v.parse::<i64>().ok()) {
            Some(version) if version == SCHEMA_VERSION => {}
            Some(version) => {
                tracing::warn!(
                    "Metadata schema version {version} is older than {SCHEMA_VERSION}; resetting store"
                );
                conn.execute_batch(
                    "DELETE FROM files;
                     DELETE FROM chunks;
                     DELETE FROM embedding_cache;
                     DELETE FROM summary_cache;
                     DELETE FROM meta;",
                )?;
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
        }
        Ok(())
    }

    /// `file path → content hash` for incremental change detection.
    pub fn file_hashes(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT file_path, content_hash FROM files")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = HashMap::new();
        for row in rows {
            let (path, hash): (String, String) = row?;
            out.insert(path, hash);
        }
        Ok(out)
    }

    pub fn chunk_ids_for_file(&self, file_path: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chunk_id FROM chunks WHERE file_path = ?1")?;
        let rows = stmt.query_map(params![file_path], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read chunk ids")
    }

    pub fn all_chunk_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chunk_id FROM chunks")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read chunk ids")
    }

    /// Drop the indexed state (files, chunks, run metadata) but keep the
    /// content-addressed caches, which stay valid across rebuilds.
    pub fn clear_index(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "DELETE FROM files;
             DELETE FROM chunks;
             DELETE FROM meta WHERE key IN ('last_indexed_at', 'model_id');",
        )?;
        Ok(())
    }

    /// Apply every mutation of one index run in a single transaction.
    pub fn commit_index_run(&self, commit: IndexCommit) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        for path in &commit.delete_files {
            tx.execute("DELETE FROM files WHERE file_path = ?1", params![path])?;
        }
        for chunk_id in &commit.delete_chunk_ids {
            tx.execute("DELETE FROM chunks WHERE chunk_id = ?1", params![chunk_id])?;
        }
        for file in &commit.upsert_files {
            tx.execute(
                "INSERT INTO files (file_path, content_hash, language, size_bytes, last_indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(file_path) DO UPDATE SET
                    content_hash = excluded.content_hash,
                    language = excluded.language,
                    size_bytes = excluded.size_bytes,
                    last_indexed_at = excluded.last_indexed_at",
                params![file.path, file.content_hash, file.language, file.size_bytes, now],
            )?;
        }
        for chunk in &commit.upsert_chunks {
            tx.execute(
                "INSERT INTO chunks (
                    chunk_id, file_path, language, start_line, end_line, symbol, kind,
                    content_hash, tokens, description, summary, intent_tags, keywords,
                    http_method, resource, route_path, text
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    file_path = excluded.file_path,
                    language = excluded.language,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    symbol = excluded.symbol,
                    kind = excluded.kind,
                    content_hash = excluded.content_hash,
                    tokens = excluded.tokens,
                    description = excluded.description,
                    summary = excluded.summary,
                    intent_tags = excluded.intent_tags,
                    keywords = excluded.keywords,
                    http_method = excluded.http_method,
                    resource = excluded.resource,
                    route_path = excluded.route_path,
                    text = excluded.text",
                params![
                    chunk.chunk_id,
                    chunk.file_path,
                    chunk.language,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.symbol,
                    chunk.kind.as_str(),
                    chunk.content_hash,
                    chunk.tokens,
                    chunk.description,
                    chunk.summary,
                    serde_json::to_string(&chunk.intent_tags)?,
                    serde_json::to_string(&chunk.keywords)?,
                    chunk.http_method,
                    chunk.resource,
                    chunk.route_path,
                    chunk.text,
                ],
            )?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('last_indexed_at', ?1)",
            params![now],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('model_id', ?1)",
            params![commit.model_id],
        )?;

        tx.commit().context("Failed to commit index run")
    }

    pub fn status(&self) -> Result<(usize, usize, Option<DateTime<Utc>>)> {
        let conn = self.conn.lock();
        let files: usize = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        let chunks: usize = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let last: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'last_indexed_at'",
                [],
                |row| row.get(0),
            )
            .ok();
        let last_indexed_at = last
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Ok((files, chunks, last_indexed_at))
    }

    pub fn model_id(&self) -> Result<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row("SELECT value FROM meta WHERE key = 'model_id'", [], |row| {
                row.get(0)
            })
            .ok())
    }

    // ─── embedding cache ─────────────────────────────────

    pub fn cached_embeddings(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let mut out = HashMap::new();
        if keys.is_empty() {
            return Ok(out);
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT cache_key, dimension, vector FROM embedding_cache WHERE cache_key = ?1",
        )?;
        for key in keys {
            let row = stmt
                .query_row(params![key], |row| {
                    let dim: usize = row.get(1)?;
                    let blob: Vec<u8> = row.get(2)?;
                    Ok((dim, blob))
                })
                .ok();
            if let Some((dim, blob)) = row {
                let vector = blob_to_vec(&blob);
                if vector.len() == dim {
                    out.insert(key.clone(), vector);
                }
            }
        }
        Ok(out)
    }

    pub fn store_embeddings(&self, vectors: &HashMap<String, Vec<f32>>) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (key, vector) in vectors {
            tx.execute(
                "INSERT INTO embedding_cache (cache_key, dimension, vector, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(cache_key) DO UPDATE SET
                    dimension = excluded.dimension,
                    vector = excluded.vector,
                    updated_at = excluded.updated_at",
                params![key, vector.len(), vec_to_blob(vector), now],
            )?;
        }
        tx.commit().context("Failed to persist embedding cache")
    }

    // ─── summary cache ───────────────────────────────────

    pub fn cached_summaries(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        if keys.is_empty() {
            return Ok(out);
        }
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT summary FROM summary_cache WHERE summary_key = ?1")?;
        for key in keys {
            if let Ok(summary) = stmt.query_row(params![key], |row| row.get::<_, String>(0)) {
                out.insert(key.clone(), summary);
            }
        }
        Ok(out)
    }

    pub fn store_summaries(&self, model: &str, summaries: &HashMap<String, String>) -> Result<()> {
        if summaries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (key, summary) in summaries {
            tx.execute(
                "INSERT INTO summary_cache (summary_key, model, summary, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(summary_key) DO UPDATE SET
                    model = excluded.model,
                    summary = excluded.summary,
                    updated_at = excluded.updated_at",
                params![key, model, summary, now],
            )?;
        }
        tx.commit().context("Failed to persist summary cache")
    }
}

fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}
