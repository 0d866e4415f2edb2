use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of source range a chunk was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Route,
    Block,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Class => "class",
            ChunkKind::Route => "route",
            ChunkKind::Block => "block",
        }
    }
}

/// The atomic retrieval unit: a semantic slice of one source file plus the
/// metadata the scorer and the LLM collaborator need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    /// Stable digest of (repo id, path, line range, symbol, content hash).
    pub chunk_id: String,
    pub file_path: String,
    pub language: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    /// Primary symbol name, empty for anonymous blocks.
    pub symbol: String,
    pub kind: ChunkKind,
    /// Digest of the chunk source text.
    pub content_hash: String,
    pub tokens: usize,
    pub description: String,
    pub summary: Option<String>,
    pub intent_tags: Vec<String>,
    pub keywords: Vec<String>,
    pub http_method: Option<String>,
    pub resource: Option<String>,
    pub route_path: Option<String>,
    /// Chunk source text. Stored for summarization prompts, never embedded.
    pub text: String,
}

impl CodeChunk {
    pub fn embedding_text(&self) -> String {
        ChunkPayload::from(self).embedding_text()
    }
}

/// The slice of chunk fields mirrored into the vector store alongside each
/// embedding. Everything the query path scores against lives here, so a
/// query never has to join back to the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub symbol: String,
    pub kind: ChunkKind,
    pub keywords: Vec<String>,
    pub intent_tags: Vec<String>,
    pub http_method: Option<String>,
    pub resource: Option<String>,
    pub description: String,
    pub summary: Option<String>,
}

impl From<&CodeChunk> for ChunkPayload {
    fn from(chunk: &CodeChunk) -> Self {
        Self {
            path: chunk.file_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            symbol: chunk.symbol.clone(),
            kind: chunk.kind,
            keywords: chunk.keywords.clone(),
            intent_tags: chunk.intent_tags.clone(),
            http_method: chunk.http_method.clone(),
            resource: chunk.resource.clone(),
            description: chunk.description.clone(),
            summary: chunk.summary.clone(),
        }
    }
}

impl ChunkPayload {
    /// Canonical embedding input: semantic metadata only, never raw code.
    pub fn embedding_text(&self) -> String {
        let symbol = if self.symbol.is_empty() {
            "(none)"
        } else {
            self.symbol.as_str()
        };
        let mut lines = vec![
            format!("File: {}", self.path),
            format!("Symbol: {symbol}"),
            format!("Type: {}", self.kind.as_str()),
            format!("Intent: {}", self.intent_tags.join("; ")),
        ];
        if let Some(method) = &self.http_method {
            lines.push(format!("HTTP method: {method}"));
        }
        if let Some(resource) = &self.resource {
            lines.push(format!("Resource: {resource}"));
        }
        lines.push(format!(
            "Summary: {}",
            self.summary.as_deref().unwrap_or(&self.description)
        ));
        lines.push(format!("Keywords: {}", self.keywords.join(" ")));
        lines.join("\n")
    }
}

/// Counts reported by one index run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub chunks_indexed: usize,
    pub duration_ms: u64,
}

/// A scored candidate on its way through the query pipeline.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub chunk_id: String,
    pub payload: ChunkPayload,
    pub score: f32,
    pub vector_score: f32,
    pub keyword_score: f32,
    pub symbol_score: f32,
    pub intent_score: f32,
    pub structural_score: f32,
    pub matched_intents: Vec<String>,
    pub matched_keywords: Vec<String>,
    pub explanation: String,
}

/// The single jump target surfaced as the system's top recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub file: String,
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Heuristic,
    Llm,
}

/// Full outcome of one query run.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub matches: Vec<QueryMatch>,
    pub duration_ms: u64,
    pub selection: Option<Selection>,
    pub selection_source: Option<SelectionSource>,
    pub used_llm: bool,
    pub llm_model: Option<String>,
    pub llm_latency_ms: Option<u64>,
    pub rewritten_query: Option<String>,
}

// ─── HTTP request/response types ─────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct IndexRequest {
    pub repo_path: String,
    #[serde(default)]
    pub rebuild: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexResponse {
    pub status: &'static str,
    pub repo_path: String,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub chunks_indexed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub repo_path: String,
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    8
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub symbol: String,
    pub description: String,
    pub score: f32,
    pub vector_score: f32,
    pub keyword_score: f32,
    pub symbol_score: f32,
    pub intent_score: f32,
    pub structural_score: f32,
    pub matched_intents: Vec<String>,
    pub matched_keywords: Vec<String>,
    pub explanation: String,
}

impl From<&QueryMatch> for QueryResult {
    fn from(m: &QueryMatch) -> Self {
        Self {
            file_path: m.payload.path.clone(),
            start_line: m.payload.start_line,
            end_line: m.payload.end_line,
            symbol: m.payload.symbol.clone(),
            description: m.payload.description.clone(),
            score: m.score,
            vector_score: m.vector_score,
            keyword_score: m.keyword_score,
            symbol_score: m.symbol_score,
            intent_score: m.intent_score,
            structural_score: m.structural_score,
            matched_intents: m.matched_intents.clone(),
            matched_keywords: m.matched_keywords.clone(),
            explanation: m.explanation.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub status: &'static str,
    pub repo_path: String,
    pub query: String,
    pub results: Vec<QueryResult>,
    pub duration_ms: u64,
    pub selection: Option<Selection>,
    pub selection_source: Option<SelectionSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_llm: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusParams {
    pub repo_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub repo_path: String,
    pub indexed_files: usize,
    pub indexed_chunks: usize,
    pub model: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_payload() -> ChunkPayload {
        ChunkPayload {
            path: "src/server.js".to_string(),
            start_line: 10,
            end_line: 24,
            symbol: "POST /users/:userId/score/recompute".to_string(),
            kind: ChunkKind::Route,
            keywords: vec!["recompute".into(), "user".into(), "score".into()],
            intent_tags: vec!["create_resource".into()],
            http_method: Some("POST".to_string()),
            resource: Some("recompute".to_string()),
            description: "Route handler in src/server.js".to_string(),
            summary: None,
        }
    }

    #[test]
    fn test_embedding_text_contains_http_lines_for_routes() {
        let text = route_payload().embedding_text();
        assert!(text.starts_with("File: src/server.js"));
        assert!(text.contains("HTTP method: POST"));
        assert!(text.contains("Resource: recompute"));
        assert!(text.contains("Type: route"));
    }

    #[test]
    fn test_embedding_text_never_contains_source_code() {
        let text = route_payload().embedding_text();
        assert!(!text.contains("app.post"));
        assert!(!text.contains("=>"));
    }

    #[test]
    fn test_embedding_text_prefers_summary_over_description() {
        let mut payload = route_payload();
        payload.summary = Some("Recomputes a user's score on demand".to_string());
        let text = payload.embedding_text();
        assert!(text.contains("Summary: Recomputes a user's score on demand"));
        assert!(!text.contains("Summary: Route handler"));
    }

    #[test]
    fn test_embedding_text_empty_symbol_placeholder() {
        let mut payload = route_payload();
        payload.symbol = String::new();
        payload.http_method = None;
        payload.resource = None;
        let text = payload.embedding_text();
        assert!(text.contains("Symbol: (none)"));
        assert!(!text.contains("HTTP method"));
    }

    #[test]
    fn test_chunk_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&ChunkKind::Route).unwrap(), "\"route\"");
        assert_eq!(ChunkKind::Block.as_str(), "block");
    }
}
