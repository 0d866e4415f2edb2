//! Index-time chunk summarization.
//!
//! Once per new or changed chunk, ask the LLM for a short natural-language
//! description used in embedding inputs and rerank prompts. Summaries are
//! cached in the metadata store by `sha256(model ∥ chunk content hash)`, so
//! unchanged chunks never trigger a second call. Failures skip the chunk.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chunking::sha256_hex;
use crate::llm::provider::LlmProvider;
use crate::metadata::MetadataStore;
use crate::models::CodeChunk;

const SUMMARY_PROMPT: &str = "Summarize this code chunk for retrieval indexing.

Rules:
- One concise sentence.
- Focus on behavior, side effects, and domain intent.
- Mention HTTP semantics if present (create/update/delete/read, method, resource).
- No markdown.
- Max 40 words.
";

const MAX_CODE_CHARS: usize = 2_400;

pub struct ChunkSummarizer {
    provider: Arc<LlmProvider>,
    model: String,
    max_chars: usize,
}

impl ChunkSummarizer {
    pub fn new(provider: Arc<LlmProvider>, model: &str, max_chars: usize) -> Self {
        Self {
            provider,
            model: model.to_string(),
            max_chars: max_chars.max(64),
        }
    }

    /// Fill `summary` on each chunk, from cache where possible. Returns the
    /// number of fresh LLM calls that succeeded.
    pub async fn summarize_chunks(
        &self,
        metadata: &MetadataStore,
        chunks: &mut [CodeChunk],
    ) -> usize {
        if chunks.is_empty() {
            return 0;
        }

        let keys: Vec<String> = chunks.iter().map(|chunk| self.summary_key(chunk)).collect();
        let cached = match metadata.cached_summaries(&keys) {
            Ok(cached) => cached,
            Err(err) => {
                tracing::warn!("Summary cache read failed: {err:#}");
                HashMap::new()
            }
        };

        let mut fresh = 0usize;
        let mut to_store: HashMap<String, String> = HashMap::new();

        for (chunk, key) in chunks.iter_mut().zip(&keys) {
            if let Some(summary) = cached.get(key) {
                chunk.summary = Some(summary.clone());
                continue;
            }
            if !self.provider.is_enabled() {
                continue;
            }

            let prompt = self.build_prompt(chunk);
            match self.provider.complete_text(&prompt, Some(&self.model)).await {
                Ok((raw, _latency)) => {
                    let cleaned = self.clean_summary(&raw);
                    if cleaned.is_empty() {
                        continue;
                    }
                    chunk.summary = Some(cleaned.clone());
                    to_store.insert(key.clone(), cleaned);
                    fresh += 1;
                }
                Err(err) => {
                    tracing::warn!("Chunk summarization failed for {}: {err:#}", chunk.chunk_id);
                }
            }
        }

        if !to_store.is_empty() {
            if let Err(err) = metadata.store_summaries(&self.model, &to_store) {
                tracing::warn!("Summary cache write failed: {err:#}");
            }
        }
        fresh
    }

    fn build_prompt(&self, chunk: &CodeChunk) -> String {
        let symbol = if chunk.symbol.is_empty() {
            "-"
        } else {
            chunk.symbol.as_str()
        };
        format!(
            "{SUMMARY_PROMPT}\nLanguage: {}\nFile: {}\nSymbol: {symbol}\nType: {}\nHTTP method: {}\nIntent tags: {}\n\nCode:\n{}\n",
            chunk.language,
            chunk.file_path,
            chunk.kind.as_str(),
            chunk.http_method.as_deref().unwrap_or("-"),
            chunk.intent_tags.join(", "),
            truncate_code(&chunk.text),
        )
    }

    fn summary_key(&self, chunk: &CodeChunk) -> String {
        sha256_hex(format!("{}\u{0}{}", self.model, chunk.content_hash).as_bytes())
    }

    fn clean_summary(&self, text: &str) -> String {
        let one_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if one_line.len() <= self.max_chars {
            return one_line;
        }
        let mut end = self.max_chars - 3;
        while !one_line.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", one_line[..end].trim_end())
    }
}

fn truncate_code(text: &str) -> String {
    if text.len() <= MAX_CODE_CHARS {
        return text.to_string();
    }
    let mut end = MAX_CODE_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n// ... truncated ...", &text[..end])
}
