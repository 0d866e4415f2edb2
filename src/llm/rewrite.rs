//! Query rewrite: turn a natural question into a precise technical
//! description used only for embedding. Results are kept in a bounded LRU
//! keyed by the raw query, and any failure falls back to the raw query.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::chunking::sha256_hex;
use crate::llm::provider::LlmProvider;

const REWRITE_PROMPT: &str = "Rewrite this code search query into precise backend intent.

Rules:
- Keep original user intent.
- Mention endpoint/handler behavior when applicable.
- Include CRUD action and likely HTTP semantics if implied.
- Keep to one sentence.
- Return plain text only.

Query:
";

const MAX_REWRITE_CHARS: usize = 220;

pub struct QueryRewriter {
    provider: Arc<LlmProvider>,
    model: String,
    cache: Mutex<LruCache<String, String>>,
}

impl QueryRewriter {
    pub fn new(provider: Arc<LlmProvider>, model: &str, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            model: model.to_string(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Rewrite `query`. Returns `Some((rewritten, latency_ms))` only when the
    /// model produced a different usable query; None means "use the raw
    /// query" (disabled, cache-identical, timeout, or provider error).
    pub async fn rewrite(&self, query: &str) -> Option<(String, u64)> {
        if !self.provider.is_enabled() {
            return None;
        }
        let normalized = query.trim();
        if normalized.is_empty() {
            return None;
        }

        let key = sha256_hex(format!("{}\u{0}{normalized}", self.model).as_bytes());
        if let Some(cached) = self.cache.lock().get(&key).cloned() {
            return (cached != normalized).then(|| (cached, 0));
        }

        let prompt = format!("{REWRITE_PROMPT}{normalized}\n");
        let (raw, latency_ms) = match self.provider.complete_text(&prompt, Some(&self.model)).await
        {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!("Query rewrite failed: {err:#}");
                return None;
            }
        };

        let cleaned = clean_rewrite(&raw);
        let rewritten = if cleaned.is_empty() {
            normalized.to_string()
        } else {
            cleaned
        };
        self.cache.lock().put(key, rewritten.clone());

        (rewritten != normalized).then_some((rewritten, latency_ms))
    }
}

/// Collapse to one line, strip wrapping quotes, clamp the length.
fn clean_rewrite(text: &str) -> String {
    let mut line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.starts_with('"') && line.ends_with('"') && line.len() >= 2 {
        line = line[1..line.len() - 1].trim().to_string();
    }
    if line.len() > MAX_REWRITE_CHARS {
        let mut end = MAX_REWRITE_CHARS - 3;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line = format!("{}...", line[..end].trim_end());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_rewrite_collapses_whitespace() {
        assert_eq!(
            clean_rewrite("  find   the\nroute \t handler "),
            "find the route handler"
        );
    }

    #[test]
    fn test_clean_rewrite_strips_quotes() {
        assert_eq!(clean_rewrite("\"exact phrase\""), "exact phrase");
    }

    #[test]
    fn test_clean_rewrite_clamps_length() {
        let long = "word ".repeat(100);
        let cleaned = clean_rewrite(&long);
        assert!(cleaned.len() <= MAX_REWRITE_CHARS);
        assert!(cleaned.ends_with("..."));
    }

    #[tokio::test]
    async fn test_disabled_provider_returns_none() {
        let rewriter = QueryRewriter::new(Arc::new(LlmProvider::Disabled), "model", 8);
        assert!(rewriter.rewrite("find the score handler").await.is_none());
    }

    #[tokio::test]
    async fn test_empty_query_returns_none() {
        let rewriter = QueryRewriter::new(Arc::new(LlmProvider::Disabled), "model", 8);
        assert!(rewriter.rewrite("   ").await.is_none());
    }
}
