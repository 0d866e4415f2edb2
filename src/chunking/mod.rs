//! Chunk construction: turns parsed node ranges into token-bounded semantic
//! chunks with stable ids and retrieval metadata.
//!
//! Pipeline per file: initial drafts from parsed symbols (or a whole-file
//! block), oversized drafts split at line boundaries, undersized siblings
//! merged, then each draft is enriched and finalized.

pub mod tokenizer;

use sha2::{Digest, Sha256};

use crate::intent::extract_intent_metadata;
use crate::models::{ChunkKind, CodeChunk};
use crate::parser::NodeRange;
use tokenizer::{estimate_tokens, normalize_terms};

/// Terms kept per chunk; keeps payloads bounded on pathological files.
const MAX_KEYWORDS: usize = 80;

/// Source characters fed into keyword extraction.
const KEYWORD_SOURCE_CHARS: usize = 4_000;

#[derive(Debug, Clone)]
struct Draft {
    start_line: usize,
    end_line: usize,
    symbol: Option<String>,
    kind: ChunkKind,
    text: String,
}

impl Draft {
    fn tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

pub struct ChunkBuilder {
    min_tokens: usize,
    max_tokens: usize,
    target_tokens: usize,
}

impl ChunkBuilder {
    pub fn new(min_tokens: usize, max_tokens: usize) -> Self {
        let min_tokens = min_tokens.max(1);
        let max_tokens = max_tokens.max(min_tokens + 1);
        Self {
            min_tokens,
            max_tokens,
            target_tokens: (min_tokens + max_tokens) / 2,
        }
    }

    /// Build the chunks for one file. `repo_id` salts chunk ids so identical
    /// files in different repositories stay distinct.
    pub fn build_chunks(
        &self,
        repo_id: &str,
        file_path: &str,
        language: &str,
        content: &str,
        symbols: &[NodeRange],
    ) -> Vec<CodeChunk> {
        let drafts = self.initial_drafts(content, symbols);
        let drafts = self.split_large_drafts(drafts);
        let drafts = self.merge_small_drafts(drafts);

        drafts
            .into_iter()
            .map(|draft| self.finalize(repo_id, file_path, language, draft))
            .collect()
    }

    fn initial_drafts(&self, content: &str, symbols: &[NodeRange]) -> Vec<Draft> {
        if symbols.is_empty() {
            return self.whole_file_drafts(content);
        }

        let mut drafts: Vec<Draft> = symbols
            .iter()
            .filter(|range| !range.text.trim().is_empty())
            .map(|range| Draft {
                start_line: range.start_line,
                end_line: range.end_line.max(range.start_line),
                symbol: range.symbol.clone(),
                kind: range.kind,
                text: range.text.trim_end().to_string(),
            })
            .collect();
        drafts.sort_by_key(|draft| (draft.start_line, draft.end_line));

        if drafts.is_empty() {
            self.whole_file_drafts(content)
        } else {
            drafts
        }
    }

    fn whole_file_drafts(&self, content: &str) -> Vec<Draft> {
        if content.trim().is_empty() {
            return Vec::new();
        }
        let line_count = content.lines().count().max(1);
        if estimate_tokens(content) <= self.max_tokens {
            return vec![Draft {
                start_line: 1,
                end_line: line_count,
                symbol: None,
                kind: ChunkKind::Block,
                text: content.trim_end().to_string(),
            }];
        }
        self.split_text_by_lines(content, 1)
            .into_iter()
            .map(|(text, start_line, end_line)| Draft {
                start_line,
                end_line,
                symbol: None,
                kind: ChunkKind::Block,
                text,
            })
            .collect()
    }

    fn split_large_drafts(&self, drafts: Vec<Draft>) -> Vec<Draft> {
        let mut out = Vec::new();
        for draft in drafts {
            if draft.tokens() <= self.max_tokens {
                out.push(draft);
                continue;
            }
            let parts = self.split_text_by_lines(&draft.text, draft.start_line);
            let sharded = parts.len() > 1;
            for (idx, (text, start_line, end_line)) in parts.into_iter().enumerate() {
                // Shards keep the owning symbol with an index suffix so the
                // ids stay distinct and the origin stays readable.
                let symbol = match (&draft.symbol, sharded) {
                    (Some(symbol), true) => Some(format!("{symbol}#{}", idx + 1)),
                    (symbol, _) => symbol.clone(),
                };
                out.push(Draft {
                    start_line,
                    end_line,
                    symbol,
                    kind: draft.kind,
                    text,
                });
            }
        }
        out
    }

    /// Accumulate lines up to the target, flushing hard at the max budget.
    fn split_text_by_lines(&self, text: &str, start_line: usize) -> Vec<(String, usize, usize)> {
        let lines: Vec<&str> = text.lines().collect();
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;
        let mut block_start = start_line;

        for (idx, line) in lines.iter().enumerate() {
            let line_tokens = estimate_tokens(line);
            if !current.is_empty()
                && current_tokens + line_tokens > self.target_tokens
                && current_tokens >= self.min_tokens
            {
                let end_line = block_start + current.len() - 1;
                chunks.push((current.join("\n"), block_start, end_line));
                block_start = start_line + idx;
                current.clear();
                current_tokens = 0;
            }

            current.push(line);
            current_tokens += line_tokens;

            if current_tokens >= self.max_tokens {
                let end_line = block_start + current.len() - 1;
                chunks.push((current.join("\n"), block_start, end_line));
                block_start = end_line + 1;
                current.clear();
                current_tokens = 0;
            }
        }

        if !current.is_empty() {
            let end_line = block_start + current.len() - 1;
            chunks.push((current.join("\n"), block_start, end_line));
        }

        chunks
    }

    fn merge_small_drafts(&self, drafts: Vec<Draft>) -> Vec<Draft> {
        if drafts.is_empty() {
            return drafts;
        }

        let mut merged: Vec<Draft> = Vec::new();
        let mut buffer: Vec<Draft> = Vec::new();

        fn flush(buffer: &mut Vec<Draft>, merged: &mut Vec<Draft>) {
            match buffer.len() {
                0 => {}
                1 => merged.push(buffer.remove(0)),
                _ => {
                    let text = buffer
                        .iter()
                        .map(|d| d.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    merged.push(Draft {
                        start_line: buffer[0].start_line,
                        end_line: buffer[buffer.len() - 1].end_line,
                        symbol: None,
                        kind: ChunkKind::Block,
                        text,
                    });
                    buffer.clear();
                }
            }
        }

        for draft in drafts {
            if draft.tokens() >= self.min_tokens {
                flush(&mut buffer, &mut merged);
                merged.push(draft);
                continue;
            }

            if buffer.is_empty() {
                buffer.push(draft);
                continue;
            }

            let buffered_tokens: usize = buffer.iter().map(Draft::tokens).sum();
            let gap = draft
                .start_line
                .saturating_sub(buffer[buffer.len() - 1].end_line);
            if buffered_tokens + draft.tokens() <= self.max_tokens && gap <= 40 {
                buffer.push(draft);
            } else {
                flush(&mut buffer, &mut merged);
                buffer.push(draft);
            }
        }
        flush(&mut buffer, &mut merged);

        // Fold a dangling undersized tail into its predecessor when the pair
        // still fits the budget.
        if merged.len() >= 2 && merged[merged.len() - 1].tokens() < self.min_tokens {
            if let (Some(tail), Some(prev)) = (merged.pop(), merged.pop()) {
                let combined = format!("{}\n\n{}", prev.text, tail.text);
                if estimate_tokens(&combined) <= self.max_tokens {
                    merged.push(Draft {
                        start_line: prev.start_line,
                        end_line: tail.end_line,
                        symbol: prev.symbol.clone(),
                        kind: prev.kind,
                        text: combined,
                    });
                } else {
                    merged.push(prev);
                    merged.push(tail);
                }
            }
        }

        merged
    }

    fn finalize(&self, repo_id: &str, file_path: &str, language: &str, draft: Draft) -> CodeChunk {
        let symbol = draft.symbol.clone().unwrap_or_default();
        let meta = extract_intent_metadata(&symbol, &draft.text);
        let kind = if meta.is_route {
            ChunkKind::Route
        } else {
            draft.kind
        };

        let description = describe(file_path, &draft, kind, &meta.http_method, &meta.route_path);

        let mut keyword_source = format!(
            "{description}\n{}",
            char_prefix(&draft.text, KEYWORD_SOURCE_CHARS)
        );
        if let Some(method) = &meta.http_method {
            keyword_source.push_str(&format!("\nHTTP method: {method}"));
        }
        if let Some(resource) = &meta.resource {
            keyword_source.push_str(&format!("\nResource: {resource}"));
        }
        let mut keywords = normalize_terms(&keyword_source);
        keywords.truncate(MAX_KEYWORDS);

        let content_hash = sha256_hex(draft.text.as_bytes());
        let chunk_id = sha256_hex(
            format!(
                "{repo_id}|{file_path}|{}|{}|{symbol}|{content_hash}",
                draft.start_line, draft.end_line
            )
            .as_bytes(),
        );

        CodeChunk {
            chunk_id,
            file_path: file_path.to_string(),
            language: language.to_string(),
            start_line: draft.start_line,
            end_line: draft.end_line,
            symbol,
            kind,
            content_hash,
            tokens: estimate_tokens(&draft.text),
            description,
            summary: None,
            intent_tags: meta.intent_tags,
            keywords,
            http_method: meta.http_method,
            resource: meta.resource,
            route_path: meta.route_path,
            text: draft.text,
        }
    }
}

fn describe(
    file_path: &str,
    draft: &Draft,
    kind: ChunkKind,
    http_method: &Option<String>,
    route_path: &Option<String>,
) -> String {
    let symbol = draft.symbol.as_deref().unwrap_or("");
    match kind {
        ChunkKind::Route => {
            let name = if symbol.is_empty() { "(anonymous)" } else { symbol };
            let mut description = format!("Route handler {name} in {file_path}");
            if let (Some(method), Some(path)) = (http_method, route_path) {
                if !symbol.starts_with(method.as_str()) {
                    description.push_str(&format!(" ({method} {path})"));
                }
            }
            description
        }
        ChunkKind::Class => format!("Class {symbol} in {file_path}"),
        ChunkKind::Method => format!("Method {symbol} in {file_path}"),
        ChunkKind::Function => format!("Function {symbol} in {file_path}"),
        ChunkKind::Block => format!(
            "Code block in {file_path} (lines {}-{})",
            draft.start_line, draft.end_line
        ),
    }
}

/// Byte-bounded prefix on a UTF-8 char boundary.
fn char_prefix(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
