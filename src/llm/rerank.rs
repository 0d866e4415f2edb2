//! LLM rerank + selection over the top hybrid candidates.
//!
//! Invoked only when the best vector score falls below the configured
//! threshold. The model sees path, lines, symbol, summary, and scores for
//! each candidate (never raw code) and returns an ordering plus a single
//! `{file, line, reason}` selection. The output is validated against the
//! candidate list; anything unparseable degrades to the heuristic result.

use anyhow::{Context, Result};
use serde_json::json;

use crate::llm::provider::LlmProvider;
use crate::models::{QueryMatch, Selection};

const RERANK_PROMPT: &str = "You are reranking semantic code search candidates.

Task:
- Order the candidates from most to least relevant to the user query.
- Choose the single best candidate that answers the query.
- Only choose from the provided candidates.
- Prefer exact behavioral relevance over lexical overlap.

Return only a JSON object with this schema:
{
  \"order\": [1, 2, 3],
  \"file\": \"relative/path.js\",
  \"line\": 42,
  \"reason\": \"brief technical explanation\"
}
";

#[derive(Debug, Clone)]
pub struct LlmRerankDecision {
    /// Candidate indices (0-based into the input slice), best first. None
    /// when the model returned no usable ordering.
    pub order: Option<Vec<usize>>,
    pub selection: Selection,
    pub latency_ms: u64,
}

pub async fn rerank_and_select(
    provider: &LlmProvider,
    query: &str,
    matches: &[QueryMatch],
) -> Result<LlmRerankDecision> {
    anyhow::ensure!(!matches.is_empty(), "No candidates to rerank");

    let prompt = build_prompt(query, matches);
    let (raw, latency_ms) = provider.complete_text(&prompt, None).await?;
    let (order, selection) = parse_decision(&raw, matches)?;

    Ok(LlmRerankDecision {
        order,
        selection,
        latency_ms,
    })
}

fn build_prompt(query: &str, matches: &[QueryMatch]) -> String {
    let candidates: Vec<serde_json::Value> = matches
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            json!({
                "rank": idx + 1,
                "file_path": m.payload.path,
                "line_range": { "start": m.payload.start_line, "end": m.payload.end_line },
                "symbol": m.payload.symbol,
                "summary": m.payload.summary.as_deref().unwrap_or(&m.payload.description),
                "intent_tags": m.payload.intent_tags,
                "http_method": m.payload.http_method,
                "scores": {
                    "hybrid": round6(m.score),
                    "vector": round6(m.vector_score),
                    "keyword": round6(m.keyword_score),
                    "symbol": round6(m.symbol_score),
                },
            })
        })
        .collect();

    format!(
        "{RERANK_PROMPT}\nUser Query:\n{query}\n\nCandidates (JSON):\n{}\n",
        serde_json::to_string_pretty(&candidates).unwrap_or_default()
    )
}

fn round6(value: f32) -> f64 {
    (f64::from(value) * 1e6).round() / 1e6
}

/// Extract and validate the model's JSON decision.
fn parse_decision(
    raw: &str,
    matches: &[QueryMatch],
) -> Result<(Option<Vec<usize>>, Selection)> {
    let start = raw.find('{').context("No JSON object in LLM output")?;
    let end = raw.rfind('}').context("No JSON object in LLM output")?;
    anyhow::ensure!(end >= start, "Malformed JSON object in LLM output");
    let payload: serde_json::Value =
        serde_json::from_str(&raw[start..=end]).context("Failed to parse LLM rerank output")?;

    let file = payload
        .get("file")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .context("LLM output must include a non-empty 'file'")?;
    let line = payload
        .get("line")
        .and_then(|v| v.as_u64())
        .filter(|&l| l > 0)
        .context("LLM output must include a positive 'line'")? as usize;
    let reason = payload
        .get("reason")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .context("LLM output must include a non-empty 'reason'")?
        .to_string();

    // The selection must land on a candidate; a line outside every range in
    // the named file snaps to the strongest candidate in that file.
    let exact = matches.iter().find(|m| {
        m.payload.path == file && m.payload.start_line <= line && line <= m.payload.end_line
    });
    let selection = match exact {
        Some(m) => Selection {
            file: m.payload.path.clone(),
            line,
            reason,
        },
        None => {
            let fallback = matches
                .iter()
                .filter(|m| m.payload.path == file)
                .max_by(|a, b| {
                    a.score
                        .partial_cmp(&b.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .context("LLM selected a file that is not among the candidates")?;
            Selection {
                file: fallback.payload.path.clone(),
                line: fallback.payload.start_line,
                reason,
            }
        }
    };

    let order = payload
        .get("order")
        .and_then(|v| v.as_array())
        .and_then(|ranks| {
            let mut seen = std::collections::HashSet::new();
            let indices: Vec<usize> = ranks
                .iter()
                .filter_map(|rank| rank.as_u64())
                .filter(|&rank| rank >= 1 && rank as usize <= matches.len())
                .map(|rank| rank as usize - 1)
                .filter(|idx| seen.insert(*idx))
                .collect();
            (!indices.is_empty()).then_some(indices)
        });

    Ok((order, selection))
}
