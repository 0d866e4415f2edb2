//! Cross-encoder reranking via an OpenAI-compatible `/v1/rerank` endpoint.
//!
//! Sends a single batch request with all query-document pairs instead of
//! making N individual calls. Scores are min-max normalized over the
//! candidate set and blended with the hybrid score by the query engine:
//! `final = 0.6 * rank_norm(ce) + 0.4 * score`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::RerankerConfig;

pub const CROSS_ENCODER_WEIGHT: f32 = 0.6;
pub const HYBRID_WEIGHT: f32 = 0.4;

/// Relevance scores aligned with the input documents.
pub async fn score_pairs(
    client: &reqwest::Client,
    config: &RerankerConfig,
    query: &str,
    documents: &[String],
) -> Result<Vec<f32>> {
    let base_url = config
        .base_url
        .as_deref()
        .context("Reranker base_url not configured")?;
    let url = format!("{}/v1/rerank", base_url.trim_end_matches('/'));

    let req_body = RerankRequest {
        model: config.model.clone(),
        query: query.to_string(),
        documents: documents.to_vec(),
        top_n: documents.len(),
    };

    let timeout = std::time::Duration::from_millis(config.timeout_ms);
    let resp = client
        .post(&url)
        .timeout(timeout)
        .json(&req_body)
        .send()
        .await
        .context("Failed to reach reranker endpoint")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Reranker returned {status}: {body}");
    }

    let body: RerankResponse = resp
        .json()
        .await
        .context("Failed to parse reranker response")?;

    let mut scores = vec![0.0f32; documents.len()];
    for result in body.results {
        if result.index < scores.len() {
            scores[result.index] = result.relevance_score;
        }
    }
    Ok(scores)
}

/// Min-max normalize raw cross-encoder outputs over the candidate set. A
/// constant score list normalizes to all zeros.
pub fn rank_norm(scores: &[f32]) -> Vec<f32> {
    let Some(min) = scores.iter().cloned().reduce(f32::min) else {
        return Vec::new();
    };
    let max = scores.iter().cloned().fold(min, f32::max);
    let span = max - min;
    if span <= f32::EPSILON {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|score| (score - min) / span).collect()
}

// ─── Request/Response types ──────────────────────────────

#[derive(Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_norm_spreads_to_unit_range() {
        let normalized = rank_norm(&[2.0, 6.0, 4.0]);
        assert_eq!(normalized, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_rank_norm_constant_scores() {
        assert_eq!(rank_norm(&[3.0, 3.0, 3.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rank_norm_empty() {
        assert!(rank_norm(&[]).is_empty());
    }

    #[test]
    fn test_rank_norm_negative_logits() {
        let normalized = rank_norm(&[-4.0, 0.0]);
        assert_eq!(normalized, vec![0.0, 1.0]);
    }

    #[test]
    fn test_blend_weights_sum_to_one() {
        assert!((CROSS_ENCODER_WEIGHT + HYBRID_WEIGHT - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"results":[{"index":1,"relevance_score":0.9},{"index":0,"relevance_score":0.2}]}"#;
        let parsed: RerankResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].index, 1);
    }
}
