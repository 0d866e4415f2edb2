//! Query orchestration: rewrite → embed → ANN search → hybrid scoring →
//! optional cross-encoder rerank → threshold-gated LLM rerank + selection.
//!
//! Keyword and intent extraction always run over the user's raw query; the
//! rewritten query (when enabled) is used only for embedding. Every optional
//! stage degrades silently to the previous stage's output.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::errors::ApiError;
use crate::intent::infer_query_signal;
use crate::chunking::tokenizer::normalize_terms;
use crate::llm::cross_encoder::{self, CROSS_ENCODER_WEIGHT, HYBRID_WEIGHT};
use crate::llm::provider::LlmProvider;
use crate::llm::rerank::rerank_and_select;
use crate::llm::rewrite::QueryRewriter;
use crate::models::{QueryMatch, QueryOutcome, Selection, SelectionSource};
use crate::search::heuristics::{HeuristicDecision, RankingHeuristics};
use crate::search::hybrid::{ComponentScores, HybridScorer};
use crate::state::RepoState;

/// Reason attached to the heuristic (non-LLM) selection.
const HEURISTIC_REASON: &str = "highest hybrid score";

/// Candidates offered to the LLM reranker.
const LLM_RERANK_CANDIDATES: usize = 10;

pub struct QueryEngine {
    config: Arc<Config>,
    http_client: reqwest::Client,
    llm: Arc<LlmProvider>,
    rewriter: Option<Arc<QueryRewriter>>,
    heuristics: RankingHeuristics,
}

impl QueryEngine {
    pub fn new(
        config: Arc<Config>,
        http_client: reqwest::Client,
        llm: Arc<LlmProvider>,
        rewriter: Option<Arc<QueryRewriter>>,
    ) -> Self {
        let heuristics = RankingHeuristics::new(&config.heuristics);
        Self {
            config,
            http_client,
            llm,
            rewriter,
            heuristics,
        }
    }

    pub async fn query(
        &self,
        repo: &RepoState,
        raw_query: &str,
        top_k: usize,
    ) -> Result<QueryOutcome, ApiError> {
        let started = Instant::now();

        let query = raw_query.trim();
        if query.is_empty() {
            return Err(ApiError::invalid_request("Query must not be empty"));
        }
        if !repo.vectors.exists() {
            return Err(ApiError::not_indexed(&repo.repo_path.display().to_string()));
        }

        if top_k == 0 {
            return Ok(QueryOutcome {
                matches: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
                selection: None,
                selection_source: None,
                used_llm: false,
                llm_model: None,
                llm_latency_ms: None,
                rewritten_query: None,
            });
        }

        // Optional rewrite feeds the embedding only; keywords and intents
        // come from the user's words.
        let mut rewritten_query: Option<String> = None;
        let mut llm_latency_ms: u64 = 0;
        if let Some(rewriter) = &self.rewriter {
            if let Some((rewritten, latency)) = rewriter.rewrite(query).await {
                llm_latency_ms += latency;
                rewritten_query = Some(rewritten);
            }
        }
        let query_for_embedding = rewritten_query.as_deref().unwrap_or(query);

        let query_terms = normalize_terms(query);
        let query_signal = infer_query_signal(query);

        let query_vector = repo
            .embeddings
            .embed_query(query_for_embedding)
            .await
            .map_err(ApiError::from)?;
        if let Some(dim) = repo.vectors.dimension() {
            if dim != query_vector.len() {
                return Err(ApiError::dimension_mismatch(dim, query_vector.len()));
            }
        }

        let candidate_limit = (top_k * 4).max(25);
        let hits = repo.vectors.search(&query_vector, candidate_limit);

        let mut matches: Vec<QueryMatch> = hits
            .into_iter()
            .map(|hit| {
                let components =
                    HybridScorer::score(&query_terms, &query_signal, hit.score, &hit.payload);
                let decision =
                    self.heuristics
                        .evaluate(&query_terms, &query_signal, &hit.payload);
                let score = (components.weighted * decision.multiplier).clamp(0.0, 1.0);
                let explanation = build_explanation(&components, &decision);
                QueryMatch {
                    chunk_id: hit.chunk_id,
                    payload: hit.payload,
                    score,
                    vector_score: components.vector,
                    keyword_score: components.keyword,
                    symbol_score: components.symbol,
                    intent_score: components.intent,
                    structural_score: components.structural,
                    matched_intents: decision.matched_intents,
                    matched_keywords: decision.matched_keywords,
                    explanation,
                }
            })
            .collect();

        sort_matches(&mut matches);
        matches.truncate(top_k * 2);

        if self.config.reranker.enabled && matches.len() >= 2 {
            self.cross_encoder_rerank(query, &mut matches).await;
        }

        let mut selection: Option<Selection> = None;
        let mut selection_source: Option<SelectionSource> = None;
        let mut used_llm = false;
        let mut llm_model: Option<String> = None;

        if let Some(best) = matches.first() {
            let gated_in = self.config.llm.enabled
                && self.llm.is_enabled()
                && best.vector_score < self.config.llm.threshold;
            if gated_in {
                let candidate_count = matches.len().min(LLM_RERANK_CANDIDATES);
                match rerank_and_select(&self.llm, query, &matches[..candidate_count]).await {
                    Ok(decision) => {
                        if let Some(order) = decision.order {
                            apply_order(&mut matches, &order, candidate_count);
                        }
                        selection = Some(decision.selection);
                        selection_source = Some(SelectionSource::Llm);
                        used_llm = true;
                        llm_model = self.llm.default_model().map(str::to_string);
                        llm_latency_ms += decision.latency_ms;
                    }
                    Err(err) => {
                        tracing::warn!("LLM rerank failed, using heuristic selection: {err:#}");
                    }
                }
            }
        }

        if selection.is_none() {
            if let Some(best) = matches.first() {
                selection = Some(Selection {
                    file: best.payload.path.clone(),
                    line: best.payload.start_line,
                    reason: HEURISTIC_REASON.to_string(),
                });
                selection_source = Some(SelectionSource::Heuristic);
            }
        }

        matches.truncate(top_k);

        Ok(QueryOutcome {
            matches,
            duration_ms: started.elapsed().as_millis() as u64,
            selection,
            selection_source,
            used_llm,
            llm_model,
            llm_latency_ms: used_llm.then_some(llm_latency_ms),
            rewritten_query,
        })
    }

    /// Reorder the cross-encoder window by the blended score; failures leave
    /// the hybrid order untouched.
    async fn cross_encoder_rerank(&self, query: &str, matches: &mut Vec<QueryMatch>) {
        let window = matches.len().min(self.config.reranker.top_k);
        let documents: Vec<String> = matches[..window]
            .iter()
            .map(|m| m.payload.embedding_text())
            .collect();

        let scores = match cross_encoder::score_pairs(
            &self.http_client,
            &self.config.reranker,
            query,
            &documents,
        )
        .await
        {
            Ok(scores) if scores.len() == window => scores,
            Ok(_) => {
                tracing::warn!("Cross-encoder returned a mismatched score count; skipping");
                return;
            }
            Err(err) => {
                tracing::warn!("Cross-encoder rerank skipped: {err:#}");
                return;
            }
        };

        let normalized = cross_encoder::rank_norm(&scores);
        let mut remainder = matches.split_off(window);
        for (m, ce) in matches.iter_mut().zip(normalized) {
            m.score = (CROSS_ENCODER_WEIGHT * ce + HYBRID_WEIGHT * m.score).clamp(0.0, 1.0);
            m.explanation
                .push_str(&format!("; cross_encoder={ce:.3}"));
        }
        sort_matches(matches);
        matches.append(&mut remainder);
    }
}

/// Score descending, ties broken by vector score, then path, then line.
fn sort_matches(matches: &mut [QueryMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.vector_score
                    .partial_cmp(&a.vector_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.payload.path.cmp(&b.payload.path))
            .then_with(|| a.payload.start_line.cmp(&b.payload.start_line))
    });
}

/// Reorder the LLM window by the model's candidate indices; unmentioned
/// candidates keep their relative order behind the mentioned ones.
fn apply_order(matches: &mut Vec<QueryMatch>, order: &[usize], window: usize) {
    let tail = matches.split_off(window);
    let mut head: Vec<Option<QueryMatch>> = matches.drain(..).map(Some).collect();

    let mut reordered = Vec::with_capacity(head.len());
    for &idx in order {
        if let Some(slot) = head.get_mut(idx) {
            if let Some(m) = slot.take() {
                reordered.push(m);
            }
        }
    }
    reordered.extend(head.into_iter().flatten());
    reordered.extend(tail);
    *matches = reordered;
}

/// Deterministic explanation listing the nonzero components and any applied
/// heuristic multipliers.
fn build_explanation(components: &ComponentScores, decision: &HeuristicDecision) -> String {
    let mut parts = Vec::new();
    for (name, value) in [
        ("vector", components.vector),
        ("keyword", components.keyword),
        ("symbol", components.symbol),
        ("intent", components.intent),
        ("structural", components.structural),
    ] {
        if value > 0.0 {
            parts.push(format!("{name}={value:.3}"));
        }
    }
    parts.extend(decision.reasons.iter().cloned());
    parts.join("; ")
}
