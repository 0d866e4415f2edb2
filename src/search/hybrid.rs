//! Hybrid scoring: five normalized component scores combined with fixed
//! weights.
//!
//! ```text
//! score = 0.50·vector + 0.18·keyword + 0.12·symbol + 0.12·intent + 0.08·structural
//! ```
//!
//! Heuristic multipliers (route boost, intent boost, noise penalty) are
//! applied afterwards by `search::heuristics`, then the total is clamped to
//! `[0, 1]`.

use std::collections::HashSet;

use crate::chunking::tokenizer::normalize_terms;
use crate::intent::QuerySignal;
use crate::models::{ChunkKind, ChunkPayload};

pub const VECTOR_WEIGHT: f32 = 0.50;
pub const KEYWORD_WEIGHT: f32 = 0.18;
pub const SYMBOL_WEIGHT: f32 = 0.12;
pub const INTENT_WEIGHT: f32 = 0.12;
pub const STRUCTURAL_WEIGHT: f32 = 0.08;

/// The five component scores plus their weighted sum, all in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct ComponentScores {
    pub vector: f32,
    pub keyword: f32,
    pub symbol: f32,
    pub intent: f32,
    pub structural: f32,
    pub weighted: f32,
}

pub struct HybridScorer;

impl HybridScorer {
    pub fn score(
        query_terms: &[String],
        query_signal: &QuerySignal,
        vector_score: f32,
        payload: &ChunkPayload,
    ) -> ComponentScores {
        let vector = vector_score.clamp(0.0, 1.0);
        let keyword = keyword_score(query_terms, &payload.keywords);
        let symbol = symbol_score(query_terms, &payload.symbol);
        let intent = intent_score(query_signal, payload);
        let structural = structural_score(query_signal, payload.kind);

        let weighted = VECTOR_WEIGHT * vector
            + KEYWORD_WEIGHT * keyword
            + SYMBOL_WEIGHT * symbol
            + INTENT_WEIGHT * intent
            + STRUCTURAL_WEIGHT * structural;

        ComponentScores {
            vector,
            keyword,
            symbol,
            intent,
            structural,
            weighted,
        }
    }
}

/// Fraction of query terms present in the chunk's keywords.
fn keyword_score(query_terms: &[String], keywords: &[String]) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let candidate: HashSet<&str> = keywords.iter().map(String::as_str).collect();
    let overlap = query_terms
        .iter()
        .filter(|term| candidate.contains(term.as_str()))
        .count();
    overlap as f32 / query_terms.len().max(1) as f32
}

/// 1.0 on an exact match against the symbol or any of its split terms, 0.5
/// when a query term (3+ chars) is a substring of the symbol.
fn symbol_score(query_terms: &[String], symbol: &str) -> f32 {
    if symbol.is_empty() || query_terms.is_empty() {
        return 0.0;
    }
    let symbol_lower = symbol.to_lowercase();
    let symbol_terms: HashSet<String> = normalize_terms(symbol).into_iter().collect();

    let mut best = 0.0f32;
    for term in query_terms {
        if *term == symbol_lower || symbol_terms.contains(term) {
            return 1.0;
        }
        if term.len() >= 3 && symbol_lower.contains(term.as_str()) {
            best = best.max(0.5);
        }
    }
    best
}

/// 1.0 when a query intent tag is on the chunk; 0.5 when only the HTTP
/// method lines up; 0.0 otherwise.
fn intent_score(query_signal: &QuerySignal, payload: &ChunkPayload) -> f32 {
    if query_signal.intents.is_empty() && query_signal.methods.is_empty() {
        return 0.0;
    }
    let tag_match = query_signal
        .intents
        .iter()
        .any(|intent| payload.intent_tags.contains(intent));
    if tag_match {
        return 1.0;
    }
    if let Some(method) = &payload.http_method {
        if query_signal.methods.contains(&method.to_lowercase()) {
            return 0.5;
        }
    }
    0.0
}

fn structural_score(query_signal: &QuerySignal, kind: ChunkKind) -> f32 {
    match kind {
        ChunkKind::Route if query_signal.route_shaped() => 1.0,
        ChunkKind::Route | ChunkKind::Function | ChunkKind::Method => 0.75,
        ChunkKind::Class => 0.5,
        ChunkKind::Block => 0.25,
    }
}
