//! Ranking heuristics applied after the weighted component sum: a boost for
//! route chunks matching the query intent, a general intent boost, and a
//! penalty for test or vendored paths.

use std::collections::BTreeSet;

use crate::chunking::tokenizer::normalize_terms;
use crate::config::HeuristicConfig;
use crate::intent::QuerySignal;
use crate::models::{ChunkKind, ChunkPayload};

/// Path segments marking noise candidates (tests, vendored code).
const NOISE_SEGMENTS: &[&str] = &[
    "test",
    "tests",
    "__tests__",
    "spec",
    "specs",
    "fixtures",
    "mocks",
    "vendor",
    "vendored",
    "third_party",
    "node_modules",
];

/// Outcome of evaluating one candidate.
#[derive(Debug, Clone)]
pub struct HeuristicDecision {
    pub multiplier: f32,
    pub matched_intents: Vec<String>,
    pub matched_keywords: Vec<String>,
    /// Human-readable labels for the explanation string.
    pub reasons: Vec<String>,
}

pub struct RankingHeuristics {
    route_boost: f32,
    intent_boost: f32,
    noise_penalty: f32,
}

impl RankingHeuristics {
    pub fn new(config: &HeuristicConfig) -> Self {
        Self {
            route_boost: config.route_boost.max(0.1),
            intent_boost: config.intent_boost.max(0.1),
            noise_penalty: config.noise_penalty.max(0.1),
        }
    }

    pub fn evaluate(
        &self,
        query_terms: &[String],
        query_signal: &QuerySignal,
        payload: &ChunkPayload,
    ) -> HeuristicDecision {
        let mut multiplier = 1.0f32;
        let mut reasons = Vec::new();

        let matched_intents: Vec<String> = query_signal
            .intents
            .iter()
            .filter(|intent| payload.intent_tags.contains(intent))
            .cloned()
            .collect();

        if !matched_intents.is_empty() {
            multiplier *= self.intent_boost;
            reasons.push(format!(
                "intent_boost(x{:.2}: {})",
                self.intent_boost,
                matched_intents.join(", ")
            ));
            if payload.kind == ChunkKind::Route {
                multiplier *= self.route_boost;
                reasons.push(format!("route_boost(x{:.2})", self.route_boost));
            }
        }

        if is_noise_path(&payload.path) {
            multiplier *= self.noise_penalty;
            reasons.push(format!("noise_penalty(x{:.2})", self.noise_penalty));
        }

        HeuristicDecision {
            multiplier,
            matched_intents,
            matched_keywords: matched_keywords(query_terms, payload),
            reasons,
        }
    }
}

/// True for test files and vendored paths.
pub fn is_noise_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    let has_noise_segment = lower
        .split(['/', '\\'])
        .any(|segment| NOISE_SEGMENTS.contains(&segment));
    if has_noise_segment {
        return true;
    }
    let stem = lower
        .rsplit('/')
        .next()
        .and_then(|name| name.split('.').next())
        .unwrap_or("");
    stem.ends_with("_test")
        || stem.ends_with("_spec")
        || lower.contains(".test.")
        || lower.contains(".spec.")
}

fn matched_keywords(query_terms: &[String], payload: &ChunkPayload) -> Vec<String> {
    let mut candidate: BTreeSet<String> = payload.keywords.iter().cloned().collect();
    candidate.extend(normalize_terms(&payload.symbol));
    if let Some(method) = &payload.http_method {
        candidate.insert(method.to_lowercase());
    }
    if let Some(resource) = &payload.resource {
        candidate.insert(resource.clone());
    }

    let mut matched: Vec<String> = query_terms
        .iter()
        .filter(|term| candidate.contains(term.as_str()))
        .cloned()
        .collect();
    matched.sort();
    matched.truncate(8);
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::infer_query_signal;

    fn heuristics() -> RankingHeuristics {
        RankingHeuristics::new(&HeuristicConfig::default())
    }

    fn payload(path: &str, kind: ChunkKind, tags: &[&str]) -> ChunkPayload {
        ChunkPayload {
            path: path.to_string(),
            start_line: 1,
            end_line: 10,
            symbol: "recomputeScore".to_string(),
            kind,
            keywords: vec!["recompute".to_string(), "score".to_string()],
            intent_tags: tags.iter().map(|t| t.to_string()).collect(),
            http_method: None,
            resource: None,
            description: String::new(),
            summary: None,
        }
    }

    fn evaluate(query: &str, payload: &ChunkPayload) -> HeuristicDecision {
        let terms = normalize_terms(query);
        let signal = infer_query_signal(query);
        heuristics().evaluate(&terms, &signal, payload)
    }

    #[test]
    fn test_intent_and_route_boost_stack() {
        let p = payload("src/server.js", ChunkKind::Route, &["create_resource"]);
        let decision = evaluate("create new score", &p);
        let expected = 1.2 * 1.3;
        assert!((decision.multiplier - expected).abs() < 1e-6);
        assert_eq!(decision.matched_intents, vec!["create_resource"]);
    }

    #[test]
    fn test_intent_boost_alone_for_functions() {
        let p = payload("src/score.js", ChunkKind::Function, &["update_resource"]);
        let decision = evaluate("recompute the score", &p);
        assert!((decision.multiplier - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_noise_penalty_for_test_paths() {
        let p = payload("tests/score_test.js", ChunkKind::Function, &[]);
        let decision = evaluate("score math", &p);
        assert!((decision.multiplier - 0.7).abs() < 1e-6);
        assert!(decision.reasons.iter().any(|r| r.contains("noise_penalty")));
    }

    #[test]
    fn test_no_signals_leaves_multiplier_unchanged() {
        let p = payload("src/score.js", ChunkKind::Function, &["other"]);
        let decision = evaluate("score math", &p);
        assert_eq!(decision.multiplier, 1.0);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn test_matched_keywords_intersect_and_sort() {
        let p = payload("src/score.js", ChunkKind::Function, &[]);
        let decision = evaluate("recompute user score", &p);
        assert_eq!(decision.matched_keywords, vec!["recompute", "score"]);
    }

    #[test]
    fn test_is_noise_path_variants() {
        assert!(is_noise_path("tests/util.py"));
        assert!(is_noise_path("src/__tests__/app.test.js"));
        assert!(is_noise_path("pkg/score_test.go"));
        assert!(is_noise_path("vendor/lib/index.js"));
        assert!(is_noise_path("src/app.spec.ts"));
        assert!(!is_noise_path("src/contest/score.js"));
        assert!(!is_noise_path("src/server.js"));
    }
}
