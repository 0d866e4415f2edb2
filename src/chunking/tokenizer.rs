//! Identifier-aware tokenization shared by the chunk builder, the intent
//! enricher, and the hybrid scorer.
//!
//! `normalize_terms` is the single tokenization used everywhere a query or a
//! chunk is compared: identifiers are split on camelCase and underscores,
//! lowercased, and stop-filtered, so `getUserScore` and "get user score"
//! produce the same terms.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_]*|\d+").unwrap());

static COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_]+|[^\sA-Za-z0-9_]").unwrap());

static STOP_TERMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "an", "and", "or", "of", "to", "in", "on", "for", "with", "is",
        "are", "was", "be", "this", "that", "these", "those", "from", "into",
        "where", "when", "which", "what", "who", "how", "does", "do", "did",
        "should", "would", "could", "will", "it", "its", "at", "by", "as",
        "if", "then", "than", "not", "my", "our", "your", "there", "here",
        "about",
    ]
    .into_iter()
    .collect()
});

/// Rough token count: word and punctuation tokens scaled by 1.3 to
/// approximate a subword tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    let raw = COUNT_RE.find_iter(text).count();
    ((raw as f64) * 1.3).round() as usize
}

/// Extract normalized terms from arbitrary text: identifiers are split on
/// camelCase and underscores, lowercased, stop-filtered, and deduplicated
/// preserving first occurrence.
pub fn normalize_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for word in WORD_RE.find_iter(text) {
        for part in split_identifier(word.as_str()) {
            if part.len() < 2 || STOP_TERMS.contains(part.as_str()) {
                continue;
            }
            if seen.insert(part.clone()) {
                terms.push(part);
            }
        }
    }
    terms
}

/// Split an identifier into lowercase parts at underscores and camelCase
/// boundaries. `HTTPServer` yields `http` + `server`; `get_user` yields
/// `get` + `user`.
pub fn split_identifier(ident: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for segment in ident.split('_') {
        if segment.is_empty() {
            continue;
        }
        let chars: Vec<char> = segment.chars().collect();
        let mut start = 0;
        for i in 1..chars.len() {
            let prev = chars[i - 1];
            let cur = chars[i];
            let next_lower = chars.get(i + 1).map(|c| c.is_lowercase()).unwrap_or(false);
            let boundary = (prev.is_lowercase() || prev.is_ascii_digit()) && cur.is_uppercase()
                || prev.is_uppercase() && cur.is_uppercase() && next_lower
                || prev.is_alphabetic() && cur.is_ascii_digit()
                || prev.is_ascii_digit() && cur.is_alphabetic();
            if boundary {
                parts.push(chars[start..i].iter().collect::<String>().to_lowercase());
                start = i;
            }
        }
        parts.push(chars[start..].iter().collect::<String>().to_lowercase());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_camel_case() {
        assert_eq!(split_identifier("getUserScore"), vec!["get", "user", "score"]);
    }

    #[test]
    fn test_split_snake_case() {
        assert_eq!(split_identifier("create_user_score"), vec!["create", "user", "score"]);
    }

    #[test]
    fn test_split_acronym_prefix() {
        assert_eq!(split_identifier("HTTPServer"), vec!["http", "server"]);
    }

    #[test]
    fn test_normalize_query_matches_symbol_terms() {
        let from_query = normalize_terms("get user score");
        let from_symbol = normalize_terms("getUserScore");
        assert_eq!(from_query, from_symbol);
    }

    #[test]
    fn test_normalize_filters_stop_words_and_short_tokens() {
        let terms = normalize_terms("what does the recompute endpoint do for a user");
        assert!(terms.contains(&"recompute".to_string()));
        assert!(terms.contains(&"user".to_string()));
        assert!(!terms.contains(&"the".to_string()));
        assert!(!terms.contains(&"a".to_string()));
    }

    #[test]
    fn test_normalize_dedupes_preserving_order() {
        let terms = normalize_terms("score score average score");
        assert_eq!(terms, vec!["score", "average"]);
    }

    #[test]
    fn test_estimate_tokens_scales_up() {
        // 4 word tokens + 1 punctuation token, scaled by 1.3
        let n = estimate_tokens("let x = compute(y);");
        assert!(n >= 6, "expected inflated count, got {n}");
    }

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }
}
