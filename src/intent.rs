//! Intent and structural enrichment: lightweight pattern matching that tags
//! chunks and queries with a closed intent vocabulary, detects HTTP route
//! registrations, and extracts the addressed resource. No LLM involved.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chunking::tokenizer::normalize_terms;

/// Closed intent vocabulary shared by chunks and queries.
pub const INTENT_READ: &str = "read_resource";
pub const INTENT_CREATE: &str = "create_resource";
pub const INTENT_UPDATE: &str = "update_resource";
pub const INTENT_DELETE: &str = "delete_resource";
pub const INTENT_LIST: &str = "list_resource";
pub const INTENT_OTHER: &str = "other";

/// Express style registrations: `app.get("/x", …)`, `router.delete(…)`.
/// Also matches the call part of Python decorators like `@app.post("/x")`.
/// The path argument must start with `/` so lookups like `map.get("key")`
/// are not mistaken for routes.
static ROUTE_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\.\s*(get|post|put|delete|patch)\s*\(\s*['"](/[^'"]*)['"]"#).unwrap()
});

static HTTP_METHODS: &[&str] = &["get", "post", "put", "delete", "patch"];

/// Map an HTTP method to its intent tag.
pub fn method_intent(method: &str) -> Option<&'static str> {
    match method.to_lowercase().as_str() {
        "get" => Some(INTENT_READ),
        "post" => Some(INTENT_CREATE),
        "put" | "patch" => Some(INTENT_UPDATE),
        "delete" => Some(INTENT_DELETE),
        _ => None,
    }
}

/// Map a symbol or query verb to its intent tag.
pub fn verb_intent(verb: &str) -> Option<&'static str> {
    match verb {
        "create" | "add" | "new" | "insert" | "register" | "post" | "submit" => {
            Some(INTENT_CREATE)
        }
        "update" | "edit" | "modify" | "change" | "patch" | "put" | "recompute" | "upsert" => {
            Some(INTENT_UPDATE)
        }
        "delete" | "remove" | "destroy" | "drop" => Some(INTENT_DELETE),
        "list" => Some(INTENT_LIST),
        "get" | "fetch" | "read" | "find" | "show" | "retrieve" => Some(INTENT_READ),
        _ => None,
    }
}

/// A detected HTTP route registration inside a chunk's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSignal {
    /// Upper-case HTTP verb.
    pub method: String,
    pub path: String,
    /// Last non-parameter path segment, singularized.
    pub resource: Option<String>,
    pub intent: &'static str,
}

/// Scan chunk source for a route registration. Returns None when the text
/// registers no handler.
pub fn extract_route_signal(text: &str) -> Option<RouteSignal> {
    let caps = ROUTE_CALL_RE.captures(text)?;
    let method = caps.get(1)?.as_str().to_lowercase();
    let path = caps.get(2)?.as_str().to_string();
    let intent = method_intent(&method)?;
    Some(RouteSignal {
        method: method.to_uppercase(),
        resource: resource_from_path(&path),
        path,
        intent,
    })
}

/// The last non-parameter path segment, singularized where trivially
/// detectable. `/users/:userId/score` yields `score`; `/users` yields `user`.
fn resource_from_path(path: &str) -> Option<String> {
    let trimmed = path.trim().trim_matches('/');
    let segment = trimmed.split('/').rev().find(|segment| {
        !segment.is_empty()
            && !segment.starts_with(':')
            && !(segment.starts_with('{') && segment.ends_with('}'))
            && !(segment.starts_with('<') && segment.ends_with('>'))
    })?;
    let token = normalize_terms(segment).into_iter().next()?;
    Some(singularize(&token))
}

fn singularize(value: &str) -> String {
    if value.ends_with("ies") && value.len() > 4 {
        format!("{}y", &value[..value.len() - 3])
    } else if value.ends_with('s') && !value.ends_with("ss") && value.len() > 3 {
        value[..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

/// Intent signal inferred from a user query.
#[derive(Debug, Clone, Default)]
pub struct QuerySignal {
    pub intents: Vec<String>,
    pub methods: Vec<String>,
}

impl QuerySignal {
    /// A query is route-shaped when it carries an intent verb or an HTTP
    /// method term.
    pub fn route_shaped(&self) -> bool {
        !self.intents.is_empty() || !self.methods.is_empty()
    }
}

/// Derive query intents with the same rules used for chunks, plus verb
/// keywords.
pub fn infer_query_signal(query: &str) -> QuerySignal {
    let terms = normalize_terms(query);
    let mut methods: Vec<String> = terms
        .iter()
        .filter(|term| HTTP_METHODS.contains(&term.as_str()))
        .cloned()
        .collect();
    methods.sort();
    methods.dedup();

    let mut intents: Vec<String> = terms
        .iter()
        .filter_map(|term| verb_intent(term))
        .map(str::to_string)
        .collect();
    for method in &methods {
        if let Some(intent) = method_intent(method) {
            intents.push(intent.to_string());
        }
    }
    intents.sort();
    intents.dedup();

    QuerySignal { intents, methods }
}

/// Structural metadata derived for one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMetadata {
    pub intent_tags: Vec<String>,
    pub http_method: Option<String>,
    pub route_path: Option<String>,
    pub resource: Option<String>,
    pub is_route: bool,
}

/// Derive intent tags and route metadata from a chunk's symbol and source.
pub fn extract_intent_metadata(symbol: &str, text: &str) -> IntentMetadata {
    let route = extract_route_signal(text);

    let mut tags: Vec<String> = Vec::new();
    if let Some(signal) = &route {
        tags.push(signal.intent.to_string());
    }
    for term in normalize_terms(symbol) {
        if let Some(intent) = verb_intent(&term) {
            tags.push(intent.to_string());
        }
    }
    tags.sort();
    tags.dedup();
    if tags.is_empty() {
        tags.push(INTENT_OTHER.to_string());
    }

    let is_route = route.is_some();
    IntentMetadata {
        intent_tags: tags,
        http_method: route.as_ref().map(|signal| signal.method.clone()),
        route_path: route.as_ref().map(|signal| signal.path.clone()),
        resource: route.and_then(|signal| signal.resource),
        is_route,
    }
}
