//! Grammar-driven symbol extraction using tree-sitter.
//!
//! Produces a flat list of named ranges (functions, methods, classes, route
//! registrations, large top-level blocks) for every supported language. For
//! languages without a grammar the caller falls back to a whole-file block.
//! Parsing is deterministic and side-effect-free.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ChunkKind;

/// Registration spotting: `.get(`, `router.post(`, `@app.delete(` etc.
static ROUTE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.\s*(get|post|put|delete|patch|route|use)\s*\(").unwrap());

/// The first argument must be a quoted path starting with `/`.
static PATH_ARG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\(\s*['"]/"#).unwrap());

static ROUTE_METHOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());

static ROUTE_PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\(\s*['"](/[^'"]*)['"]"#).unwrap());

static PY_DEF_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"def\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Languages with a grammar available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Rust,
}

impl Language {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "python" => Some(Language::Python),
            "javascript" => Some(Language::JavaScript),
            "typescript" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "rust" => Some(Language::Rust),
            _ => None,
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }
}

/// A named source range extracted from the syntax tree.
#[derive(Debug, Clone)]
pub struct NodeRange {
    pub kind: ChunkKind,
    pub symbol: Option<String>,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// Parse a file's declarations. Returns an empty list for unknown languages
/// or unparseable content; the chunk builder treats that as a whole-file
/// block.
pub fn parse_symbols(language_tag: &str, content: &str) -> Vec<NodeRange> {
    let Some(language) = Language::from_tag(language_tag) else {
        return Vec::new();
    };

    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&language.grammar()).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(content, None) else {
        return Vec::new();
    };
    let root = tree.root_node();

    let mut ranges = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let mut cursor = node.walk();
        let children: Vec<tree_sitter::Node> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }

        match language {
            Language::Python => collect_python(node, content, &mut ranges),
            Language::Rust => collect_rust(node, content, &mut ranges),
            _ => collect_js_ts(node, content, &mut ranges),
        }
    }

    collect_major_blocks(root, content, &mut ranges);

    dedupe_sorted(ranges)
}

fn node_text<'a>(content: &'a str, node: tree_sitter::Node) -> &'a str {
    content.get(node.byte_range()).unwrap_or("")
}

fn line_range(node: tree_sitter::Node) -> (usize, usize) {
    (node.start_position().row + 1, node.end_position().row + 1)
}

fn field_text(content: &str, node: tree_sitter::Node, field: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|name| node_text(content, name).to_string())
}

fn push(
    ranges: &mut Vec<NodeRange>,
    kind: ChunkKind,
    symbol: Option<String>,
    node: tree_sitter::Node,
    content: &str,
) {
    let (start_line, end_line) = line_range(node);
    ranges.push(NodeRange {
        kind,
        symbol,
        start_line,
        end_line,
        text: node_text(content, node).to_string(),
    });
}

fn collect_python(node: tree_sitter::Node, content: &str, ranges: &mut Vec<NodeRange>) {
    match node.kind() {
        "function_definition" | "async_function_definition" => {
            let symbol = field_text(content, node, "name");
            let in_class = node
                .parent()
                .and_then(|p| p.parent())
                .map(|gp| gp.kind() == "class_definition")
                .unwrap_or(false);
            let kind = if in_class {
                ChunkKind::Method
            } else {
                ChunkKind::Function
            };
            push(ranges, kind, symbol, node, content);
        }
        "class_definition" => {
            let symbol = field_text(content, node, "name");
            push(ranges, ChunkKind::Class, symbol, node, content);
        }
        "decorated_definition" => {
            let text = node_text(content, node);
            if ROUTE_PATTERN.is_match(text) && PATH_ARG_PATTERN.is_match(text) {
                let symbol = PY_DEF_NAME_RE
                    .captures(text)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string());
                push(ranges, ChunkKind::Route, symbol, node, content);
            }
        }
        "call" => {
            let text = node_text(content, node);
            if ROUTE_PATTERN.is_match(text) && PATH_ARG_PATTERN.is_match(text) {
                push(ranges, ChunkKind::Route, None, node, content);
            }
        }
        _ => {}
    }
}

fn collect_js_ts(node: tree_sitter::Node, content: &str, ranges: &mut Vec<NodeRange>) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            let symbol = field_text(content, node, "name");
            push(ranges, ChunkKind::Function, symbol, node, content);
        }
        "class_declaration" | "interface_declaration" => {
            let symbol = field_text(content, node, "name");
            push(ranges, ChunkKind::Class, symbol, node, content);
        }
        "method_definition" => {
            let symbol = field_text(content, node, "name");
            push(ranges, ChunkKind::Method, symbol, node, content);
        }
        "variable_declarator" => {
            let is_function = node
                .child_by_field_name("value")
                .map(|value| {
                    matches!(
                        value.kind(),
                        "arrow_function" | "function" | "function_expression"
                    )
                })
                .unwrap_or(false);
            if is_function {
                let symbol = field_text(content, node, "name");
                push(ranges, ChunkKind::Function, symbol, node, content);
            }
        }
        "call_expression" => {
            let text = node_text(content, node);
            if ROUTE_PATTERN.is_match(text) && PATH_ARG_PATTERN.is_match(text) {
                push(ranges, ChunkKind::Route, route_name(text), node, content);
            }
        }
        _ => {}
    }
}

fn collect_rust(node: tree_sitter::Node, content: &str, ranges: &mut Vec<NodeRange>) {
    match node.kind() {
        "function_item" => {
            let symbol = field_text(content, node, "name");
            let in_impl = node
                .parent()
                .and_then(|p| p.parent())
                .map(|gp| gp.kind() == "impl_item")
                .unwrap_or(false);
            let kind = if in_impl {
                ChunkKind::Method
            } else {
                ChunkKind::Function
            };
            push(ranges, kind, symbol, node, content);
        }
        "struct_item" | "enum_item" | "trait_item" => {
            let symbol = field_text(content, node, "name");
            push(ranges, ChunkKind::Class, symbol, node, content);
        }
        _ => {}
    }
}

/// `app.post('/users', …)` becomes the symbol `POST /users`.
fn route_name(text: &str) -> Option<String> {
    let method = ROUTE_METHOD_RE.captures(text)?.get(1)?.as_str().to_uppercase();
    let path = ROUTE_PATH_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or("");
    Some(format!("{method} {path}").trim().to_string())
}

/// Top-level named nodes spanning 15+ lines not already covered by a
/// collected range become generic blocks, so large module-level tables and
/// constant maps remain searchable.
fn collect_major_blocks(root: tree_sitter::Node, content: &str, ranges: &mut Vec<NodeRange>) {
    let mut occupied: Vec<(usize, usize)> = ranges
        .iter()
        .map(|range| (range.start_line, range.end_line))
        .collect();

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if !child.is_named() {
            continue;
        }
        if matches!(
            child.kind(),
            "import_statement"
                | "import_from_statement"
                | "lexical_declaration"
                | "variable_declaration"
                | "use_declaration"
                | "comment"
                | "expression_statement"
        ) {
            continue;
        }
        let (start_line, end_line) = line_range(child);
        if end_line - start_line + 1 < 15 {
            continue;
        }
        if occupied
            .iter()
            .any(|&(s, e)| start_line >= s && end_line <= e)
        {
            continue;
        }
        push(ranges, ChunkKind::Block, None, child, content);
        occupied.push((start_line, end_line));
    }
}

fn dedupe_sorted(ranges: Vec<NodeRange>) -> Vec<NodeRange> {
    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<NodeRange> = ranges
        .into_iter()
        .filter(|range| {
            seen.insert((
                range.kind,
                range.symbol.clone(),
                range.start_line,
                range.end_line,
            ))
        })
        .collect();
    unique.sort_by(|a, b| {
        (a.start_line, a.end_line, a.kind.as_str())
            .cmp(&(b.start_line, b.end_line, b.kind.as_str()))
    });
    unique
}
