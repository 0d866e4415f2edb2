//! # xtrc
//!
//! A local, editor-agnostic code navigation daemon. Given a natural-language
//! question about a source repository, it returns a ranked list of jump
//! targets (file path + line range + symbol) pointing at the most relevant
//! chunks of code, backed by a persistent per-repository index.
//!
//! ## Architecture
//!
//! Two pipelines share the per-repo stores:
//!
//! ```text
//!  /index                                /query
//!     │                                     │
//!     ▼                                     ▼
//!  ┌───────────────┐                 ┌───────────────┐
//!  │ Walk + ignore │                 │ Query rewrite │ (optional LLM)
//!  └───────┬───────┘                 └───────┬───────┘
//!          ▼                                 ▼
//!  ┌───────────────┐                 ┌───────────────┐
//!  │ Diff by hash  │                 │ Embed (query) │
//!  └───────┬───────┘                 └───────┬───────┘
//!          ▼                                 ▼
//!  ┌───────────────┐                 ┌───────────────┐
//!  │ Parse + chunk │                 │  ANN search   │
//!  │  + enrich     │                 └───────┬───────┘
//!  └───────┬───────┘                         ▼
//!          ▼                         ┌───────────────┐
//!  ┌───────────────┐                 │ Hybrid score  │
//!  │ Summarize     │ (optional LLM)  │ + heuristics  │
//!  └───────┬───────┘                 └───────┬───────┘
//!          ▼                                 ▼
//!  ┌───────────────┐                 ┌───────────────┐
//!  │ Embed (docs)  │                 │ Cross-encoder │ (optional)
//!  └───────┬───────┘                 └───────┬───────┘
//!          ▼                                 ▼
//!  ┌───────────────┐                 ┌───────────────┐
//!  │ Upsert vectors│                 │  LLM rerank   │ (threshold-gated)
//!  │ commit meta   │                 │  + selection  │
//!  └───────────────┘                 └───────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration snapshot
//! - [`models`] - Chunks, payloads, scores, request/response types
//! - [`walker`] - Repository walk with gitignore/binary/size filtering
//! - [`parser`] - Tree-sitter symbol and route extraction
//! - [`chunking`] - Token-bounded chunk construction and tokenization
//! - [`intent`] - Route signals and the closed intent vocabulary
//! - [`metadata`] - Per-repo sqlite store (files, chunks, caches, meta)
//! - [`search`] - Vector collection, hybrid scorer, ranking heuristics
//! - [`llm`] - Embedding backends, LLM provider, rewrite/summarize/rerank
//! - [`indexer`] - Incremental index orchestration
//! - [`query`] - Query pipeline orchestration
//! - [`api`] - Axum handlers for `/index`, `/query`, `/status`
//! - [`state`] - Shared daemon state and per-repo locks

pub mod api;
pub mod chunking;
pub mod config;
pub mod errors;
pub mod indexer;
pub mod intent;
pub mod llm;
pub mod metadata;
pub mod models;
pub mod parser;
pub mod query;
pub mod search;
pub mod state;
pub mod walker;
