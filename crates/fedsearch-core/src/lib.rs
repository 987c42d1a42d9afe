//! Fedsearch Core Library
//!
//! Federated mail search for an assistant: one query fans out to a local
//! full-text index, a vector index and the user's mail provider, and the
//! answers come back as a single ranked list.
//!
//! # Features
//! - Rule-based query analysis (`from:`, `is:unread`, `after:2024/01/31`, ...)
//! - Intent-driven strategy planning
//! - Phased execution with per-phase deadlines and low-recall escalation
//! - Reciprocal Rank Fusion, weighted-score and dedup-only merging
//! - TTL response cache with per-user invalidation
//! - SQLite FTS5 mail index and in-memory vector store adapters

pub mod backends;
pub mod config;
pub mod error;
pub mod query;
pub mod search;

pub use backends::{
    Credential, Embedder, MemoryVectorStore, NewMessage, RemoteSearch, SqliteMailIndex,
    StoredVector, TextSearchBackend, VectorStore,
};
pub use config::{CacheConfig, FusionConfig, SearchConfig, SourceWeights};
pub use error::{Error, FedSearchError, Result};
pub use query::{analyze_query, Intent, ParsedQuery, ProviderSplitQuery, QueryAnalyzer};
pub use search::{
    MergeStrategy, SearchCache, SearchContext, SearchFilters, SearchPlan, SearchRequest,
    SearchResponse, SearchResult, SearchService, SearchServiceBuilder, SearchSource, SourceError,
    Strategy,
};

/// Default config directory name
pub const CONFIG_DIR_NAME: &str = "fedsearch";
