//! Federated search engine module
//!
//! Provides:
//! - Strategy planning across the full-text, vector and provider backends
//! - Phased execution with per-phase deadlines
//! - Result fusion (RRF, weighted score, dedup-only)
//! - A TTL response cache

mod cache;
mod context;
mod executor;
mod merger;
mod planner;
mod service;

pub use cache::{CacheKey, CacheStats, SearchCache};
pub use context::SearchContext;
pub use executor::{PartialResult, SearchExecutor};
pub use merger::{apply_recency_boost, ResultMerger};
pub use planner::{MergeStrategy, ProviderQuery, SearchPlan, StrategyPlanner, TextQuery, VectorQuery};
pub use service::{SearchService, SearchServiceBuilder};

use crate::query::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Full-text index only
    Fast,
    /// Vector index only
    Semantic,
    /// Remote provider only
    Provider,
    /// All three backends, RRF fusion
    Complete,
    /// Backends chosen from the query intent
    #[default]
    Balanced,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Semantic => "semantic",
            Self::Provider => "provider",
            Self::Complete => "complete",
            Self::Balanced => "balanced",
        }
    }

    /// Parse from a string (case-insensitive), unknown names map to `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "semantic" => Some(Self::Semantic),
            "provider" => Some(Self::Provider),
            "complete" => Some(Self::Complete),
            "balanced" | "" => Some(Self::Balanced),
            _ => None,
        }
    }
}

/// Backend a result came from
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    /// Local full-text index
    #[default]
    Text,
    /// Vector similarity index
    Vector,
    /// Remote mail provider API
    Provider,
}

impl SearchSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Vector => "vector",
            Self::Provider => "provider",
        }
    }
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured filters supplied by the caller, distinct from the ones
/// parsed out of the query text. When both are present these win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub folder: Option<String>,
    pub has_attachment: Option<bool>,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A search request as issued by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Requester identity (already authenticated)
    pub user_id: String,
    /// Restrict to one connected mail account
    pub connection_id: Option<String>,
    /// Raw query text, may contain operators like `from:` or `is:unread`
    pub query: String,
    #[serde(default)]
    pub strategy: Strategy,
    /// Maximum results; zero means the configured default
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Opaque pagination cursor from a previous response, overrides `offset`
    pub cursor: Option<String>,
    pub filters: Option<SearchFilters>,
}

impl SearchRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Offset to use, preferring a decodable cursor over the raw offset
    pub fn effective_offset(&self) -> usize {
        self.cursor
            .as_deref()
            .and_then(decode_cursor)
            .unwrap_or(self.offset)
    }
}

pub(crate) fn encode_cursor(offset: usize) -> String {
    offset.to_string()
}

pub(crate) fn decode_cursor(cursor: &str) -> Option<usize> {
    cursor.trim().parse().ok()
}

/// A single search hit in the common shape shared by all backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub source: SearchSource,
    /// Internal message id (0 when only the provider id is known)
    pub id: i64,
    /// Provider message id, the preferred identity when present
    pub provider_id: Option<String>,
    pub subject: String,
    pub snippet: String,
    pub from: String,
    pub date: Option<DateTime<Utc>>,
    pub folder: Option<String>,
    pub is_read: bool,
    pub has_attachment: bool,
    /// Backend-native score before merging, fused score after
    pub score: f64,
    pub text_score: Option<f64>,
    pub vector_score: Option<f64>,
}

/// Identity used for deduplication across sources
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Provider(String),
    Internal(i64),
}

impl SearchResult {
    pub fn identity(&self) -> ResultKey {
        match self.provider_id.as_deref() {
            Some(pid) if !pid.is_empty() => ResultKey::Provider(pid.to_string()),
            _ => ResultKey::Internal(self.id),
        }
    }
}

/// A backend that contributed nothing because it failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: SearchSource,
    pub message: String,
}

/// Final, ranked search response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub strategy: Strategy,
    pub intent: Intent,
    /// Backends that returned at least one result
    pub sources: Vec<SearchSource>,
    pub source_errors: Vec<SourceError>,
    pub db_count: usize,
    pub vector_count: usize,
    pub provider_count: usize,
    /// Phase 2 ran because local recall was too low
    pub escalated: bool,
    pub phase1_ms: u64,
    pub phase2_ms: u64,
    pub took_ms: u64,
}

impl SearchResponse {
    /// Empty response echoing strategy and intent
    pub fn empty(strategy: Strategy, intent: Intent) -> Self {
        Self {
            strategy,
            intent,
            ..Default::default()
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.source_errors.is_empty()
    }
}
