//! Backend collaborator contracts
//!
//! The orchestrator only ever talks to trait objects; concrete stores live
//! behind these seams.

use crate::error::Result;
use crate::search::{SearchResult, TextQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// One row from the local full-text index
#[derive(Debug, Clone, Default)]
pub struct TextRow {
    pub id: i64,
    pub provider_id: Option<String>,
    pub subject: String,
    pub snippet: String,
    pub sender: String,
    pub received_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub has_attachment: bool,
    pub folder: Option<String>,
    /// Normalized relevance in 0..=1, if the engine reports one
    pub rank: Option<f64>,
}

/// A page of full-text rows plus the total match count
#[derive(Debug, Clone, Default)]
pub struct TextSearchPage {
    pub rows: Vec<TextRow>,
    pub total: usize,
}

/// Local full-text search
#[async_trait]
pub trait TextSearchBackend: Send + Sync {
    async fn search(
        &self,
        user_id: &str,
        query: &TextQuery,
        limit: usize,
        offset: usize,
    ) -> Result<TextSearchPage>;
}

/// Embedding generation trait
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Options for a vector similarity lookup
#[derive(Debug, Clone)]
pub struct VectorSearchOptions {
    pub user_id: String,
    pub limit: usize,
    pub min_score: f32,
}

/// One vector similarity hit
#[derive(Debug, Clone, Default)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub content: String,
    /// Free-form metadata; `subject` and `snippet` are expected
    pub metadata: HashMap<String, String>,
}

/// Vector similarity search
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, vector: &[f32], options: &VectorSearchOptions) -> Result<Vec<VectorHit>>;
}

/// Opaque credential handed through to the remote provider.
///
/// Its shape (OAuth token, API key, ...) is the caller's business.
#[derive(Clone)]
pub struct Credential(Arc<str>);

impl Credential {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Remote provider search, supplied per call by the caller.
///
/// Receives the provider-syntax query string and returns results already
/// in the common shape.
#[async_trait]
pub trait RemoteSearch: Send + Sync {
    async fn search(
        &self,
        credential: Option<&Credential>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>>;
}

#[async_trait]
impl<F, Fut> RemoteSearch for F
where
    F: Fn(Option<Credential>, String, usize) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<SearchResult>>> + Send + 'static,
{
    async fn search(
        &self,
        credential: Option<&Credential>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        (self)(credential.cloned(), query.to_string(), limit).await
    }
}
