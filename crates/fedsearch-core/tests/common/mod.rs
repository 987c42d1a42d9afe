//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fedsearch_core::backends::{TextRow, TextSearchPage, VectorHit, VectorSearchOptions};
use fedsearch_core::search::TextQuery;
use fedsearch_core::{Embedder, FedSearchError, Result, SearchResult, SearchSource, TextSearchBackend, VectorStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_test_writer()
        .try_init();
}

/// Full-text backend returning `matches` synthetic rows and counting calls
pub struct CountingText {
    pub matches: usize,
    pub fail: bool,
    pub delay: Duration,
    calls: AtomicUsize,
    last: Mutex<Option<(TextQuery, usize, usize)>>,
}

impl CountingText {
    pub fn new(matches: usize) -> Self {
        Self {
            matches,
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Query, limit and offset of the most recent call
    pub fn last_call(&self) -> Option<(TextQuery, usize, usize)> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextSearchBackend for CountingText {
    async fn search(
        &self,
        _user_id: &str,
        query: &TextQuery,
        limit: usize,
        offset: usize,
    ) -> Result<TextSearchPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((query.clone(), limit, offset));
        tokio::time::sleep(self.delay).await;

        if self.fail {
            return Err(FedSearchError::backend(SearchSource::Text, "connection refused"));
        }

        let end = self.matches.min(offset + limit);
        let rows = (offset..end)
            .map(|i| TextRow {
                id: i as i64 + 1,
                provider_id: Some(format!("msg-{}", i + 1)),
                subject: format!("Budget item {}", i + 1),
                sender: "alice@co.com".to_string(),
                rank: Some(1.0 / (i + 1) as f64),
                ..Default::default()
            })
            .collect();
        Ok(TextSearchPage {
            rows,
            total: self.matches,
        })
    }
}

/// Embedder with a fixed output
pub struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

/// Vector store returning preset hits and counting calls
pub struct CountingVectors {
    hits: Vec<VectorHit>,
    calls: AtomicUsize,
}

impl CountingVectors {
    /// One hit per provider id, descending scores
    pub fn with_provider_ids(ids: &[&str]) -> Self {
        let hits = ids
            .iter()
            .enumerate()
            .map(|(i, id)| VectorHit {
                id: id.to_string(),
                score: 0.9 - i as f32 * 0.1,
                content: format!("content of {}", id),
                metadata: HashMap::from([("subject".to_string(), format!("Vector {}", id))]),
            })
            .collect();
        Self {
            hits,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for CountingVectors {
    async fn search(&self, _vector: &[f32], options: &VectorSearchOptions) -> Result<Vec<VectorHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.iter().take(options.limit).cloned().collect())
    }
}

/// Provider results for the given ids
pub fn provider_results(ids: &[&str]) -> Result<Vec<SearchResult>> {
    Ok(ids
        .iter()
        .map(|id| SearchResult {
            provider_id: Some(id.to_string()),
            subject: format!("Remote {}", id),
            ..Default::default()
        })
        .collect())
}
