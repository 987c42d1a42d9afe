//! In-memory vector store with brute-force cosine similarity

use super::traits::{VectorHit, VectorSearchOptions, VectorStore};
use crate::error::{FedSearchError, Result};
use crate::search::SearchSource;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

/// An embedded message
#[derive(Debug, Clone, Default)]
pub struct StoredVector {
    pub user_id: String,
    /// Internal message id (numeric) or provider id
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: HashMap<String, String>,
}

impl StoredVector {
    pub fn new(user_id: impl Into<String>, id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            user_id: user_id.into(),
            id: id.into(),
            vector,
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Vector store for small corpora and tests
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    items: RwLock<Vec<StoredVector>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vector, replacing any previous one with the same user and id
    pub fn insert(&self, item: StoredVector) -> Result<()> {
        let mut items = self.write()?;
        items.retain(|v| !(v.user_id == item.user_id && v.id == item.id));
        items.push(item);
        Ok(())
    }

    pub fn remove(&self, user_id: &str, id: &str) -> Result<bool> {
        let mut items = self.write()?;
        let before = items.len();
        items.retain(|v| !(v.user_id == user_id && v.id == id));
        Ok(items.len() < before)
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<StoredVector>>> {
        self.items
            .write()
            .map_err(|_| FedSearchError::backend(SearchSource::Vector, "vector store lock poisoned"))
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn search(&self, vector: &[f32], options: &VectorSearchOptions) -> Result<Vec<VectorHit>> {
        let items = self
            .items
            .read()
            .map_err(|_| FedSearchError::backend(SearchSource::Vector, "vector store lock poisoned"))?;

        let mut hits: Vec<VectorHit> = items
            .iter()
            .filter(|item| item.user_id == options.user_id)
            .filter_map(|item| {
                let score = cosine_similarity(vector, &item.vector);
                (score >= options.min_score).then(|| VectorHit {
                    id: item.id.clone(),
                    score,
                    content: item.content.clone(),
                    metadata: item.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(options.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    fn store() -> MemoryVectorStore {
        let store = MemoryVectorStore::new();
        store
            .insert(StoredVector::new("u1", "1", vec![1.0, 0.0]).with_metadata("subject", "exact"))
            .unwrap();
        store
            .insert(StoredVector::new("u1", "2", vec![0.8, 0.6]).with_metadata("subject", "close"))
            .unwrap();
        store.insert(StoredVector::new("u1", "3", vec![0.0, 1.0])).unwrap();
        store.insert(StoredVector::new("u2", "4", vec![1.0, 0.0])).unwrap();
        store
    }

    fn options(user: &str, limit: usize, min_score: f32) -> VectorSearchOptions {
        VectorSearchOptions {
            user_id: user.to_string(),
            limit,
            min_score,
        }
    }

    #[tokio::test]
    async fn test_search_ranked_and_filtered() {
        let hits = store().search(&[1.0, 0.0], &options("u1", 10, 0.3)).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(hits[1].metadata.get("subject").map(String::as_str), Some("close"));
        assert!((hits[1].score - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let hits = store().search(&[1.0, 0.0], &options("u1", 1, 0.0)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
    }

    #[test]
    fn test_insert_replaces_and_remove() {
        let store = store();
        assert_eq!(store.len(), 4);
        store.insert(StoredVector::new("u1", "1", vec![0.0, 1.0])).unwrap();
        assert_eq!(store.len(), 4);
        assert!(store.remove("u2", "4").unwrap());
        assert!(!store.remove("u2", "4").unwrap());
        assert_eq!(store.len(), 3);
    }
}
