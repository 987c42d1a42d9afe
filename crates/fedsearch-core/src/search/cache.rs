//! TTL cache of complete search responses

use super::{SearchRequest, SearchResponse};
use crate::config::CacheConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Cache key: the requester plus a SHA-256 fingerprint of the request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    user_id: String,
    fingerprint: String,
}

impl CacheKey {
    /// Key over requester, connection, raw query, strategy, limit, effective
    /// offset and every explicit filter. `request.limit` should already be
    /// clamped so equivalent requests share a key.
    pub fn for_request(request: &SearchRequest) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            request.user_id.as_str(),
            request.connection_id.as_deref().unwrap_or(""),
            request.query.as_str(),
            request.strategy.as_str(),
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update((request.limit as u64).to_le_bytes());
        hasher.update((request.effective_offset() as u64).to_le_bytes());

        if let Some(filters) = request.filters.as_ref().filter(|f| !f.is_empty()) {
            if let Ok(json) = serde_json::to_vec(filters) {
                hasher.update(&json);
            }
        }

        Self {
            user_id: request.user_id.clone(),
            fingerprint: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct CacheEntry {
    response: SearchResponse,
    expires_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    by_user: HashMap<String, HashSet<CacheKey>>,
}

impl CacheState {
    fn remove(&mut self, key: &CacheKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if let Some(keys) = self.by_user.get_mut(&key.user_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_user.remove(&key.user_id);
            }
        }
        removed
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Make room for one more entry
    fn evict_for_insert(&mut self, max_entries: usize, now: Instant) {
        if self.entries.len() < max_entries {
            return;
        }
        self.purge_expired(now);
        if self.entries.len() < max_entries {
            return;
        }
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.expires_at)
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.remove(&key);
        }
    }
}

struct CacheInner {
    state: RwLock<CacheState>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheInner {
    fn purge_expired(&self) -> usize {
        match self.state.write() {
            Ok(mut state) => state.purge_expired(Instant::now()),
            Err(_) => 0,
        }
    }
}

enum Lookup {
    Hit(SearchResponse),
    Expired,
    Missing,
}

/// Shared response cache.
///
/// Cheap to clone; clones share entries. A poisoned lock degrades to
/// misses and dropped writes.
#[derive(Clone)]
pub struct SearchCache {
    inner: Arc<CacheInner>,
}

impl SearchCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: RwLock::new(CacheState::default()),
                ttl,
                max_entries,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.max_entries)
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Stored copy of the response, if present and not expired.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<SearchResponse> {
        let now = Instant::now();
        let lookup = match self.inner.state.read() {
            Ok(state) => match state.entries.get(key) {
                Some(entry) if now < entry.expires_at => Lookup::Hit(entry.response.clone()),
                Some(_) => Lookup::Expired,
                None => Lookup::Missing,
            },
            Err(_) => Lookup::Missing,
        };

        match lookup {
            Lookup::Hit(response) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(user_id = %key.user_id, "Search cache hit");
                Some(response)
            }
            Lookup::Expired => {
                if let Ok(mut state) = self.inner.state.write() {
                    // another writer may have refreshed it in between
                    let still_expired = state
                        .entries
                        .get(key)
                        .is_some_and(|e| e.expires_at <= Instant::now());
                    if still_expired {
                        state.remove(key);
                    }
                }
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(user_id = %key.user_id, "Search cache entry expired");
                None
            }
            Lookup::Missing => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a frozen copy of `response` for the configured TTL
    pub fn set(&self, key: CacheKey, response: &SearchResponse) {
        if self.inner.max_entries == 0 {
            return;
        }
        let now = Instant::now();
        let Ok(mut state) = self.inner.state.write() else {
            return;
        };

        if !state.entries.contains_key(&key) {
            state.evict_for_insert(self.inner.max_entries, now);
        }
        state
            .by_user
            .entry(key.user_id.clone())
            .or_default()
            .insert(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                response: response.clone(),
                expires_at: now + self.inner.ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        match self.inner.state.write() {
            Ok(mut state) => state.remove(key),
            Err(_) => false,
        }
    }

    /// Drop every entry belonging to `user_id`, returning how many were removed
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        let Ok(mut state) = self.inner.state.write() else {
            return 0;
        };
        let keys = state.by_user.remove(user_id).unwrap_or_default();
        let removed = keys
            .iter()
            .filter(|key| state.entries.remove(*key).is_some())
            .count();
        tracing::debug!(user_id, removed, "Invalidated cached searches");
        removed
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.inner.state.write() {
            state.entries.clear();
            state.by_user.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .state
            .read()
            .map(|state| state.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Start the periodic expiry sweep.
    ///
    /// The task holds only a weak reference and exits once every clone of
    /// the cache has been dropped.
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let purged = inner.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired search cache entries");
                }
            }
        })
    }
}
