//! Search service: analyze, plan, execute, merge, cache

use super::{
    apply_recency_boost, encode_cursor, CacheKey, ResultMerger, SearchCache, SearchContext,
    SearchExecutor, SearchRequest, SearchResponse, Strategy, StrategyPlanner,
};
use crate::backends::{Credential, Embedder, RemoteSearch, TextSearchBackend, VectorStore};
use crate::config::SearchConfig;
use crate::error::Result;
use crate::query::{to_provider_query, to_provider_split, ParsedQuery, ProviderSplitQuery, QueryAnalyzer};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Builder for [`SearchService`]
#[derive(Default)]
pub struct SearchServiceBuilder {
    config: SearchConfig,
    text: Option<Arc<dyn TextSearchBackend>>,
    vector: Option<(Arc<dyn Embedder>, Arc<dyn VectorStore>)>,
    cache: Option<SearchCache>,
}

impl SearchServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn text_backend(mut self, backend: Arc<dyn TextSearchBackend>) -> Self {
        self.text = Some(backend);
        self
    }

    pub fn vector_backend(mut self, embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        self.vector = Some((embedder, store));
        self
    }

    /// Share an existing cache instead of creating one from the config
    pub fn cache(mut self, cache: SearchCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<SearchService> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let planner = StrategyPlanner::new(config.clone());

        let mut executor = SearchExecutor::new(planner.clone());
        if let Some(text) = self.text {
            executor = executor.with_text_backend(text);
        }
        if let Some((embedder, store)) = self.vector {
            executor = executor.with_vector_backend(embedder, store);
        }

        let cache = if config.cache.enabled {
            Some(self.cache.unwrap_or_else(|| SearchCache::from_config(&config.cache)))
        } else {
            None
        };

        Ok(SearchService {
            merger: ResultMerger::new(&config.fusion),
            analyzer: QueryAnalyzer::new(),
            planner,
            executor,
            cache,
            config,
        })
    }
}

/// Federated search over the local index, vector store and mail provider
pub struct SearchService {
    config: Arc<SearchConfig>,
    analyzer: QueryAnalyzer,
    planner: StrategyPlanner,
    executor: SearchExecutor,
    merger: ResultMerger,
    cache: Option<SearchCache>,
}

impl SearchService {
    pub fn builder() -> SearchServiceBuilder {
        SearchServiceBuilder::new()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&SearchCache> {
        self.cache.as_ref()
    }

    /// Run a search.
    ///
    /// Backend failures and timeouts degrade to partial results listed in
    /// `source_errors`; only an invalid plan is returned as an error.
    /// `remote` and `credential` are only used when the provider is
    /// consulted.
    pub async fn search(
        &self,
        ctx: &SearchContext,
        mut request: SearchRequest,
        remote: Option<&dyn RemoteSearch>,
        credential: Option<&Credential>,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        request.limit = self.config.effective_limit(request.limit);
        let offset = request.effective_offset();

        let cache_key = self.cache.as_ref().map(|_| CacheKey::for_request(&request));
        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_ref()) {
            if let Some(hit) = cache.get(key) {
                return Ok(hit);
            }
        }

        let mut parsed = self.analyzer.analyze(&request.query);
        if let Some(filters) = request.filters.as_ref() {
            parsed.apply_filters(filters);
        }

        let mut plan = self.planner.plan(&parsed, &request);
        let mut response = self
            .executor
            .execute(ctx, &mut plan, &request, &parsed, remote, credential)
            .await?;

        self.merger.merge(&mut response, plan.merge_strategy, request.limit);
        if matches!(request.strategy, Strategy::Balanced | Strategy::Complete) {
            apply_recency_boost(&mut response.results, self.config.fusion.recency_boost);
        }

        response.next_cursor = response
            .has_more
            .then(|| encode_cursor(offset.saturating_add(response.results.len())));
        response.took_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            user_id = %request.user_id,
            strategy = request.strategy.as_str(),
            results = response.results.len(),
            sources = ?response.sources,
            errors = response.source_errors.len(),
            escalated = response.escalated,
            elapsed_ms = response.took_ms,
            "Search complete"
        );

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key) {
            if response.is_partial() {
                tracing::debug!("Partial response, not caching");
            } else {
                cache.set(key, &response);
            }
        }

        Ok(response)
    }

    /// [`SearchService::search`] restricted to the full-text index
    pub async fn search_fast(
        &self,
        ctx: &SearchContext,
        request: SearchRequest,
        remote: Option<&dyn RemoteSearch>,
        credential: Option<&Credential>,
    ) -> Result<SearchResponse> {
        self.search(ctx, request.with_strategy(Strategy::Fast), remote, credential)
            .await
    }

    /// [`SearchService::search`] restricted to the vector index
    pub async fn search_semantic(
        &self,
        ctx: &SearchContext,
        request: SearchRequest,
        remote: Option<&dyn RemoteSearch>,
        credential: Option<&Credential>,
    ) -> Result<SearchResponse> {
        self.search(ctx, request.with_strategy(Strategy::Semantic), remote, credential)
            .await
    }

    /// [`SearchService::search`] across every backend
    pub async fn search_complete(
        &self,
        ctx: &SearchContext,
        request: SearchRequest,
        remote: Option<&dyn RemoteSearch>,
        credential: Option<&Credential>,
    ) -> Result<SearchResponse> {
        self.search(ctx, request.with_strategy(Strategy::Complete), remote, credential)
            .await
    }

    pub fn analyze_query(&self, query: &str) -> ParsedQuery {
        self.analyzer.analyze(query)
    }

    /// Provider query string that a search for `query` would send
    pub fn provider_query_preview(&self, query: &str) -> String {
        to_provider_query(&self.analyzer.analyze(query))
    }

    /// Search-text plus filter-expression form of `query`
    pub fn provider_split_preview(&self, query: &str) -> ProviderSplitQuery {
        to_provider_split(&self.analyzer.analyze(query))
    }

    /// Drop every cached response for `user_id`, e.g. after new mail arrives
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        self.cache
            .as_ref()
            .map(|cache| cache.invalidate_user(user_id))
            .unwrap_or(0)
    }

    /// Start the cache's periodic expiry sweep on the current runtime
    pub fn spawn_cache_cleanup(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.cache.cleanup_interval();
        self.cache.as_ref().map(|cache| cache.spawn_cleanup(interval))
    }
}
