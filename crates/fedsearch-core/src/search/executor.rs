//! Phased execution across the search backends
//!
//! Phase 1 runs the local backends (full-text and vector) concurrently under
//! one deadline. Phase 2 runs the remote provider, either because the plan
//! selected it or because phase 1 came back with too little. A failing,
//! slow or cancelled backend never fails the search; it is recorded on the
//! response and contributes nothing.

use super::planner::{SearchPlan, StrategyPlanner};
use super::{SearchContext, SearchRequest, SearchResponse, SearchResult, SearchSource, SourceError};
use crate::backends::{
    Credential, Embedder, RemoteSearch, TextRow, TextSearchBackend, VectorHit,
    VectorSearchOptions, VectorStore,
};
use crate::error::{FedSearchError, Result};
use crate::query::ParsedQuery;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Snippet length used when a vector hit carries no `snippet` metadata
const VECTOR_SNIPPET_CHARS: usize = 200;

/// Score given to every provider result; the provider reports no relevance
const PROVIDER_SCORE: f64 = 1.0;

/// Outcome of one backend call
#[derive(Debug)]
pub struct PartialResult {
    pub source: SearchSource,
    pub results: Vec<SearchResult>,
    /// Backend-reported match count, may exceed `results.len()`
    pub total: usize,
    pub error: Option<FedSearchError>,
    pub elapsed: Duration,
}

impl PartialResult {
    fn ok(source: SearchSource, results: Vec<SearchResult>, total: usize, elapsed: Duration) -> Self {
        Self {
            source,
            total: total.max(results.len()),
            results,
            error: None,
            elapsed,
        }
    }

    fn failed(source: SearchSource, error: FedSearchError, elapsed: Duration) -> Self {
        Self {
            source,
            results: Vec::new(),
            total: 0,
            error: Some(error),
            elapsed,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs a [`SearchPlan`] against the configured backends
pub struct SearchExecutor {
    text: Option<Arc<dyn TextSearchBackend>>,
    embedder: Option<Arc<dyn Embedder>>,
    vectors: Option<Arc<dyn VectorStore>>,
    planner: StrategyPlanner,
}

impl SearchExecutor {
    pub fn new(planner: StrategyPlanner) -> Self {
        Self {
            text: None,
            embedder: None,
            vectors: None,
            planner,
        }
    }

    pub fn with_text_backend(mut self, backend: Arc<dyn TextSearchBackend>) -> Self {
        self.text = Some(backend);
        self
    }

    pub fn with_vector_backend(
        mut self,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.vectors = Some(store);
        self
    }

    pub fn has_text_backend(&self) -> bool {
        self.text.is_some()
    }

    pub fn has_vector_backend(&self) -> bool {
        self.embedder.is_some() && self.vectors.is_some()
    }

    /// Execute `plan`, possibly escalating it to the provider.
    ///
    /// `request.limit` must already be clamped. Only an invalid plan is
    /// returned as an error.
    pub async fn execute(
        &self,
        ctx: &SearchContext,
        plan: &mut SearchPlan,
        request: &SearchRequest,
        parsed: &ParsedQuery,
        remote: Option<&dyn RemoteSearch>,
        credential: Option<&Credential>,
    ) -> Result<SearchResponse> {
        plan.validate()?;

        let started = Instant::now();
        let limit = request.limit;
        let mut response = SearchResponse::empty(request.strategy, parsed.intent);

        // Phase 1: local backends, awaited together
        let phase1_deadline = ctx.phase_deadline(Duration::from_millis(plan.phase1_timeout_ms));
        let plan_view: &SearchPlan = plan;
        let (text, vector) = async {
            tokio::join!(
                self.run_text(ctx, plan_view, request, phase1_deadline),
                self.run_vector(ctx, plan_view, request, phase1_deadline),
            )
        }
        .instrument(tracing::info_span!("search.phase1", user_id = %request.user_id))
        .await;

        for partial in [text, vector].into_iter().flatten() {
            record(&mut response, partial);
        }
        response.phase1_ms = millis(started.elapsed());

        tracing::debug!(
            text = response.db_count,
            vector = response.vector_count,
            elapsed_ms = response.phase1_ms,
            "Phase 1 complete"
        );

        if remote.is_some()
            && self
                .planner
                .should_escalate(plan, response.db_count, response.vector_count, limit)
            && self.planner.escalate(plan, parsed)
        {
            response.escalated = true;
            tracing::info!(
                text = response.db_count,
                vector = response.vector_count,
                limit,
                "Low local recall, escalating to provider"
            );
        }

        // Phase 2: remote provider
        if plan.use_provider {
            match (remote, plan.provider_query.as_ref()) {
                (Some(remote), Some(query)) => {
                    let phase2_started = Instant::now();
                    let deadline =
                        ctx.phase_deadline(Duration::from_millis(plan.phase2_timeout_ms));
                    let partial = self
                        .run_provider(ctx, &query.query, limit, remote, credential, deadline)
                        .instrument(tracing::info_span!(
                            "search.phase2",
                            user_id = %request.user_id,
                            escalated = response.escalated
                        ))
                        .await;
                    record(&mut response, partial);
                    response.phase2_ms = millis(phase2_started.elapsed());
                }
                _ => tracing::debug!("Provider selected but no remote search supplied, skipping"),
            }
        }

        response.has_more = response.results.len() >= limit;
        response.took_ms = millis(started.elapsed());

        tracing::debug!(
            results = response.results.len(),
            errors = response.source_errors.len(),
            elapsed_ms = response.took_ms,
            "Execution complete"
        );

        Ok(response)
    }

    async fn run_text(
        &self,
        ctx: &SearchContext,
        plan: &SearchPlan,
        request: &SearchRequest,
        deadline: Instant,
    ) -> Option<PartialResult> {
        if !plan.use_text {
            return None;
        }
        let query = plan.text_query.as_ref()?;
        let Some(backend) = self.text.as_ref() else {
            tracing::debug!("No full-text backend configured, skipping");
            return None;
        };

        let started = Instant::now();
        let call = backend.search(&request.user_id, query, request.limit, request.effective_offset());
        let partial = match bounded(ctx, SearchSource::Text, deadline, started, call).await {
            Ok(page) => {
                let results = page.rows.into_iter().map(text_row_to_result).collect();
                PartialResult::ok(SearchSource::Text, results, page.total, started.elapsed())
            }
            Err(e) => PartialResult::failed(SearchSource::Text, e, started.elapsed()),
        };
        Some(partial)
    }

    async fn run_vector(
        &self,
        ctx: &SearchContext,
        plan: &SearchPlan,
        request: &SearchRequest,
        deadline: Instant,
    ) -> Option<PartialResult> {
        if !plan.use_vector {
            return None;
        }
        let query = plan.vector_query.as_ref()?;
        let (Some(embedder), Some(store)) = (self.embedder.as_ref(), self.vectors.as_ref()) else {
            tracing::debug!("No vector backend configured, skipping");
            return None;
        };

        let started = Instant::now();
        let call = async {
            let vector = embedder.embed(&query.text).await?;
            let options = VectorSearchOptions {
                user_id: request.user_id.clone(),
                limit: request.limit,
                min_score: query.min_score,
            };
            store.search(&vector, &options).await
        };
        let partial = match bounded(ctx, SearchSource::Vector, deadline, started, call).await {
            Ok(hits) => {
                let results: Vec<SearchResult> = hits.into_iter().map(vector_hit_to_result).collect();
                let total = results.len();
                PartialResult::ok(SearchSource::Vector, results, total, started.elapsed())
            }
            Err(e) => PartialResult::failed(SearchSource::Vector, e, started.elapsed()),
        };
        Some(partial)
    }

    async fn run_provider(
        &self,
        ctx: &SearchContext,
        query: &str,
        limit: usize,
        remote: &dyn RemoteSearch,
        credential: Option<&Credential>,
        deadline: Instant,
    ) -> PartialResult {
        let started = Instant::now();
        if ctx.is_cancelled() {
            return PartialResult::failed(SearchSource::Provider, FedSearchError::Cancelled, started.elapsed());
        }

        let call = remote.search(credential, query, limit);
        match bounded(ctx, SearchSource::Provider, deadline, started, call).await {
            Ok(mut results) => {
                for r in &mut results {
                    r.source = SearchSource::Provider;
                    r.score = PROVIDER_SCORE;
                }
                let total = results.len();
                PartialResult::ok(SearchSource::Provider, results, total, started.elapsed())
            }
            Err(e) => PartialResult::failed(SearchSource::Provider, e, started.elapsed()),
        }
    }
}

/// Run a backend call until it finishes, the deadline passes or the caller
/// cancels, whichever comes first.
async fn bounded<T, F>(
    ctx: &SearchContext,
    source: SearchSource,
    deadline: Instant,
    started: Instant,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancellation_token().cancelled() => Err(FedSearchError::Cancelled),
        outcome = tokio::time::timeout_at(deadline, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(FedSearchError::Timeout {
                backend: source,
                elapsed_ms: millis(started.elapsed()),
            }),
        },
    }
}

fn record(response: &mut SearchResponse, partial: PartialResult) {
    let source = partial.source;
    let count = partial.results.len();

    if let Some(err) = partial.error {
        tracing::warn!(
            source = %source,
            elapsed_ms = millis(partial.elapsed),
            error = %err,
            "Backend failed, continuing without it"
        );
        response.source_errors.push(SourceError {
            source,
            message: err.to_string(),
        });
        return;
    }

    match source {
        SearchSource::Text => {
            response.db_count = count;
            response.total = response.total.max(partial.total);
        }
        SearchSource::Vector => response.vector_count = count,
        SearchSource::Provider => response.provider_count = count,
    }
    if count > 0 {
        response.sources.push(source);
    }
    response.results.extend(partial.results);
}

fn text_row_to_result(row: TextRow) -> SearchResult {
    let score = row.rank.unwrap_or(1.0);
    SearchResult {
        source: SearchSource::Text,
        id: row.id,
        provider_id: row.provider_id,
        subject: row.subject,
        snippet: row.snippet,
        from: row.sender,
        date: row.received_at,
        folder: row.folder,
        is_read: row.is_read,
        has_attachment: row.has_attachment,
        score,
        text_score: Some(score),
        vector_score: None,
    }
}

/// Map a vector hit onto the common shape.
///
/// A numeric hit id is the internal message id; anything else is treated as
/// a provider id unless metadata names one explicitly.
fn vector_hit_to_result(hit: VectorHit) -> SearchResult {
    let mut metadata = hit.metadata;
    let internal_id = hit.id.parse::<i64>().ok();
    let provider_id = metadata
        .remove("provider_id")
        .or_else(|| internal_id.is_none().then(|| hit.id.clone()));
    let snippet = metadata
        .remove("snippet")
        .unwrap_or_else(|| hit.content.chars().take(VECTOR_SNIPPET_CHARS).collect());
    let date = metadata
        .get("date")
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc));
    let score = f64::from(hit.score);

    SearchResult {
        source: SearchSource::Vector,
        id: internal_id.unwrap_or(0),
        provider_id,
        subject: metadata.remove("subject").unwrap_or_default(),
        snippet,
        from: metadata.remove("from").unwrap_or_default(),
        date,
        folder: metadata.remove("folder"),
        score,
        vector_score: Some(score),
        ..Default::default()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
