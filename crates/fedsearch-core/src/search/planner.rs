//! Strategy planning: which backends run, with which queries and deadlines

use super::{SearchRequest, Strategy};
use crate::config::SearchConfig;
use crate::error::{FedSearchError, Result};
use crate::query::{
    build_predicates, to_embedding_text, to_fts_query, to_provider_query, Intent, ParsedQuery,
    Predicate,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Complexity at which the provider is consulted regardless of intent
const PROVIDER_COMPLEXITY_THRESHOLD: u8 = 3;

/// How per-backend lists are fused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Reciprocal Rank Fusion
    #[default]
    Rrf,
    /// Per-source max-normalized score times a source weight
    WeightedScore,
    /// Dedup and sort by date
    DedupOnly,
}

/// Full-text backend query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextQuery {
    /// FTS expression; may be empty when only predicates apply
    pub text: String,
    pub predicates: Vec<Predicate>,
    pub connection_id: Option<String>,
}

impl TextQuery {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.predicates.is_empty()
    }
}

/// Vector backend query
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub text: String,
    pub min_score: f32,
}

/// Remote provider query
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderQuery {
    pub query: String,
}

/// The outcome of planning one request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub use_text: bool,
    pub use_vector: bool,
    pub use_provider: bool,
    pub text_query: Option<TextQuery>,
    pub vector_query: Option<VectorQuery>,
    pub provider_query: Option<ProviderQuery>,
    pub phase1_timeout_ms: u64,
    pub phase2_timeout_ms: u64,
    pub merge_strategy: MergeStrategy,
    /// Phase 2 may be enabled after phase 1 if local recall is low.
    /// Set for every plan; callers may clear it to keep a search local.
    pub allow_escalation: bool,
    /// Set once escalation has enabled the provider
    pub escalated: bool,
}

impl SearchPlan {
    /// Whether any backend at all will run
    pub fn has_backends(&self) -> bool {
        self.use_text || self.use_vector || self.use_provider
    }

    /// Every enabled backend must carry a query
    pub fn validate(&self) -> Result<()> {
        if self.use_text && self.text_query.is_none() {
            return Err(FedSearchError::InvalidPlan(
                "full-text backend enabled without a query".to_string(),
            ));
        }
        if self.use_vector && self.vector_query.is_none() {
            return Err(FedSearchError::InvalidPlan(
                "vector backend enabled without a query".to_string(),
            ));
        }
        if self.use_provider && self.provider_query.is_none() {
            return Err(FedSearchError::InvalidPlan(
                "provider backend enabled without a query".to_string(),
            ));
        }
        if self.phase1_timeout_ms == 0 || self.phase2_timeout_ms == 0 {
            return Err(FedSearchError::InvalidPlan(
                "phase timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decides backends, queries, deadlines and fusion for a request
#[derive(Debug, Clone)]
pub struct StrategyPlanner {
    config: Arc<SearchConfig>,
}

impl StrategyPlanner {
    pub fn new(config: Arc<SearchConfig>) -> Self {
        Self { config }
    }

    pub fn plan(&self, parsed: &ParsedQuery, request: &SearchRequest) -> SearchPlan {
        let (text, vector, provider) = match request.strategy {
            Strategy::Fast => (true, false, false),
            Strategy::Semantic => (false, true, false),
            Strategy::Provider => (false, false, true),
            Strategy::Complete => (true, true, true),
            Strategy::Balanced => {
                let (text, vector, provider) = match parsed.intent {
                    Intent::Keyword => (true, false, false),
                    Intent::Semantic => (true, true, false),
                    Intent::Structured => (true, false, true),
                    Intent::Hybrid => (true, true, false),
                };
                let force_provider = parsed.complexity >= PROVIDER_COMPLEXITY_THRESHOLD;
                (text, vector, provider || force_provider)
            }
        };

        let merge_strategy = match request.strategy {
            Strategy::Complete | Strategy::Balanced => MergeStrategy::Rrf,
            Strategy::Fast | Strategy::Semantic | Strategy::Provider => MergeStrategy::DedupOnly,
        };

        let text_query = if text {
            Some(self.text_query(parsed, request)).filter(|q| !q.is_empty())
        } else {
            None
        };
        let vector_query = if vector {
            self.vector_query(parsed)
        } else {
            None
        };
        let provider_query = if provider {
            Self::provider_query(parsed)
        } else {
            None
        };

        let plan = SearchPlan {
            use_text: text_query.is_some(),
            use_vector: vector_query.is_some(),
            use_provider: provider_query.is_some(),
            text_query,
            vector_query,
            provider_query,
            phase1_timeout_ms: self.config.phase1_timeout_ms,
            phase2_timeout_ms: self.config.phase2_timeout_ms,
            merge_strategy,
            allow_escalation: true,
            escalated: false,
        };

        tracing::info!(
            strategy = request.strategy.as_str(),
            intent = ?parsed.intent,
            complexity = parsed.complexity,
            text = plan.use_text,
            vector = plan.use_vector,
            provider = plan.use_provider,
            merge = ?plan.merge_strategy,
            "Planned search"
        );

        plan
    }

    fn text_query(&self, parsed: &ParsedQuery, request: &SearchRequest) -> TextQuery {
        TextQuery {
            text: to_fts_query(parsed),
            predicates: build_predicates(parsed, request.filters.as_ref()),
            connection_id: request.connection_id.clone(),
        }
    }

    fn vector_query(&self, parsed: &ParsedQuery) -> Option<VectorQuery> {
        let text = to_embedding_text(parsed);
        if text.is_empty() {
            return None;
        }
        Some(VectorQuery {
            text: text.to_string(),
            min_score: self.config.vector_min_score,
        })
    }

    fn provider_query(parsed: &ParsedQuery) -> Option<ProviderQuery> {
        let query = to_provider_query(parsed);
        (!query.is_empty()).then_some(ProviderQuery { query })
    }

    /// Whether phase-1 recall is low enough to warrant the provider
    pub fn should_escalate(
        &self,
        plan: &SearchPlan,
        text_count: usize,
        vector_count: usize,
        limit: usize,
    ) -> bool {
        plan.allow_escalation && !plan.use_provider && text_count + vector_count < limit / 2
    }

    /// Enable the provider with a freshly built query. Returns false when
    /// there is nothing to ask the provider for.
    pub fn escalate(&self, plan: &mut SearchPlan, parsed: &ParsedQuery) -> bool {
        match Self::provider_query(parsed) {
            Some(query) => {
                plan.provider_query = Some(query);
                plan.use_provider = true;
                plan.escalated = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::analyze_query;

    fn planner() -> StrategyPlanner {
        StrategyPlanner::new(Arc::new(SearchConfig::default()))
    }

    fn plan_for(query: &str, strategy: Strategy) -> SearchPlan {
        let parsed = analyze_query(query);
        let request = SearchRequest::new("u1", query).with_strategy(strategy);
        planner().plan(&parsed, &request)
    }

    fn backends(plan: &SearchPlan) -> (bool, bool, bool) {
        (plan.use_text, plan.use_vector, plan.use_provider)
    }

    #[test]
    fn test_fixed_strategies() {
        assert_eq!(backends(&plan_for("invoice", Strategy::Fast)), (true, false, false));
        assert_eq!(backends(&plan_for("invoice", Strategy::Semantic)), (false, true, false));
        assert_eq!(backends(&plan_for("invoice", Strategy::Provider)), (false, false, true));
        assert_eq!(backends(&plan_for("invoice", Strategy::Complete)), (true, true, true));
    }

    #[test]
    fn test_merge_strategy_by_strategy() {
        assert_eq!(plan_for("invoice", Strategy::Fast).merge_strategy, MergeStrategy::DedupOnly);
        assert_eq!(plan_for("invoice", Strategy::Provider).merge_strategy, MergeStrategy::DedupOnly);
        assert_eq!(plan_for("invoice", Strategy::Complete).merge_strategy, MergeStrategy::Rrf);
        assert_eq!(plan_for("invoice", Strategy::Balanced).merge_strategy, MergeStrategy::Rrf);
    }

    #[test]
    fn test_balanced_by_intent() {
        // Keyword
        assert_eq!(backends(&plan_for("invoice", Strategy::Balanced)), (true, false, false));
        // Semantic
        assert_eq!(
            backends(&plan_for("notes about the offsite", Strategy::Balanced)),
            (true, true, false)
        );
        // Structured
        assert_eq!(
            backends(&plan_for("from:alice budget", Strategy::Balanced)),
            (true, false, true)
        );
        // Hybrid, complexity 3 forces the provider
        assert_eq!(
            backends(&plan_for("from:carol notes about the offsite", Strategy::Balanced)),
            (true, true, true)
        );
    }

    #[test]
    fn test_hybrid_low_complexity_skips_provider() {
        let plan = plan_for("is:unread emails regarding", Strategy::Balanced);
        assert_eq!(backends(&plan), (true, true, false));
    }

    #[test]
    fn test_high_complexity_forces_provider() {
        // three keywords plus a recipient: complexity 3
        let plan = plan_for("to:dana quarterly planning offsite", Strategy::Balanced);
        assert!(plan.use_provider);
    }

    #[test]
    fn test_default_timeouts() {
        let plan = plan_for("invoice", Strategy::Balanced);
        assert_eq!(plan.phase1_timeout_ms, 100);
        assert_eq!(plan.phase2_timeout_ms, 2000);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_queries_are_projected() {
        let plan = plan_for("from:alice budget review", Strategy::Complete);
        let text = plan.text_query.as_ref().unwrap();
        assert_eq!(text.text, "\"budget\" AND \"review\"");
        assert_eq!(text.predicates.len(), 1);
        assert_eq!(plan.vector_query.as_ref().unwrap().text, "budget review");
        assert_eq!(
            plan.provider_query.as_ref().unwrap().query,
            "budget review from:alice"
        );
    }

    #[test]
    fn test_empty_query_plans_nothing() {
        let plan = plan_for("", Strategy::Complete);
        assert!(!plan.has_backends());
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_filter_only_query_still_runs_text() {
        let plan = plan_for("has:attachment", Strategy::Fast);
        assert!(plan.use_text);
        assert_eq!(plan.text_query.as_ref().unwrap().text, "");
    }

    #[test]
    fn test_escalation_rule() {
        let parsed = analyze_query("invoice");
        let request = SearchRequest::new("u1", "invoice").with_limit(20);
        let p = planner();
        let mut plan = p.plan(&parsed, &request);
        assert!(!plan.use_provider);

        assert!(p.should_escalate(&plan, 9, 0, 20));
        assert!(!p.should_escalate(&plan, 6, 4, 20));

        assert!(p.escalate(&mut plan, &parsed));
        assert!(plan.use_provider && plan.escalated);
        assert_eq!(plan.provider_query.as_ref().unwrap().query, "invoice");
        assert!(!p.should_escalate(&plan, 0, 0, 20));
    }

    #[test]
    fn test_local_only_strategies_may_escalate() {
        let parsed = analyze_query("invoice");
        let p = planner();
        for strategy in [Strategy::Fast, Strategy::Semantic, Strategy::Balanced] {
            let request = SearchRequest::new("u1", "invoice").with_strategy(strategy);
            let plan = p.plan(&parsed, &request);
            assert!(p.should_escalate(&plan, 3, 0, 20), "{:?}", strategy);
        }
    }

    #[test]
    fn test_no_escalation_when_provider_already_planned() {
        let parsed = analyze_query("invoice");
        let p = planner();
        for strategy in [Strategy::Provider, Strategy::Complete] {
            let request = SearchRequest::new("u1", "invoice").with_strategy(strategy);
            let plan = p.plan(&parsed, &request);
            assert!(!p.should_escalate(&plan, 0, 0, 20), "{:?}", strategy);
        }
    }

    #[test]
    fn test_cleared_escalation_flag_keeps_search_local() {
        let parsed = analyze_query("invoice");
        let request = SearchRequest::new("u1", "invoice").with_strategy(Strategy::Fast);
        let p = planner();
        let mut plan = p.plan(&parsed, &request);
        plan.allow_escalation = false;
        assert!(!p.should_escalate(&plan, 0, 0, 20));
    }

    #[test]
    fn test_validate_rejects_inconsistent_plan() {
        let mut plan = plan_for("invoice", Strategy::Fast);
        plan.use_vector = true;
        assert!(matches!(plan.validate(), Err(FedSearchError::InvalidPlan(_))));
    }
}
