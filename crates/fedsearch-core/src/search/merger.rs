//! Result fusion across backends

use super::planner::MergeStrategy;
use super::{ResultKey, SearchResponse, SearchResult, SearchSource};
use crate::config::{FusionConfig, SourceWeights};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Recency decay scale in days
const RECENCY_HALF_SCALE_DAYS: f64 = 30.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Deduplicates and fuses per-backend lists into one ranked list
#[derive(Debug, Clone)]
pub struct ResultMerger {
    rrf_k: f64,
    missing_rank: usize,
    weights: SourceWeights,
}

impl Default for ResultMerger {
    fn default() -> Self {
        Self::new(&FusionConfig::default())
    }
}

impl ResultMerger {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            rrf_k: config.rrf_k,
            missing_rank: config.rrf_missing_rank,
            weights: config.weights,
        }
    }

    /// Dedup, fuse, sort and truncate `response.results` in place
    pub fn merge(&self, response: &mut SearchResponse, strategy: MergeStrategy, limit: usize) {
        let raw = std::mem::take(&mut response.results);
        let candidates = raw.len();

        let mut results = match strategy {
            MergeStrategy::Rrf => self.rrf(&raw, dedup(&raw)),
            MergeStrategy::WeightedScore => self.weighted(&raw, dedup(&raw)),
            MergeStrategy::DedupOnly => {
                let mut results = dedup(&raw);
                results.sort_by(|a, b| b.date.cmp(&a.date));
                results
            }
        };

        response.total = response.total.max(results.len());
        if results.len() > limit {
            results.truncate(limit);
            response.has_more = true;
        }

        tracing::debug!(
            strategy = ?strategy,
            candidates,
            kept = results.len(),
            "Merged results"
        );

        response.results = results;
    }

    /// Reciprocal Rank Fusion over the per-source lists.
    ///
    /// Ranks come from each source's own list ordered by native score, so an
    /// item found by several backends is credited for every one of them even
    /// though only its first occurrence survives dedup.
    fn rrf(&self, raw: &[SearchResult], mut merged: Vec<SearchResult>) -> Vec<SearchResult> {
        let ranks = source_ranks(raw);

        for result in &mut merged {
            let key = result.identity();
            result.score = ranks
                .values()
                .map(|by_key| {
                    let rank = by_key.get(&key).copied().unwrap_or(self.missing_rank);
                    1.0 / (self.rrf_k + rank as f64)
                })
                .sum();
        }

        sort_by_score(&mut merged);
        merged
    }

    /// Per-source max-normalized score times the source weight
    fn weighted(&self, raw: &[SearchResult], mut merged: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut max_by_source: HashMap<SearchSource, f64> = HashMap::new();
        for r in raw {
            let max = max_by_source.entry(r.source).or_insert(f64::MIN);
            if r.score > *max {
                *max = r.score;
            }
        }

        for result in &mut merged {
            let max = max_by_source.get(&result.source).copied().unwrap_or(0.0);
            let normalized = if max > 0.0 { result.score / max } else { 1.0 };
            result.score = normalized * self.weight(result.source);
        }

        sort_by_score(&mut merged);
        merged
    }

    fn weight(&self, source: SearchSource) -> f64 {
        match source {
            SearchSource::Text => self.weights.text,
            SearchSource::Vector => self.weights.vector,
            SearchSource::Provider => self.weights.provider,
        }
    }
}

/// Keep the first occurrence of every identity.
///
/// Display fields come from the survivor; the per-backend diagnostic scores
/// of later duplicates are carried over when the survivor lacks them.
fn dedup(raw: &[SearchResult]) -> Vec<SearchResult> {
    let mut index: HashMap<ResultKey, usize> = HashMap::new();
    let mut out: Vec<SearchResult> = Vec::with_capacity(raw.len());

    for r in raw {
        match index.get(&r.identity()) {
            Some(&pos) => {
                let survivor = &mut out[pos];
                survivor.text_score = survivor.text_score.or(r.text_score);
                survivor.vector_score = survivor.vector_score.or(r.vector_score);
            }
            None => {
                index.insert(r.identity(), out.len());
                out.push(r.clone());
            }
        }
    }

    out
}

/// 1-based rank of every identity within each source's score-ordered list
fn source_ranks(raw: &[SearchResult]) -> HashMap<SearchSource, HashMap<ResultKey, usize>> {
    let mut by_source: HashMap<SearchSource, Vec<&SearchResult>> = HashMap::new();
    for r in raw {
        by_source.entry(r.source).or_default().push(r);
    }

    by_source
        .into_iter()
        .map(|(source, mut list)| {
            list.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
            let mut ranks = HashMap::new();
            let mut seen = HashSet::new();
            for (i, r) in list.into_iter().enumerate() {
                let key = r.identity();
                if seen.insert(key.clone()) {
                    ranks.insert(key, i + 1);
                }
            }
            (source, ranks)
        })
        .collect()
}

fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

/// Favor recent mail: `score *= 1 + factor / (1 + days_old / 30)`, with
/// age measured from the newest dated result. Undated results keep their
/// score. Re-sorts by score.
pub fn apply_recency_boost(results: &mut [SearchResult], factor: f64) {
    if factor <= 0.0 {
        return;
    }
    let Some(anchor) = results.iter().filter_map(|r| r.date).max() else {
        return;
    };

    for r in results.iter_mut() {
        if let Some(date) = r.date {
            let days_old = (anchor - date).num_seconds().max(0) as f64 / SECONDS_PER_DAY;
            r.score *= 1.0 + factor / (1.0 + days_old / RECENCY_HALF_SCALE_DAYS);
        }
    }

    sort_by_score(results);
}
