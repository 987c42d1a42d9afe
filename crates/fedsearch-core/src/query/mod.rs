//! Query understanding
//!
//! Turns a raw mail query into a [`ParsedQuery`] and projects it into the
//! syntax each backend understands.

mod analyzer;
mod predicates;
mod transformer;

pub use analyzer::{analyze_query, QueryAnalyzer};
pub use predicates::{build_predicates, Predicate, PredicateField, PredicateOp, PredicateValue};
pub use transformer::{
    escape_fts_term, to_embedding_text, to_fts_query, to_provider_query, to_provider_split,
    ProviderSplitQuery,
};

use crate::search::SearchFilters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the user is most likely after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Exact terms, best served by the full-text index
    #[default]
    Keyword,
    /// Natural language, best served by embeddings
    Semantic,
    /// Operator filters with at most terse keywords
    Structured,
    /// Operator filters plus natural language
    Hybrid,
}

/// Structured view of a raw query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Trimmed input
    pub raw: String,
    /// Text left over after filter extraction
    pub remaining: String,
    /// Search terms in the order they were typed
    pub keywords: Vec<String>,

    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub has_attachment: bool,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub folder: Option<String>,

    pub intent: Intent,
    /// 1 (plain lookup) to 5 (many constraints)
    pub complexity: u8,
    /// Text handed to the embedder
    pub semantic_query: String,
}

impl ParsedQuery {
    /// No keywords and no filters: nothing to search for
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && !self.has_structured_filters()
    }

    pub fn has_structured_filters(&self) -> bool {
        self.from.is_some()
            || self.to.is_some()
            || self.subject.is_some()
            || self.has_attachment
            || self.is_read.is_some()
            || self.is_starred.is_some()
            || self.date_from.is_some()
            || self.date_to.is_some()
            || self.folder.is_some()
    }

    /// Overlay caller-supplied filters on the text-derived ones.
    ///
    /// Intent, complexity and the semantic text are recomputed so the plan
    /// reflects the filters that will actually be applied.
    pub fn apply_filters(&mut self, filters: &SearchFilters) {
        if filters.is_empty() {
            return;
        }
        if let Some(ref v) = filters.from {
            self.from = Some(v.clone());
        }
        if let Some(ref v) = filters.to {
            self.to = Some(v.clone());
        }
        if let Some(ref v) = filters.subject {
            self.subject = Some(v.clone());
        }
        if let Some(ref v) = filters.folder {
            self.folder = Some(v.clone());
        }
        if let Some(v) = filters.has_attachment {
            self.has_attachment = v;
        }
        if filters.is_read.is_some() {
            self.is_read = filters.is_read;
        }
        if filters.is_starred.is_some() {
            self.is_starred = filters.is_starred;
        }
        if filters.date_from.is_some() {
            self.date_from = filters.date_from;
        }
        if filters.date_to.is_some() {
            self.date_to = filters.date_to;
        }
        analyzer::derive(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_query() {
        let parsed = ParsedQuery::default();
        assert!(parsed.is_empty());
        assert!(!parsed.has_structured_filters());
    }

    #[test]
    fn test_explicit_filters_override_parsed() {
        let mut parsed = analyze_query("from:alice budget");
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        parsed.apply_filters(&SearchFilters {
            from: Some("bob@co.com".into()),
            date_from: Some(start),
            ..Default::default()
        });

        assert_eq!(parsed.from.as_deref(), Some("bob@co.com"));
        assert_eq!(parsed.date_from, Some(start));
        assert_eq!(parsed.keywords, vec!["budget"]);
        // from + date bound
        assert_eq!(parsed.complexity, 3);
    }

    #[test]
    fn test_explicit_filters_can_clear_attachment_flag() {
        let mut parsed = analyze_query("has:attachment invoice");
        parsed.apply_filters(&SearchFilters {
            has_attachment: Some(false),
            ..Default::default()
        });
        assert!(!parsed.has_attachment);
        assert_eq!(parsed.intent, Intent::Keyword);
    }
}
