//! Projections of a parsed query into backend query syntax
//!
//! All functions are pure and never fail. An empty projection means the
//! backend has nothing to search for.

use super::ParsedQuery;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider date format for `after:` / `before:`
const PROVIDER_DATE_FORMAT: &str = "%Y/%m/%d";

/// Filter-expression timestamp format
const FILTER_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Quote a term for FTS5 so operators and punctuation are taken literally
pub fn escape_fts_term(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Full-text expression: every keyword required
pub fn to_fts_query(parsed: &ParsedQuery) -> String {
    parsed
        .keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| escape_fts_term(k))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Text to embed for vector search
pub fn to_embedding_text(parsed: &ParsedQuery) -> &str {
    &parsed.semantic_query
}

fn quote_if_spaced(value: &str) -> String {
    if value.contains(char::is_whitespace) {
        format!("\"{}\"", value.replace('"', ""))
    } else {
        value.to_string()
    }
}

/// Single provider query string in the provider's operator syntax
pub fn to_provider_query(parsed: &ParsedQuery) -> String {
    let mut parts: Vec<String> = parsed.keywords.iter().map(|k| quote_if_spaced(k)).collect();

    if let Some(ref from) = parsed.from {
        parts.push(format!("from:{}", quote_if_spaced(from)));
    }
    if let Some(ref to) = parsed.to {
        parts.push(format!("to:{}", quote_if_spaced(to)));
    }
    if let Some(ref subject) = parsed.subject {
        parts.push(format!("subject:{}", quote_if_spaced(subject)));
    }
    if parsed.has_attachment {
        parts.push("has:attachment".to_string());
    }
    match parsed.is_read {
        Some(true) => parts.push("is:read".to_string()),
        Some(false) => parts.push("is:unread".to_string()),
        None => {}
    }
    match parsed.is_starred {
        Some(true) => parts.push("is:starred".to_string()),
        Some(false) => parts.push("-is:starred".to_string()),
        None => {}
    }
    if let Some(date) = parsed.date_from {
        parts.push(format!("after:{}", date.format(PROVIDER_DATE_FORMAT)));
    }
    if let Some(date) = parsed.date_to {
        parts.push(format!("before:{}", date.format(PROVIDER_DATE_FORMAT)));
    }
    if let Some(ref folder) = parsed.folder {
        parts.push(format!("in:{}", quote_if_spaced(folder)));
    }

    parts.join(" ")
}

/// Split form for providers that separate free-text search from predicates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSplitQuery {
    /// AND-joined phrase list, plus recipient/subject terms
    pub search: String,
    /// Boolean-equality predicate expression
    pub filter: String,
}

impl ProviderSplitQuery {
    pub fn is_empty(&self) -> bool {
        self.search.is_empty() && self.filter.is_empty()
    }
}

fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn filter_timestamp(date: DateTime<Utc>) -> String {
    date.format(FILTER_DATE_FORMAT).to_string()
}

/// Search-text + filter-expression form.
///
/// Recipient and subject have no equality predicate in these APIs, so they
/// travel in the search text as field-scoped terms.
pub fn to_provider_split(parsed: &ParsedQuery) -> ProviderSplitQuery {
    let mut phrases: Vec<String> = parsed.keywords.iter().map(|k| quote_if_spaced(k)).collect();
    if let Some(ref to) = parsed.to {
        phrases.push(format!("to:{}", quote_if_spaced(to)));
    }
    if let Some(ref subject) = parsed.subject {
        phrases.push(format!("subject:{}", quote_if_spaced(subject)));
    }

    let mut clauses = Vec::new();
    if let Some(ref from) = parsed.from {
        clauses.push(format!("from/emailAddress/address eq {}", odata_literal(from)));
    }
    if parsed.has_attachment {
        clauses.push("hasAttachments eq true".to_string());
    }
    if let Some(read) = parsed.is_read {
        clauses.push(format!("isRead eq {}", read));
    }
    match parsed.is_starred {
        Some(true) => clauses.push("flag/flagStatus eq 'flagged'".to_string()),
        Some(false) => clauses.push("flag/flagStatus ne 'flagged'".to_string()),
        None => {}
    }
    if let Some(date) = parsed.date_from {
        clauses.push(format!("receivedDateTime ge {}", filter_timestamp(date)));
    }
    if let Some(date) = parsed.date_to {
        clauses.push(format!("receivedDateTime lt {}", filter_timestamp(date)));
    }
    if let Some(ref folder) = parsed.folder {
        clauses.push(format!("parentFolderId eq {}", odata_literal(folder)));
    }

    ProviderSplitQuery {
        search: phrases.join(" AND "),
        filter: clauses.join(" and "),
    }
}
