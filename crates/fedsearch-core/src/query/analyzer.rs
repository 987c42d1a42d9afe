//! Rule-based query analyzer
//!
//! Extracts mail operators (`from:`, `is:unread`, `after:2024/01/31`, ...),
//! tokenizes what is left into keywords and classifies intent/complexity.
//! Analysis never fails: malformed operators simply stay in the text and
//! are treated as keywords.

use super::{Intent, ParsedQuery};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A quoted phrase (optionally prefixed, e.g. `subject:"a b"`) or a bare token
    static ref TOKEN_RE: Regex = Regex::new(r#"[^\s"]*"[^"]*"|\S+"#).unwrap();
}

/// Boolean operators dropped from keywords
const BOOLEAN_OPERATORS: &[&str] = &["AND", "OR", "NOT"];

/// Words that signal a descriptive, natural-language query
const CONNECTIVE_WORDS: &[&str] = &[
    "about",
    "regarding",
    "related",
    "concerning",
    "similar",
    "mentioning",
    "discussing",
];

/// Keyword text longer than this reads as a sentence rather than terms
const NATURAL_LANGUAGE_MIN_CHARS: usize = 30;

const MAX_COMPLEXITY: u8 = 5;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Operators in extraction order
#[derive(Debug, Clone, Copy)]
enum Operator {
    From,
    To,
    Subject,
    HasAttachment,
    ReadState,
    Starred,
    After,
    Before,
    Folder,
}

const EXTRACTION_ORDER: &[Operator] = &[
    Operator::From,
    Operator::To,
    Operator::Subject,
    Operator::HasAttachment,
    Operator::ReadState,
    Operator::Starred,
    Operator::After,
    Operator::Before,
    Operator::Folder,
];

/// Stateless query analyzer
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw query. Always succeeds.
    pub fn analyze(&self, raw: &str) -> ParsedQuery {
        let raw = raw.trim();
        let mut parsed = ParsedQuery {
            raw: raw.to_string(),
            ..Default::default()
        };

        let mut tokens: Vec<&str> = TOKEN_RE.find_iter(raw).map(|m| m.as_str()).collect();

        for op in EXTRACTION_ORDER {
            tokens.retain(|token| !extract(&mut parsed, *op, token));
        }

        parsed.remaining = tokens.join(" ");
        parsed.keywords = tokens.iter().filter_map(|t| to_keyword(t)).collect();

        derive(&mut parsed);

        tracing::debug!(
            query = raw,
            keywords = parsed.keywords.len(),
            intent = ?parsed.intent,
            complexity = parsed.complexity,
            "Analyzed query"
        );

        parsed
    }
}

/// Convenience wrapper around [`QueryAnalyzer::analyze`]
pub fn analyze_query(raw: &str) -> ParsedQuery {
    QueryAnalyzer.analyze(raw)
}

/// Try to consume `token` as `op`. Returns true if the token was a valid
/// operator and its value was recorded.
fn extract(parsed: &mut ParsedQuery, op: Operator, token: &str) -> bool {
    match op {
        Operator::From => take_text(&mut parsed.from, "from:", token),
        Operator::To => take_text(&mut parsed.to, "to:", token),
        Operator::Subject => take_text(&mut parsed.subject, "subject:", token),
        Operator::Folder => take_text(&mut parsed.folder, "in:", token),
        Operator::HasAttachment => match operator_value("has:", token) {
            Some(v) if v.eq_ignore_ascii_case("attachment") || v.eq_ignore_ascii_case("attachments") => {
                parsed.has_attachment = true;
                true
            }
            _ => false,
        },
        Operator::ReadState => match operator_value("is:", token).map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "read" || v == "unread" => {
                parsed.is_read.get_or_insert(v == "read");
                true
            }
            _ => false,
        },
        Operator::Starred => match operator_value("is:", token) {
            Some(v) if v.eq_ignore_ascii_case("starred") => {
                parsed.is_starred = Some(true);
                true
            }
            _ => false,
        },
        Operator::After => take_date(&mut parsed.date_from, "after:", token),
        Operator::Before => take_date(&mut parsed.date_to, "before:", token),
    }
}

/// Value after a case-insensitive `prefix`, with surrounding quotes removed
fn operator_value<'a>(prefix: &str, token: &'a str) -> Option<&'a str> {
    let head = token.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let value = token[prefix.len()..].trim_matches('"').trim();
    (!value.is_empty()).then_some(value)
}

fn take_text(slot: &mut Option<String>, prefix: &str, token: &str) -> bool {
    match operator_value(prefix, token) {
        Some(value) => {
            // first occurrence wins, later duplicates are still consumed
            slot.get_or_insert_with(|| value.to_string());
            true
        }
        None => false,
    }
}

fn take_date(slot: &mut Option<DateTime<Utc>>, prefix: &str, token: &str) -> bool {
    match operator_value(prefix, token).and_then(parse_date) {
        Some(date) => {
            slot.get_or_insert(date);
            true
        }
        None => false,
    }
}

/// Parse `YYYY-MM-DD` or `YYYY/MM/DD` as midnight UTC
pub(crate) fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(value, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    })
}

fn to_keyword(token: &str) -> Option<String> {
    if BOOLEAN_OPERATORS.contains(&token) {
        return None;
    }

    let word = token.trim_matches(|c| c == '"' || c == '\'').trim();

    // A single CJK or accented character is a word; a single ASCII one is noise.
    if word.chars().count() < 2 && !has_non_ascii_letter(word) {
        return None;
    }

    Some(word.to_string())
}

fn has_non_ascii_letter(s: &str) -> bool {
    s.chars().any(|c| c.is_alphabetic() && !c.is_ascii())
}

/// Whether the keywords read like a sentence rather than search terms
pub(crate) fn looks_like_natural_language(keywords: &[String]) -> bool {
    if keywords.iter().any(|k| has_non_ascii_letter(k)) {
        return true;
    }
    if keywords.len() >= 3 {
        return true;
    }
    if keywords.iter().any(|k| {
        let lower = k.to_lowercase();
        CONNECTIVE_WORDS.iter().any(|w| lower.contains(w))
    }) {
        return true;
    }
    keywords.iter().map(|k| k.chars().count()).sum::<usize>() > NATURAL_LANGUAGE_MIN_CHARS
}

/// Recompute intent, complexity and semantic text from the extracted fields
pub(crate) fn derive(parsed: &mut ParsedQuery) {
    parsed.intent = classify_intent(parsed);
    parsed.complexity = complexity(parsed);
    parsed.semantic_query = semantic_query(parsed);
}

fn classify_intent(parsed: &ParsedQuery) -> Intent {
    let has_filters = parsed.has_structured_filters();
    let has_keywords = !parsed.keywords.is_empty();
    let natural = has_keywords && looks_like_natural_language(&parsed.keywords);

    match (has_filters, has_keywords, natural) {
        (true, false, _) => Intent::Structured,
        (true, true, true) => Intent::Hybrid,
        (true, true, false) => Intent::Structured,
        (false, true, true) => Intent::Semantic,
        (false, true, false) => Intent::Keyword,
        (false, false, _) => Intent::Keyword,
    }
}

fn complexity(parsed: &ParsedQuery) -> u8 {
    let points = [
        parsed.from.is_some(),
        parsed.to.is_some(),
        parsed.subject.is_some(),
        parsed.has_attachment,
        parsed.date_from.is_some() || parsed.date_to.is_some(),
        parsed.keywords.len() > 2,
    ]
    .iter()
    .filter(|p| **p)
    .count() as u8;

    (1 + points).min(MAX_COMPLEXITY)
}

fn semantic_query(parsed: &ParsedQuery) -> String {
    let mut text = parsed.keywords.join(" ");
    if let Some(ref subject) = parsed.subject {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(subject);
    }
    text
}
