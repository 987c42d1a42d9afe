//! Filter-to-predicate projection for parameterized local queries

use super::ParsedQuery;
use crate::search::SearchFilters;
use chrono::{DateTime, Utc};

/// Message field a predicate applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateField {
    Sender,
    Recipients,
    Subject,
    Folder,
    HasAttachment,
    IsRead,
    IsStarred,
    ReceivedAt,
}

impl PredicateField {
    /// Column name in the local message store
    pub const fn column(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Recipients => "recipients",
            Self::Subject => "subject",
            Self::Folder => "folder",
            Self::HasAttachment => "has_attachment",
            Self::IsRead => "is_read",
            Self::IsStarred => "is_starred",
            Self::ReceivedAt => "received_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    /// Case-insensitive substring match
    Contains,
    Eq,
    /// Inclusive lower bound
    Gte,
    /// Exclusive upper bound
    Lt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateValue {
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

/// One `column <op> ?` clause with its bound value
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: PredicateField,
    pub op: PredicateOp,
    pub value: PredicateValue,
}

impl Predicate {
    fn new(field: PredicateField, op: PredicateOp, value: PredicateValue) -> Self {
        Self { field, op, value }
    }

    /// SQL fragment with a single anonymous placeholder, column prefixed by `alias`
    pub fn clause(&self, alias: &str) -> String {
        let column = self.field.column();
        match self.op {
            PredicateOp::Contains => format!("{}.{} LIKE ? ESCAPE '\\'", alias, column),
            PredicateOp::Eq => format!("{}.{} = ?", alias, column),
            PredicateOp::Gte => format!("{}.{} >= ?", alias, column),
            PredicateOp::Lt => format!("{}.{} < ?", alias, column),
        }
    }

    /// Value to bind for the placeholder in [`Predicate::clause`]
    pub fn bind_value(&self) -> PredicateValue {
        match (&self.op, &self.value) {
            (PredicateOp::Contains, PredicateValue::Text(s)) => {
                PredicateValue::Text(format!("%{}%", escape_like(s)))
            }
            (_, v) => v.clone(),
        }
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Build one predicate per present filter, in a fixed field order.
///
/// `explicit` filters from the request take precedence over the values
/// parsed out of the query text for the same field.
pub fn build_predicates(parsed: &ParsedQuery, explicit: Option<&SearchFilters>) -> Vec<Predicate> {
    let ex = explicit.cloned().unwrap_or_default();
    let mut out = Vec::new();

    let text_fields = [
        (PredicateField::Sender, ex.from.as_ref().or(parsed.from.as_ref())),
        (PredicateField::Recipients, ex.to.as_ref().or(parsed.to.as_ref())),
        (PredicateField::Subject, ex.subject.as_ref().or(parsed.subject.as_ref())),
    ];
    for (field, value) in text_fields {
        if let Some(v) = value {
            out.push(Predicate::new(field, PredicateOp::Contains, PredicateValue::Text(v.clone())));
        }
    }

    if let Some(folder) = ex.folder.as_ref().or(parsed.folder.as_ref()) {
        out.push(Predicate::new(
            PredicateField::Folder,
            PredicateOp::Eq,
            PredicateValue::Text(folder.clone()),
        ));
    }

    let has_attachment = ex
        .has_attachment
        .or(parsed.has_attachment.then_some(true));
    let flags = [
        (PredicateField::HasAttachment, has_attachment),
        (PredicateField::IsRead, ex.is_read.or(parsed.is_read)),
        (PredicateField::IsStarred, ex.is_starred.or(parsed.is_starred)),
    ];
    for (field, value) in flags {
        if let Some(v) = value {
            out.push(Predicate::new(field, PredicateOp::Eq, PredicateValue::Bool(v)));
        }
    }

    if let Some(start) = ex.date_from.or(parsed.date_from) {
        out.push(Predicate::new(
            PredicateField::ReceivedAt,
            PredicateOp::Gte,
            PredicateValue::Timestamp(start),
        ));
    }
    if let Some(end) = ex.date_to.or(parsed.date_to) {
        out.push(Predicate::new(
            PredicateField::ReceivedAt,
            PredicateOp::Lt,
            PredicateValue::Timestamp(end),
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::analyze_query;

    #[test]
    fn test_one_predicate_per_filter_in_order() {
        let parsed = analyze_query("is:unread from:alice after:2024-01-01 has:attachment report");
        let preds = build_predicates(&parsed, None);
        let fields: Vec<_> = preds.iter().map(|p| p.field).collect();
        assert_eq!(
            fields,
            vec![
                PredicateField::Sender,
                PredicateField::HasAttachment,
                PredicateField::IsRead,
                PredicateField::ReceivedAt,
            ]
        );
        assert_eq!(preds[2].value, PredicateValue::Bool(false));
        assert_eq!(preds[3].op, PredicateOp::Gte);
    }

    #[test]
    fn test_no_filters_no_predicates() {
        assert!(build_predicates(&analyze_query("quarterly numbers"), None).is_empty());
    }

    #[test]
    fn test_explicit_filter_wins() {
        let parsed = analyze_query("from:alice is:read");
        let explicit = SearchFilters {
            from: Some("bob".into()),
            is_read: Some(false),
            ..Default::default()
        };
        let preds = build_predicates(&parsed, Some(&explicit));
        assert_eq!(preds[0].value, PredicateValue::Text("bob".into()));
        assert_eq!(preds[1].value, PredicateValue::Bool(false));
    }

    #[test]
    fn test_clause_and_bind_value() {
        let parsed = analyze_query("subject:100%_done in:inbox");
        let preds = build_predicates(&parsed, None);
        assert_eq!(preds[0].clause("m"), "m.subject LIKE ? ESCAPE '\\'");
        assert_eq!(
            preds[0].bind_value(),
            PredicateValue::Text("%100\\%\\_done%".into())
        );
        assert_eq!(preds[1].clause("m"), "m.folder = ?");
        assert_eq!(preds[1].bind_value(), PredicateValue::Text("inbox".into()));
    }
}
