//! Range resolution: `>=X`, `>X`, `<=X`, `<X` and explicit `[a TO b]` terms.
//!
//! Purely syntactic. Bounds stay [`QueryValue`]s; the consuming field decides
//! whether they parse as dates, sizes or nothing at all.

use serde::Serialize;

use crate::ast::RangeItem;
use crate::value::QueryValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRange {
    /// `None` is unbounded
    pub low: Option<QueryValue>,
    pub high: Option<QueryValue>,
    pub include_low: bool,
    pub include_high: bool,
}

impl QueryRange {
    /// Interprets a comparison-prefixed literal, `None` if the literal is not one
    pub fn from_value(value: &QueryValue) -> Option<Self> {
        let (op, rest) = [">=", "<=", ">", "<"]
            .into_iter()
            .find_map(|op| value.value.strip_prefix(op).map(|rest| (op, rest)))?;
        if rest.is_empty() {
            return None;
        }

        let bound = QueryValue::from_word(rest);
        let range = match op {
            ">=" => Self::lower(bound, true),
            ">" => Self::lower(bound, false),
            "<=" => Self::upper(bound, true),
            _ => Self::upper(bound, false),
        };
        Some(range)
    }

    /// `>bound` or `>=bound`
    fn lower(bound: QueryValue, inclusive: bool) -> Self {
        Self {
            low: Some(bound),
            high: None,
            include_low: inclusive,
            include_high: false,
        }
    }

    /// `<bound` or `<=bound`
    fn upper(bound: QueryValue, inclusive: bool) -> Self {
        Self {
            low: None,
            high: Some(bound),
            include_low: false,
            include_high: inclusive,
        }
    }

    /// Explicit two-sided range from the syntax tree
    pub fn from_item(item: &RangeItem) -> Self {
        Self {
            low: item.low.as_ref().map(|l| QueryValue::from_phrase(&l.raw)),
            high: item.high.as_ref().map(|l| QueryValue::from_phrase(&l.raw)),
            include_low: item.include_low,
            include_high: item.include_high,
        }
    }

    /// Human-readable form, used in error messages
    pub fn describe(&self) -> String {
        format!(
            "{}{} TO {}{}",
            if self.include_low { '[' } else { '{' },
            self.low.as_ref().map_or("*", |v| v.value.as_str()),
            self.high.as_ref().map_or("*", |v| v.value.as_str()),
            if self.include_high { ']' } else { '}' },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::token::Span;

    fn range(raw: &str) -> Option<QueryRange> {
        QueryRange::from_value(&QueryValue::from_word(raw))
    }

    fn bound_value(bound: &Option<QueryValue>) -> Option<&str> {
        bound.as_ref().map(|v| v.value.as_str())
    }

    #[test]
    fn test_greater_or_equal() {
        let r = range(">=5").unwrap();
        assert_eq!(bound_value(&r.low), Some("5"));
        assert!(r.include_low);
        assert!(r.high.is_none());
    }

    #[test]
    fn test_greater() {
        let r = range(">5").unwrap();
        assert_eq!(bound_value(&r.low), Some("5"));
        assert!(!r.include_low);
        assert!(r.high.is_none());
    }

    #[test]
    fn test_less_or_equal() {
        let r = range("<=2021-01-01").unwrap();
        assert!(r.low.is_none());
        assert_eq!(bound_value(&r.high), Some("2021-01-01"));
        assert!(r.include_high);
    }

    #[test]
    fn test_less() {
        let r = range("<10").unwrap();
        assert!(r.low.is_none());
        assert_eq!(bound_value(&r.high), Some("10"));
        assert!(!r.include_high);
    }

    #[test]
    fn test_not_a_range() {
        assert!(range("10").is_none());
        assert!(range("a>b").is_none());
        assert!(range(">=").is_none());
        assert!(range("<").is_none());
    }

    #[test]
    fn test_escaped_operator_is_literal() {
        assert!(range(r"\>5").is_none());
    }

    #[test]
    fn test_explicit_range() {
        let item = RangeItem {
            low: Some(Literal::new("1K", Span::default())),
            high: None,
            include_low: true,
            include_high: false,
        };
        let r = QueryRange::from_item(&item);
        assert_eq!(bound_value(&r.low), Some("1K"));
        assert!(r.high.is_none());
        assert_eq!(r.describe(), "[1K TO *}");
    }
}
