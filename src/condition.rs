//! Abstract condition tree handed to an evaluator.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;

use crate::kind::ObjectKind;
use crate::range::QueryRange;
use crate::schema::FieldDescriptor;
use crate::value::{escape_like, QueryValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionNode {
    Field(FieldCondition),
    And(Vec<ConditionNode>),
    Or(Vec<ConditionNode>),
    Not(Box<ConditionNode>),
    /// Parenthesized in the query; logically transparent
    Group(Box<ConditionNode>),
    /// Exists a related object of `kind` matching `inner`
    Subquery {
        field: FieldDescriptor,
        kind: ObjectKind,
        inner: Box<ConditionNode>,
    },
}

/// A single field constraint, already type-checked by its descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldCondition {
    pub field: FieldDescriptor,
    pub remainder: Vec<String>,
    /// The literal as written, for diagnostics
    pub operand: Operand,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(QueryValue),
    Range(QueryRange),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Text(Matcher),
    Size(Bounds<u64>),
    Datetime(Bounds<NaiveDateTime>),
    /// Share or upload grant, limited to the groups the requester can see
    Shared { matcher: Matcher, visible: Visibility },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    /// Present / non-null
    Any,
    Exact(String),
    /// `LIKE` pattern escaped with [`crate::value::LIKE_ESCAPE`]
    Pattern(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bounds<T> {
    pub low: Bound<T>,
    pub high: Bound<T>,
}

/// Groups the requester is allowed to see; supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    All,
    Groups(BTreeSet<String>),
}

impl Matcher {
    pub fn from_value(value: &QueryValue) -> Self {
        if value.is_match_all {
            Self::Any
        } else if value.has_wildcard {
            Self::Pattern(value.sql_value())
        } else {
            Self::Exact(value.unescaped_value.clone())
        }
    }

    /// Turns an exact match into a contains-match
    pub fn into_substring(self) -> Self {
        match self {
            Self::Exact(s) => Self::Pattern(format!("%{}%", escape_like(&s))),
            other => other,
        }
    }
}

impl<T> Bounds<T> {
    pub fn new(low: Bound<T>, high: Bound<T>) -> Self {
        Self { low, high }
    }

    pub fn exactly(value: T) -> Self
    where
        T: Clone,
    {
        Self::new(Bound::Included(value.clone()), Bound::Included(value))
    }
}

impl Visibility {
    pub fn groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Groups(groups.into_iter().map(Into::into).collect())
    }
}

impl ConditionNode {
    /// Number of field conditions in the tree, sub-queries included
    pub fn field_count(&self) -> usize {
        match self {
            Self::Field(_) => 1,
            Self::And(children) | Self::Or(children) => {
                children.iter().map(Self::field_count).sum()
            }
            Self::Not(inner) | Self::Group(inner) => inner.field_count(),
            Self::Subquery { inner, .. } => inner.field_count(),
        }
    }
}

impl fmt::Display for ConditionNode {
    /// Compact s-expression form, e.g. `(and tag="a" (not md5~"ab%"))`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, op: &str, children: &[ConditionNode]) -> fmt::Result {
            write!(f, "({op}")?;
            for child in children {
                write!(f, " {child}")?;
            }
            f.write_str(")")
        }

        match self {
            Self::Field(cond) => {
                write!(f, "{}", cond.field.name)?;
                for segment in &cond.remainder {
                    write!(f, ".{segment}")?;
                }
                write!(f, "{}", cond.predicate)
            }
            Self::And(children) => list(f, "and", children),
            Self::Or(children) => list(f, "or", children),
            Self::Not(inner) => write!(f, "(not {inner})"),
            Self::Group(inner) => write!(f, "{inner}"),
            Self::Subquery { field, kind, inner } => write!(f, "({} {} {inner})", field.name, kind),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(m) | Self::Shared { matcher: m, .. } => write!(f, "{m}"),
            Self::Size(b) => write_bounds(f, b),
            Self::Datetime(b) => write_bounds(f, b),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(":*"),
            Self::Exact(s) => write!(f, "={s:?}"),
            Self::Pattern(p) => write!(f, "~{p:?}"),
        }
    }
}

fn write_bounds<T: fmt::Display>(f: &mut fmt::Formatter<'_>, bounds: &Bounds<T>) -> fmt::Result {
    match &bounds.low {
        Bound::Included(v) => write!(f, "[{v}")?,
        Bound::Excluded(v) => write!(f, "{{{v}")?,
        Bound::Unbounded => f.write_str("{*")?,
    }
    f.write_str(" TO ")?;
    match &bounds.high {
        Bound::Included(v) => write!(f, "{v}]"),
        Bound::Excluded(v) => write!(f, "{v}}}"),
        Bound::Unbounded => f.write_str("*}"),
    }
}
