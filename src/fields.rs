//! Condition builder: turns a resolved value into a field condition, one
//! strategy per [`FieldKind`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use regex::Regex;
use std::ops::Bound;
use std::sync::LazyLock;
use tracing::trace;

use crate::condition::{
    Bounds, ConditionNode, FieldCondition, Matcher, Operand, Predicate, Visibility,
};
use crate::error::{QueryError, Result};
use crate::kind::ObjectKind;
use crate::range::QueryRange;
use crate::schema::{FieldDescriptor, FieldKind, SchemaRegistry};
use crate::value::QueryValue;

static SIZE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)\s*([A-Za-z]*)$").expect("size pattern is valid"));

/// What a descriptor needs besides the value itself
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub visibility: &'a Visibility,
}

impl FieldDescriptor {
    /// Builds the condition for `operand`, interpreting `remainder` the way
    /// this field's kind dictates.
    pub fn condition(
        &self,
        operand: Operand,
        remainder: &[String],
        ctx: FieldContext<'_>,
    ) -> Result<ConditionNode> {
        trace!(field = self.name, ?remainder, "building field condition");

        let predicate = match self.kind {
            FieldKind::Scalar { .. } | FieldKind::List { .. } => {
                self.no_remainder(remainder)?;
                Predicate::Text(self.text_matcher(&operand)?)
            }
            FieldKind::Json { .. } => {
                let matcher = self.text_matcher(&operand)?;
                if remainder.is_empty() {
                    Predicate::Text(matcher.into_substring())
                } else {
                    Predicate::Text(matcher)
                }
            }
            FieldKind::Attribute => {
                if remainder.is_empty() {
                    return Err(QueryError::FieldNotQueryable(format!(
                        "Missing attribute key ({}.<key>:)",
                        self.name
                    )));
                }
                Predicate::Text(self.text_matcher(&operand)?)
            }
            FieldKind::Relation { .. } => return self.relation(operand, remainder, ctx),
            FieldKind::Share | FieldKind::Uploader => {
                self.no_remainder(remainder)?;
                Predicate::Shared {
                    matcher: self.text_matcher(&operand)?,
                    visible: ctx.visibility.clone(),
                }
            }
            FieldKind::Datetime { .. } => {
                self.no_remainder(remainder)?;
                return self.bounded(operand, |v| self.parse_datetime(v), Predicate::Datetime);
            }
            FieldKind::Size { .. } => {
                self.no_remainder(remainder)?;
                return self.bounded(
                    operand,
                    |v| self.parse_size(v),
                    |b| Predicate::Size(close_upper(b)),
                );
            }
        };

        Ok(ConditionNode::Field(FieldCondition {
            field: *self,
            remainder: remainder.to_vec(),
            operand,
            predicate,
        }))
    }

    fn no_remainder(&self, remainder: &[String]) -> Result<()> {
        if remainder.is_empty() {
            Ok(())
        } else {
            Err(QueryError::FieldNotQueryable(format!(
                "Field '{}' has no sub-field '{}'",
                self.name,
                remainder.join(".")
            )))
        }
    }

    fn text_matcher(&self, operand: &Operand) -> Result<Matcher> {
        match operand {
            Operand::Value(value) => Ok(Matcher::from_value(value)),
            Operand::Range(range) => Err(QueryError::unsupported_value(
                self.name,
                range.describe(),
                "range queries are only supported for size and date fields",
            )),
        }
    }

    /// Exists a related object matching either its identifier or the remainder path.
    fn relation(
        &self,
        operand: Operand,
        remainder: &[String],
        ctx: FieldContext<'_>,
    ) -> Result<ConditionNode> {
        let (inner, kind) = if remainder.is_empty() {
            let dhash = ctx.registry.expect_field(ObjectKind::Object, "dhash")?;
            (dhash.condition(operand, &[], ctx)?, ObjectKind::Object)
        } else {
            // `parent.md5` means a related File, the only kind owning `md5`.
            let head = remainder[0].as_str();
            let kind = match ctx.registry.owners(head).as_slice() {
                [only] if ctx.registry.lookup(ObjectKind::Object, head)?.is_none() => *only,
                _ => ObjectKind::Object,
            };
            let resolved = ctx.registry.resolve(kind, &remainder.join("."))?;
            (
                resolved.field.condition(operand, &resolved.remainder, ctx)?,
                resolved.kind,
            )
        };

        Ok(ConditionNode::Subquery {
            field: *self,
            kind,
            inner: Box::new(inner),
        })
    }

    /// Exact values and ranges over an ordered type. `parse` yields the half-open
    /// interval `[start, end)` a literal denotes.
    fn bounded<T, P, W>(&self, operand: Operand, parse: P, wrap: W) -> Result<ConditionNode>
    where
        P: Fn(&QueryValue) -> Result<(T, T)>,
        W: FnOnce(Bounds<T>) -> Predicate,
    {
        let operand = match operand {
            Operand::Value(value) => match QueryRange::from_value(&value) {
                Some(range) => Operand::Range(range),
                None => Operand::Value(value),
            },
            range => range,
        };

        let predicate = match &operand {
            Operand::Value(value) if value.is_match_all => Predicate::Text(Matcher::Any),
            Operand::Value(value) => {
                let (start, end) = parse(value)?;
                wrap(Bounds::new(Bound::Included(start), Bound::Excluded(end)))
            }
            Operand::Range(range) => {
                let low = match &range.low {
                    None => Bound::Unbounded,
                    Some(v) if range.include_low => Bound::Included(parse(v)?.0),
                    Some(v) => Bound::Included(parse(v)?.1),
                };
                let high = match &range.high {
                    None => Bound::Unbounded,
                    Some(v) if range.include_high => Bound::Excluded(parse(v)?.1),
                    Some(v) => Bound::Excluded(parse(v)?.0),
                };
                wrap(Bounds::new(low, high))
            }
        };

        Ok(ConditionNode::Field(FieldCondition {
            field: *self,
            remainder: Vec::new(),
            operand,
            predicate,
        }))
    }

    fn reject_wildcard(&self, value: &QueryValue) -> Result<()> {
        if value.has_wildcard {
            return Err(QueryError::unsupported_value(
                self.name,
                value.value.clone(),
                "wildcards are not allowed here",
            ));
        }
        Ok(())
    }

    /// Accepts a date, a date with minutes or seconds, or RFC 3339. Returns the
    /// interval the literal covers, e.g. the whole day for a bare date.
    fn parse_datetime(&self, value: &QueryValue) -> Result<(NaiveDateTime, NaiveDateTime)> {
        self.reject_wildcard(value)?;
        let text = value.unescaped_value.trim();

        let parsed = if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            date.and_hms_opt(0, 0, 0).map(|start| (start, TimeDelta::days(1)))
        } else if let Some(start) = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        {
            Some((start, TimeDelta::seconds(1)))
        } else if let Some(start) = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        {
            Some((start, TimeDelta::minutes(1)))
        } else {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| (dt.naive_utc(), TimeDelta::seconds(1)))
        };

        parsed
            .and_then(|(start, span)| Some((start, start.checked_add_signed(span)?)))
            .ok_or_else(|| {
                QueryError::unsupported_value(self.name, text, "expected a date or timestamp")
            })
    }

    /// Integer byte count with an optional `B`, `K`/`KB`, `M`/`MB` or `G`/`GB`
    /// suffix, as the interval `[n, n + 1)`.
    fn parse_size(&self, value: &QueryValue) -> Result<(u64, u64)> {
        self.reject_wildcard(value)?;
        let text = value.unescaped_value.trim();

        let invalid = |reason: &str| QueryError::unsupported_value(self.name, text, reason);
        let captures = SIZE_PATTERN
            .captures(text)
            .ok_or_else(|| invalid("expected a number with an optional unit"))?;

        let number: u64 = captures[1].parse().map_err(|_| invalid("number too large"))?;
        let multiplier: u64 = match captures[2].to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" => 1 << 10,
            "m" | "mb" => 1 << 20,
            "g" | "gb" => 1 << 30,
            _ => return Err(invalid("unknown size unit")),
        };

        let start = number.checked_mul(multiplier).ok_or_else(|| invalid("number too large"))?;
        let end = start.checked_add(1).ok_or_else(|| invalid("number too large"))?;
        Ok((start, end))
    }
}

/// Integer bounds read better closed: `< n + 1` becomes `<= n`.
fn close_upper(bounds: Bounds<u64>) -> Bounds<u64> {
    let high = match bounds.high {
        Bound::Excluded(end) if end > 0 => Bound::Included(end - 1),
        other => other,
    };
    Bounds::new(bounds.low, high)
}
