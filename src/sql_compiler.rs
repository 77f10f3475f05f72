//! SQL compiler that lowers a condition tree into a PostgreSQL query using sea-query.
//!
//! Objects live in one table with a `type` discriminator. List-like fields,
//! attributes, grants and relations are rows of side tables keyed by
//! `object_id`, so they lower to `EXISTS` sub-selects. `NOT` is applied to the
//! whole `EXISTS`, never pushed inside it.

use sea_query::{
    Alias, Expr, Iden, JoinType, LikeExpr, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr,
};
use std::collections::HashMap;
use std::ops::Bound;
use tracing::debug;

use crate::condition::{Bounds, ConditionNode, FieldCondition, Matcher, Predicate, Visibility};
use crate::error::{QueryError, Result};
use crate::kind::ObjectKind;
use crate::schema::{Direction, FieldKind};
use crate::value::LIKE_ESCAPE;

/// Logical table names, as used in the table mapping
pub const OBJECT_TABLE: &str = "object";
pub const ATTRIBUTE_TABLE: &str = "attribute";
pub const PERMISSION_TABLE: &str = "permission";
pub const RELATION_TABLE: &str = "relation";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Table or alias identifier for sea-query
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Column identifier wrapper
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

fn column(table: &TableName, name: &str) -> Expr {
    Expr::col((table.clone(), ColumnName(name.to_string())))
}

/// SQL Compiler that converts condition trees to SQL queries
#[derive(Debug, Clone, Default)]
pub struct SqlCompiler {
    /// Maps logical table names to physical ones
    table_mapping: HashMap<String, String>,
}

/// Result of SQL compilation
#[derive(Debug)]
pub struct CompileResult {
    /// Query with values inlined, for display
    pub sql: String,
    /// The statement itself, for building with bound parameters
    pub statement: SelectStatement,
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_mapping(table_mapping: HashMap<String, String>) -> Self {
        Self { table_mapping }
    }

    /// Get the actual table name for a logical one
    fn table_name(&self, logical: &str) -> TableName {
        TableName(
            self.table_mapping
                .get(logical)
                .cloned()
                .unwrap_or_else(|| logical.to_string()),
        )
    }

    /// Compiles `condition` into `SELECT id FROM object WHERE ...` for objects of `kind`.
    pub fn compile(&self, condition: &ConditionNode, kind: ObjectKind) -> Result<CompileResult> {
        let mut lowering = Lowering { compiler: self, aliases: 0 };
        let root = lowering.alias("o");

        let mut select = Query::select();
        select
            .column((root.clone(), ColumnName("id".to_string())))
            .from_as(self.table_name(OBJECT_TABLE), root.clone());
        if let Some(discriminator) = kind.discriminator() {
            select.and_where(column(&root, "type").eq(discriminator));
        }
        select.and_where(lowering.lower(condition, &root)?);

        let sql = select.to_string(PostgresQueryBuilder);
        debug!(%kind, sub_selects = lowering.aliases - 1, "lowered condition tree");

        Ok(CompileResult { sql, statement: select })
    }
}

/// State of one compilation: hands out unique aliases for nested selects
struct Lowering<'c> {
    compiler: &'c SqlCompiler,
    aliases: usize,
}

impl Lowering<'_> {
    fn alias(&mut self, prefix: &str) -> TableName {
        let alias = TableName(format!("{prefix}{}", self.aliases));
        self.aliases += 1;
        alias
    }

    fn lower(&mut self, node: &ConditionNode, object: &TableName) -> Result<SimpleExpr> {
        match node {
            ConditionNode::Field(cond) => self.field(cond, object),
            ConditionNode::And(children) => {
                let exprs = self.lower_all(children, object)?;
                Ok(combine(exprs, SimpleExpr::and, true))
            }
            ConditionNode::Or(children) => {
                let exprs = self.lower_all(children, object)?;
                Ok(combine(exprs, SimpleExpr::or, false))
            }
            ConditionNode::Not(inner) => Ok(self.lower(inner, object)?.not()),
            ConditionNode::Group(inner) => self.lower(inner, object),
            ConditionNode::Subquery { field, kind, inner } => {
                let FieldKind::Relation { direction } = field.kind else {
                    return Err(QueryError::Schema(format!(
                        "'{}' is not a relation field",
                        field.name
                    )));
                };
                self.related(direction, *kind, inner, object)
            }
        }
    }

    fn lower_all(
        &mut self,
        children: &[ConditionNode],
        object: &TableName,
    ) -> Result<Vec<SimpleExpr>> {
        children.iter().map(|child| self.lower(child, object)).collect()
    }

    fn field(&mut self, cond: &FieldCondition, object: &TableName) -> Result<SimpleExpr> {
        let mismatch = || {
            QueryError::Schema(format!(
                "predicate {} doesn't apply to field '{}'",
                cond.predicate, cond.field.name
            ))
        };

        match (cond.field.kind, &cond.predicate) {
            (FieldKind::Scalar { column: name }, Predicate::Text(matcher)) => {
                Ok(match_text(column(object, name).into(), matcher))
            }
            (FieldKind::List { table, column: name }, Predicate::Text(matcher)) => {
                let (mut select, row) = self.rows_of(table, object);
                select.and_where(match_text(column(&row, name).into(), matcher));
                Ok(Expr::exists(select))
            }
            (FieldKind::Json { column: name }, Predicate::Text(matcher)) => {
                let target = if cond.remainder.is_empty() {
                    column(object, name).cast_as(Alias::new("text"))
                } else {
                    json_text(column(object, name), &cond.remainder)
                };
                Ok(match_text(target, matcher))
            }
            (FieldKind::Attribute, Predicate::Text(matcher)) => {
                let Some((key, path)) = cond.remainder.split_first() else {
                    return Err(mismatch());
                };
                let (mut select, row) = self.rows_of(ATTRIBUTE_TABLE, object);
                select
                    .and_where(column(&row, "key").eq(key.as_str()))
                    .and_where(match_text(json_text(column(&row, "value"), path), matcher));
                Ok(Expr::exists(select))
            }
            (FieldKind::Share, Predicate::Shared { matcher, visible }) => {
                let (mut select, row) = self.rows_of(PERMISSION_TABLE, object);
                select.and_where(match_text(column(&row, "group_name").into(), matcher));
                restrict_groups(&mut select, &row, visible);
                Ok(Expr::exists(select))
            }
            (FieldKind::Uploader, Predicate::Shared { matcher, visible }) => {
                let (mut select, row) = self.rows_of(PERMISSION_TABLE, object);
                select
                    .and_where(column(&row, "reason_type").eq("added"))
                    .and_where(match_text(column(&row, "related_user_login").into(), matcher));
                restrict_groups(&mut select, &row, visible);
                Ok(Expr::exists(select))
            }
            (FieldKind::Datetime { column: name }, Predicate::Datetime(bounds)) => {
                let bounds = Bounds::new(
                    map_bound(&bounds.low, |dt| dt.format(DATETIME_FORMAT).to_string()),
                    map_bound(&bounds.high, |dt| dt.format(DATETIME_FORMAT).to_string()),
                );
                Ok(within(object, name, bounds))
            }
            (FieldKind::Size { column: name }, Predicate::Size(bounds)) => {
                Ok(within(object, name, bounds.clone()))
            }
            (
                FieldKind::Datetime { column: name } | FieldKind::Size { column: name },
                Predicate::Text(Matcher::Any),
            ) => Ok(column(object, name).is_not_null()),
            _ => Err(mismatch()),
        }
    }

    /// `SELECT 1 FROM <table> AS rN WHERE rN.object_id = <object>.id`
    fn rows_of(&mut self, logical: &str, object: &TableName) -> (SelectStatement, TableName) {
        let row = self.alias("r");
        let mut select = Query::select();
        select
            .expr(Expr::val(1))
            .from_as(self.compiler.table_name(logical), row.clone())
            .and_where(
                column(&row, "object_id").equals((object.clone(), ColumnName("id".to_string()))),
            );
        (select, row)
    }

    /// Exists a relation row linking `object` to an object matching `inner`
    fn related(
        &mut self,
        direction: Direction,
        kind: ObjectKind,
        inner: &ConditionNode,
        object: &TableName,
    ) -> Result<SimpleExpr> {
        // `parent:` looks for rows where the object is the child, and the other way round.
        let (own, other) = match direction {
            Direction::Parent => ("child_id", "parent_id"),
            Direction::Child => ("parent_id", "child_id"),
        };

        let link = self.alias("r");
        let target = self.alias("o");

        let mut select = Query::select();
        select
            .expr(Expr::val(1))
            .from_as(self.compiler.table_name(RELATION_TABLE), link.clone())
            .join_as(
                JoinType::InnerJoin,
                self.compiler.table_name(OBJECT_TABLE),
                target.clone(),
                column(&target, "id").equals((link.clone(), ColumnName(other.to_string()))),
            )
            .and_where(column(&link, own).equals((object.clone(), ColumnName("id".to_string()))));
        if let Some(discriminator) = kind.discriminator() {
            select.and_where(column(&target, "type").eq(discriminator));
        }
        select.and_where(self.lower(inner, &target)?);

        Ok(Expr::exists(select))
    }
}

fn match_text(target: SimpleExpr, matcher: &Matcher) -> SimpleExpr {
    let target = Expr::expr(target);
    match matcher {
        Matcher::Any => target.is_not_null(),
        Matcher::Exact(value) => target.eq(value.as_str()),
        Matcher::Pattern(pattern) => {
            target.like(LikeExpr::new(pattern.as_str()).escape(LIKE_ESCAPE))
        }
    }
}

/// `<json> #>> '{a,b}'`: the value at a key path, as text
fn json_text(document: Expr, path: &[String]) -> SimpleExpr {
    let path = format!("{{{}}}", path.join(","));
    Expr::cust_with_exprs("$1 #>> $2", [SimpleExpr::from(document), Expr::val(path).into()])
}

fn restrict_groups(select: &mut SelectStatement, row: &TableName, visible: &Visibility) {
    if let Visibility::Groups(groups) = visible {
        select.and_where(column(row, "group_name").is_in(groups.iter().cloned()));
    }
}

fn map_bound<T, U>(bound: &Bound<T>, f: impl Fn(&T) -> U) -> Bound<U> {
    match bound {
        Bound::Included(v) => Bound::Included(f(v)),
        Bound::Excluded(v) => Bound::Excluded(f(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn within<T>(object: &TableName, name: &str, bounds: Bounds<T>) -> SimpleExpr
where
    T: Into<SimpleExpr>,
{
    let mut exprs = Vec::new();
    match bounds.low {
        Bound::Included(v) => exprs.push(column(object, name).gte(v)),
        Bound::Excluded(v) => exprs.push(column(object, name).gt(v)),
        Bound::Unbounded => {}
    }
    match bounds.high {
        Bound::Included(v) => exprs.push(column(object, name).lte(v)),
        Bound::Excluded(v) => exprs.push(column(object, name).lt(v)),
        Bound::Unbounded => {}
    }
    if exprs.is_empty() {
        return column(object, name).is_not_null();
    }
    combine(exprs, SimpleExpr::and, true)
}

/// Folds conditions with `op`; an empty list is `identity`
fn combine(
    conditions: Vec<SimpleExpr>,
    op: fn(SimpleExpr, SimpleExpr) -> SimpleExpr,
    identity: bool,
) -> SimpleExpr {
    conditions
        .into_iter()
        .reduce(op)
        .unwrap_or_else(|| Expr::val(identity).into())
}
