//! Query tree compiler: walks the syntax tree and builds the condition tree.
//!
//! ## Compile flow
//!
//! ```text
//! compile()
//!   ├─ infer_kind()               narrow an `Object` root from the selectors it uses
//!   └─ compile_item()
//!        ├─ Word / Phrase / Range → leaf(): field in scope, else the default field
//!        ├─ SearchField           → resolve, then either
//!        │                            ├─ subquery(): relation over a group of fields
//!        │                            └─ compile_item() with the field in scope
//!        ├─ Group / FieldGroup    → Group
//!        └─ And / Or / Not        → same scope for every operand
//! ```
//!
//! The scope is a `Copy` value passed down by each call, so sibling operands
//! never see each other's narrowing.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::ast::{Item, MAX_NESTING};
use crate::condition::{ConditionNode, Operand, Visibility};
use crate::defaults;
use crate::error::{QueryError, Result};
use crate::fields::FieldContext;
use crate::kind::ObjectKind;
use crate::parser::parse_query;
use crate::range::QueryRange;
use crate::schema::{FieldDescriptor, FieldKind, SchemaRegistry};
use crate::value::QueryValue;

pub const DEFAULT_MAX_SUBQUERY_DEPTH: usize = 4;

/// Deepest syntax tree the compiler walks. Each nesting level of a parsed
/// query adds at most a group and an operator node.
const MAX_TREE_DEPTH: usize = 2 * MAX_NESTING + 4;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Kind the query is issued against
    pub kind: ObjectKind,
    pub visibility: Visibility,
    pub max_subquery_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            kind: ObjectKind::Object,
            visibility: Visibility::All,
            max_subquery_depth: DEFAULT_MAX_SUBQUERY_DEPTH,
        }
    }
}

/// Result of a compilation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    /// Top-level kind after narrowing
    pub kind: ObjectKind,
    pub condition: ConditionNode,
}

pub struct QueryCompiler<'r> {
    registry: &'r SchemaRegistry,
    options: CompileOptions,
}

#[derive(Debug, Clone, Copy)]
struct Scope<'s> {
    kind: ObjectKind,
    field: Option<FieldScope<'s>>,
    /// Sub-query depth
    depth: usize,
    /// Syntax tree depth
    nesting: usize,
}

impl Scope<'_> {
    fn root(kind: ObjectKind, depth: usize, nesting: usize) -> Self {
        Scope {
            kind,
            field: None,
            depth,
            nesting,
        }
    }

    fn descend(self) -> Result<Self> {
        if self.nesting >= MAX_TREE_DEPTH {
            return Err(too_deep());
        }
        Ok(Self {
            nesting: self.nesting + 1,
            ..self
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldScope<'s> {
    descriptor: FieldDescriptor,
    remainder: &'s [String],
}

impl QueryCompiler<'static> {
    /// Compiler over the process-wide registry
    pub fn new(options: CompileOptions) -> Self {
        Self::with_registry(SchemaRegistry::global(), options)
    }
}

impl Default for QueryCompiler<'static> {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl<'r> QueryCompiler<'r> {
    pub fn with_registry(registry: &'r SchemaRegistry, options: CompileOptions) -> Self {
        Self { registry, options }
    }

    /// Parses and compiles a query string.
    pub fn compile_str(&self, query: &str) -> Result<CompiledQuery> {
        let item = parse_query(query)?;
        self.compile(&item)
    }

    pub fn compile(&self, item: &Item) -> Result<CompiledQuery> {
        let kind = self.infer_kind(item, self.options.kind)?;
        let condition = self.compile_item(item, Scope::root(kind, 0, 0))?;
        debug!(%kind, fields = condition.field_count(), "compiled query");
        Ok(CompiledQuery { kind, condition })
    }

    fn context(&self) -> FieldContext<'_> {
        FieldContext {
            registry: self.registry,
            visibility: &self.options.visibility,
        }
    }

    fn compile_item(&self, item: &Item, scope: Scope<'_>) -> Result<ConditionNode> {
        let scope = scope.descend()?;
        match item {
            Item::Word(literal) => {
                self.leaf(Operand::Value(QueryValue::from_word(&literal.raw)), scope)
            }
            Item::Phrase(literal) => {
                self.leaf(Operand::Value(QueryValue::from_phrase(&literal.raw)), scope)
            }
            Item::Range(range) => self.leaf(Operand::Range(QueryRange::from_item(range)), scope),
            Item::SearchField { selector, expr, .. } => self.search_field(selector, expr, scope),
            Item::Group(inner) | Item::FieldGroup(inner) => {
                Ok(ConditionNode::Group(Box::new(self.compile_item(inner, scope)?)))
            }
            Item::And(items) => Ok(ConditionNode::And(self.compile_all(items, scope)?)),
            Item::Or(items) => Ok(ConditionNode::Or(self.compile_all(items, scope)?)),
            Item::Not(inner) => Ok(ConditionNode::Not(Box::new(self.compile_item(inner, scope)?))),
        }
    }

    fn compile_all(&self, items: &[Item], scope: Scope<'_>) -> Result<Vec<ConditionNode>> {
        items.iter().map(|item| self.compile_item(item, scope)).collect()
    }

    fn leaf(&self, operand: Operand, scope: Scope<'_>) -> Result<ConditionNode> {
        if let Some(field) = scope.field {
            return field.descriptor.condition(operand, field.remainder, self.context());
        }

        match operand {
            Operand::Value(value) => {
                let (descriptor, value) = defaults::infer(self.registry, scope.kind, &value)?;
                descriptor.condition(Operand::Value(value), &[], self.context())
            }
            Operand::Range(range) => Err(QueryError::FieldNotQueryable(format!(
                "Range {} needs a field",
                range.describe()
            ))),
        }
    }

    fn search_field(&self, selector: &str, expr: &Item, scope: Scope<'_>) -> Result<ConditionNode> {
        if let Some(outer) = scope.field {
            return Err(QueryError::UnsupportedGrammar(format!(
                "Field '{selector}' can't be nested inside '{}'",
                outer.descriptor.name
            )));
        }

        let resolved = self.registry.resolve(scope.kind, selector)?;
        trace!(selector, kind = %resolved.kind, field = resolved.field.name, "resolved field");

        if matches!(resolved.field.kind, FieldKind::Relation { .. })
            && resolved.remainder.is_empty()
            && has_fields(expr, MAX_TREE_DEPTH.saturating_sub(scope.nesting))
        {
            return self.subquery(resolved.field, expr, scope);
        }

        let scope = Scope {
            kind: resolved.kind,
            field: Some(FieldScope {
                descriptor: resolved.field,
                remainder: &resolved.remainder,
            }),
            ..scope
        };
        self.compile_item(expr, scope)
    }

    /// `child:(type:"config" AND family:"evil")`: the group is a query of its own
    /// over the related objects.
    fn subquery(
        &self,
        field: FieldDescriptor,
        expr: &Item,
        scope: Scope<'_>,
    ) -> Result<ConditionNode> {
        let depth = scope.depth + 1;
        if depth > self.options.max_subquery_depth {
            return Err(QueryError::UnsupportedGrammar(format!(
                "Sub-queries nested deeper than {} levels",
                self.options.max_subquery_depth
            )));
        }

        let body = match expr {
            Item::FieldGroup(inner) => inner.as_ref(),
            other => other,
        };
        let kind = self.infer_kind(body, ObjectKind::Object)?;
        debug!(field = field.name, %kind, depth, "entering sub-query");

        let inner = self.compile_item(body, Scope::root(kind, depth, scope.nesting))?;
        Ok(ConditionNode::Subquery {
            field,
            kind,
            inner: Box::new(inner),
        })
    }

    /// Narrows an `Object` scope to the kinds its selectors agree on.
    fn infer_kind(&self, item: &Item, kind: ObjectKind) -> Result<ObjectKind> {
        if kind.is_concrete() {
            return Ok(kind);
        }

        let mut constraints = Vec::new();
        self.collect_constraints(item, 0, &mut constraints)?;
        // Selectors that pin a single kind go first, so a conflict names the
        // kind a selector actually asked for.
        constraints.sort_by_key(BTreeSet::len);

        let mut allowed: BTreeSet<ObjectKind> = ObjectKind::CONCRETE.into_iter().collect();
        for constraint in constraints {
            let narrowed: BTreeSet<ObjectKind> =
                allowed.intersection(&constraint).copied().collect();
            if narrowed.is_empty() {
                let first = allowed.first().copied().unwrap_or(ObjectKind::Object);
                let second = constraint.first().copied().unwrap_or(ObjectKind::Object);
                return Err(QueryError::MultipleKindsQueried { first, second });
            }
            allowed = narrowed;
        }

        let inferred = match allowed.iter().collect::<Vec<_>>().as_slice() {
            [only] => **only,
            _ => ObjectKind::Object,
        };
        if inferred != kind {
            debug!(from = %kind, to = %inferred, "narrowed queried kind");
        }
        Ok(inferred)
    }

    /// Kinds each selector of the scope allows. Field values and sub-queries
    /// are not descended into.
    fn collect_constraints(
        &self,
        item: &Item,
        nesting: usize,
        out: &mut Vec<BTreeSet<ObjectKind>>,
    ) -> Result<()> {
        if nesting >= MAX_TREE_DEPTH {
            return Err(too_deep());
        }

        match item {
            Item::SearchField { selector, .. } => {
                let mut path = selector.split('.');
                let head = path.next().unwrap_or_default();
                match ObjectKind::from_selector(head) {
                    Some(kind) if kind.is_concrete() => {
                        out.push(BTreeSet::from([kind]));
                    }
                    Some(_) => {}
                    None if self.registry.fields(ObjectKind::Object)?.contains_key(head) => {}
                    None => {
                        let owners = self.registry.owners(head);
                        if !owners.is_empty() {
                            out.push(owners.into_iter().collect());
                        }
                    }
                }
            }
            Item::Group(inner) | Item::FieldGroup(inner) | Item::Not(inner) => {
                self.collect_constraints(inner, nesting + 1, out)?;
            }
            Item::And(items) | Item::Or(items) => {
                for item in items {
                    self.collect_constraints(item, nesting + 1, out)?;
                }
            }
            Item::Word(_) | Item::Phrase(_) | Item::Range(_) => {}
        }
        Ok(())
    }
}

fn too_deep() -> QueryError {
    QueryError::UnsupportedGrammar(format!("Query nested deeper than {MAX_TREE_DEPTH} levels"))
}

/// Whether a field selector occurs within `budget` levels of `item`
fn has_fields(item: &Item, budget: usize) -> bool {
    let Some(budget) = budget.checked_sub(1) else {
        return false;
    };
    match item {
        Item::SearchField { .. } => true,
        Item::Group(inner) | Item::FieldGroup(inner) | Item::Not(inner) => {
            has_fields(inner, budget)
        }
        Item::And(items) | Item::Or(items) => items.iter().any(|item| has_fields(item, budget)),
        Item::Word(_) | Item::Phrase(_) | Item::Range(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Matcher, Predicate};

    fn compile(query: &str) -> Result<CompiledQuery> {
        QueryCompiler::default().compile_str(query)
    }

    fn compile_as(kind: ObjectKind, query: &str) -> Result<CompiledQuery> {
        QueryCompiler::new(CompileOptions { kind, ..CompileOptions::default() }).compile_str(query)
    }

    fn field_name(node: &ConditionNode) -> &'static str {
        match node {
            ConditionNode::Field(cond) => cond.field.name,
            other => panic!("expected field condition, got {other:?}"),
        }
    }

    #[test]
    fn test_single_field() {
        let query = compile(r#"tag:"malware""#).unwrap();
        assert_eq!(query.kind, ObjectKind::Object);
        assert_eq!(query.condition.to_string(), r#"tag="malware""#);
    }

    #[test]
    fn test_not_group_keeps_structure() {
        let query = compile(r#"NOT (tag:"a" OR tag:"b")"#).unwrap();

        let ConditionNode::Not(inner) = &query.condition else { panic!("expected NOT") };
        let ConditionNode::Group(group) = inner.as_ref() else { panic!("expected group") };
        let ConditionNode::Or(operands) = group.as_ref() else { panic!("expected OR") };
        assert_eq!(operands.len(), 2);
        assert!(operands.iter().all(|op| field_name(op) == "tag"));
        assert_eq!(query.condition.to_string(), r#"(not (or tag="a" tag="b"))"#);
    }

    #[test]
    fn test_conflicting_kind_prefixes() {
        let err = compile(r#"file.md5:"abc" AND config.family:"foo""#).unwrap_err();
        assert_eq!(
            err,
            QueryError::MultipleKindsQueried { first: ObjectKind::File, second: ObjectKind::Config }
        );
    }

    #[test]
    fn test_kind_prefix_with_shared_field() {
        let query = compile(r#"file.md5:"abc" AND tag:"x""#).unwrap();
        assert_eq!(query.kind, ObjectKind::File);
        let ConditionNode::And(operands) = &query.condition else { panic!("expected AND") };
        assert_eq!(field_name(&operands[0]), "md5");
        assert_eq!(field_name(&operands[1]), "tag");
    }

    #[test]
    fn test_unprefixed_field_narrows() {
        let query = compile("family:emotet").unwrap();
        assert_eq!(query.kind, ObjectKind::Config);

        let err = compile("family:emotet AND md5:abc").unwrap_err();
        assert!(matches!(err, QueryError::MultipleKindsQueried { .. }));
    }

    #[test]
    fn test_ambiguous_field_stays_object() {
        // `type` exists on every concrete kind, so nothing narrows it.
        let err = compile("type:exe").unwrap_err();
        assert!(matches!(err, QueryError::FieldNotQueryable(_)));

        let query = compile("file.type:exe").unwrap();
        assert_eq!(query.kind, ObjectKind::File);
    }

    #[test]
    fn test_concrete_kind_rejects_other_prefix() {
        let err = compile_as(ObjectKind::File, "config.family:x").unwrap_err();
        assert_eq!(
            err,
            QueryError::MultipleKindsQueried { first: ObjectKind::File, second: ObjectKind::Config }
        );
    }

    #[test]
    fn test_bare_hash_under_file() {
        let query = compile_as(ObjectKind::File, "d41d8cd98f00b204e9800998ecf8427e").unwrap();
        let ConditionNode::Field(cond) = &query.condition else { panic!("expected field") };
        assert_eq!(cond.field.name, "md5");
        assert_eq!(
            cond.predicate,
            Predicate::Text(Matcher::Exact("d41d8cd98f00b204e9800998ecf8427e".to_string()))
        );
    }

    #[test]
    fn test_bare_hash_under_blob() {
        let query = compile_as(ObjectKind::TextBlob, "d41d8cd98f00b204e9800998ecf8427e").unwrap();
        let ConditionNode::Field(cond) = &query.condition else { panic!("expected field") };
        assert_eq!(cond.field.name, "content");
        assert_eq!(
            cond.predicate,
            Predicate::Text(Matcher::Pattern("%d41d8cd98f00b204e9800998ecf8427e%".to_string()))
        );
    }

    #[test]
    fn test_bare_term_under_object() {
        let err = compile("emotet").unwrap_err();
        assert!(matches!(err, QueryError::FieldNotQueryable(_)));
    }

    #[test]
    fn test_unknown_field_under_every_kind() {
        for kind in [ObjectKind::Object, ObjectKind::File, ObjectKind::Config, ObjectKind::TextBlob]
        {
            let err = compile_as(kind, "foo.bar:x").unwrap_err();
            assert!(matches!(err, QueryError::FieldNotQueryable(_)), "{kind}");
        }
    }

    #[test]
    fn test_subquery_infers_inner_kind() {
        let query = compile(r#"child:(type:"config" AND family:"evil")"#).unwrap();
        assert_eq!(query.kind, ObjectKind::Object);

        let ConditionNode::Subquery { field, kind, inner } = &query.condition else {
            panic!("expected sub-query")
        };
        assert_eq!(field.name, "child");
        assert_eq!(*kind, ObjectKind::Config);
        let ConditionNode::And(operands) = inner.as_ref() else { panic!("expected AND") };
        assert_eq!(operands.len(), 2);
        let ConditionNode::Field(type_cond) = &operands[0] else { panic!("expected field") };
        assert_eq!(type_cond.field.kind, FieldKind::Scalar { column: "config_type" });
    }

    #[test]
    fn test_subquery_leaves_outer_kind() {
        let query =
            compile_as(ObjectKind::File, "parent:(config.family:emotet) AND size:>1K").unwrap();
        assert_eq!(query.kind, ObjectKind::File);
        let ConditionNode::And(operands) = &query.condition else { panic!("expected AND") };
        assert!(matches!(operands[0], ConditionNode::Subquery { kind: ObjectKind::Config, .. }));
        assert_eq!(field_name(&operands[1]), "size");
    }

    #[test]
    fn test_subquery_selectors_do_not_narrow_outer_scope() {
        let query = compile("parent:(family:x) AND file.name:y").unwrap();
        assert_eq!(query.kind, ObjectKind::File);
    }

    #[test]
    fn test_relation_with_plain_values() {
        let query = compile("parent:(abc OR def)").unwrap();
        let ConditionNode::Group(group) = &query.condition else { panic!("expected group") };
        let ConditionNode::Or(operands) = group.as_ref() else { panic!("expected OR") };
        for operand in operands {
            let ConditionNode::Subquery { inner, .. } = operand else {
                panic!("expected sub-query")
            };
            assert_eq!(field_name(inner), "dhash");
        }
    }

    #[test]
    fn test_subquery_depth_limit() {
        let options = CompileOptions { max_subquery_depth: 1, ..CompileOptions::default() };
        let compiler = QueryCompiler::new(options);
        assert!(compiler.compile_str("child:(tag:a)").is_ok());

        let err = compiler.compile_str("child:(child:(tag:a))").unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedGrammar(_)));
    }

    #[test]
    fn test_nested_field_in_field_scope() {
        let err = compile("tag:(comment:x)").unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedGrammar(_)));
    }

    #[test]
    fn test_field_group_applies_field_to_each_term() {
        let query = compile("tag:(emotet OR trickbot)").unwrap();
        assert_eq!(query.condition.to_string(), r#"(or tag="emotet" tag="trickbot")"#);
        assert!(matches!(query.condition, ConditionNode::Group(_)));
    }

    #[test]
    fn test_range_terms() {
        let query = compile("file.size:[1K TO 2K}").unwrap();
        let ConditionNode::Field(cond) = &query.condition else { panic!("expected field") };
        assert!(matches!(cond.operand, Operand::Range(_)));
        assert!(matches!(cond.predicate, Predicate::Size(_)));

        let err = compile("[1 TO 2]").unwrap_err();
        assert!(matches!(err, QueryError::FieldNotQueryable(_)));

        let err = compile("tag:[a TO b]").unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedValueForField { .. }));
    }

    #[test]
    fn test_shared_uses_compiler_visibility() {
        let options = CompileOptions {
            visibility: Visibility::groups(["public"]),
            ..CompileOptions::default()
        };
        let query = QueryCompiler::new(options).compile_str("shared:cert").unwrap();
        let ConditionNode::Field(cond) = &query.condition else { panic!("expected field") };
        assert_eq!(
            cond.predicate,
            Predicate::Shared {
                matcher: Matcher::Exact("cert".to_string()),
                visible: Visibility::groups(["public"]),
            }
        );
    }

    #[test]
    fn test_syntax_errors_surface() {
        assert!(matches!(compile("tag:(a OR"), Err(QueryError::Syntax(_))));
    }

    #[test]
    fn test_kind_conflict_names_the_pinned_kind() {
        // `name` exists on File and TextBlob; `family` only on Config.
        let err = compile("name:x AND family:y").unwrap_err();
        assert_eq!(
            err,
            QueryError::MultipleKindsQueried { first: ObjectKind::Config, second: ObjectKind::File }
        );

        let err = compile("family:y AND md5:x").unwrap_err();
        assert_eq!(
            err,
            QueryError::MultipleKindsQueried { first: ObjectKind::Config, second: ObjectKind::File }
        );
    }

    #[test]
    fn test_hand_built_tree() {
        let item = Item::And(vec![
            Item::field("file.name", Item::word("*.exe")),
            Item::field("tag", Item::phrase("\"dropper\"")),
        ]);
        let query = QueryCompiler::default().compile(&item).unwrap();
        assert_eq!(query.kind, ObjectKind::File);
        assert_eq!(query.condition.to_string(), r#"(and name~"%.exe" tag="dropper")"#);
    }

    #[test]
    fn test_deep_tree_is_rejected() {
        let mut item = Item::field("tag", Item::word("a"));
        for _ in 0..1_000 {
            item = Item::Not(Box::new(item));
        }

        let err = QueryCompiler::default().compile(&item).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedGrammar(_)), "{err}");

        // A concrete kind skips inference and walks the tree directly
        let file = QueryCompiler::new(CompileOptions {
            kind: ObjectKind::File,
            ..CompileOptions::default()
        });
        let err = file.compile(&item).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedGrammar(_)), "{err}");
    }

    #[test]
    fn test_deepest_parsed_query_compiles() {
        let query = format!("{}tag:b{}", "tag:a (".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(compile(&query).is_ok());

        let levels = MAX_NESTING / 2;
        let query = format!("{}tag:a{}", "NOT (".repeat(levels), ")".repeat(levels));
        assert!(compile(&query).is_ok());
    }

    #[test]
    fn test_compiler_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QueryCompiler<'static>>();
    }
}
