//! Field schema registry: which fields each object kind exposes to search.
//!
//! The registry is built once and never mutated, so a single instance is
//! shared by every compilation.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::error::{QueryError, Result};
use crate::kind::ObjectKind;

static REGISTRY: LazyLock<SchemaRegistry> = LazyLock::new(SchemaRegistry::new);

/// Storage-facing semantics of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Single column on the object table
    Scalar { column: &'static str },
    /// Rows of a related table, matched on one of their columns
    List { table: &'static str, column: &'static str },
    /// Structured document column, addressed by the remainder path
    Json { column: &'static str },
    /// Named attribute; the first remainder segment is the key
    Attribute,
    Relation { direction: Direction },
    /// Share grants, matched on group name
    Share,
    /// Upload grants, matched on the uploading user
    Uploader,
    Datetime { column: &'static str },
    Size { column: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Parent,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub owner: ObjectKind,
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    const fn new(owner: ObjectKind, name: &'static str, kind: FieldKind) -> Self {
        Self { owner, name, kind }
    }
}

/// A resolved field selector
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub field: FieldDescriptor,
    /// Path segments left for the field itself to interpret
    pub remainder: Vec<String>,
    /// Kind the selector narrows the query to
    pub kind: ObjectKind,
}

#[derive(Debug)]
pub struct SchemaRegistry {
    tables: HashMap<ObjectKind, BTreeMap<&'static str, FieldDescriptor>>,
}

impl SchemaRegistry {
    /// The process-wide registry
    pub fn global() -> &'static Self {
        &REGISTRY
    }

    pub fn new() -> Self {
        use FieldKind::*;
        use ObjectKind::*;

        let object = [
            FieldDescriptor::new(Object, "dhash", Scalar { column: "dhash" }),
            FieldDescriptor::new(Object, "tag", List { table: "tag", column: "tag" }),
            FieldDescriptor::new(Object, "comment", List { table: "comment", column: "comment" }),
            FieldDescriptor::new(Object, "meta", Attribute),
            FieldDescriptor::new(Object, "shared", Share),
            FieldDescriptor::new(Object, "uploader", Uploader),
            FieldDescriptor::new(Object, "upload_time", Datetime { column: "upload_time" }),
            FieldDescriptor::new(Object, "parent", Relation { direction: Direction::Parent }),
            FieldDescriptor::new(Object, "child", Relation { direction: Direction::Child }),
            FieldDescriptor::new(
                Object,
                "favorites",
                List { table: "favorite", column: "user_login" },
            ),
        ];
        let file = [
            FieldDescriptor::new(File, "name", Scalar { column: "file_name" }),
            FieldDescriptor::new(File, "size", Size { column: "file_size" }),
            FieldDescriptor::new(File, "type", Scalar { column: "file_type" }),
            FieldDescriptor::new(File, "md5", Scalar { column: "md5" }),
            FieldDescriptor::new(File, "sha1", Scalar { column: "sha1" }),
            FieldDescriptor::new(File, "sha256", Scalar { column: "sha256" }),
            FieldDescriptor::new(File, "sha512", Scalar { column: "sha512" }),
            FieldDescriptor::new(File, "ssdeep", Scalar { column: "ssdeep" }),
            FieldDescriptor::new(File, "crc32", Scalar { column: "crc32" }),
        ];
        let config = [
            FieldDescriptor::new(Config, "type", Scalar { column: "config_type" }),
            FieldDescriptor::new(Config, "family", Scalar { column: "family" }),
            FieldDescriptor::new(Config, "cfg", Json { column: "cfg" }),
        ];
        let blob = [
            FieldDescriptor::new(TextBlob, "name", Scalar { column: "blob_name" }),
            FieldDescriptor::new(TextBlob, "size", Size { column: "blob_size" }),
            FieldDescriptor::new(TextBlob, "type", Scalar { column: "blob_type" }),
            FieldDescriptor::new(TextBlob, "content", Scalar { column: "content" }),
            FieldDescriptor::new(TextBlob, "first_seen", Datetime { column: "upload_time" }),
            FieldDescriptor::new(TextBlob, "last_seen", Datetime { column: "last_seen" }),
        ];

        let mut tables = HashMap::new();
        tables.insert(Object, index(&object));
        tables.insert(File, index(&file));
        tables.insert(Config, index(&config));
        tables.insert(TextBlob, index(&blob));
        Self { tables }
    }

    pub fn fields(&self, kind: ObjectKind) -> Result<&BTreeMap<&'static str, FieldDescriptor>> {
        self.tables
            .get(&kind)
            .ok_or_else(|| QueryError::Schema(format!("no field table registered for {kind}")))
    }

    /// Looks a field up in the kind's own table, then in the shared `Object` table
    pub fn lookup(&self, kind: ObjectKind, name: &str) -> Result<Option<FieldDescriptor>> {
        if let Some(field) = self.fields(kind)?.get(name) {
            return Ok(Some(*field));
        }
        Ok(self.fields(ObjectKind::Object)?.get(name).copied())
    }

    /// A field the code itself depends on; missing means the registry is broken
    pub fn expect_field(&self, kind: ObjectKind, name: &str) -> Result<FieldDescriptor> {
        self.fields(kind)?
            .get(name)
            .copied()
            .ok_or_else(|| QueryError::Schema(format!("{kind} has no '{name}' field")))
    }

    /// Concrete kinds that define `name` in their own table
    pub fn owners(&self, name: &str) -> Vec<ObjectKind> {
        ObjectKind::CONCRETE
            .into_iter()
            .filter(|kind| self.tables.get(kind).is_some_and(|t| t.contains_key(name)))
            .collect()
    }

    /// Resolves a dotted selector such as `file.meta.rule_name` under the queried kind.
    pub fn resolve(&self, queried: ObjectKind, selector: &str) -> Result<Resolved> {
        let mut path = selector.split('.');
        let mut head = path.next();

        let mut kind = queried;
        if let Some(selected) = head.and_then(ObjectKind::from_selector) {
            // The kind prefix decides the queried type, so two different
            // concrete kinds can't meet in one query.
            kind = selected
                .narrow(queried)
                .ok_or(QueryError::MultipleKindsQueried { first: queried, second: selected })?;
            head = path.next();
        }

        let Some(name) = head else {
            return Err(QueryError::FieldNotQueryable(format!("No such field: {selector}")));
        };

        let field = self
            .lookup(kind, name)?
            .ok_or_else(|| QueryError::FieldNotQueryable(format!("No such field: {selector}")))?;

        Ok(Resolved {
            field,
            remainder: path.map(str::to_string).collect(),
            kind,
        })
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn index(fields: &[FieldDescriptor]) -> BTreeMap<&'static str, FieldDescriptor> {
    fields.iter().map(|f| (f.name, *f)).collect()
}
