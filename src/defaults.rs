//! Default field for bare terms, picked from the queried kind and the shape of the literal.

use tracing::debug;

use crate::error::{QueryError, Result};
use crate::kind::ObjectKind;
use crate::schema::{FieldDescriptor, SchemaRegistry};
use crate::value::QueryValue;

/// Hash fields by the hex length of their digest
const HASH_FIELDS: [(usize, &str); 5] = [
    (8, "crc32"),
    (32, "md5"),
    (40, "sha1"),
    (64, "sha256"),
    (128, "sha512"),
];

/// Field a bare literal is matched against under `kind`, together with the
/// value to match. Config and blob terms become substring searches.
pub fn infer(
    registry: &SchemaRegistry,
    kind: ObjectKind,
    value: &QueryValue,
) -> Result<(FieldDescriptor, QueryValue)> {
    let (name, value) = match kind {
        ObjectKind::File => (hash_field(value).unwrap_or("name"), value.clone()),
        ObjectKind::Config => ("cfg", value.substring()),
        ObjectKind::TextBlob => ("content", value.substring()),
        ObjectKind::Object => {
            return Err(QueryError::FieldNotQueryable(format!(
                "Field doesn't exist ('{}' needs a field name when searching all objects)",
                value.value
            )))
        }
    };

    debug!(%kind, field = name, value = %value.value, "inferred default field");
    Ok((registry.expect_field(kind, name)?, value))
}

fn hash_field(value: &QueryValue) -> Option<&'static str> {
    if value.has_wildcard {
        return None;
    }
    let text = value.unescaped_value.as_str();
    if !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    HASH_FIELDS
        .iter()
        .find(|(len, _)| *len == text.len())
        .map(|(_, name)| *name)
}
