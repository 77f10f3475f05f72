//! Error types for query compilation.

use thiserror::Error;

use crate::kind::ObjectKind;
use crate::parser::ParseError;

pub type Result<T, E = QueryError> = std::result::Result<T, E>;

/// Errors raised while turning a query into a condition tree.
///
/// Everything except [`QueryError::Schema`] is caused by the query text and
/// should be reported back to the user as-is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Unknown selector, missing attribute key or a bare term with no default field
    #[error("field not queryable: {0}")]
    FieldNotQueryable(String),

    #[error("can't search for objects with type '{first}' and '{second}' in the same query")]
    MultipleKindsQueried { first: ObjectKind, second: ObjectKind },

    /// Value shape doesn't fit the field's type
    #[error("unsupported value '{value}' for field '{field}': {reason}")]
    UnsupportedValueForField {
        field: String,
        value: String,
        reason: String,
    },

    /// Valid syntax the compiler refuses to interpret
    #[error("unsupported grammar: {0}")]
    UnsupportedGrammar(String),

    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),

    /// Registry inconsistency; never caused by user input
    #[error("schema error: {0}")]
    Schema(String),
}

impl QueryError {
    pub(crate) fn unsupported_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsupportedValueForField {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error stems from the query itself rather than from the schema
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::Schema(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = QueryError::MultipleKindsQueried {
            first: ObjectKind::File,
            second: ObjectKind::Config,
        };
        assert_eq!(
            err.to_string(),
            "can't search for objects with type 'File' and 'Config' in the same query"
        );

        let err = QueryError::unsupported_value("size", "10Q", "unknown size unit");
        assert_eq!(err.to_string(), "unsupported value '10Q' for field 'size': unknown size unit");
    }

    #[test]
    fn test_schema_errors_are_internal() {
        assert!(QueryError::FieldNotQueryable("foo".into()).is_user_error());
        assert!(!QueryError::Schema("missing table".into()).is_user_error());
    }
}
