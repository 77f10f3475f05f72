//! # mwquery
//!
//! Compiles Lucene-style search queries over a malware-sample repository
//! into condition trees, and lowers those trees to PostgreSQL.
//!
//! ```text
//! "file.size:>1M AND tag:emotet"
//!   → parser::parse_query      (ast::Item)
//!   → compiler::QueryCompiler  (condition::ConditionNode)
//!   → sql_compiler::SqlCompiler (SQL)
//! ```

pub mod ast;
pub mod compiler;
pub mod condition;
pub mod config;
pub mod defaults;
pub mod error;
pub mod fields;
pub mod kind;
pub mod lexer;
pub mod parser;
pub mod range;
pub mod schema;
pub mod sql_compiler;
pub mod token;
pub mod value;

pub use compiler::{CompileOptions, CompiledQuery, QueryCompiler};
pub use condition::{ConditionNode, Visibility};
pub use config::SearchConfig;
pub use error::{QueryError, Result};
pub use kind::ObjectKind;
pub use parser::parse_query;
pub use sql_compiler::SqlCompiler;
