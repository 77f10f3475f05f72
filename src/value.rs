//! Resolution of raw Lucene literals into query values.
//!
//! Lucene marks wildcards with `*` (any run of characters) and `?` (exactly
//! one character); a backslash makes the next character literal. The store
//! side speaks SQL `LIKE`, where `%` and `_` are the wildcards and `\` is the
//! escape character, so a wildcard literal has to be re-encoded before it can be
//! used as a pattern.

use serde::Serialize;

/// Escape character used in every `LIKE` pattern produced by this crate
pub const LIKE_ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryValue {
    /// Lucene value: unquoted, escapes and wildcard markers kept
    pub value: String,
    /// Value with escapes removed
    pub unescaped_value: String,
    pub has_wildcard: bool,
    /// The literal is the lone `*`: "field exists" rather than a pattern
    pub is_match_all: bool,
}

impl QueryValue {
    pub fn from_word(raw: &str) -> Self {
        Self::from_unquoted(raw)
    }

    pub fn from_phrase(raw: &str) -> Self {
        Self::from_unquoted(unquote(raw))
    }

    fn from_unquoted(value: &str) -> Self {
        Self {
            value: value.to_string(),
            unescaped_value: unescape(value),
            has_wildcard: has_wildcard(value),
            is_match_all: value == "*",
        }
    }

    /// Store-safe rendering: a `LIKE` pattern when the value has wildcards,
    /// the plain unescaped value otherwise.
    pub fn sql_value(&self) -> String {
        if !self.has_wildcard {
            return self.unescaped_value.clone();
        }

        let mut out = String::with_capacity(self.value.len() + 4);
        let mut chars = self.value.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => push_like_literal(&mut out, chars.next().unwrap_or('\\')),
                '*' => out.push('%'),
                '?' => out.push('_'),
                other => push_like_literal(&mut out, other),
            }
        }
        out
    }

    /// The same literal wrapped as `*value*`
    pub fn substring(&self) -> Self {
        Self::from_unquoted(&format!("*{}*", self.value))
    }
}

/// Escapes `LIKE` special characters of a plain string
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        push_like_literal(&mut out, c);
    }
    out
}

fn push_like_literal(out: &mut String, c: char) {
    if matches!(c, '%' | '_' | LIKE_ESCAPE) {
        out.push(LIKE_ESCAPE);
    }
    out.push(c);
}

fn unquote(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next().unwrap_or('\\'));
        } else {
            out.push(c);
        }
    }
    out
}

fn has_wildcard(value: &str) -> bool {
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' => return true,
            _ => {}
        }
    }
    false
}
