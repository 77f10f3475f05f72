//! The token definition for the Lucene query subset.

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Keywords (upper-case only, as in Lucene)
    And, // "AND" or "&&"
    Or,  // "OR" or "||"
    Not, // "NOT"
    To,  // "TO", only meaningful inside a range

    /// A field selector, without the trailing ':' (e.g. `file.meta.rule`)
    Field(&'a str),

    // Literals
    Word(&'a str),   // The raw word, escapes kept
    Phrase(&'a str), // The raw phrase, including quotes

    // Punctuation
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }

    // Special
    Illegal, // An unterminated phrase or a dangling escape
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
