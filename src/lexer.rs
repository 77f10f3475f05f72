//! Lucene查询子集的词法分析器
//!
//! 单词原样保留反斜杠转义，转义统一在值解析阶段处理。

use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    /// 跳过空白字符
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// 读取双引号包围的短语
    /// 注意：开始的引号已经被调用者消费
    fn read_phrase(&mut self, start: usize) -> Token<'a> {
        loop {
            match self.bump() {
                Some('\\') => {
                    if self.bump().is_none() {
                        break;
                    }
                }
                Some('"') => {
                    return Token {
                        kind: TokenKind::Phrase(&self.input[start..self.position]),
                        span: Span::new(start, self.position),
                    };
                }
                Some(_) => {}
                None => break,
            }
        }
        Token { kind: TokenKind::Illegal, span: Span::new(start, self.position) }
    }

    /// 读取单词、关键字或字段选择器
    ///
    /// 只有已读取的部分符合字段路径格式时，':' 才把它结束为字段选择器；
    /// 否则 ':' 属于单词本身，`>=2021-03-01T10:00` 这类时间戳因此保持完整。
    fn read_word(&mut self, start: usize) -> Token<'a> {
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.bump();
                    if self.bump().is_none() {
                        return Token {
                            kind: TokenKind::Illegal,
                            span: Span::new(start, self.position),
                        };
                    }
                }
                ':' => {
                    let literal = &self.input[start..self.position];
                    if is_field_path(literal) {
                        self.bump(); // 消费 ':'
                        return Token {
                            kind: TokenKind::Field(literal),
                            span: Span::new(start, self.position),
                        };
                    }
                    self.bump();
                }
                c if is_delimiter(c) => break,
                _ => {
                    self.bump();
                }
            }
        }

        let literal = &self.input[start..self.position];
        Token { kind: match_keyword(literal), span: Span::new(start, self.position) }
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"')
}

fn is_field_path(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !s.ends_with('.') && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn match_keyword(s: &str) -> TokenKind {
    match s {
        "AND" | "&&" => TokenKind::And,
        "OR" | "||" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "TO" => TokenKind::To,
        _ => TokenKind::Word(s),
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.position;

        let c = self.bump()?;

        let token = match c {
            '(' => Token { kind: TokenKind::LParen, span: Span::new(start, self.position) },
            ')' => Token { kind: TokenKind::RParen, span: Span::new(start, self.position) },
            '[' => Token { kind: TokenKind::LBracket, span: Span::new(start, self.position) },
            ']' => Token { kind: TokenKind::RBracket, span: Span::new(start, self.position) },
            '{' => Token { kind: TokenKind::LBrace, span: Span::new(start, self.position) },
            '}' => Token { kind: TokenKind::RBrace, span: Span::new(start, self.position) },
            '"' => self.read_phrase(start),
            _ => {
                // 回退一个字符，让单词读取器从第一个字符开始（可能是转义符）
                self.position = start;
                self.read_word(start)
            }
        };
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind<'_>> {
        Lexer::new(input).map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_field() {
        let input = r#"tag:"malware""#;
        let mut lexer = Lexer::new(input);

        assert_eq!(lexer.next().unwrap().kind, TokenKind::Field("tag"));
        assert_eq!(lexer.next().unwrap().kind, TokenKind::Phrase("\"malware\""));
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn test_punctuation_and_keywords() {
        assert_eq!(
            kinds("( ) [ ] { } AND OR NOT TO && ||"),
            vec![
                TokenKind::LParen, TokenKind::RParen, TokenKind::LBracket, TokenKind::RBracket,
                TokenKind::LBrace, TokenKind::RBrace, TokenKind::And, TokenKind::Or,
                TokenKind::Not, TokenKind::To, TokenKind::And, TokenKind::Or,
            ]
        );
    }

    #[test]
    fn test_lowercase_operators_are_words() {
        assert_eq!(kinds("and or"), vec![TokenKind::Word("and"), TokenKind::Word("or")]);
    }

    #[test]
    fn test_dotted_selector_and_wildcard() {
        assert_eq!(
            kinds(r"file.meta.rule_name:emo*"),
            vec![TokenKind::Field("file.meta.rule_name"), TokenKind::Word("emo*")]
        );
    }

    #[test]
    fn test_escapes_stay_in_word() {
        assert_eq!(
            kinds(r"name:a\:b\ c"),
            vec![TokenKind::Field("name"), TokenKind::Word(r"a\:b\ c")]
        );
    }

    #[test]
    fn test_timestamp_keeps_colons() {
        assert_eq!(
            kinds("upload_time:>=2021-03-01T10:00:00"),
            vec![TokenKind::Field("upload_time"), TokenKind::Word(">=2021-03-01T10:00:00")]
        );
    }

    #[test]
    fn test_range_tokens() {
        assert_eq!(
            kinds("size:[10 TO 20}"),
            vec![
                TokenKind::Field("size"),
                TokenKind::LBracket,
                TokenKind::Word("10"),
                TokenKind::To,
                TokenKind::Word("20"),
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn test_phrase_with_escaped_quote() {
        assert_eq!(kinds(r#""say \"hi\"""#), vec![TokenKind::Phrase(r#""say \"hi\"""#)]);
    }

    #[test]
    fn test_unterminated_phrase_is_illegal() {
        let tokens: Vec<_> = Lexer::new(r#"tag:"open"#).collect();
        assert_eq!(tokens[1].kind, TokenKind::Illegal);
        assert_eq!(tokens[1].span, Span::new(4, 9));
    }

    #[test]
    fn test_subquery_tokens() {
        assert_eq!(
            kinds(r#"child:(type:"config" AND family:evil)"#),
            vec![
                TokenKind::Field("child"),
                TokenKind::LParen,
                TokenKind::Field("type"),
                TokenKind::Phrase("\"config\""),
                TokenKind::And,
                TokenKind::Field("family"),
                TokenKind::Word("evil"),
                TokenKind::RParen,
            ]
        );
    }
}
