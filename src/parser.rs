//! Lucene查询子集的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   └─ parse_or_expression()
//!        ├─ parse_and_expression()
//!        │    ├─ parse_not_expression()
//!        │    │    └─ parse_primary_expression()
//!        │    │         ├─ "(" → 分组表达式 (递归调用parse_or_expression)
//!        │    │         ├─ 字段 → parse_field_value()
//!        │    │         │            ├─ "(" → 字段分组
//!        │    │         │            ├─ "[" / "{" → 范围
//!        │    │         │            └─ 单词 / 短语
//!        │    │         ├─ "[" / "{" → 范围
//!        │    │         └─ 单词 / 短语
//!        │    │
//!        │    └─ 遇到AND或相邻的操作数时，继续解析右侧NOT表达式
//!        │
//!        └─ 遇到OR时，继续解析右侧AND表达式
//! ```
//!
//! ## 语法优先级（从高到低）
//!
//! 1. **括号分组** `(expr)` 和字段作用域 `field:value`
//! 2. **NOT操作** `NOT expr`
//! 3. **AND操作** `expr AND expr`（相邻的表达式视为隐式AND）
//! 4. **OR操作** `expr OR expr`
//!
//! 嵌套的括号和NOT合计不能超过 [`MAX_NESTING`] 层。
//!
//! ## 示例
//!
//! ```text
//! tag:malware AND NOT tag:benign
//! file.size:>=1M size:[1K TO 10M}
//! child:(type:"config" AND family:"evil")
//! 0123456789abcdef0123456789abcdef
//! ```

use crate::ast::{Item, Literal, RangeItem, MAX_NESTING};
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};

pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    position: usize,
    depth: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
}

impl ParseError {
    fn new(message: String, span: Option<Span>) -> Self {
        Self { message, span }
    }

    fn at_position(message: String, span: Span) -> Self {
        Self { message, span: Some(span) }
    }
}

/// 对查询字符串依次进行词法分析和语法分析
pub fn parse_query(input: &str) -> Result<Item, ParseError> {
    let tokens: Vec<_> = Lexer::new(input).collect();
    Parser::new(&tokens).parse()
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        Self { tokens, position: 0, depth: 0 }
    }

    /// 返回当前token，不推进位置
    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 返回当前token并推进位置
    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// 期望指定类型的token并推进位置，否则返回错误
    fn expect(&mut self, expected: TokenKind) -> Result<&'a Token<'a>, ParseError> {
        match self.peek() {
            Some(token)
                if std::mem::discriminant(&token.kind) == std::mem::discriminant(&expected) =>
            {
                self.position += 1;
                Ok(token)
            }
            Some(token) => Err(ParseError::at_position(
                format!("Expected {:?}, found {:?}", expected, token.kind),
                token.span,
            )),
            None => Err(ParseError::new(
                format!("Expected {:?}, but reached end of input", expected),
                None,
            )),
        }
    }

    /// 进入一层嵌套，超过 [`MAX_NESTING`] 时返回错误
    fn enter(&mut self, span: Span) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::at_position("Query nested too deeply".to_string(), span));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn match_token(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|token| {
            std::mem::discriminant(&token.kind) == std::mem::discriminant(kind)
        })
    }

    /// 当前token能否开始一个操作数（用于隐式AND）
    fn starts_operand(&self) -> bool {
        self.peek().is_some_and(|token| {
            matches!(
                token.kind,
                TokenKind::Not
                    | TokenKind::Field(_)
                    | TokenKind::Word(_)
                    | TokenKind::Phrase(_)
                    | TokenKind::LParen
                    | TokenKind::LBracket
                    | TokenKind::LBrace
                    | TokenKind::Illegal
            )
        })
    }

    pub fn parse(&mut self) -> Result<Item, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty query".to_string(), None));
        }

        let item = self.parse_or_expression()?;

        if let Some(token) = self.peek() {
            return Err(ParseError::at_position(
                format!("Unexpected token: {:?}", token.kind),
                token.span,
            ));
        }

        Ok(item)
    }

    /// 解析OR表达式 (最低优先级)
    ///
    /// 语法: `and_expr (OR and_expr)*`
    fn parse_or_expression(&mut self) -> Result<Item, ParseError> {
        let mut operands = vec![self.parse_and_expression()?];

        while self.match_token(&TokenKind::Or) {
            self.advance(); // 消费 OR
            operands.push(self.parse_and_expression()?);
        }

        Ok(collapse(operands, Item::Or))
    }

    /// 解析AND表达式 (中等优先级)
    ///
    /// 语法: `not_expr ((AND)? not_expr)*`
    fn parse_and_expression(&mut self) -> Result<Item, ParseError> {
        let mut operands = vec![self.parse_not_expression()?];

        loop {
            if self.match_token(&TokenKind::And) {
                self.advance(); // 消费 AND
            } else if !self.starts_operand() {
                break;
            }
            operands.push(self.parse_not_expression()?);
        }

        Ok(collapse(operands, Item::And))
    }

    /// 解析NOT表达式 (较高优先级)
    ///
    /// 语法: `NOT* primary_expr`
    fn parse_not_expression(&mut self) -> Result<Item, ParseError> {
        if self.match_token(&TokenKind::Not) {
            let token = self.advance(); // 消费 NOT
            self.enter(token.map(|t| t.span).unwrap_or_default())?;
            let expr = self.parse_not_expression()?;
            self.leave();
            Ok(Item::Not(Box::new(expr)))
        } else {
            self.parse_primary_expression()
        }
    }

    fn parse_primary_expression(&mut self) -> Result<Item, ParseError> {
        let Some(token) = self.peek() else {
            return Err(ParseError::new("Unexpected end of input".to_string(), None));
        };

        match &token.kind {
            TokenKind::LParen => {
                self.advance(); // 消费 (
                self.enter(token.span)?;
                let expr = self.parse_or_expression()?;
                self.expect(TokenKind::RParen)?;
                self.leave();
                Ok(Item::Group(Box::new(expr)))
            }
            TokenKind::Field(selector) => {
                self.advance();
                let expr = self.parse_field_value()?;
                Ok(Item::SearchField {
                    selector: selector.to_string(),
                    expr: Box::new(expr),
                    span: token.span,
                })
            }
            _ => self.parse_value(),
        }
    }

    /// 解析 `selector:` 之后的值，嵌套表达式必须用括号包围
    fn parse_field_value(&mut self) -> Result<Item, ParseError> {
        if let Some(token) = self.peek().filter(|token| token.kind == TokenKind::LParen) {
            self.advance(); // 消费 (
            self.enter(token.span)?;
            let expr = self.parse_or_expression()?;
            self.expect(TokenKind::RParen)?;
            self.leave();
            return Ok(Item::FieldGroup(Box::new(expr)));
        }
        self.parse_value()
    }

    fn parse_value(&mut self) -> Result<Item, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError::new(
                "Expected a value, but reached end of input".to_string(),
                None,
            ));
        };

        match &token.kind {
            TokenKind::Word(raw) => Ok(Item::Word(Literal::new(*raw, token.span))),
            TokenKind::Phrase(raw) => Ok(Item::Phrase(Literal::new(*raw, token.span))),
            TokenKind::LBracket => self.parse_range(true),
            TokenKind::LBrace => self.parse_range(false),
            TokenKind::Illegal => Err(ParseError::at_position(
                "Unterminated phrase or dangling escape".to_string(),
                token.span,
            )),
            other => Err(ParseError::at_position(
                format!("Expected a value, found {:?}", other),
                token.span,
            )),
        }
    }

    /// 解析范围表达式，开始的括号已经被消费
    ///
    /// 语法: `("[" | "{") bound TO bound ("]" | "}")`
    fn parse_range(&mut self, include_low: bool) -> Result<Item, ParseError> {
        let low = self.parse_range_bound()?;
        self.expect(TokenKind::To)?;
        let high = self.parse_range_bound()?;

        let include_high = match self.advance() {
            Some(Token { kind: TokenKind::RBracket, .. }) => true,
            Some(Token { kind: TokenKind::RBrace, .. }) => false,
            Some(token) => {
                return Err(ParseError::at_position(
                    format!("Expected ']' or '}}' to close range, found {:?}", token.kind),
                    token.span,
                ));
            }
            None => {
                return Err(ParseError::new("Unclosed range".to_string(), None));
            }
        };

        Ok(Item::Range(RangeItem { low, high, include_low, include_high }))
    }

    fn parse_range_bound(&mut self) -> Result<Option<Literal>, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError::new("Expected range bound".to_string(), None));
        };

        match &token.kind {
            TokenKind::Word("*") => Ok(None),
            TokenKind::Word(raw) | TokenKind::Phrase(raw) => {
                Ok(Some(Literal::new(*raw, token.span)))
            }
            other => Err(ParseError::at_position(
                format!("Expected range bound, found {:?}", other),
                token.span,
            )),
        }
    }
}

fn collapse(mut operands: Vec<Item>, combine: fn(Vec<Item>) -> Item) -> Item {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        combine(operands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(item: &Item) -> &str {
        match item {
            Item::Word(lit) | Item::Phrase(lit) => &lit.raw,
            other => panic!("Expected literal, found {:?}", other),
        }
    }

    #[test]
    fn test_simple_field() {
        let result = parse_query(r#"tag:"malware""#).unwrap();

        if let Item::SearchField { selector, expr, .. } = &result {
            assert_eq!(selector, "tag");
            assert!(matches!(expr.as_ref(), Item::Phrase(_)));
            assert_eq!(raw(expr), "\"malware\"");
        } else {
            panic!("Expected search field");
        }
    }

    #[test]
    fn test_bare_word() {
        let result = parse_query("d41d8cd98f00b204e9800998ecf8427e").unwrap();
        assert_eq!(raw(&result), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let result = parse_query("tag:a OR tag:b AND tag:c").unwrap();

        if let Item::Or(operands) = &result {
            assert_eq!(operands.len(), 2);
            assert!(matches!(operands[0], Item::SearchField { .. }));
            if let Item::And(inner) = &operands[1] {
                assert_eq!(inner.len(), 2);
            } else {
                panic!("Expected AND on the right side of OR");
            }
        } else {
            panic!("Expected OR");
        }
    }

    #[test]
    fn test_implicit_and() {
        let result = parse_query("tag:a tag:b NOT tag:c").unwrap();

        if let Item::And(operands) = &result {
            assert_eq!(operands.len(), 3);
            assert!(matches!(operands[2], Item::Not(_)));
        } else {
            panic!("Expected implicit AND");
        }
    }

    #[test]
    fn test_chained_operators_flatten() {
        let result = parse_query("tag:a OR tag:b OR tag:c").unwrap();
        assert!(matches!(&result, Item::Or(operands) if operands.len() == 3));
    }

    #[test]
    fn test_not_group() {
        let result = parse_query(r#"NOT (tag:"a" OR tag:"b")"#).unwrap();

        if let Item::Not(inner) = &result {
            if let Item::Group(group) = inner.as_ref() {
                assert!(matches!(group.as_ref(), Item::Or(_)));
            } else {
                panic!("Expected group inside NOT");
            }
        } else {
            panic!("Expected NOT");
        }
    }

    #[test]
    fn test_field_group() {
        let result = parse_query("tag:(a OR b)").unwrap();

        if let Item::SearchField { expr, .. } = &result {
            assert!(matches!(
                expr.as_ref(),
                Item::FieldGroup(inner) if matches!(inner.as_ref(), Item::Or(_))
            ));
        } else {
            panic!("Expected search field");
        }
    }

    #[test]
    fn test_subquery_shape() {
        let result = parse_query(r#"child:(type:"config" AND family:"evil")"#).unwrap();

        if let Item::SearchField { selector, expr, .. } = &result {
            assert_eq!(selector, "child");
            if let Item::FieldGroup(inner) = expr.as_ref() {
                assert!(matches!(inner.as_ref(), Item::And(operands) if operands.len() == 2));
            } else {
                panic!("Expected field group");
            }
        } else {
            panic!("Expected search field");
        }
    }

    #[test]
    fn test_range_item() {
        let result = parse_query("size:[10 TO *}").unwrap();

        if let Item::SearchField { expr, .. } = &result {
            if let Item::Range(range) = expr.as_ref() {
                assert_eq!(range.low.as_ref().map(|l| l.raw.as_str()), Some("10"));
                assert!(range.high.is_none());
                assert!(range.include_low);
                assert!(!range.include_high);
            } else {
                panic!("Expected range");
            }
        } else {
            panic!("Expected search field");
        }
    }

    #[test]
    fn test_comparison_stays_a_word() {
        let result = parse_query("size:>=10K").unwrap();
        if let Item::SearchField { expr, .. } = &result {
            assert_eq!(raw(expr), ">=10K");
        } else {
            panic!("Expected search field");
        }
    }

    #[test]
    fn test_empty_query_is_error() {
        assert!(parse_query("").is_err());
        assert!(parse_query("   ").is_err());
    }

    #[test]
    fn test_unbalanced_parens_is_error() {
        assert!(parse_query("(tag:a").is_err());
        assert!(parse_query("tag:a)").is_err());
    }

    #[test]
    fn test_dangling_operator_is_error() {
        let err = parse_query("tag:a AND").unwrap_err();
        assert!(err.span.is_none());
    }

    #[test]
    fn test_unterminated_phrase_reports_span() {
        let err = parse_query(r#"tag:"open"#).unwrap_err();
        assert_eq!(err.span, Some(Span::new(4, 9)));
    }

    #[test]
    fn test_range_without_to_is_error() {
        assert!(parse_query("size:[1 2]").is_err());
    }

    #[test]
    fn test_deep_parens_are_an_error() {
        let query = format!("{}tag:a{}", "(".repeat(5_000), ")".repeat(5_000));
        let err = parse_query(&query).unwrap_err();
        assert_eq!(err.message, "Query nested too deeply");
        assert_eq!(err.span, Some(Span::new(MAX_NESTING, MAX_NESTING + 1)));

        let query = format!("{}a{}", "tag:(".repeat(5_000), ")".repeat(5_000));
        assert!(parse_query(&query).is_err());
    }

    #[test]
    fn test_deep_not_chain_is_an_error() {
        let err = parse_query(&format!("{}tag:a", "NOT ".repeat(100_000))).unwrap_err();
        assert_eq!(err.message, "Query nested too deeply");
    }

    #[test]
    fn test_nesting_up_to_limit_parses() {
        let query = format!("{}tag:a{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(parse_query(&query).is_ok());

        let query = format!("{}tag:a{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert!(parse_query(&query).is_err());
    }
}
