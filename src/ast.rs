//! Lucene前端生成、编译器消费的语法树
//!
//! 字面量保持原始形式（包括引号和反斜杠转义），由 [`crate::value`] 负责解释。

use crate::token::Span;

/// 查询中括号分组和 `NOT` 的最大嵌套层数
pub const MAX_NESTING: usize = 64;

/// 查询语法树的节点
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// 单词, 例如：`emotet*` 或 `>=10`
    Word(Literal),
    /// 双引号短语, 例如：`"evil config"`
    Phrase(Literal),
    /// 显式范围, 例如：`[10 TO 20}` 或 `[* TO 2021-01-01]`
    Range(RangeItem),
    /// `selector:expr`
    SearchField { selector: String, expr: Box<Item>, span: Span },
    /// 前面没有字段的括号分组
    Group(Box<Item>),
    /// 紧跟在字段选择器之后的括号分组
    FieldGroup(Box<Item>),
    /// 逻辑与运算 (AND 或相邻的操作数)
    And(Vec<Item>),
    /// 逻辑或运算 (OR)
    Or(Vec<Item>),
    /// 逻辑非运算 (NOT)
    Not(Box<Item>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub raw: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeItem {
    /// 边界写作 `*` 时为 `None`
    pub low: Option<Literal>,
    pub high: Option<Literal>,
    pub include_low: bool,
    pub include_high: bool,
}

impl Literal {
    pub fn new(raw: impl Into<String>, span: Span) -> Self {
        Self { raw: raw.into(), span }
    }
}

/// 构造语法树的辅助函数，供其他前端和测试使用
impl Item {
    pub fn word(raw: &str) -> Self {
        Item::Word(Literal::new(raw, Span::default()))
    }

    pub fn phrase(raw: &str) -> Self {
        Item::Phrase(Literal::new(raw, Span::default()))
    }

    pub fn field(selector: &str, expr: Item) -> Self {
        Item::SearchField {
            selector: selector.to_string(),
            expr: Box::new(expr),
            span: Span::default(),
        }
    }
}
