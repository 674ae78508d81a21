//! Concrete parse tree produced by the SLQ parser and consumed by the AST builder.

use std::fmt;

/// Byte range into the query text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn text<'a>(&self, input: &'a str) -> &'a str {
        input.get(self.start..self.end).unwrap_or("")
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `@name`
    Handle,
    /// `.name`, `.tbl.col` or `."quoted name"`
    Selector,
    /// `join`, `JOIN` or `j`
    Keyword,
    Int,
    Colon,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rule {
    Query,
    Segment,
    Element,
    DsElement,
    DsTblElement,
    SelElement,
    Fn,
    FnJoin,
    FnJoinExpr,
    FnJoinCond,
    Cmpr,
    RowRange,
    Terminal(TokenKind),
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseNode {
    pub rule: Rule,
    pub span: Span,
    pub children: Vec<ParseNode>,
}

impl ParseNode {
    pub fn new(rule: Rule, span: Span, children: Vec<ParseNode>) -> Self {
        Self { rule, span, children }
    }

    pub fn leaf(rule: Rule, span: Span) -> Self {
        Self::new(rule, span, Vec::new())
    }

    /// A node spanning from its first child's start to its last child's end.
    pub fn enclosing(rule: Rule, children: Vec<ParseNode>) -> Self {
        let start = children.first().map(|c| c.span.start).unwrap_or(0);
        let end = children.last().map(|c| c.span.end).unwrap_or(start);
        Self::new(rule, Span::new(start, end), children)
    }

    pub fn text<'a>(&self, input: &'a str) -> &'a str {
        self.span.text(input)
    }

    /// Children that are terminals of the given kind, in order.
    pub fn terminals(&self, kind: TokenKind) -> impl Iterator<Item = &ParseNode> {
        self.children.iter().filter(move |c| c.rule == Rule::Terminal(kind))
    }

    /// Indented one-node-per-line dump, handy when debugging the grammar.
    pub fn dump(&self, input: &str) -> String {
        let mut out = String::new();
        self.dump_into(input, 0, &mut out);
        out
    }

    fn dump_into(&self, input: &str, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{:?} {:?}\n", self.rule, self.text(input)));
        for child in &self.children {
            child.dump_into(input, depth + 1, out);
        }
    }
}
