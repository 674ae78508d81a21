//! Parse tree -> initial AST. Every `.name` becomes a generic selector here;
//! deciding table vs. column is left to the semantic passes.

use log::debug;

use super::errors::{Result, SlqError};
use super::node::{sel_value, Ast, NodeId, NodeKind};
use super::parse_tree::{ParseNode, Rule, TokenKind};

pub fn build_ast(input: &str, tree: &ParseNode) -> Result<Ast> {
    let mut builder = AstBuilder { input, ast: Ast::new(input) };
    builder.visit_query(tree)?;
    debug!("built AST:\n{}", builder.ast);
    Ok(builder.ast)
}

struct AstBuilder<'a> {
    input: &'a str,
    ast: Ast,
}

fn unexpected(input: &str, node: &ParseNode, wanted: &str) -> SlqError {
    SlqError::Parse(format!(
        "unexpected parse node {:?} {:?} at {}: expected {}",
        node.rule,
        node.text(input),
        node.span,
        wanted
    ))
}

impl AstBuilder<'_> {
    fn expect(&self, node: &ParseNode, rule: Rule) -> Result<()> {
        if node.rule == rule {
            Ok(())
        } else {
            Err(unexpected(self.input, node, &format!("{:?}", rule)))
        }
    }

    fn terminal<'n>(&self, node: &'n ParseNode, kind: TokenKind) -> Result<&'n ParseNode> {
        node.terminals(kind).next().ok_or_else(|| {
            SlqError::Parse(format!(
                "{:?} {:?} is missing its {:?} token",
                node.rule,
                node.text(self.input),
                kind
            ))
        })
    }

    fn visit_query(&mut self, tree: &ParseNode) -> Result<()> {
        self.expect(tree, Rule::Query)?;
        if tree.children.is_empty() {
            return Err(SlqError::Parse("query has no segments".to_string()));
        }
        for seg in &tree.children {
            self.visit_segment(seg)?;
        }
        Ok(())
    }

    fn visit_segment(&mut self, node: &ParseNode) -> Result<()> {
        self.expect(node, Rule::Segment)?;
        let seg = self.ast.alloc(NodeKind::Segment, node.span);
        self.ast.add_child(Ast::ROOT, seg)?;
        for el in &node.children {
            self.visit_element(seg, el)?;
        }
        Ok(())
    }

    fn visit_element(&mut self, seg: NodeId, node: &ParseNode) -> Result<()> {
        self.expect(node, Rule::Element)?;
        let inner = node
            .children
            .first()
            .ok_or_else(|| unexpected(self.input, node, "a segment element"))?;
        match inner.rule {
            Rule::DsElement => {
                let handle = self.terminal(inner, TokenKind::Handle)?;
                let id = self.ast.alloc(
                    NodeKind::Datasource { handle: handle.text(self.input).to_string() },
                    inner.span,
                );
                self.ast.add_child(seg, id)
            }
            Rule::DsTblElement => {
                let handle = self.terminal(inner, TokenKind::Handle)?.text(self.input).to_string();
                let table = sel_value(self.terminal(inner, TokenKind::Selector)?.text(self.input));
                let id = self.ast.alloc(NodeKind::TblSelector { handle, table }, inner.span);
                self.ast.add_child(seg, id)
            }
            Rule::SelElement => {
                let sel = self.terminal(inner, TokenKind::Selector)?;
                let id = self.ast.alloc(NodeKind::Selector, sel.span);
                self.ast.add_child(seg, id)
            }
            Rule::Fn => {
                let join = inner
                    .children
                    .first()
                    .ok_or_else(|| unexpected(self.input, inner, "a function"))?;
                self.visit_join(seg, join)
            }
            Rule::RowRange => self.visit_row_range(seg, inner),
            _ => Err(unexpected(self.input, inner, "a segment element")),
        }
    }

    fn visit_join(&mut self, seg: NodeId, node: &ParseNode) -> Result<()> {
        self.expect(node, Rule::FnJoin)?;
        let join = self.ast.alloc(NodeKind::Join { left: None, right: None }, node.span);
        self.ast.add_child(seg, join)?;

        let expr = match node.children.iter().find(|c| c.rule == Rule::FnJoinExpr) {
            Some(expr) => expr,
            None => return Ok(()),
        };
        let constraint = self.ast.alloc(NodeKind::JoinConstraint, expr.span);
        self.ast.add_child(join, constraint)?;

        let inner = expr
            .children
            .first()
            .ok_or_else(|| unexpected(self.input, expr, "a join expression"))?;
        match inner.rule {
            Rule::Terminal(TokenKind::Selector) => {
                let id = self.ast.alloc(NodeKind::Selector, inner.span);
                self.ast.add_child(constraint, id)
            }
            Rule::FnJoinCond => {
                if inner.children.len() != 3 {
                    return Err(unexpected(self.input, inner, "`left cmpr right`"));
                }
                for part in &inner.children {
                    let kind = match part.rule {
                        Rule::Terminal(TokenKind::Selector) => NodeKind::Selector,
                        Rule::Cmpr => NodeKind::Cmpr { op: part.text(self.input).to_string() },
                        _ => return Err(unexpected(self.input, part, "selector or comparison")),
                    };
                    let id = self.ast.alloc(kind, part.span);
                    self.ast.add_child(constraint, id)?;
                }
                Ok(())
            }
            _ => Err(unexpected(self.input, inner, "a join expression")),
        }
    }

    fn parse_int(&self, node: &ParseNode) -> Result<i64> {
        let text = node.text(self.input);
        text.parse::<i64>()
            .map_err(|e| SlqError::Parse(format!("invalid row range index {:?}: {}", text, e)))
    }

    // .[]      -> nothing
    // .[n]     -> offset n, limit 1
    // .[a:b]   -> offset a, limit b-a
    // .[:b]    -> offset 0, limit b
    // .[a:]    -> offset a, no limit
    fn visit_row_range(&mut self, seg: NodeId, node: &ParseNode) -> Result<()> {
        let ints: Vec<i64> = node
            .terminals(TokenKind::Int)
            .map(|n| self.parse_int(n))
            .collect::<Result<_>>()?;
        let has_colon = node.terminals(TokenKind::Colon).next().is_some();
        let leading_int = matches!(
            node.children.first().map(|c| c.rule),
            Some(Rule::Terminal(TokenKind::Int))
        );

        let (offset, limit) = match (ints.as_slice(), has_colon) {
            ([], false) => return Ok(()),
            ([n], false) => (*n, 1),
            ([lo, hi], true) => {
                if hi < lo {
                    return Err(SlqError::Structure(format!(
                        "row range {:?}: upper bound {} is less than lower bound {}",
                        node.text(self.input),
                        hi,
                        lo
                    )));
                }
                (*lo, hi - lo)
            }
            ([lo], true) if leading_int => (*lo, -1),
            ([hi], true) => (0, *hi),
            _ => return Err(unexpected(self.input, node, "a row range")),
        };

        let id = self.ast.alloc(NodeKind::RowRange { offset, limit }, node.span);
        self.ast.add_child(seg, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_ast::node::Kind;
    use crate::query_ast::parse_tree::Span;
    use crate::query_ast::parser::parse_query;

    fn build(q: &str) -> Ast {
        build_ast(q, &parse_query(q).unwrap()).unwrap()
    }

    fn range_of(q: &str) -> Option<(i64, i64)> {
        let ast = build(q);
        ast.find_nodes(Kind::RowRange).first().map(|id| match ast.node(*id).kind {
            NodeKind::RowRange { offset, limit } => (offset, limit),
            _ => unreachable!(),
        })
    }

    #[test]
    fn row_range_forms() {
        assert_eq!(range_of("@a | .t | .[]"), None);
        assert_eq!(range_of("@a | .t | .[2]"), Some((2, 1)));
        assert_eq!(range_of("@a | .t | .[1:3]"), Some((1, 2)));
        assert_eq!(range_of("@a | .t | .[0:3]"), Some((0, 3)));
        assert_eq!(range_of("@a | .t | .[:3]"), Some((0, 3)));
        assert_eq!(range_of("@a | .t | .[2:]"), Some((2, -1)));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let q = "@a | .t | .[5:2]";
        let err = build_ast(q, &parse_query(q).unwrap()).unwrap_err();
        assert!(err.is_structure());
    }

    #[test]
    fn oversized_index_is_a_parse_error() {
        let q = "@a | .t | .[99999999999999999999]";
        let err = build_ast(q, &parse_query(q).unwrap()).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn selectors_stay_generic() {
        let ast = build("@my1 | .user | .uid, .username");
        assert_eq!(ast.segments().len(), 3);
        assert_eq!(ast.count_nodes(Kind::Selector), 3);
        assert_eq!(ast.count_nodes(Kind::Datasource), 1);
    }

    #[test]
    fn join_constraint_shapes() {
        let ast = build("@a | .x, .y | join()");
        let join = ast.find_nodes(Kind::Join)[0];
        assert!(ast.children(join).is_empty());

        let ast = build("@a | .x, .y | join(.uid)");
        let join = ast.find_nodes(Kind::Join)[0];
        let constraint = ast.children(join)[0];
        assert_eq!(ast.children(constraint).len(), 1);

        let ast = build("@a | .x, .y | join(.x.uid == .y.uid)");
        let constraint = ast.find_nodes(Kind::JoinConstraint)[0];
        let kinds: Vec<Kind> = ast.children(constraint).iter().map(|c| ast.kind(*c)).collect();
        assert_eq!(kinds, vec![Kind::Selector, Kind::Cmpr, Kind::Selector]);
    }

    #[test]
    fn explicit_table_selector() {
        let ast = build("@my1.user | .uid");
        let tbl = ast.find_nodes(Kind::TblSelector)[0];
        assert_eq!(
            ast.node(tbl).kind,
            NodeKind::TblSelector { handle: "@my1".into(), table: "user".into() }
        );
    }

    #[test]
    fn error_nodes_are_rejected() {
        let q = "@a";
        let bad = ParseNode::new(
            Rule::Query,
            Span::new(0, 2),
            vec![ParseNode::new(
                Rule::Segment,
                Span::new(0, 2),
                vec![ParseNode::new(
                    Rule::Element,
                    Span::new(0, 2),
                    vec![ParseNode::leaf(Rule::Error, Span::new(0, 2))],
                )],
            )],
        );
        assert!(build_ast(q, &bad).unwrap_err().is_parse());
    }
}
