//! SLQ text -> concrete parse tree.
//!
//! ```text
//! query         := segment ('|' segment)*
//! segment       := element (',' element)*
//! element       := dsTblElement | dsElement | fn | rowRange | selElement
//! dsElement     := '@' ID
//! dsTblElement  := '@' ID SEL
//! selElement    := SEL
//! fn            := ('join' | 'JOIN' | 'j') '(' joinExpr? ')'
//! joinExpr      := SEL cmpr SEL | SEL
//! rowRange      := '.[' (INT ':' INT | INT ':' | ':' INT | INT)? ']'
//! cmpr          := '<=' | '<' | '>=' | '>' | '!=' | '=='
//! ```

use log::debug;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{char, digit1, multispace0, satisfy};
use nom::combinator::{cut, opt, recognize};
use nom::error::{Error, ErrorKind};
use nom::multi::many1;
use nom::sequence::{delimited, pair, preceded};
use nom::{IResult, Parser};
use nom_locate::LocatedSpan;

use super::errors::{Result, SlqError};
use super::parse_tree::{ParseNode, Rule, Span, TokenKind};

type Input<'a> = LocatedSpan<&'a str>;
type PResult<'a, O> = IResult<Input<'a>, O>;

/// Parses a complete query. Trailing input that is not part of the query is an error.
pub fn parse_query(input: &str) -> Result<ParseNode> {
    match query(Input::new(input)) {
        Ok((rest, tree)) => {
            let rest = ws(rest).map(|(r, _)| r).unwrap_or(rest);
            if !rest.fragment().is_empty() {
                return Err(syntax_error(rest));
            }
            debug!("parse tree:\n{}", tree.dump(input));
            Ok(tree)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(syntax_error(e.input)),
        Err(nom::Err::Incomplete(_)) => Err(SlqError::Parse("unexpected end of query".to_string())),
    }
}

fn syntax_error(at: Input) -> SlqError {
    let near: String = at.fragment().chars().take(16).collect();
    let near = if near.is_empty() { "end of input".to_string() } else { format!("{:?}", near) };
    SlqError::Parse(format!(
        "[{}:{}] syntax error near {}",
        at.location_line(),
        at.get_utf8_column(),
        near
    ))
}

fn token_span(s: &Input) -> Span {
    Span::new(s.location_offset(), s.location_offset() + s.fragment().len())
}

fn terminal(kind: TokenKind, s: Input) -> ParseNode {
    ParseNode::leaf(Rule::Terminal(kind), token_span(&s))
}

fn ws(input: Input) -> PResult<Input> {
    multispace0(input)
}

fn sym<'a>(s: &'static str) -> impl FnMut(Input<'a>) -> PResult<'a, Input<'a>> {
    move |input| {
        let (input, _) = ws(input)?;
        tag(s).parse(input)
    }
}

fn query(input: Input) -> PResult<ParseNode> {
    let (mut input, first) = segment(input)?;
    let mut segments = vec![first];
    loop {
        match sym("|")(input) {
            Ok((rest, _)) => {
                let (rest, seg) = cut(segment).parse(rest)?;
                segments.push(seg);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, ParseNode::enclosing(Rule::Query, segments)))
}

fn segment(input: Input) -> PResult<ParseNode> {
    let (mut input, first) = element(input)?;
    let mut elements = vec![first];
    loop {
        match sym(",")(input) {
            Ok((rest, _)) => {
                let (rest, el) = cut(element).parse(rest)?;
                elements.push(el);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, ParseNode::enclosing(Rule::Segment, elements)))
}

fn element(input: Input) -> PResult<ParseNode> {
    let (input, _) = ws(input)?;
    let (rest, inner) = alt((ds_tbl_element, ds_element, fn_element, row_range, sel_element)).parse(input)?;
    Ok((rest, ParseNode::enclosing(Rule::Element, vec![inner])))
}

fn ident(input: Input) -> PResult<Input> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

fn quoted(input: Input) -> PResult<Input> {
    recognize(delimited(char('"'), take_while(|c: char| c != '"'), char('"'))).parse(input)
}

fn handle(input: Input) -> PResult<Input> {
    recognize(pair(char('@'), ident)).parse(input)
}

fn selector(input: Input) -> PResult<Input> {
    recognize(many1(pair(char('.'), alt((ident, quoted))))).parse(input)
}

fn ds_tbl_element(input: Input) -> PResult<ParseNode> {
    let (rest, (h, s)) = pair(handle, selector).parse(input)?;
    let children = vec![terminal(TokenKind::Handle, h), terminal(TokenKind::Selector, s)];
    Ok((rest, ParseNode::enclosing(Rule::DsTblElement, children)))
}

fn ds_element(input: Input) -> PResult<ParseNode> {
    let (rest, h) = handle(input)?;
    Ok((rest, ParseNode::enclosing(Rule::DsElement, vec![terminal(TokenKind::Handle, h)])))
}

fn sel_element(input: Input) -> PResult<ParseNode> {
    let (rest, s) = selector(input)?;
    Ok((rest, ParseNode::enclosing(Rule::SelElement, vec![terminal(TokenKind::Selector, s)])))
}

fn fn_element(input: Input) -> PResult<ParseNode> {
    let (rest, join) = fn_join(input)?;
    Ok((rest, ParseNode::enclosing(Rule::Fn, vec![join])))
}

fn fn_join(input: Input) -> PResult<ParseNode> {
    let (input, kw) = alt((tag("join"), tag("JOIN"), tag("j"))).parse(input)?;
    let (input, _) = sym("(")(input)?;
    let (input, expr) = opt(join_expr).parse(input)?;
    let (input, close) = cut(sym(")")).parse(input)?;

    let span = Span::new(kw.location_offset(), token_span(&close).end);
    let mut children = vec![terminal(TokenKind::Keyword, kw)];
    children.extend(expr);
    Ok((input, ParseNode::new(Rule::FnJoin, span, children)))
}

fn join_expr(input: Input) -> PResult<ParseNode> {
    let (input, _) = ws(input)?;
    let (input, left) = selector(input)?;
    let left = terminal(TokenKind::Selector, left);
    let (input, cond) = opt(pair(cmpr, cut(preceded(ws, selector)))).parse(input)?;
    let inner = match cond {
        Some((op, right)) => ParseNode::enclosing(
            Rule::FnJoinCond,
            vec![left, op, terminal(TokenKind::Selector, right)],
        ),
        None => left,
    };
    Ok((input, ParseNode::enclosing(Rule::FnJoinExpr, vec![inner])))
}

fn cmpr(input: Input) -> PResult<ParseNode> {
    let (input, _) = ws(input)?;
    let (rest, op) = alt((tag("<="), tag(">="), tag("!="), tag("=="), tag("<"), tag(">"))).parse(input)?;
    Ok((rest, ParseNode::leaf(Rule::Cmpr, token_span(&op))))
}

fn row_range(input: Input) -> PResult<ParseNode> {
    let (input, open) = tag(".[").parse(input)?;
    let (input, lo) = opt(preceded(ws, digit1)).parse(input)?;
    let (input, colon) = opt(preceded(ws, tag(":"))).parse(input)?;
    let (input, hi) = opt(preceded(ws, digit1)).parse(input)?;
    let (input, close) = cut(sym("]")).parse(input)?;

    let valid = match (&lo, &colon, &hi) {
        (_, None, Some(_)) => false,
        (None, Some(_), None) => false,
        _ => true,
    };
    if !valid {
        return Err(nom::Err::Failure(Error::new(open, ErrorKind::Verify)));
    }

    let span = Span::new(open.location_offset(), token_span(&close).end);
    let mut children = Vec::new();
    children.extend(lo.map(|s| terminal(TokenKind::Int, s)));
    children.extend(colon.map(|s| terminal(TokenKind::Colon, s)));
    children.extend(hi.map(|s| terminal(TokenKind::Int, s)));
    Ok((input, ParseNode::new(Rule::RowRange, span, children)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_rules(tree: &ParseNode) -> Vec<Vec<Rule>> {
        tree.children
            .iter()
            .map(|seg| seg.children.iter().map(|el| el.children[0].rule).collect())
            .collect()
    }

    #[test]
    fn parses_pipeline_shape() {
        let q = "@my1 | .user, .address | join(.uid) | .[0:4] | .user.uid, .username";
        let tree = parse_query(q).unwrap();
        assert_eq!(tree.rule, Rule::Query);
        assert_eq!(
            element_rules(&tree),
            vec![
                vec![Rule::DsElement],
                vec![Rule::SelElement, Rule::SelElement],
                vec![Rule::Fn],
                vec![Rule::RowRange],
                vec![Rule::SelElement, Rule::SelElement],
            ]
        );
        assert_eq!(tree.children[4].children[0].text(q), ".user.uid");
    }

    #[test]
    fn parses_handle_with_table() {
        let q = "@my1.user | .uid";
        let tree = parse_query(q).unwrap();
        let ds = &tree.children[0].children[0].children[0];
        assert_eq!(ds.rule, Rule::DsTblElement);
        assert_eq!(ds.children[0].text(q), "@my1");
        assert_eq!(ds.children[1].text(q), ".user");
    }

    #[test]
    fn parses_join_forms() {
        for (q, expr_rule) in [
            ("@a | .x, .y | join()", None),
            ("@a | .x, .y | JOIN(.uid)", Some(Rule::Terminal(TokenKind::Selector))),
            ("@a | .x, .y | j(.x.uid == .y.uid)", Some(Rule::FnJoinCond)),
        ] {
            let tree = parse_query(q).unwrap();
            let join = &tree.children[2].children[0].children[0].children[0];
            assert_eq!(join.rule, Rule::FnJoin, "{}", q);
            let inner = join.children.get(1).map(|e| e.children[0].rule);
            assert_eq!(inner, expr_rule, "{}", q);
        }
    }

    #[test]
    fn join_condition_keeps_operator() {
        let q = "@a | .x, .y | join(.x.uid <= .y.uid)";
        let tree = parse_query(q).unwrap();
        let cond = &tree.children[2].children[0].children[0].children[0].children[1].children[0];
        assert_eq!(cond.children[1].rule, Rule::Cmpr);
        assert_eq!(cond.children[1].text(q), "<=");
    }

    #[test]
    fn parses_row_range_forms() {
        for (q, kinds) in [
            (".[]", vec![]),
            (".[2]", vec![TokenKind::Int]),
            (".[1:3]", vec![TokenKind::Int, TokenKind::Colon, TokenKind::Int]),
            (".[:3]", vec![TokenKind::Colon, TokenKind::Int]),
            (".[2:]", vec![TokenKind::Int, TokenKind::Colon]),
        ] {
            let tree = parse_query(&format!("@a | .t | {}", q)).unwrap();
            let range = &tree.children[2].children[0].children[0];
            assert_eq!(range.rule, Rule::RowRange);
            let got: Vec<Rule> = range.children.iter().map(|c| c.rule).collect();
            let want: Vec<Rule> = kinds.into_iter().map(Rule::Terminal).collect();
            assert_eq!(got, want, "{}", q);
        }
    }

    #[test]
    fn quoted_selector() {
        let q = r#"@a | ."first name""#;
        let tree = parse_query(q).unwrap();
        assert_eq!(tree.children[1].children[0].text(q), r#"."first name""#);
    }

    #[test]
    fn syntax_errors_report_position() {
        let err = parse_query("@a | .t |").unwrap_err();
        assert!(err.is_parse());
        assert!(err.to_string().contains("[1:10]"), "{}", err);

        let err = parse_query("@a | .[:]").unwrap_err();
        assert!(err.to_string().contains("[1:6]"), "{}", err);

        assert!(parse_query("").unwrap_err().is_parse());
        assert!(parse_query("@a | .t ]").unwrap_err().is_parse());
    }
}
