//! Arena-backed AST.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. Narrowing a
//! generic selector into a table or column selector overwrites the arena slot,
//! so every parent/child edge stays valid without any pointer bookkeeping.

use std::fmt;

use super::errors::{Result, SlqError};
use super::parse_tree::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind discriminant, used for walker dispatch and error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Root,
    Segment,
    Datasource,
    Selector,
    TblSelector,
    ColSelector,
    Join,
    JoinConstraint,
    Cmpr,
    RowRange,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Root => "query",
            Kind::Segment => "segment",
            Kind::Datasource => "datasource",
            Kind::Selector => "selector",
            Kind::TblSelector => "table selector",
            Kind::ColSelector => "column selector",
            Kind::Join => "join",
            Kind::JoinConstraint => "join constraint",
            Kind::Cmpr => "comparison",
            Kind::RowRange => "row range",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Segment,
    Datasource { handle: String },
    /// A leading-dot token not yet known to be a table or a column.
    Selector,
    TblSelector { handle: String, table: String },
    ColSelector { name: String },
    Join { left: Option<NodeId>, right: Option<NodeId> },
    JoinConstraint,
    Cmpr { op: String },
    RowRange { offset: i64, limit: i64 },
}

impl NodeKind {
    pub fn kind(&self) -> Kind {
        match self {
            NodeKind::Root => Kind::Root,
            NodeKind::Segment => Kind::Segment,
            NodeKind::Datasource { .. } => Kind::Datasource,
            NodeKind::Selector => Kind::Selector,
            NodeKind::TblSelector { .. } => Kind::TblSelector,
            NodeKind::ColSelector { .. } => Kind::ColSelector,
            NodeKind::Join { .. } => Kind::Join,
            NodeKind::JoinConstraint => Kind::JoinConstraint,
            NodeKind::Cmpr { .. } => Kind::Cmpr,
            NodeKind::RowRange { .. } => Kind::RowRange,
        }
    }

    /// Can appear after `FROM`.
    pub fn is_selectable(&self) -> bool {
        matches!(self, NodeKind::TblSelector { .. } | NodeKind::Join { .. })
    }

    /// Can appear in the projection list.
    pub fn is_col_expr(&self) -> bool {
        matches!(self, NodeKind::ColSelector { .. })
    }

    fn accepts(&self, child: Kind, current: &[Kind]) -> bool {
        match self {
            NodeKind::Root => child == Kind::Segment,
            NodeKind::Segment => matches!(
                child,
                Kind::Datasource
                    | Kind::Selector
                    | Kind::TblSelector
                    | Kind::ColSelector
                    | Kind::Join
                    | Kind::RowRange
            ),
            NodeKind::Join { .. } => child == Kind::JoinConstraint && current.is_empty(),
            NodeKind::JoinConstraint => {
                current.len() < 3
                    && matches!(child, Kind::Selector | Kind::ColSelector | Kind::Cmpr)
            }
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub span: Span,
    pub kind: NodeKind,
}

/// The query's syntax tree. Node 0 is always the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ast {
    input: String,
    nodes: Vec<Node>,
    datasource: Option<String>,
}

impl Ast {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new(input: impl Into<String>) -> Self {
        let input = input.into();
        let root = Node {
            parent: None,
            children: Vec::new(),
            span: Span::new(0, input.len()),
            kind: NodeKind::Root,
        };
        Self { input, nodes: vec![root], datasource: None }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> Kind {
        self.nodes[id.0].kind.kind()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Verbatim source text of the node.
    pub fn text(&self, id: NodeId) -> &str {
        self.nodes[id.0].span.text(&self.input)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn datasource(&self) -> Option<&str> {
        self.datasource.as_deref()
    }

    /// Records the query's datasource. May be set only once.
    pub fn set_datasource(&mut self, handle: impl Into<String>) -> Result<()> {
        let handle = handle.into();
        match &self.datasource {
            Some(existing) if *existing != handle => Err(SlqError::Structure(format!(
                "datasource already set to {}, cannot set to {}",
                existing, handle
            ))),
            Some(_) => Ok(()),
            None => {
                self.datasource = Some(handle);
                Ok(())
            }
        }
    }

    /// Allocates a detached node; attach it with [`Ast::add_child`] or [`Ast::set_children`].
    pub fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { parent: None, children: Vec::new(), span, kind });
        id
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let child_kind = self.kind(child);
        let current: Vec<Kind> = self.children(parent).iter().map(|c| self.kind(*c)).collect();
        if !self.nodes[parent.0].kind.accepts(child_kind, &current) {
            return Err(SlqError::Structure(format!(
                "{} {:?} cannot have {} child {:?}",
                self.kind(parent),
                self.text(parent),
                child_kind,
                self.text(child)
            )));
        }
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Replaces every child of `parent`, checking each one as it goes.
    pub fn set_children(&mut self, parent: NodeId, children: &[NodeId]) -> Result<()> {
        let old = std::mem::take(&mut self.nodes[parent.0].children);
        for id in &old {
            self.nodes[id.0].parent = None;
        }
        for child in children {
            if let Err(e) = self.add_child(parent, *child) {
                for id in std::mem::take(&mut self.nodes[parent.0].children) {
                    self.nodes[id.0].parent = None;
                }
                for id in &old {
                    self.nodes[id.0].parent = Some(parent);
                }
                self.nodes[parent.0].children = old;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Swaps the kind of `old` in place, keeping its span and edges.
    pub fn replace_node(&mut self, old: NodeId, new_kind: NodeKind) -> Result<()> {
        let parent = self.parent(old).ok_or_else(|| {
            SlqError::Structure(format!("{} {:?} has no parent", self.kind(old), self.text(old)))
        })?;
        if !self.children(parent).contains(&old) {
            return Err(SlqError::Structure(format!(
                "{} {:?} not found among children of its parent {}",
                self.kind(old),
                self.text(old),
                parent
            )));
        }
        self.nodes[old.0].kind = new_kind;
        Ok(())
    }

    pub fn segments(&self) -> &[NodeId] {
        self.children(Self::ROOT)
    }

    /// Position of a segment in the pipeline.
    pub fn seg_index(&self, seg: NodeId) -> Result<usize> {
        self.segments().iter().position(|s| *s == seg).ok_or_else(|| {
            SlqError::Structure(format!("{:?} is not a top-level segment", self.text(seg)))
        })
    }

    /// The segment this node lives in.
    pub fn enclosing_segment(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = id;
        loop {
            if self.kind(cur) == Kind::Segment {
                return Some(cur);
            }
            cur = self.parent(cur)?;
        }
    }

    pub fn prev_segment(&self, seg: NodeId) -> Result<Option<NodeId>> {
        let i = self.seg_index(seg)?;
        Ok(if i == 0 { None } else { Some(self.segments()[i - 1]) })
    }

    /// The single kind shared by every child of the segment.
    pub fn segment_child_kind(&self, seg: NodeId) -> Result<Option<Kind>> {
        let mut kinds = self.children(seg).iter().map(|c| self.kind(*c));
        let first = match kinds.next() {
            Some(k) => k,
            None => return Ok(None),
        };
        if kinds.any(|k| k != first) {
            return Err(SlqError::Structure(format!(
                "segment [{}] {:?} has mixed element kinds",
                self.seg_index(seg)?,
                self.text(seg)
            )));
        }
        Ok(Some(first))
    }

    /// Every node of `kind`, in pre-order.
    pub fn find_nodes(&self, kind: Kind) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop() {
            if self.kind(id) == kind {
                out.push(id);
            }
            stack.extend(self.children(id).iter().rev());
        }
        out
    }

    pub fn count_nodes(&self, kind: Kind) -> usize {
        self.find_nodes(kind).len()
    }

    /// The name a selector refers to: text without the leading dot or quotes.
    pub fn sel_value(&self, id: NodeId) -> String {
        match &self.nodes[id.0].kind {
            NodeKind::TblSelector { table, .. } => table.clone(),
            NodeKind::ColSelector { name } => name.clone(),
            _ => sel_value(self.text(id)),
        }
    }
}

/// `.user` -> `user`, `."first name"` -> `first name`, `.user.uid` -> `user.uid`.
pub fn sel_value(text: &str) -> String {
    text.strip_prefix('.')
        .unwrap_or(text)
        .replace('"', "")
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(Self::ROOT, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            writeln!(f, "{}{} {:?}", "  ".repeat(depth), self.kind(id), self.text(id))?;
            for child in self.children(id).iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Ast, NodeId, NodeId) {
        let mut ast = Ast::new("@my1 | .user");
        let seg = ast.alloc(NodeKind::Segment, Span::new(7, 12));
        ast.add_child(Ast::ROOT, seg).unwrap();
        let sel = ast.alloc(NodeKind::Selector, Span::new(7, 12));
        ast.add_child(seg, sel).unwrap();
        (ast, seg, sel)
    }

    #[test]
    fn leaf_nodes_reject_children() {
        let (mut ast, _, sel) = sample();
        let other = ast.alloc(NodeKind::Selector, Span::new(7, 12));
        let err = ast.add_child(sel, other).unwrap_err();
        assert!(err.is_structure());
        assert!(ast.children(sel).is_empty());
    }

    #[test]
    fn join_takes_one_constraint() {
        let mut ast = Ast::new("join(.uid)");
        let join = ast.alloc(NodeKind::Join { left: None, right: None }, Span::new(0, 10));
        let c1 = ast.alloc(NodeKind::JoinConstraint, Span::new(5, 9));
        let c2 = ast.alloc(NodeKind::JoinConstraint, Span::new(5, 9));
        ast.add_child(join, c1).unwrap();
        assert!(ast.add_child(join, c2).is_err());
    }

    #[test]
    fn set_children_is_all_or_nothing() {
        let (mut ast, seg, sel) = sample();
        let good = ast.alloc(NodeKind::Selector, Span::new(7, 12));
        let bad = ast.alloc(NodeKind::Segment, Span::new(7, 12));
        assert!(ast.set_children(seg, &[good, bad]).is_err());
        assert_eq!(ast.children(seg), &[sel]);
        assert_eq!(ast.parent(sel), Some(seg));
        assert_eq!(ast.parent(good), None);

        ast.set_children(seg, &[good]).unwrap();
        assert_eq!(ast.children(seg), &[good]);
        assert_eq!(ast.parent(sel), None);
    }

    #[test]
    fn replace_keeps_span_and_edges() {
        let (mut ast, seg, sel) = sample();
        ast.replace_node(sel, NodeKind::ColSelector { name: "user".into() }).unwrap();
        assert_eq!(ast.kind(sel), Kind::ColSelector);
        assert_eq!(ast.text(sel), ".user");
        assert_eq!(ast.children(seg), &[sel]);
        assert_eq!(ast.parent(sel), Some(seg));
    }

    #[test]
    fn replace_detached_node_fails() {
        let (mut ast, _, _) = sample();
        let loose = ast.alloc(NodeKind::Selector, Span::new(7, 12));
        assert!(ast.replace_node(loose, NodeKind::ColSelector { name: "x".into() }).is_err());
    }

    #[test]
    fn datasource_is_set_once() {
        let (mut ast, _, _) = sample();
        ast.set_datasource("@my1").unwrap();
        ast.set_datasource("@my1").unwrap();
        assert!(ast.set_datasource("@other").is_err());
        assert_eq!(ast.datasource(), Some("@my1"));
    }

    #[test]
    fn selector_values() {
        assert_eq!(sel_value(".user"), "user");
        assert_eq!(sel_value(".user.uid"), "user.uid");
        assert_eq!(sel_value(r#"."first name""#), "first name");
    }
}
