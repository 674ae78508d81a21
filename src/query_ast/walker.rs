//! Kind-keyed pre-order traversal over the AST.
//!
//! A node whose kind has a registered visitor is handed to that visitor and its
//! children are *not* descended into automatically; the visitor can queue them
//! with [`WalkCtx::visit_children`]. Nodes without a visitor are descended into.

use super::errors::Result;
use super::node::{Ast, Kind, NodeId};

pub struct WalkCtx<'a> {
    pub ast: &'a mut Ast,
    /// Free slot for a pass to remember a node between callbacks.
    pub state: Option<NodeId>,
    pending: Vec<NodeId>,
}

impl WalkCtx<'_> {
    /// Resume traversal below `id` once the current callback returns.
    pub fn visit_children(&mut self, id: NodeId) {
        self.pending.extend_from_slice(self.ast.children(id));
    }
}

pub type Visitor<'v> = Box<dyn FnMut(&mut WalkCtx<'_>, NodeId) -> Result<()> + 'v>;

pub struct Walker<'a> {
    ctx: WalkCtx<'a>,
    visitors: Vec<(Kind, Visitor<'a>)>,
}

impl<'a> Walker<'a> {
    pub fn new(ast: &'a mut Ast) -> Self {
        Self {
            ctx: WalkCtx { ast, state: None, pending: Vec::new() },
            visitors: Vec::new(),
        }
    }

    pub fn add_visitor<F>(&mut self, kind: Kind, f: F) -> &mut Self
    where
        F: FnMut(&mut WalkCtx<'_>, NodeId) -> Result<()> + 'a,
    {
        self.visitors.push((kind, Box::new(f)));
        self
    }

    pub fn walk(&mut self) -> Result<()> {
        let mut stack = vec![Ast::ROOT];
        while let Some(id) = stack.pop() {
            let mut visited = false;
            for (kind, visit) in self.visitors.iter_mut() {
                if self.ctx.ast.kind(id) == *kind {
                    visited = true;
                    visit(&mut self.ctx, id)?;
                }
            }

            if visited {
                let pending = std::mem::take(&mut self.ctx.pending);
                stack.extend(pending.into_iter().rev());
            } else {
                stack.extend(self.ctx.ast.children(id).iter().rev());
            }
        }
        Ok(())
    }
}
