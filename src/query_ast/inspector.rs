//! Read-only queries over an AST.

use super::errors::{Result, SlqError};
use super::node::{Ast, Kind, NodeId, NodeKind};

pub struct Inspector<'a> {
    ast: &'a Ast,
}

impl<'a> Inspector<'a> {
    pub fn new(ast: &'a Ast) -> Self {
        Self { ast }
    }

    /// The datasource named by the query itself: an `@handle` segment if there
    /// is one, otherwise the handle of the first `@handle.table` selector.
    /// `None` means the query names no source and the active source applies.
    pub fn find_datasource(&self) -> Result<Option<String>> {
        if let Some(ds) = self.ast.datasource() {
            return Ok(Some(ds.to_string()));
        }

        let mut found: Option<&str> = None;
        for id in self.ast.find_nodes(Kind::Datasource) {
            if let NodeKind::Datasource { handle } = &self.ast.node(id).kind {
                match found {
                    Some(prev) if prev != handle => {
                        return Err(SlqError::Structure(format!(
                            "query names more than one datasource: {} and {}",
                            prev, handle
                        )));
                    }
                    _ => found = Some(handle),
                }
            }
        }
        if found.is_some() {
            return Ok(found.map(str::to_string));
        }

        Ok(self
            .ast
            .find_nodes(Kind::TblSelector)
            .into_iter()
            .find_map(|id| match &self.ast.node(id).kind {
                NodeKind::TblSelector { handle, .. } if !handle.is_empty() => Some(handle.clone()),
                _ => None,
            }))
    }

    /// Segments with at least one table selector or join.
    pub fn find_selectable_segments(&self) -> Vec<NodeId> {
        self.ast
            .segments()
            .iter()
            .copied()
            .filter(|seg| {
                self.ast
                    .children(*seg)
                    .iter()
                    .any(|c| self.ast.node(*c).kind.is_selectable())
            })
            .collect()
    }

    pub fn find_final_selectable_segment(&self) -> Result<NodeId> {
        self.find_selectable_segments()
            .last()
            .copied()
            .ok_or_else(|| SlqError::Structure("no selectable segments".to_string()))
    }

    /// The last segment made up only of column expressions. `None` means
    /// `SELECT *`.
    pub fn find_col_expr_segment(&self) -> Result<Option<NodeId>> {
        for (i, seg) in self.ast.segments().iter().enumerate().rev() {
            let children = self.ast.children(*seg);
            let col_exprs = children
                .iter()
                .filter(|c| self.ast.node(**c).kind.is_col_expr())
                .count();
            if col_exprs == 0 {
                continue;
            }
            if col_exprs != children.len() {
                let other = children
                    .iter()
                    .find(|c| !self.ast.node(**c).kind.is_col_expr())
                    .map(|c| format!("{} {:?}", self.ast.kind(*c), self.ast.text(*c)))
                    .unwrap_or_default();
                return Err(SlqError::Structure(format!(
                    "segment [{}] {:?} mixes column expressions with {}",
                    i,
                    self.ast.text(*seg),
                    other
                )));
            }
            return Ok(Some(*seg));
        }
        Ok(None)
    }

    pub fn count_nodes(&self, kind: Kind) -> usize {
        self.ast.count_nodes(kind)
    }

    pub fn find_nodes(&self, kind: Kind) -> Vec<NodeId> {
        self.ast.find_nodes(kind)
    }
}
