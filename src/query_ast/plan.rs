//! Flat, execution-ready form of a query.

use std::fmt;

use log::debug;

use super::errors::{Result, SlqError};
use super::inspector::Inspector;
use super::node::{Ast, Kind, NodeId, NodeKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TblSel {
    pub handle: String,
    pub table: String,
}

impl fmt::Display for TblSel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.handle, self.table)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinConstraint {
    /// `join()`
    Natural,
    /// `join(.uid)`: both tables share the column name.
    Using(String),
    /// `join(.user.uid == .address.uid)`
    Cmp { left: String, op: String, right: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinSel {
    pub left: TblSel,
    pub right: TblSel,
    pub constraint: JoinConstraint,
}

impl JoinSel {
    pub fn is_cross_source(&self) -> bool {
        self.left.handle != self.right.handle
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selectable {
    Table(TblSel),
    Join(JoinSel),
}

/// A projected column: `uid` or `user.uid`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColExpr {
    pub name: String,
}

impl ColExpr {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// `-1` in either field means unset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowRange {
    pub offset: i64,
    pub limit: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub selectable: Selectable,
    /// Empty means every column.
    pub cols: Vec<ColExpr>,
    pub range: Option<RowRange>,
}

impl Plan {
    pub fn build(ast: &Ast) -> Result<Plan> {
        if ast.segments().is_empty() {
            return Err(SlqError::Structure("query has no segments".to_string()));
        }
        let ins = Inspector::new(ast);

        let sel_seg = ins.find_final_selectable_segment()?;
        let sel_index = ast.seg_index(sel_seg)?;
        let selectables: Vec<NodeId> = ast
            .children(sel_seg)
            .iter()
            .copied()
            .filter(|c| ast.node(*c).kind.is_selectable())
            .collect();
        if selectables.len() != 1 {
            return Err(SlqError::Structure(format!(
                "segment [{}] {:?} must have exactly one selectable element, found {}",
                sel_index,
                ast.text(sel_seg),
                selectables.len()
            )));
        }
        let selectable = to_selectable(ast, selectables[0])?;

        let mut range: Option<(NodeId, RowRange)> = None;
        for seg in &ast.segments()[sel_index..] {
            for child in ast.children(*seg) {
                if let NodeKind::RowRange { offset, limit } = ast.node(*child).kind {
                    if let Some((first, _)) = range {
                        return Err(SlqError::Structure(format!(
                            "only one row range permitted: found {:?} and {:?}",
                            ast.text(first),
                            ast.text(*child)
                        )));
                    }
                    range = Some((*child, RowRange { offset, limit }));
                }
            }
        }

        let cols = match ins.find_col_expr_segment()? {
            Some(seg) => ast
                .children(seg)
                .iter()
                .map(|c| match &ast.node(*c).kind {
                    NodeKind::ColSelector { name } => Ok(ColExpr::new(name.clone())),
                    _ => Err(SlqError::Structure(format!(
                        "{:?} is not a column expression",
                        ast.text(*c)
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let plan = Plan { selectable, cols, range: range.map(|(_, r)| r) };
        debug!("plan: {:?}", plan);
        Ok(plan)
    }
}

fn to_tbl_sel(ast: &Ast, id: NodeId) -> Result<TblSel> {
    match &ast.node(id).kind {
        NodeKind::TblSelector { handle, table } => Ok(TblSel { handle: handle.clone(), table: table.clone() }),
        _ => Err(SlqError::Structure(format!(
            "expected a table selector, found {} {:?}",
            ast.kind(id),
            ast.text(id)
        ))),
    }
}

fn to_selectable(ast: &Ast, id: NodeId) -> Result<Selectable> {
    match &ast.node(id).kind {
        NodeKind::TblSelector { .. } => Ok(Selectable::Table(to_tbl_sel(ast, id)?)),
        NodeKind::Join { left: Some(left), right: Some(right) } => Ok(Selectable::Join(JoinSel {
            left: to_tbl_sel(ast, *left)?,
            right: to_tbl_sel(ast, *right)?,
            constraint: to_join_constraint(ast, id)?,
        })),
        NodeKind::Join { .. } => Err(SlqError::Structure(format!(
            "join {:?} has unresolved tables",
            ast.text(id)
        ))),
        _ => Err(SlqError::Structure(format!("{:?} is not selectable", ast.text(id)))),
    }
}

fn col_name(ast: &Ast, id: NodeId) -> Result<String> {
    match &ast.node(id).kind {
        NodeKind::ColSelector { name } => Ok(name.clone()),
        _ => Err(SlqError::Structure(format!(
            "expected a column in join constraint, found {} {:?}",
            ast.kind(id),
            ast.text(id)
        ))),
    }
}

fn to_join_constraint(ast: &Ast, join: NodeId) -> Result<JoinConstraint> {
    let constraint = match ast.children(join).first() {
        Some(c) if ast.kind(*c) == Kind::JoinConstraint => *c,
        Some(c) => {
            return Err(SlqError::Structure(format!(
                "unexpected {} in join {:?}",
                ast.kind(*c),
                ast.text(join)
            )));
        }
        None => return Ok(JoinConstraint::Natural),
    };

    match ast.children(constraint) {
        [] => Ok(JoinConstraint::Natural),
        [col] => Ok(JoinConstraint::Using(col_name(ast, *col)?)),
        [left, op, right] => {
            let op = match &ast.node(*op).kind {
                NodeKind::Cmpr { op } => op.clone(),
                _ => {
                    return Err(SlqError::Structure(format!(
                        "expected a comparison operator in join, found {:?}",
                        ast.text(*op)
                    )));
                }
            };
            Ok(JoinConstraint::Cmp { left: col_name(ast, *left)?, op, right: col_name(ast, *right)? })
        }
        other => Err(SlqError::Structure(format!(
            "join constraint {:?} has {} elements",
            ast.text(constraint),
            other.len()
        ))),
    }
}
