//! Semantic passes. They must run in the order [`process`] runs them: column
//! narrowing relies on table selectors already being in place, and join
//! resolution relies on both.

use log::debug;

use super::errors::{Result, SlqError};
use super::inspector::Inspector;
use super::node::{Ast, Kind, NodeId, NodeKind};
use super::walker::{WalkCtx, Walker};

pub fn process(ast: &mut Ast) -> Result<()> {
    narrow_tbl_sel(ast)?;
    narrow_col_sel(ast)?;
    determine_join_tables(ast)?;
    check_row_range(ast)?;
    debug!("processed AST:\n{}", ast);
    Ok(())
}

pub fn narrow_tbl_sel(ast: &mut Ast) -> Result<()> {
    let mut walker = Walker::new(ast);
    walker.add_visitor(Kind::Selector, visit_narrow_tbl_sel);
    walker.walk()
}

pub fn narrow_col_sel(ast: &mut Ast) -> Result<()> {
    let mut walker = Walker::new(ast);
    walker.add_visitor(Kind::Selector, visit_narrow_col_sel);
    walker.walk()
}

pub fn determine_join_tables(ast: &mut Ast) -> Result<()> {
    let mut walker = Walker::new(ast);
    walker.add_visitor(Kind::Join, visit_join);
    walker.walk()
}

pub fn check_row_range(ast: &mut Ast) -> Result<()> {
    let mut walker = Walker::new(ast);
    walker.add_visitor(Kind::RowRange, visit_check_row_range);
    walker.walk()
}

fn segment_index_of(ctx: &WalkCtx<'_>, seg: NodeId) -> Result<usize> {
    ctx.ast.seg_index(seg)
}

/// A top-level selector in the first segment, or in a segment right after an
/// `@handle` segment, names a table.
fn visit_narrow_tbl_sel(ctx: &mut WalkCtx<'_>, id: NodeId) -> Result<()> {
    let seg = match ctx.ast.parent(id) {
        Some(p) if ctx.ast.kind(p) == Kind::Segment => p,
        _ => return Ok(()),
    };
    let table = ctx.ast.sel_value(id);

    if segment_index_of(ctx, seg)? == 0 {
        let handle = ctx.ast.datasource().map(str::to_string).ok_or_else(|| {
            SlqError::Structure(format!(
                "cannot resolve datasource for table {:?}: the query names none and there is no active source",
                table
            ))
        })?;
        check_table_segment(ctx, seg, &handle)?;
        return ctx.ast.replace_node(id, NodeKind::TblSelector { handle, table });
    }

    let prev = match ctx.ast.prev_segment(seg)? {
        Some(prev) => prev,
        None => return Ok(()),
    };
    if ctx.ast.segment_child_kind(prev)? != Some(Kind::Datasource) {
        return Ok(());
    }
    let handle = match &ctx.ast.node(ctx.ast.children(prev)[0]).kind {
        NodeKind::Datasource { handle } => handle.clone(),
        _ => return Err(SlqError::Structure("expected datasource".to_string())),
    };

    check_table_segment(ctx, seg, &handle)?;
    ctx.ast.replace_node(id, NodeKind::TblSelector { handle, table })
}

/// A segment that names tables of `handle` holds nothing else, whether the
/// handle was written in the query or came from the active source.
fn check_table_segment(ctx: &WalkCtx<'_>, seg: NodeId, handle: &str) -> Result<()> {
    match ctx
        .ast
        .children(seg)
        .iter()
        .copied()
        .find(|c| !matches!(ctx.ast.kind(*c), Kind::Selector | Kind::TblSelector))
    {
        Some(other) => Err(SlqError::Structure(format!(
            "segment [{}] naming tables of {} must hold only table selectors, found {} {:?}",
            segment_index_of(ctx, seg)?,
            handle,
            ctx.ast.kind(other),
            ctx.ast.text(other)
        ))),
        None => Ok(()),
    }
}

/// Selectors in a join constraint, or after the final selectable segment,
/// name columns. Anything left over is ambiguous.
fn visit_narrow_col_sel(ctx: &mut WalkCtx<'_>, id: NodeId) -> Result<()> {
    let parent = ctx.ast.parent(id).ok_or_else(|| {
        SlqError::Structure(format!("selector {:?} is detached", ctx.ast.text(id)))
    })?;
    let name = ctx.ast.sel_value(id);

    match ctx.ast.kind(parent) {
        Kind::JoinConstraint => ctx.ast.replace_node(id, NodeKind::ColSelector { name }),
        Kind::Segment => {
            let final_seg = Inspector::new(ctx.ast).find_final_selectable_segment()?;
            let seg_index = segment_index_of(ctx, parent)?;
            if seg_index > segment_index_of(ctx, final_seg)? {
                ctx.ast.replace_node(id, NodeKind::ColSelector { name })
            } else {
                Err(SlqError::Structure(format!(
                    "selector {:?} in segment [{}] is neither a table nor a column",
                    ctx.ast.text(id),
                    seg_index
                )))
            }
        }
        other => Err(SlqError::Structure(format!(
            "selector {:?} cannot appear inside a {}",
            ctx.ast.text(id),
            other
        ))),
    }
}

/// The segment just before a join must hold exactly the two tables it joins.
fn visit_join(ctx: &mut WalkCtx<'_>, id: NodeId) -> Result<()> {
    let seg = ctx
        .ast
        .enclosing_segment(id)
        .ok_or_else(|| SlqError::Structure(format!("join {:?} has no segment", ctx.ast.text(id))))?;
    let prev = ctx.ast.prev_segment(seg)?.ok_or_else(|| {
        SlqError::Structure(format!(
            "join {:?} is the first segment: there are no tables to join",
            ctx.ast.text(id)
        ))
    })?;

    let tables: Vec<NodeId> = ctx.ast.children(prev).to_vec();
    if tables.len() != 2 || tables.iter().any(|t| ctx.ast.kind(*t) != Kind::TblSelector) {
        return Err(SlqError::Structure(format!(
            "join {:?} requires the preceding segment to hold exactly two tables, found {:?}",
            ctx.ast.text(id),
            ctx.ast.text(prev)
        )));
    }

    ctx.ast.replace_node(
        id,
        NodeKind::Join { left: Some(tables[0]), right: Some(tables[1]) },
    )
}

fn visit_check_row_range(ctx: &mut WalkCtx<'_>, id: NodeId) -> Result<()> {
    if let NodeKind::RowRange { offset, limit } = ctx.ast.node(id).kind {
        if offset < -1 || limit < -1 {
            return Err(SlqError::Structure(format!(
                "row range {:?} has invalid offset {} or limit {}",
                ctx.ast.text(id),
                offset,
                limit
            )));
        }
    }
    if let Some(first) = ctx.state {
        return Err(SlqError::Structure(format!(
            "only one row range permitted: found {:?} and {:?}",
            ctx.ast.text(first),
            ctx.ast.text(id)
        )));
    }
    ctx.state = Some(id);
    Ok(())
}
