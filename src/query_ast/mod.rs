//! SLQ compiler and execution engine
//!
//! Pipeline: text -> [`parse_tree::ParseNode`] (parser) -> [`node::Ast`]
//! (builder) -> semantic passes -> [`plan::Plan`] -> SQL (emitter) -> rows
//! (engine). Everything up to the plan is pure; only the engine does I/O.

pub mod builder;
pub mod emitter;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod executors;
pub mod federation;
pub mod inspector;
pub mod node;
pub mod parse_tree;
pub mod parser;
pub mod passes;
pub mod plan;
pub mod scan;
pub mod walker;

pub use engine::Engine;
pub use errors::*;
pub use executor::{DriverRegistry, ScratchStore};
pub use node::Ast;
pub use plan::Plan;

use log::debug;

use crate::models::structs::SourceSet;
use inspector::Inspector;

/// Parses `input` into an AST, before any semantic pass has run.
pub fn parse(input: &str) -> Result<Ast> {
    let tree = parser::parse_query(input)?;
    builder::build_ast(input, &tree)
}

/// Compiles `input` to a plan. A query that names no datasource runs against
/// the active source of `srcs`.
pub fn build_plan(srcs: &SourceSet, input: &str) -> Result<Plan> {
    let mut ast = parse(input)?;

    let handle = match Inspector::new(&ast).find_datasource()? {
        Some(handle) => handle,
        None => srcs
            .active()
            .map(|s| s.handle.clone())
            .ok_or_else(|| SlqError::Structure("query names no data source and none is active".to_string()))?,
    };
    srcs.get(&handle)?;
    ast.set_datasource(&handle)?;

    passes::process(&mut ast)?;
    debug!("ast:\n{}", ast);
    Plan::build(&ast)
}
