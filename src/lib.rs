pub mod config;
pub mod export;
pub mod models;
pub mod query_ast;

use std::io::Write;
use std::sync::Arc;

use crate::export::CsvRecordWriter;
use crate::query_ast::errors::Result;
use crate::query_ast::executors::SqliteScratchStore;
use crate::query_ast::{DriverRegistry, Engine, build_plan};

/// Loads `.env` and starts the logger: debug for this crate, `RUST_LOG` for
/// everything else. Calling it again leaves the installed logger in place.
pub fn init_logging() {
    dotenv::dotenv().ok();
    if let Err(e) = env_logger::Builder::from_default_env()
        .filter_module("slq", log::LevelFilter::Debug)
        .try_init()
    {
        log::debug!("logger already installed: {}", e);
    }
}

/// Compiles and runs `query` against the sources in `sources_file`, writing
/// CSV to `out`.
pub async fn run<W: Write + Send>(sources_file: &std::path::Path, query: &str, out: W) -> Result<()> {
    let srcs = config::load_sources(sources_file)?;
    let plan = build_plan(&srcs, query)?;

    let scratch = Arc::new(SqliteScratchStore::new(config::scratch_dir()));
    let registry = DriverRegistry::with_defaults(scratch.clone());
    let engine = Engine::new(&srcs, &registry, scratch.as_ref());

    let mut writer = CsvRecordWriter::new(out);
    engine.execute(&plan, &mut writer).await
}
