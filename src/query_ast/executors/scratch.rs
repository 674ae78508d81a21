//! Scratch databases for cross-source joins and delimited files

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};

use super::sqlite::connect;
use crate::models::enums::DriverType;
use crate::models::structs::Source;
use crate::query_ast::errors::Result;
use crate::query_ast::executor::{ScratchDb, ScratchGuard, ScratchStore};

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Hands out fresh SQLite files under `dir`. Each file lives only as long as
/// the [`ScratchGuard`] returned with it.
pub struct SqliteScratchStore {
    dir: PathBuf,
}

impl SqliteScratchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn next_path(&self) -> PathBuf {
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "scratch_{}_{}_{}.db",
            std::process::id(),
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            seq
        ))
    }
}

#[async_trait]
impl ScratchStore for SqliteScratchStore {
    fn driver_type(&self) -> DriverType {
        DriverType::SQLite
    }

    async fn open_new(&self) -> Result<ScratchDb> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.next_path();
        // Guard first: the file goes away even if connecting fails halfway.
        let guard = ScratchGuard::new(&path);

        let source = Source::new("@scratch", path.display().to_string(), DriverType::SQLite);
        let opts = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Memory);
        let conn = connect(opts, &source.handle).await?;
        debug!("scratch database at {}", path.display());

        Ok(ScratchDb { source, conn: Box::new(conn), guard })
    }
}
