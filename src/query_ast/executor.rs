//! Driver abstraction
//!
//! Each data source type gets a [`Driver`] that knows how to open, ping and
//! describe it. Opening yields a [`Connection`] that runs rendered SQL and
//! hands back fully buffered rows.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};

use super::errors::{Result, SlqError};
use crate::models::enums::DriverType;
use crate::models::structs::{QueryRows, Source, SourceMetadata, SourceSet, Value};

/// Trait for one kind of data source
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Get the driver type this implementation handles
    fn driver_type(&self) -> DriverType;

    /// Open a connection to the source
    async fn open(&self, src: &Source) -> Result<Box<dyn Connection>>;

    /// Check the source is reachable, then let go of it
    async fn ping(&self, src: &Source) -> Result<()>;

    /// Describe the source's tables and columns
    async fn metadata(&self, src: &Source) -> Result<SourceMetadata>;
}

/// An open connection. Whoever opens it must [`Connection::close`] it on every path.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Run a query and buffer every row
    async fn query(&mut self, sql: &str) -> Result<QueryRows>;

    /// Run a statement with positional parameters, returning rows affected
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run one parameterised statement per row
    async fn insert_rows(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let mut affected = 0;
        for row in rows {
            affected += self.execute(sql, row).await?;
        }
        Ok(affected)
    }

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Closes `conn`, logging rather than returning a failure. Used on paths that
/// are already returning some other error.
pub async fn close_quietly(conn: Box<dyn Connection>, what: &str) {
    if let Err(e) = conn.close().await {
        warn!("failed to close connection to {}: {}", what, e);
    }
}

/// Removes a scratch database file when dropped.
#[derive(Debug)]
pub struct ScratchGuard {
    path: Option<PathBuf>,
}

impl ScratchGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()) }
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else { return };
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut p = path.clone().into_os_string();
            p.push(suffix);
            let p = PathBuf::from(p);
            match std::fs::remove_file(&p) {
                Ok(()) => debug!("removed scratch file {}", p.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove scratch file {}: {}", p.display(), e),
            }
        }
    }
}

/// A freshly created scratch database.
pub struct ScratchDb {
    pub source: Source,
    pub conn: Box<dyn Connection>,
    pub guard: ScratchGuard,
}

/// Creates empty local databases to stage data in.
#[async_trait::async_trait]
pub trait ScratchStore: Send + Sync {
    /// Selects the dialect used to render against the scratch database
    fn driver_type(&self) -> DriverType;

    async fn open_new(&self) -> Result<ScratchDb>;
}

/// Registry of drivers, keyed by the source type they handle
pub struct DriverRegistry {
    drivers: HashMap<DriverType, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self { drivers: HashMap::new() }
    }

    /// Register a driver for its source type, replacing any previous one
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.driver_type(), driver);
    }

    /// Get driver for a source type
    pub fn get(&self, driver: DriverType) -> Result<Arc<dyn Driver>> {
        self.drivers
            .get(&driver)
            .cloned()
            .ok_or_else(|| SlqError::Structure(format!("no driver registered for type {}", driver)))
    }

    /// Create a registry with all built-in drivers. Delimited files and
    /// workbooks are loaded into databases obtained from `scratch`.
    pub fn with_defaults(scratch: Arc<dyn ScratchStore>) -> Self {
        use super::executors::{CsvDriver, MySqlDriver, PostgresDriver, SqliteDriver, XlsxDriver};

        let mut registry = Self::new();
        registry.register(Arc::new(MySqlDriver::new()));
        registry.register(Arc::new(PostgresDriver::new()));
        registry.register(Arc::new(SqliteDriver::new()));
        registry.register(Arc::new(CsvDriver::new(DriverType::Csv, Arc::clone(&scratch))));
        registry.register(Arc::new(CsvDriver::new(DriverType::Tsv, Arc::clone(&scratch))));
        registry.register(Arc::new(XlsxDriver::new(scratch)));
        registry
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pings every source concurrently, each bounded by `timeout`. Results come
/// back in source order, keyed by handle.
pub async fn ping_all(
    srcs: &SourceSet,
    registry: &DriverRegistry,
    timeout: Duration,
) -> Vec<(String, Result<()>)> {
    let pings = srcs.items.iter().map(|src| async move {
        let result = match registry.get(src.driver) {
            Ok(driver) => match tokio::time::timeout(timeout, driver.ping(src)).await {
                Ok(r) => r,
                Err(_) => Err(SlqError::driver(
                    format!("ping {}", src.handle),
                    format!("timed out after {:?}", timeout),
                )),
            },
            Err(e) => Err(e),
        };
        debug!("ping {}: {}", src.handle, if result.is_ok() { "ok" } else { "failed" });
        (src.handle.clone(), result)
    });
    join_all(pings).await
}
