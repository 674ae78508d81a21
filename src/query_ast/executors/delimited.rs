//! CSV/TSV driver
//!
//! A delimited file has no SQL engine of its own, so opening one loads it into
//! a fresh scratch database as the single table `data` and hands back that
//! database's connection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::models::enums::{DriverType, ScanKind};
use crate::models::structs::{ColumnMetadata, QueryRows, Source, SourceMetadata, TableMetadata, Value};
use crate::query_ast::emitter::get_dialect;
use crate::query_ast::errors::{Result, SlqError};
use crate::query_ast::executor::{Connection, Driver, ScratchDb, ScratchGuard, ScratchStore, close_quietly};

/// Table name a delimited file is loaded as
pub const TABLE_NAME: &str = "data";

pub struct CsvDriver {
    driver: DriverType,
    scratch: Arc<dyn ScratchStore>,
}

impl CsvDriver {
    pub fn new(driver: DriverType, scratch: Arc<dyn ScratchStore>) -> Self {
        Self { driver, scratch }
    }

    fn delimiter(&self, src: &Source) -> Result<u8> {
        let Some(val) = src.option("delim").filter(|v| !v.is_empty()) else {
            return Ok(if self.driver == DriverType::Tsv { b'\t' } else { b',' });
        };
        let named = match val {
            "comma" => Some(b','),
            "tab" => Some(b'\t'),
            "semi" => Some(b';'),
            "pipe" => Some(b'|'),
            "space" => Some(b' '),
            "colon" => Some(b':'),
            _ => None,
        };
        match (named, val.as_bytes()) {
            (Some(b), _) => Ok(b),
            (None, [b]) if b.is_ascii() => Ok(*b),
            _ => Err(SlqError::Config(format!("{}: unknown delimiter {:?}", src.handle, val))),
        }
    }

    fn has_header(src: &Source) -> Result<bool> {
        match src.option("header") {
            None => Ok(false),
            Some(v) => v
                .parse::<bool>()
                .map_err(|_| SlqError::Config(format!("{}: header must be true or false, got {:?}", src.handle, v))),
        }
    }

    /// Reads the whole file into column names, inferred kinds and cells.
    fn read(&self, src: &Source) -> Result<Delimited> {
        let delim = self.delimiter(src)?;
        let header = Self::has_header(src)?;

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delim)
            .has_headers(false)
            .flexible(true)
            .from_path(&src.location)
            .map_err(|e| SlqError::driver(format!("open {}", src.handle), e))?;

        let mut records: Vec<Vec<String>> = Vec::new();
        for rec in rdr.records() {
            let rec = rec.map_err(|e| SlqError::driver(format!("read {}", src.handle), e))?;
            records.push(rec.iter().map(str::to_string).collect());
        }

        let names: Vec<String> = if header && !records.is_empty() {
            records.remove(0)
        } else {
            let width = records.iter().map(Vec::len).max().unwrap_or(0);
            (0..width).map(alpha_col_name).collect()
        };
        if names.is_empty() {
            return Err(SlqError::driver(format!("read {}", src.handle), "file has no columns"));
        }

        let kinds: Vec<ScanKind> = (0..names.len()).map(|i| infer_kind(&records, i)).collect();
        let rows = records
            .iter()
            .map(|rec| {
                kinds
                    .iter()
                    .enumerate()
                    .map(|(i, k)| to_value(rec.get(i).map(String::as_str), *k))
                    .collect()
            })
            .collect();

        debug!(
            "CsvDriver: read {} rows, {} columns from {}",
            records.len(),
            names.len(),
            src.location
        );
        Ok(Delimited { names, kinds, rows })
    }
}

struct Delimited {
    names: Vec<String>,
    kinds: Vec<ScanKind>,
    rows: Vec<Vec<Value>>,
}

/// Creates `table` in the scratch database and inserts `rows` into it.
pub(crate) async fn load_table(
    scratch: &mut ScratchDb,
    dialect: DriverType,
    table: &str,
    names: &[String],
    kinds: &[ScanKind],
    rows: &[Vec<Value>],
) -> Result<()> {
    let dialect = get_dialect(dialect);
    let create = dialect.create_table(table, names, kinds)?;
    let insert = dialect.create_insert_stmt(table, names)?;
    scratch.conn.execute(&create, &[]).await?;
    let n = scratch.conn.insert_rows(&insert, rows).await?;
    debug!("loaded {} rows into {}.{}", n, scratch.source.handle, table);
    Ok(())
}

/// 0 -> `A`, 25 -> `Z`, 26 -> `AA`, 27 -> `AB`
pub fn alpha_col_name(mut n: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

fn infer_kind(records: &[Vec<String>], col: usize) -> ScanKind {
    let mut cells = records
        .iter()
        .filter_map(|r| r.get(col))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .peekable();
    if cells.peek().is_none() {
        return ScanKind::Text;
    }
    let mut kind = ScanKind::Int;
    for cell in cells {
        if kind == ScanKind::Int && cell.parse::<i64>().is_err() {
            kind = ScanKind::Float;
        }
        if kind == ScanKind::Float && cell.parse::<f64>().is_err() {
            return ScanKind::Text;
        }
    }
    kind
}

fn to_value(cell: Option<&str>, kind: ScanKind) -> Value {
    let Some(cell) = cell.filter(|c| !c.trim().is_empty()) else {
        return Value::Null;
    };
    let parsed = match kind {
        ScanKind::Int => cell.trim().parse().ok().map(Value::Int),
        ScanKind::Float => cell.trim().parse().ok().map(Value::Float),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::Text(cell.to_string()))
}

/// A scratch connection holding a loaded file, plus the guard that deletes
/// its database on drop.
pub(crate) struct StagedConnection {
    inner: Box<dyn Connection>,
    _guard: ScratchGuard,
}

impl StagedConnection {
    pub(crate) fn new(scratch: ScratchDb) -> Self {
        Self { inner: scratch.conn, _guard: scratch.guard }
    }
}

#[async_trait]
impl Connection for StagedConnection {
    async fn query(&mut self, sql: &str) -> Result<QueryRows> {
        self.inner.query(sql).await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner.execute(sql, params).await
    }

    async fn insert_rows(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        self.inner.insert_rows(sql, rows).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let StagedConnection { inner, _guard } = *self;
        inner.close().await
    }
}

#[async_trait]
impl Driver for CsvDriver {
    fn driver_type(&self) -> DriverType {
        self.driver
    }

    async fn open(&self, src: &Source) -> Result<Box<dyn Connection>> {
        let data = self.read(src)?;
        let mut scratch = self.scratch.open_new().await?;
        let loaded = load_table(
            &mut scratch,
            self.scratch.driver_type(),
            TABLE_NAME,
            &data.names,
            &data.kinds,
            &data.rows,
        )
        .await;
        if let Err(e) = loaded {
            close_quietly(scratch.conn, &scratch.source.handle).await;
            return Err(e);
        }
        debug!("CsvDriver: opened {} via {}", src.handle, scratch.source.location);
        Ok(Box::new(StagedConnection::new(scratch)))
    }

    async fn ping(&self, src: &Source) -> Result<()> {
        std::fs::File::open(&src.location)
            .map(|_| ())
            .map_err(|e| SlqError::driver(format!("ping {}", src.handle), e))
    }

    async fn metadata(&self, src: &Source) -> Result<SourceMetadata> {
        let data = self.read(src)?;
        let columns = data
            .names
            .iter()
            .zip(&data.kinds)
            .enumerate()
            .map(|(i, (name, kind))| ColumnMetadata {
                name: name.clone(),
                position: i,
                data_type: crate::query_ast::emitter::sqlite_affinity(*kind).to_string(),
                kind: *kind,
                nullable: true,
            })
            .collect();
        let name = Path::new(&src.location)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(SourceMetadata {
            handle: src.handle.clone(),
            location: src.location.clone(),
            driver: self.driver,
            name,
            tables: vec![TableMetadata { name: TABLE_NAME.to_string(), columns }],
        })
    }
}
