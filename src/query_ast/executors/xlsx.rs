//! Excel workbook driver
//!
//! Like delimited files, a workbook is loaded into a fresh scratch database
//! on open. Every non-empty sheet becomes a table named after the sheet.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use calamine::{Data, Reader, Xlsx, open_workbook};
use log::{debug, warn};

use super::delimited::{StagedConnection, alpha_col_name, load_table};
use crate::models::enums::{DriverType, ScanKind};
use crate::models::structs::{ColumnMetadata, Source, SourceMetadata, TableMetadata, Value};
use crate::query_ast::emitter::sqlite_affinity;
use crate::query_ast::errors::{Result, SlqError};
use crate::query_ast::executor::{Connection, Driver, ScratchStore, close_quietly};

pub struct XlsxDriver {
    scratch: Arc<dyn ScratchStore>,
}

/// One sheet, ready to load.
struct SheetTable {
    name: String,
    names: Vec<String>,
    kinds: Vec<ScanKind>,
    rows: Vec<Vec<Value>>,
}

impl XlsxDriver {
    pub fn new(scratch: Arc<dyn ScratchStore>) -> Self {
        Self { scratch }
    }

    /// `Some(b)` when the source sets `header`, `None` to detect it per sheet.
    fn header_option(src: &Source) -> Result<Option<bool>> {
        src.option("header")
            .map(|v| {
                v.parse::<bool>()
                    .map_err(|_| SlqError::Config(format!("{}: header must be true or false, got {:?}", src.handle, v)))
            })
            .transpose()
    }

    fn read(&self, src: &Source) -> Result<Vec<SheetTable>> {
        let header = Self::header_option(src)?;
        let mut workbook: Xlsx<_> =
            open_workbook(&src.location).map_err(|e| SlqError::driver(format!("open {}", src.handle), e))?;

        let mut tables = Vec::new();
        for sheet in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&sheet)
                .map_err(|e| SlqError::driver(format!("read {} sheet {:?}", src.handle, sheet), e))?;
            let cells: Vec<&[Data]> = range.rows().collect();
            if cells.iter().all(|row| row.iter().all(|c| *c == Data::Empty)) {
                warn!("XlsxDriver: sheet {:?} in {} is empty: skipping", sheet, src.handle);
                continue;
            }
            tables.push(sheet_table(sheet, &cells, header));
        }
        if tables.is_empty() {
            return Err(SlqError::driver(format!("read {}", src.handle), "workbook has no data"));
        }
        debug!("XlsxDriver: read {} sheets from {}", tables.len(), src.location);
        Ok(tables)
    }
}

fn sheet_table(name: String, cells: &[&[Data]], header: Option<bool>) -> SheetTable {
    let width = cells.iter().map(|r| r.len()).max().unwrap_or(0);
    let header = header.unwrap_or_else(|| detect_header(cells, width));
    let (head, body) = match cells.split_first() {
        Some((first, rest)) if header => (Some(*first), rest),
        _ => (None, cells),
    };

    let names = column_names(head, width);
    let kinds: Vec<ScanKind> = (0..width).map(|i| column_kind(body, i)).collect();
    let rows = body
        .iter()
        .map(|row| {
            kinds
                .iter()
                .enumerate()
                .map(|(i, k)| cell_value(row.get(i).unwrap_or(&Data::Empty), *k))
                .collect()
        })
        .collect();
    SheetTable { name, names, kinds, rows }
}

/// A first row is a header when the column kinds change once it's left out.
fn detect_header(cells: &[&[Data]], width: usize) -> bool {
    if cells.len() < 2 {
        return false;
    }
    (0..width).any(|i| column_kind(cells, i) != column_kind(&cells[1..], i))
}

fn column_names(head: Option<&[Data]>, width: usize) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(width);
    for i in 0..width {
        let base = match head.and_then(|h| h.get(i)) {
            Some(Data::Empty) | None => alpha_col_name(i),
            Some(cell) => cell.to_string().trim().to_string(),
        };
        let mut name = base.clone();
        let mut n = 0;
        while names.contains(&name) {
            n += 1;
            name = format!("{}_{}", base, n);
        }
        names.push(name);
    }
    names
}

fn cell_kind(cell: &Data) -> Option<ScanKind> {
    match cell {
        Data::Empty => None,
        Data::Int(_) => Some(ScanKind::Int),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(ScanKind::Int),
        Data::Float(_) => Some(ScanKind::Float),
        Data::Bool(_) => Some(ScanKind::Bool),
        Data::DateTime(_) | Data::DateTimeIso(_) => Some(ScanKind::DateTime),
        _ => Some(ScanKind::Text),
    }
}

/// Column kind over every non-empty cell: ints widen to floats, anything
/// else mixed becomes text.
fn column_kind(rows: &[&[Data]], col: usize) -> ScanKind {
    let mut kind = None;
    for cell in rows.iter().filter_map(|r| r.get(col)) {
        let Some(k) = cell_kind(cell) else { continue };
        kind = Some(match (kind, k) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ScanKind::Int), ScanKind::Float) | (Some(ScanKind::Float), ScanKind::Int) => ScanKind::Float,
            _ => return ScanKind::Text,
        });
    }
    kind.unwrap_or(ScanKind::Text)
}

fn cell_value(cell: &Data, kind: ScanKind) -> Value {
    match (cell, kind) {
        (Data::Empty, _) => Value::Null,
        (Data::Int(n), ScanKind::Int) => Value::Int(*n),
        (Data::Float(f), ScanKind::Int) => Value::Int(*f as i64),
        (Data::Int(n), ScanKind::Float) => Value::Float(*n as f64),
        (Data::Float(f), ScanKind::Float) => Value::Float(*f),
        (Data::Bool(b), ScanKind::Bool) => Value::Bool(*b),
        (Data::DateTime(dt), _) => match dt.as_datetime() {
            Some(t) => Value::Text(t.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Value::Text(dt.to_string()),
        },
        (other, _) => Value::Text(other.to_string()),
    }
}

#[async_trait]
impl Driver for XlsxDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::Xlsx
    }

    async fn open(&self, src: &Source) -> Result<Box<dyn Connection>> {
        let tables = self.read(src)?;
        let mut scratch = self.scratch.open_new().await?;
        for t in &tables {
            let loaded =
                load_table(&mut scratch, self.scratch.driver_type(), &t.name, &t.names, &t.kinds, &t.rows).await;
            if let Err(e) = loaded {
                close_quietly(scratch.conn, &scratch.source.handle).await;
                return Err(e);
            }
        }
        debug!("XlsxDriver: opened {} via {}", src.handle, scratch.source.location);
        Ok(Box::new(StagedConnection::new(scratch)))
    }

    async fn ping(&self, src: &Source) -> Result<()> {
        std::fs::File::open(&src.location)
            .map(|_| ())
            .map_err(|e| SlqError::driver(format!("ping {}", src.handle), e))
    }

    async fn metadata(&self, src: &Source) -> Result<SourceMetadata> {
        let tables = self
            .read(src)?
            .into_iter()
            .map(|t| TableMetadata {
                columns: t
                    .names
                    .into_iter()
                    .zip(t.kinds)
                    .enumerate()
                    .map(|(i, (name, kind))| ColumnMetadata {
                        name,
                        position: i,
                        data_type: sqlite_affinity(kind).to_string(),
                        kind,
                        nullable: true,
                    })
                    .collect(),
                name: t.name,
            })
            .collect();
        let name = Path::new(&src.location)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(SourceMetadata {
            handle: src.handle.clone(),
            location: src.location.clone(),
            driver: DriverType::Xlsx,
            name,
            tables,
        })
    }
}
