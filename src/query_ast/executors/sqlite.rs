//! SQLite driver

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, Statement};

use super::{describe_columns, get, group_tables, unscanned};
use crate::models::enums::{DriverType, ScanKind};
use crate::models::structs::{ColumnMetadata, QueryRows, Source, SourceMetadata, Value};
use crate::query_ast::errors::{Result, SlqError};
use crate::query_ast::executor::{Connection, Driver};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteDriver {
    // Stateless: every open() builds its own pool
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// `sqlite3:///data/sakila.db?mode=rwc` -> (`/data/sakila.db`, `mode=rwc`)
pub(crate) fn split_location(location: &str) -> (&str, &str) {
    let rest = location
        .strip_prefix("sqlite3://")
        .or_else(|| location.strip_prefix("sqlite://"))
        .unwrap_or(location);
    rest.split_once('?').unwrap_or((rest, ""))
}

fn connect_options(src: &Source) -> SqliteConnectOptions {
    let (path, params) = split_location(&src.location);
    let create = params.split('&').any(|kv| kv == "mode=rwc");
    SqliteConnectOptions::new().filename(path).create_if_missing(create)
}

/// Opens a single-connection pool, so every statement on the returned
/// connection sees the same database state.
pub(crate) async fn connect(opts: SqliteConnectOptions, label: &str) -> Result<SqliteConnection> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(opts)
        .await
        .map_err(|e| SlqError::driver(format!("open {}", label), e))?;
    debug!("SqliteDriver: opened {}", label);
    Ok(SqliteConnection { pool, label: label.to_string() })
}

pub struct SqliteConnection {
    pool: SqlitePool,
    label: String,
}

fn bind_value<'q>(q: SqliteQuery<'q>, v: &Value) -> SqliteQuery<'q> {
    match v {
        Value::Null => q.bind(None::<String>),
        Value::Int(n) => q.bind(*n),
        Value::Float(f) => q.bind(*f),
        Value::Bool(b) => q.bind(*b),
        Value::Text(s) => q.bind(s.clone()),
        Value::Bytes(b) => q.bind(b.clone()),
    }
}

fn decode_cell(row: &SqliteRow, i: usize, kind: ScanKind) -> Result<Value> {
    let scanned = match kind {
        ScanKind::Int => get::<_, i64>(row, i).map(|v| v.map_or(Value::Null, Value::Int)),
        ScanKind::Bool => get::<_, bool>(row, i).map(|v| v.map_or(Value::Null, Value::Bool)),
        ScanKind::Float | ScanKind::Decimal => get::<_, f64>(row, i).map(|v| v.map_or(Value::Null, Value::Float)),
        ScanKind::Bytes => get::<_, Vec<u8>>(row, i).map(|v| v.map_or(Value::Null, Value::Bytes)),
        ScanKind::Text | ScanKind::DateTime | ScanKind::Null => None,
    };
    match scanned.or_else(|| fallback(row, i)) {
        Some(v) => Ok(v),
        None => unscanned(row, i),
    }
}

// SQLite is dynamically typed: a column declared INTEGER can hold text.
fn fallback(row: &SqliteRow, i: usize) -> Option<Value> {
    get::<_, String>(row, i)
        .map(|v| v.map_or(Value::Null, Value::Text))
        .or_else(|| get::<_, i64>(row, i).map(|v| v.map_or(Value::Null, Value::Int)))
        .or_else(|| get::<_, f64>(row, i).map(|v| v.map_or(Value::Null, Value::Float)))
        .or_else(|| get::<_, Vec<u8>>(row, i).map(|v| v.map_or(Value::Null, Value::Bytes)))
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn query(&mut self, sql: &str) -> Result<QueryRows> {
        debug!("SqliteDriver: query on {}", self.label);
        debug!("SQL: {}", sql);

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SlqError::driver(format!("query {}", self.label), e))?;

        let fields = match rows.first() {
            Some(row) => describe_columns(row.columns()),
            None => describe_columns((&self.pool).prepare(sql).await?.columns()),
        };
        let data = rows
            .iter()
            .map(|row| {
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| decode_cell(row, i, f.kind))
                    .collect::<Result<Vec<Value>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "SqliteDriver: query returned {} rows, {} columns",
            data.len(),
            fields.len()
        );
        Ok(QueryRows { fields, rows: data })
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut q = sqlx::query(sql);
        for p in params {
            q = bind_value(q, p);
        }
        let done = q
            .execute(&self.pool)
            .await
            .map_err(|e| SlqError::driver(format!("execute on {}", self.label), e))?;
        Ok(done.rows_affected())
    }

    async fn insert_rows(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for row in rows {
            let mut q = sqlx::query(sql);
            for v in row {
                q = bind_value(q, v);
            }
            affected += q
                .execute(&mut *tx)
                .await
                .map_err(|e| SlqError::driver(format!("insert into {}", self.label), e))?
                .rows_affected();
        }
        tx.commit().await?;
        debug!("SqliteDriver: inserted {} rows into {}", affected, self.label);
        Ok(affected)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.pool.close().await;
        debug!("SqliteDriver: closed {}", self.label);
        Ok(())
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::SQLite
    }

    async fn open(&self, src: &Source) -> Result<Box<dyn Connection>> {
        Ok(Box::new(connect(connect_options(src), &src.handle).await?))
    }

    async fn ping(&self, src: &Source) -> Result<()> {
        let (path, params) = split_location(&src.location);
        if !params.contains("mode=rwc") && !Path::new(path).is_file() {
            return Err(SlqError::driver(
                format!("ping {}", src.handle),
                format!("no such database file: {}", path),
            ));
        }
        let mut conn = self.open(src).await?;
        let result = conn.query("SELECT 1").await;
        conn.close().await?;
        result.map(|_| ())
    }

    async fn metadata(&self, src: &Source) -> Result<SourceMetadata> {
        let conn = connect(connect_options(src), &src.handle).await?;
        let result = table_metadata(&conn.pool).await;
        conn.pool.close().await;

        let (path, _) = split_location(&src.location);
        let name = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(SourceMetadata {
            handle: src.handle.clone(),
            location: src.location.clone(),
            driver: DriverType::SQLite,
            name,
            tables: result?,
        })
    }
}

async fn table_metadata(pool: &SqlitePool) -> Result<Vec<crate::models::structs::TableMetadata>> {
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut cols = Vec::new();
    for table in tables {
        let escaped = table.replace('\'', "''");
        let rows = sqlx::query(&format!("PRAGMA table_info('{}')", escaped))
            .fetch_all(pool)
            .await?;
        for row in rows {
            let data_type: String = row.try_get("type").unwrap_or_default();
            let position: i64 = row.try_get("cid").unwrap_or_default();
            let notnull: i64 = row.try_get("notnull").unwrap_or_default();
            cols.push((
                table.clone(),
                ColumnMetadata {
                    name: row.try_get("name").unwrap_or_default(),
                    position: position as usize,
                    kind: ScanKind::from_type_name(&data_type),
                    data_type,
                    nullable: notnull == 0,
                },
            ));
        }
    }
    Ok(group_tables(cols))
}
