//! PostgreSQL driver

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::types::{JsonValue, Uuid};
use sqlx::{Executor, Postgres, Row, Statement};

use super::{describe_columns, get, group_tables, unscanned};
use crate::models::enums::{DriverType, ScanKind};
use crate::models::structs::{ColumnMetadata, QueryRows, Source, SourceMetadata, Value};
use crate::query_ast::errors::{Result, SlqError};
use crate::query_ast::executor::{Connection, Driver};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

pub struct PostgresDriver {
    // Stateless: every open() builds its own pool
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self {}
    }

    async fn pool(&self, src: &Source) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(1200))
            .test_before_acquire(true)
            .connect(&src.location)
            .await
            .map_err(|e| SlqError::driver(format!("open {}", src.handle), e))?;
        debug!("PostgresDriver: opened {}", src.handle);
        Ok(pool)
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PostgresConnection {
    pool: PgPool,
    label: String,
}

fn bind_value<'q>(q: PgQuery<'q>, v: &Value) -> PgQuery<'q> {
    match v {
        Value::Null => q.bind(None::<String>),
        Value::Int(n) => q.bind(*n),
        Value::Float(f) => q.bind(*f),
        Value::Bool(b) => q.bind(*b),
        Value::Text(s) => q.bind(s.clone()),
        Value::Bytes(b) => q.bind(b.clone()),
    }
}

// Postgres is strict about widths: an INT4 only decodes as i32.
fn decode_int(row: &PgRow, i: usize) -> Option<Value> {
    get::<_, i64>(row, i)
        .or_else(|| get::<_, i32>(row, i).map(|v| v.map(i64::from)))
        .or_else(|| get::<_, i16>(row, i).map(|v| v.map(i64::from)))
        .or_else(|| get::<_, i8>(row, i).map(|v| v.map(i64::from)))
        .map(|v| v.map_or(Value::Null, Value::Int))
}

fn decode_float(row: &PgRow, i: usize) -> Option<Value> {
    get::<_, f64>(row, i)
        .or_else(|| get::<_, f32>(row, i).map(|v| v.map(f64::from)))
        .map(|v| v.map_or(Value::Null, Value::Float))
}

fn decode_datetime(row: &PgRow, i: usize) -> Option<Value> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let text = get::<_, DateTime<Utc>>(row, i)
        .map(|v| v.map(|t| t.to_rfc3339()))
        .or_else(|| get::<_, NaiveDateTime>(row, i).map(|v| v.map(|t| t.to_string())))
        .or_else(|| get::<_, NaiveDate>(row, i).map(|v| v.map(|t| t.to_string())))
        .or_else(|| get::<_, NaiveTime>(row, i).map(|v| v.map(|t| t.to_string())))
        .or_else(|| get::<_, PgInterval>(row, i).map(|v| v.map(|iv| format_interval(&iv))))?;
    Some(text.map_or(Value::Null, Value::Text))
}

// MONEY carries no scale on the wire; two fraction digits covers most locales.
fn decode_decimal(row: &PgRow, i: usize) -> Option<Value> {
    get::<_, rust_decimal::Decimal>(row, i)
        .or_else(|| get::<_, PgMoney>(row, i).map(|v| v.map(|m| m.to_decimal(2))))
        .map(|v| v.map_or(Value::Null, |d| Value::Text(d.to_string())))
}

// String only decodes from the character types.
fn decode_text(row: &PgRow, i: usize) -> Option<Value> {
    get::<_, String>(row, i)
        .or_else(|| get::<_, Uuid>(row, i).map(|v| v.map(|u| u.to_string())))
        .or_else(|| get::<_, JsonValue>(row, i).map(|v| v.map(|j| j.to_string())))
        .map(|v| v.map_or(Value::Null, Value::Text))
}

/// Renders an interval the way psql does: `1 year 2 mons 3 days 04:05:06`.
fn format_interval(iv: &PgInterval) -> String {
    fn unit(n: i64, name: &str) -> String {
        format!("{} {}{}", n, name, if n.abs() == 1 { "" } else { "s" })
    }

    let mut parts = Vec::new();
    let (years, months) = (iv.months / 12, iv.months % 12);
    if years != 0 {
        parts.push(unit(years.into(), "year"));
    }
    if months != 0 {
        parts.push(unit(months.into(), "mon"));
    }
    if iv.days != 0 {
        parts.push(unit(iv.days.into(), "day"));
    }
    if iv.microseconds != 0 || parts.is_empty() {
        let sign = if iv.microseconds < 0 { "-" } else { "" };
        let micros = iv.microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut time = format!("{}{:02}:{:02}:{:02}", sign, secs / 3600, secs / 60 % 60, secs % 60);
        let frac = micros % 1_000_000;
        if frac != 0 {
            time.push_str(format!(".{:06}", frac).trim_end_matches('0'));
        }
        parts.push(time);
    }
    parts.join(" ")
}

fn decode_cell(row: &PgRow, i: usize, kind: ScanKind) -> Result<Value> {
    let scanned = match kind {
        ScanKind::Int => decode_int(row, i),
        ScanKind::Bool => get::<_, bool>(row, i).map(|v| v.map_or(Value::Null, Value::Bool)),
        ScanKind::Float => decode_float(row, i),
        ScanKind::Decimal => decode_decimal(row, i),
        ScanKind::DateTime => decode_datetime(row, i),
        ScanKind::Bytes => get::<_, Vec<u8>>(row, i).map(|v| v.map_or(Value::Null, Value::Bytes)),
        ScanKind::Text | ScanKind::Null => None,
    };
    match scanned.or_else(|| decode_text(row, i)) {
        Some(v) => Ok(v),
        None => unscanned(row, i),
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn query(&mut self, sql: &str) -> Result<QueryRows> {
        debug!("PostgresDriver: query on {}", self.label);
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
            "PostgresDriver: query returned {} rows, {} columns",
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

    async fn close(self: Box<Self>) -> Result<()> {
        self.pool.close().await;
        debug!("PostgresDriver: closed {}", self.label);
        Ok(())
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::PostgreSQL
    }

    async fn open(&self, src: &Source) -> Result<Box<dyn Connection>> {
        let pool = self.pool(src).await?;
        Ok(Box::new(PostgresConnection { pool, label: src.handle.clone() }))
    }

    async fn ping(&self, src: &Source) -> Result<()> {
        let pool = self.pool(src).await?;
        let result = sqlx::query("SELECT 1").execute(&pool).await;
        pool.close().await;
        result
            .map(|_| ())
            .map_err(|e| SlqError::driver(format!("ping {}", src.handle), e))
    }

    async fn metadata(&self, src: &Source) -> Result<SourceMetadata> {
        let pool = self.pool(src).await?;
        let result = source_metadata(&pool, src).await;
        pool.close().await;
        result
    }
}

async fn source_metadata(pool: &PgPool, src: &Source) -> Result<SourceMetadata> {
    let name: String = sqlx::query_scalar("SELECT current_database()::text").fetch_one(pool).await?;
    let rows = sqlx::query(
        "SELECT table_name::text, column_name::text, ordinal_position::int8, \
         data_type::text, is_nullable::text \
         FROM information_schema.columns WHERE table_schema = current_schema() \
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    let mut cols = Vec::with_capacity(rows.len());
    for row in rows {
        let data_type: String = row.try_get("data_type")?;
        let position: i64 = row.try_get("ordinal_position")?;
        let nullable: String = row.try_get("is_nullable")?;
        cols.push((
            row.try_get("table_name")?,
            ColumnMetadata {
                name: row.try_get("column_name")?,
                position: position.saturating_sub(1) as usize,
                kind: ScanKind::from_type_name(&data_type),
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
            },
        ));
    }

    Ok(SourceMetadata {
        handle: src.handle.clone(),
        location: src.location.clone(),
        driver: DriverType::PostgreSQL,
        name,
        tables: group_tables(cols),
    })
}
