//! MySQL driver

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Executor, MySql, Row, Statement};

use super::{describe_columns, get, group_tables, unscanned};
use crate::models::enums::{DriverType, ScanKind};
use crate::models::structs::{ColumnMetadata, QueryRows, Source, SourceMetadata, Value};
use crate::query_ast::errors::{Result, SlqError};
use crate::query_ast::executor::{Connection, Driver};

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

pub struct MySqlDriver {
    // Stateless: every open() builds its own pool
}

impl MySqlDriver {
    pub fn new() -> Self {
        Self {}
    }

    async fn pool(&self, src: &Source) -> Result<MySqlPool> {
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(&src.location)
            .await
            .map_err(|e| SlqError::driver(format!("open {}", src.handle), e))?;
        debug!("MySqlDriver: opened {}", src.handle);
        Ok(pool)
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MySqlConnection {
    pool: MySqlPool,
    label: String,
}

fn bind_value<'q>(q: MySqlQuery<'q>, v: &Value) -> MySqlQuery<'q> {
    match v {
        Value::Null => q.bind(None::<String>),
        Value::Int(n) => q.bind(*n),
        Value::Float(f) => q.bind(*f),
        Value::Bool(b) => q.bind(*b),
        Value::Text(s) => q.bind(s.clone()),
        Value::Bytes(b) => q.bind(b.clone()),
    }
}

fn decode_int(row: &MySqlRow, i: usize) -> Option<Value> {
    if let Some(v) = get::<_, i64>(row, i) {
        return Some(v.map_or(Value::Null, Value::Int));
    }
    // BIGINT UNSIGNED past i64::MAX survives as text
    get::<_, u64>(row, i).map(|v| match v {
        None => Value::Null,
        Some(n) => i64::try_from(n).map_or_else(|_| Value::Text(n.to_string()), Value::Int),
    })
}

fn decode_float(row: &MySqlRow, i: usize) -> Option<Value> {
    get::<_, f64>(row, i)
        .or_else(|| get::<_, f32>(row, i).map(|v| v.map(f64::from)))
        .map(|v| v.map_or(Value::Null, Value::Float))
}

fn decode_datetime(row: &MySqlRow, i: usize) -> Option<Value> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let text = get::<_, DateTime<Utc>>(row, i)
        .map(|v| v.map(|t| t.to_rfc3339()))
        .or_else(|| get::<_, NaiveDateTime>(row, i).map(|v| v.map(|t| t.to_string())))
        .or_else(|| get::<_, NaiveDate>(row, i).map(|v| v.map(|t| t.to_string())))
        .or_else(|| get::<_, NaiveTime>(row, i).map(|v| v.map(|t| t.to_string())))?;
    Some(text.map_or(Value::Null, Value::Text))
}

fn decode_text(row: &MySqlRow, i: usize) -> Option<Value> {
    if let Some(v) = get::<_, String>(row, i) {
        return Some(v.map_or(Value::Null, Value::Text));
    }
    if let Some(v) = get::<_, sqlx::types::JsonValue>(row, i) {
        return Some(v.map_or(Value::Null, |j| Value::Text(j.to_string())));
    }
    // VARBINARY-typed catalog columns hold text
    get::<_, Vec<u8>>(row, i).map(|v| match v {
        None => Value::Null,
        Some(b) => match String::from_utf8(b) {
            Ok(s) => Value::Text(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
    })
}

fn decode_cell(row: &MySqlRow, i: usize, kind: ScanKind) -> Result<Value> {
    let scanned = match kind {
        ScanKind::Int => decode_int(row, i),
        ScanKind::Bool => get::<_, bool>(row, i).map(|v| v.map_or(Value::Null, Value::Bool)),
        ScanKind::Float => decode_float(row, i),
        ScanKind::Decimal => get::<_, rust_decimal::Decimal>(row, i)
            .map(|v| v.map_or(Value::Null, |d| Value::Text(d.to_string()))),
        ScanKind::DateTime => decode_datetime(row, i),
        ScanKind::Bytes => get::<_, Vec<u8>>(row, i).map(|v| v.map_or(Value::Null, Value::Bytes)),
        ScanKind::Text | ScanKind::Null => None,
    };
    match scanned
        .or_else(|| decode_text(row, i))
        .or_else(|| decode_int(row, i))
        .or_else(|| decode_float(row, i))
    {
        Some(v) => Ok(v),
        None => unscanned(row, i),
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&mut self, sql: &str) -> Result<QueryRows> {
        debug!("MySqlDriver: query on {}", self.label);
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
            "MySqlDriver: query returned {} rows, {} columns",
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
        debug!("MySqlDriver: closed {}", self.label);
        Ok(())
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::MySQL
    }

    async fn open(&self, src: &Source) -> Result<Box<dyn Connection>> {
        let pool = self.pool(src).await?;
        Ok(Box::new(MySqlConnection { pool, label: src.handle.clone() }))
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

async fn source_metadata(pool: &MySqlPool, src: &Source) -> Result<SourceMetadata> {
    let name: Option<String> = sqlx::query_scalar("SELECT DATABASE()").fetch_one(pool).await?;
    let rows = sqlx::query(
        "SELECT CAST(table_name AS CHAR) AS table_name, CAST(column_name AS CHAR) AS column_name, \
         CAST(ordinal_position AS SIGNED) AS ordinal_position, CAST(column_type AS CHAR) AS column_type, \
         CAST(is_nullable AS CHAR) AS is_nullable \
         FROM information_schema.columns WHERE table_schema = DATABASE() \
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    let mut cols = Vec::with_capacity(rows.len());
    for row in rows {
        let data_type: String = row.try_get("column_type")?;
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
        driver: DriverType::MySQL,
        name: name.unwrap_or_default(),
        tables: group_tables(cols),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_type() {
        assert_eq!(MySqlDriver::new().driver_type(), DriverType::MySQL);
    }
}
