//! Database dialect trait for SQL fragment rendering
//!
//! Every method is pure text generation; nothing here touches a connection.
//! Dialects override only what differs from the defaults.

use super::super::errors::SlqError;
use super::super::plan::{ColExpr, JoinConstraint, JoinSel, RowRange, TblSel};
use crate::models::enums::{DriverType, ScanKind};

type Result<T> = std::result::Result<T, SlqError>;

/// Trait for database-specific SQL dialect
pub trait SqlDialect: Send + Sync {
    /// Get the driver type
    fn driver_type(&self) -> DriverType;

    /// Quote an identifier (table/column name)
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Largest LIMIT the dialect accepts, used when only an OFFSET is given
    fn max_limit(&self) -> u64 {
        i64::MAX as u64
    }

    /// `FROM "tbl"`
    fn from_table(&self, tbl: &TblSel) -> Result<String> {
        Ok(format!("FROM {}", self.quote_ident(&tbl.table)))
    }

    /// `SELECT * FROM "tbl"`, used to pull a whole table into scratch
    fn select_all(&self, tbl: &TblSel) -> Result<String> {
        Ok(format!("SELECT * FROM {}", self.quote_ident(&tbl.table)))
    }

    /// `SELECT "a", "tbl"."b"`, or `SELECT *` for no columns
    fn select_cols(&self, cols: &[ColExpr]) -> Result<String> {
        if cols.is_empty() {
            return Ok("SELECT *".to_string());
        }
        let cols: Vec<String> = cols.iter().map(|c| self.quote_col(&c.name)).collect();
        Ok(format!("SELECT {}", cols.join(", ")))
    }

    /// `uid` -> `"uid"`, `user.uid` -> `"user"."uid"`
    fn quote_col(&self, name: &str) -> String {
        match name.split_once('.') {
            Some((tbl, col)) => format!("{}.{}", self.quote_ident(tbl), self.quote_ident(col)),
            None => self.quote_ident(name),
        }
    }

    /// `LIMIT n OFFSET m`. Some databases refuse OFFSET without LIMIT, so an
    /// offset alone is paired with [`SqlDialect::max_limit`].
    fn range(&self, range: &RowRange) -> Result<String> {
        if range.limit < 0 && range.offset < 0 {
            return Ok(String::new());
        }
        let mut parts = Vec::new();
        if range.limit > -1 {
            parts.push(format!("LIMIT {}", range.limit));
        } else {
            parts.push(format!("LIMIT {}", self.max_limit()));
        }
        if range.offset > -1 {
            parts.push(format!("OFFSET {}", range.offset));
        }
        Ok(parts.join(" "))
    }

    /// The FROM clause for a join
    fn join(&self, join: &JoinSel) -> Result<String> {
        let left = self.quote_ident(&join.left.table);
        let right = self.quote_ident(&join.right.table);
        let on = match &join.constraint {
            JoinConstraint::Natural => return Ok(format!("FROM {} NATURAL JOIN {}", left, right)),
            JoinConstraint::Using(col) => {
                let col = self.quote_ident(col);
                format!("ON {}.{} = {}.{}", left, col, right, col)
            }
            JoinConstraint::Cmp { left: l, op, right: r } => {
                let op = if op == "==" { "=" } else { op.as_str() };
                format!("ON {} {} {}", self.quote_col(l), op, self.quote_col(r))
            }
        };
        Ok(format!("FROM {} INNER JOIN {} {}", left, right, on))
    }

    /// `CREATE TABLE` for a scratch copy of an imported table
    fn create_table(&self, name: &str, _cols: &[String], _kinds: &[ScanKind]) -> Result<String> {
        Err(SlqError::Render(format!(
            "create table {:?}: not implemented for {}",
            name,
            self.driver_type()
        )))
    }

    /// Parameterised `INSERT` for a scratch copy of an imported table
    fn create_insert_stmt(&self, name: &str, _cols: &[String]) -> Result<String> {
        Err(SlqError::Render(format!(
            "insert into {:?}: not implemented for {}",
            name,
            self.driver_type()
        )))
    }
}

/// MySQL dialect
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn driver_type(&self) -> DriverType {
        DriverType::MySQL
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn max_limit(&self) -> u64 {
        u64::MAX
    }
}

/// PostgreSQL dialect
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn driver_type(&self) -> DriverType {
        DriverType::PostgreSQL
    }
}

/// SQLite dialect. Also renders for the scratch store and for delimited
/// files, which are loaded into SQLite.
pub struct SqliteDialect;

/// Column affinity for a scratch column holding values of `kind`.
pub fn sqlite_affinity(kind: ScanKind) -> &'static str {
    match kind {
        ScanKind::Int | ScanKind::Bool => "INTEGER",
        ScanKind::Float | ScanKind::Decimal => "REAL",
        ScanKind::Bytes => "BLOB",
        ScanKind::Text | ScanKind::DateTime | ScanKind::Null => "TEXT",
    }
}

impl SqlDialect for SqliteDialect {
    fn driver_type(&self) -> DriverType {
        DriverType::SQLite
    }

    fn create_table(&self, name: &str, cols: &[String], kinds: &[ScanKind]) -> Result<String> {
        if cols.len() != kinds.len() {
            return Err(SlqError::Render(format!(
                "create table {:?}: {} column names but {} column types",
                name,
                cols.len(),
                kinds.len()
            )));
        }
        if cols.is_empty() {
            return Err(SlqError::Render(format!("create table {:?}: no columns", name)));
        }
        let defs: Vec<String> = cols
            .iter()
            .zip(kinds)
            .map(|(c, k)| format!("{} {}", self.quote_ident(c), sqlite_affinity(*k)))
            .collect();
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ( {} )",
            self.quote_ident(name),
            defs.join(", ")
        ))
    }

    fn create_insert_stmt(&self, name: &str, cols: &[String]) -> Result<String> {
        if cols.is_empty() {
            return Err(SlqError::Render(format!("insert into {:?}: no columns", name)));
        }
        let names: Vec<String> = cols.iter().map(|c| self.quote_ident(c)).collect();
        let params = vec!["?"; cols.len()];
        Ok(format!(
            "INSERT INTO {} ( {} ) VALUES ( {} )",
            self.quote_ident(name),
            names.join(", "),
            params.join(", ")
        ))
    }
}

/// Get dialect for a driver type
pub fn get_dialect(driver: DriverType) -> Box<dyn SqlDialect> {
    match driver {
        DriverType::MySQL => Box::new(MySqlDialect),
        DriverType::PostgreSQL => Box::new(PostgresDialect),
        DriverType::SQLite | DriverType::Csv | DriverType::Tsv | DriverType::Xlsx => Box::new(SqliteDialect),
    }
}
