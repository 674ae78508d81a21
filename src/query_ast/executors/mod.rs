pub mod delimited;
pub mod mysql;
pub mod postgres;
pub mod scratch;
pub mod sqlite;
pub mod xlsx;

pub use delimited::CsvDriver;
pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use scratch::SqliteScratchStore;
pub use sqlite::SqliteDriver;
pub use xlsx::XlsxDriver;

use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

use crate::models::enums::ScanKind;
use crate::models::structs::{ColumnDescriptor, TableMetadata, Value, column_descriptors};
use crate::query_ast::errors::{Result, SlqError};

/// Column descriptors for a result set, typed through the shared scan table.
pub(crate) fn describe_columns<C: Column>(cols: &[C]) -> Vec<ColumnDescriptor> {
    let names: Vec<String> = cols.iter().map(|c| c.name().to_string()).collect();
    let kinds: Vec<ScanKind> = cols
        .iter()
        .map(|c| ScanKind::from_type_name(c.type_info().name()))
        .collect();
    column_descriptors(&names, &kinds)
}

/// Nullable decode of one cell. `None` means the value isn't a `T`.
pub(crate) fn get<'r, R, T>(row: &'r R, i: usize) -> Option<Option<T>>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, usize>(i).ok()
}

/// For a cell no decoder accepted: NULL if the value really is null, an
/// error naming the column and its type otherwise.
pub(crate) fn unscanned<R>(row: &R, i: usize) -> Result<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
{
    if row.try_get_raw(i)?.is_null() {
        return Ok(Value::Null);
    }
    let (name, type_name) = match row.columns().get(i) {
        Some(col) => (col.name().to_string(), col.type_info().name().to_string()),
        None => (i.to_string(), "?".to_string()),
    };
    Err(SlqError::driver(format!("column {}", name), format!("unsupported type {}", type_name)))
}

/// Groups `(table, column)` rows, as listed by a catalog query, into tables
/// while keeping the catalog's order.
pub(crate) fn group_tables(
    cols: Vec<(String, crate::models::structs::ColumnMetadata)>,
) -> Vec<TableMetadata> {
    let mut tables: Vec<TableMetadata> = Vec::new();
    for (table, col) in cols {
        match tables.last_mut() {
            Some(t) if t.name == table => t.columns.push(col),
            _ => tables.push(TableMetadata { name: table, columns: vec![col] }),
        }
    }
    tables
}
